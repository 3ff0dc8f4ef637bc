//! 块缓存层: 介于文件系统与块设备之间的写回式扇区缓存
//!
//! 固定 63 个槽位, 每个槽位缓存一个扇区的数据. 命中时直接在内存中完成读写,
//! 未命中时按时钟算法换出一个槽位, 脏数据在换出/flush/关机时写回设备.
//!
//! 锁的层次: 先拿索引锁再拿槽位锁, 任何代码都不允许反过来.
//! 槽位的扇区归属只会在同时持有两把锁时改变, 因此持有槽位锁的一方
//! 看到的扇区身份是稳定的; 换出扫描用 try_lock, 正被占用的槽位直接跳过,
//! 索引锁的持有时间因此有界.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use spin::{Mutex, MutexGuard};

use super::{BlockDevice, CACHE_SLOTS, SECTOR_SIZE};

/// 单个缓存槽位中受槽位锁保护的部分
struct Slot {
    data: [u8; SECTOR_SIZE],
    /// 换出或 flush 前需要写回设备
    dirty: bool,
    /// 时钟算法的 recently-used 位
    used: bool,
}

/// 槽位的扇区归属, 由索引锁保护
#[derive(Clone, Copy)]
struct SlotMeta {
    sector: u32,
    valid: bool,
}

struct CacheIndex {
    /// 时钟指针, 始终落在 [0, CACHE_SLOTS) 内
    hand: usize,
    meta: [SlotMeta; CACHE_SLOTS],
}

pub struct BufferCache {
    device: Arc<dyn BlockDevice>,
    index: Mutex<CacheIndex>,
    slots: [Mutex<Slot>; CACHE_SLOTS],
    tries: AtomicU64,
    hits: AtomicU64,
    device_reads: AtomicU64,
    device_writes: AtomicU64,
}

impl BufferCache {
    pub fn new(device: Arc<dyn BlockDevice>) -> Self {
        Self {
            device,
            index: Mutex::new(CacheIndex {
                hand: 0,
                meta: [SlotMeta {
                    sector: 0,
                    valid: false,
                }; CACHE_SLOTS],
            }),
            slots: std::array::from_fn(|_| {
                Mutex::new(Slot {
                    data: [0; SECTOR_SIZE],
                    dirty: false,
                    used: false,
                })
            }),
            tries: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            device_reads: AtomicU64::new(0),
            device_writes: AtomicU64::new(0),
        }
    }

    /// 从编号为 sector 的扇区偏移 offset 处读出至多 dst.len() 字节,
    /// 返回实际读出的字节数. offset 超出扇区末尾时返回 0.
    pub fn read(&self, sector: u32, dst: &mut [u8], offset: usize) -> usize {
        if offset > SECTOR_SIZE {
            return 0;
        }
        let n = dst.len().min(SECTOR_SIZE - offset);
        let mut slot = self.acquire(sector, false);
        dst[..n].copy_from_slice(&slot.data[offset..offset + n]);
        slot.used = true;
        n
    }

    /// 向编号为 sector 的扇区偏移 offset 处写入至多 src.len() 字节并标脏,
    /// 返回实际写入的字节数. offset 超出扇区末尾时返回 0.
    pub fn write(&self, sector: u32, src: &[u8], offset: usize) -> usize {
        if offset > SECTOR_SIZE {
            return 0;
        }
        let n = src.len().min(SECTOR_SIZE - offset);
        // 覆盖整个扇区的写不需要先从设备取回旧数据
        let whole = offset == 0 && n == SECTOR_SIZE;
        let mut slot = self.acquire(sector, whole);
        slot.data[offset..offset + n].copy_from_slice(&src[..n]);
        slot.used = true;
        slot.dirty = true;
        n
    }

    /// 查找 sector 对应的槽位, 未命中则换出一个槽位并 (除非整扇区覆盖写)
    /// 从设备读入数据. 返回时持有槽位锁.
    fn acquire(&self, sector: u32, whole_overwrite: bool) -> MutexGuard<'_, Slot> {
        let mut index = self.index.lock();
        self.tries.fetch_add(1, Ordering::Relaxed);

        for i in 0..CACHE_SLOTS {
            if index.meta[i].valid && index.meta[i].sector == sector {
                self.hits.fetch_add(1, Ordering::Relaxed);
                // 持有索引锁期间槽位身份不会变, 阻塞等待占用者是安全的;
                // 占用者不会反过来申请索引锁
                let slot = self.slots[i].lock();
                drop(index);
                return slot;
            }
        }

        let (victim, mut slot) = self.evict(&mut index);
        index.meta[victim] = SlotMeta {
            sector,
            valid: true,
        };
        slot.dirty = false;
        drop(index);

        if whole_overwrite {
            slot.data.fill(0);
        } else {
            self.device.read_sector(sector, &mut slot.data);
            self.device_reads.fetch_add(1, Ordering::Relaxed);
        }
        slot
    }

    /// 时钟换出: 指针绕环前进, 占用中的槽位跳过, 无效槽位立即选中,
    /// recently-used 的槽位清位后放过一轮, 其余槽位先写回脏数据再选中.
    /// 扫描本身从不阻塞, 总会转到一个可用槽位为止.
    fn evict(&self, index: &mut CacheIndex) -> (usize, MutexGuard<'_, Slot>) {
        loop {
            let i = index.hand;
            if let Some(mut slot) = self.slots[i].try_lock() {
                if !index.meta[i].valid {
                    index.hand = (i + 1) % CACHE_SLOTS;
                    return (i, slot);
                }
                if slot.used {
                    slot.used = false;
                } else {
                    if slot.dirty {
                        self.device.write_sector(index.meta[i].sector, &slot.data);
                        self.device_writes.fetch_add(1, Ordering::Relaxed);
                        slot.dirty = false;
                    }
                    index.hand = (i + 1) % CACHE_SLOTS;
                    return (i, slot);
                }
            }
            index.hand = (index.hand + 1) % CACHE_SLOTS;
        }
    }

    /// 把所有脏槽位写回设备并清除脏位
    pub fn flush_all(&self) {
        let index = self.index.lock();
        for i in 0..CACHE_SLOTS {
            // 这里必须阻塞等待, 占用者可能还在往槽位里写
            let mut slot = self.slots[i].lock();
            if slot.dirty {
                self.device.write_sector(index.meta[i].sector, &slot.data);
                self.device_writes.fetch_add(1, Ordering::Relaxed);
                slot.dirty = false;
            }
        }
    }

    /// 诊断用: 写回并清空整个缓存, 统计值归零.
    /// 依次拿到索引锁和每把槽位锁, 等价于在在途操作排空后销毁重建.
    pub fn reset(&self) {
        let mut index = self.index.lock();
        for i in 0..CACHE_SLOTS {
            let mut slot = self.slots[i].lock();
            if slot.dirty {
                self.device.write_sector(index.meta[i].sector, &slot.data);
                slot.dirty = false;
            }
            slot.used = false;
            index.meta[i] = SlotMeta {
                sector: 0,
                valid: false,
            };
        }
        index.hand = 0;
        self.tries.store(0, Ordering::Relaxed);
        self.hits.store(0, Ordering::Relaxed);
        self.device_reads.store(0, Ordering::Relaxed);
        self.device_writes.store(0, Ordering::Relaxed);
    }

    pub fn tries(&self) -> u64 {
        self.tries.load(Ordering::Relaxed)
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn device_reads(&self) -> u64 {
        self.device_reads.load(Ordering::Relaxed)
    }

    pub fn device_writes(&self) -> u64 {
        self.device_writes.load(Ordering::Relaxed)
    }
}
