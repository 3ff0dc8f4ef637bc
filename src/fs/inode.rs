//! 索引节点层
//!
//! [`DiskInode`] 固定躺在自己的扇区里, 内存中的 [`Inode`] 只记住身份
//! (扇区号) 和打开状态, 不缓存磁盘上的内容, 每个元数据字段都现场
//! 经过块缓存重新读取.
//!
//! [`InodeTable`] 以扇区号为键, 保证同一个扇区在内存中至多存在一个
//! [`Inode`], 所有打开者共享; 打开计数归零时从表中摘除, 若此前已被
//! 标记删除, 顺带把索引里的所有扇区连同 inode 自己的扇区一起归还位图.

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use spin::Mutex;

use super::{DiskInode, FileSystem, FsError, SECTOR_SIZE};

pub struct Inode {
    /// inode 所在的扇区, 也是它的唯一标识
    sector: u32,
    is_dir: bool,
    meta: Mutex<InodeMeta>,
    /// 串行化块映射查询与扩容, 不覆盖数据拷贝本身
    map_lock: Mutex<()>,
}

struct InodeMeta {
    open_count: usize,
    removed: bool,
    /// 0 表示可写, 大于 0 时写操作一律写入 0 字节
    deny_write_count: usize,
}

impl Inode {
    /// 在 sector 上写出一个新的磁盘 inode 并扩容到 length 字节.
    /// 扩容失败时所有已分配的扇区都已被 extend_to 归还.
    /// inode 本身不经过缓存, 直接落盘.
    pub fn create(fs: &FileSystem, sector: u32, length: usize, is_dir: bool) -> Result<(), FsError> {
        let mut disk = DiskInode::new(is_dir);
        disk.extend_to(fs, length)?;
        fs.device().write_sector(sector, disk.as_bytes());
        Ok(())
    }

    pub fn sector(&self) -> u32 {
        self.sector
    }

    pub fn is_dir(&self) -> bool {
        self.is_dir
    }

    /// 文件长度永远以磁盘 inode 为准
    pub fn length(&self, fs: &FileSystem) -> usize {
        let mut disk = DiskInode::zeroed();
        fs.cache().read(self.sector, disk.as_bytes_mut(), 0);
        disk.length as usize
    }

    pub fn is_removed(&self) -> bool {
        self.meta.lock().removed
    }

    /// 标记删除, 实际回收发生在最后一个打开者关闭时
    pub fn mark_removed(&self) {
        self.meta.lock().removed = true;
    }

    pub fn open_count(&self) -> usize {
        self.meta.lock().open_count
    }

    pub fn deny_write(&self) {
        let mut meta = self.meta.lock();
        meta.deny_write_count += 1;
        debug_assert!(meta.deny_write_count <= meta.open_count);
    }

    pub fn allow_write(&self) {
        let mut meta = self.meta.lock();
        debug_assert!(meta.deny_write_count > 0);
        meta.deny_write_count -= 1;
    }

    /// 从 offset 开始读 buf.len() 字节. 越过文件末尾的读整体拒绝, 返回 0.
    pub fn read_at(&self, fs: &FileSystem, buf: &mut [u8], offset: usize) -> usize {
        if offset + buf.len() > self.length(fs) {
            return 0;
        }
        let mut done = 0;
        while done < buf.len() {
            let pos = offset + done;
            // 映射在 inode 锁内, 数据拷贝在锁外, 由槽位锁按扇区串行化
            let sector = {
                let _map = self.map_lock.lock();
                let mut disk = DiskInode::zeroed();
                fs.cache().read(self.sector, disk.as_bytes_mut(), 0);
                disk.sector_for_block(fs, pos / SECTOR_SIZE)
            };
            if sector == 0 {
                break;
            }
            let sector_off = pos % SECTOR_SIZE;
            let chunk = (SECTOR_SIZE - sector_off).min(buf.len() - done);
            let n = fs.cache().read(sector, &mut buf[done..done + chunk], sector_off);
            if n == 0 {
                break;
            }
            done += n;
        }
        done
    }

    /// 从 offset 开始写入 buf, 需要时先扩容并顺带把空洞清零.
    /// 返回写入的字节数; 扩容失败或处于拒写状态时为 0.
    pub fn write_at(&self, fs: &FileSystem, buf: &[u8], offset: usize) -> usize {
        if self.meta.lock().deny_write_count > 0 {
            return 0;
        }
        // 一次持锁完成扩容和整个区间的映射, 随后的拷贝不再碰 inode 锁.
        // 长度为零的写不落一个字节, 但越过末尾时同样驱动扩容和清零.
        let sectors = {
            let _map = self.map_lock.lock();
            let mut disk = DiskInode::zeroed();
            fs.cache().read(self.sector, disk.as_bytes_mut(), 0);
            if offset + buf.len() > disk.length as usize {
                if let Err(err) = disk.extend_to(fs, offset + buf.len()) {
                    debug!(
                        "write of {} bytes at {} to inode {} refused: {}",
                        buf.len(),
                        offset,
                        self.sector,
                        err
                    );
                    return 0;
                }
                fs.cache().write(self.sector, disk.as_bytes(), 0);
            }
            if buf.is_empty() {
                Vec::new()
            } else {
                let first = offset / SECTOR_SIZE;
                let last = (offset + buf.len() - 1) / SECTOR_SIZE;
                let mut sectors = Vec::with_capacity(last - first + 1);
                for index in first..=last {
                    sectors.push(disk.sector_for_block(fs, index));
                }
                sectors
            }
        };
        let mut done = 0;
        for sector in sectors {
            if sector == 0 {
                break;
            }
            let pos = offset + done;
            let sector_off = pos % SECTOR_SIZE;
            let chunk = (SECTOR_SIZE - sector_off).min(buf.len() - done);
            let n = fs.cache().write(sector, &buf[done..done + chunk], sector_off);
            if n == 0 {
                break;
            }
            done += n;
        }
        done
    }

    /// 把索引里的所有扇区连同 inode 自己的扇区归还位图
    fn release_sectors(&self, fs: &FileSystem) {
        let _map = self.map_lock.lock();
        let mut disk = DiskInode::zeroed();
        fs.cache().read(self.sector, disk.as_bytes_mut(), 0);
        for sector in disk.collect_sectors(fs.cache()) {
            fs.free_map().release(fs.cache(), sector);
        }
        fs.free_map().release(fs.cache(), self.sector);
    }
}

/// 打开中的 inode 集合, 扇区号 -> 共享句柄
pub struct InodeTable {
    open: Mutex<HashMap<u32, Arc<Inode>>>,
}

impl InodeTable {
    pub fn new() -> Self {
        Self {
            open: Mutex::new(HashMap::new()),
        }
    }

    /// 打开 sector 上的 inode. 已经打开过的直接加一份计数返回同一个句柄,
    /// 否则读一次磁盘 inode 建立新句柄.
    pub fn open(&self, fs: &FileSystem, sector: u32) -> Arc<Inode> {
        let mut open = self.open.lock();
        if let Some(inode) = open.get(&sector) {
            inode.meta.lock().open_count += 1;
            return Arc::clone(inode);
        }
        let mut disk = DiskInode::zeroed();
        fs.cache().read(sector, disk.as_bytes_mut(), 0);
        let inode = Arc::new(Inode {
            sector,
            is_dir: disk.is_dir,
            meta: Mutex::new(InodeMeta {
                open_count: 1,
                removed: false,
                deny_write_count: 0,
            }),
            map_lock: Mutex::new(()),
        });
        open.insert(sector, Arc::clone(&inode));
        inode
    }

    /// 关闭一份句柄. 计数归零时摘表, 已标记删除的顺带回收全部扇区.
    pub fn close(&self, fs: &FileSystem, inode: Arc<Inode>) {
        let mut open = self.open.lock();
        let (last, removed) = {
            let mut meta = inode.meta.lock();
            meta.open_count -= 1;
            (meta.open_count == 0, meta.removed)
        };
        if last {
            open.remove(&inode.sector);
        }
        drop(open);
        if last && removed {
            debug!("reclaiming sectors of removed inode {}", inode.sector);
            inode.release_sectors(fs);
        }
    }
}
