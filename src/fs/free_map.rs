//! 空闲扇区位图
//!
//! 位图占据一个扇区, 解释为 64 个 u64, 共 4096 bits, 每个 bit 对应一个扇区,
//! 0 表示空闲, 1 表示已分配. 分配就是找到一个为 0 的 bit 置 1, 回收则清零.
//! 位图自身持锁串行化, 每次改动都经过块缓存写回自己所在的扇区,
//! flush 之后即为持久状态.

use spin::Mutex;

use super::{BufferCache, FREE_MAP_SECTOR, ROOT_DIR_SECTOR, SECTOR_SIZE};

/// 一个扇区解释为 64 组, 每组 64 bits
const GROUPS: usize = SECTOR_SIZE / 8;

pub struct FreeMap {
    bits: Mutex<[u64; GROUPS]>,
    /// 位图管理的扇区总数, 不超过 4096
    total: u32,
}

impl FreeMap {
    /// 格式化时建立一张新位图, 预留位图扇区和根目录扇区
    pub fn create(cache: &BufferCache, total: u32) -> Self {
        assert!(total as usize <= GROUPS * 64);
        let mut bits = [0u64; GROUPS];
        set_bit(&mut bits, FREE_MAP_SECTOR);
        set_bit(&mut bits, ROOT_DIR_SECTOR);
        cache.write(FREE_MAP_SECTOR, as_bytes(&bits), 0);
        Self {
            bits: Mutex::new(bits),
            total,
        }
    }

    /// 挂载时从设备读回位图
    pub fn load(cache: &BufferCache, total: u32) -> Self {
        assert!(total as usize <= GROUPS * 64);
        let mut bits = [0u64; GROUPS];
        cache.read(FREE_MAP_SECTOR, as_bytes_mut(&mut bits), 0);
        Self {
            bits: Mutex::new(bits),
            total,
        }
    }

    /// 分配一个空闲扇区, 已经没有空闲扇区时返回 None
    pub fn allocate(&self, cache: &BufferCache) -> Option<u32> {
        let mut bits = self.bits.lock();
        // 逐组找到一个没分配完的 u64, 最低位的 0 就是要找的 bit
        let (group, inner) = bits
            .iter()
            .enumerate()
            .find(|(_, group)| **group != u64::MAX)
            .map(|(i, group)| (i, group.trailing_ones() as usize))?;
        let sector = (group * 64 + inner) as u32;
        if sector >= self.total {
            return None;
        }
        bits[group] |= 1 << inner;
        cache.write(FREE_MAP_SECTOR, as_bytes(&*bits), 0);
        Some(sector)
    }

    /// 归还一个扇区
    pub fn release(&self, cache: &BufferCache, sector: u32) {
        let mut bits = self.bits.lock();
        let (group, inner) = (sector as usize / 64, sector as usize % 64);
        assert!(bits[group] & (1 << inner) != 0);
        bits[group] &= !(1u64 << inner);
        cache.write(FREE_MAP_SECTOR, as_bytes(&*bits), 0);
    }

    /// 当前空闲扇区数
    pub fn free_count(&self) -> usize {
        let bits = self.bits.lock();
        let mut free = 0usize;
        for (i, group) in bits.iter().enumerate() {
            let base = i * 64;
            if base >= self.total as usize {
                break;
            }
            let span = (self.total as usize - base).min(64);
            let mask = if span == 64 { u64::MAX } else { (1u64 << span) - 1 };
            free += (!*group & mask).count_ones() as usize;
        }
        free
    }
}

fn set_bit(bits: &mut [u64; GROUPS], sector: u32) {
    bits[sector as usize / 64] |= 1 << (sector as usize % 64);
}

fn as_bytes(bits: &[u64; GROUPS]) -> &[u8] {
    unsafe { std::slice::from_raw_parts(bits.as_ptr() as *const u8, SECTOR_SIZE) }
}

fn as_bytes_mut(bits: &mut [u64; GROUPS]) -> &mut [u8] {
    unsafe { std::slice::from_raw_parts_mut(bits.as_mut_ptr() as *mut u8, SECTOR_SIZE) }
}
