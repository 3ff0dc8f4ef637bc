//! 磁盘数据结构层
//!
//! 三个磁盘上的数据结构: [`DiskInode`], [`IndirectBlock`], [`DirEntry`].
//!
//! 每个文件/目录对应一个独占整个扇区的 [`DiskInode`], 内含 123 个直接索引,
//! 一个一级间接索引和一个二级间接索引, 索引值为 0 表示未分配.
//! 由此单个文件最大可达 (123 + 128 + 128*128) * 512 字节, 约 8 MiB.
//!
//! 这些结构都以 #[repr(C)] 精确对齐到磁盘布局, 读写时直接以字节切片的形式
//! 经过块缓存, 不在内存中另外保存副本.

use log::debug;

use super::{
    BufferCache, FileSystem, FsError, DIRECT_BOUND, DIRECT_COUNT, DIRENT_SIZE, INDIRECT_BOUND,
    INDIRECT_COUNT, INODE_MAGIC, MAX_FILE_SIZE, NAME_LENGTH_LIMIT, SECTOR_SIZE,
};

/// 容纳 size 字节需要的数据扇区数
pub fn sectors_for(size: usize) -> usize {
    (size + SECTOR_SIZE - 1) / SECTOR_SIZE
}

/// 磁盘上的 inode, 大小恰好为一个扇区
#[repr(C)]
pub struct DiskInode {
    /// 文件内容的字节数
    pub length: i32,
    magic: u32,
    /// 直接索引
    pub direct: [u32; DIRECT_COUNT],
    /// 一级间接索引块的扇区号
    pub indirect: u32,
    /// 二级间接索引块的扇区号
    pub doubly_indirect: u32,
    pub is_dir: bool,
}

/// 索引块: 128 个扇区号的数组, 二级间接索引块的每一项指向一个一级索引块
#[repr(C)]
pub struct IndirectBlock {
    pub entries: [u32; INDIRECT_COUNT],
}

impl IndirectBlock {
    pub fn zeroed() -> Self {
        Self {
            entries: [0; INDIRECT_COUNT],
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self as *const Self as *const u8, SECTOR_SIZE) }
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self as *mut Self as *mut u8, SECTOR_SIZE) }
    }
}

impl DiskInode {
    pub fn new(is_dir: bool) -> Self {
        Self {
            length: 0,
            magic: INODE_MAGIC,
            direct: [0; DIRECT_COUNT],
            indirect: 0,
            doubly_indirect: 0,
            is_dir,
        }
    }

    pub fn zeroed() -> Self {
        Self {
            length: 0,
            magic: 0,
            direct: [0; DIRECT_COUNT],
            indirect: 0,
            doubly_indirect: 0,
            is_dir: false,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.magic == INODE_MAGIC
    }

    pub fn as_bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self as *const Self as *const u8, SECTOR_SIZE) }
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self as *mut Self as *mut u8, SECTOR_SIZE) }
    }

    /// 查出文件内部第 index 个数据块所在的扇区号, 未分配时为 0
    pub fn sector_for_block(&self, fs: &FileSystem, index: usize) -> u32 {
        if index < DIRECT_BOUND {
            self.direct[index]
        } else if index < INDIRECT_BOUND {
            if self.indirect == 0 {
                return 0;
            }
            let mut node = IndirectBlock::zeroed();
            fs.cache().read(self.indirect, node.as_bytes_mut(), 0);
            node.entries[index - DIRECT_BOUND]
        } else if index < super::MAX_SECTORS {
            if self.doubly_indirect == 0 {
                return 0;
            }
            let off = index - INDIRECT_BOUND;
            let mut level1 = IndirectBlock::zeroed();
            fs.cache().read(self.doubly_indirect, level1.as_bytes_mut(), 0);
            let second = level1.entries[off / INDIRECT_COUNT];
            if second == 0 {
                return 0;
            }
            let mut level2 = IndirectBlock::zeroed();
            fs.cache().read(second, level2.as_bytes_mut(), 0);
            level2.entries[off % INDIRECT_COUNT]
        } else {
            0
        }
    }

    /// 把文件扩容到 new_length 字节, 新增的数据块全部清零.
    ///
    /// 先算清楚总共需要多少个扇区 (数据块加上新增的索引块), 从空闲位图
    /// 一次性全部拿到手, 中途拿不到就把已拿到的全数归还并失败返回;
    /// 只有整批成功之后才把它们接进索引. 因此扩容要么完整生效,
    /// 要么 inode 原样不动.
    pub fn extend_to(&mut self, fs: &FileSystem, new_length: usize) -> Result<(), FsError> {
        if new_length > MAX_FILE_SIZE {
            return Err(FsError::TooBig);
        }
        let current = self.length as usize;
        if new_length <= current {
            return Ok(());
        }
        let current_sectors = sectors_for(current);
        let target_sectors = sectors_for(new_length);
        if target_sectors == current_sectors {
            self.length = new_length as i32;
            return Ok(());
        }

        // 数据块之外还要数上新增的索引块
        let mut needed = target_sectors - current_sectors;
        if target_sectors > DIRECT_BOUND && self.indirect == 0 {
            needed += 1;
        }
        if target_sectors > INDIRECT_BOUND {
            if self.doubly_indirect == 0 {
                needed += 1;
            }
            let target_level1 = (target_sectors - INDIRECT_BOUND - 1) / INDIRECT_COUNT;
            needed += if current_sectors > INDIRECT_BOUND {
                target_level1 - (current_sectors - INDIRECT_BOUND - 1) / INDIRECT_COUNT
            } else {
                target_level1 + 1
            };
        }

        // 预分配, 不足则整体回滚
        let mut fresh: Vec<u32> = Vec::with_capacity(needed);
        for _ in 0..needed {
            match fs.free_map().allocate(fs.cache()) {
                Some(sector) => fresh.push(sector),
                None => {
                    debug!(
                        "extend to {} failed: {} sectors short",
                        new_length,
                        needed - fresh.len()
                    );
                    for &sector in &fresh {
                        fs.free_map().release(fs.cache(), sector);
                    }
                    return Err(FsError::NoSpace);
                }
            }
        }

        let zeros = [0u8; SECTOR_SIZE];
        let mut fresh = fresh.into_iter();
        let mut remaining = target_sectors - current_sectors;

        // 按顺序填满直接索引中的空位
        for i in 0..DIRECT_COUNT {
            if remaining == 0 {
                break;
            }
            if self.direct[i] == 0 {
                let sector = fresh.next().unwrap();
                self.direct[i] = sector;
                fs.cache().write(sector, &zeros, 0);
                remaining -= 1;
            }
        }

        // 一级间接索引
        if remaining > 0 {
            let mut node = IndirectBlock::zeroed();
            if self.indirect == 0 {
                self.indirect = fresh.next().unwrap();
            } else {
                fs.cache().read(self.indirect, node.as_bytes_mut(), 0);
            }
            for i in 0..INDIRECT_COUNT {
                if remaining == 0 {
                    break;
                }
                if node.entries[i] == 0 {
                    let sector = fresh.next().unwrap();
                    node.entries[i] = sector;
                    fs.cache().write(sector, &zeros, 0);
                    remaining -= 1;
                }
            }
            fs.cache().write(self.indirect, node.as_bytes(), 0);
        }

        // 二级间接索引, 从 current_sectors 落进的一级槽位接着填
        if remaining > 0 {
            let mut level1 = IndirectBlock::zeroed();
            if self.doubly_indirect == 0 {
                self.doubly_indirect = fresh.next().unwrap();
            } else {
                fs.cache().read(self.doubly_indirect, level1.as_bytes_mut(), 0);
            }
            let mut k = if current_sectors > INDIRECT_BOUND {
                (current_sectors - INDIRECT_BOUND - 1) / INDIRECT_COUNT
            } else {
                0
            };
            while remaining > 0 && k < INDIRECT_COUNT {
                let mut level2 = IndirectBlock::zeroed();
                if level1.entries[k] == 0 {
                    level1.entries[k] = fresh.next().unwrap();
                } else {
                    fs.cache().read(level1.entries[k], level2.as_bytes_mut(), 0);
                }
                for i in 0..INDIRECT_COUNT {
                    if remaining == 0 {
                        break;
                    }
                    if level2.entries[i] == 0 {
                        let sector = fresh.next().unwrap();
                        level2.entries[i] = sector;
                        // 注意这一层的清零不走缓存, 直接写设备
                        fs.device().write_sector(sector, &zeros);
                        remaining -= 1;
                    }
                }
                fs.cache().write(level1.entries[k], level2.as_bytes(), 0);
                k += 1;
            }
            fs.cache().write(self.doubly_indirect, level1.as_bytes(), 0);
        }

        self.length = new_length as i32;
        Ok(())
    }

    /// 收集索引中所有已分配的扇区号, 包括索引块自身, 不包括 inode 所在的扇区.
    /// 文件只会按前缀增长, 因此各级索引内碰到第一个 0 即可停下.
    pub fn collect_sectors(&self, cache: &BufferCache) -> Vec<u32> {
        let mut sectors = Vec::new();

        for &sector in self.direct.iter() {
            if sector == 0 {
                break;
            }
            sectors.push(sector);
        }

        if self.indirect != 0 {
            let mut node = IndirectBlock::zeroed();
            cache.read(self.indirect, node.as_bytes_mut(), 0);
            for &sector in node.entries.iter() {
                if sector == 0 {
                    break;
                }
                sectors.push(sector);
            }
            sectors.push(self.indirect);
        }

        if self.doubly_indirect != 0 {
            let mut level1 = IndirectBlock::zeroed();
            cache.read(self.doubly_indirect, level1.as_bytes_mut(), 0);
            for &second in level1.entries.iter() {
                if second == 0 {
                    break;
                }
                let mut level2 = IndirectBlock::zeroed();
                cache.read(second, level2.as_bytes_mut(), 0);
                for &sector in level2.entries.iter() {
                    if sector == 0 {
                        break;
                    }
                    sectors.push(sector);
                }
                sectors.push(second);
            }
            sectors.push(self.doubly_indirect);
        }

        sectors
    }
}

/// 目录项, 定宽 24 字节: 占用标志, 指向的 inode 扇区号, NUL 填充的名字
#[repr(C)]
pub struct DirEntry {
    in_use: u8,
    inode_sector: u32,
    name: [u8; NAME_LENGTH_LIMIT + 1],
}

impl DirEntry {
    pub fn empty() -> Self {
        Self {
            in_use: 0,
            inode_sector: 0,
            name: [0; NAME_LENGTH_LIMIT + 1],
        }
    }

    /// 名字的合法性 (非空, 不超长, 不含 '/') 由目录层把关
    pub fn new(name: &str, inode_sector: u32) -> Self {
        let mut bytes = [0; NAME_LENGTH_LIMIT + 1];
        bytes[..name.len()].copy_from_slice(name.as_bytes());
        Self {
            in_use: 1,
            inode_sector,
            name: bytes,
        }
    }

    pub fn is_in_use(&self) -> bool {
        self.in_use != 0
    }

    pub fn clear(&mut self) {
        self.in_use = 0;
    }

    pub fn sector(&self) -> u32 {
        self.inode_sector
    }

    pub fn name(&self) -> &str {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
        std::str::from_utf8(&self.name[..len]).unwrap_or("")
    }

    pub fn as_bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self as *const Self as *const u8, DIRENT_SIZE) }
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self as *mut Self as *mut u8, DIRENT_SIZE) }
    }
}
