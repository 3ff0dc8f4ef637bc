//! 目录层
//!
//! 目录就是一个 is_dir 的 inode, 内容是一段定宽目录项的数组.
//! 除根目录以外, 每个目录创建时的前两项固定是 `.` 和 `..`,
//! 路径解析因此不需要任何特殊分支.
//!
//! 删除目录项只清掉占用标志, 不做紧缩, 空出来的槽位留给后来者复用.

use std::sync::Arc;

use super::{DirEntry, FileSystem, FsError, Inode, DIRENT_SIZE, NAME_LENGTH_LIMIT};

/// 目录句柄: 一个打开的目录 inode 加上 readdir 游标 (字节偏移)
pub struct Dir {
    inode: Arc<Inode>,
    pos: usize,
}

impl Dir {
    /// 在 sector 上建立一个能容纳 entry_count 个目录项的空目录.
    /// `.` 和 `..` 由调用者随后填入.
    pub fn create(fs: &FileSystem, sector: u32, entry_count: usize) -> Result<(), FsError> {
        Inode::create(fs, sector, entry_count * DIRENT_SIZE, true)
    }

    /// 包装一个已经打开的 inode, 打开计数随句柄转移
    pub fn open(inode: Arc<Inode>) -> Self {
        Self { inode, pos: 0 }
    }

    pub fn close(self, fs: &FileSystem) {
        fs.inodes().close(fs, self.inode);
    }

    pub fn inode(&self) -> &Arc<Inode> {
        &self.inode
    }

    /// 交出底下的 inode, 打开计数一并带走
    pub fn into_inode(self) -> Arc<Inode> {
        self.inode
    }

    /// 按名字找到目录项, 返回它的字节偏移和内容
    fn find(&self, fs: &FileSystem, name: &str) -> Option<(usize, DirEntry)> {
        let length = self.inode.length(fs);
        let mut offset = 0;
        while offset + DIRENT_SIZE <= length {
            let mut entry = DirEntry::empty();
            if self.inode.read_at(fs, entry.as_bytes_mut(), offset) != DIRENT_SIZE {
                break;
            }
            if entry.is_in_use() && entry.name() == name {
                return Some((offset, entry));
            }
            offset += DIRENT_SIZE;
        }
        None
    }

    /// 按名字打开目录下的 inode
    pub fn lookup(&self, fs: &FileSystem, name: &str) -> Option<Arc<Inode>> {
        self.find(fs, name)
            .map(|(_, entry)| fs.inodes().open(fs, entry.sector()))
    }

    /// 添加一个指向 sector 的目录项. 优先复用空槽位, 没有空槽位就追加,
    /// 追加会经由 inode 的写路径把目录撑大.
    pub fn add(&self, fs: &FileSystem, name: &str, sector: u32) -> Result<(), FsError> {
        if name.is_empty() || name.len() > NAME_LENGTH_LIMIT || name.contains('/') {
            return Err(FsError::InvalidName);
        }
        if self.find(fs, name).is_some() {
            return Err(FsError::AlreadyExists);
        }

        let length = self.inode.length(fs);
        let mut slot = length;
        let mut offset = 0;
        while offset + DIRENT_SIZE <= length {
            let mut entry = DirEntry::empty();
            if self.inode.read_at(fs, entry.as_bytes_mut(), offset) != DIRENT_SIZE {
                break;
            }
            if !entry.is_in_use() {
                slot = offset;
                break;
            }
            offset += DIRENT_SIZE;
        }

        let entry = DirEntry::new(name, sector);
        if self.inode.write_at(fs, entry.as_bytes(), slot) != DIRENT_SIZE {
            return Err(FsError::NoSpace);
        }
        Ok(())
    }

    /// 清掉名为 name 的目录项
    pub fn remove_entry(&self, fs: &FileSystem, name: &str) -> Result<(), FsError> {
        let (offset, mut entry) = self.find(fs, name).ok_or(FsError::NotFound)?;
        entry.clear();
        if self.inode.write_at(fs, entry.as_bytes(), offset) != DIRENT_SIZE {
            return Err(FsError::NoSpace);
        }
        Ok(())
    }

    /// 游标推进到下一个在用的目录项并返回它的名字, `.` 和 `..` 跳过
    pub fn read_next(&mut self, fs: &FileSystem) -> Option<String> {
        let length = self.inode.length(fs);
        while self.pos + DIRENT_SIZE <= length {
            let mut entry = DirEntry::empty();
            if self.inode.read_at(fs, entry.as_bytes_mut(), self.pos) != DIRENT_SIZE {
                return None;
            }
            self.pos += DIRENT_SIZE;
            if entry.is_in_use() && entry.name() != "." && entry.name() != ".." {
                return Some(entry.name().to_string());
            }
        }
        None
    }

    pub fn is_empty(&self, fs: &FileSystem) -> bool {
        is_empty(fs, &self.inode)
    }
}

/// 除 `.` 和 `..` 外没有任何在用目录项
pub(crate) fn is_empty(fs: &FileSystem, inode: &Arc<Inode>) -> bool {
    let length = inode.length(fs);
    let mut offset = 0;
    while offset + DIRENT_SIZE <= length {
        let mut entry = DirEntry::empty();
        if inode.read_at(fs, entry.as_bytes_mut(), offset) != DIRENT_SIZE {
            break;
        }
        if entry.is_in_use() && entry.name() != "." && entry.name() != ".." {
            return false;
        }
        offset += DIRENT_SIZE;
    }
    true
}
