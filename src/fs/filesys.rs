//! 文件系统门面
//!
//! 把路径解析, 目录操作和索引节点层捏合成对外的一组操作:
//! 格式化/挂载, 创建/打开/删除, 目录游走, 以及诊断用的缓存统计.
//!
//! 整个文件系统是一个被 Arc 共享的自持对象: 块缓存, 空闲位图和
//! 打开 inode 表都挂在它身上, 而不是进程级的全局单例, 销毁重建
//! 因此只是换一个对象的事.

use std::sync::Arc;

use log::{debug, info};
use spin::Mutex;

use super::dir;
use super::inode::InodeTable;
use super::path;
use super::{
    BlockDevice, BufferCache, Dir, DiskInode, File, FreeMap, FsError, Inode, ROOT_DIR_ENTRIES,
    ROOT_DIR_SECTOR,
};

pub struct FileSystem {
    device: Arc<dyn BlockDevice>,
    cache: BufferCache,
    free_map: FreeMap,
    inodes: InodeTable,
    /// 当前目录的 inode 扇区号, 相对路径从这里出发
    cwd: Mutex<u32>,
}

impl FileSystem {
    /// 在设备上建立一个新的文件系统: 新的空闲位图加上一个预留了
    /// 16 个目录项的根目录, 随后全部落盘.
    pub fn format(device: Arc<dyn BlockDevice>, total_sectors: u32) -> Result<Arc<Self>, FsError> {
        let cache = BufferCache::new(Arc::clone(&device));
        let free_map = FreeMap::create(&cache, total_sectors);
        let fs = Self {
            device,
            cache,
            free_map,
            inodes: InodeTable::new(),
            cwd: Mutex::new(ROOT_DIR_SECTOR),
        };
        Dir::create(&fs, ROOT_DIR_SECTOR, ROOT_DIR_ENTRIES)?;
        fs.cache.flush_all();
        info!("formatted {} sectors, root directory ready", total_sectors);
        Ok(Arc::new(fs))
    }

    /// 挂载一个已经格式化过的设备
    pub fn mount(device: Arc<dyn BlockDevice>, total_sectors: u32) -> Result<Arc<Self>, FsError> {
        let cache = BufferCache::new(Arc::clone(&device));
        let free_map = FreeMap::load(&cache, total_sectors);
        let mut root = DiskInode::zeroed();
        cache.read(ROOT_DIR_SECTOR, root.as_bytes_mut(), 0);
        if !root.is_valid() || !root.is_dir {
            return Err(FsError::Corrupted);
        }
        info!("mounted, {} sectors free", free_map.free_count());
        Ok(Arc::new(Self {
            device,
            cache,
            free_map,
            inodes: InodeTable::new(),
            cwd: Mutex::new(ROOT_DIR_SECTOR),
        }))
    }

    pub(crate) fn cache(&self) -> &BufferCache {
        &self.cache
    }

    pub(crate) fn free_map(&self) -> &FreeMap {
        &self.free_map
    }

    pub(crate) fn device(&self) -> &Arc<dyn BlockDevice> {
        &self.device
    }

    pub(crate) fn inodes(&self) -> &InodeTable {
        &self.inodes
    }

    pub(crate) fn current_dir(&self) -> u32 {
        *self.cwd.lock()
    }

    pub fn open_root(&self) -> Dir {
        Dir::open(self.inodes.open(self, ROOT_DIR_SECTOR))
    }

    /// 打开当前目录 (根目录没有 `.` 项, 不能靠路径到达自己)
    pub fn open_current_dir(&self) -> Dir {
        Dir::open(self.inodes.open(self, self.current_dir()))
    }

    /// 建一个 initial_size 字节的普通文件, 内容全零
    pub fn create(&self, path_str: &str, initial_size: usize) -> Result<(), FsError> {
        self.create_node(path_str, initial_size, false)
    }

    /// 建一个目录, `.` 和 `..` 一并填好
    pub fn mkdir(&self, path_str: &str) -> Result<(), FsError> {
        self.create_node(path_str, 0, true)
    }

    fn create_node(&self, path_str: &str, size: usize, is_dir: bool) -> Result<(), FsError> {
        let (parent, name) = path::resolve(self, path_str)?;
        if name.is_empty() {
            // 根目录永远存在
            parent.close(self);
            return Err(FsError::AlreadyExists);
        }
        let sector = match self.free_map.allocate(&self.cache) {
            Some(sector) => sector,
            None => {
                parent.close(self);
                return Err(FsError::NoSpace);
            }
        };
        let result = self.link_new_node(&parent, &name, sector, size, is_dir);
        if result.is_err() {
            self.free_map.release(&self.cache, sector);
            debug!("create {:?} failed: {:?}", path_str, result);
        }
        parent.close(self);
        result
    }

    fn link_new_node(
        &self,
        parent: &Dir,
        name: &str,
        sector: u32,
        size: usize,
        is_dir: bool,
    ) -> Result<(), FsError> {
        if is_dir {
            Dir::create(self, sector, 2)?;
            parent.add(self, name, sector)?;
            let new_dir = Dir::open(self.inodes.open(self, sector));
            let wired = new_dir
                .add(self, ".", sector)
                .and_then(|_| new_dir.add(self, "..", parent.inode().sector()));
            new_dir.close(self);
            wired
        } else {
            Inode::create(self, sector, size, false)?;
            parent.add(self, name, sector)
        }
    }

    /// 打开一个文件或目录. 路径 "/" 得到根目录的句柄.
    pub fn open(&self, path_str: &str) -> Result<File, FsError> {
        let (dir, name) = path::resolve(self, path_str)?;
        if name.is_empty() {
            return Ok(File::new(dir.into_inode()));
        }
        let inode = dir.lookup(self, &name);
        dir.close(self);
        match inode {
            Some(inode) => Ok(File::new(inode)),
            None => Err(FsError::NotFound),
        }
    }

    /// 打开一个目录用于遍历
    pub fn open_dir(&self, path_str: &str) -> Result<Dir, FsError> {
        path::resolve_dir(self, path_str)
    }

    /// 删除一个文件或空目录. 根目录和当前目录拒绝删除;
    /// 目录还要求除删除者手里这份之外没有别的打开者.
    /// 扇区的实际回收发生在最后一个句柄关闭时.
    pub fn remove(&self, path_str: &str) -> Result<(), FsError> {
        let (parent, name) = path::resolve(self, path_str)?;
        if name.is_empty() {
            parent.close(self);
            return Err(FsError::Busy);
        }
        let child = match parent.lookup(self, &name) {
            Some(child) => child,
            None => {
                parent.close(self);
                return Err(FsError::NotFound);
            }
        };
        let result = self.check_and_unlink(&parent, &name, &child);
        if let Err(err) = result {
            debug!("remove {:?} refused: {}", path_str, err);
        }
        self.inodes.close(self, child);
        parent.close(self);
        result
    }

    fn check_and_unlink(
        &self,
        parent: &Dir,
        name: &str,
        child: &Arc<Inode>,
    ) -> Result<(), FsError> {
        if child.sector() == ROOT_DIR_SECTOR || child.sector() == self.current_dir() {
            return Err(FsError::Busy);
        }
        if child.is_dir() {
            if !dir::is_empty(self, child) {
                return Err(FsError::NotEmpty);
            }
            // 删除者自己的 lookup 占了一份计数, 更多就是别的打开者
            if child.open_count() > 1 {
                return Err(FsError::Busy);
            }
        }
        parent.remove_entry(self, name)?;
        child.mark_removed();
        Ok(())
    }

    /// 把当前目录切换到 path_str 指向的目录
    pub fn chdir(&self, path_str: &str) -> Result<(), FsError> {
        let dir = path::resolve_dir(self, path_str)?;
        *self.cwd.lock() = dir.inode().sector();
        dir.close(self);
        Ok(())
    }

    /// 关闭一个文件句柄, 配平它挂着的拒写计数
    pub fn close(&self, file: File) {
        let (inode, denied_write) = file.into_parts();
        if denied_write {
            inode.allow_write();
        }
        self.inodes.close(self, inode);
    }

    /// 把所有脏数据写回设备. 干净关机前的最后一步.
    pub fn shutdown(&self) {
        self.cache.flush_all();
        info!("all dirty sectors flushed");
    }

    pub fn free_sectors(&self) -> usize {
        self.free_map.free_count()
    }

    pub fn cache_tries(&self) -> u64 {
        self.cache.tries()
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache.hits()
    }

    pub fn device_reads(&self) -> u64 {
        self.cache.device_reads()
    }

    pub fn device_writes(&self) -> u64 {
        self.cache.device_writes()
    }

    /// 诊断用: 写回并清空缓存, 统计值归零. 只应在静息状态下调用.
    pub fn cache_reset(&self) {
        self.cache.reset();
    }
}
