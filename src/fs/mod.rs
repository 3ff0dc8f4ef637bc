mod block_cache;
mod block_dev;
mod dir;
mod error;
mod file;
mod filesys;
mod free_map;
mod inode;
mod layout;
mod path;

/// 扇区大小固定为 512 字节
pub const SECTOR_SIZE: usize = 512;
/// 缓存槽位数量: 总预算 64 个扇区, 留出一个扇区的空间给缓存自身的元数据
pub const CACHE_SLOTS: usize = 63;
/// 磁盘 inode 的魔数, 用于合法性检查
pub const INODE_MAGIC: u32 = 0x494e_4f44;
/// 直接索引的数量
pub const DIRECT_COUNT: usize = 123;
/// 一个索引块中的索引项数量
pub const INDIRECT_COUNT: usize = SECTOR_SIZE / 4; // 128
/// 二级间接索引能够覆盖的数据块数量
pub const DOUBLY_COUNT: usize = INDIRECT_COUNT * INDIRECT_COUNT;
/// 直接索引覆盖的数据块编号上界
pub const DIRECT_BOUND: usize = DIRECT_COUNT;
/// 一级间接索引覆盖的数据块编号上界
pub const INDIRECT_BOUND: usize = DIRECT_COUNT + INDIRECT_COUNT;
/// 单个文件最多占用的数据块数
pub const MAX_SECTORS: usize = INDIRECT_BOUND + DOUBLY_COUNT;
/// 单个文件的最大字节数, 约 8 MiB
pub const MAX_FILE_SIZE: usize = MAX_SECTORS * SECTOR_SIZE;
/// 文件名的最大长度 (字节)
pub const NAME_LENGTH_LIMIT: usize = 14;
/// 目录项的大小
pub const DIRENT_SIZE: usize = 24;
/// 空闲扇区位图所在的扇区
pub const FREE_MAP_SECTOR: u32 = 0;
/// 根目录 inode 所在的扇区
pub const ROOT_DIR_SECTOR: u32 = 1;
/// 根目录在格式化时预留的目录项数量
pub const ROOT_DIR_ENTRIES: usize = 16;

pub use block_cache::BufferCache;
pub use block_dev::BlockDevice;
pub use dir::Dir;
pub use error::FsError;
pub use file::File;
pub use filesys::FileSystem;
pub use free_map::FreeMap;
pub use inode::Inode;
pub use layout::{DirEntry, DiskInode};
