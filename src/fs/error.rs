//! 文件系统操作的错误类型
//!
//! 读写字节数走 0 返回值的约定, 其余操作都以 Result 显式报错.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// 路径中某个分量不存在
    NotFound,
    /// 目录里已经有同名的项
    AlreadyExists,
    /// 空闲位图分配不出扇区
    NoSpace,
    /// 文件超出索引结构能表达的大小
    TooBig,
    /// 路径中间的分量不是目录, 或要求目录的地方给了文件
    NotADirectory,
    /// 目录非空, 不能删除
    NotEmpty,
    /// 目标正被占用 (根目录, 当前目录, 或还有别的打开者)
    Busy,
    /// 名字为空, 超长, 或含有 '/'
    InvalidName,
    /// 设备上不是一个合法的文件系统
    Corrupted,
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            FsError::NotFound => "no such file or directory",
            FsError::AlreadyExists => "already exists",
            FsError::NoSpace => "no free sectors left",
            FsError::TooBig => "file too big",
            FsError::NotADirectory => "not a directory",
            FsError::NotEmpty => "directory not empty",
            FsError::Busy => "in use",
            FsError::InvalidName => "invalid name",
            FsError::Corrupted => "not a valid file system",
        };
        write!(f, "{}", msg)
    }
}

impl std::error::Error for FsError {}
