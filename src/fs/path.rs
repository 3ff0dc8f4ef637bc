//! 路径解析
//!
//! 路径是用 '/' 分隔的字节序列, 以 '/' 开头的从根目录出发,
//! 其余的从调用者的当前目录出发. 空分量和结尾的 '/' 都可以容忍.
//! `.` 和 `..` 不做任何特殊解析, 它们就是目录里现成的两个目录项.

use super::{Dir, FileSystem, FsError, ROOT_DIR_SECTOR};

/// 逐分量走到最后一个分量的父目录, 返回打开的父目录和最后一个分量.
/// 路径恰好是 "/" 时返回根目录和空名字.
/// 中间的每个分量都必须是一个还活着的目录.
pub fn resolve(fs: &FileSystem, path: &str) -> Result<(Dir, String), FsError> {
    let absolute = path.starts_with('/');
    let parts: Vec<&str> = path.split('/').filter(|part| !part.is_empty()).collect();

    if parts.is_empty() {
        return if absolute {
            Ok((fs.open_root(), String::new()))
        } else {
            Err(FsError::NotFound)
        };
    }

    let start = if absolute {
        ROOT_DIR_SECTOR
    } else {
        fs.current_dir()
    };
    let mut dir = Dir::open(fs.inodes().open(fs, start));

    for part in &parts[..parts.len() - 1] {
        let next = match dir.lookup(fs, part) {
            Some(inode) => inode,
            None => {
                dir.close(fs);
                return Err(FsError::NotFound);
            }
        };
        if !next.is_dir() {
            fs.inodes().close(fs, next);
            dir.close(fs);
            return Err(FsError::NotADirectory);
        }
        if next.is_removed() {
            fs.inodes().close(fs, next);
            dir.close(fs);
            return Err(FsError::NotFound);
        }
        dir.close(fs);
        dir = Dir::open(next);
    }

    Ok((dir, parts[parts.len() - 1].to_string()))
}

/// 像 [`resolve`] 一样走, 但最后一个分量自己也必须是一个还活着的目录,
/// 返回打开的目标目录.
pub fn resolve_dir(fs: &FileSystem, path: &str) -> Result<Dir, FsError> {
    let (dir, name) = resolve(fs, path)?;
    if name.is_empty() {
        // 路径就是根目录
        return Ok(dir);
    }
    let inode = dir.lookup(fs, &name);
    dir.close(fs);
    match inode {
        Some(inode) if inode.is_dir() && !inode.is_removed() => Ok(Dir::open(inode)),
        Some(inode) => {
            let not_dir = !inode.is_dir();
            fs.inodes().close(fs, inode);
            Err(if not_dir {
                FsError::NotADirectory
            } else {
                FsError::NotFound
            })
        }
        None => Err(FsError::NotFound),
    }
}
