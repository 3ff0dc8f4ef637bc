//! 用一个 Linux 文件模拟块设备
//!
//! 镜像文件按 扇区号 * 512 换算出字节偏移, 每次传输前先定位再整扇区
//! 读写. 设备层之下没有可降级的余地, I/O 错误带着扇区号直接终止.

use std::{
    fs::File,
    io::{self, Read, Seek, SeekFrom, Write},
    sync::Mutex,
};

use crate::fs::{BlockDevice, SECTOR_SIZE};

pub struct BlockFile(pub Mutex<File>);

impl BlockFile {
    /// 定位到 sector 的起始字节并执行一次传输
    fn with_sector<T>(&self, sector: u32, op: impl FnOnce(&mut File) -> io::Result<T>) -> T {
        let mut file = self.0.lock().unwrap();
        file.seek(SeekFrom::Start(sector as u64 * SECTOR_SIZE as u64))
            .and_then(|_| op(&mut file))
            .unwrap_or_else(|err| panic!("image I/O failed at sector {}: {}", sector, err))
    }
}

impl BlockDevice for BlockFile {
    fn read_sector(&self, sector: u32, buf: &mut [u8]) {
        self.with_sector(sector, |file| file.read_exact(buf));
    }

    fn write_sector(&self, sector: u32, buf: &[u8]) {
        self.with_sector(sector, |file| file.write_all(buf));
    }
}
