#![allow(unused)]

use std::fs::OpenOptions;
use std::sync::{Arc, Mutex};
use std::thread;

use rand::Rng;

use crate::device::BlockFile;
use crate::fs::{BlockDevice, BufferCache, FileSystem, FsError, SECTOR_SIZE};

/// 每个测试用自己的镜像文件, 互不打扰
fn fresh_device(name: &str, sectors: u32) -> Arc<BlockFile> {
    let f = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(format!("target/{}.img", name))
        .unwrap();
    f.set_len(sectors as u64 * SECTOR_SIZE as u64).unwrap();
    Arc::new(BlockFile(Mutex::new(f)))
}

fn fresh_fs(name: &str, sectors: u32) -> (Arc<FileSystem>, Arc<BlockFile>) {
    let device = fresh_device(name, sectors);
    let fs = FileSystem::format(device.clone(), sectors).unwrap();
    (fs, device)
}

fn random_bytes(len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    rand::thread_rng().fill(&mut buf[..]);
    buf
}

#[test]
fn cache_write_then_read() {
    let device = fresh_device("cache_rw", 64);
    let cache = BufferCache::new(device);

    let pattern = random_bytes(100);
    assert_eq!(cache.write(5, &pattern, 7), 100);
    let mut back = [0u8; 100];
    assert_eq!(cache.read(5, &mut back, 7), 100);
    assert_eq!(&back[..], &pattern[..]);

    // 写读都在扇区末尾截断
    assert_eq!(cache.write(5, &pattern, 500), 12);
    assert_eq!(cache.read(5, &mut back, 500), 12);
    // 偏移越过扇区末尾的访问温和地失败
    assert_eq!(cache.write(5, &pattern, 513), 0);
    assert_eq!(cache.read(5, &mut back, 513), 0);
}

#[test]
fn cache_flush_makes_data_durable() {
    let device = fresh_device("cache_flush", 64);
    let cache = BufferCache::new(device.clone());

    let pattern = random_bytes(100);
    cache.write(10, &pattern, 100);
    cache.flush_all();

    // 不经过缓存直接读设备
    let mut sector = [0u8; SECTOR_SIZE];
    device.read_sector(10, &mut sector);
    assert_eq!(&sector[100..200], &pattern[..]);

    // flush 之后不再有脏槽位, 再 flush 一次不会产生新的设备写
    let writes = cache.device_writes();
    cache.flush_all();
    assert_eq!(cache.device_writes(), writes);
}

#[test]
fn filesize_roundtrip() {
    let (fs, _device) = fresh_fs("filesize", 4096);
    let n = 2000;

    fs.create("/alpha", n).unwrap();
    let mut file = fs.open("/alpha").unwrap();
    let data = random_bytes(n);
    assert_eq!(file.write(&fs, &data), n);
    assert_eq!(file.tell(), n);
    assert_eq!(file.length(&fs), n);

    file.seek(0);
    let mut back = vec![0u8; n];
    assert_eq!(file.read(&fs, &mut back), n);
    assert_eq!(back, data);
    fs.close(file);
}

/// 预先按大小建好的文件, 整个写入阶段不应该产生任何额外的设备读:
/// 扩容时数据扇区已经过缓存清零, 写入又都是整扇区覆盖.
#[test]
fn write_full_without_extra_reads() {
    let (fs, _device) = fresh_fs("write_full", 4096);
    let n = 66_560; // 130 个扇区, 直接索引装不下, 要动用一级间接索引

    fs.create("/data", n).unwrap();
    let mut file = fs.open("/data").unwrap();
    let data = random_bytes(n);

    let before = fs.device_reads();
    assert_eq!(file.write(&fs, &data), n);
    assert_eq!(fs.device_reads(), before);
    fs.close(file);
}

/// 同一份数据读第二遍, 命中数的增量要超过第一遍的总命中数
#[test]
fn hit_rate_improves_on_repeat() {
    let (fs, _device) = fresh_fs("hit_rate", 4096);
    let n = 1024;

    fs.create("/data", n).unwrap();
    let mut file = fs.open("/data").unwrap();
    let data = random_bytes(n);
    assert_eq!(file.write(&fs, &data), n);
    fs.close(file);

    fs.cache_reset();

    let mut buf = vec![0u8; n];
    let mut file = fs.open("/data").unwrap();
    assert_eq!(file.read(&fs, &mut buf), n);
    fs.close(file);
    let first_pass = fs.cache_hits();

    let mut file = fs.open("/data").unwrap();
    assert_eq!(file.read(&fs, &mut buf), n);
    fs.close(file);
    let second_pass = fs.cache_hits();

    assert!(second_pass - first_pass > first_pass);
}

/// 500 KiB 会一路用到直接, 一级间接和二级间接索引
#[test]
fn large_file_through_double_indirection() {
    let (fs, _device) = fresh_fs("large_file", 4096);
    let n = 500 * 1024;

    fs.create("/big", 0).unwrap();
    let mut file = fs.open("/big").unwrap();
    let data = random_bytes(n);
    assert_eq!(file.write(&fs, &data), n);
    assert_eq!(file.length(&fs), n);

    let mut back = vec![0u8; n];
    assert_eq!(file.read_at(&fs, &mut back, 0), n);
    assert_eq!(back, data);
    fs.close(file);
}

/// 空闲扇区不够时扩容整体回滚: 写入 0 字节, 长度不变, 位图分毫不差
#[test]
fn extension_rolls_back_when_map_exhausted() {
    let (fs, _device) = fresh_fs("rollback", 64);

    fs.create("/a", 0).unwrap();
    let mut file = fs.open("/a").unwrap();
    let free_before = fs.free_sectors();

    // 80 个扇区的需求, 盘上远没有这么多
    let data = random_bytes(80 * SECTOR_SIZE);
    assert_eq!(file.write(&fs, &data), 0);
    assert_eq!(file.length(&fs), 0);
    assert_eq!(fs.free_sectors(), free_before);

    // 盘装得下的写入不受影响
    assert_eq!(file.write_at(&fs, &data[..1024], 0), 1024);
    fs.close(file);
}

#[test]
fn dot_and_dotdot_navigation() {
    let (fs, _device) = fresh_fs("dots", 4096);

    fs.mkdir("/a").unwrap();
    fs.mkdir("/a/b").unwrap();
    fs.chdir("/a/b").unwrap();

    let parent = fs.open("..").unwrap();
    let a = fs.open("/a").unwrap();
    assert_eq!(parent.inumber(), a.inumber());

    let here = fs.open(".").unwrap();
    let b = fs.open("/a/b").unwrap();
    assert_eq!(here.inumber(), b.inumber());

    for file in [parent, a, here, b] {
        fs.close(file);
    }
}

#[test]
fn readdir_skips_dot_entries() {
    let (fs, _device) = fresh_fs("readdir", 4096);

    fs.mkdir("/a").unwrap();
    fs.create("/a/x", 0).unwrap();
    fs.create("/a/y", 0).unwrap();

    let mut dir = fs.open_dir("/a").unwrap();
    let mut names = Vec::new();
    while let Some(name) = dir.read_next(&fs) {
        names.push(name);
    }
    dir.close(&fs);
    assert_eq!(names, ["x", "y"]);
}

#[test]
fn remove_refuses_nonempty_directory() {
    let (fs, _device) = fresh_fs("rm_nonempty", 4096);

    fs.mkdir("/a").unwrap();
    fs.create("/a/x", 0).unwrap();

    let dir = fs.open_dir("/a").unwrap();
    assert!(!dir.is_empty(&fs));
    dir.close(&fs);

    assert_eq!(fs.remove("/a"), Err(FsError::NotEmpty));
    // 里面的文件还好端端的
    let file = fs.open("/a/x").unwrap();
    fs.close(file);

    // 清空之后就可以删了
    fs.remove("/a/x").unwrap();
    fs.remove("/a").unwrap();
    assert_eq!(fs.open("/a").err(), Some(FsError::NotFound));
}

#[test]
fn remove_refuses_root_and_current_dir() {
    let (fs, _device) = fresh_fs("rm_root", 4096);

    fs.mkdir("/a").unwrap();
    fs.chdir("/a").unwrap();
    assert_eq!(fs.remove("/"), Err(FsError::Busy));
    assert_eq!(fs.remove("/a"), Err(FsError::Busy));

    fs.chdir("/").unwrap();
    fs.remove("/a").unwrap();
}

#[test]
fn removed_file_disappears_after_close() {
    let (fs, _device) = fresh_fs("rm_file", 4096);

    fs.create("/f", 1000).unwrap();
    let free_with_file = fs.free_sectors();
    fs.remove("/f").unwrap();
    assert_eq!(fs.open("/f").err(), Some(FsError::NotFound));
    // 最后一个句柄在 remove 内部就关掉了, 扇区应当已经回到位图
    assert!(fs.free_sectors() > free_with_file);
}

#[test]
fn name_and_path_limits() {
    let (fs, _device) = fresh_fs("names", 4096);

    // 名字最长 14 字节, 15 字节拒绝
    fs.create("/abcdefghijklmn", 0).unwrap();
    assert_eq!(fs.create("/abcdefghijklmno", 0), Err(FsError::InvalidName));

    // 重名拒绝, 原状不动
    fs.create("/dup", 100).unwrap();
    assert_eq!(fs.create("/dup", 0), Err(FsError::AlreadyExists));
    let file = fs.open("/dup").unwrap();
    assert_eq!(file.length(&fs), 100);
    fs.close(file);

    // 中间分量缺失或者不是目录
    assert_eq!(fs.create("/nope/x", 0), Err(FsError::NotFound));
    assert_eq!(fs.create("/dup/x", 0), Err(FsError::NotADirectory));
}

#[test]
fn created_file_reads_back_zeros() {
    let (fs, _device) = fresh_fs("zeros", 4096);
    let n = 3000;

    fs.create("/z", n).unwrap();
    let file = fs.open("/z").unwrap();
    assert_eq!(file.length(&fs), n);
    let mut buf = vec![0xffu8; n];
    assert_eq!(file.read_at(&fs, &mut buf, 0), n);
    assert!(buf.iter().all(|&b| b == 0));
    fs.close(file);
}

#[test]
fn write_past_eof_zero_fills_the_gap() {
    let (fs, _device) = fresh_fs("gap", 4096);

    fs.create("/w", 0).unwrap();
    let file = fs.open("/w").unwrap();
    assert_eq!(file.write_at(&fs, b"hi", 1000), 2);
    assert_eq!(file.length(&fs), 1002);

    let mut buf = vec![0xffu8; 1002];
    assert_eq!(file.read_at(&fs, &mut buf, 0), 1002);
    assert!(buf[..1000].iter().all(|&b| b == 0));
    assert_eq!(&buf[1000..], b"hi");

    // 超出索引结构上限的写一个字节也写不进去
    use crate::fs::MAX_FILE_SIZE;
    assert_eq!(file.write_at(&fs, b"x", MAX_FILE_SIZE), 0);
    assert_eq!(file.length(&fs), 1002);

    // 空缓冲区的写不拷贝任何字节, 但越过末尾时同样把文件撑大
    assert_eq!(file.write_at(&fs, &[], 2000), 0);
    assert_eq!(file.length(&fs), 2000);
    let mut tail = vec![0xffu8; 998];
    assert_eq!(file.read_at(&fs, &mut tail, 1002), 998);
    assert!(tail.iter().all(|&b| b == 0));
    fs.close(file);
}

/// 越过文件末尾的读整体返回 0, 不给短计数
#[test]
fn read_across_eof_returns_zero() {
    let (fs, _device) = fresh_fs("eof", 4096);

    fs.create("/e", 100).unwrap();
    let mut file = fs.open("/e").unwrap();
    let mut buf = [0u8; 64];
    assert_eq!(file.read_at(&fs, &mut buf, 100), 0);
    assert_eq!(file.read_at(&fs, &mut buf, 50), 0);
    assert_eq!(file.read_at(&fs, &mut buf[..32], 50), 32);
    fs.close(file);
}

#[test]
fn deny_write_blocks_other_handles() {
    let (fs, _device) = fresh_fs("deny", 4096);

    fs.create("/d", 100).unwrap();
    let mut pinned = fs.open("/d").unwrap();
    let mut writer = fs.open("/d").unwrap();

    pinned.deny_write();
    assert_eq!(writer.write_at(&fs, b"nope", 0), 0);

    // 关闭钉住的句柄后写恢复
    fs.close(pinned);
    assert_eq!(writer.write_at(&fs, b"sure", 0), 4);

    // 自己钉住自己也一样生效, 放开后恢复
    writer.deny_write();
    assert_eq!(writer.write_at(&fs, b"x", 0), 0);
    writer.allow_write();
    assert_eq!(writer.write_at(&fs, b"y", 0), 1);
    fs.close(writer);
}

#[test]
fn data_survives_shutdown_and_mount() {
    let sectors = 4096;
    let device = fresh_device("persist", sectors);
    let data = random_bytes(10_000);

    {
        let fs = FileSystem::format(device.clone(), sectors).unwrap();
        fs.mkdir("/home").unwrap();
        fs.create("/home/keep", 0).unwrap();
        let file = fs.open("/home/keep").unwrap();
        assert_eq!(file.write_at(&fs, &data, 0), data.len());
        fs.close(file);
        fs.shutdown();
    }

    let fs = FileSystem::mount(device, sectors).unwrap();
    let file = fs.open("/home/keep").unwrap();
    assert_eq!(file.length(&fs), data.len());
    let mut back = vec![0u8; data.len()];
    assert_eq!(file.read_at(&fs, &mut back, 0), data.len());
    assert_eq!(back, data);
    fs.close(file);

    // 挂载回来的位图接着用
    fs.create("/home/more", 5000).unwrap();
}

#[test]
fn mount_rejects_blank_device() {
    let device = fresh_device("blank", 64);
    assert!(FileSystem::mount(device, 64).is_err());
}

#[test]
fn concurrent_writers_do_not_interfere() {
    let (fs, _device) = fresh_fs("threads", 4096);

    fs.create("/one", 0).unwrap();
    fs.create("/two", 0).unwrap();

    let handles: Vec<_> = ["/one", "/two"]
        .into_iter()
        .map(|path| {
            let fs = Arc::clone(&fs);
            thread::spawn(move || {
                let mut file = fs.open(path).unwrap();
                let data = random_bytes(100 * 1024);
                assert_eq!(file.write(&fs, &data), data.len());
                let mut back = vec![0u8; data.len()];
                assert_eq!(file.read_at(&fs, &mut back, 0), data.len());
                assert_eq!(back, data);
                fs.close(file);
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}

/// 磁盘数据结构必须精确对上磁盘布局
#[test]
fn on_disk_layout_sizes() {
    use crate::fs::{DirEntry, DiskInode, DIRENT_SIZE};
    assert_eq!(std::mem::size_of::<DiskInode>(), SECTOR_SIZE);
    assert_eq!(std::mem::size_of::<DirEntry>(), DIRENT_SIZE);
}
