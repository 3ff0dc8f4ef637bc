use std::{
    fs::{read_dir, File, OpenOptions},
    io::{stdin, stdout, Read, Write},
    sync::{Arc, Mutex},
};

use chrono::prelude::*;
use clap::{App, Arg};
use device::BlockFile;
use fs::{FileSystem, SECTOR_SIZE};

mod device;
mod fs;
#[cfg(test)]
mod test;

fn main() {
    env_logger::init();
    shell().expect("🦀 Error when running the shell");
}

fn shell() -> std::io::Result<()> {
    let matches = App::new("sector-fs shell")
        .arg(
            Arg::with_name("image")
                .short("i")
                .long("image")
                .takes_value(true)
                .help("Disk image path (default target/fs.img)"),
        )
        .arg(
            Arg::with_name("sectors")
                .short("n")
                .long("sectors")
                .takes_value(true)
                .help("Total sectors of the image (default 4096, max 4096)"),
        )
        .arg(
            Arg::with_name("ways to run")
                .short("w")
                .long("ways")
                .takes_value(true)
                .help("Use \"create\" to format or \"open\" to mount"),
        )
        .get_matches();

    let image = matches.value_of("image").unwrap_or("target/fs.img");
    let sectors: u32 = matches
        .value_of("sectors")
        .unwrap_or("4096")
        .parse()
        .expect("🦀 sectors must be a number");
    let ways = matches.value_of("ways to run").unwrap_or("create");

    // 打开镜像文件并撑到足够的大小来模拟一块磁盘
    let block_file = Arc::new(BlockFile(Mutex::new({
        let f = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(image)?;
        f.set_len(sectors as u64 * SECTOR_SIZE as u64).unwrap();
        f
    })));

    let fs = match ways {
        "create" => FileSystem::format(block_file, sectors),
        "open" => FileSystem::mount(block_file, sectors),
        _ => panic!("🦀 Please specify the operation(create or open)!"),
    }
    .expect("🦀 Error when bringing up the file system");

    let mut cwd = String::from("/");

    loop {
        print!("❂ sector-fs {}\n╰─❯ ", cwd);
        stdout().flush().expect("🦀 Failed to flush stdout :(");

        let mut input = String::new();
        stdin()
            .read_line(&mut input)
            .expect("🦀 Failed to read input :(");

        let mut input = input.trim().split_whitespace();
        let cmd = match input.next() {
            Some(cmd) => cmd,
            None => continue,
        };

        match cmd {
            "ls" => {
                let mut dir = match input.next() {
                    Some(path) => match fs.open_dir(path) {
                        Ok(dir) => dir,
                        Err(err) => {
                            println!("🦀 ls: {}: {}! 🦐", path, err);
                            continue;
                        }
                    },
                    None => fs.open_current_dir(),
                };
                while let Some(name) = dir.read_next(&fs) {
                    println!("{}", name);
                }
                dir.close(&fs);
            }

            "cd" => {
                let target = input.next().unwrap_or("/");
                match fs.chdir(target) {
                    Ok(()) => cwd = join_path(&cwd, target),
                    Err(err) => println!("🦀 cd: {}: {}! 🦐", target, err),
                }
            }

            "mkdir" => {
                let name = match input.next() {
                    Some(name) => name,
                    None => {
                        println!("🦀 mkdir: Miss directory name! 🦐");
                        continue;
                    }
                };
                if let Err(err) = fs.mkdir(name) {
                    println!("🦀 mkdir: {}: {}! 🦐", name, err);
                }
            }

            "touch" => {
                let name = match input.next() {
                    Some(name) => name,
                    None => {
                        println!("🦀 touch: Miss file name! 🦐");
                        continue;
                    }
                };
                let size: usize = input.next().unwrap_or("0").parse().unwrap_or(0);
                if let Err(err) = fs.create(name, size) {
                    println!("🦀 touch: {}: {}! 🦐", name, err);
                }
            }

            "rm" => {
                let mut removed_any = false;
                for name in input.by_ref() {
                    removed_any = true;
                    if let Err(err) = fs.remove(name) {
                        println!("🦀 rm: {}: {}! 🦐", name, err);
                    }
                }
                if !removed_any {
                    println!("🦀 rm: Please input file or folder name! 🦐");
                }
            }

            "cat" => {
                let name = match input.next() {
                    Some(name) => name,
                    None => {
                        println!("🦀 cat: Miss file name! 🦐");
                        continue;
                    }
                };
                match fs.open(name) {
                    Ok(file) => {
                        let mut buf = vec![0u8; file.length(&fs)];
                        file.read_at(&fs, &mut buf, 0);
                        println!("{}", String::from_utf8_lossy(&buf));
                        fs.close(file);
                    }
                    Err(err) => println!("🦀 cat: {}: {}! 🦐", name, err),
                }
            }

            // read file_name (offset) (length)
            "read" => {
                let name = match input.next() {
                    Some(name) => name,
                    None => {
                        println!("🦀 read: Miss file name! 🦐");
                        continue;
                    }
                };
                let file = match fs.open(name) {
                    Ok(file) => file,
                    Err(err) => {
                        println!("🦀 read: {}: {}! 🦐", name, err);
                        continue;
                    }
                };
                let size = file.length(&fs);
                let offset: usize = input.next().unwrap_or("0").parse().unwrap_or(0);
                if offset > size {
                    println!("🦀 read: Offset is too large! 🦐");
                    fs.close(file);
                    continue;
                }
                let len: usize = input
                    .next()
                    .and_then(|arg| arg.parse().ok())
                    .unwrap_or(size - offset);
                let mut buf = vec![0u8; len.min(size - offset)];
                file.read_at(&fs, &mut buf, offset);
                println!("{}", String::from_utf8_lossy(&buf));
                fs.close(file);
            }

            // write file_name (offset or "-a"), 逐行输入直到单独的 EOF
            "write" => {
                let name = match input.next() {
                    Some(name) => name,
                    None => {
                        println!("🦀 write: Miss file name! 🦐");
                        continue;
                    }
                };
                let file = match fs.open(name) {
                    Ok(file) => file,
                    Err(err) => {
                        println!("🦀 write: {}: {}! 🦐", name, err);
                        continue;
                    }
                };
                let mut offset = match input.next() {
                    Some("-a") => file.length(&fs),
                    Some(arg) => arg.parse().unwrap_or(0),
                    None => 0,
                };
                println!("🐳 write: Please input content, end with a line EOF. 🐬");
                loop {
                    let mut content = String::new();
                    stdin().read_line(&mut content).unwrap();
                    if content.trim_end() == "EOF" {
                        break;
                    }
                    offset += file.write_at(&fs, content.as_bytes(), offset);
                }
                fs.close(file);
            }

            "stat" => {
                let name = match input.next() {
                    Some(name) => name,
                    None => {
                        println!("🦀 stat: Miss file name! 🦐");
                        continue;
                    }
                };
                match fs.open(name) {
                    Ok(file) => {
                        println!("🐳 size: {} B.", file.length(&fs));
                        println!("🐳 inode sector: {}.", file.inumber());
                        println!("🐳 directory: {}.", file.is_dir());
                        fs.close(file);
                    }
                    Err(err) => println!("🦀 stat: {}: {}! 🦐", name, err),
                }
            }

            // 缓存与磁盘的统计
            "stats" => {
                println!("🐳 cache tries: {}.", fs.cache_tries());
                println!("🐳 cache hits: {}.", fs.cache_hits());
                println!("🐳 device reads: {}.", fs.device_reads());
                println!("🐳 device writes: {}.", fs.device_writes());
                println!("🐳 free sectors: {}.", fs.free_sectors());
            }

            // 把当前目录下的文件取出保存到 host 文件系统
            "get" => {
                let target_dir = input.next().unwrap_or("target/");
                let mut dir = fs.open_current_dir();
                while let Some(name) = dir.read_next(&fs) {
                    let file = match fs.open(&name) {
                        Ok(file) => file,
                        Err(_) => continue,
                    };
                    if file.is_dir() {
                        fs.close(file);
                        continue;
                    }
                    println!("🐬 Get {} from sector-fs.", name);
                    let mut data = vec![0u8; file.length(&fs)];
                    file.read_at(&fs, &mut data, 0);
                    fs.close(file);
                    let stamp = Local::now().format("%Y-%m-%d %H:%M:%S");
                    let mut target =
                        File::create(format!("{}{} {}", target_dir, stamp, name)).unwrap();
                    target.write_all(&data).unwrap();
                }
                dir.close(&fs);
            }

            // 把 host 目录下的文件灌进当前目录
            "set" => {
                let src_dir = match input.next() {
                    Some(dir) => dir,
                    None => {
                        println!("🦀 set: Miss source dir! 🦐");
                        continue;
                    }
                };
                for entry in read_dir(src_dir)? {
                    let name = entry?.file_name().into_string().unwrap();
                    println!("🐳 Set {}{} to sector-fs.", src_dir, name);
                    let mut host_file = File::open(format!("{}{}", src_dir, name))?;
                    let mut data = Vec::new();
                    host_file.read_to_end(&mut data)?;
                    if let Err(err) = fs.create(&name, 0) {
                        println!("🦀 set: {}: {}! 🦐", name, err);
                        continue;
                    }
                    let file = fs.open(&name).unwrap();
                    file.write_at(&fs, &data, 0);
                    fs.close(file);
                }
            }

            "exit" => break,

            "help" => {
                println!("🐳 ls [path]: list a directory (default the current one).");
                println!("🐳 cd [path]: change the current directory.");
                println!("🐳 mkdir path: create a directory.");
                println!("🐳 touch path [size]: create a file of size bytes (default 0).");
                println!("🐳 rm path...: remove files or empty directories.");
                println!("🐳 cat path: print file content.");
                println!("🐳 read path [offset] [length]: print part of a file.");
                println!("🐳 write path [offset|-a]: write lines until EOF.");
                println!("🐳 stat path: show size, inode sector and kind.");
                println!("🐳 stats: show cache and disk statistics.");
                println!("🐳 get [dir]: copy files of the current directory out to host.");
                println!("🐳 set dir: copy host files into the current directory.");
                println!("🐳 exit: flush everything and leave.");
            }

            _ => println!("🦀 Unknown command: {}! 🦐", cmd),
        }
    }

    fs.shutdown();
    Ok(())
}

/// 维护提示符里显示的路径, 只做展示用
fn join_path(cwd: &str, target: &str) -> String {
    let mut parts: Vec<&str> = if target.starts_with('/') {
        Vec::new()
    } else {
        cwd.split('/').filter(|part| !part.is_empty()).collect()
    };
    for part in target.split('/').filter(|part| !part.is_empty()) {
        match part {
            "." => {}
            ".." => {
                parts.pop();
            }
            _ => parts.push(part),
        }
    }
    format!("/{}", parts.join("/"))
}
