//! 文件方式后端
//!
//! 以读写方式打开设备节点（或普通镜像文件），按字节偏移定位读写。

use super::{BackingDevice, BackingOpener};
use crate::consts::SECTOR_SIZE;
use crate::error::{Error, ErrorKind, Result};
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom};
use std::os::unix::fs::FileExt;

/// 文件方式后端
pub struct FileBacking {
    file: File,
    /// 容量（512 字节扇区数）
    capacity_sectors: u64,
    /// 每次写入后同步落盘
    sync_writes: bool,
}

impl FileBacking {
    /// 以读写方式打开路径
    ///
    /// 容量取自设备（文件）长度，不足一个扇区的尾部被忽略。
    pub fn open(path: &str, sync_writes: bool) -> Result<Self> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;

        // 块设备节点的元数据长度为 0，定位到末尾才能得到真实大小
        let len = file.seek(SeekFrom::End(0))?;
        let capacity_sectors = len / SECTOR_SIZE as u64;

        log::info!(
            "[BACKING] {} opened, {} bytes, {} sectors",
            path,
            len,
            capacity_sectors
        );

        Ok(Self {
            file,
            capacity_sectors,
            sync_writes,
        })
    }

    fn check_range(&self, sector: u64, len: usize) -> Result<u64> {
        let offset = sector
            .checked_mul(SECTOR_SIZE as u64)
            .ok_or(Error::new(ErrorKind::OutOfRange, "Sector offset overflows"))?;
        let end = offset
            .checked_add(len as u64)
            .ok_or(Error::new(ErrorKind::OutOfRange, "Transfer end overflows"))?;

        if end > self.capacity_sectors * SECTOR_SIZE as u64 {
            return Err(Error::new(
                ErrorKind::OutOfRange,
                "Transfer past end of backing device",
            ));
        }

        Ok(offset)
    }
}

impl BackingDevice for FileBacking {
    fn capacity_sectors(&self) -> u64 {
        self.capacity_sectors
    }

    fn read_sectors(&self, sector: u64, buf: &mut [u8]) -> Result<usize> {
        let offset = self.check_range(sector, buf.len())?;
        self.file.read_exact_at(buf, offset)?;
        Ok(buf.len())
    }

    fn write_sectors(&self, sector: u64, buf: &[u8]) -> Result<usize> {
        let offset = self.check_range(sector, buf.len())?;
        self.file.write_all_at(buf, offset)?;
        if self.sync_writes {
            self.file.sync_data()?;
        }
        Ok(buf.len())
    }

    fn flush(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

/// 文件方式后端的打开器
#[derive(Debug, Clone, Copy, Default)]
pub struct FileOpener {
    sync_writes: bool,
}

impl FileOpener {
    /// 创建打开器
    pub fn new(sync_writes: bool) -> Self {
        Self { sync_writes }
    }
}

impl BackingOpener for FileOpener {
    type Device = FileBacking;

    fn open(&self, path: &str) -> Result<FileBacking> {
        FileBacking::open(path, self.sync_writes).map_err(|e| {
            log::error!("[BACKING] failed to open {}: {}", path, e);
            e
        })
    }
}
