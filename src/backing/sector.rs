//! 块级传输后端
//!
//! 把一个按扇区寻址的 [`BlockDevice`] 包装成 [`BackingDevice`]。
//! 设备扇区可能大于 512 字节，不对齐的段通过读-改-写完成。

use super::{BackingDevice, BackingOpener, BlockDevice};
use crate::consts::SECTOR_SIZE;
use crate::error::{Error, ErrorKind, Result};
use alloc::vec;
use spin::Mutex;

/// 块级传输后端
///
/// 底层设备的 `&mut self` 接口由互斥锁串行化。
pub struct SectorBacking<D> {
    device: Mutex<D>,
    /// 设备扇区大小
    sector_size: u32,
    /// 容量（512 字节扇区数）
    capacity_sectors: u64,
}

impl<D: BlockDevice> SectorBacking<D> {
    /// 打开并包装底层设备
    pub fn new(mut device: D) -> Result<Self> {
        let sector_size = device.sector_size();

        // 设备扇区必须是 512 字节的整数倍
        if sector_size == 0 || sector_size % SECTOR_SIZE != 0 {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "Sector size must be a multiple of 512",
            ));
        }

        device.open()?;

        let capacity_sectors = device
            .total_sectors()
            .checked_mul((sector_size / SECTOR_SIZE) as u64)
            .ok_or(Error::new(ErrorKind::InvalidInput, "Device capacity overflows"))?;

        Ok(Self {
            device: Mutex::new(device),
            sector_size,
            capacity_sectors,
        })
    }

    /// 设备扇区大小
    pub fn sector_size(&self) -> u32 {
        self.sector_size
    }

    /// 获取底层设备的可变引用
    pub fn device_mut(&mut self) -> &mut D {
        self.device.get_mut()
    }

    /// 取回底层设备
    pub fn into_inner(self) -> D {
        self.device.into_inner()
    }

    /// 计算一次传输覆盖的设备扇区范围
    ///
    /// 返回 (起始设备扇区, 设备扇区数, 首扇区内偏移)
    fn span(&self, sector: u64, len: usize) -> Result<(u64, u32, usize)> {
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

        let ss = self.sector_size as u64;
        let start_lba = offset / ss;
        let head = (offset % ss) as usize;
        let count = (end - start_lba * ss + ss - 1) / ss;
        let count = u32::try_from(count)
            .map_err(|_| Error::new(ErrorKind::InvalidInput, "Transfer too large"))?;

        Ok((start_lba, count, head))
    }
}

impl<D: BlockDevice + Send> BackingDevice for SectorBacking<D> {
    fn capacity_sectors(&self) -> u64 {
        self.capacity_sectors
    }

    fn read_sectors(&self, sector: u64, buf: &mut [u8]) -> Result<usize> {
        let len = buf.len();
        let (lba, count, head) = self.span(sector, len)?;
        let mut device = self.device.lock();

        // 对齐的传输直接读入目标缓冲区
        if head == 0 && len % self.sector_size as usize == 0 {
            return device.read_blocks(lba, count, buf);
        }

        let mut temp = vec![0u8; count as usize * self.sector_size as usize];
        device.read_blocks(lba, count, &mut temp)?;
        buf.copy_from_slice(&temp[head..head + len]);

        Ok(len)
    }

    fn write_sectors(&self, sector: u64, buf: &[u8]) -> Result<usize> {
        let len = buf.len();
        let (lba, count, head) = self.span(sector, len)?;
        let mut device = self.device.lock();

        if head == 0 && len % self.sector_size as usize == 0 {
            return device.write_blocks(lba, count, buf);
        }

        // 不对齐：先读出现有扇区，修改后整体写回
        let mut temp = vec![0u8; count as usize * self.sector_size as usize];
        device.read_blocks(lba, count, &mut temp)?;
        temp[head..head + len].copy_from_slice(buf);
        device.write_blocks(lba, count, &temp)?;

        Ok(len)
    }

    fn flush(&self) -> Result<()> {
        self.device.lock().flush()
    }

    fn close(&mut self) -> Result<()> {
        let device = self.device.get_mut();
        // 刷写失败也要关闭设备，返回第一个错误
        let flushed = device.flush();
        let closed = device.close();
        flushed.and(closed)
    }
}

/// 块级传输后端的打开器
///
/// 通过解析函数把路径映射到具体的 [`BlockDevice`]。
pub struct SectorOpener<F> {
    resolve: F,
}

impl<F> SectorOpener<F> {
    /// 用路径解析函数创建打开器
    pub fn new(resolve: F) -> Self {
        Self { resolve }
    }
}

impl<F, D> BackingOpener for SectorOpener<F>
where
    F: Fn(&str) -> Result<D>,
    D: BlockDevice + Send + 'static,
{
    type Device = SectorBacking<D>;

    fn open(&self, path: &str) -> Result<SectorBacking<D>> {
        log::info!("[BACKING] opening {} for block-level transfer", path);
        let device = (self.resolve)(path).map_err(|e| {
            log::error!("[BACKING] failed to open {}: {}", path, e);
            e
        })?;
        SectorBacking::new(device)
    }
}
