//! 后端设备核心接口

use crate::error::Result;
use alloc::boxed::Box;

/// 扇区设备接口
///
/// 实现此 trait 以提供按扇区寻址的底层设备访问，
/// 由 [`SectorBacking`](super::SectorBacking) 包装后作为中继的后端。
///
/// # 示例
///
/// ```rust,ignore
/// use blk_relay::{BlockDevice, Result};
///
/// struct MyDisk {
///     // ...
/// }
///
/// impl BlockDevice for MyDisk {
///     fn sector_size(&self) -> u32 {
///         512
///     }
///
///     fn total_sectors(&self) -> u64 {
///         2048
///     }
///
///     fn read_blocks(&mut self, lba: u64, count: u32, buf: &mut [u8]) -> Result<usize> {
///         // 实现扇区读取
///         Ok(count as usize * self.sector_size() as usize)
///     }
///
///     fn write_blocks(&mut self, lba: u64, count: u32, buf: &[u8]) -> Result<usize> {
///         // 实现扇区写入
///         Ok(count as usize * self.sector_size() as usize)
///     }
/// }
/// ```
pub trait BlockDevice {
    /// 物理扇区大小（必须是 512 的整数倍）
    fn sector_size(&self) -> u32;

    /// 总扇区数（以 `sector_size` 为单位）
    fn total_sectors(&self) -> u64;

    /// 读取扇区
    ///
    /// # 参数
    ///
    /// * `lba` - 起始扇区号
    /// * `count` - 要读取的扇区数
    /// * `buf` - 目标缓冲区（大小至少为 count * sector_size）
    ///
    /// # 返回
    ///
    /// 成功返回实际读取的字节数
    fn read_blocks(&mut self, lba: u64, count: u32, buf: &mut [u8]) -> Result<usize>;

    /// 写入扇区
    ///
    /// # 参数
    ///
    /// * `lba` - 起始扇区号
    /// * `count` - 要写入的扇区数
    /// * `buf` - 源缓冲区（大小至少为 count * sector_size）
    ///
    /// # 返回
    ///
    /// 成功返回实际写入的字节数
    fn write_blocks(&mut self, lba: u64, count: u32, buf: &[u8]) -> Result<usize>;

    /// 刷新设备缓存
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    /// 打开设备
    ///
    /// 在绑定为后端前调用。默认实现什么都不做。
    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    /// 关闭设备
    ///
    /// 在解除绑定时调用。默认实现什么都不做。
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// 已绑定的后端设备
///
/// 中继设备在请求处理路径上对它发起同步读写。所有方法都以 `&self`
/// 调用，因为多个请求可能在不同线程上同时被分派。
///
/// 地址 `sector` 始终以 512 字节扇区为单位，与请求的扇区号一致。
pub trait BackingDevice: Send + Sync {
    /// 容量（512 字节扇区数）
    fn capacity_sectors(&self) -> u64;

    /// 同步读取，返回后数据已在 `buf` 中
    fn read_sectors(&self, sector: u64, buf: &mut [u8]) -> Result<usize>;

    /// 同步写入，返回后数据已提交给设备
    fn write_sectors(&self, sector: u64, buf: &[u8]) -> Result<usize>;

    /// 刷新设备
    fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// 释放设备引用
    ///
    /// 调用者保证此时已没有在途 I/O。
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<T: BackingDevice + ?Sized> BackingDevice for Box<T> {
    fn capacity_sectors(&self) -> u64 {
        (**self).capacity_sectors()
    }

    fn read_sectors(&self, sector: u64, buf: &mut [u8]) -> Result<usize> {
        (**self).read_sectors(sector, buf)
    }

    fn write_sectors(&self, sector: u64, buf: &[u8]) -> Result<usize> {
        (**self).write_sectors(sector, buf)
    }

    fn flush(&self) -> Result<()> {
        (**self).flush()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// 后端设备打开器
///
/// 按路径打开一个已存在的块设备并独占持有。
/// 打开失败（不存在、被占用、无权限）对设备创建是致命的，不会重试。
pub trait BackingOpener {
    /// 打开得到的设备类型
    type Device: BackingDevice + 'static;

    /// 按路径打开后端设备
    fn open(&self, path: &str) -> Result<Self::Device>;
}
