//! 镜像缓冲区

use crate::error::{Error, ErrorKind, Result};
use alloc::boxed::Box;
use alloc::vec::Vec;
use spin::Mutex;

/// 镜像缓冲区
///
/// 中继设备持有的一整块连续内存，按字节偏移寻址，作为直写镜像与读影子。
/// 大小在创建时确定，必须与设备容量一致（`capacity_sectors * SECTOR_SIZE`）。
///
/// `read` / `write` 不做范围校验以外的检查，越界属于调用者的错误：
/// 分派器在任何修改之前完成边界检查。内部互斥锁只保护单次拷贝，
/// 跨请求的顺序由 [`RangeLock`](super::RangeLock) 保证。
pub struct MirrorBuffer {
    data: Mutex<Box<[u8]>>,
    len: usize,
}

impl MirrorBuffer {
    /// 分配指定大小的镜像（全零）
    ///
    /// 分配失败返回 `NoSpace`，不会中止进程。
    pub fn allocate(len: u64) -> Result<Self> {
        let len = usize::try_from(len)
            .map_err(|_| Error::new(ErrorKind::NoSpace, "Mirror size exceeds address space"))?;

        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| Error::new(ErrorKind::NoSpace, "Failed to allocate mirror buffer"))?;
        data.resize(len, 0u8);

        log::debug!("[MIRROR] allocated {} bytes", len);

        Ok(Self {
            data: Mutex::new(data.into_boxed_slice()),
            len,
        })
    }

    /// 缓冲区长度（字节）
    pub fn len(&self) -> usize {
        self.len
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 从 `offset` 读取 `dst.len()` 字节
    ///
    /// 调用者保证 `offset + dst.len() <= len()`。
    pub fn read(&self, offset: usize, dst: &mut [u8]) {
        let data = self.data.lock();
        dst.copy_from_slice(&data[offset..offset + dst.len()]);
    }

    /// 把 `src` 写入 `offset`
    ///
    /// 调用者保证 `offset + src.len() <= len()`。
    pub fn write(&self, offset: usize, src: &[u8]) {
        let mut data = self.data.lock();
        data[offset..offset + src.len()].copy_from_slice(src);
    }

    /// 计算一段区域的 CRC32
    pub fn checksum(&self, offset: usize, len: usize) -> u32 {
        let data = self.data.lock();
        crc32fast::hash(&data[offset..offset + len])
    }
}

impl core::fmt::Debug for MirrorBuffer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MirrorBuffer").field("len", &self.len).finish()
    }
}
