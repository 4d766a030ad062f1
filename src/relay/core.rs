//! 中继设备共享状态
//!
//! [`RelayCore`] 是发布后被设备子系统持有的请求处理函数，
//! 集中了容量、镜像、后端设备、队列标签与就绪标志。

use crate::backing::BackingDevice;
use crate::config::ReadPolicy;
use crate::consts::SECTOR_SIZE;
use crate::disk::RequestHandler;
use crate::error::{Error, ErrorKind, Result};
use crate::mirror::{MirrorBuffer, RangeLock};
use crate::queue::TagSet;
use crate::request::{completion, BlockStatus, Request};
use alloc::string::String;
use alloc::vec;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

/// 请求统计计数
#[derive(Debug, Default)]
pub struct RelayStats {
    pub(crate) reads: AtomicU64,
    pub(crate) writes: AtomicU64,
    pub(crate) flushes: AtomicU64,
    pub(crate) bytes_read: AtomicU64,
    pub(crate) bytes_written: AtomicU64,
    pub(crate) io_errors: AtomicU64,
    pub(crate) not_ready: AtomicU64,
    pub(crate) queue_full: AtomicU64,
    pub(crate) passthrough: AtomicU64,
}

/// 统计快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// 完成的读请求数
    pub reads: u64,
    /// 完成的写请求数
    pub writes: u64,
    /// 刷新请求数
    pub flushes: u64,
    /// 读出的字节数
    pub bytes_read: u64,
    /// 写入的字节数
    pub bytes_written: u64,
    /// 以 I/O 错误结束的请求数
    pub io_errors: u64,
    /// 因设备未就绪被拒绝的请求数
    pub not_ready: u64,
    /// 因队列满被拒绝的请求数
    pub queue_full: u64,
    /// 被拒绝的透传请求数
    pub passthrough: u64,
}

impl RelayStats {
    pub(crate) fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    /// 读取快照
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            io_errors: self.io_errors.load(Ordering::Relaxed),
            not_ready: self.not_ready.load(Ordering::Relaxed),
            queue_full: self.queue_full.load(Ordering::Relaxed),
            passthrough: self.passthrough.load(Ordering::Relaxed),
        }
    }
}

/// 中继设备共享状态
///
/// 创建后容量与后端引用不再改变，请求处理只修改镜像内容。
/// 多个分派调用可以在不同线程上同时进行。
///
/// 最后一个引用被释放时关闭后端设备。
pub struct RelayCore<B: BackingDevice> {
    pub(crate) name: String,
    /// 容量（512 字节扇区数）
    pub(crate) capacity_sectors: u64,
    /// 镜像，长度恒等于 `capacity_sectors * SECTOR_SIZE`
    pub(crate) mirror: MirrorBuffer,
    pub(crate) backing: B,
    pub(crate) tags: TagSet,
    pub(crate) ranges: RangeLock,
    pub(crate) read_policy: ReadPolicy,
    /// 已发布到设备子系统
    pub(crate) ready: AtomicBool,
    /// 当前打开者数量
    pub(crate) openers: AtomicU32,
    pub(crate) stats: RelayStats,
}

impl<B: BackingDevice> RelayCore<B> {
    /// 组装共享状态
    ///
    /// 调用者按后端容量分配镜像；新建的设备处于未就绪状态。
    pub(crate) fn new(
        name: String,
        backing: B,
        mirror: MirrorBuffer,
        tags: TagSet,
        read_policy: ReadPolicy,
    ) -> Self {
        let capacity_sectors = backing.capacity_sectors();
        debug_assert_eq!(
            Some(mirror.len() as u64),
            capacity_sectors.checked_mul(SECTOR_SIZE as u64),
            "mirror size must match device capacity"
        );

        Self {
            name,
            capacity_sectors,
            mirror,
            backing,
            tags,
            ranges: RangeLock::new(),
            read_policy,
            ready: AtomicBool::new(false),
            openers: AtomicU32::new(0),
            stats: RelayStats::default(),
        }
    }

    /// 设备名
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 容量（512 字节扇区数）
    pub fn capacity_sectors(&self) -> u64 {
        self.capacity_sectors
    }

    /// 容量（字节）
    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_sectors * SECTOR_SIZE as u64
    }

    /// 读请求策略
    pub fn read_policy(&self) -> ReadPolicy {
        self.read_policy
    }

    /// 是否可以服务请求
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub(crate) fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }

    /// 镜像缓冲区
    pub fn mirror(&self) -> &MirrorBuffer {
        &self.mirror
    }

    /// 后端设备
    pub fn backing(&self) -> &B {
        &self.backing
    }

    /// 标签集
    pub fn tags(&self) -> &TagSet {
        &self.tags
    }

    /// 当前打开者数量
    pub fn openers(&self) -> u32 {
        self.openers.load(Ordering::Acquire)
    }

    /// 统计信息
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// 校验镜像与后端内容是否一致
    ///
    /// 对比 `[sector, sector + count)` 区间内镜像与后端数据的 CRC32。
    /// 期间持有该区间的范围锁，不会与重叠的请求交错。
    ///
    /// # 返回
    ///
    /// 一致返回 `true`
    pub fn verify(&self, sector: u64, count: u64) -> Result<bool> {
        let offset = sector
            .checked_mul(SECTOR_SIZE as u64)
            .ok_or(Error::new(ErrorKind::OutOfRange, "Sector offset overflows"))?;
        let len = count
            .checked_mul(SECTOR_SIZE as u64)
            .ok_or(Error::new(ErrorKind::OutOfRange, "Range length overflows"))?;
        let end = offset
            .checked_add(len)
            .filter(|&end| end <= self.capacity_bytes())
            .ok_or(Error::new(ErrorKind::OutOfRange, "Range exceeds device capacity"))?;

        let _range = self.ranges.lock(offset, end);

        let mut temp = vec![0u8; len as usize];
        self.backing.read_sectors(sector, &mut temp)?;

        let backing_crc = crc32fast::hash(&temp);
        let mirror_crc = self.mirror.checksum(offset as usize, len as usize);

        if backing_crc != mirror_crc {
            log::debug!(
                "[RELAY] {} verify mismatch at sector {} (+{}): mirror={:#010x} backing={:#010x}",
                self.name,
                sector,
                count,
                mirror_crc,
                backing_crc
            );
        }

        Ok(backing_crc == mirror_crc)
    }
}

impl<B: BackingDevice> RequestHandler for RelayCore<B> {
    fn queue_rq(&self, req: &mut Request) -> BlockStatus {
        let _tag = match self.tags.get() {
            Some(tag) => tag,
            None => {
                RelayStats::bump(&self.stats.queue_full, 1);
                return BlockStatus::Resource;
            }
        };

        req.start();

        if req.op().is_passthrough() {
            RelayStats::bump(&self.stats.passthrough, 1);
            return completion::reject_passthrough(req);
        }

        let outcome = self.serve(req);
        completion::complete(req, outcome)
    }

    fn open(&self) -> Result<()> {
        if !self.is_ready() {
            return Err(Error::new(ErrorKind::NotReady, "Device is not published"));
        }
        let openers = self.openers.fetch_add(1, Ordering::AcqRel) + 1;
        log::info!("[RELAY] {} opened, openers={}", self.name, openers);
        Ok(())
    }

    fn release(&self) {
        let prev = self
            .openers
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .unwrap_or(0);
        log::info!("[RELAY] {} released, openers={}", self.name, prev.saturating_sub(1));
    }
}

impl<B: BackingDevice> Drop for RelayCore<B> {
    fn drop(&mut self) {
        match self.backing.close() {
            Ok(()) => log::info!("[RELAY] {} backing device closed", self.name),
            Err(e) => log::warn!("[RELAY] {} failed to close backing device: {}", self.name, e),
        }
    }
}

impl<B: BackingDevice> core::fmt::Debug for RelayCore<B> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RelayCore")
            .field("name", &self.name)
            .field("capacity_sectors", &self.capacity_sectors)
            .field("mirror", &self.mirror)
            .field("tags", &self.tags)
            .field("read_policy", &self.read_policy)
            .field("ready", &self.ready.load(Ordering::Relaxed))
            .finish()
    }
}
