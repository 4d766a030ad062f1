//! 请求与段的数据结构

use crate::consts::SECTOR_SIZE;
use alloc::vec;
use alloc::vec::Vec;

/// 请求操作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReqOp {
    /// 读
    Read,
    /// 写
    Write,
    /// 刷新后端缓存
    Flush,
    /// 透传/管理类请求（不是普通读写）
    Passthrough,
}

impl ReqOp {
    /// 是否为透传请求
    pub fn is_passthrough(self) -> bool {
        self == ReqOp::Passthrough
    }

    /// 是否携带数据段
    pub fn has_data(self) -> bool {
        matches!(self, ReqOp::Read | ReqOp::Write)
    }
}

/// 块层完成状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
    /// 成功
    Ok,
    /// I/O 错误
    IoErr,
    /// 队列资源暂时耗尽，稍后重试
    Resource,
    /// 设备暂时不可服务，稍后重试
    DevResource,
}

impl BlockStatus {
    /// 是否成功
    pub fn is_ok(self) -> bool {
        self == BlockStatus::Ok
    }

    /// 框架是否应当稍后重新提交
    pub fn is_retryable(self) -> bool {
        matches!(self, BlockStatus::Resource | BlockStatus::DevResource)
    }
}

/// 请求状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// 尚未开始
    Idle,
    /// 已开始处理
    Started,
    /// 已完成
    Completed,
}

/// 请求段
///
/// 请求中一段连续的内存区域。写请求从中取数据，读请求把数据放入其中。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    data: Vec<u8>,
}

impl Segment {
    /// 以现有数据创建段
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// 创建指定长度的全零段（用于读）
    pub fn zeroed(len: usize) -> Self {
        Self { data: vec![0u8; len] }
    }

    /// 段长度（字节）
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// 是否为空段
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// 段数据
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// 段数据（可变）
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// 取回段数据
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

/// 块 I/O 请求
///
/// 由按顺序排列的段组成，所有段方向一致。段从 `start_sector` 开始
/// 首尾相接：第一段位于 `start_sector * SECTOR_SIZE` 字节处，
/// 之后每段紧跟前一段。
///
/// # 示例
///
/// ```rust,ignore
/// let mut req = Request::write(0, vec![Segment::new(vec![0xAA; 4096])]);
/// let status = disk.submit(&mut req);
/// assert!(status.is_ok());
/// assert_eq!(req.completed_bytes(), 4096);
/// ```
#[derive(Debug)]
pub struct Request {
    op: ReqOp,
    start_sector: u64,
    segments: Vec<Segment>,
    state: RequestState,
    /// 已完成的字节数
    completed_bytes: u32,
    /// 最终状态（完成后有效）
    status: Option<BlockStatus>,
}

impl Request {
    /// 创建请求
    pub fn new(op: ReqOp, start_sector: u64, segments: Vec<Segment>) -> Self {
        Self {
            op,
            start_sector,
            segments,
            state: RequestState::Idle,
            completed_bytes: 0,
            status: None,
        }
    }

    /// 创建读请求，每个长度对应一个全零段
    pub fn read(start_sector: u64, segment_lens: &[usize]) -> Self {
        let segments = segment_lens.iter().map(|&len| Segment::zeroed(len)).collect();
        Self::new(ReqOp::Read, start_sector, segments)
    }

    /// 创建写请求
    pub fn write(start_sector: u64, segments: Vec<Segment>) -> Self {
        Self::new(ReqOp::Write, start_sector, segments)
    }

    /// 创建刷新请求
    pub fn flush() -> Self {
        Self::new(ReqOp::Flush, 0, Vec::new())
    }

    /// 创建透传请求
    pub fn passthrough() -> Self {
        Self::new(ReqOp::Passthrough, 0, Vec::new())
    }

    /// 操作类型
    pub fn op(&self) -> ReqOp {
        self.op
    }

    /// 起始扇区
    pub fn start_sector(&self) -> u64 {
        self.start_sector
    }

    /// 起始字节偏移，溢出时返回 None
    pub fn start_offset(&self) -> Option<u64> {
        self.start_sector.checked_mul(SECTOR_SIZE as u64)
    }

    /// 所有段
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// 所有段（可变）
    pub fn segments_mut(&mut self) -> &mut [Segment] {
        &mut self.segments
    }

    /// 取回所有段
    pub fn into_segments(self) -> Vec<Segment> {
        self.segments
    }

    /// 请求总字节数
    pub fn total_bytes(&self) -> u64 {
        self.segments.iter().map(|s| s.len() as u64).sum()
    }

    /// 尚未完成的字节数
    pub fn remaining_bytes(&self) -> u64 {
        self.total_bytes() - self.completed_bytes as u64
    }

    /// 请求状态
    pub fn state(&self) -> RequestState {
        self.state
    }

    /// 已完成的字节数
    pub fn completed_bytes(&self) -> u32 {
        self.completed_bytes
    }

    /// 最终状态
    pub fn status(&self) -> Option<BlockStatus> {
        self.status
    }

    /// 标记请求开始处理
    pub fn start(&mut self) {
        self.state = RequestState::Started;
    }

    /// 部分完成
    ///
    /// 以 `status` 完成 `bytes` 字节，返回是否仍有剩余字节。
    pub fn update(&mut self, status: BlockStatus, bytes: u32) -> bool {
        let remaining = self.remaining_bytes();
        let bytes = (bytes as u64).min(remaining) as u32;
        self.completed_bytes = self.completed_bytes.saturating_add(bytes);

        log::trace!(
            "[REQUEST] update sector={} bytes={} status={:?}",
            self.start_sector,
            bytes,
            status
        );

        self.remaining_bytes() > 0
    }

    /// 结束请求
    pub fn end(&mut self, status: BlockStatus) {
        self.status = Some(status);
        self.state = RequestState::Completed;
    }
}
