//! 完成上报
//!
//! 把分派结果转换成块层状态与字节数，部分或全部完成请求。

use super::types::{BlockStatus, Request};

/// 分派结果状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    /// 全部段处理成功
    Ok,
    /// 越界或后端 I/O 失败
    IoError,
    /// 设备尚未发布（与数据错误区分，便于诊断启动竞争）
    NotReady,
}

/// 分派结果
///
/// 每个请求在所有段处理完毕或中止后产生一次。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionOutcome {
    /// 已完整处理的段的字节数之和
    pub bytes_transferred: u32,
    /// 结果状态
    pub status: OutcomeStatus,
}

impl CompletionOutcome {
    /// 成功
    pub const fn ok(bytes_transferred: u32) -> Self {
        Self {
            bytes_transferred,
            status: OutcomeStatus::Ok,
        }
    }

    /// I/O 错误，`bytes_transferred` 为出错段之前已完成的字节数
    pub const fn io_error(bytes_transferred: u32) -> Self {
        Self {
            bytes_transferred,
            status: OutcomeStatus::IoError,
        }
    }

    /// 设备不可服务
    pub const fn not_ready() -> Self {
        Self {
            bytes_transferred: 0,
            status: OutcomeStatus::NotReady,
        }
    }

    /// 是否成功
    pub fn is_ok(&self) -> bool {
        self.status == OutcomeStatus::Ok
    }
}

impl From<OutcomeStatus> for BlockStatus {
    fn from(status: OutcomeStatus) -> Self {
        match status {
            OutcomeStatus::Ok => BlockStatus::Ok,
            OutcomeStatus::IoError => BlockStatus::IoErr,
            OutcomeStatus::NotReady => BlockStatus::DevResource,
        }
    }
}

/// 完成请求
///
/// 先按 `bytes_transferred` 部分完成（失败时也上报，框架据此判断哪些数据可信），
/// 再以最终状态结束请求。
pub fn complete(req: &mut Request, outcome: CompletionOutcome) -> BlockStatus {
    let status = BlockStatus::from(outcome.status);
    let remaining = req.update(status, outcome.bytes_transferred);
    req.end(status);

    if status.is_ok() {
        log::trace!(
            "[DISPATCH] sector={} completed, {} bytes",
            req.start_sector(),
            outcome.bytes_transferred
        );
    } else {
        log::debug!(
            "[DISPATCH] sector={} ended with {:?}, {} bytes done, remaining={}",
            req.start_sector(),
            status,
            outcome.bytes_transferred,
            remaining
        );
    }

    status
}

/// 拒绝透传请求
///
/// 透传请求不进入分派器，立即以 I/O 错误结束。
pub fn reject_passthrough(req: &mut Request) -> BlockStatus {
    log::info!("[DISPATCH] skip non-fs request");
    req.end(BlockStatus::IoErr);
    BlockStatus::IoErr
}
