//! 字节范围锁
//!
//! 同一设备上的请求可能被并发分派。持有范围锁的请求在整个服务期间
//! 独占自己覆盖的字节区间：区间重叠的请求串行执行，不相交的请求并行执行。

use alloc::vec::Vec;
use crate::utils::relax;
use spin::Mutex;

/// 字节范围锁
#[derive(Debug, Default)]
pub struct RangeLock {
    /// 当前被持有的半开区间 [start, end)
    held: Mutex<Vec<(u64, u64)>>,
}

/// 范围锁守卫，drop 时释放区间
#[must_use = "the range is released as soon as the guard is dropped"]
pub struct RangeGuard<'a> {
    lock: &'a RangeLock,
    start: u64,
    end: u64,
}

impl RangeLock {
    /// 创建空的范围锁
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取 [start, end) 区间，与已持有区间重叠时自旋等待
    pub fn lock(&self, start: u64, end: u64) -> RangeGuard<'_> {
        loop {
            if let Some(guard) = self.try_lock(start, end) {
                return guard;
            }
            relax();
        }
    }

    /// 尝试获取 [start, end) 区间，重叠时立即返回 None
    pub fn try_lock(&self, start: u64, end: u64) -> Option<RangeGuard<'_>> {
        let mut held = self.held.lock();
        // 空区间与任何区间都不重叠
        if start < end && held.iter().any(|&(s, e)| s < end && start < e) {
            return None;
        }
        held.push((start, end));
        Some(RangeGuard {
            lock: self,
            start,
            end,
        })
    }

    /// 当前被持有的区间数
    pub fn held_count(&self) -> usize {
        self.held.lock().len()
    }
}

impl RangeGuard<'_> {
    /// 区间起点
    pub fn start(&self) -> u64 {
        self.start
    }

    /// 区间终点（不含）
    pub fn end(&self) -> u64 {
        self.end
    }
}

impl Drop for RangeGuard<'_> {
    fn drop(&mut self) {
        let mut held = self.lock.held.lock();
        if let Some(pos) = held
            .iter()
            .position(|&(s, e)| s == self.start && e == self.end)
        {
            held.swap_remove(pos);
        }
    }
}
