//! 镜像缓冲区模块
//!
//! # 主要组件
//!
//! - [`MirrorBuffer`] - 与设备容量等大的内存镜像，按字节偏移寻址
//! - [`RangeLock`] - 请求级字节范围锁，决定并发请求之间的顺序
//!
//! # 锁规则
//!
//! 1. 每个读写请求在服务期间持有其覆盖区间的 [`RangeGuard`]
//! 2. 区间重叠的请求串行执行，一个请求的镜像写入与后端写入对另一个
//!    重叠请求整体可见
//! 3. 不相交的请求并行执行，包括它们的后端 I/O
//! 4. `MirrorBuffer` 内部的互斥锁只覆盖单次内存拷贝
//! 5. [`RangeLock::lock`] 以自旋方式等待：启用 `std` 时每轮让出时间片，
//!    否则执行 `spin_loop` 提示。持有者的后端 I/O 是阻塞的，
//!    重叠的等待者在此期间一直占用 CPU，因此重叠请求较多时应减小队列深度

mod buffer;
mod range_lock;

pub use buffer::MirrorBuffer;
pub use range_lock::{RangeGuard, RangeLock};
