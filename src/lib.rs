//! blk_relay: 可堆叠的块存储中继
//!
//! 在一个已存在的块设备之上发布虚拟磁盘，提供：
//! - **写穿透**：写入同时进入内存镜像和后端设备，返回前后端 I/O 已完成
//! - **镜像覆盖读**：读请求经过后端设备，最终以镜像内容为准（可配置）
//! - **有界队列**：单硬件队列，默认深度 128
//! - **可选的 std 支持**：按文件方式访问后端设备
//!
//! # 示例
//!
//! ```rust,ignore
//! use blk_relay::{MemRegistry, RelayConfig, RelayDevice, Request, Segment, SectorOpener};
//!
//! fn main() -> blk_relay::Result<()> {
//!     let config = RelayConfig::from_params("vd_name=relay0 pd=/dev/sdb")?;
//!     let opener = SectorOpener::new(|path: &str| MyDisk::open(path));
//!     let mut dev = RelayDevice::create(config, opener, MemRegistry::new())?;
//!
//!     // 写入 1000 个扇区
//!     let mut req = Request::write(0, vec![Segment::new(vec![0xAA; 512_000])]);
//!     dev.submit(&mut req);
//!
//!     dev.teardown();
//!     Ok(())
//! }
//! ```
//!
//! # 模块结构
//!
//! - [`error`] - 错误类型定义
//! - [`consts`] - 常量定义
//! - [`config`] - 启动配置
//! - [`backing`] - 后端设备绑定
//! - [`mirror`] - 镜像缓冲区与范围锁
//! - [`queue`] - 请求队列标签集
//! - [`request`] - 块请求、分派与完成
//! - [`disk`] - 设备子系统接口
//! - [`relay`] - 中继设备共享状态与生命周期

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

#[cfg(any(feature = "std", test))]
extern crate std;

// ===== 核心模块 =====

/// 错误处理
pub mod error;

/// 常量定义
pub mod consts;

/// 启动配置
pub mod config;

/// 后端设备
pub mod backing;

/// 镜像缓冲区
pub mod mirror;

/// 请求队列
pub mod queue;

/// 块请求
pub mod request;

/// 设备子系统
pub mod disk;

/// 中继设备
pub mod relay;

pub(crate) mod utils;

// ===== 公共导出 =====

// 错误处理
pub use error::{Error, ErrorKind, Result};

// 配置
pub use config::{BackingKind, ReadPolicy, RelayConfig};

// 后端设备
pub use backing::{BackingDevice, BackingOpener, BlockDevice, SectorBacking, SectorOpener};

#[cfg(all(feature = "std", unix))]
pub use backing::{ConfiguredOpener, FileBacking, FileOpener};

// 镜像
pub use mirror::{MirrorBuffer, RangeGuard, RangeLock};

// 队列
pub use queue::{QueueFlags, Tag, TagSet};

// 请求
pub use request::{
    BlockStatus, CompletionOutcome, OutcomeStatus, ReqOp, Request, RequestState, Segment,
};

// 设备子系统
pub use disk::{DiskHandle, DiskInfo, DiskRegistry, MemRegistry, RequestHandler};

// 中继设备
pub use relay::{LifecycleState, RelayCore, RelayDevice, RelayStats, StatsSnapshot};
