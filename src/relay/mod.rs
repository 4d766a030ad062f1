//! 中继设备
//!
//! - [`RelayCore`] - 发布后的共享状态与请求处理函数
//! - [`RelayDevice`] - 生命周期管理：绑定、发布、撤销与拆除
//!
//! 请求分派逻辑见 [`crate::request`]。

mod core;
mod lifecycle;

#[cfg(test)]
pub(crate) mod mock;

pub use self::core::{RelayCore, RelayStats, StatsSnapshot};
pub use lifecycle::{LifecycleState, RelayDevice};
