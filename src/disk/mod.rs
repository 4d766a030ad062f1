//! 设备子系统
//!
//! - [`DiskRegistry`] - 主设备号与磁盘发布接口
//! - [`RequestHandler`] - 发布磁盘时安装的请求处理函数
//! - [`MemRegistry`] - 内存实现，记录磁盘并路由请求

mod registry;

pub use registry::{DiskHandle, DiskInfo, DiskRegistry, MemRegistry, RequestHandler};
