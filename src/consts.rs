//! 中继设备常量定义
//!
//! 这个模块包含了中继块设备的常量定义，包括：
//! - 扇区与块大小
//! - 队列参数
//! - 默认设备标识

//=============================================================================
// 基础常量
//=============================================================================

/// 内核扇区大小（512 字节），容量与请求偏移都以此为单位
pub const SECTOR_SIZE: u32 = 512;

/// 扇区大小的移位值（`1 << SECTOR_SHIFT == SECTOR_SIZE`）
pub const SECTOR_SHIFT: u32 = 9;

/// 虚拟设备的逻辑块大小
pub const LOGICAL_BLOCK_SIZE: u32 = SECTOR_SIZE;

//=============================================================================
// 队列参数
//=============================================================================

/// 硬件队列数量
pub const DEFAULT_NR_HW_QUEUES: u32 = 1;

/// 默认队列深度（同时在途的最大请求数）
pub const DEFAULT_QUEUE_DEPTH: u32 = 128;

/// 队列深度上限
pub const MAX_QUEUE_DEPTH: u32 = 4096;

/// 不绑定 NUMA 节点
pub const NUMA_NO_NODE: i32 = -1;

//=============================================================================
// 设备标识
//=============================================================================

/// 默认主设备号
pub const DEFAULT_MAJOR: u32 = 241;

/// 主设备号注册名
pub const REGISTRY_NAME: &str = "blk_relay";

/// 默认虚拟设备名
pub const DEFAULT_DISK_NAME: &str = "relay0";

/// 设备名最大长度（不含结尾 NUL）
pub const DISK_NAME_LEN: usize = 31;

/// 每个虚拟设备占用的次设备号数量
pub const DEFAULT_MINORS: u32 = 1;

//=============================================================================
// 镜像缓冲区
//=============================================================================

/// 默认镜像缓冲区上限（256 MiB）
///
/// 镜像按设备容量整体分配，超过该上限的后端设备在发布时失败。
pub const DEFAULT_MIRROR_LIMIT: u64 = 256 * 1024 * 1024;
