//! 错误类型定义
//!
//! 提供中继块设备各层（配置、绑定、发布、请求处理）共用的错误类型。

use core::fmt;

/// 中继设备操作错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    message: &'static str,
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// I/O 错误（后端设备读写失败）
    Io,
    /// 无效参数（包括配置错误）
    InvalidInput,
    /// 设备不存在
    NotFound,
    /// 权限错误
    PermissionDenied,
    /// 设备忙
    Busy,
    /// 空间不足（内存分配失败或超过镜像上限）
    NoSpace,
    /// 访问越界
    OutOfRange,
    /// 无效状态（生命周期转换顺序错误）
    InvalidState,
    /// 设备尚未发布，暂时无法服务
    NotReady,
    /// 不支持的操作
    Unsupported,
}

impl Error {
    /// 创建新错误
    pub const fn new(kind: ErrorKind, message: &'static str) -> Self {
        Self { kind, message }
    }

    /// 获取错误类型
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// 获取错误消息
    pub const fn message(&self) -> &'static str {
        self.message
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

#[cfg(feature = "std")]
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind as IoKind;

        // EBUSY：设备已被独占打开
        const EBUSY: i32 = 16;
        if err.raw_os_error() == Some(EBUSY) {
            return Error::new(ErrorKind::Busy, "Backing device is busy");
        }

        match err.kind() {
            IoKind::NotFound => Error::new(ErrorKind::NotFound, "Backing device not found"),
            IoKind::PermissionDenied => {
                Error::new(ErrorKind::PermissionDenied, "Backing device access denied")
            }
            IoKind::UnexpectedEof => {
                Error::new(ErrorKind::OutOfRange, "Short transfer past end of device")
            }
            IoKind::InvalidInput => {
                Error::new(ErrorKind::InvalidInput, "Invalid backing device argument")
            }
            _ => Error::new(ErrorKind::Io, "Backing device I/O error"),
        }
    }
}

/// Result 类型别名
pub type Result<T> = core::result::Result<T, Error>;
