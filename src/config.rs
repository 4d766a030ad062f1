//! 中继设备配置
//!
//! 对应模块加载参数：虚拟设备名（`vd_name`）与物理设备路径（`pd`）。
//! 配置只在启动时读取一次。

use crate::consts::*;
use crate::error::{Error, ErrorKind, Result};
use alloc::string::{String, ToString};

/// 后端设备访问策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackingKind {
    /// 按文件方式定位读写（`read_at` / `write_at`）
    File,
    /// 按扇区提交块级传输
    #[default]
    Sector,
}

/// 读请求的数据来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadPolicy {
    /// 先从后端设备读取，再用镜像内容覆盖
    ///
    /// 后端读到的数据最终被丢弃，镜像未写过的区域读出为零。
    #[default]
    MirrorOverlay,
    /// 以后端设备为准，读取后用结果刷新镜像
    BackingAuthoritative,
}

/// 中继设备配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// 虚拟设备名
    pub disk_name: String,
    /// 物理设备路径（必需）
    pub backing_path: Option<String>,
    /// 主设备号
    pub major: u32,
    /// 后端访问策略
    pub backing_kind: BackingKind,
    /// 读请求策略
    pub read_policy: ReadPolicy,
    /// 队列深度
    pub queue_depth: u32,
    /// 镜像缓冲区上限（字节）
    pub mirror_limit_bytes: u64,
    /// 写入后是否同步落盘
    pub sync_writes: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            disk_name: DEFAULT_DISK_NAME.to_string(),
            backing_path: None,
            major: DEFAULT_MAJOR,
            backing_kind: BackingKind::default(),
            read_policy: ReadPolicy::default(),
            queue_depth: DEFAULT_QUEUE_DEPTH,
            mirror_limit_bytes: DEFAULT_MIRROR_LIMIT,
            sync_writes: true,
        }
    }
}

impl RelayConfig {
    /// 以指定物理设备路径创建配置
    pub fn new(backing_path: &str) -> Self {
        Self {
            backing_path: Some(backing_path.to_string()),
            ..Self::default()
        }
    }

    /// 设置虚拟设备名
    pub fn with_disk_name(mut self, name: &str) -> Self {
        self.disk_name = name.to_string();
        self
    }

    /// 设置读请求策略
    pub fn with_read_policy(mut self, policy: ReadPolicy) -> Self {
        self.read_policy = policy;
        self
    }

    /// 设置后端访问策略
    pub fn with_backing_kind(mut self, kind: BackingKind) -> Self {
        self.backing_kind = kind;
        self
    }

    /// 设置队列深度
    pub fn with_queue_depth(mut self, depth: u32) -> Self {
        self.queue_depth = depth;
        self
    }

    /// 设置镜像缓冲区上限
    pub fn with_mirror_limit(mut self, bytes: u64) -> Self {
        self.mirror_limit_bytes = bytes;
        self
    }

    /// 从模块参数字符串解析配置
    ///
    /// 参数以空白分隔，形如 `vd_name=relay0 pd=/dev/sdb`。
    /// `pd` 是数组参数，逗号分隔，只使用第一项。
    ///
    /// # 示例
    ///
    /// ```rust,ignore
    /// let config = RelayConfig::from_params("vd_name=relay1 pd=/dev/sdb queue_depth=64")?;
    /// assert_eq!(config.backing_path.as_deref(), Some("/dev/sdb"));
    /// ```
    pub fn from_params(params: &str) -> Result<Self> {
        let mut config = Self::default();

        for param in params.split_whitespace() {
            let (key, value) = param.split_once('=').ok_or(Error::new(
                ErrorKind::InvalidInput,
                "Module parameter must be key=value",
            ))?;

            match key {
                "vd_name" => config.disk_name = value.to_string(),
                "pd" => {
                    config.backing_path = value
                        .split(',')
                        .next()
                        .filter(|path| !path.is_empty())
                        .map(|path| path.to_string());
                }
                "major" => config.major = parse_u64(value)? as u32,
                "queue_depth" => config.queue_depth = parse_u64(value)? as u32,
                "mirror_limit" => config.mirror_limit_bytes = parse_u64(value)?,
                "sync" => config.sync_writes = parse_bool(value)?,
                "read_policy" => {
                    config.read_policy = match value {
                        "mirror" => ReadPolicy::MirrorOverlay,
                        "backing" => ReadPolicy::BackingAuthoritative,
                        _ => {
                            return Err(Error::new(
                                ErrorKind::InvalidInput,
                                "read_policy must be mirror or backing",
                            ))
                        }
                    }
                }
                "backing" => {
                    config.backing_kind = match value {
                        "file" => BackingKind::File,
                        "sector" => BackingKind::Sector,
                        _ => {
                            return Err(Error::new(
                                ErrorKind::InvalidInput,
                                "backing must be file or sector",
                            ))
                        }
                    }
                }
                _ => {
                    log::warn!("[RELAY] ignoring unknown module parameter {}", key);
                }
            }
        }

        Ok(config)
    }

    /// 校验配置
    ///
    /// 缺少物理设备路径属于启动期致命错误。
    pub fn validate(&self) -> Result<()> {
        if self.backing_path.as_deref().map_or(true, str::is_empty) {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "Physical device path is required",
            ));
        }

        if self.disk_name.is_empty() || self.disk_name.len() > DISK_NAME_LEN {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "Disk name must be 1..=31 bytes",
            ));
        }

        if self.queue_depth == 0 || self.queue_depth > MAX_QUEUE_DEPTH {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "Queue depth out of range",
            ));
        }

        Ok(())
    }

    /// 物理设备路径
    ///
    /// 未校验的配置可能返回错误。
    pub fn backing_path(&self) -> Result<&str> {
        self.backing_path.as_deref().ok_or(Error::new(
            ErrorKind::InvalidInput,
            "Physical device path is required",
        ))
    }
}

fn parse_u64(value: &str) -> Result<u64> {
    value
        .parse::<u64>()
        .map_err(|_| Error::new(ErrorKind::InvalidInput, "Expected an unsigned integer"))
}

fn parse_bool(value: &str) -> Result<bool> {
    match value {
        "1" | "y" | "Y" | "true" => Ok(true),
        "0" | "n" | "N" | "false" => Ok(false),
        _ => Err(Error::new(ErrorKind::InvalidInput, "Expected a boolean")),
    }
}
