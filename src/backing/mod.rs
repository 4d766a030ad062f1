//! 后端设备绑定
//!
//! 中继设备下方的真实块设备。提供两种可互换的访问策略：
//!
//! - [`FileBacking`] - 按文件方式定位读写（需要 `std` 特性）
//! - [`SectorBacking`] - 包装任意 [`BlockDevice`]，按扇区提交块级传输
//!
//! 策略在配置阶段由 [`BackingKind`](crate::config::BackingKind) 选择，
//! 由 [`ConfiguredOpener`] 统一打开。

mod device;
mod sector;

#[cfg(all(feature = "std", unix))]
mod file;

pub use device::{BackingDevice, BackingOpener, BlockDevice};
pub use sector::{SectorBacking, SectorOpener};

#[cfg(all(feature = "std", unix))]
pub use file::{FileBacking, FileOpener};

#[cfg(all(feature = "std", unix))]
pub use configured::ConfiguredOpener;

#[cfg(all(feature = "std", unix))]
mod configured {
    use super::*;
    use crate::config::{BackingKind, RelayConfig};
    use crate::error::Result;
    use alloc::boxed::Box;

    /// 按配置选择策略的打开器
    ///
    /// `resolve` 把路径解析为扇区设备，仅在 [`BackingKind::Sector`] 时使用。
    pub struct ConfiguredOpener<F> {
        kind: BackingKind,
        sync_writes: bool,
        resolve: F,
    }

    impl<F> ConfiguredOpener<F> {
        /// 从配置创建打开器
        pub fn from_config(config: &RelayConfig, resolve: F) -> Self {
            Self {
                kind: config.backing_kind,
                sync_writes: config.sync_writes,
                resolve,
            }
        }
    }

    impl<F, D> BackingOpener for ConfiguredOpener<F>
    where
        F: Fn(&str) -> Result<D>,
        D: BlockDevice + Send + 'static,
    {
        type Device = Box<dyn BackingDevice>;

        fn open(&self, path: &str) -> Result<Box<dyn BackingDevice>> {
            match self.kind {
                BackingKind::File => Ok(Box::new(FileOpener::new(self.sync_writes).open(path)?)),
                BackingKind::Sector => {
                    Ok(Box::new(SectorOpener::new(&self.resolve).open(path)?))
                }
            }
        }
    }

}
