//! 中继设备生命周期
//!
//! ```text
//! Uninitialized --bind--> Bound --publish--> Published --unpublish--> Unpublished --close--> Closed
//!       |                   |                                                         ^
//!       +-------------------+----------------------- 失败 --------------------------+
//! ```
//!
//! 资源按获取的逆序释放：先撤销磁盘，再等待在途请求，最后释放镜像并关闭后端。

use super::core::RelayCore;
use crate::backing::{BackingDevice, BackingOpener};
use crate::config::RelayConfig;
use crate::consts::*;
use crate::disk::{DiskHandle, DiskInfo, DiskRegistry, RequestHandler};
use crate::error::{Error, ErrorKind, Result};
use crate::mirror::MirrorBuffer;
use crate::queue::{QueueFlags, TagSet};
use crate::request::{completion, BlockStatus, CompletionOutcome, Request};
use alloc::sync::Arc;

/// 生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// 尚未绑定后端
    Uninitialized,
    /// 已打开后端设备
    Bound,
    /// 已发布，正在服务请求
    Published,
    /// 已撤销，不再接收新请求
    Unpublished,
    /// 所有资源已释放
    Closed,
}

/// 中继设备
///
/// 持有配置、后端打开器与设备子系统，驱动整个生命周期。
/// 被丢弃时自动执行 [`teardown`](Self::teardown)。
///
/// # 示例
///
/// ```rust,ignore
/// use blk_relay::{MemRegistry, RelayConfig, RelayDevice, Request};
///
/// let config = RelayConfig::new("/dev/sdb");
/// let mut dev = RelayDevice::create(config, opener, MemRegistry::new())?;
///
/// let mut req = Request::read(0, &[4096]);
/// dev.submit(&mut req);
///
/// dev.teardown();
/// ```
pub struct RelayDevice<O: BackingOpener, R: DiskRegistry> {
    config: RelayConfig,
    opener: O,
    registry: R,
    state: LifecycleState,
    /// 已注册的主设备号
    major: Option<u32>,
    /// 绑定后、发布前持有的后端
    backing: Option<O::Device>,
    core: Option<Arc<RelayCore<O::Device>>>,
    disk: Option<DiskHandle>,
}

impl<O: BackingOpener, R: DiskRegistry> RelayDevice<O, R> {
    /// 创建处于 `Uninitialized` 状态的设备
    pub fn new(config: RelayConfig, opener: O, registry: R) -> Self {
        Self {
            config,
            opener,
            registry,
            state: LifecycleState::Uninitialized,
            major: None,
            backing: None,
            core: None,
            disk: None,
        }
    }

    /// 完整的启动流程
    ///
    /// 依次校验配置、注册主设备号、绑定后端、发布磁盘。
    /// 任何一步失败都会撤销已完成的步骤，并返回该步骤的错误。
    pub fn create(config: RelayConfig, opener: O, registry: R) -> Result<Self> {
        if let Err(e) = config.validate() {
            log::error!("[RELAY] invalid configuration: {}", e);
            return Err(e);
        }

        let mut dev = Self::new(config, opener, registry);

        match dev.start() {
            Ok(()) => Ok(dev),
            Err(e) => {
                log::error!("[RELAY] failed to create {}: {}", dev.config.disk_name, e);
                dev.teardown();
                Err(e)
            }
        }
    }

    fn start(&mut self) -> Result<()> {
        self.register()?;
        self.bind()?;
        self.publish()
    }

    /// 注册主设备号
    ///
    /// # 返回
    ///
    /// 实际注册的主设备号
    pub fn register(&mut self) -> Result<u32> {
        if let Some(major) = self.major {
            return Ok(major);
        }

        let major = self
            .registry
            .register_major(self.config.major, REGISTRY_NAME)
            .map_err(|e| {
                log::error!("[RELAY] register major {} failed: {}", self.config.major, e);
                e
            })?;
        self.major = Some(major);
        Ok(major)
    }

    /// 打开后端设备
    ///
    /// 打开失败对设备创建是致命的，状态保持不变。
    pub fn bind(&mut self) -> Result<()> {
        if self.state != LifecycleState::Uninitialized {
            return Err(Error::new(ErrorKind::InvalidState, "Backing device already bound"));
        }

        let path = self.config.backing_path()?;
        let backing = self.opener.open(path).map_err(|e| {
            log::error!("[RELAY] failed to open {}: {}", path, e);
            e
        })?;

        log::info!(
            "[RELAY] bound {}, capacity {} sectors",
            path,
            backing.capacity_sectors()
        );

        self.backing = Some(backing);
        self.state = LifecycleState::Bound;
        Ok(())
    }

    /// 发布磁盘
    ///
    /// 分配标签集与镜像，组装共享状态并交给设备子系统。
    /// 容量取自后端设备。失败时释放已分配的资源并关闭后端，
    /// 设备进入 `Closed`。
    pub fn publish(&mut self) -> Result<()> {
        if self.state != LifecycleState::Bound {
            return Err(Error::new(ErrorKind::InvalidState, "Device is not bound"));
        }
        let mut backing = self
            .backing
            .take()
            .ok_or(Error::new(ErrorKind::InvalidState, "Device is not bound"))?;

        let capacity_sectors = backing.capacity_sectors();
        let (tags, mirror) = match self.prepare(capacity_sectors) {
            Ok(parts) => parts,
            Err(e) => {
                log::error!("[RELAY] failed to prepare {}: {}", self.config.disk_name, e);
                Self::close_backing(&mut backing);
                self.state = LifecycleState::Closed;
                return Err(e);
            }
        };

        let core = Arc::new(RelayCore::new(
            self.config.disk_name.clone(),
            backing,
            mirror,
            tags,
            self.config.read_policy,
        ));

        let info = DiskInfo {
            name: self.config.disk_name.clone(),
            major: self.major.unwrap_or(self.config.major),
            first_minor: 0,
            minors: DEFAULT_MINORS,
            capacity_sectors,
            logical_block_size: LOGICAL_BLOCK_SIZE,
            queue_depth: core.tags().queue_depth(),
            queue_flags: core.tags().flags(),
        };

        let handler: Arc<dyn RequestHandler> = core.clone();
        match self.registry.add_disk(info, handler) {
            Ok(handle) => {
                core.set_ready(true);
                self.disk = Some(handle);
                self.core = Some(core);
                self.state = LifecycleState::Published;
                log::info!(
                    "[RELAY] {} published as disk {}, {} sectors",
                    self.config.disk_name,
                    handle.id(),
                    capacity_sectors
                );
                Ok(())
            }
            Err(e) => {
                log::error!("[RELAY] add_disk {} failed: {}", self.config.disk_name, e);
                Self::release_core(core);
                self.state = LifecycleState::Closed;
                Err(e)
            }
        }
    }

    /// 撤销磁盘
    ///
    /// 返回后不再有新请求被服务。可重复调用。
    pub fn unpublish(&mut self) {
        if let Some(core) = &self.core {
            core.set_ready(false);
        }
        if let Some(handle) = self.disk.take() {
            self.registry.del_disk(handle);
            log::info!("[RELAY] {} unpublished (disk {})", self.config.disk_name, handle.id());
        }
        if self.state == LifecycleState::Published {
            self.state = LifecycleState::Unpublished;
        }
    }

    /// 释放镜像与后端
    ///
    /// 先等待所有在途请求完成。仍被发布的设备会先撤销。可重复调用。
    pub fn close(&mut self) {
        if self.disk.is_some() {
            self.unpublish();
        }

        if let Some(core) = self.core.take() {
            core.tags().wait_idle();
            Self::release_core(core);
        }

        if let Some(mut backing) = self.backing.take() {
            Self::close_backing(&mut backing);
        }

        if self.state != LifecycleState::Closed {
            self.state = LifecycleState::Closed;
            log::info!("[RELAY] {} closed", self.config.disk_name);
        }
    }

    /// 拆除设备
    ///
    /// 撤销磁盘、释放资源并注销主设备号。每一步只在对应资源存在时执行，
    /// 因此对部分初始化的设备和重复调用都是安全的。
    pub fn teardown(&mut self) {
        self.unpublish();
        self.close();

        if let Some(major) = self.major.take() {
            self.registry.unregister_major(major, REGISTRY_NAME);
        }
    }

    /// 提交请求
    ///
    /// 未发布的设备以 `DevResource` 结束请求。
    pub fn submit(&self, req: &mut Request) -> BlockStatus {
        match &self.core {
            Some(core) => core.queue_rq(req),
            None => {
                req.start();
                completion::complete(req, CompletionOutcome::not_ready())
            }
        }
    }

    /// 当前状态
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// 配置
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// 已注册的主设备号
    pub fn major(&self) -> Option<u32> {
        self.major
    }

    /// 已发布磁盘的句柄
    pub fn disk(&self) -> Option<DiskHandle> {
        self.disk
    }

    /// 共享状态（发布后可用）
    pub fn core(&self) -> Option<&Arc<RelayCore<O::Device>>> {
        self.core.as_ref()
    }

    /// 设备子系统
    pub fn registry(&self) -> &R {
        &self.registry
    }

    /// 设备子系统的可变引用
    pub fn registry_mut(&mut self) -> &mut R {
        &mut self.registry
    }

    /// 是否可以服务请求
    pub fn is_ready(&self) -> bool {
        self.core.as_ref().map_or(false, |core| core.is_ready())
    }

    fn prepare(&self, capacity_sectors: u64) -> Result<(TagSet, MirrorBuffer)> {
        let capacity_bytes = capacity_sectors
            .checked_mul(SECTOR_SIZE as u64)
            .ok_or(Error::new(ErrorKind::NoSpace, "Device capacity overflows"))?;

        if capacity_bytes > self.config.mirror_limit_bytes {
            log::error!(
                "[RELAY] capacity {} bytes exceeds mirror limit {}",
                capacity_bytes,
                self.config.mirror_limit_bytes
            );
            return Err(Error::new(ErrorKind::NoSpace, "Device capacity exceeds mirror limit"));
        }

        let tags = TagSet::alloc(self.config.queue_depth, QueueFlags::SHOULD_MERGE)?;
        let mirror = MirrorBuffer::allocate(capacity_bytes)?;

        Ok((tags, mirror))
    }

    fn release_core(core: Arc<RelayCore<O::Device>>) {
        // RelayCore 的 drop 关闭后端，随后释放镜像与标签集
        match Arc::try_unwrap(core) {
            Ok(core) => drop(core),
            Err(core) => {
                log::warn!(
                    "[RELAY] {} still referenced, backing closes with the last reference",
                    core.name()
                );
            }
        }
    }

    fn close_backing(backing: &mut O::Device) {
        if let Err(e) = backing.close() {
            log::warn!("[RELAY] failed to close backing device: {}", e);
        }
    }
}

impl<O: BackingOpener, R: DiskRegistry> Drop for RelayDevice<O, R> {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl<O: BackingOpener, R: DiskRegistry> core::fmt::Debug for RelayDevice<O, R> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RelayDevice")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("major", &self.major)
            .field("disk", &self.disk)
            .field("core", &self.core)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReadPolicy;
    use crate::disk::MemRegistry;
    use crate::relay::mock::{MockBacking, MockOpener};
    use crate::request::Segment;
    use alloc::vec;

    fn config() -> RelayConfig {
        RelayConfig::new("/dev/mock")
    }

    #[test]
    fn test_create_publishes_disk() {
        let backing = MockBacking::new(1000);
        let opener = MockOpener::new(backing.clone());
        let mut reg = MemRegistry::new();

        let dev = RelayDevice::create(config(), opener, &mut reg).unwrap();
        assert_eq!(dev.state(), LifecycleState::Published);
        assert!(dev.is_ready());
        assert_eq!(dev.major(), Some(DEFAULT_MAJOR));

        let core = dev.core().unwrap();
        assert_eq!(core.capacity_sectors(), 1000);
        assert_eq!(core.mirror().len(), 1000 * 512);
        assert_eq!(core.tags().queue_depth(), DEFAULT_QUEUE_DEPTH);

        let handle = dev.disk().unwrap();
        let info = dev.registry().disk(handle).unwrap().clone();
        assert_eq!(info.name, DEFAULT_DISK_NAME);
        assert_eq!(info.capacity_sectors, 1000);
        assert_eq!(info.logical_block_size, 512);
        assert!(info.queue_flags.contains(QueueFlags::SHOULD_MERGE));
    }

    #[test]
    fn test_opens_configured_path() {
        let opener = MockOpener::new(MockBacking::new(8));
        let mut reg = MemRegistry::new();
        let mut dev = RelayDevice::new(config(), opener, &mut reg);

        dev.bind().unwrap();
        assert_eq!(dev.state(), LifecycleState::Bound);
        assert_eq!(dev.opener.open_calls(), 1);
        assert_eq!(dev.opener.last_path().as_deref(), Some("/dev/mock"));
    }

    #[test]
    fn test_drop_tears_down() {
        let backing = MockBacking::new(64);
        let mut reg = MemRegistry::new();
        let dev =
            RelayDevice::create(config(), MockOpener::new(backing.clone()), &mut reg).unwrap();
        let handle = dev.disk().unwrap();
        drop(dev);

        // drop 已经拆除设备
        assert_eq!(reg.disk_count(), 0);
        assert!(!reg.is_major_registered(DEFAULT_MAJOR));
        assert_eq!(backing.close_calls(), 1);
        let mut req = Request::flush();
        assert_eq!(reg.submit(handle, &mut req).unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_write_then_read_via_submit() {
        let backing = MockBacking::new(64);
        let mut reg = MemRegistry::new();
        let mut dev =
            RelayDevice::create(config(), MockOpener::new(backing.clone()), &mut reg).unwrap();

        let mut write = Request::write(8, vec![Segment::new(vec![0xC3; 1024])]);
        assert_eq!(dev.submit(&mut write), BlockStatus::Ok);
        assert!(backing.bytes(8 * 512, 1024).iter().all(|&b| b == 0xC3));

        let handle = dev.disk().unwrap();
        let mut read = Request::read(8, &[1024]);
        assert_eq!(dev.registry().submit(handle, &mut read).unwrap(), BlockStatus::Ok);
        assert!(read.segments()[0].data().iter().all(|&b| b == 0xC3));

        let mut pt = Request::passthrough();
        assert_eq!(dev.submit(&mut pt), BlockStatus::IoErr);

        let stats = dev.core().unwrap().stats();
        assert_eq!(stats.writes, 1);
        assert_eq!(stats.reads, 1);
        assert_eq!(stats.passthrough, 1);

        dev.teardown();
    }

    #[test]
    fn test_open_and_release_via_registry() {
        let mut reg = MemRegistry::new();
        let dev =
            RelayDevice::create(config(), MockOpener::new(MockBacking::new(8)), &mut reg).unwrap();
        let handle = dev.disk().unwrap();

        dev.registry().open(handle).unwrap();
        dev.registry().open(handle).unwrap();
        assert_eq!(dev.core().unwrap().openers(), 2);
        dev.registry().release(handle);
        assert_eq!(dev.core().unwrap().openers(), 1);
    }

    #[test]
    fn test_missing_path_fails_before_anything() {
        let opener = MockOpener::new(MockBacking::new(8));
        let mut reg = MemRegistry::new();

        let err = RelayDevice::create(RelayConfig::default(), opener, &mut reg).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(!reg.is_major_registered(DEFAULT_MAJOR));
    }

    #[test]
    fn test_bind_failure_rolls_back_major() {
        let mut reg = MemRegistry::new();
        let err = RelayDevice::create(config(), MockOpener::failing(ErrorKind::NotFound), &mut reg)
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(!reg.is_major_registered(DEFAULT_MAJOR));
        assert_eq!(reg.disk_count(), 0);
    }

    #[test]
    fn test_major_in_use() {
        let mut reg = MemRegistry::new();
        reg.register_major(DEFAULT_MAJOR, "other").unwrap();

        let backing = MockBacking::new(8);
        let err = RelayDevice::create(config(), MockOpener::new(backing.clone()), &mut reg)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Busy);
        // 注册失败时后端从未打开，他人的主设备号保持不变
        assert!(reg.is_major_registered(DEFAULT_MAJOR));
        assert_eq!(backing.close_calls(), 0);
    }

    #[test]
    fn test_mirror_limit_fails_publish() {
        let backing = MockBacking::new(1000);
        let mut reg = MemRegistry::new();
        let cfg = config().with_mirror_limit(64 * 1024);

        let err = RelayDevice::create(cfg, MockOpener::new(backing.clone()), &mut reg).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoSpace);
        assert_eq!(backing.close_calls(), 1);
        assert!(!reg.is_major_registered(DEFAULT_MAJOR));
        assert_eq!(reg.disk_count(), 0);
    }

    #[test]
    fn test_add_disk_failure_releases_everything() {
        let mut reg = MemRegistry::new();
        let mut first =
            RelayDevice::create(config(), MockOpener::new(MockBacking::new(8)), &mut reg).unwrap();

        // 同名磁盘已存在，第二个设备共用同一个主设备号
        let major = first.major();
        let backing = MockBacking::new(8);
        let opener = MockOpener::new(backing.clone());
        let mut dev = RelayDevice::new(config(), opener, first.registry_mut());
        dev.major = major;
        dev.bind().unwrap();

        let err = dev.publish().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Busy);
        assert_eq!(dev.state(), LifecycleState::Closed);
        assert!(dev.core().is_none());
        assert_eq!(backing.close_calls(), 1);

        // 主设备号归第一个设备所有
        dev.major = None;
        drop(dev);
        assert_eq!(backing.close_calls(), 1);
        assert_eq!(first.registry().disk_count(), 1);
        first.teardown();
    }

    #[test]
    fn test_state_transitions_are_checked() {
        let mut reg = MemRegistry::new();
        let mut dev = RelayDevice::new(config(), MockOpener::new(MockBacking::new(8)), &mut reg);

        assert_eq!(dev.publish().unwrap_err().kind(), ErrorKind::InvalidState);
        dev.register().unwrap();
        dev.bind().unwrap();
        assert_eq!(dev.bind().unwrap_err().kind(), ErrorKind::InvalidState);
        dev.publish().unwrap();
        assert_eq!(dev.publish().unwrap_err().kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn test_request_before_publish_is_not_ready() {
        let backing = MockBacking::new(8);
        let mut reg = MemRegistry::new();
        let mut dev = RelayDevice::new(config(), MockOpener::new(backing.clone()), &mut reg);
        dev.bind().unwrap();

        let mut req = Request::write(0, vec![Segment::new(vec![1; 512])]);
        assert_eq!(dev.submit(&mut req), BlockStatus::DevResource);
        assert_eq!(req.completed_bytes(), 0);
        assert_eq!(backing.write_calls(), 0);
    }

    #[test]
    fn test_unpublish_stops_service() {
        let backing = MockBacking::new(8);
        let mut reg = MemRegistry::new();
        let mut dev =
            RelayDevice::create(config(), MockOpener::new(backing.clone()), &mut reg).unwrap();

        let core = dev.core().unwrap().clone();
        dev.unpublish();
        assert_eq!(dev.state(), LifecycleState::Unpublished);
        assert!(!dev.is_ready());
        assert_eq!(dev.registry().disk_count(), 0);

        // 仍持有处理函数引用的一方也无法再发起 I/O
        let mut req = Request::read(0, &[512]);
        assert_eq!(core.queue_rq(&mut req), BlockStatus::DevResource);
        assert_eq!(backing.read_calls(), 0);
        assert_eq!(core.stats().not_ready, 1);
        drop(core);

        dev.close();
        assert_eq!(dev.state(), LifecycleState::Closed);
        assert_eq!(backing.close_calls(), 1);
    }

    #[test]
    fn test_teardown_is_idempotent() {
        let backing = MockBacking::new(8);
        let mut reg = MemRegistry::new();
        let mut dev =
            RelayDevice::create(config(), MockOpener::new(backing.clone()), &mut reg).unwrap();

        dev.teardown();
        assert_eq!(dev.state(), LifecycleState::Closed);
        assert_eq!(backing.close_calls(), 1);
        assert!(dev.major().is_none());

        dev.teardown();
        drop(dev);
        assert_eq!(backing.close_calls(), 1);
        assert!(!reg.is_major_registered(DEFAULT_MAJOR));
    }

    #[test]
    fn test_teardown_of_bound_device() {
        let backing = MockBacking::new(8);
        let mut reg = MemRegistry::new();
        let mut dev = RelayDevice::new(config(), MockOpener::new(backing.clone()), &mut reg);
        dev.register().unwrap();
        dev.bind().unwrap();

        dev.teardown();
        assert_eq!(dev.state(), LifecycleState::Closed);
        assert_eq!(backing.close_calls(), 1);
        assert!(!dev.registry().is_major_registered(DEFAULT_MAJOR));
    }

    #[test]
    fn test_teardown_with_outstanding_reference() {
        let backing = MockBacking::new(8);
        let mut reg = MemRegistry::new();
        let mut dev =
            RelayDevice::create(config(), MockOpener::new(backing.clone()), &mut reg).unwrap();

        let core = dev.core().unwrap().clone();
        dev.teardown();
        assert_eq!(dev.state(), LifecycleState::Closed);
        // 后端随最后一个引用关闭，且只关闭一次
        assert_eq!(backing.close_calls(), 0);
        assert!(!core.is_ready());

        drop(dev);
        assert_eq!(backing.close_calls(), 0);
        drop(core);
        assert_eq!(backing.close_calls(), 1);
    }

    #[test]
    fn test_backing_authoritative_policy_from_config() {
        let backing = MockBacking::new(8);
        backing.fill(0, 512, 0x42);
        let mut reg = MemRegistry::new();
        let cfg = config().with_read_policy(ReadPolicy::BackingAuthoritative);
        let dev = RelayDevice::create(cfg, MockOpener::new(backing), &mut reg).unwrap();

        let mut req = Request::read(0, &[512]);
        assert_eq!(dev.submit(&mut req), BlockStatus::Ok);
        assert!(req.segments()[0].data().iter().all(|&b| b == 0x42));
    }
}
