//! 设备子系统接口
//!
//! 主设备号注册、磁盘发布与撤销。中继设备通过 [`DiskRegistry`] 把自己
//! 发布为一个虚拟磁盘，并把 [`RequestHandler`] 安装为该磁盘的请求处理函数。

use crate::error::{Error, ErrorKind, Result};
use crate::queue::QueueFlags;
use crate::request::{BlockStatus, Request};
use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::sync::Arc;

/// 磁盘请求处理函数
///
/// 框架可能在多个线程上同时调用 `queue_rq`。
pub trait RequestHandler: Send + Sync {
    /// 处理一个请求，返回最终状态
    fn queue_rq(&self, req: &mut Request) -> BlockStatus;

    /// 磁盘被打开
    fn open(&self) -> Result<()> {
        Ok(())
    }

    /// 磁盘被关闭
    fn release(&self) {}
}

/// 待发布磁盘的描述
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskInfo {
    /// 磁盘名
    pub name: String,
    /// 主设备号
    pub major: u32,
    /// 起始次设备号
    pub first_minor: u32,
    /// 次设备号数量
    pub minors: u32,
    /// 容量（512 字节扇区数）
    pub capacity_sectors: u64,
    /// 逻辑块大小
    pub logical_block_size: u32,
    /// 队列深度
    pub queue_depth: u32,
    /// 队列标志
    pub queue_flags: QueueFlags,
}

/// 已发布磁盘的句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DiskHandle(u64);

impl DiskHandle {
    /// 句柄编号
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// 设备子系统
pub trait DiskRegistry {
    /// 注册主设备号，`major == 0` 表示动态分配；返回实际主设备号
    fn register_major(&mut self, major: u32, name: &str) -> Result<u32>;

    /// 注销主设备号
    fn unregister_major(&mut self, major: u32, name: &str);

    /// 发布磁盘
    ///
    /// 成功返回后，请求可能随时通过 `handler` 到达。
    fn add_disk(&mut self, info: DiskInfo, handler: Arc<dyn RequestHandler>) -> Result<DiskHandle>;

    /// 撤销磁盘
    ///
    /// 返回后不再有新请求被分派到对应的处理函数。
    fn del_disk(&mut self, handle: DiskHandle);
}

impl<R: DiskRegistry + ?Sized> DiskRegistry for &mut R {
    fn register_major(&mut self, major: u32, name: &str) -> Result<u32> {
        (**self).register_major(major, name)
    }

    fn unregister_major(&mut self, major: u32, name: &str) {
        (**self).unregister_major(major, name)
    }

    fn add_disk(&mut self, info: DiskInfo, handler: Arc<dyn RequestHandler>) -> Result<DiskHandle> {
        (**self).add_disk(info, handler)
    }

    fn del_disk(&mut self, handle: DiskHandle) {
        (**self).del_disk(handle)
    }
}

/// 动态分配主设备号的上界
const DYNAMIC_MAJOR_MAX: u32 = 254;

/// 动态分配主设备号的下界
const DYNAMIC_MAJOR_MIN: u32 = 234;

struct PublishedDisk {
    info: DiskInfo,
    handler: Arc<dyn RequestHandler>,
}

/// 内存中的设备子系统
///
/// 记录主设备号与已发布磁盘，并把请求路由到对应的处理函数。
/// 适用于用户态嵌入与测试。
#[derive(Default)]
pub struct MemRegistry {
    majors: BTreeMap<u32, String>,
    disks: BTreeMap<DiskHandle, PublishedDisk>,
    next_id: u64,
}

impl MemRegistry {
    /// 创建空的设备子系统
    pub fn new() -> Self {
        Self::default()
    }

    /// 主设备号是否已注册
    pub fn is_major_registered(&self, major: u32) -> bool {
        self.majors.contains_key(&major)
    }

    /// 已发布磁盘数
    pub fn disk_count(&self) -> usize {
        self.disks.len()
    }

    /// 查询磁盘描述
    pub fn disk(&self, handle: DiskHandle) -> Option<&DiskInfo> {
        self.disks.get(&handle).map(|d| &d.info)
    }

    /// 按名字查找磁盘
    pub fn find(&self, name: &str) -> Option<DiskHandle> {
        self.disks
            .iter()
            .find(|(_, d)| d.info.name == name)
            .map(|(&handle, _)| handle)
    }

    /// 向磁盘提交请求
    pub fn submit(&self, handle: DiskHandle, req: &mut Request) -> Result<BlockStatus> {
        let disk = self
            .disks
            .get(&handle)
            .ok_or(Error::new(ErrorKind::NotFound, "No such disk"))?;
        Ok(disk.handler.queue_rq(req))
    }

    /// 打开磁盘
    pub fn open(&self, handle: DiskHandle) -> Result<()> {
        self.disks
            .get(&handle)
            .ok_or(Error::new(ErrorKind::NotFound, "No such disk"))?
            .handler
            .open()
    }

    /// 关闭磁盘
    pub fn release(&self, handle: DiskHandle) {
        if let Some(disk) = self.disks.get(&handle) {
            disk.handler.release();
        }
    }
}

impl DiskRegistry for MemRegistry {
    fn register_major(&mut self, major: u32, name: &str) -> Result<u32> {
        let major = if major == 0 {
            (DYNAMIC_MAJOR_MIN..=DYNAMIC_MAJOR_MAX)
                .rev()
                .find(|m| !self.majors.contains_key(m))
                .ok_or(Error::new(ErrorKind::Busy, "No free dynamic major"))?
        } else {
            major
        };

        if self.majors.contains_key(&major) {
            return Err(Error::new(ErrorKind::Busy, "Major number already registered"));
        }

        self.majors.insert(major, name.to_string());
        log::info!("[REGISTRY] major {} registered as {}", major, name);
        Ok(major)
    }

    fn unregister_major(&mut self, major: u32, name: &str) {
        match self.majors.get(&major) {
            Some(owner) if owner == name => {
                self.majors.remove(&major);
                log::info!("[REGISTRY] major {} unregistered", major);
            }
            _ => log::warn!("[REGISTRY] unregister of unknown major {} ({})", major, name),
        }
    }

    fn add_disk(&mut self, info: DiskInfo, handler: Arc<dyn RequestHandler>) -> Result<DiskHandle> {
        if !self.majors.contains_key(&info.major) {
            return Err(Error::new(ErrorKind::InvalidState, "Major number not registered"));
        }
        if self.find(&info.name).is_some() {
            return Err(Error::new(ErrorKind::Busy, "Disk name already in use"));
        }

        let handle = DiskHandle(self.next_id);
        self.next_id += 1;

        log::info!(
            "[REGISTRY] disk {} added ({}:{}), {} sectors",
            info.name,
            info.major,
            info.first_minor,
            info.capacity_sectors
        );
        self.disks.insert(handle, PublishedDisk { info, handler });
        Ok(handle)
    }

    fn del_disk(&mut self, handle: DiskHandle) {
        if let Some(disk) = self.disks.remove(&handle) {
            log::info!("[REGISTRY] disk {} deleted", disk.info.name);
        }
    }
}
