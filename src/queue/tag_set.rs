//! 请求标签集
//!
//! 每个在途请求占用一个标签，标签总数即队列深度。
//! 没有空闲标签时新请求被拒绝为 `Resource`，由框架稍后重试。

use crate::consts::*;
use crate::error::{Error, ErrorKind, Result};
use crate::utils::relax;
use alloc::vec;
use alloc::vec::Vec;
use bitflags::bitflags;
use core::sync::atomic::{AtomicU32, Ordering};
use spin::Mutex;

bitflags! {
    /// 队列标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct QueueFlags: u32 {
        /// 允许合并相邻请求
        const SHOULD_MERGE = 0x01;
    }
}

/// 标签集
///
/// 单硬件队列配置下，一个标签集对应设备的全部在途请求。
pub struct TagSet {
    nr_hw_queues: u32,
    queue_depth: u32,
    numa_node: i32,
    flags: QueueFlags,
    /// 已分配标签位图
    bitmap: Mutex<Vec<u64>>,
    /// 在途请求数
    busy: AtomicU32,
}

/// 标签守卫，drop 时归还标签
#[must_use = "the tag is released as soon as the guard is dropped"]
pub struct Tag<'a> {
    set: &'a TagSet,
    tag: u32,
}

impl TagSet {
    /// 分配标签集
    ///
    /// # 参数
    ///
    /// * `queue_depth` - 队列深度（1..=MAX_QUEUE_DEPTH）
    /// * `flags` - 队列标志
    pub fn alloc(queue_depth: u32, flags: QueueFlags) -> Result<Self> {
        if queue_depth == 0 || queue_depth > MAX_QUEUE_DEPTH {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "Queue depth out of range",
            ));
        }

        let words = ((queue_depth + 63) / 64) as usize;
        log::debug!(
            "[QUEUE] tag set allocated: hw_queues={}, depth={}, flags={:?}",
            DEFAULT_NR_HW_QUEUES,
            queue_depth,
            flags
        );

        Ok(Self {
            nr_hw_queues: DEFAULT_NR_HW_QUEUES,
            queue_depth,
            numa_node: NUMA_NO_NODE,
            flags,
            bitmap: Mutex::new(vec![0u64; words]),
            busy: AtomicU32::new(0),
        })
    }

    /// 硬件队列数
    pub fn nr_hw_queues(&self) -> u32 {
        self.nr_hw_queues
    }

    /// 队列深度
    pub fn queue_depth(&self) -> u32 {
        self.queue_depth
    }

    /// NUMA 节点
    pub fn numa_node(&self) -> i32 {
        self.numa_node
    }

    /// 队列标志
    pub fn flags(&self) -> QueueFlags {
        self.flags
    }

    /// 当前在途请求数
    pub fn busy(&self) -> u32 {
        self.busy.load(Ordering::Acquire)
    }

    /// 获取空闲标签，队列满时返回 None
    pub fn get(&self) -> Option<Tag<'_>> {
        let mut bitmap = self.bitmap.lock();

        for (i, word) in bitmap.iter_mut().enumerate() {
            let bit = word.trailing_ones();
            if bit == 64 {
                continue;
            }
            let tag = i as u32 * 64 + bit;
            if tag >= self.queue_depth {
                break;
            }
            *word |= 1u64 << bit;
            self.busy.fetch_add(1, Ordering::AcqRel);
            return Some(Tag { set: self, tag });
        }

        log::trace!("[QUEUE] no free tag, depth={}", self.queue_depth);
        None
    }

    /// 等待所有在途请求结束
    pub fn wait_idle(&self) {
        while self.busy() > 0 {
            relax();
        }
    }

    fn put(&self, tag: u32) {
        let mut bitmap = self.bitmap.lock();
        bitmap[(tag / 64) as usize] &= !(1u64 << (tag % 64));
        self.busy.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Tag<'_> {
    /// 标签号
    pub fn tag(&self) -> u32 {
        self.tag
    }
}

impl Drop for Tag<'_> {
    fn drop(&mut self) {
        self.set.put(self.tag);
    }
}

impl core::fmt::Debug for TagSet {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TagSet")
            .field("nr_hw_queues", &self.nr_hw_queues)
            .field("queue_depth", &self.queue_depth)
            .field("numa_node", &self.numa_node)
            .field("flags", &self.flags)
            .field("busy", &self.busy())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_geometry() {
        let set = TagSet::alloc(DEFAULT_QUEUE_DEPTH, QueueFlags::SHOULD_MERGE).unwrap();
        assert_eq!(set.nr_hw_queues(), 1);
        assert_eq!(set.queue_depth(), 128);
        assert_eq!(set.numa_node(), NUMA_NO_NODE);
        assert!(set.flags().contains(QueueFlags::SHOULD_MERGE));
    }

    #[test]
    fn test_invalid_depth() {
        assert!(TagSet::alloc(0, QueueFlags::empty()).is_err());
        assert!(TagSet::alloc(MAX_QUEUE_DEPTH + 1, QueueFlags::empty()).is_err());
    }

    #[test]
    fn test_depth_is_enforced() {
        let set = TagSet::alloc(70, QueueFlags::empty()).unwrap();
        let tags: Vec<_> = (0..70).map(|_| set.get().unwrap()).collect();
        assert_eq!(set.busy(), 70);
        assert!(set.get().is_none());

        // 标签号唯一
        let mut numbers: Vec<u32> = tags.iter().map(|t| t.tag()).collect();
        numbers.sort_unstable();
        numbers.dedup();
        assert_eq!(numbers.len(), 70);

        drop(tags);
        assert_eq!(set.busy(), 0);
        assert!(set.get().is_some());
    }

    #[test]
    fn test_released_tag_is_reused() {
        let set = TagSet::alloc(2, QueueFlags::empty()).unwrap();
        let a = set.get().unwrap();
        let _b = set.get().unwrap();
        let freed = a.tag();
        drop(a);
        assert_eq!(set.get().unwrap().tag(), freed);
    }

    #[test]
    fn test_wait_idle_returns_when_empty() {
        let set = TagSet::alloc(4, QueueFlags::empty()).unwrap();
        {
            let _t = set.get().unwrap();
            assert_eq!(set.busy(), 1);
        }
        set.wait_idle();
        assert_eq!(set.busy(), 0);
    }
}
