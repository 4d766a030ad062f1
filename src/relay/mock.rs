//! 测试用内存后端

use crate::backing::{BackingDevice, BackingOpener};
use crate::config::ReadPolicy;
use crate::consts::{DEFAULT_QUEUE_DEPTH, SECTOR_SIZE};
use crate::error::{Error, ErrorKind, Result};
use crate::mirror::MirrorBuffer;
use crate::queue::{QueueFlags, TagSet};
use crate::relay::RelayCore;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use spin::Mutex;

const NO_FAULT: u64 = u64::MAX;

struct MockState {
    capacity_sectors: u64,
    storage: Mutex<Vec<u8>>,
    reads: AtomicU32,
    writes: AtomicU32,
    flushes: AtomicU32,
    write_log: Mutex<Vec<u64>>,
    fail_write_sector: AtomicU64,
    fail_read_sector: AtomicU64,
    closed: AtomicU32,
}

/// 内存后端，克隆体共享同一份状态，便于在设备被移走后继续观察
#[derive(Clone)]
pub(crate) struct MockBacking {
    state: Arc<MockState>,
}

impl MockBacking {
    pub(crate) fn new(capacity_sectors: u64) -> Self {
        Self {
            state: Arc::new(MockState {
                capacity_sectors,
                storage: Mutex::new(vec![0u8; (capacity_sectors * SECTOR_SIZE as u64) as usize]),
                reads: AtomicU32::new(0),
                writes: AtomicU32::new(0),
                flushes: AtomicU32::new(0),
                write_log: Mutex::new(Vec::new()),
                fail_write_sector: AtomicU64::new(NO_FAULT),
                fail_read_sector: AtomicU64::new(NO_FAULT),
                closed: AtomicU32::new(0),
            }),
        }
    }

    pub(crate) fn bytes(&self, offset: usize, len: usize) -> Vec<u8> {
        self.state.storage.lock()[offset..offset + len].to_vec()
    }

    pub(crate) fn fill(&self, offset: usize, len: usize, byte: u8) {
        self.state.storage.lock()[offset..offset + len].fill(byte);
    }

    pub(crate) fn fail_writes_at(&self, sector: u64) {
        self.state.fail_write_sector.store(sector, Ordering::SeqCst);
    }

    pub(crate) fn fail_reads_at(&self, sector: u64) {
        self.state.fail_read_sector.store(sector, Ordering::SeqCst);
    }

    pub(crate) fn read_calls(&self) -> u32 {
        self.state.reads.load(Ordering::SeqCst)
    }

    pub(crate) fn write_calls(&self) -> u32 {
        self.state.writes.load(Ordering::SeqCst)
    }

    pub(crate) fn flush_calls(&self) -> u32 {
        self.state.flushes.load(Ordering::SeqCst)
    }

    pub(crate) fn close_calls(&self) -> u32 {
        self.state.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn write_sectors_log(&self) -> Vec<u64> {
        self.state.write_log.lock().clone()
    }
}

impl BackingDevice for MockBacking {
    fn capacity_sectors(&self) -> u64 {
        self.state.capacity_sectors
    }

    fn read_sectors(&self, sector: u64, buf: &mut [u8]) -> Result<usize> {
        self.state.reads.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_read_sector.load(Ordering::SeqCst) == sector {
            return Err(Error::new(ErrorKind::Io, "injected read failure"));
        }
        let start = (sector * SECTOR_SIZE as u64) as usize;
        buf.copy_from_slice(&self.state.storage.lock()[start..start + buf.len()]);
        Ok(buf.len())
    }

    fn write_sectors(&self, sector: u64, buf: &[u8]) -> Result<usize> {
        self.state.writes.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_write_sector.load(Ordering::SeqCst) == sector {
            return Err(Error::new(ErrorKind::Io, "injected write failure"));
        }
        let start = (sector * SECTOR_SIZE as u64) as usize;
        self.state.storage.lock()[start..start + buf.len()].copy_from_slice(buf);
        self.state.write_log.lock().push(sector);
        Ok(buf.len())
    }

    fn flush(&self) -> Result<()> {
        self.state.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.state.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// 返回预置后端的打开器
pub(crate) struct MockOpener {
    backing: MockBacking,
    fail: Option<ErrorKind>,
    opens: AtomicU32,
    last_path: Mutex<Option<String>>,
}

impl MockOpener {
    pub(crate) fn new(backing: MockBacking) -> Self {
        Self {
            backing,
            fail: None,
            opens: AtomicU32::new(0),
            last_path: Mutex::new(None),
        }
    }

    pub(crate) fn failing(kind: ErrorKind) -> Self {
        Self {
            fail: Some(kind),
            ..Self::new(MockBacking::new(0))
        }
    }

    pub(crate) fn open_calls(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }

    pub(crate) fn last_path(&self) -> Option<String> {
        self.last_path.lock().clone()
    }
}

impl BackingOpener for MockOpener {
    type Device = MockBacking;

    fn open(&self, path: &str) -> Result<MockBacking> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        *self.last_path.lock() = Some(path.to_string());
        if let Some(kind) = self.fail {
            return Err(Error::new(kind, "injected open failure"));
        }
        Ok(self.backing.clone())
    }
}

/// 组装一个已就绪的共享状态
pub(crate) fn core_with(backing: MockBacking, policy: ReadPolicy) -> RelayCore<MockBacking> {
    let mirror = MirrorBuffer::allocate(backing.capacity_sectors() * SECTOR_SIZE as u64).unwrap();
    let tags = TagSet::alloc(DEFAULT_QUEUE_DEPTH, QueueFlags::SHOULD_MERGE).unwrap();
    let core = RelayCore::new("relay0".to_string(), backing, mirror, tags, policy);
    core.set_ready(true);
    core
}
