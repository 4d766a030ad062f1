//! 请求分派
//!
//! 逐段执行读写：先做边界检查，再同时操作镜像与后端设备。
//! 每段的后端 I/O 同步完成后才处理下一段，段顺序即持久化顺序。
//!
//! 寻址：游标以字节计，从 `start_sector * SECTOR_SIZE` 开始，
//! 镜像偏移就是游标本身，后端扇区为 `游标 / SECTOR_SIZE`。

use crate::backing::BackingDevice;
use crate::config::ReadPolicy;
use crate::consts::{SECTOR_SHIFT, SECTOR_SIZE};
use crate::error::{Error, ErrorKind, Result};
use crate::relay::{RelayCore, RelayStats};
use crate::request::completion::CompletionOutcome;
use crate::request::{ReqOp, Request};

impl<B: BackingDevice> RelayCore<B> {
    /// 服务一个请求
    ///
    /// 设备未就绪时直接返回 `NotReady`，不接触镜像与后端。
    /// 任一段失败即中止，之前完成的段不回滚，已完成字节照常上报。
    pub fn serve(&self, req: &mut Request) -> CompletionOutcome {
        if !self.is_ready() {
            RelayStats::bump(&self.stats.not_ready, 1);
            log::warn!(
                "[DISPATCH] {} not ready, rejecting request at sector {}",
                self.name,
                req.start_sector()
            );
            return CompletionOutcome::not_ready();
        }

        let op = req.op();
        if op == ReqOp::Flush {
            return self.serve_flush();
        }
        if !op.has_data() {
            RelayStats::bump(&self.stats.io_errors, 1);
            return CompletionOutcome::io_error(0);
        }
        let write = op == ReqOp::Write;

        let start = match req.start_offset() {
            Some(start) => start,
            None => {
                log::warn!("[DISPATCH] sector {} overflows", req.start_sector());
                RelayStats::bump(&self.stats.io_errors, 1);
                return CompletionOutcome::io_error(0);
            }
        };

        log::debug!(
            "[DISPATCH] {} {} sector={} segments={}",
            self.name,
            if write { "write" } else { "read" },
            req.start_sector(),
            req.segments().len()
        );

        // 锁住请求覆盖的区间（越界部分不会被访问）
        let limit = self.capacity_bytes();
        let span_end = start.saturating_add(req.total_bytes());
        let _range = self.ranges.lock(start.min(limit), span_end.min(limit));

        let mut cursor = start;
        let mut transferred: u32 = 0;

        for segment in req.segments_mut() {
            // 已完成字节以 u32 上报，放不下的段在执行前拒绝
            let next = match segment_total(transferred, segment.len()) {
                Some(next) => next,
                None => {
                    log::warn!(
                        "[DISPATCH] {} segment of {} bytes at byte {} too large",
                        self.name,
                        segment.len(),
                        cursor
                    );
                    RelayStats::bump(&self.stats.io_errors, 1);
                    return CompletionOutcome::io_error(transferred);
                }
            };

            match self.serve_segment(write, cursor, segment.data_mut()) {
                Ok(len) => {
                    cursor += len;
                    transferred = next;
                }
                Err(e) => {
                    log::warn!(
                        "[DISPATCH] {} aborted at byte {} after {} bytes: {}",
                        self.name,
                        cursor,
                        transferred,
                        e
                    );
                    RelayStats::bump(&self.stats.io_errors, 1);
                    return CompletionOutcome::io_error(transferred);
                }
            }
        }

        if write {
            RelayStats::bump(&self.stats.writes, 1);
            RelayStats::bump(&self.stats.bytes_written, transferred as u64);
        } else {
            RelayStats::bump(&self.stats.reads, 1);
            RelayStats::bump(&self.stats.bytes_read, transferred as u64);
        }

        CompletionOutcome::ok(transferred)
    }

    /// 处理单个段，返回段长度
    fn serve_segment(&self, write: bool, cursor: u64, data: &mut [u8]) -> Result<u64> {
        let len = data.len() as u64;

        // 边界检查先于任何修改
        cursor
            .checked_add(len)
            .filter(|&end| end <= self.capacity_bytes())
            .ok_or(Error::new(
                ErrorKind::OutOfRange,
                "Segment exceeds device capacity",
            ))?;

        if cursor % SECTOR_SIZE as u64 != 0 {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "Segment does not start on a sector boundary",
            ));
        }

        // cursor + len 不超过镜像长度，因此可以安全转换为 usize
        let offset = cursor as usize;
        let sector = cursor >> SECTOR_SHIFT;

        log::trace!(
            "[DISPATCH] segment sector={} len={} {}",
            sector,
            len,
            if write { "W" } else { "R" }
        );

        if write {
            self.mirror.write(offset, data);
            self.backing.write_sectors(sector, data)?;
        } else {
            self.backing.read_sectors(sector, data)?;
            match self.read_policy {
                ReadPolicy::MirrorOverlay => self.mirror.read(offset, data),
                ReadPolicy::BackingAuthoritative => self.mirror.write(offset, data),
            }
        }

        Ok(len)
    }

    fn serve_flush(&self) -> CompletionOutcome {
        RelayStats::bump(&self.stats.flushes, 1);
        match self.backing.flush() {
            Ok(()) => CompletionOutcome::ok(0),
            Err(e) => {
                log::warn!("[DISPATCH] {} flush failed: {}", self.name, e);
                RelayStats::bump(&self.stats.io_errors, 1);
                CompletionOutcome::io_error(0)
            }
        }
    }
}

/// 累加一段后的已完成字节数，超出 `u32` 时返回 `None`
fn segment_total(transferred: u32, len: usize) -> Option<u32> {
    u32::try_from(len)
        .ok()
        .and_then(|len| transferred.checked_add(len))
}
