// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Step iterator — a resumable cursor over every record of a time range.
//!
//! ```text
//!        ┌──────┐ no bucket ┌──────┐
//!        │ Init ├──────────→│ Done │←──────────── no more buckets
//!        └──┬───┘           └──────┘                    │
//!    bucket │                                  ┌────────┴───────┐
//!           ▼        header ready              │ NeedNextBucket │
//!     ┌────────────┐────────────→┌───────────┐ └────────────────┘
//!     │ WantHeader │             │ WantValue │        ▲
//!     └────────────┘←────────────└───────────┘        │
//!           │        value ready (emit)               │
//!           └──────── corrupt / tail ─────────────────┘
//! ```
//!
//! `next()` never blocks: a pending disk read surfaces as [`Step::Wait`]
//! and the driver suspends on the iterator's waker; a consumed step budget
//! surfaces as [`Step::Cede`] so one long iteration cannot starve other
//! requests. Corrupt headers abandon the bucket with one warning; truncated
//! tails and out-of-window keys are expected and silent.

use std::path::PathBuf;
use std::sync::Arc;

use regex::bytes::Regex;
use tracing::warn;

use crate::error::{DlsError, Result};
use crate::io::executor::IoExecutor;
use crate::io::waker::RequestWaker;
use crate::storage::bucket_file::{BucketFile, Fill};
use crate::storage::framing::{self, FrameError, Framing, RecordHeader, LEGACY_HEADER_SIZE, V1_HEADER_SIZE};
use crate::storage::layout;

/// One observable step of an iteration.
#[derive(Debug)]
pub enum Step {
    /// A record inside the range that passed the filters.
    Record { key: u64, value: Vec<u8> },
    /// A disk read is in flight; wait on the waker, then re-enter.
    Wait,
    /// Step budget consumed; yield to the scheduler, then re-enter.
    Cede,
    /// The range is exhausted.
    Done,
}

enum IterState {
    Init,
    NeedNextBucket,
    WantHeader,
    WantValue,
    Done,
}

/// Optional value filter, pooled and recompiled only when the pattern
/// changes between requests.
pub struct RegexFilter {
    pattern: String,
    regex: Option<Regex>,
}

impl RegexFilter {
    pub fn new() -> Self {
        Self { pattern: String::new(), regex: None }
    }

    pub fn compile(&mut self, pattern: &str) -> Result<()> {
        if self.regex.is_some() && self.pattern == pattern {
            return Ok(());
        }
        self.regex = Some(
            Regex::new(pattern)
                .map_err(|e| DlsError::BadRequest(format!("Invalid filter pattern: {e}")))?,
        );
        self.pattern = pattern.to_string();
        Ok(())
    }

    pub fn matches(&self, value: &[u8]) -> bool {
        self.regex.as_ref().map(|r| r.is_match(value)).unwrap_or(true)
    }
}

impl Default for RegexFilter {
    fn default() -> Self {
        Self::new()
    }
}

pub struct StepIterator {
    exec: Arc<IoExecutor>,
    waker: RequestWaker,
    file: BucketFile,
    state: IterState,
    channel_dir: PathBuf,
    t_lo: u64,
    t_hi: u64,
    filter: Option<RegexFilter>,
    framing: Option<Framing>,
    slot: u64,
    header: Option<RecordHeader>,
    cede_interval: u32,
    steps: u32,
}

impl StepIterator {
    pub fn new(exec: Arc<IoExecutor>, read_buffer: usize, cede_interval: u32) -> Self {
        Self {
            exec,
            waker: RequestWaker::new(),
            file: BucketFile::closed(read_buffer),
            state: IterState::Done,
            channel_dir: PathBuf::new(),
            t_lo: 0,
            t_hi: 0,
            filter: None,
            framing: None,
            slot: 0,
            header: None,
            cede_interval: cede_interval.max(1),
            steps: 0,
        }
    }

    /// Position the cursor before the first record of `[t_lo, t_hi]`.
    pub fn open(&mut self, channel_dir: PathBuf, t_lo: u64, t_hi: u64, filter: Option<RegexFilter>) {
        self.channel_dir = channel_dir;
        self.t_lo = t_lo;
        self.t_hi = t_hi;
        self.filter = filter;
        self.framing = None;
        self.header = None;
        self.slot = 0;
        self.steps = 0;
        self.state = IterState::Init;
    }

    pub fn waker(&self) -> &RequestWaker {
        &self.waker
    }

    /// Advance the state machine until something observable happens.
    pub fn next(&mut self) -> Result<Step> {
        loop {
            self.steps += 1;
            if self.steps >= self.cede_interval {
                self.steps = 0;
                return Ok(Step::Cede);
            }
            match self.state {
                IterState::Init => {
                    match layout::first_bucket_in_range(&self.channel_dir, self.t_lo, self.t_hi)? {
                        Some((path, slot)) => self.enter_bucket(path, slot)?,
                        None => self.state = IterState::Done,
                    }
                }
                IterState::NeedNextBucket => {
                    self.file.close()?;
                    match layout::next_bucket(&self.channel_dir, self.slot, self.t_hi)? {
                        Some((path, slot)) => self.enter_bucket(path, slot)?,
                        None => self.state = IterState::Done,
                    }
                }
                IterState::WantHeader => {
                    if let Some(step) = self.want_header()? {
                        return Ok(step);
                    }
                }
                IterState::WantValue => {
                    if let Some(step) = self.want_value()? {
                        return Ok(step);
                    }
                }
                IterState::Done => return Ok(Step::Done),
            }
        }
    }

    fn enter_bucket(&mut self, path: PathBuf, slot: u64) -> Result<()> {
        self.slot = slot;
        self.framing = None;
        self.header = None;
        match self.file.open_read(&path) {
            Ok(()) => self.state = IterState::WantHeader,
            // The rotation job may compress a bucket away between the
            // directory scan and the open.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.state = IterState::NeedNextBucket;
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    /// One `WantHeader` step. `None` means the machine moved on; the caller
    /// keeps looping.
    fn want_header(&mut self) -> Result<Option<Step>> {
        // Framing detection doubles as the first read of each bucket.
        let framing = match self.framing {
            Some(f) => f,
            None => {
                let probe = V1_HEADER_SIZE.min(self.file.remaining() as usize);
                if probe < LEGACY_HEADER_SIZE {
                    self.state = IterState::NeedNextBucket;
                    return Ok(None);
                }
                match self.file.fill(probe, &self.exec, &self.waker)? {
                    Fill::Wait => return Ok(Some(Step::Wait)),
                    Fill::Tail => {
                        self.state = IterState::NeedNextBucket;
                        return Ok(None);
                    }
                    Fill::Filled => {
                        let f = framing::detect(self.file.peek(probe), self.file.file_length());
                        self.framing = Some(f);
                        f
                    }
                }
            }
        };

        let hsize = framing.header_size();
        if self.file.remaining() < hsize as u64 {
            self.state = IterState::NeedNextBucket;
            return Ok(None);
        }
        match self.file.fill(hsize, &self.exec, &self.waker)? {
            Fill::Wait => return Ok(Some(Step::Wait)),
            Fill::Tail => {
                self.state = IterState::NeedNextBucket;
                return Ok(None);
            }
            Fill::Filled => {}
        }

        match framing.decode_header(self.file.peek(hsize)) {
            Ok(header) => {
                self.file.consume(hsize);
                if header.len > self.file.remaining() {
                    // Declared length overruns the file: a record still
                    // being appended. End of this bucket for now.
                    self.state = IterState::NeedNextBucket;
                    return Ok(None);
                }
                let ts = header.timestamp();
                if !layout::slot_covers(self.slot, ts) || ts < self.t_lo || ts > self.t_hi {
                    self.file.skip(header.len);
                    return Ok(None);
                }
                self.header = Some(header);
                self.state = IterState::WantValue;
                Ok(None)
            }
            Err(FrameError::Corrupt) => {
                warn!(
                    path = ?self.file.path(),
                    offset = self.file.file_pos(),
                    "Corrupt record header, abandoning bucket"
                );
                self.state = IterState::NeedNextBucket;
                Ok(None)
            }
            Err(FrameError::Tail) => {
                self.state = IterState::NeedNextBucket;
                Ok(None)
            }
        }
    }

    fn want_value(&mut self) -> Result<Option<Step>> {
        let header = self.header.expect("value step follows a decoded header");
        let len = header.len as usize;
        match self.file.fill(len, &self.exec, &self.waker)? {
            Fill::Wait => Ok(Some(Step::Wait)),
            Fill::Tail => {
                self.header = None;
                self.state = IterState::NeedNextBucket;
                Ok(None)
            }
            Fill::Filled => {
                let value = self.file.take(len);
                self.header = None;
                self.state = IterState::WantHeader;
                if let Some(filter) = &self.filter {
                    if !filter.matches(&value) {
                        return Ok(None);
                    }
                }
                Ok(Some(Step::Record { key: header.key, value }))
            }
        }
    }

    /// Drive the iteration on the calling thread, waiting on the waker for
    /// pending reads.
    pub fn run_blocking(&mut self, mut emit: impl FnMut(u64, Vec<u8>)) -> Result<()> {
        loop {
            match self.next()? {
                Step::Record { key, value } => emit(key, value),
                Step::Wait => self.waker.wait(),
                Step::Cede => std::thread::yield_now(),
                Step::Done => return Ok(()),
            }
        }
    }

    /// Clear per-request state for pool reuse; allocations are kept.
    /// Returns the filter object so its pool can reclaim it.
    pub(crate) fn release(&mut self) -> Option<RegexFilter> {
        let _ = self.file.close();
        self.header = None;
        self.framing = None;
        self.state = IterState::Done;
        self.steps = 0;
        self.channel_dir.clear();
        self.waker.reset();
        self.filter.take()
    }
}
