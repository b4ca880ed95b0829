// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! One open bucket file — append-only writes, buffered positional reads.
//!
//! A reader captures the file length at open and only ever observes bytes
//! below it; a record appended after that point belongs to the next reader.
//! Reads go through an in-memory window refilled by the I/O executor:
//! [`BucketFile::fill`] either satisfies the request from the window,
//! reports `Tail` when the file logically ends first, or submits a
//! background read and reports `Wait`.
//!
//! The append side buffers whole records only: [`BucketFile::append`] is
//! called once per preformatted record, so flushing can never split a
//! record across a buffer boundary.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{DlsError, Result};
use crate::io::executor::{IoExecutor, ReadJob};
use crate::io::future::ReadFuture;
use crate::io::waker::RequestWaker;

/// Outcome of a [`BucketFile::fill`] request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fill {
    /// The requested bytes are buffered; `peek`/`take` will succeed.
    Filled,
    /// A background read was submitted; re-enter after the waker fires.
    Wait,
    /// The file ends before the requested bytes — a truncated tail.
    Tail,
}

pub struct BucketFile {
    path: PathBuf,
    file: Option<Arc<File>>,
    /// File length visible to this handle. Captured at open for readers;
    /// tracks logical (buffered) length for writers.
    len: u64,
    /// Absolute offset of the first unconsumed byte (`buf[0]`).
    pos: u64,
    /// Unconsumed read window.
    buf: Vec<u8>,
    buf_capacity: usize,
    pending: Option<ReadFuture>,
    /// Pending output, whole records only.
    out: Vec<u8>,
    out_capacity: usize,
}

impl BucketFile {
    /// A closed instance; buffers are allocated lazily and survive
    /// close/open cycles so pooled owners keep their capacity.
    pub fn closed(buffer_bytes: usize) -> Self {
        Self {
            path: PathBuf::new(),
            file: None,
            len: 0,
            pos: 0,
            buf: Vec::new(),
            buf_capacity: buffer_bytes,
            pending: None,
            out: Vec::new(),
            out_capacity: buffer_bytes,
        }
    }

    /// Open `path` for reading and capture its current length.
    pub fn open_read(&mut self, path: &Path) -> io::Result<()> {
        self.reset_window();
        let file = retry_interrupted(|| File::open(path))?;
        self.len = file.metadata()?.len();
        self.pos = 0;
        self.file = Some(Arc::new(file));
        self.path = path.to_path_buf();
        Ok(())
    }

    /// Open `path` for appending, creating missing parent directories.
    pub fn open_append(&mut self, path: &Path) -> io::Result<()> {
        self.reset_window();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = retry_interrupted(|| {
            OpenOptions::new().create(true).append(true).open(path)
        })?;
        self.len = file.metadata()?.len();
        self.pos = self.len;
        self.file = Some(Arc::new(file));
        self.path = path.to_path_buf();
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Offset of the next unconsumed byte.
    pub fn file_pos(&self) -> u64 {
        self.pos
    }

    pub fn file_length(&self) -> u64 {
        self.len
    }

    /// Unconsumed bytes left below the captured length.
    pub fn remaining(&self) -> u64 {
        self.len.saturating_sub(self.pos)
    }

    // ───────────────────────── read side ─────────────────────────────────

    /// Ensure at least `n` bytes are buffered at the current position.
    pub fn fill(&mut self, n: usize, exec: &IoExecutor, waker: &RequestWaker) -> Result<Fill> {
        // Integrate a completed background read first.
        if let Some(future) = &self.pending {
            match future.take() {
                None => return Ok(Fill::Wait),
                Some(Ok(bytes)) => {
                    self.pending = None;
                    if bytes.is_empty() {
                        // The file is shorter than its captured length
                        // claimed; treat like a truncated tail.
                        return Ok(Fill::Tail);
                    }
                    self.buf.extend_from_slice(&bytes);
                }
                Some(Err(e)) => {
                    self.pending = None;
                    return Err(DlsError::Io(e));
                }
            }
        }

        if self.buf.len() >= n {
            return Ok(Fill::Filled);
        }

        let fetch_from = self.pos + self.buf.len() as u64;
        let missing = n - self.buf.len();
        if self.len.saturating_sub(fetch_from) < missing as u64 {
            return Ok(Fill::Tail);
        }

        let file = self.file.as_ref().expect("bucket open for reading").clone();
        let want = missing
            .max(self.buf_capacity)
            .min((self.len - fetch_from) as usize);
        let (future, slot) = ReadFuture::pending();
        exec.submit(ReadJob {
            file,
            offset: fetch_from,
            len: want,
            slot,
            waker: waker.clone(),
        });
        self.pending = Some(future);
        Ok(Fill::Wait)
    }

    /// Borrow the first `n` buffered bytes without consuming them.
    /// Only valid after `fill(n)` returned `Filled`.
    pub fn peek(&self, n: usize) -> &[u8] {
        &self.buf[..n]
    }

    /// Consume `n` buffered bytes.
    pub fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.buf.len());
        self.buf.drain(..n);
        self.pos += n as u64;
    }

    /// Copy out and consume `n` buffered bytes.
    pub fn take(&mut self, n: usize) -> Vec<u8> {
        let out = self.buf[..n].to_vec();
        self.consume(n);
        out
    }

    /// Advance past `n` bytes without reading them. Positional reads make
    /// this free — anything beyond the buffer is simply never fetched.
    pub fn skip(&mut self, n: u64) {
        let buffered = (self.buf.len() as u64).min(n) as usize;
        self.buf.drain(..buffered);
        if n > buffered as u64 {
            self.buf.clear();
        }
        self.pos += n;
    }

    // ───────────────────────── append side ───────────────────────────────

    /// Append one preformatted record. Buffered until `out_capacity` would
    /// overflow, so the on-disk tail always ends at a record boundary or
    /// inside the record currently being written.
    pub fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        if !self.out.is_empty() && self.out.len() + bytes.len() > self.out_capacity {
            self.flush()?;
        }
        if bytes.len() >= self.out_capacity {
            self.write_through(bytes)?;
        } else {
            self.out.extend_from_slice(bytes);
        }
        self.len += bytes.len() as u64;
        Ok(())
    }

    /// Push buffered output to the OS.
    pub fn flush(&mut self) -> io::Result<()> {
        if !self.out.is_empty() {
            let out = std::mem::take(&mut self.out);
            self.write_through(&out)?;
            self.out = out;
            self.out.clear();
        }
        Ok(())
    }

    /// Flush and `fdatasync`.
    pub fn sync_data(&mut self) -> io::Result<()> {
        self.flush()?;
        if let Some(file) = &self.file {
            retry_interrupted(|| file.sync_data())?;
        }
        Ok(())
    }

    fn write_through(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut file: &File = self.file.as_ref().expect("bucket open for appending");
        // write_all already retries interrupted syscalls.
        file.write_all(bytes)
    }

    /// Flush pending output and drop the descriptor. Buffers keep their
    /// capacity for the next open.
    pub fn close(&mut self) -> io::Result<()> {
        if self.file.is_some() {
            self.flush()?;
        }
        self.file = None;
        self.reset_window();
        Ok(())
    }

    fn reset_window(&mut self) {
        self.buf.clear();
        self.out.clear();
        self.pending = None;
        self.pos = 0;
        self.len = 0;
    }
}

impl Drop for BucketFile {
    fn drop(&mut self) {
        if self.file.is_some() {
            let _ = self.flush();
        }
    }
}

fn retry_interrupted<T>(mut op: impl FnMut() -> io::Result<T>) -> io::Result<T> {
    loop {
        match op() {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}
