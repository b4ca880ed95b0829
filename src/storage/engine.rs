// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Per-channel storage engine — routes writes to the current bucket and
//! hands out iterators that read their own writes.
//!
//! Exactly one bucket file is open for writing per channel at any instant.
//! A record whose timestamp maps to a different bucket window rotates the
//! writer: the old bucket is synced and closed, the new one opened (and its
//! parent slot-group directory created) on demand. Readers are unbounded
//! and run concurrently with the writer; `open_step_iterator` flushes
//! first so a just-written record is visible to the iterator it returns.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::StorageConfig;
use crate::error::{DlsError, Result};
use crate::storage::bucket_file::BucketFile;
use crate::storage::framing::{self, Framing};
use crate::storage::iterator::{RegexFilter, StepIterator};
use crate::storage::layout;
use crate::storage::pool::{PooledBuffer, SharedResources};

/// Engine tuning, derived from [`StorageConfig`].
#[derive(Debug, Clone)]
pub struct StorageOptions {
    pub write_buffer: usize,
    pub read_buffer: usize,
    pub max_value_len: usize,
    pub sync_interval: usize,
    pub cede_interval: u32,
}

impl From<&StorageConfig> for StorageOptions {
    fn from(cfg: &StorageConfig) -> Self {
        Self {
            write_buffer: cfg.write_buffer_kb * 1024,
            read_buffer: cfg.read_buffer_kb * 1024,
            max_value_len: cfg.max_value_len,
            sync_interval: cfg.sync_interval_kb * 1024,
            cede_interval: cfg.cede_interval,
        }
    }
}

struct WriterBucket {
    slot: u64,
    framing: Framing,
    file: BucketFile,
}

pub struct StorageEngine {
    name: String,
    channel_dir: PathBuf,
    opts: StorageOptions,
    writer: Option<WriterBucket>,
    scratch: PooledBuffer,
    /// Best-effort counters, recovered from disk at open and bumped on
    /// every append.
    records: u64,
    bytes: u64,
    unsynced: usize,
}

impl StorageEngine {
    /// Open (or create) the channel directory and recover its counters
    /// from the buckets already on disk.
    pub fn open(
        data_dir: &Path,
        name: &str,
        opts: StorageOptions,
        resources: &Arc<SharedResources>,
    ) -> Result<Self> {
        let channel_dir = data_dir.join(name);
        std::fs::create_dir_all(&channel_dir)
            .map_err(|e| DlsError::Storage(format!("Cannot create channel dir {channel_dir:?}: {e}")))?;
        let (records, bytes) = recover_counters(&channel_dir)?;
        if records > 0 {
            debug!(channel = %name, records, bytes, "Recovered channel counters");
        }
        Ok(Self {
            name: name.to_string(),
            channel_dir,
            opts,
            writer: None,
            scratch: resources.acquire_buffer(),
            records,
            bytes,
            unsynced: 0,
        })
    }

    pub fn channel_dir(&self) -> &Path {
        &self.channel_dir
    }

    /// Append one record. Durable only after [`StorageEngine::flush_data`]
    /// or the periodic sync; visible to iterators opened afterwards.
    pub fn put(&mut self, key: u64, value: &[u8]) -> Result<()> {
        if value.len() > self.opts.max_value_len {
            return Err(DlsError::BadRequest(format!(
                "Value of {} bytes exceeds maximum of {}",
                value.len(),
                self.opts.max_value_len
            )));
        }

        let slot = layout::bucket_slot(layout::key_timestamp(key));
        if self.writer.as_ref().map(|w| w.slot) != Some(slot) {
            self.rotate_to(slot)?;
        }
        let writer = self.writer.as_mut().expect("writer opened by rotation");

        writer.framing.encode_record(key, value, &mut self.scratch);
        writer.file.append(&self.scratch)?;

        self.records += 1;
        self.bytes += self.scratch.len() as u64;
        self.unsynced += self.scratch.len();
        if self.unsynced >= self.opts.sync_interval {
            writer.file.sync_data()?;
            self.unsynced = 0;
        }
        Ok(())
    }

    fn rotate_to(&mut self, slot: u64) -> Result<()> {
        if let Some(mut old) = self.writer.take() {
            old.file.sync_data()?;
            old.file.close()?;
            debug!(channel = %self.name, slot = old.slot, "Writer bucket closed");
        }
        let path = layout::bucket_path(&self.channel_dir, slot);
        // A bucket carries one framing for its whole life. New buckets are
        // v1; appending to a bucket from an older deployment continues in
        // whatever framing the file already has.
        let framing = existing_framing(&path)?;
        let mut file = BucketFile::closed(self.opts.write_buffer);
        file.open_append(&path)
            .map_err(|e| DlsError::Storage(format!("Cannot open bucket {path:?}: {e}")))?;
        info!(channel = %self.name, path = ?path, framing = ?framing, "Bucket opened for writing");
        self.writer = Some(WriterBucket { slot, framing, file });
        Ok(())
    }

    /// Flush the writer's buffer and `fdatasync`. Iterators call this
    /// before their first bucket so reads observe prior writes; it is also
    /// the only durability point stronger than the periodic sync.
    pub fn flush_data(&mut self) -> Result<()> {
        if let Some(writer) = &mut self.writer {
            writer.file.sync_data()?;
        }
        self.unsynced = 0;
        Ok(())
    }

    /// Position `iter` before the first record of `[t_lo, t_hi]`, flushing
    /// first so the iterator reads this engine's own writes.
    pub fn open_step_iterator(
        &mut self,
        iter: &mut StepIterator,
        t_lo: u64,
        t_hi: u64,
        filter: Option<RegexFilter>,
    ) -> Result<()> {
        self.flush_data()?;
        iter.open(self.channel_dir.clone(), t_lo, t_hi, filter);
        Ok(())
    }

    /// Best-effort `(records, bytes)`: the counters recovered at open plus
    /// everything appended since. `bytes` includes headers.
    pub fn channel_size(&self) -> (u64, u64) {
        (self.records, self.bytes)
    }

    /// Flush and close the writer. The engine stays usable; the next put
    /// reopens its bucket.
    pub fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.file.sync_data()?;
            writer.file.close()?;
            debug!(channel = %self.name, "Channel writer closed");
        }
        Ok(())
    }
}

/// Recover `(records, bytes)` by scanning every bucket once, sequentially.
/// Headers are decoded, values seeked over. The scan stops at a truncated
/// tail or a corrupt header exactly like an iterator would, so the count
/// matches what readers can actually see.
fn recover_counters(channel_dir: &Path) -> Result<(u64, u64)> {
    let mut records = 0u64;
    let mut bytes = 0u64;
    let mut cursor = layout::first_bucket_in_range(channel_dir, 0, u32::MAX as u64)?;
    while let Some((path, slot)) = cursor {
        match scan_bucket(&path) {
            Ok((n, len)) => {
                records += n;
                bytes += len;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        cursor = layout::next_bucket(channel_dir, slot, u32::MAX as u64)?;
    }
    Ok((records, bytes))
}

/// Count the decodable records of one bucket and report its size.
fn scan_bucket(path: &Path) -> std::io::Result<(u64, u64)> {
    use std::io::{BufReader, Read, Seek, SeekFrom};

    let file = std::fs::File::open(path)?;
    let len = file.metadata()?.len();
    let mut reader = BufReader::new(file);

    let mut first = [0u8; framing::V1_HEADER_SIZE];
    let mut filled = 0;
    while filled < first.len() {
        match reader.read(&mut first[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    let framing = framing::detect(&first[..filled], len);
    reader.seek(SeekFrom::Start(0))?;

    let hsize = framing.header_size() as u64;
    let mut header = vec![0u8; framing.header_size()];
    let mut pos = 0u64;
    let mut records = 0u64;
    while pos + hsize <= len {
        reader.read_exact(&mut header)?;
        let decoded = match framing.decode_header(&header) {
            Ok(h) => h,
            // Corrupt or short: nothing past this point is readable.
            Err(_) => break,
        };
        if pos + hsize + decoded.len > len {
            break; // Partial record — don't trust.
        }
        reader.seek(SeekFrom::Current(decoded.len as i64))?;
        pos += hsize + decoded.len;
        records += 1;
    }
    Ok((records, len))
}

/// Framing of the bucket at `path`: detected from the first bytes of a
/// non-empty file, v1 for a missing or empty one.
fn existing_framing(path: &Path) -> Result<Framing> {
    use std::io::Read;

    let mut file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Framing::V1),
        Err(e) => return Err(e.into()),
    };
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(Framing::V1);
    }
    let mut first = [0u8; framing::V1_HEADER_SIZE];
    let mut filled = 0;
    while filled < first.len() {
        match file.read(&mut first[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(framing::detect(&first[..filled], len))
}
