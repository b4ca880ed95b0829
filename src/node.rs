// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Node facade — the operations the protocol layer calls.
//!
//! Owns the channel registry, the I/O executor, and the shared resource
//! pool as explicitly passed context; nothing here is a process-wide
//! singleton. Reads hand out [`ChannelIterator`]s, usable either from a
//! dedicated thread (`run_blocking`) or as an async stream.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Notify;
use tracing::info;

use crate::config::Config;
use crate::error::{DlsError, Result};
use crate::io::executor::IoExecutor;
use crate::redistribute::{select_peer, PeerSink, RedistributeStats};
use crate::storage::engine::StorageOptions;
use crate::storage::iterator::{Step, StepIterator};
use crate::storage::pool::{PooledIterator, SharedResources};
use crate::storage::registry::StorageChannels;

/// One stored record as handed to clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: u64,
    pub value: Bytes,
}

pub struct DlsNode {
    channels: StorageChannels,
    resources: Arc<SharedResources>,
    executor: Arc<IoExecutor>,
    opts: StorageOptions,
}

impl DlsNode {
    /// Open the storage node described by `config`.
    pub fn open(config: &Config) -> Result<Self> {
        let opts = StorageOptions::from(&config.storage);
        let resources = Arc::new(SharedResources::new(config.storage.max_iterators));
        let executor = Arc::new(IoExecutor::new(config.storage.io_workers));
        let channels = StorageChannels::open(
            config.node.data_dir.clone(),
            opts.clone(),
            resources.clone(),
        )?;
        info!(
            data_dir = ?config.node.data_dir,
            io_workers = config.storage.io_workers,
            "Storage node opened"
        );
        Ok(Self { channels, resources, executor, opts })
    }

    /// Static version string.
    pub fn get_version() -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    /// Append one record, creating the channel on first use.
    pub fn put(&self, channel: &str, key: u64, value: &[u8]) -> Result<()> {
        let engine = self.channels.get_or_create(channel)?;
        let mut engine = engine.lock();
        engine.put(key, value)
    }

    /// Append many records under one engine lock.
    pub fn put_batch(&self, channel: &str, records: &[Record]) -> Result<()> {
        let engine = self.channels.get_or_create(channel)?;
        let mut engine = engine.lock();
        for record in records {
            engine.put(record.key, &record.value)?;
        }
        Ok(())
    }

    /// Iterator over every record of `channel`, in bucket order.
    /// `None` when the channel does not exist.
    pub fn get_all(&self, channel: &str) -> Result<Option<ChannelIterator>> {
        self.open_iterator(channel, 0, u32::MAX as u64, None)
    }

    /// Iterator over records with `t_lo <= ts(key) <= t_hi`.
    pub fn get_range(&self, channel: &str, t_lo: u64, t_hi: u64) -> Result<Option<ChannelIterator>> {
        self.open_iterator(channel, t_lo, t_hi, None)
    }

    /// As [`DlsNode::get_range`], additionally filtered by a regular
    /// expression over the value bytes.
    pub fn get_range_filter(
        &self,
        channel: &str,
        t_lo: u64,
        t_hi: u64,
        pattern: &str,
    ) -> Result<Option<ChannelIterator>> {
        self.open_iterator(channel, t_lo, t_hi, Some(pattern))
    }

    fn open_iterator(
        &self,
        channel: &str,
        t_lo: u64,
        t_hi: u64,
        pattern: Option<&str>,
    ) -> Result<Option<ChannelIterator>> {
        if t_lo > t_hi {
            return Err(DlsError::BadRequest(format!(
                "Empty time range {t_lo}..{t_hi}"
            )));
        }
        let Some(engine) = self.channels.get(channel)? else {
            return Ok(None);
        };

        let filter = match pattern {
            Some(p) => {
                let mut filter = self.resources.acquire_filter();
                filter.compile(p)?;
                Some(filter)
            }
            None => None,
        };

        let exec = self.executor.clone();
        let opts = &self.opts;
        let mut iter = self.resources.acquire_iterator(|| {
            StepIterator::new(exec, opts.read_buffer, opts.cede_interval)
        })?;
        engine.lock().open_step_iterator(&mut iter, t_lo, t_hi, filter)?;
        Ok(Some(ChannelIterator { iter }))
    }

    /// Best-effort `(records, bytes)`; zeros for an absent channel.
    pub fn get_channel_size(&self, channel: &str) -> Result<(u64, u64)> {
        match self.channels.get(channel)? {
            Some(engine) => Ok(engine.lock().channel_size()),
            None => Ok((0, 0)),
        }
    }

    /// Close and delete a channel. Returns whether it existed.
    pub fn remove_channel(&self, channel: &str) -> Result<bool> {
        self.channels.remove(channel)
    }

    pub fn channel_names(&self) -> Result<Vec<String>> {
        self.channels.names()
    }

    /// Hand approximately `fraction` of all records to `peers`, chosen by
    /// a deterministic key hash. Contract only — the peer transport is the
    /// caller's concern, and nothing is deleted locally.
    pub fn redistribute(
        &self,
        peers: &mut [&mut dyn PeerSink],
        fraction: f64,
    ) -> Result<RedistributeStats> {
        if !(fraction > 0.0 && fraction <= 1.0) {
            return Err(DlsError::BadRequest(format!(
                "Redistribution fraction {fraction} outside (0, 1]"
            )));
        }
        if peers.is_empty() {
            return Err(DlsError::BadRequest("No redistribution peers".into()));
        }

        let mut stats = RedistributeStats::default();
        for name in self.channel_names()? {
            let Some(mut iter) = self.get_all(&name)? else { continue };
            stats.channels += 1;
            loop {
                match iter.next_step()? {
                    Step::Record { key, value } => {
                        if let Some(idx) = select_peer(key, fraction, peers.len()) {
                            peers[idx].send(&name, key, &value)?;
                            stats.records += 1;
                            stats.bytes += value.len() as u64;
                        }
                    }
                    Step::Wait => iter.wait(),
                    Step::Cede => std::thread::yield_now(),
                    Step::Done => break,
                }
            }
        }
        info!(
            channels = stats.channels,
            records = stats.records,
            bytes = stats.bytes,
            "Redistribution pass complete"
        );
        Ok(stats)
    }

    /// Flush all channels and stop the I/O workers.
    pub fn shutdown(self) {
        self.channels.shutdown();
        drop(self.executor);
        info!("Storage node shut down");
    }
}

/// A pooled iteration over one channel. Dropping it returns the iterator
/// (and its filter) to the resource pool and closes any open bucket.
pub struct ChannelIterator {
    iter: PooledIterator,
}

impl std::fmt::Debug for ChannelIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelIterator").finish()
    }
}

impl ChannelIterator {
    /// Advance to the next observable step. See [`Step`].
    pub fn next_step(&mut self) -> Result<Step> {
        self.iter.next()
    }

    /// Block the calling thread until the pending read completes.
    pub fn wait(&self) {
        self.iter.waker().wait();
    }

    /// Drive the whole iteration on the calling thread.
    pub fn run_blocking(&mut self, emit: impl FnMut(u64, Vec<u8>)) -> Result<()> {
        self.iter.run_blocking(emit)
    }

    /// Collect the whole iteration. Convenience for tools and tests.
    pub fn collect_blocking(&mut self) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        self.run_blocking(|key, value| {
            records.push(Record { key, value: Bytes::from(value) })
        })?;
        Ok(records)
    }

    /// Consume the iterator as an async stream. Pending reads suspend the
    /// task instead of the thread; the step budget yields to the runtime.
    pub fn into_stream(mut self) -> impl tokio_stream::Stream<Item = Result<Record>> + Send {
        let notify = Arc::new(Notify::new());
        {
            let notify = notify.clone();
            self.iter.waker().set_hook(move || notify.notify_one());
        }
        async_stream::try_stream! {
            loop {
                match self.iter.next()? {
                    Step::Record { key, value } => {
                        yield Record { key, value: Bytes::from(value) };
                    }
                    Step::Wait => notify.notified().await,
                    Step::Cede => tokio::task::yield_now().await,
                    Step::Done => break,
                }
            }
        }
    }
}
