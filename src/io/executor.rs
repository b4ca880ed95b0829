// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! I/O executor — a fixed pool of worker threads draining a shared queue of
//! positional reads.
//!
//! ```text
//! request A ─┐
//! request B ─┤   crossbeam      ┌─ io-worker-0 ─ pread → fulfil slot → wake
//! request C ─┼──→ channel ──────┼─ io-worker-1 ─ …
//! ...        ─┘                 └─ io-worker-N ─ …
//! ```
//!
//! Workers never touch request state beyond the job's own future slot and
//! waker, so requests and workers need no further synchronisation.

use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, warn};

use crate::io::future::FutureSlot;
use crate::io::waker::RequestWaker;

/// One positional read to execute on a worker thread.
pub(crate) struct ReadJob {
    pub file: Arc<File>,
    pub offset: u64,
    pub len: usize,
    pub slot: Arc<FutureSlot>,
    pub waker: RequestWaker,
}

pub struct IoExecutor {
    tx: Option<Sender<ReadJob>>,
    workers: Vec<JoinHandle<()>>,
}

impl IoExecutor {
    /// Spawn `workers` threads servicing the shared job queue.
    pub fn new(workers: usize) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded::<ReadJob>();
        let handles = (0..workers.max(1))
            .map(|i| {
                let rx = rx.clone();
                std::thread::Builder::new()
                    .name(format!("dls-io-{i}"))
                    .spawn(move || worker_loop(rx))
                    .expect("spawn io worker")
            })
            .collect();
        Self { tx: Some(tx), workers: handles }
    }

    /// Enqueue a job. The job's future is fulfilled and its waker invoked
    /// even when the executor is already shutting down.
    pub(crate) fn submit(&self, job: ReadJob) {
        let tx = self.tx.as_ref().expect("executor running");
        if let Err(send_err) = tx.send(job) {
            let job = send_err.into_inner();
            warn!("I/O executor is shut down, failing read job");
            job.slot.fulfil(Err(io::Error::new(
                io::ErrorKind::Other,
                "I/O executor shut down",
            )));
            job.waker.wake();
        }
    }
}

impl Drop for IoExecutor {
    fn drop(&mut self) {
        // Closing the channel lets every worker drain and exit.
        self.tx.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(rx: Receiver<ReadJob>) {
    for job in rx.iter() {
        let result = read_at_most(&job.file, job.offset, job.len);
        if let Err(e) = &result {
            debug!(offset = job.offset, len = job.len, error = %e, "Background read failed");
        }
        job.slot.fulfil(result);
        job.waker.wake();
    }
}

/// Read up to `len` bytes at `offset`, retrying interrupted syscalls.
/// Fewer bytes than requested means the file ended first.
fn read_at_most(file: &File, offset: u64, len: usize) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    let mut done = 0usize;
    while done < len {
        match file.read_at(&mut buf[done..], offset + done as u64) {
            Ok(0) => break,
            Ok(n) => done += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    buf.truncate(done);
    Ok(buf)
}
