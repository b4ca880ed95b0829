// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Shared resource pool — free-lists of reusable request-side objects.
//!
//! Acquisition is O(1): pop from the free-list, or allocate when empty.
//! Every acquisition returns a guard that releases on drop, so resources
//! come back on every exit path including errors. Release clears the
//! resource's per-request state but keeps its allocations (a reused
//! iterator keeps its file read buffer, a reused filter keeps its compiled
//! pattern).

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{DlsError, Result};
use crate::storage::iterator::{RegexFilter, StepIterator};

#[derive(Default)]
struct FreeLists {
    buffers: Vec<Vec<u8>>,
    iterators: Vec<StepIterator>,
    filters: Vec<RegexFilter>,
    iterators_out: usize,
}

pub struct SharedResources {
    free: Mutex<FreeLists>,
    /// Concurrent iterator bound; 0 = unbounded.
    max_iterators: usize,
}

impl SharedResources {
    pub fn new(max_iterators: usize) -> Self {
        Self {
            free: Mutex::new(FreeLists::default()),
            max_iterators,
        }
    }

    /// Byte buffer for encode scratch. Cleared, capacity preserved.
    pub fn acquire_buffer(self: &Arc<Self>) -> PooledBuffer {
        let buf = self.free.lock().buffers.pop().unwrap_or_default();
        PooledBuffer { pool: self.clone(), buf: Some(buf) }
    }

    /// Step iterator, constructed through `make` when the free-list is
    /// empty. Fails when the configured iterator bound is reached.
    pub fn acquire_iterator(
        self: &Arc<Self>,
        make: impl FnOnce() -> StepIterator,
    ) -> Result<PooledIterator> {
        let mut free = self.free.lock();
        if self.max_iterators != 0 && free.iterators_out >= self.max_iterators {
            return Err(DlsError::ResourceExhausted(format!(
                "{} iterators in use",
                free.iterators_out
            )));
        }
        free.iterators_out += 1;
        let iter = free.iterators.pop();
        drop(free);
        let iter = iter.unwrap_or_else(make);
        Ok(PooledIterator { pool: self.clone(), iter: Some(iter) })
    }

    /// Filter object; ownership passes into the iterator that uses it and
    /// comes back through the iterator's release.
    pub fn acquire_filter(&self) -> RegexFilter {
        self.free.lock().filters.pop().unwrap_or_default()
    }

    fn release_buffer(&self, mut buf: Vec<u8>) {
        buf.clear();
        self.free.lock().buffers.push(buf);
    }

    fn release_iterator(&self, mut iter: StepIterator) {
        let filter = iter.release();
        let mut free = self.free.lock();
        free.iterators_out -= 1;
        free.iterators.push(iter);
        if let Some(filter) = filter {
            free.filters.push(filter);
        }
    }
}

/// Scratch buffer guard; returns the allocation on drop.
pub struct PooledBuffer {
    pool: Arc<SharedResources>,
    buf: Option<Vec<u8>>,
}

impl Deref for PooledBuffer {
    type Target = Vec<u8>;
    fn deref(&self) -> &Vec<u8> {
        self.buf.as_ref().expect("buffer held until drop")
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        self.buf.as_mut().expect("buffer held until drop")
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.release_buffer(buf);
        }
    }
}

/// Iterator guard; releases the iterator (and its filter) on drop.
pub struct PooledIterator {
    pool: Arc<SharedResources>,
    iter: Option<StepIterator>,
}

impl Deref for PooledIterator {
    type Target = StepIterator;
    fn deref(&self) -> &StepIterator {
        self.iter.as_ref().expect("iterator held until drop")
    }
}

impl DerefMut for PooledIterator {
    fn deref_mut(&mut self) -> &mut StepIterator {
        self.iter.as_mut().expect("iterator held until drop")
    }
}

impl Drop for PooledIterator {
    fn drop(&mut self) {
        if let Some(iter) = self.iter.take() {
            self.pool.release_iterator(iter);
        }
    }
}
