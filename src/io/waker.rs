// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Resumption token shared between one request and the I/O workers.
//!
//! A waker belongs to exactly one request at a time. The worker that
//! completes a read calls [`RequestWaker::wake`] once; the request either
//! blocks on [`RequestWaker::wait`] (thread-per-request drivers) or has
//! installed a hook that nudges its task scheduler (async drivers).

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

type WakeHook = Box<dyn Fn() + Send + Sync>;

struct WakerInner {
    woken: Mutex<bool>,
    cond: Condvar,
    hook: Mutex<Option<WakeHook>>,
}

/// Cloneable handle; clones share the same wake state.
#[derive(Clone)]
pub struct RequestWaker {
    inner: Arc<WakerInner>,
}

impl RequestWaker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(WakerInner {
                woken: Mutex::new(false),
                cond: Condvar::new(),
                hook: Mutex::new(None),
            }),
        }
    }

    /// Signal the owning request. Safe to call from any thread; a request
    /// that was dropped simply never observes the signal.
    pub fn wake(&self) {
        {
            let mut woken = self.inner.woken.lock();
            *woken = true;
            self.inner.cond.notify_all();
        }
        if let Some(hook) = self.inner.hook.lock().as_ref() {
            hook();
        }
    }

    /// Block the calling thread until woken, then clear the flag.
    /// Returns immediately if a wake already arrived.
    pub fn wait(&self) {
        let mut woken = self.inner.woken.lock();
        while !*woken {
            self.inner.cond.wait(&mut woken);
        }
        *woken = false;
    }

    /// Install a callback invoked on every wake. Used by async drivers to
    /// bridge into their scheduler's notification primitive.
    pub fn set_hook(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.inner.hook.lock() = Some(Box::new(hook));
    }

    /// Clear per-request state so the waker can serve the next request.
    pub fn reset(&self) {
        *self.inner.woken.lock() = false;
        *self.inner.hook.lock() = None;
    }
}

impl Default for RequestWaker {
    fn default() -> Self {
        Self::new()
    }
}
