// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Single-slot read future.
//!
//! One slot per in-flight read job. The worker side fulfils the slot exactly
//! once; the request side takes the result out exactly once. A request that
//! is cancelled simply drops its future — the worker still fulfils the
//! orphaned slot and the bytes are discarded with it.

use std::io;
use std::sync::Arc;

use parking_lot::Mutex;

enum SlotState {
    Pending,
    Ready(Vec<u8>),
    Failed(io::Error),
    Taken,
}

pub(crate) struct FutureSlot {
    state: Mutex<SlotState>,
}

impl FutureSlot {
    /// Store the read result. Called once by the worker that ran the job.
    pub(crate) fn fulfil(&self, result: io::Result<Vec<u8>>) {
        let mut state = self.state.lock();
        *state = match result {
            Ok(bytes) => SlotState::Ready(bytes),
            Err(e) => SlotState::Failed(e),
        };
    }
}

/// Request-side handle to a pending or completed read.
pub struct ReadFuture {
    slot: Arc<FutureSlot>,
}

impl ReadFuture {
    /// A pending future plus the worker-side slot that resolves it.
    pub(crate) fn pending() -> (Self, Arc<FutureSlot>) {
        let slot = Arc::new(FutureSlot {
            state: Mutex::new(SlotState::Pending),
        });
        (Self { slot: slot.clone() }, slot)
    }

    /// Move the result out. `None` while the job is still running.
    /// Panics if the result was already taken; a slot delivers once.
    pub fn take(&self) -> Option<io::Result<Vec<u8>>> {
        let mut state = self.slot.state.lock();
        match std::mem::replace(&mut *state, SlotState::Taken) {
            SlotState::Pending => {
                *state = SlotState::Pending;
                None
            }
            SlotState::Ready(bytes) => Some(Ok(bytes)),
            SlotState::Failed(e) => Some(Err(e)),
            SlotState::Taken => panic!("read future consumed twice"),
        }
    }
}
