//! Deferred destruction of GPU resources.
//!
//! GPU commands execute asynchronously: when a pass stops using an image,
//! frames that were already submitted may still read it. Resources retired
//! through [`GraphicsDevice::drop_resource`](super::GraphicsDevice::drop_resource)
//! therefore go into the bucket of the current frame-in-flight slot and are
//! only released when that slot comes around again and its fence has been
//! waited on.
//!
//! ```text
//!  frame:    0        1        2        3
//!  slot:     0        1        0        1
//!            |        |        |
//!  retire -> [bucket 0]        |
//!                     wait fence of slot 0, flush bucket 0
//! ```
//!
//! The buckets are a fixed ring guarded by one mutex. The ring also owns the
//! frame counter, so "current slot" and "bucket to push into" can never
//! disagree.

use std::any::Any;

use parking_lot::Mutex;

type Retired = Box<dyn Any + Send + Sync>;

struct DeferredState {
    buckets: Vec<Vec<Retired>>,
    frame: u64,
}

/// Fixed ring of per-slot destruction buckets.
pub struct DeferredDestructor {
    state: Mutex<DeferredState>,
}

impl DeferredDestructor {
    /// Create a ring with `slots` buckets (at least one).
    pub fn new(slots: usize) -> Self {
        let slots = slots.max(1);
        Self {
            state: Mutex::new(DeferredState {
                buckets: (0..slots).map(|_| Vec::new()).collect(),
                frame: 0,
            }),
        }
    }

    /// Number of buckets.
    pub fn slot_count(&self) -> usize {
        self.state.lock().buckets.len()
    }

    /// Monotonic frame counter.
    pub fn frame(&self) -> u64 {
        self.state.lock().frame
    }

    /// Slot of the frame being recorded.
    pub fn current_slot(&self) -> usize {
        let state = self.state.lock();
        (state.frame % state.buckets.len() as u64) as usize
    }

    /// Move to the next frame. Nothing is released here.
    pub fn advance(&self) {
        self.state.lock().frame += 1;
    }

    /// Hold `resource` until the current slot is flushed.
    pub fn queue(&self, resource: Retired) {
        let mut state = self.state.lock();
        let slot = (state.frame % state.buckets.len() as u64) as usize;
        state.buckets[slot].push(resource);
    }

    /// Release everything retired while the current slot was last recorded.
    ///
    /// Returns the number of released resources. The resources are dropped
    /// after the lock is released, so their destructors may queue again.
    pub fn flush_current(&self) -> usize {
        let retired = {
            let mut state = self.state.lock();
            let slot = (state.frame % state.buckets.len() as u64) as usize;
            std::mem::take(&mut state.buckets[slot])
        };
        let count = retired.len();
        drop(retired);
        count
    }

    /// Release every bucket. Only valid once the device is idle.
    pub fn flush_all(&self) -> usize {
        let mut total = 0;
        // Dropping a resource may retire another one (a descriptor set
        // holding the last reference to an image), so loop until empty.
        loop {
            let retired: Vec<Retired> = {
                let mut state = self.state.lock();
                state.buckets.iter_mut().flat_map(std::mem::take).collect()
            };
            if retired.is_empty() {
                return total;
            }
            total += retired.len();
            drop(retired);
        }
    }

    /// Number of resources waiting in all buckets.
    pub fn pending_count(&self) -> usize {
        self.state.lock().buckets.iter().map(Vec::len).sum()
    }
}

impl std::fmt::Debug for DeferredDestructor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("DeferredDestructor")
            .field("frame", &state.frame)
            .field("slots", &state.buckets.len())
            .field(
                "pending_count",
                &state.buckets.iter().map(Vec::len).sum::<usize>(),
            )
            .finish()
    }
}
