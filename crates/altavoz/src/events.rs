//! Pending finished-event queue.
//!
//! The render thread pushes callback ids here when a non-looping stream
//! underflows; the host drains them through `Context::poll_events`. Capacity
//! is fixed up front so the render-side push never allocates; overflow drops
//! the event rather than blocking the audio thread.

use std::collections::VecDeque;
use std::sync::Mutex;

pub(crate) struct EventQueue {
    pending: Mutex<VecDeque<u64>>,
    capacity: usize,
}

impl EventQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            pending: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Queue one finished event. Render-thread safe: bounded critical
    /// section, no allocation.
    pub(crate) fn push(&self, id: u64) {
        let mut pending = self.pending.lock().unwrap();
        if pending.len() < self.capacity {
            pending.push_back(id);
        }
    }

    /// Take every queued event, oldest first.
    pub(crate) fn drain(&self) -> Vec<u64> {
        let mut pending = self.pending.lock().unwrap();
        pending.drain(..).collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}
