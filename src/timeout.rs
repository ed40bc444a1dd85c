//! Timeout bookkeeping for behaviors.
//!
//! An actor can have many scheduled timeout messages in flight but only
//! the most recently requested one is *active*. Delivered timeouts carry
//! their id; anything but the active id is stale and dropped. Any
//! behavior change invalidates the active timeout, so handlers never see
//! a timeout that belonged to a superseded behavior.

/// Monotonic timeout id allocator plus the single active id.
#[derive(Debug, Default)]
pub(crate) struct TimeoutRegistry {
    next_id: u64,
    active: Option<u64>,
}

impl TimeoutRegistry {
    /// Allocate a fresh id and make it the active timeout.
    pub(crate) fn request(&mut self) -> u64 {
        self.next_id += 1;
        self.active = Some(self.next_id);
        self.next_id
    }

    /// Invalidate the active timeout (called on every behavior change).
    pub(crate) fn invalidate(&mut self) {
        self.active = None;
    }

    /// `true` when `id` is the active timeout.
    pub(crate) fn is_active(&self, id: u64) -> bool {
        self.active == Some(id)
    }

    /// `true` when a timeout is scheduled and not yet consumed.
    pub(crate) fn has_active(&self) -> bool {
        self.active.is_some()
    }

    /// Mark the active timeout as fired.
    pub(crate) fn consume(&mut self, id: u64) {
        if self.active == Some(id) {
            self.active = None;
        }
    }
}
