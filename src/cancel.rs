//! Cooperative cancellation for a running conversion.
//!
//! A [`CancelToken`] is checked before each page is scheduled. Pages already
//! in flight are abandoned when the driver stops polling them, and the
//! Assembler rolls back whatever the run had stored, so cancelling never
//! leaves a truncated Markdown file behind.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared flag; clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
