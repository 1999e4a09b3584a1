//! Cooperative cancellation for bulk operations.
//!
//! Checkpoint files run to tens of gigabytes, so a prune or rescan can take
//! minutes. Bulk loops check a shared `CancelToken` between items and stop
//! early; the item in flight is always finished first, never torn down
//! mid-copy.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Result, StashError};

/// A clonable flag for cooperative cancellation.
///
/// All clones share state; cancelling any clone cancels them all.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a new, un-cancelled token.
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Check whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Clear the cancelled state so the token can be reused.
    ///
    /// Callers must be sure no loop is still honouring the old request.
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    /// Return `Err(StashError::Cancelled)` once cancellation is requested.
    ///
    /// Bulk loops call this between items.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(StashError::Cancelled)
        } else {
            Ok(())
        }
    }
}
