//! Cooperative cancellation shared between the orchestrator and workers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{FocusError, FocusResult};

/// A cloneable cancellation signal.
///
/// Every clone observes the same flag. Long-running loops poll it with
/// [`CancelFlag::check`] and bail out with [`FocusError::Cancelled`].
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    inner: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.inner.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once cancellation has been requested.
    pub fn check(&self) -> FocusResult<()> {
        if self.is_cancelled() {
            Err(FocusError::Cancelled)
        } else {
            Ok(())
        }
    }
}
