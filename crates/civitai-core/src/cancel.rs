//! Ctrl-C propagation.
//!
//! The CLI holds one [`CancellationToken`] per run and trips it from its
//! signal handler. Batches poll it between jobs; downloads and retry pauses
//! race their awaits against [`CancellationToken::cancelled`].

use crate::error::{CivitaiError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::debug;

/// Run-wide stop flag; every clone observes the same state.
///
/// ```
/// use civitai_core::cancel::CancellationToken;
///
/// let run = CancellationToken::new();
/// let download = run.clone();
///
/// run.cancel();
/// assert!(download.check().is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    shared: Arc<Shared>,
}

#[derive(Debug, Default)]
struct Shared {
    tripped: AtomicBool,
    wake: Notify,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trip the flag and wake every waiter. Later calls are no-ops.
    pub fn cancel(&self) {
        if !self.shared.tripped.swap(true, Ordering::SeqCst) {
            debug!("Cancellation requested");
            self.shared.wake.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.tripped.load(Ordering::SeqCst)
    }

    /// `Err(DownloadCancelled)` once the flag is tripped.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(CivitaiError::DownloadCancelled);
        }
        Ok(())
    }

    /// Resolves once the token is cancelled; immediately if it already is.
    pub async fn cancelled(&self) {
        while !self.is_cancelled() {
            // Registered before the re-check, so a cancel in between still wakes us.
            let woken = self.shared.wake.notified();
            if self.is_cancelled() {
                break;
            }
            woken.await;
        }
    }
}
