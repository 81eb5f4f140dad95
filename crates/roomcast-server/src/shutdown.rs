//! Gateway shutdown.
//!
//! One [`CancellationToken`] is shared by the listener and every socket
//! session. [`ShutdownCoordinator::begin`] trips it; sessions then send a
//! close frame and purge their memberships on the way out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long [`ShutdownCoordinator::drain`] waits when no timeout is given.
const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of a drain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrainOutcome {
    /// Tasks that finished in time.
    pub finished: usize,
    /// Tasks aborted at the deadline.
    pub abandoned: usize,
}

/// Stop signal for the gateway.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    begun: AtomicBool,
}

impl ShutdownCoordinator {
    /// Not yet triggered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Token that fires on shutdown.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Start shutting down. Later calls are no-ops.
    pub fn begin(&self, reason: &str) {
        if !self.begun.swap(true, Ordering::AcqRel) {
            info!(reason, "gateway shutdown started");
        }
        self.token.cancel();
    }

    /// Whether new sockets should be refused.
    pub fn is_draining(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Begin shutdown, then wait up to `timeout` for `handles`. Stragglers are
    /// aborted.
    pub async fn drain(&self, handles: Vec<JoinHandle<()>>, timeout: Option<Duration>) -> DrainOutcome {
        self.begin("drain requested");
        let timeout = timeout.unwrap_or(DEFAULT_DRAIN_TIMEOUT);
        let deadline = tokio::time::Instant::now() + timeout;
        let mut outcome = DrainOutcome {
            finished: 0,
            abandoned: 0,
        };
        for mut handle in handles {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_ok() {
                outcome.finished += 1;
            } else {
                handle.abort();
                outcome.abandoned += 1;
            }
        }
        if outcome.abandoned > 0 {
            warn!(abandoned = outcome.abandoned, ?timeout, "tasks still running at shutdown deadline");
        }
        outcome
    }
}
