//! Single-flight credential refresh.
//!
//! # Design
//! - One mutex guards both the in-flight flag and the waiter list; it is
//!   never held across an await.
//! - The first caller becomes the leader and runs the refresh operation;
//!   callers arriving while it runs enqueue a oneshot and suspend.
//! - The leader settles every waiter exactly once with the one outcome of its
//!   refresh. A hung refresh is cut off by the coordinator's timeout.
//! - If the leader is cancelled mid-refresh, waiters are released with
//!   [`RefreshFailure::Abandoned`] and re-enter; one of them takes over.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::transport::TransportError;

/// Result of one refresh: the new access credential or why none exists.
pub type RefreshOutcome = Result<String, RefreshFailure>;

/// Why a refresh produced no credential.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefreshFailure {
    /// The session holds no refresh credential.
    #[error("no refresh credential available")]
    MissingCredential,
    /// The server rejected the refresh credential.
    #[error("refresh credential rejected")]
    Rejected {
        /// Response status.
        status: u16,
    },
    /// The refresh endpoint answered with a server-side failure.
    #[error("refresh endpoint unavailable")]
    Unavailable {
        /// Response status.
        status: u16,
    },
    /// The refresh call failed in transport.
    #[error("refresh request failed")]
    Transport(#[source] TransportError),
    /// The refresh did not settle within the configured timeout.
    #[error("refresh timed out")]
    TimedOut,
    /// The leading caller was cancelled before the refresh settled.
    #[error("refresh abandoned")]
    Abandoned,
    /// The refresh response did not carry a usable grant.
    #[error("refresh response is not a usable grant")]
    MalformedGrant,
    /// The session changed while the refresh ran, by sign-out here or
    /// elsewhere or by a newer grant; the refreshed grant was discarded.
    #[error("session changed during refresh")]
    Superseded,
    /// The refreshed session could not be persisted.
    #[error("refreshed session could not be persisted")]
    Persist {
        /// Rendered persistence error.
        detail: String,
    },
}

impl RefreshFailure {
    /// Whether the failure says nothing about the refresh credential itself.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Transport(error) => error.is_transient(),
            Self::Unavailable { .. } | Self::TimedOut | Self::Abandoned => true,
            Self::MissingCredential
            | Self::Rejected { .. }
            | Self::MalformedGrant
            | Self::Superseded
            | Self::Persist { .. } => false,
        }
    }
}

#[derive(Default)]
struct Flight {
    in_flight: bool,
    waiters: Vec<oneshot::Sender<RefreshOutcome>>,
}

enum Role {
    Leader,
    Waiter(oneshot::Receiver<RefreshOutcome>),
}

/// Coordinates refreshes for one client instance.
pub struct RefreshCoordinator {
    flight: Mutex<Flight>,
    timeout: Duration,
    started: AtomicU64,
}

impl RefreshCoordinator {
    /// Create a coordinator whose refreshes are bounded by `timeout`.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            flight: Mutex::new(Flight::default()),
            timeout,
            started: AtomicU64::new(0),
        }
    }

    /// Obtain a fresh credential, running `refresh` only if no refresh is
    /// already in flight.
    ///
    /// # Errors
    ///
    /// Returns the [`RefreshFailure`] of the refresh this call joined or led.
    pub async fn obtain<F, Fut>(&self, refresh: F) -> RefreshOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RefreshOutcome>,
    {
        let mut refresh = Some(refresh);
        loop {
            match self.join() {
                Role::Leader => {
                    let Some(refresh) = refresh.take() else {
                        self.settle(&Err(RefreshFailure::Abandoned));
                        return Err(RefreshFailure::Abandoned);
                    };
                    return self.lead(refresh()).await;
                }
                Role::Waiter(receiver) => match receiver.await {
                    Ok(Err(RefreshFailure::Abandoned)) | Err(_) => {
                        debug!("refresh leader went away; re-entering");
                    }
                    Ok(outcome) => return outcome,
                },
            }
        }
    }

    /// Whether a refresh is currently running.
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.lock().in_flight
    }

    /// Number of callers suspended on the running refresh.
    #[must_use]
    pub fn waiter_count(&self) -> usize {
        self.lock().waiters.len()
    }

    /// Total refresh operations started by this coordinator.
    #[must_use]
    pub fn refreshes_started(&self) -> u64 {
        self.started.load(Ordering::Acquire)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Flight> {
        self.flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn join(&self) -> Role {
        let mut flight = self.lock();
        if flight.in_flight {
            let (sender, receiver) = oneshot::channel();
            flight.waiters.push(sender);
            Role::Waiter(receiver)
        } else {
            flight.in_flight = true;
            Role::Leader
        }
    }

    async fn lead<Fut>(&self, refresh: Fut) -> RefreshOutcome
    where
        Fut: Future<Output = RefreshOutcome>,
    {
        self.started.fetch_add(1, Ordering::AcqRel);
        let mut guard = SettleOnDrop {
            coordinator: self,
            armed: true,
        };
        let outcome = tokio::time::timeout(self.timeout, refresh)
            .await
            .unwrap_or_else(|_| {
                warn!(timeout = ?self.timeout, "refresh timed out");
                Err(RefreshFailure::TimedOut)
            });
        guard.armed = false;
        self.settle(&outcome);
        outcome
    }

    fn settle(&self, outcome: &RefreshOutcome) {
        let waiters = {
            let mut flight = self.lock();
            flight.in_flight = false;
            std::mem::take(&mut flight.waiters)
        };
        debug!(
            waiters = waiters.len(),
            success = outcome.is_ok(),
            "refresh settled"
        );
        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
    }
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RefreshCoordinator")
            .field("in_flight", &self.is_in_flight())
            .field("waiters", &self.waiter_count())
            .field("timeout", &self.timeout)
            .finish()
    }
}

struct SettleOnDrop<'a> {
    coordinator: &'a RefreshCoordinator,
    armed: bool,
}

impl Drop for SettleOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.coordinator.settle(&Err(RefreshFailure::Abandoned));
        }
    }
}
