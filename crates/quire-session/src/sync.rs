//! Cross-instance synchronizer.
//!
//! # Design
//! - One background task per client instance consumes [`StorageEvents`] for
//!   the profile and reconciles changes to this instance's storage key into
//!   memory.
//! - Reconciliation never writes storage, so two instances cannot feed each
//!   other updates.
//! - Undecodable updates are noise and leave local state untouched.
//! - After the change stream lags, the stored envelope is re-read and
//!   reconciled as if it had just changed, so a dropped deletion still
//!   signs this instance out.
//! - The subscription is owned by a [`SyncHandle`]; dropping or
//!   unsubscribing the handle stops the task.

use std::sync::Arc;

use quire_telemetry::redact_credential;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::state::SessionContext;
use crate::storage::{StorageChange, StorageEvent, StorageEvents};

/// Origin stamped on changes rebuilt from storage; handles start at 1.
const RESYNC_ORIGIN: u64 = 0;

/// Explicit subscription to cross-instance changes.
#[derive(Debug)]
pub struct SyncHandle {
    task: Option<JoinHandle<()>>,
}

impl SyncHandle {
    pub(crate) fn spawn(
        runtime: &Handle,
        context: Arc<SessionContext>,
        mut events: StorageEvents,
    ) -> Self {
        let task = runtime.spawn(async move {
            while let Some(event) = events.next().await {
                match event {
                    StorageEvent::Changed(change) => {
                        reconcile(&context, &change);
                    }
                    StorageEvent::Lagged { .. } => {
                        resync(&context);
                    }
                }
            }
            debug!(kind = %context.kind(), "storage change stream closed");
        });
        Self { task: Some(task) }
    }

    /// Stop observing other instances.
    pub fn unsubscribe(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// Whether the background task is still running.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Apply one foreign storage change. Returns whether local state moved.
pub(crate) fn reconcile(context: &SessionContext, change: &StorageChange) -> bool {
    if change.key != context.store().storage_key() {
        return false;
    }
    let Some(raw) = change.new_value.as_deref() else {
        let cleared = context.apply_remote_clear();
        if cleared {
            debug!(kind = %context.kind(), origin = change.origin, "adopted remote sign-out");
        }
        return cleared;
    };
    match context.store().decode(raw) {
        Ok(next) => {
            let credential = redact_credential(&next.access_credential);
            let adopted = context.apply_remote_update(next);
            if adopted {
                debug!(kind = %context.kind(), origin = change.origin, %credential, "adopted remote session");
            }
            adopted
        }
        Err(error) => {
            warn!(kind = %context.kind(), origin = change.origin, ?error, "ignoring undecodable remote session");
            false
        }
    }
}

/// Reconcile against the envelope currently in storage.
pub(crate) fn resync(context: &SessionContext) -> bool {
    let store = context.store();
    if !store.is_persistent() {
        return false;
    }
    let new_value = match store.stored_envelope() {
        Ok(value) => value,
        Err(error) => {
            warn!(kind = %context.kind(), %error, "resync could not read session storage");
            return false;
        }
    };
    debug!(kind = %context.kind(), present = new_value.is_some(), "resyncing from storage");
    reconcile(
        context,
        &StorageChange {
            key: store.storage_key().to_string(),
            new_value,
            origin: RESYNC_ORIGIN,
        },
    )
}
