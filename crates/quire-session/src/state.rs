//! In-memory session state and its lifecycle transitions.
//!
//! # Design
//! - The current [`SessionState`] lives in a `tokio::sync::watch` channel so
//!   observers can await changes; a revision counter moves only when the
//!   value actually changes.
//! - Local transitions (`install`, `terminate`, `expire`) write through to the
//!   [`EncryptedSessionStore`]. Remote transitions never touch storage.
//! - `install_if_current` checks the expected credential and writes the
//!   envelope while holding the state lock, so a sign-out or remote clear
//!   that lands first is never undone by a late refresh.
//! - Session-cleared listeners fire once per authenticated period. The guard
//!   re-arms when a new session is installed or adopted from another
//!   instance.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use quire_config::ClientKind;
use quire_telemetry::redact_credential;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::SessionResult;
use crate::model::{ClearReason, SessionCleared, SessionState};
use crate::store::EncryptedSessionStore;

/// Outcome of [`SessionContext::install_if_current`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Swap {
    /// The new session was persisted and adopted.
    Installed,
    /// The expected session is no longer current; nothing was written.
    Superseded,
    /// Another instance removed the persisted session; this one is cleared too.
    RemovedElsewhere,
}

/// Handle returned when registering a session-cleared listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&SessionCleared) + Send + Sync>;

struct SessionCell {
    sender: watch::Sender<SessionState>,
    revision: AtomicU64,
}

impl SessionCell {
    fn new(initial: SessionState) -> Self {
        let (sender, _) = watch::channel(initial);
        Self {
            sender,
            revision: AtomicU64::new(0),
        }
    }

    fn update(&self, apply: impl FnOnce(&mut SessionState) -> bool) -> bool {
        let changed = self.sender.send_if_modified(apply);
        if changed {
            self.revision.fetch_add(1, Ordering::AcqRel);
        }
        changed
    }

    fn replace(&self, next: SessionState) -> bool {
        self.update(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        })
    }
}

/// Session state, persistence, and listeners of one client instance.
pub(crate) struct SessionContext {
    kind: ClientKind,
    login_route: String,
    cell: SessionCell,
    store: EncryptedSessionStore,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_listener: AtomicU64,
    signalled: AtomicBool,
}

impl SessionContext {
    /// Build a context seeded from the persisted session.
    pub(crate) fn restore(
        kind: ClientKind,
        login_route: impl Into<String>,
        store: EncryptedSessionStore,
    ) -> Self {
        let initial = store.load().unwrap_or_default();
        let signalled = !initial.is_authenticated();
        if !signalled {
            debug!(
                kind = %kind,
                credential = %redact_credential(&initial.access_credential),
                "restored persisted session"
            );
        }
        Self {
            kind,
            login_route: login_route.into(),
            cell: SessionCell::new(initial),
            store,
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
            signalled: AtomicBool::new(signalled),
        }
    }

    pub(crate) const fn kind(&self) -> ClientKind {
        self.kind
    }

    pub(crate) fn store(&self) -> &EncryptedSessionStore {
        &self.store
    }

    pub(crate) fn snapshot(&self) -> SessionState {
        self.cell.sender.borrow().clone()
    }

    pub(crate) fn access_credential(&self) -> String {
        self.cell.sender.borrow().access_credential.clone()
    }

    pub(crate) fn is_authenticated(&self) -> bool {
        self.cell.sender.borrow().is_authenticated()
    }

    pub(crate) fn revision(&self) -> u64 {
        self.cell.revision.load(Ordering::Acquire)
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.cell.sender.subscribe()
    }

    /// Persist and adopt a new session as one unit.
    pub(crate) fn install(&self, next: SessionState) -> SessionResult<()> {
        let next = next.normalized();
        self.store.save(&next)?;
        self.cell.replace(next);
        self.signalled.store(false, Ordering::Release);
        Ok(())
    }

    /// Persist and adopt `next` only while `expected_access` is still the
    /// current credential and its envelope has not been removed elsewhere.
    pub(crate) fn install_if_current(
        &self,
        expected_access: &str,
        next: SessionState,
    ) -> SessionResult<Swap> {
        let next = next.normalized();
        let mut swap = Ok(Swap::Superseded);
        self.cell.update(|current| {
            if !current.is_authenticated() || current.access_credential != expected_access {
                return false;
            }
            match self.store.save_existing(&next) {
                Ok(true) => {
                    swap = Ok(Swap::Installed);
                    let changed = *current != next;
                    *current = next;
                    changed
                }
                Ok(false) => {
                    swap = Ok(Swap::RemovedElsewhere);
                    *current = SessionState::default();
                    true
                }
                Err(error) => {
                    swap = Err(error);
                    false
                }
            }
        });
        match swap {
            Ok(Swap::Installed) => self.signalled.store(false, Ordering::Release),
            Ok(Swap::RemovedElsewhere) => self.notify_once(ClearReason::RemoteSignOut),
            Ok(Swap::Superseded) | Err(_) => {}
        }
        swap
    }

    /// End the session regardless of which credential is current.
    pub(crate) fn terminate(&self, reason: ClearReason) {
        self.cell.replace(SessionState::default());
        self.store.clear();
        self.notify_once(reason);
    }

    /// End the session only if `stale_access` is still the current
    /// credential. Returns whether this call cleared it.
    pub(crate) fn expire(&self, stale_access: &str, reason: ClearReason) -> bool {
        let cleared = self.cell.update(|current| {
            if current.is_authenticated() && current.access_credential == stale_access {
                *current = SessionState::default();
                true
            } else {
                false
            }
        });
        if cleared {
            self.store.clear();
            self.notify_once(reason);
        }
        cleared
    }

    /// Apply a deletion observed on another instance.
    pub(crate) fn apply_remote_clear(&self) -> bool {
        let cleared = self.cell.replace(SessionState::default());
        if cleared {
            self.notify_once(ClearReason::RemoteSignOut);
        }
        cleared
    }

    /// Adopt a session written by another instance, unless it matches ours.
    pub(crate) fn apply_remote_update(&self, next: SessionState) -> bool {
        if !next.is_authenticated() {
            return false;
        }
        let adopted = self.cell.update(|current| {
            if current.same_identity(&next) {
                false
            } else {
                *current = next;
                true
            }
        });
        if adopted {
            self.signalled.store(false, Ordering::Release);
        }
        adopted
    }

    pub(crate) fn add_listener(&self, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        id
    }

    pub(crate) fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    fn notify_once(&self, reason: ClearReason) {
        if self
            .signalled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        info!(kind = %self.kind, ?reason, "session cleared");
        let event = SessionCleared {
            kind: self.kind,
            reason,
            login_route: self.login_route.clone(),
        };
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(&event);
        }
    }
}
