//! Key-value surface shared by client instances of one storage profile.
//!
//! # Design
//! - A [`Profile`] owns one backend and one change channel. Every client
//!   instance takes its own [`ProfileHandle`], which stamps writes with an
//!   origin id.
//! - Change notifications go to every *other* handle of the profile; a handle
//!   never observes its own writes.
//! - Writing an unchanged value and removing an absent key publish nothing.

mod file;
mod memory;

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::broadcast::{self, Receiver, Sender};
use tracing::warn;

pub use file::FileBackend;
pub use memory::MemoryBackend;

const CHANGE_CAPACITY: usize = 64;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by storage backends.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem access failed.
    #[error("storage io failure")]
    Io {
        /// Key being accessed.
        key: String,
        /// Underlying IO error.
        source: io::Error,
    },
    /// The key contains characters the backend cannot store.
    #[error("storage key is not allowed")]
    InvalidKey {
        /// Offending key.
        key: String,
    },
}

/// Raw persistence primitive behind a [`Profile`].
pub trait StorageBackend: Send + Sync + 'static {
    /// Read the value stored at `key`.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] when the backend cannot be read.
    fn read(&self, key: &str) -> StorageResult<Option<String>>;

    /// Store `value` at `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] when the backend cannot be written.
    fn write(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Delete `key`, returning whether anything was removed.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] when the backend cannot be written.
    fn delete(&self, key: &str) -> StorageResult<bool>;
}

/// A change made by another handle of the same profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageChange {
    /// Key that changed.
    pub key: String,
    /// New value, or `None` when the key was removed.
    pub new_value: Option<String>,
    /// Origin id of the handle that made the change.
    pub origin: u64,
}

/// What a [`StorageEvents`] subscriber observes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageEvent {
    /// A change made by another handle.
    Changed(StorageChange),
    /// The subscriber fell behind and `skipped` changes were dropped.
    /// Current values must be re-read from storage.
    Lagged {
        /// Number of changes lost.
        skipped: u64,
    },
}

/// Key-value surface used by the session store and synchronizer.
pub trait KeyValueStore: Send + Sync {
    /// Read a value.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] when the backend cannot be read.
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Write a value and notify other handles if it changed.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] when the backend cannot be written.
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Write a value only if the key currently holds one. Returns whether
    /// the write happened; the check and write are atomic per profile.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] when the backend cannot be read or written.
    fn replace_existing(&self, key: &str, value: &str) -> StorageResult<bool>;

    /// Remove a value and notify other handles if it existed.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] when the backend cannot be written.
    fn remove(&self, key: &str) -> StorageResult<()>;

    /// Subscribe to changes made by other handles.
    fn subscribe(&self) -> StorageEvents;
}

struct Shared<B> {
    backend: B,
    changes: Sender<StorageChange>,
    next_origin: AtomicU64,
    write_guard: Mutex<()>,
}

/// A storage profile: one backend shared by any number of handles.
pub struct Profile<B> {
    shared: Arc<Shared<B>>,
}

/// In-process profile, for tests and ephemeral sessions.
pub type MemoryProfile = Profile<MemoryBackend>;

/// Profile persisted to a directory on disk.
pub type FileProfile = Profile<FileBackend>;

impl<B: StorageBackend> Profile<B> {
    /// Wrap a backend in a new profile.
    #[must_use]
    pub fn new(backend: B) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                backend,
                changes,
                next_origin: AtomicU64::new(1),
                write_guard: Mutex::new(()),
            }),
        }
    }

    /// Create a handle with its own origin id.
    #[must_use]
    pub fn handle(&self) -> ProfileHandle<B> {
        let origin = self.shared.next_origin.fetch_add(1, Ordering::Relaxed);
        ProfileHandle {
            shared: Arc::clone(&self.shared),
            origin,
        }
    }

    /// Access the backend directly, bypassing change notifications.
    #[must_use]
    pub fn backend(&self) -> &B {
        &self.shared.backend
    }
}

impl MemoryProfile {
    /// Create an empty in-memory profile.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(MemoryBackend::default())
    }
}

impl FileProfile {
    /// Open (creating if needed) a profile rooted at `dir`.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] when the directory cannot be created.
    pub fn open(dir: impl Into<std::path::PathBuf>) -> StorageResult<Self> {
        FileBackend::open(dir).map(Self::new)
    }
}

impl<B> Clone for Profile<B> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// One participant's view of a [`Profile`].
pub struct ProfileHandle<B> {
    shared: Arc<Shared<B>>,
    origin: u64,
}

impl<B> ProfileHandle<B> {
    /// Origin id stamped on this handle's writes.
    #[must_use]
    pub const fn origin(&self) -> u64 {
        self.origin
    }

    fn write_guard(&self) -> MutexGuard<'_, ()> {
        self.shared
            .write_guard
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, key: &str, new_value: Option<String>) {
        let _ = self.shared.changes.send(StorageChange {
            key: key.to_string(),
            new_value,
            origin: self.origin,
        });
    }
}

impl<B: StorageBackend> ProfileHandle<B> {
    fn write_changed(&self, key: &str, value: &str, previous: Option<&str>) -> StorageResult<()> {
        if previous == Some(value) {
            return Ok(());
        }
        self.shared.backend.write(key, value)?;
        self.publish(key, Some(value.to_string()));
        Ok(())
    }
}

impl<B: StorageBackend> KeyValueStore for ProfileHandle<B> {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        self.shared.backend.read(key)
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let _guard = self.write_guard();
        self.write_changed(key, value, self.shared.backend.read(key)?.as_deref())
    }

    fn replace_existing(&self, key: &str, value: &str) -> StorageResult<bool> {
        let _guard = self.write_guard();
        let Some(previous) = self.shared.backend.read(key)? else {
            return Ok(false);
        };
        self.write_changed(key, value, Some(&previous))?;
        Ok(true)
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let _guard = self.write_guard();
        if self.shared.backend.delete(key)? {
            self.publish(key, None);
        }
        Ok(())
    }

    fn subscribe(&self) -> StorageEvents {
        StorageEvents {
            receiver: self.shared.changes.subscribe(),
            origin: self.origin,
        }
    }
}

/// Stream of changes made by other handles.
pub struct StorageEvents {
    receiver: Receiver<StorageChange>,
    origin: u64,
}

impl StorageEvents {
    /// Receive the next foreign change or lag notice; `None` once the
    /// profile is gone.
    pub async fn next(&mut self) -> Option<StorageEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(change) if change.origin == self.origin => {}
                Ok(change) => return Some(StorageEvent::Changed(change)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "storage change stream lagged");
                    return Some(StorageEvent::Lagged { skipped });
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn other_handles_observe_changes() -> anyhow::Result<()> {
        let profile = MemoryProfile::in_memory();
        let writer = profile.handle();
        let reader = profile.handle();
        let mut events = reader.subscribe();

        writer.set("k", "v1")?;
        let Some(StorageEvent::Changed(change)) =
            timeout(Duration::from_secs(1), events.next()).await?
        else {
            anyhow::bail!("expected a change");
        };
        assert_eq!(change.key, "k");
        assert_eq!(change.new_value.as_deref(), Some("v1"));
        assert_eq!(change.origin, writer.origin());
        assert_eq!(reader.get("k")?.as_deref(), Some("v1"));
        Ok(())
    }

    #[tokio::test]
    async fn own_writes_and_noops_are_silent() -> anyhow::Result<()> {
        let profile = MemoryProfile::in_memory();
        let writer = profile.handle();
        let reader = profile.handle();
        let mut own = writer.subscribe();
        let mut other = reader.subscribe();

        writer.set("k", "v1")?;
        writer.set("k", "v1")?;
        writer.remove("missing")?;
        writer.remove("k")?;

        let first = timeout(Duration::from_secs(1), other.next()).await?;
        let second = timeout(Duration::from_secs(1), other.next()).await?;
        assert!(matches!(
            first,
            Some(StorageEvent::Changed(StorageChange { new_value: Some(ref v), .. })) if v == "v1"
        ));
        assert!(matches!(
            second,
            Some(StorageEvent::Changed(StorageChange { new_value: None, .. }))
        ));
        assert!(
            timeout(Duration::from_millis(50), other.next())
                .await
                .is_err()
        );
        assert!(timeout(Duration::from_millis(50), own.next()).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn slow_subscriber_is_told_it_lagged() -> anyhow::Result<()> {
        let profile = MemoryProfile::in_memory();
        let writer = profile.handle();
        let mut events = profile.handle().subscribe();

        for round in 0..CHANGE_CAPACITY + 8 {
            writer.set("k", &format!("v{round}"))?;
        }
        let first = timeout(Duration::from_secs(1), events.next()).await?;
        assert!(matches!(first, Some(StorageEvent::Lagged { skipped: 8 })));
        Ok(())
    }

    #[test]
    fn replace_existing_only_writes_present_keys() -> anyhow::Result<()> {
        let profile = MemoryProfile::in_memory();
        let writer = profile.handle();

        assert!(!writer.replace_existing("k", "v1")?);
        assert_eq!(writer.get("k")?, None);

        writer.set("k", "v1")?;
        assert!(writer.replace_existing("k", "v2")?);
        assert_eq!(writer.get("k")?.as_deref(), Some("v2"));

        writer.remove("k")?;
        assert!(!writer.replace_existing("k", "v3")?);
        assert_eq!(writer.get("k")?, None);
        Ok(())
    }

    #[test]
    fn handles_receive_distinct_origins() {
        let profile = MemoryProfile::in_memory();
        assert_ne!(profile.handle().origin(), profile.handle().origin());
    }
}
