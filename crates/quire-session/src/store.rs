//! Encrypted session store.
//!
//! # Design
//! - `load` never fails: an envelope that cannot be decrypted or parsed,
//!   including one found while no key is configured, is treated as absent
//!   and removed.
//! - Saving requires a configured key; without one the session lives in
//!   memory only and `save` reports [`SessionError::KeyUnconfigured`].
//! - Saving the logged-out state is the same as `clear`.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::cipher::{CipherError, EnvelopeCipher};
use crate::error::{SessionError, SessionResult};
use crate::model::SessionState;
use crate::storage::KeyValueStore;

/// Why a stored envelope could not be turned back into a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// No key is configured to open the envelope.
    NoKey,
    /// Decryption failed.
    Cipher(CipherError),
    /// The plaintext is not a session record.
    Malformed,
}

/// Persists one session under one storage key.
pub struct EncryptedSessionStore {
    storage: Arc<dyn KeyValueStore>,
    storage_key: String,
    cipher: Option<EnvelopeCipher>,
}

impl EncryptedSessionStore {
    /// Bind a store to a storage key. A blank or missing passphrase disables
    /// persistence.
    #[must_use]
    pub fn new(
        storage: Arc<dyn KeyValueStore>,
        storage_key: impl Into<String>,
        passphrase: Option<&str>,
    ) -> Self {
        Self {
            storage,
            storage_key: storage_key.into(),
            cipher: passphrase.and_then(EnvelopeCipher::from_passphrase),
        }
    }

    /// Storage key this store reads and writes.
    #[must_use]
    pub fn storage_key(&self) -> &str {
        &self.storage_key
    }

    /// Whether sessions can be persisted.
    #[must_use]
    pub const fn is_persistent(&self) -> bool {
        self.cipher.is_some()
    }

    /// Load the persisted session, if any.
    ///
    /// Unreadable envelopes and records without a full credential pair are
    /// discarded and reported as absent.
    #[must_use]
    pub fn load(&self) -> Option<SessionState> {
        let raw = match self.storage.get(&self.storage_key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(error) => {
                warn!(storage_key = %self.storage_key, error = %error, "session storage read failed");
                return None;
            }
        };
        match self.decode(&raw) {
            Ok(state) if state.is_authenticated() => Some(state),
            Ok(_) => {
                debug!(storage_key = %self.storage_key, "discarding incomplete session");
                self.clear();
                None
            }
            Err(error) => {
                warn!(storage_key = %self.storage_key, ?error, "discarding unreadable session envelope");
                self.clear();
                None
            }
        }
    }

    /// Raw envelope currently persisted under the storage key.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Storage`] when the backend cannot be read.
    pub fn stored_envelope(&self) -> SessionResult<Option<String>> {
        self.storage
            .get(&self.storage_key)
            .map_err(|source| SessionError::Storage {
                operation: "read",
                source,
            })
    }

    /// Decode an envelope without touching storage.
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] when the envelope cannot be opened or parsed.
    pub fn decode(&self, raw: &str) -> Result<SessionState, DecodeError> {
        let cipher = self.cipher.as_ref().ok_or(DecodeError::NoKey)?;
        let plaintext = cipher.open(raw).map_err(DecodeError::Cipher)?;
        serde_json::from_slice::<SessionState>(&plaintext).map_err(|_| DecodeError::Malformed)
    }

    /// Persist `state`, replacing any previous envelope.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::KeyUnconfigured`] without a key, and storage or
    /// encryption errors otherwise.
    pub fn save(&self, state: &SessionState) -> SessionResult<()> {
        if !state.is_authenticated() {
            return self.remove();
        }
        let envelope = self.seal(state)?;
        self.storage
            .set(&self.storage_key, &envelope)
            .map_err(|source| SessionError::Storage {
                operation: "save",
                source,
            })
    }

    /// Replace the persisted envelope only while one is still stored.
    /// Returns `false`, writing nothing, once another instance removed it.
    ///
    /// # Errors
    ///
    /// Same as [`EncryptedSessionStore::save`].
    pub fn save_existing(&self, state: &SessionState) -> SessionResult<bool> {
        if !state.is_authenticated() {
            return self.remove().map(|()| true);
        }
        let envelope = self.seal(state)?;
        self.storage
            .replace_existing(&self.storage_key, &envelope)
            .map_err(|source| SessionError::Storage {
                operation: "save",
                source,
            })
    }

    fn seal(&self, state: &SessionState) -> SessionResult<String> {
        let cipher = self
            .cipher
            .as_ref()
            .ok_or_else(|| SessionError::KeyUnconfigured {
                storage_key: self.storage_key.clone(),
            })?;
        let plaintext =
            serde_json::to_vec(state).map_err(|source| SessionError::Serialize { source })?;
        cipher.seal(&plaintext).map_err(|_| SessionError::Encrypt {
            storage_key: self.storage_key.clone(),
        })
    }

    /// Remove the persisted envelope. Failures are logged, not returned.
    pub fn clear(&self) {
        if let Err(error) = self.remove() {
            warn!(storage_key = %self.storage_key, error = %error, "failed to clear session envelope");
        }
    }

    fn remove(&self) -> SessionResult<()> {
        self.storage
            .remove(&self.storage_key)
            .map_err(|source| SessionError::Storage {
                operation: "clear",
                source,
            })
    }
}

impl std::fmt::Debug for EncryptedSessionStore {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("EncryptedSessionStore")
            .field("storage_key", &self.storage_key)
            .field("persistent", &self.is_persistent())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryProfile;

    const KEY: &str = "quire.session.user";

    fn session(access: &str) -> SessionState {
        SessionState {
            access_credential: access.to_string(),
            refresh_credential: format!("r-{access}"),
            identity_email: "editor@quire.test".to_string(),
            ..SessionState::default()
        }
    }

    fn store(profile: &MemoryProfile, passphrase: Option<&str>) -> EncryptedSessionStore {
        EncryptedSessionStore::new(Arc::new(profile.handle()), KEY, passphrase)
    }

    #[test]
    fn saved_session_loads_back() -> SessionResult<()> {
        let profile = MemoryProfile::in_memory();
        let store = store(&profile, Some("secret"));
        store.save(&session("plaintext-access-credential"))?;

        let raw = profile.handle().get(KEY).ok().flatten().unwrap_or_default();
        assert!(!raw.is_empty());
        assert!(!raw.contains("plaintext-access-credential"));
        assert!(!raw.contains("editor@quire.test"));
        assert_eq!(store.load(), Some(session("plaintext-access-credential")));
        Ok(())
    }

    #[test]
    fn save_without_key_is_an_error() {
        let profile = MemoryProfile::in_memory();
        let store = store(&profile, None);
        assert!(matches!(
            store.save(&session("T1")),
            Err(SessionError::KeyUnconfigured { .. })
        ));
        assert_eq!(store.load(), None);
    }

    #[test]
    fn envelope_without_key_is_discarded() -> anyhow::Result<()> {
        let profile = MemoryProfile::in_memory();
        store(&profile, Some("secret")).save(&session("T1"))?;

        assert_eq!(store(&profile, None).load(), None);
        assert_eq!(profile.handle().get(KEY)?, None);
        Ok(())
    }

    #[test]
    fn corrupt_envelope_is_discarded() -> anyhow::Result<()> {
        let profile = MemoryProfile::in_memory();
        let handle = profile.handle();
        handle.set(KEY, "garbage")?;

        let store = store(&profile, Some("secret"));
        assert_eq!(store.load(), None);
        assert_eq!(handle.get(KEY)?, None);
        Ok(())
    }

    #[test]
    fn envelope_from_other_key_is_discarded() -> anyhow::Result<()> {
        let profile = MemoryProfile::in_memory();
        store(&profile, Some("old-key")).save(&session("T1"))?;

        let rotated = store(&profile, Some("new-key"));
        assert_eq!(rotated.load(), None);
        assert_eq!(profile.handle().get(KEY)?, None);
        Ok(())
    }

    #[test]
    fn save_existing_never_recreates_a_removed_envelope() -> anyhow::Result<()> {
        let profile = MemoryProfile::in_memory();
        let store = store(&profile, Some("secret"));
        store.save(&session("T1"))?;

        assert!(store.save_existing(&session("T2"))?);
        assert_eq!(store.load(), Some(session("T2")));

        profile.handle().remove(KEY)?;
        assert!(!store.save_existing(&session("T3"))?);
        assert_eq!(store.stored_envelope()?, None);
        Ok(())
    }

    #[test]
    fn saving_logged_out_state_clears() -> anyhow::Result<()> {
        let profile = MemoryProfile::in_memory();
        let store = store(&profile, Some("secret"));
        store.save(&session("T1"))?;
        store.save(&SessionState::default())?;
        assert_eq!(profile.handle().get(KEY)?, None);
        store.clear();
        Ok(())
    }
}
