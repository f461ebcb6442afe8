//! Envelope encryption for persisted sessions.
//!
//! # Design
//! - Key material is the SHA-256 digest of the configured passphrase.
//! - Envelope layout: `base64(nonce[12] || ciphertext || tag)`.
//! - A fresh random nonce is drawn for every seal.

use std::fmt::{self, Formatter};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chacha20poly1305::aead::Aead;
use chacha20poly1305::{ChaCha20Poly1305, Key, KeyInit, Nonce};
use rand::Rng;
use sha2::{Digest, Sha256};
use thiserror::Error;

const NONCE_LEN: usize = 12;

/// Failures raised while sealing or opening an envelope.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CipherError {
    /// The envelope is not valid base64.
    #[error("session envelope is not valid base64")]
    Encoding,
    /// The envelope is shorter than a nonce.
    #[error("session envelope is truncated")]
    Truncated,
    /// Authentication failed (wrong key or tampered envelope).
    #[error("session envelope failed authentication")]
    Authentication,
    /// The AEAD implementation refused to seal the payload.
    #[error("failed to seal session envelope")]
    Encrypt,
}

/// Authenticated cipher bound to one passphrase.
#[derive(Clone)]
pub struct EnvelopeCipher {
    cipher: ChaCha20Poly1305,
}

impl EnvelopeCipher {
    /// Derive a cipher from a passphrase. Blank passphrases yield `None`.
    #[must_use]
    pub fn from_passphrase(passphrase: &str) -> Option<Self> {
        let passphrase = passphrase.trim();
        if passphrase.is_empty() {
            return None;
        }
        let digest = Sha256::digest(passphrase.as_bytes());
        let cipher = ChaCha20Poly1305::new(Key::from_slice(digest.as_slice()));
        Some(Self { cipher })
    }

    /// Encrypt `plaintext` into a text envelope.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::Encrypt`] if the AEAD rejects the payload.
    pub fn seal(&self, plaintext: &[u8]) -> Result<String, CipherError> {
        let mut nonce = [0_u8; NONCE_LEN];
        rand::rng().fill(&mut nonce);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| CipherError::Encrypt)?;
        let mut envelope = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        envelope.extend_from_slice(&nonce);
        envelope.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(envelope))
    }

    /// Decrypt a text envelope.
    ///
    /// # Errors
    ///
    /// Returns a [`CipherError`] when the envelope is malformed or was sealed
    /// under another key.
    pub fn open(&self, envelope: &str) -> Result<Vec<u8>, CipherError> {
        let raw = STANDARD
            .decode(envelope.trim())
            .map_err(|_| CipherError::Encoding)?;
        if raw.len() <= NONCE_LEN {
            return Err(CipherError::Truncated);
        }
        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CipherError::Authentication)
    }
}

impl fmt::Debug for EnvelopeCipher {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str("EnvelopeCipher { .. }")
    }
}
