#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls
)]
#![warn(
    missing_docs,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery
)]
#![allow(clippy::redundant_pub_crate)]

//! Authenticated HTTP client session layer for the Quire CMS.
//!
//! Two independent client instances (user-facing and admin-facing) attach
//! credentials to outgoing calls, refresh expired credentials exactly once
//! per burst of failures, persist the session encrypted at rest, and converge
//! with other instances sharing the same storage profile.
//!
//! Layout:
//! - `model.rs`: session record, token grants, clear notifications
//! - `cipher.rs`: envelope encryption
//! - `storage/`: key-value surface, profiles, memory and file backends
//! - `store.rs`: encrypted session store (`load`/`save`/`clear`)
//! - `state.rs`: in-memory session cell, listeners, lifecycle transitions
//! - `sync.rs`: cross-instance synchronizer
//! - `refresh.rs`: single-flight refresh coordinator
//! - `transport.rs`: transport seam and the reqwest implementation
//! - `classify.rs`: error taxonomy and retry policy
//! - `client.rs`: request pipeline and the public client

pub mod cipher;
pub mod classify;
pub mod client;
pub mod error;
pub mod model;
pub mod refresh;
pub mod state;
pub mod storage;
pub mod store;
pub mod sync;
pub mod transport;

pub use classify::{ClassifiedError, RetryPolicy, is_retryable};
pub use client::{ApiResponse, RefreshStatus, RequestOptions, SessionClient, SignInError};
pub use error::{SessionError, SessionResult};
pub use model::{ClearReason, SessionCleared, SessionState, SignInRequest, TokenGrant};
pub use quire_config::{ClientConfig, ClientKind};
pub use refresh::{RefreshCoordinator, RefreshFailure, RefreshOutcome};
pub use state::ListenerId;
pub use storage::{
    FileBackend, FileProfile, KeyValueStore, MemoryBackend, MemoryProfile, Profile,
    ProfileHandle, StorageBackend, StorageChange, StorageError, StorageEvent, StorageEvents,
};
pub use store::EncryptedSessionStore;
pub use sync::SyncHandle;
pub use transport::{HttpTransport, OutboundRequest, Transport, TransportError, TransportResponse};
