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

//! Telemetry primitives shared across the Quire workspace.
//!
//! Layout: `init.rs` (tracing subscriber installation), `redact.rs`
//! (credential fingerprints and free-text scrubbing), `error.rs`.

pub mod error;
pub mod init;
pub mod redact;

pub use error::{Result, TelemetryError};
pub use init::{DEFAULT_LOG_LEVEL, LogFormat, LoggingConfig, build_sha, init_logging};
pub use redact::{REDACTED, redact_credential, redact_text};
