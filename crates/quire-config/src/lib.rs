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

//! Client configuration for the Quire session layer.
//!
//! Layout: `model.rs` (typed configuration), `loader.rs` (environment and
//! file sources), `defaults.rs` (fixed endpoint and storage defaults),
//! `error.rs`.

pub mod defaults;
pub mod error;
pub mod loader;
pub mod model;

pub use error::{ConfigError, ConfigResult};
pub use model::{ClientConfig, ClientKind, EndpointConfig};
