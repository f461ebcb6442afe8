//! Default endpoints, storage keys, and timing policies.
//!
//! # Design
//! - Keep the two client kinds' defaults side by side so they cannot drift.
//! - Storage keys are stable identifiers; changing them orphans sessions.

/// Default API origin when none is configured.
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8080";
/// Default per-request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;
/// Default bound on a refresh call in seconds.
pub const DEFAULT_REFRESH_TIMEOUT_SECS: u64 = 10;
/// Default retry budget for retryable classifications.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Storage key of the user-facing session envelope.
pub const USER_STORAGE_KEY: &str = "quire.session.user";
/// Storage key of the admin-facing session envelope.
pub const ADMIN_STORAGE_KEY: &str = "quire.session.admin";

pub(crate) const USER_LOGIN_PATH: &str = "/api/auth/login";
pub(crate) const USER_REFRESH_PATH: &str = "/api/auth/refresh";
pub(crate) const USER_LOGOUT_PATH: &str = "/api/auth/logout";
pub(crate) const USER_LOGIN_ROUTE: &str = "/login";

pub(crate) const ADMIN_LOGIN_PATH: &str = "/api/admin/auth/login";
pub(crate) const ADMIN_REFRESH_PATH: &str = "/api/admin/auth/refresh";
pub(crate) const ADMIN_LOGOUT_PATH: &str = "/api/admin/auth/logout";
pub(crate) const ADMIN_LOGIN_ROUTE: &str = "/admin/login";
