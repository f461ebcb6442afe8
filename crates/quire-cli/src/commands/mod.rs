//! Command handlers grouped by concern.

pub(crate) mod request;
pub(crate) mod session;
