//! Typed client configuration.

use std::fmt::{self, Display, Formatter};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::defaults;
use crate::error::{ConfigError, ConfigResult};

/// The two independent session contexts of the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientKind {
    /// Public, user-facing site.
    User,
    /// Admin console.
    Admin,
}

impl ClientKind {
    /// Machine-friendly label used in logs and storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
        }
    }
}

impl Display for ClientKind {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Per-kind endpoint paths and storage location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// API path that exchanges sign-in credentials for a token grant.
    pub login_path: String,
    /// API path that exchanges a refresh credential for a new grant.
    pub refresh_path: String,
    /// API path notified on sign-out.
    pub logout_path: String,
    /// Storage key holding this kind's encrypted session envelope.
    pub storage_key: String,
    /// UI route callers redirect to when the session is cleared.
    pub login_route: String,
}

impl EndpointConfig {
    /// Defaults for the given client kind.
    #[must_use]
    pub fn defaults_for(kind: ClientKind) -> Self {
        match kind {
            ClientKind::User => Self {
                login_path: defaults::USER_LOGIN_PATH.to_string(),
                refresh_path: defaults::USER_REFRESH_PATH.to_string(),
                logout_path: defaults::USER_LOGOUT_PATH.to_string(),
                storage_key: defaults::USER_STORAGE_KEY.to_string(),
                login_route: defaults::USER_LOGIN_ROUTE.to_string(),
            },
            ClientKind::Admin => Self {
                login_path: defaults::ADMIN_LOGIN_PATH.to_string(),
                refresh_path: defaults::ADMIN_REFRESH_PATH.to_string(),
                logout_path: defaults::ADMIN_LOGOUT_PATH.to_string(),
                storage_key: defaults::ADMIN_STORAGE_KEY.to_string(),
                login_route: defaults::ADMIN_LOGIN_ROUTE.to_string(),
            },
        }
    }

    fn validate(&self, section: &'static str) -> ConfigResult<()> {
        for (field, value) in [
            ("login_path", &self.login_path),
            ("refresh_path", &self.refresh_path),
            ("logout_path", &self.logout_path),
            ("login_route", &self.login_route),
        ] {
            if !value.starts_with('/') {
                return Err(ConfigError::invalid(
                    section,
                    field,
                    value.clone(),
                    "must be an absolute path",
                ));
            }
        }
        if self.storage_key.trim().is_empty() {
            return Err(ConfigError::invalid(
                section,
                "storage_key",
                self.storage_key.clone(),
                "must not be empty",
            ));
        }
        Ok(())
    }
}

/// Configuration shared by both client instances.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// API origin every request path is appended to.
    pub api_url: Url,
    /// Transport timeout applied to every call.
    pub request_timeout: Duration,
    /// Upper bound on a refresh call before it counts as failed.
    pub refresh_timeout: Duration,
    /// Passphrase the envelope cipher derives its key from.
    pub session_key: Option<String>,
    /// Retry budget the query layer applies to retryable errors.
    pub max_retries: u32,
    /// Whether a transient refresh failure (network, timeout) ends the session.
    pub clear_on_transient_refresh_failure: bool,
    /// User-facing endpoints.
    pub user: EndpointConfig,
    /// Admin-facing endpoints.
    pub admin: EndpointConfig,
}

impl ClientConfig {
    /// Build a configuration for `api_url` with every other field defaulted.
    #[must_use]
    pub fn new(api_url: Url) -> Self {
        Self {
            api_url,
            request_timeout: Duration::from_secs(defaults::DEFAULT_REQUEST_TIMEOUT_SECS),
            refresh_timeout: Duration::from_secs(defaults::DEFAULT_REFRESH_TIMEOUT_SECS),
            session_key: None,
            max_retries: defaults::DEFAULT_MAX_RETRIES,
            clear_on_transient_refresh_failure: true,
            user: EndpointConfig::defaults_for(ClientKind::User),
            admin: EndpointConfig::defaults_for(ClientKind::Admin),
        }
    }

    /// Replace the session key passphrase.
    #[must_use]
    pub fn with_session_key(mut self, key: impl Into<String>) -> Self {
        self.session_key = Some(key.into());
        self
    }

    /// Endpoints for the requested client kind.
    #[must_use]
    pub const fn endpoints(&self, kind: ClientKind) -> &EndpointConfig {
        match kind {
            ClientKind::User => &self.user,
            ClientKind::Admin => &self.admin,
        }
    }

    /// Configured session key, treating blank values as unconfigured.
    #[must_use]
    pub fn session_key(&self) -> Option<&str> {
        self.session_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }

    /// Check cross-field invariants.
    ///
    /// The session key is deliberately not required here: its absence is
    /// reported when a session is first saved.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidField`] for zero timeouts, malformed
    /// endpoint paths, or storage keys shared between the two kinds.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.request_timeout.is_zero() {
            return Err(ConfigError::invalid(
                "client",
                "request_timeout",
                "0",
                "must be positive",
            ));
        }
        if self.refresh_timeout.is_zero() {
            return Err(ConfigError::invalid(
                "client",
                "refresh_timeout",
                "0",
                "must be positive",
            ));
        }
        self.user.validate("user")?;
        self.admin.validate("admin")?;
        if self.user.storage_key == self.admin.storage_key {
            return Err(ConfigError::invalid(
                "admin",
                "storage_key",
                self.admin.storage_key.clone(),
                "must differ from the user storage key",
            ));
        }
        Ok(())
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        let api_url = Url::parse(defaults::DEFAULT_API_URL)
            .unwrap_or_else(|_| unreachable!("default API URL is valid"));
        Self::new(api_url)
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ClientConfig")
            .field("api_url", &self.api_url.as_str())
            .field("request_timeout", &self.request_timeout)
            .field("refresh_timeout", &self.refresh_timeout)
            .field(
                "session_key",
                &self.session_key().map(|_| "[REDACTED]"),
            )
            .field("max_retries", &self.max_retries)
            .field(
                "clear_on_transient_refresh_failure",
                &self.clear_on_transient_refresh_failure,
            )
            .field("user", &self.user)
            .field("admin", &self.admin)
            .finish()
    }
}
