//! Environment and file sources for [`ClientConfig`].
//!
//! # Design
//! - `from_lookup` is the single parsing path; `from_env` only supplies
//!   `std::env::var` so tests never mutate process state.
//! - Unset variables keep defaults; set-but-malformed variables are errors.
//! - File documents are partial: absent fields keep their defaults.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::error::{ConfigError, ConfigResult};
use crate::model::{ClientConfig, EndpointConfig};

/// Environment variable holding the API origin.
pub const ENV_API_URL: &str = "QUIRE_API_URL";
/// Environment variable holding the envelope passphrase.
pub const ENV_SESSION_KEY: &str = "QUIRE_SESSION_KEY";
/// Environment variable holding the request timeout in seconds.
pub const ENV_HTTP_TIMEOUT_SECS: &str = "QUIRE_HTTP_TIMEOUT_SECS";
/// Environment variable holding the refresh timeout in seconds.
pub const ENV_REFRESH_TIMEOUT_SECS: &str = "QUIRE_REFRESH_TIMEOUT_SECS";
/// Environment variable holding the retry budget.
pub const ENV_MAX_RETRIES: &str = "QUIRE_MAX_RETRIES";
/// Environment variable toggling logout on transient refresh failures.
pub const ENV_CLEAR_ON_TRANSIENT: &str = "QUIRE_CLEAR_ON_TRANSIENT_REFRESH_FAILURE";

impl ClientConfig {
    /// Load configuration from process environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidField`] when a variable is set to a value
    /// that cannot be parsed, or when the result fails validation.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// See [`ClientConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(raw) = get(ENV_API_URL) {
            config.api_url = parse_url(&raw)?;
        }
        if let Some(raw) = get(ENV_SESSION_KEY) {
            config.session_key = Some(raw);
        }
        if let Some(raw) = get(ENV_HTTP_TIMEOUT_SECS) {
            config.request_timeout = parse_secs(&raw, "request_timeout")?;
        }
        if let Some(raw) = get(ENV_REFRESH_TIMEOUT_SECS) {
            config.refresh_timeout = parse_secs(&raw, "refresh_timeout")?;
        }
        if let Some(raw) = get(ENV_MAX_RETRIES) {
            config.max_retries = raw.trim().parse().map_err(|_| {
                ConfigError::invalid("client", "max_retries", raw.clone(), "must be an integer")
            })?;
        }
        if let Some(raw) = get(ENV_CLEAR_ON_TRANSIENT) {
            config.clear_on_transient_refresh_failure = parse_bool(&raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] or [`ConfigError::Parse`] when the file
    /// cannot be loaded, and [`ConfigError::InvalidField`] when it fails
    /// validation.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let document: FileDocument =
            serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        let config = document.into_config()?;
        tracing::debug!(path = %path.display(), "loaded client configuration file");
        Ok(config)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileDocument {
    api_url: Option<String>,
    session_key: Option<String>,
    request_timeout_secs: Option<u64>,
    refresh_timeout_secs: Option<u64>,
    max_retries: Option<u32>,
    clear_on_transient_refresh_failure: Option<bool>,
    user: Option<EndpointConfig>,
    admin: Option<EndpointConfig>,
}

impl FileDocument {
    fn into_config(self) -> ConfigResult<ClientConfig> {
        let mut config = ClientConfig::default();
        if let Some(raw) = self.api_url {
            config.api_url = parse_url(&raw)?;
        }
        if self.session_key.is_some() {
            config.session_key = self.session_key;
        }
        if let Some(secs) = self.request_timeout_secs {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.refresh_timeout_secs {
            config.refresh_timeout = Duration::from_secs(secs);
        }
        if let Some(retries) = self.max_retries {
            config.max_retries = retries;
        }
        if let Some(flag) = self.clear_on_transient_refresh_failure {
            config.clear_on_transient_refresh_failure = flag;
        }
        if let Some(user) = self.user {
            config.user = user;
        }
        if let Some(admin) = self.admin {
            config.admin = admin;
        }
        config.validate()?;
        Ok(config)
    }
}

fn parse_url(raw: &str) -> ConfigResult<Url> {
    let url = Url::parse(raw.trim())
        .map_err(|_| ConfigError::invalid("client", "api_url", raw, "must be a valid URL"))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::invalid(
            "client",
            "api_url",
            raw,
            "scheme must be http or https",
        ));
    }
    Ok(url)
}

fn parse_secs(raw: &str, field: &'static str) -> ConfigResult<Duration> {
    raw.trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| ConfigError::invalid("client", field, raw, "must be a whole number of seconds"))
}

fn parse_bool(raw: &str) -> ConfigResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid(
            "client",
            "clear_on_transient_refresh_failure",
            raw,
            "must be a boolean",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn empty_environment_yields_defaults() -> Result<()> {
        let config = ClientConfig::from_lookup(|_| None)?;
        assert_eq!(config, ClientConfig::default());
        Ok(())
    }

    #[test]
    fn environment_overrides_are_applied() -> Result<()> {
        let config = ClientConfig::from_lookup(lookup_from(&[
            (ENV_API_URL, "https://cms.example.com"),
            (ENV_SESSION_KEY, "passphrase"),
            (ENV_HTTP_TIMEOUT_SECS, "30"),
            (ENV_REFRESH_TIMEOUT_SECS, "5"),
            (ENV_MAX_RETRIES, "7"),
            (ENV_CLEAR_ON_TRANSIENT, "no"),
        ]))?;
        assert_eq!(config.api_url.as_str(), "https://cms.example.com/");
        assert_eq!(config.session_key(), Some("passphrase"));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.refresh_timeout, Duration::from_secs(5));
        assert_eq!(config.max_retries, 7);
        assert!(!config.clear_on_transient_refresh_failure);
        Ok(())
    }

    #[test]
    fn malformed_values_are_rejected() {
        let cases = [
            (ENV_API_URL, "not a url", "api_url"),
            (ENV_API_URL, "ftp://cms.example.com", "api_url"),
            (ENV_HTTP_TIMEOUT_SECS, "soon", "request_timeout"),
            (ENV_REFRESH_TIMEOUT_SECS, "0", "refresh_timeout"),
            (ENV_MAX_RETRIES, "-1", "max_retries"),
            (ENV_CLEAR_ON_TRANSIENT, "maybe", "clear_on_transient_refresh_failure"),
        ];
        for (name, value, expected_field) in cases {
            let result = ClientConfig::from_lookup(lookup_from(&[(name, value)]));
            match result {
                Err(ConfigError::InvalidField { field, .. }) => assert_eq!(field, expected_field),
                other => panic!("expected invalid {expected_field}, got {other:?}"),
            }
        }
    }

    #[test]
    fn file_document_is_partial() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        write!(
            file,
            r#"{{
                "api_url": "https://cms.example.com/",
                "refresh_timeout_secs": 3,
                "admin": {{
                    "login_path": "/v2/admin/login",
                    "refresh_path": "/v2/admin/refresh",
                    "logout_path": "/v2/admin/logout",
                    "storage_key": "cms.admin",
                    "login_route": "/console/login"
                }}
            }}"#
        )?;
        let config = ClientConfig::from_file(file.path())?;
        assert_eq!(config.refresh_timeout, Duration::from_secs(3));
        assert_eq!(config.admin.storage_key, "cms.admin");
        assert_eq!(config.user, EndpointConfig::defaults_for(crate::ClientKind::User));
        assert!(config.session_key().is_none());
        Ok(())
    }

    #[test]
    fn unknown_file_fields_are_parse_errors() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        write!(file, r#"{{ "api_uri": "https://cms.example.com/" }}"#)?;
        assert!(matches!(
            ClientConfig::from_file(file.path()),
            Err(ConfigError::Parse { .. })
        ));
        Ok(())
    }

    #[test]
    fn missing_file_is_read_error() {
        let result = ClientConfig::from_file(Path::new("/definitely/missing/quire.json"));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }
}
