//! Application context and error types shared by CLI commands.

use std::env;
use std::fmt::{self, Display, Formatter};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use quire_config::{ClientConfig, ClientKind};
use quire_session::{ClassifiedError, FileProfile, SessionClient, SessionError, SignInError};
use url::Url;

use crate::cli::Cli;

/// CLI-level error type to distinguish validation from operational failures.
#[derive(Debug)]
pub(crate) enum CliError {
    Validation(String),
    Failure(anyhow::Error),
}

/// Convenience alias for functions returning a `CliError`.
pub(crate) type CliResult<T> = Result<T, CliError>;

impl CliError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub(crate) fn failure(error: impl Into<anyhow::Error>) -> Self {
        Self::Failure(error.into())
    }

    pub(crate) const fn exit_code(&self) -> i32 {
        match self {
            Self::Validation(_) => 2,
            Self::Failure(_) => 3,
        }
    }

    pub(crate) fn display_message(&self) -> String {
        match self {
            Self::Validation(message) => message.clone(),
            Self::Failure(error) => format!("{error:#}"),
        }
    }

    /// Map a pipeline error onto the CLI's two outcome classes.
    pub(crate) fn from_classified(error: &ClassifiedError) -> Self {
        match error {
            ClassifiedError::AuthExpired => {
                Self::validation("not signed in or session expired; run `quire login`")
            }
            ClassifiedError::Validation { .. } => Self::validation(describe(error)),
            _ => Self::failure(anyhow!(describe(error))),
        }
    }

    pub(crate) fn from_sign_in(error: SignInError) -> Self {
        match error {
            SignInError::Rejected(classified) => Self::from_classified(&classified),
            SignInError::Persist(SessionError::KeyUnconfigured { .. }) => Self::validation(
                "a session key is required to store the session (pass --session-key or set QUIRE_SESSION_KEY)",
            ),
            SignInError::Persist(source) => {
                Self::failure(anyhow::Error::new(source).context("failed to store the session"))
            }
        }
    }
}

impl Display for CliError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str("cli error")
    }
}

impl std::error::Error for CliError {}

/// Human-readable rendering of a classified failure.
pub(crate) fn describe(error: &ClassifiedError) -> String {
    let mut text = error.message().map_or_else(
        || error.to_string(),
        |message| format!("{error}: {message}"),
    );
    match error {
        ClassifiedError::Retryable {
            status: Some(status),
            ..
        }
        | ClassifiedError::Unknown {
            status: Some(status),
            ..
        } => {
            let _ = write!(text, " (status {status})");
        }
        ClassifiedError::RateLimited {
            retry_after: Some(delay),
        } => {
            let _ = write!(text, " (retry after {}s)", delay.as_secs());
        }
        ClassifiedError::Validation { field_errors, .. } => {
            for (field, messages) in field_errors {
                let _ = write!(text, "\n  {field}: {}", messages.join("; "));
            }
        }
        _ => {}
    }
    text
}

/// Application context passed to command handlers.
pub(crate) struct AppContext {
    pub(crate) session: SessionClient,
    pub(crate) state_dir: PathBuf,
}

impl AppContext {
    /// Resolve configuration from the environment, apply CLI overrides, and
    /// open the session profile.
    pub(crate) fn from_cli(cli: &Cli) -> CliResult<Self> {
        let mut config = ClientConfig::from_env()
            .map_err(|err| CliError::validation(format!("invalid configuration: {err}")))?;
        config.api_url = cli.api_url.clone();
        config.request_timeout = Duration::from_secs(cli.timeout);
        if let Some(key) = &cli.session_key {
            config.session_key = Some(key.clone());
        }
        config
            .validate()
            .map_err(|err| CliError::validation(format!("invalid configuration: {err}")))?;

        let state_dir = cli.state_dir.clone().unwrap_or_else(default_state_dir);
        Self::new(&config, cli.kind(), &state_dir)
    }

    pub(crate) fn new(
        config: &ClientConfig,
        kind: ClientKind,
        state_dir: &Path,
    ) -> CliResult<Self> {
        let profile = FileProfile::open(state_dir)
            .with_context(|| format!("failed to open state directory {}", state_dir.display()))
            .map_err(CliError::failure)?;
        let session = SessionClient::from_config(kind, config, Arc::new(profile.handle()))
            .context("failed to build HTTP client")
            .map_err(CliError::failure)?;
        Ok(Self {
            session,
            state_dir: state_dir.to_path_buf(),
        })
    }
}

/// Parse the API URL provided to the CLI.
pub(crate) fn parse_url(input: &str) -> Result<Url, String> {
    input
        .parse::<Url>()
        .map_err(|err| format!("invalid URL '{input}': {err}"))
}

fn default_state_dir() -> PathBuf {
    if let Some(dir) = env::var_os("XDG_STATE_HOME").filter(|dir| !dir.is_empty()) {
        return PathBuf::from(dir).join("quire");
    }
    env::var_os("HOME").map_or_else(
        || PathBuf::from(".quire"),
        |home| PathBuf::from(home).join(".local").join("state").join("quire"),
    )
}
