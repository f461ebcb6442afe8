//! Error taxonomy exposed to callers and their retry policy.
//!
//! # Design
//! - Every failed request maps to exactly one [`ClassifiedError`] variant;
//!   callers never see raw statuses.
//! - Only `RateLimited` and `Retryable` are worth retrying. Auth, permission,
//!   lookup and validation failures are terminal.
//! - Server messages are read from problem-details style bodies
//!   (`detail`/`message`/`error`/`title`); field errors from `errors`,
//!   `field_errors`, or `invalid_params`.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use quire_config::ClientConfig;
use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::transport::{TransportError, TransportResponse};

const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(250);
const MAX_DELAY: Duration = Duration::from_secs(30);

/// Classification of a failed request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassifiedError {
    /// The session is gone; the caller must sign in again.
    #[error("session expired")]
    AuthExpired,
    /// The identity lacks permission for the call.
    #[error("forbidden")]
    Forbidden {
        /// Server-provided message.
        message: Option<String>,
    },
    /// The target does not exist.
    #[error("not found")]
    NotFound {
        /// Server-provided message.
        message: Option<String>,
    },
    /// The request was rejected as invalid.
    #[error("validation failed")]
    Validation {
        /// Server-provided message.
        message: Option<String>,
        /// Messages keyed by field name.
        field_errors: BTreeMap<String, Vec<String>>,
    },
    /// The server asked the client to slow down.
    #[error("rate limited")]
    RateLimited {
        /// Delay the server asked for.
        retry_after: Option<Duration>,
    },
    /// A transient server-side or network failure.
    #[error("temporarily unavailable")]
    Retryable {
        /// Response status, absent for network failures.
        status: Option<u16>,
        /// Server-provided or transport message.
        message: Option<String>,
    },
    /// Anything else.
    #[error("request failed")]
    Unknown {
        /// Response status, absent for network failures.
        status: Option<u16>,
        /// Server-provided or transport message.
        message: Option<String>,
    },
}

impl ClassifiedError {
    /// Classify a non-success response.
    #[must_use]
    pub fn from_response(response: &TransportResponse) -> Self {
        let body = serde_json::from_slice::<Value>(&response.body).ok();
        let message = body.as_ref().and_then(server_message);
        let status = response.status;
        match status {
            StatusCode::UNAUTHORIZED => Self::AuthExpired,
            StatusCode::FORBIDDEN => Self::Forbidden { message },
            StatusCode::NOT_FOUND | StatusCode::GONE => Self::NotFound { message },
            StatusCode::BAD_REQUEST | StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
                Self::Validation {
                    message,
                    field_errors: body.as_ref().map(field_errors).unwrap_or_default(),
                }
            }
            StatusCode::TOO_MANY_REQUESTS => Self::RateLimited {
                retry_after: response.retry_after,
            },
            StatusCode::REQUEST_TIMEOUT => Self::Retryable {
                status: Some(status.as_u16()),
                message,
            },
            _ if status.is_server_error() => Self::Retryable {
                status: Some(status.as_u16()),
                message,
            },
            _ => Self::Unknown {
                status: Some(status.as_u16()),
                message,
            },
        }
    }

    /// Classify a failure to obtain any response.
    #[must_use]
    pub fn from_transport(error: &TransportError) -> Self {
        let message = Some(error.to_string());
        if error.is_transient() {
            Self::Retryable {
                status: None,
                message,
            }
        } else {
            Self::Unknown {
                status: None,
                message,
            }
        }
    }

    /// Message suitable for showing to a user, when the server sent one.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::AuthExpired | Self::RateLimited { .. } => None,
            Self::Forbidden { message }
            | Self::NotFound { message }
            | Self::Validation { message, .. }
            | Self::Retryable { message, .. }
            | Self::Unknown { message, .. } => message.as_deref(),
        }
    }
}

/// Whether the caller's retry policy may repeat a request that failed with
/// `error`.
#[must_use]
pub const fn is_retryable(error: &ClassifiedError) -> bool {
    matches!(
        error,
        ClassifiedError::RateLimited { .. } | ClassifiedError::Retryable { .. }
    )
}

fn server_message(body: &Value) -> Option<String> {
    ["detail", "message", "error", "title"]
        .iter()
        .find_map(|key| body.get(key).and_then(Value::as_str))
        .map(str::trim)
        .filter(|message| !message.is_empty())
        .map(str::to_string)
}

fn field_errors(body: &Value) -> BTreeMap<String, Vec<String>> {
    let mut fields: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for key in ["errors", "field_errors"] {
        if let Some(map) = body.get(key).and_then(Value::as_object) {
            for (field, messages) in map {
                let entry = fields.entry(field.clone()).or_default();
                match messages {
                    Value::String(message) => entry.push(message.clone()),
                    Value::Array(items) => entry.extend(
                        items
                            .iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string),
                    ),
                    _ => {}
                }
            }
        }
    }
    if let Some(params) = body.get("invalid_params").and_then(Value::as_array) {
        for param in params {
            let field = param
                .get("pointer")
                .or_else(|| param.get("name"))
                .and_then(Value::as_str)
                .map(|pointer| pointer.trim_start_matches('/').replace('/', "."));
            let message = param
                .get("message")
                .or_else(|| param.get("reason"))
                .and_then(Value::as_str);
            if let (Some(field), Some(message)) = (field, message) {
                fields.entry(field).or_default().push(message.to_string());
            }
        }
    }
    fields.retain(|_, messages| !messages.is_empty());
    fields
}

/// Bounded retry with exponential backoff for retryable classifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles per attempt.
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Policy using the configured retry bound.
    #[must_use]
    pub const fn from_config(config: &ClientConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }

    /// Whether a request that failed on attempt `attempt` (zero-based)
    /// should be tried again.
    #[must_use]
    pub const fn should_retry(&self, attempt: u32, error: &ClassifiedError) -> bool {
        attempt < self.max_retries && is_retryable(error)
    }

    /// Delay before the retry following attempt `attempt`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32, error: &ClassifiedError) -> Duration {
        if let ClassifiedError::RateLimited {
            retry_after: Some(delay),
        } = error
        {
            return (*delay).min(MAX_DELAY);
        }
        let factor = 2_u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(MAX_DELAY)
    }

    /// Run `operation`, retrying retryable failures.
    ///
    /// # Errors
    ///
    /// Returns the last classification once retries are exhausted or the
    /// failure is terminal.
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T, ClassifiedError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClassifiedError>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) if self.should_retry(attempt, &error) => {
                    let delay = self.delay_for(attempt, &error);
                    debug!(attempt, ?delay, %error, "retrying request");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: quire_config::defaults::DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn response(status: StatusCode, body: &Value) -> TransportResponse {
        TransportResponse::json(status, body)
    }

    #[test]
    fn statuses_map_to_taxonomy() {
        let empty = json!({});
        let cases = [
            (StatusCode::UNAUTHORIZED, ClassifiedError::AuthExpired),
            (
                StatusCode::FORBIDDEN,
                ClassifiedError::Forbidden { message: None },
            ),
            (
                StatusCode::GONE,
                ClassifiedError::NotFound { message: None },
            ),
            (
                StatusCode::TOO_MANY_REQUESTS,
                ClassifiedError::RateLimited { retry_after: None },
            ),
            (
                StatusCode::BAD_GATEWAY,
                ClassifiedError::Retryable {
                    status: Some(502),
                    message: None,
                },
            ),
            (
                StatusCode::IM_A_TEAPOT,
                ClassifiedError::Unknown {
                    status: Some(418),
                    message: None,
                },
            ),
        ];
        for (status, expected) in cases {
            assert_eq!(
                ClassifiedError::from_response(&response(status, &empty)),
                expected
            );
        }
    }

    #[test]
    fn validation_collects_field_errors() {
        let body = json!({
            "title": "invalid request",
            "detail": "slug already taken",
            "errors": {"slug": ["must be unique"], "title": "required"},
            "invalid_params": [{"pointer": "/meta/tags", "message": "too many"}]
        });
        let classified =
            ClassifiedError::from_response(&response(StatusCode::UNPROCESSABLE_ENTITY, &body));
        match classified {
            ClassifiedError::Validation {
                message,
                field_errors,
            } => {
                assert_eq!(message.as_deref(), Some("slug already taken"));
                assert_eq!(field_errors["slug"], vec!["must be unique"]);
                assert_eq!(field_errors["title"], vec!["required"]);
                assert_eq!(field_errors["meta.tags"], vec!["too many"]);
            }
            other => panic!("expected validation, got {other:?}"),
        }
    }

    #[test]
    fn transport_failures_split_on_transience() {
        assert!(is_retryable(&ClassifiedError::from_transport(
            &TransportError::Timeout
        )));
        assert!(!is_retryable(&ClassifiedError::from_transport(
            &TransportError::InvalidUrl {
                url: "nope".to_string()
            }
        )));
        assert!(!is_retryable(&ClassifiedError::AuthExpired));
        assert!(!is_retryable(&ClassifiedError::NotFound { message: None }));
    }

    #[test]
    fn delays_back_off_and_honour_retry_after() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
        };
        let transient = ClassifiedError::Retryable {
            status: Some(503),
            message: None,
        };
        assert_eq!(policy.delay_for(0, &transient), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2, &transient), Duration::from_millis(400));
        assert_eq!(policy.delay_for(40, &transient), MAX_DELAY);
        let limited = ClassifiedError::RateLimited {
            retry_after: Some(Duration::from_secs(2)),
        };
        assert_eq!(policy.delay_for(0, &limited), Duration::from_secs(2));
        assert!(policy.should_retry(2, &transient));
        assert!(!policy.should_retry(3, &transient));
    }

    #[tokio::test]
    async fn run_stops_after_bounded_retries() {
        let policy = RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
        };
        let counter = AtomicU32::new(0);
        let attempts = &counter;
        let result: Result<(), _> = policy
            .run(move || async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(ClassifiedError::Retryable {
                    status: Some(503),
                    message: None,
                })
            })
            .await;
        assert!(matches!(result, Err(ClassifiedError::Retryable { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);

        attempts.store(0, Ordering::SeqCst);
        let result: Result<(), _> = policy
            .run(move || async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(ClassifiedError::Forbidden { message: None })
            })
            .await;
        assert!(matches!(result, Err(ClassifiedError::Forbidden { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
