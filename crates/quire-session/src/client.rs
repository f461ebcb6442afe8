//! Request pipeline and the public session client.
//!
//! # Design
//! - Each call attaches the current access credential, dispatches, and on a
//!   401 engages the [`RefreshCoordinator`] once before replaying.
//! - The replay is terminal: a second 401 ends the session instead of
//!   refreshing again.
//! - A 401 for a call that carried no credential, or for the refresh call
//!   itself, never triggers a refresh.
//! - When another call already replaced the credential a request was sent
//!   with, the request replays with the newer credential without refreshing.
//! - A refresh only installs its grant while the credential it replaced is
//!   still current; a session cleared meanwhile stays cleared.
//! - Refresh failures end the session, except transient ones when
//!   `clear_on_transient_refresh_failure` is off; those surface as
//!   `Retryable` and keep the session.
//! - `RequestOptions::skip_auth_handling` returns the raw response untouched.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use quire_config::{ClientConfig, ClientKind, EndpointConfig};
use quire_telemetry::{redact_credential, redact_text};
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::classify::ClassifiedError;
use crate::error::{SessionError, SessionResult};
use crate::model::{ClearReason, SessionCleared, SessionState, SignInRequest, TokenGrant};
use crate::refresh::{RefreshCoordinator, RefreshFailure, RefreshOutcome};
use crate::state::{ListenerId, SessionContext, Swap};
use crate::storage::KeyValueStore;
use crate::store::EncryptedSessionStore;
use crate::sync::SyncHandle;
use crate::transport::{HttpTransport, OutboundRequest, Transport, TransportResponse};

const INVALID_CREDENTIALS: &str = "invalid credentials";

/// Per-call options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Return the raw response without refresh, replay, or classification.
    pub skip_auth_handling: bool,
}

impl RequestOptions {
    /// Options for calls that expect authentication failures as a normal
    /// outcome.
    #[must_use]
    pub const fn skip_auth() -> Self {
        Self {
            skip_auth_handling: true,
        }
    }
}

/// Response returned by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    /// Response status.
    pub status: StatusCode,
    /// `Retry-After` delay, when the server sent one.
    pub retry_after: Option<Duration>,
    /// Raw body bytes.
    pub body: Vec<u8>,
}

impl ApiResponse {
    /// Decode the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ClassifiedError::Unknown`] when the body does not decode.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ClassifiedError> {
        serde_json::from_slice(&self.body).map_err(|err| ClassifiedError::Unknown {
            status: Some(self.status.as_u16()),
            message: Some(format!("unexpected response body: {err}")),
        })
    }

    /// Body as text, replacing invalid UTF-8.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Classification of this response, or `None` on success.
    #[must_use]
    pub fn error(&self) -> Option<ClassifiedError> {
        if self.status.is_success() {
            None
        } else {
            Some(ClassifiedError::from_response(&TransportResponse {
                status: self.status,
                retry_after: self.retry_after,
                body: self.body.clone(),
            }))
        }
    }
}

impl From<TransportResponse> for ApiResponse {
    fn from(response: TransportResponse) -> Self {
        Self {
            status: response.status,
            retry_after: response.retry_after,
            body: response.body,
        }
    }
}

/// Why a sign-in produced no session.
#[derive(Debug, Error)]
pub enum SignInError {
    /// The server refused the credentials or the call failed.
    #[error("sign-in rejected")]
    Rejected(#[source] ClassifiedError),
    /// The new session could not be persisted.
    #[error("signed-in session could not be persisted")]
    Persist(#[source] SessionError),
}

/// Snapshot of the refresh coordinator, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RefreshStatus {
    /// Whether a refresh is running.
    pub in_flight: bool,
    /// Callers suspended on it.
    pub waiters: usize,
    /// Refresh calls started over the client's lifetime.
    pub refreshes_started: u64,
}

/// Authenticated API client for one client kind.
pub struct SessionClient {
    endpoints: EndpointConfig,
    clear_on_transient: bool,
    context: Arc<SessionContext>,
    coordinator: RefreshCoordinator,
    transport: Arc<dyn Transport>,
    sync: Mutex<Option<SyncHandle>>,
}

impl SessionClient {
    /// Build a client over the given transport and storage handle, restore
    /// the persisted session, and start observing other instances.
    ///
    /// Cross-instance sync runs on the current Tokio runtime; outside a
    /// runtime the client works but does not observe other instances.
    #[must_use]
    pub fn connect(
        kind: ClientKind,
        config: &ClientConfig,
        transport: Arc<dyn Transport>,
        storage: Arc<dyn KeyValueStore>,
    ) -> Self {
        let endpoints = config.endpoints(kind).clone();
        let events = storage.subscribe();
        let store =
            EncryptedSessionStore::new(storage, endpoints.storage_key.clone(), config.session_key());
        let context = Arc::new(SessionContext::restore(
            kind,
            endpoints.login_route.clone(),
            store,
        ));
        let sync = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => Some(SyncHandle::spawn(&runtime, Arc::clone(&context), events)),
            Err(_) => {
                warn!(kind = %kind, "no async runtime; cross-instance sync disabled");
                None
            }
        };
        Self {
            endpoints,
            clear_on_transient: config.clear_on_transient_refresh_failure,
            context,
            coordinator: RefreshCoordinator::new(config.refresh_timeout),
            transport,
            sync: Mutex::new(sync),
        }
    }

    /// Build a client that talks HTTP to the configured API.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::TransportBuild`] when the HTTP client cannot
    /// be constructed.
    pub fn from_config(
        kind: ClientKind,
        config: &ClientConfig,
        storage: Arc<dyn KeyValueStore>,
    ) -> SessionResult<Self> {
        let transport = HttpTransport::new(config)?;
        Ok(Self::connect(kind, config, Arc::new(transport), storage))
    }

    /// Client kind this instance serves.
    #[must_use]
    pub fn kind(&self) -> ClientKind {
        self.context.kind()
    }

    /// Endpoint configuration in use.
    #[must_use]
    pub const fn endpoints(&self) -> &EndpointConfig {
        &self.endpoints
    }

    /// Current session snapshot.
    #[must_use]
    pub fn session(&self) -> SessionState {
        self.context.snapshot()
    }

    /// Whether a credential pair is held.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.context.is_authenticated()
    }

    /// Number of logical session changes observed so far.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.context.revision()
    }

    /// Watch session changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.context.subscribe()
    }

    /// Register a callback fired once whenever the session ends.
    pub fn on_session_cleared<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&SessionCleared) + Send + Sync + 'static,
    {
        self.context.add_listener(Arc::new(callback))
    }

    /// Remove a callback. Returns whether it was registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.context.remove_listener(id)
    }

    /// Diagnostics for the refresh coordinator.
    #[must_use]
    pub fn refresh_status(&self) -> RefreshStatus {
        RefreshStatus {
            in_flight: self.coordinator.is_in_flight(),
            waiters: self.coordinator.waiter_count(),
            refreshes_started: self.coordinator.refreshes_started(),
        }
    }

    /// Whether the cross-instance subscription is running.
    #[must_use]
    pub fn is_syncing(&self) -> bool {
        self.sync
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(SyncHandle::is_active)
    }

    /// Stop observing other instances.
    pub fn shutdown(&self) {
        if let Some(mut handle) = self
            .sync
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.unsubscribe();
            debug!(kind = %self.kind(), "session sync stopped");
        }
    }

    /// Send a call through the pipeline.
    ///
    /// # Errors
    ///
    /// Returns the [`ClassifiedError`] for failed calls. With
    /// `skip_auth_handling`, only transport failures are errors.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        options: RequestOptions,
    ) -> Result<ApiResponse, ClassifiedError> {
        let credential = self.context.access_credential();
        let response = self.dispatch(&method, path, body, &credential).await?;
        if options.skip_auth_handling {
            return Ok(response.into());
        }
        if response.status != StatusCode::UNAUTHORIZED {
            return finish(response);
        }
        if credential.is_empty() || path == self.endpoints.refresh_path {
            debug!(kind = %self.kind(), path, "401 without refreshable credential");
            return Err(ClassifiedError::AuthExpired);
        }

        let fresh = self.fresh_credential(&credential).await?;
        let replay = self.dispatch(&method, path, body, &fresh).await?;
        if replay.status == StatusCode::UNAUTHORIZED {
            warn!(
                kind = %self.kind(),
                path,
                credential = %redact_credential(&fresh),
                "refreshed credential rejected"
            );
            self.context
                .expire(&fresh, ClearReason::CredentialRejected);
            return Err(ClassifiedError::AuthExpired);
        }
        finish(replay)
    }

    /// `GET` and decode JSON.
    ///
    /// # Errors
    ///
    /// Returns the call's [`ClassifiedError`] or a decode failure.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClassifiedError> {
        self.request(Method::GET, path, None, RequestOptions::default())
            .await?
            .json()
    }

    /// `POST` a JSON body and decode the JSON answer.
    ///
    /// # Errors
    ///
    /// Returns the call's [`ClassifiedError`] or a decode failure.
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ClassifiedError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send_json(Method::POST, path, body).await
    }

    /// `PUT` a JSON body and decode the JSON answer.
    ///
    /// # Errors
    ///
    /// Returns the call's [`ClassifiedError`] or a decode failure.
    pub async fn put_json<B, T>(&self, path: &str, body: &B) -> Result<T, ClassifiedError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send_json(Method::PUT, path, body).await
    }

    /// `PATCH` a JSON body and decode the JSON answer.
    ///
    /// # Errors
    ///
    /// Returns the call's [`ClassifiedError`] or a decode failure.
    pub async fn patch_json<B, T>(&self, path: &str, body: &B) -> Result<T, ClassifiedError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send_json(Method::PATCH, path, body).await
    }

    /// `DELETE` a resource.
    ///
    /// # Errors
    ///
    /// Returns the call's [`ClassifiedError`].
    pub async fn delete(&self, path: &str) -> Result<(), ClassifiedError> {
        self.request(Method::DELETE, path, None, RequestOptions::default())
            .await
            .map(|_| ())
    }

    /// Exchange sign-in credentials for a session and persist it.
    ///
    /// # Errors
    ///
    /// Returns [`SignInError::Rejected`] when the server refuses the
    /// credentials (as `Validation`) or the call fails, and
    /// [`SignInError::Persist`] when the session cannot be saved.
    pub async fn sign_in(&self, credentials: &SignInRequest) -> Result<SessionState, SignInError> {
        let body = json!({
            "email": credentials.email,
            "password": credentials.password,
        });
        let response = self
            .request(
                Method::POST,
                &self.endpoints.login_path,
                Some(&body),
                RequestOptions::skip_auth(),
            )
            .await
            .map_err(SignInError::Rejected)?;
        if let Some(rejection) = response.error() {
            return Err(SignInError::Rejected(sign_in_rejection(rejection)));
        }
        let grant: TokenGrant = response.json().map_err(SignInError::Rejected)?;
        let state = SessionState::from_grant(grant, None);
        if !state.is_authenticated() {
            return Err(SignInError::Rejected(ClassifiedError::Unknown {
                status: Some(response.status.as_u16()),
                message: Some("login response carried no credentials".to_string()),
            }));
        }
        self.context
            .install(state.clone())
            .map_err(SignInError::Persist)?;
        info!(
            kind = %self.kind(),
            email = %state.identity_email,
            credential = %redact_credential(&state.access_credential),
            "signed in"
        );
        Ok(state)
    }

    /// Notify the server (best effort) and end the session.
    pub async fn sign_out(&self) {
        if self.context.is_authenticated() {
            match self
                .request(
                    Method::POST,
                    &self.endpoints.logout_path,
                    None,
                    RequestOptions::skip_auth(),
                )
                .await
            {
                Ok(response) if response.status.is_success() => {
                    debug!(kind = %self.kind(), "server acknowledged sign-out");
                }
                Ok(response) => {
                    warn!(kind = %self.kind(), status = response.status.as_u16(), "server refused sign-out");
                }
                Err(error) => {
                    warn!(kind = %self.kind(), %error, "sign-out notification failed");
                }
            }
        }
        self.context.terminate(ClearReason::SignedOut);
    }

    async fn send_json<B, T>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<T, ClassifiedError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = serde_json::to_value(body).map_err(|err| ClassifiedError::Unknown {
            status: None,
            message: Some(format!("request body is not serializable: {err}")),
        })?;
        self.request(method, path, Some(&body), RequestOptions::default())
            .await?
            .json()
    }

    async fn dispatch(
        &self,
        method: &Method,
        path: &str,
        body: Option<&Value>,
        credential: &str,
    ) -> Result<TransportResponse, ClassifiedError> {
        let request =
            OutboundRequest::new(method.clone(), path, body.cloned()).with_bearer(credential);
        self.transport.send(request).await.map_err(|err| {
            debug!(kind = %self.kind(), path, error = %err, "transport failure");
            ClassifiedError::from_transport(&err)
        })
    }

    async fn fresh_credential(&self, stale: &str) -> Result<String, ClassifiedError> {
        let current = self.context.access_credential();
        if current.is_empty() {
            return Err(ClassifiedError::AuthExpired);
        }
        if current != stale {
            debug!(
                kind = %self.kind(),
                credential = %redact_credential(&current),
                "credential already replaced; replaying"
            );
            return Ok(current);
        }
        match self.coordinator.obtain(|| self.refresh_session(stale)).await {
            Ok(fresh) => Ok(fresh),
            Err(RefreshFailure::Superseded) => {
                let current = self.context.access_credential();
                if current.is_empty() {
                    Err(ClassifiedError::AuthExpired)
                } else {
                    Ok(current)
                }
            }
            Err(failure) => {
                if self.clears_on(&failure) {
                    self.context.expire(stale, ClearReason::RefreshFailed);
                    Err(ClassifiedError::AuthExpired)
                } else {
                    Err(ClassifiedError::Retryable {
                        status: None,
                        message: Some(failure.to_string()),
                    })
                }
            }
        }
    }

    const fn clears_on(&self, failure: &RefreshFailure) -> bool {
        self.clear_on_transient || !failure.is_transient()
    }

    async fn refresh_session(&self, stale: &str) -> RefreshOutcome {
        let snapshot = self.context.snapshot();
        if snapshot.access_credential != stale {
            debug!(kind = %self.kind(), "credential replaced before refresh started");
            return if snapshot.is_authenticated() {
                Ok(snapshot.access_credential)
            } else {
                Err(RefreshFailure::Superseded)
            };
        }
        let outcome = self.exchange_refresh(&snapshot).await;
        match &outcome {
            Ok(fresh) => info!(
                kind = %self.kind(),
                credential = %redact_credential(fresh),
                "session refreshed"
            ),
            Err(RefreshFailure::Superseded) => {
                info!(kind = %self.kind(), "session changed during refresh; grant discarded");
            }
            Err(failure) => {
                warn!(kind = %self.kind(), %failure, "session refresh failed");
                if self.clears_on(failure) {
                    self.context
                        .expire(&snapshot.access_credential, ClearReason::RefreshFailed);
                }
            }
        }
        outcome
    }

    async fn exchange_refresh(&self, snapshot: &SessionState) -> RefreshOutcome {
        if snapshot.refresh_credential.is_empty() {
            return Err(RefreshFailure::MissingCredential);
        }
        let request = OutboundRequest::new(
            Method::POST,
            self.endpoints.refresh_path.clone(),
            Some(json!({ "refresh_token": snapshot.refresh_credential })),
        );
        let response = self
            .transport
            .send(request)
            .await
            .map_err(RefreshFailure::Transport)?;
        let status = response.status;
        if !status.is_success() {
            debug!(
                status = status.as_u16(),
                body = %redact_text(&String::from_utf8_lossy(&response.body)),
                "refresh endpoint refused"
            );
            return Err(
                if status.is_server_error()
                    || status == StatusCode::REQUEST_TIMEOUT
                    || status == StatusCode::TOO_MANY_REQUESTS
                {
                    RefreshFailure::Unavailable {
                        status: status.as_u16(),
                    }
                } else {
                    RefreshFailure::Rejected {
                        status: status.as_u16(),
                    }
                },
            );
        }
        let grant: TokenGrant =
            serde_json::from_slice(&response.body).map_err(|_| RefreshFailure::MalformedGrant)?;
        let next = SessionState::from_grant(grant, Some(snapshot));
        if !next.is_authenticated() {
            return Err(RefreshFailure::MalformedGrant);
        }
        let fresh = next.access_credential.clone();
        match self
            .context
            .install_if_current(&snapshot.access_credential, next)
        {
            Ok(Swap::Installed) => Ok(fresh),
            Ok(Swap::Superseded | Swap::RemovedElsewhere) => Err(RefreshFailure::Superseded),
            Err(err) => {
                error!(kind = %self.kind(), error = %err, "failed to persist refreshed session");
                Err(RefreshFailure::Persist {
                    detail: err.to_string(),
                })
            }
        }
    }
}

impl std::fmt::Debug for SessionClient {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SessionClient")
            .field("kind", &self.kind())
            .field("authenticated", &self.is_authenticated())
            .field("coordinator", &self.coordinator)
            .finish_non_exhaustive()
    }
}

fn finish(response: TransportResponse) -> Result<ApiResponse, ClassifiedError> {
    if response.status.is_success() {
        Ok(response.into())
    } else {
        Err(ClassifiedError::from_response(&response))
    }
}

fn sign_in_rejection(classified: ClassifiedError) -> ClassifiedError {
    match classified {
        ClassifiedError::AuthExpired => ClassifiedError::Validation {
            message: Some(INVALID_CREDENTIALS.to_string()),
            field_errors: std::collections::BTreeMap::new(),
        },
        ClassifiedError::Validation {
            message,
            field_errors,
        } => ClassifiedError::Validation {
            message: message.or_else(|| Some(INVALID_CREDENTIALS.to_string())),
            field_errors,
        },
        other => other,
    }
}
