//! Shared fixtures for session integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use quire_config::EndpointConfig;
use quire_session::{
    ClientConfig, ClientKind, EncryptedSessionStore, KeyValueStore, MemoryProfile,
    OutboundRequest, SessionClient, SessionState, Transport, TransportError, TransportResponse,
};
use reqwest::StatusCode;
use serde_json::json;
use tokio::sync::Semaphore;
use url::Url;

pub const SESSION_KEY: &str = "integration-key";

/// Which scripted endpoint a request path hits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Refresh,
    Login,
    Logout,
    Api,
}

/// Resolve auth paths of both client kinds; everything else is an API call.
pub fn route(path: &str) -> Route {
    for kind in [ClientKind::User, ClientKind::Admin] {
        let endpoints = EndpointConfig::defaults_for(kind);
        if path == endpoints.refresh_path {
            return Route::Refresh;
        }
        if path == endpoints.login_path {
            return Route::Login;
        }
        if path == endpoints.logout_path {
            return Route::Logout;
        }
    }
    Route::Api
}

/// How the scripted refresh endpoint answers.
#[derive(Debug, Clone)]
pub enum RefreshReply {
    Grant { access: String, refresh: String },
    Reject,
    Unavailable,
    Hang,
}

/// A dispatched non-auth call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub path: String,
    pub bearer: Option<String>,
}

/// In-process API that accepts exactly one access credential at a time.
pub struct ScriptedTransport {
    valid: Mutex<Option<String>>,
    reply: Mutex<RefreshReply>,
    gate: Option<Semaphore>,
    refresh_calls: AtomicUsize,
    dispatches: Mutex<Vec<Dispatch>>,
}

impl ScriptedTransport {
    pub fn new(valid: Option<&str>, reply: RefreshReply) -> Arc<Self> {
        Arc::new(Self::build(valid, reply, None))
    }

    /// Refresh calls block until [`ScriptedTransport::release_refresh`].
    pub fn gated(valid: Option<&str>, reply: RefreshReply) -> Arc<Self> {
        Arc::new(Self::build(valid, reply, Some(Semaphore::new(0))))
    }

    fn build(valid: Option<&str>, reply: RefreshReply, gate: Option<Semaphore>) -> Self {
        Self {
            valid: Mutex::new(valid.map(str::to_string)),
            reply: Mutex::new(reply),
            gate,
            refresh_calls: AtomicUsize::new(0),
            dispatches: Mutex::new(Vec::new()),
        }
    }

    pub fn release_refresh(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1024);
        }
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn dispatches(&self) -> Vec<Dispatch> {
        self.dispatches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Invalidate every outstanding access credential.
    pub fn expire_all(&self) {
        *self.valid.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn set_valid(&self, token: &str) {
        *self.valid.lock().unwrap_or_else(PoisonError::into_inner) = Some(token.to_string());
    }

    fn is_valid(&self, bearer: Option<&str>) -> bool {
        let valid = self.valid.lock().unwrap_or_else(PoisonError::into_inner);
        bearer.is_some() && valid.as_deref() == bearer
    }

    async fn refresh(&self) -> TransportResponse {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        let reply = self
            .reply
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match reply {
            RefreshReply::Grant { access, refresh } => {
                self.set_valid(&access);
                TransportResponse::json(
                    StatusCode::OK,
                    &json!({"access_token": access, "refresh_token": refresh}),
                )
            }
            RefreshReply::Reject => TransportResponse::json(
                StatusCode::UNAUTHORIZED,
                &json!({"detail": "refresh credential invalid"}),
            ),
            RefreshReply::Unavailable => TransportResponse::empty(StatusCode::SERVICE_UNAVAILABLE),
            RefreshReply::Hang => std::future::pending().await,
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: OutboundRequest) -> Result<TransportResponse, TransportError> {
        match route(&request.path) {
            Route::Refresh => Ok(self.refresh().await),
            Route::Login => {
                self.set_valid("T1");
                Ok(TransportResponse::json(
                    StatusCode::OK,
                    &json!({
                        "access_token": "T1",
                        "refresh_token": "R1",
                        "email": "editor@quire.test",
                        "name": "Editor"
                    }),
                ))
            }
            Route::Logout => Ok(TransportResponse::empty(StatusCode::NO_CONTENT)),
            Route::Api => {
                let path = request.path.as_str();
                self.dispatches
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(Dispatch {
                        path: path.to_string(),
                        bearer: request.bearer.clone(),
                    });
                tokio::task::yield_now().await;
                if self.is_valid(request.bearer.as_deref()) {
                    Ok(TransportResponse::json(StatusCode::OK, &json!({"path": path})))
                } else {
                    Ok(TransportResponse::empty(StatusCode::UNAUTHORIZED))
                }
            }
        }
    }
}

pub fn config() -> anyhow::Result<ClientConfig> {
    Ok(ClientConfig::new(Url::parse("http://quire.test")?).with_session_key(SESSION_KEY))
}

pub fn session(access: &str, refresh: &str) -> SessionState {
    SessionState {
        access_credential: access.to_string(),
        refresh_credential: refresh.to_string(),
        identity_email: "editor@quire.test".to_string(),
        display_name: "Editor".to_string(),
        ..SessionState::default()
    }
}

/// Persist a session into `profile` as if a previous run had signed in.
pub fn seed(
    profile: &MemoryProfile,
    config: &ClientConfig,
    kind: ClientKind,
    state: &SessionState,
) -> anyhow::Result<()> {
    let store = EncryptedSessionStore::new(
        Arc::new(profile.handle()),
        config.endpoints(kind).storage_key.clone(),
        config.session_key(),
    );
    store.save(state)?;
    Ok(())
}

pub fn client(
    profile: &MemoryProfile,
    config: &ClientConfig,
    kind: ClientKind,
    transport: &Arc<ScriptedTransport>,
) -> Arc<SessionClient> {
    let storage: Arc<dyn KeyValueStore> = Arc::new(profile.handle());
    let transport: Arc<dyn Transport> = transport.clone();
    Arc::new(SessionClient::connect(kind, config, transport, storage))
}

/// Count session-cleared notifications.
pub fn count_clears(client: &SessionClient) -> Arc<AtomicUsize> {
    let fired = Arc::new(AtomicUsize::new(0));
    let sink = Arc::clone(&fired);
    client.on_session_cleared(move |_| {
        sink.fetch_add(1, Ordering::SeqCst);
    });
    fired
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .is_ok()
}
