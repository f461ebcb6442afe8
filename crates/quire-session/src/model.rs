//! Session record and the payloads that create or end it.
//!
//! # Design
//! - A session is replaced as one unit; there are no partial updates.
//! - An access credential without a refresh credential is not a session:
//!   [`SessionState::normalized`] turns it into the logged-out state.
//! - `Debug` output never contains credentials or passwords.

use std::fmt::{self, Formatter};

use quire_config::ClientKind;
use quire_telemetry::redact_credential;
use serde::{Deserialize, Serialize};

/// Identity and credentials of one client instance.
///
/// The serialized form is the plaintext of the persisted envelope.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionState {
    /// Short-lived credential attached to API calls.
    pub access_credential: String,
    /// Longer-lived credential used only to obtain a new access credential.
    pub refresh_credential: String,
    /// Email of the signed-in identity.
    pub identity_email: String,
    /// Numeric role level, when the API reports one.
    pub role_level: Option<i64>,
    /// Display name of the signed-in identity.
    pub display_name: String,
    /// Comma-separated capability codes.
    pub permission_mask: Option<String>,
    /// Tenant the identity belongs to.
    pub tenant_id: String,
    /// Opaque client-specific label.
    pub extra: String,
}

impl SessionState {
    /// Whether this record carries a usable credential pair.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        !self.access_credential.is_empty() && !self.refresh_credential.is_empty()
    }

    /// Whether this is the logged-out record.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Collapse invalid records to the logged-out state.
    #[must_use]
    pub fn normalized(self) -> Self {
        if self.is_authenticated() {
            self
        } else {
            Self::default()
        }
    }

    /// Whether two records describe the same credential and identity.
    #[must_use]
    pub fn same_identity(&self, other: &Self) -> bool {
        self.access_credential == other.access_credential
            && self.identity_email == other.identity_email
    }

    /// Build a session from a token grant.
    ///
    /// Fields the grant omits are carried over from `previous`, which lets a
    /// refresh endpoint answer with credentials only. A refresh credential the
    /// grant does not rotate is kept as well.
    #[must_use]
    pub fn from_grant(grant: TokenGrant, previous: Option<&Self>) -> Self {
        let role_level = grant
            .role
            .or_else(|| previous.and_then(|prev| prev.role_level));
        let permission_mask = grant
            .permissions
            .or_else(|| previous.and_then(|prev| prev.permission_mask.clone()));
        Self {
            access_credential: grant.access_token,
            refresh_credential: carry(
                grant.refresh_token,
                previous.map(|prev| &prev.refresh_credential),
            ),
            identity_email: carry(grant.email, previous.map(|prev| &prev.identity_email)),
            role_level,
            display_name: carry(grant.name, previous.map(|prev| &prev.display_name)),
            permission_mask,
            tenant_id: carry(grant.tenant_id, previous.map(|prev| &prev.tenant_id)),
            extra: carry(grant.extra, previous.map(|prev| &prev.extra)),
        }
        .normalized()
    }

    /// Capability codes from the permission mask.
    pub fn permissions(&self) -> impl Iterator<Item = &str> {
        self.permission_mask
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|code| !code.is_empty())
    }
}

fn carry(value: Option<String>, fallback: Option<&String>) -> String {
    value
        .filter(|value| !value.is_empty())
        .or_else(|| fallback.cloned())
        .unwrap_or_default()
}

impl fmt::Debug for SessionState {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SessionState")
            .field("access_credential", &redact_credential(&self.access_credential))
            .field(
                "refresh_credential",
                &redact_credential(&self.refresh_credential),
            )
            .field("identity_email", &self.identity_email)
            .field("role_level", &self.role_level)
            .field("display_name", &self.display_name)
            .field("permission_mask", &self.permission_mask)
            .field("tenant_id", &self.tenant_id)
            .field("extra", &self.extra)
            .finish()
    }
}

/// Credentials and identity returned by the login and refresh endpoints.
#[derive(Clone, Default, Deserialize)]
pub struct TokenGrant {
    /// New access credential.
    #[serde(alias = "accessToken")]
    pub access_token: String,
    /// New refresh credential, when the server rotates it.
    #[serde(default, alias = "refreshToken")]
    pub refresh_token: Option<String>,
    /// Identity email.
    #[serde(default)]
    pub email: Option<String>,
    /// Role level.
    #[serde(default)]
    pub role: Option<i64>,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Comma-separated capability codes.
    #[serde(default)]
    pub permissions: Option<String>,
    /// Tenant identifier.
    #[serde(default, alias = "tenantId")]
    pub tenant_id: Option<String>,
    /// Opaque client label.
    #[serde(default)]
    pub extra: Option<String>,
}

impl fmt::Debug for TokenGrant {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("TokenGrant")
            .field("access_token", &redact_credential(&self.access_token))
            .field(
                "refresh_token",
                &self.refresh_token.as_deref().map(redact_credential),
            )
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

/// Sign-in credentials posted to the login endpoint.
#[derive(Clone, Serialize)]
pub struct SignInRequest {
    /// Account email.
    pub email: String,
    /// Account password.
    pub password: String,
}

impl SignInRequest {
    /// Build a sign-in payload.
    #[must_use]
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for SignInRequest {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SignInRequest")
            .field("email", &self.email)
            .field("password", &quire_telemetry::REDACTED)
            .finish()
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClearReason {
    /// The user signed out on this instance.
    SignedOut,
    /// The refresh credential was rejected or the refresh call failed.
    RefreshFailed,
    /// A freshly refreshed credential was still rejected.
    CredentialRejected,
    /// Another instance sharing the profile signed out.
    RemoteSignOut,
}

/// Notification delivered to session-cleared listeners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionCleared {
    /// Client instance whose session ended.
    pub kind: ClientKind,
    /// Why it ended.
    pub reason: ClearReason,
    /// UI route to redirect to.
    pub login_route: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grant(access: &str) -> TokenGrant {
        TokenGrant {
            access_token: access.to_string(),
            refresh_token: Some(format!("refresh-{access}")),
            email: Some("editor@quire.test".to_string()),
            role: Some(2),
            name: Some("Editor".to_string()),
            permissions: Some("posts.write, comments.moderate".to_string()),
            tenant_id: Some("tenant-1".to_string()),
            extra: Some("admin".to_string()),
        }
    }

    #[test]
    fn access_without_refresh_is_logged_out() {
        let state = SessionState {
            access_credential: "T1".to_string(),
            identity_email: "a@b.c".to_string(),
            ..SessionState::default()
        };
        assert!(!state.is_authenticated());
        assert!(state.normalized().is_empty());
    }

    #[test]
    fn grant_populates_every_field() {
        let state = SessionState::from_grant(grant("T1"), None);
        assert!(state.is_authenticated());
        assert_eq!(state.refresh_credential, "refresh-T1");
        assert_eq!(state.role_level, Some(2));
        assert_eq!(
            state.permissions().collect::<Vec<_>>(),
            vec!["posts.write", "comments.moderate"]
        );
    }

    #[test]
    fn partial_grant_keeps_previous_identity() {
        let previous = SessionState::from_grant(grant("T1"), None);
        let refreshed = SessionState::from_grant(
            TokenGrant {
                access_token: "T2".to_string(),
                ..TokenGrant::default()
            },
            Some(&previous),
        );
        assert_eq!(refreshed.access_credential, "T2");
        assert_eq!(refreshed.refresh_credential, "refresh-T1");
        assert_eq!(refreshed.identity_email, "editor@quire.test");
        assert_eq!(refreshed.permission_mask, previous.permission_mask);
        assert!(!refreshed.same_identity(&previous));
    }

    #[test]
    fn grant_without_refresh_credential_is_rejected() {
        let state = SessionState::from_grant(
            TokenGrant {
                access_token: "T1".to_string(),
                ..TokenGrant::default()
            },
            None,
        );
        assert!(state.is_empty());
    }

    #[test]
    fn grant_accepts_camel_case_fields() -> Result<(), serde_json::Error> {
        let grant: TokenGrant =
            serde_json::from_str(r#"{"accessToken":"T1","refreshToken":"R1","tenantId":"t"}"#)?;
        assert_eq!(grant.access_token, "T1");
        assert_eq!(grant.refresh_token.as_deref(), Some("R1"));
        assert_eq!(grant.tenant_id.as_deref(), Some("t"));
        Ok(())
    }

    #[test]
    fn debug_output_hides_secrets() {
        let state = SessionState::from_grant(grant("secret-access"), None);
        let rendered = format!("{state:?}");
        assert!(!rendered.contains("secret-access"));
        assert!(rendered.contains("editor@quire.test"));

        let request = SignInRequest::new("a@b.c", "hunter2");
        assert!(!format!("{request:?}").contains("hunter2"));
    }
}
