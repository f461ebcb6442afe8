//! Output renderers and formatting helpers for CLI commands.

use std::fmt::Write as _;

use anyhow::anyhow;
use quire_config::ClientKind;
use quire_session::{ApiResponse, SessionState};
use quire_telemetry::redact_credential;
use serde::Serialize;
use serde_json::Value;

use crate::cli::OutputFormat;
use crate::client::{CliError, CliResult};

/// Identity view with credentials reduced to fingerprints.
#[derive(Debug, Serialize)]
pub(crate) struct IdentityView<'a> {
    kind: ClientKind,
    email: &'a str,
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<i64>,
    #[serde(skip_serializing_if = "str::is_empty")]
    tenant: &'a str,
    permissions: Vec<&'a str>,
    access_credential: String,
    refresh_credential: String,
}

impl<'a> IdentityView<'a> {
    pub(crate) fn new(kind: ClientKind, state: &'a SessionState) -> Self {
        Self {
            kind,
            email: &state.identity_email,
            name: &state.display_name,
            role: state.role_level,
            tenant: &state.tenant_id,
            permissions: state.permissions().collect(),
            access_credential: redact_credential(&state.access_credential),
            refresh_credential: redact_credential(&state.refresh_credential),
        }
    }
}

pub(crate) fn format_identity(view: &IdentityView<'_>, format: OutputFormat) -> CliResult<String> {
    match format {
        OutputFormat::Json => to_pretty_json(view),
        OutputFormat::Table => {
            let mut text = String::new();
            let _ = writeln!(text, "kind: {}", view.kind);
            let _ = writeln!(text, "email: {}", view.email);
            if !view.name.is_empty() {
                let _ = writeln!(text, "name: {}", view.name);
            }
            if let Some(role) = view.role {
                let _ = writeln!(text, "role: {role}");
            }
            if !view.tenant.is_empty() {
                let _ = writeln!(text, "tenant: {}", view.tenant);
            }
            if !view.permissions.is_empty() {
                let _ = writeln!(text, "permissions: {}", view.permissions.join(", "));
            }
            let _ = writeln!(text, "access credential: {}", view.access_credential);
            let _ = write!(text, "refresh credential: {}", view.refresh_credential);
            Ok(text)
        }
    }
}

pub(crate) fn render_identity(view: &IdentityView<'_>, format: OutputFormat) -> CliResult<()> {
    println!("{}", format_identity(view, format)?);
    Ok(())
}

/// Render a response body. JSON bodies are pretty-printed; anything else is
/// shown as text.
pub(crate) fn format_response(response: &ApiResponse, format: OutputFormat) -> CliResult<String> {
    let body = serde_json::from_slice::<Value>(&response.body).ok();
    match format {
        OutputFormat::Json => {
            let envelope = serde_json::json!({
                "status": response.status.as_u16(),
                "body": body.unwrap_or_else(|| Value::String(response.text())),
            });
            to_pretty_json(&envelope)
        }
        OutputFormat::Table => {
            let mut text = format!("status: {}", response.status);
            let rendered = match body {
                Some(value) => to_pretty_json(&value)?,
                None => response.text(),
            };
            if !rendered.trim().is_empty() {
                text.push('\n');
                text.push_str(&rendered);
            }
            Ok(text)
        }
    }
}

pub(crate) fn render_response(response: &ApiResponse, format: OutputFormat) -> CliResult<()> {
    println!("{}", format_response(response, format)?);
    Ok(())
}

fn to_pretty_json<T: Serialize + ?Sized>(value: &T) -> CliResult<String> {
    serde_json::to_string_pretty(value)
        .map_err(|err| CliError::failure(anyhow!("failed to format JSON: {err}")))
}
