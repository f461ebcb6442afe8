use std::fs;

use anyhow::Context;
use quire_session::RequestOptions;
use serde_json::Value;

use crate::cli::{OutputFormat, RequestArgs};
use crate::client::{AppContext, CliError, CliResult};
use crate::output::render_response;

pub(crate) async fn handle_request(
    ctx: &AppContext,
    args: RequestArgs,
    format: OutputFormat,
) -> CliResult<()> {
    if !args.path.starts_with('/') {
        return Err(CliError::validation("API path must start with '/'"));
    }
    let body = load_body(&args)?;
    let options = if args.raw {
        RequestOptions::skip_auth()
    } else {
        RequestOptions::default()
    };

    let response = ctx
        .session
        .request(args.method, &args.path, body.as_ref(), options)
        .await
        .map_err(|err| CliError::from_classified(&err))?;
    render_response(&response, format)
}

fn load_body(args: &RequestArgs) -> CliResult<Option<Value>> {
    let raw = match (&args.data, &args.file) {
        (Some(data), _) => data.clone(),
        (None, Some(path)) => fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))
            .map_err(CliError::failure)?,
        (None, None) => return Ok(None),
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|err| CliError::validation(format!("request body is not valid JSON: {err}")))
}
