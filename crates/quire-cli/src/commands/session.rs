use std::io::{self, IsTerminal};

use anyhow::anyhow;
use quire_session::SignInRequest;

use crate::cli::{LoginArgs, OutputFormat};
use crate::client::{AppContext, CliError, CliResult};
use crate::output::{IdentityView, render_identity};

pub(crate) async fn handle_login(
    ctx: &AppContext,
    args: LoginArgs,
    format: OutputFormat,
) -> CliResult<()> {
    let email = args.email.trim();
    if email.is_empty() {
        return Err(CliError::validation("email cannot be empty"));
    }
    let password = resolve_password(args.password)?;

    let state = ctx
        .session
        .sign_in(&SignInRequest::new(email, password))
        .await
        .map_err(CliError::from_sign_in)?;
    render_identity(&IdentityView::new(ctx.session.kind(), &state), format)
}

pub(crate) async fn handle_logout(ctx: &AppContext) -> CliResult<()> {
    if !ctx.session.is_authenticated() {
        println!("Not signed in.");
        return Ok(());
    }
    ctx.session.sign_out().await;
    println!("Signed out.");
    Ok(())
}

pub(crate) fn handle_whoami(ctx: &AppContext, format: OutputFormat) -> CliResult<()> {
    let state = ctx.session.session();
    if !state.is_authenticated() {
        return Err(CliError::validation(format!(
            "no {} session stored under {}; run `quire login`",
            ctx.session.kind(),
            ctx.state_dir.display()
        )));
    }
    render_identity(&IdentityView::new(ctx.session.kind(), &state), format)
}

fn resolve_password(supplied: Option<String>) -> CliResult<String> {
    if let Some(password) = supplied {
        if password.is_empty() {
            return Err(CliError::validation("password cannot be empty"));
        }
        return Ok(password);
    }

    if io::stdin().is_terminal() {
        let password = rpassword::prompt_password("Password: ").map_err(|err| {
            CliError::failure(anyhow!("failed to read password from stdin: {err}"))
        })?;
        if password.is_empty() {
            return Err(CliError::validation("password cannot be empty"));
        }
        Ok(password)
    } else {
        Err(CliError::validation(
            "password required; supply via --password or QUIRE_PASSWORD when running non-interactively",
        ))
    }
}
