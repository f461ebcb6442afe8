//! Argument parsing and command dispatch for the Quire CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use quire_config::ClientKind;
use quire_config::defaults::{DEFAULT_API_URL, DEFAULT_REQUEST_TIMEOUT_SECS};
use quire_config::loader::{ENV_API_URL, ENV_HTTP_TIMEOUT_SECS, ENV_SESSION_KEY};
use quire_telemetry::{LogFormat, LoggingConfig, build_sha, init_logging};
use reqwest::Method;
use tracing::Instrument;
use url::Url;
use uuid::Uuid;

use crate::client::{AppContext, CliResult, parse_url};
use crate::commands::request::handle_request;
use crate::commands::session::{handle_login, handle_logout, handle_whoami};

const ENV_STATE_DIR: &str = "QUIRE_STATE_DIR";
const ENV_LOG_LEVEL: &str = "QUIRE_LOG_LEVEL";
const DEFAULT_CLI_LOG_LEVEL: &str = "warn";

/// Parses CLI arguments, executes the requested command, and reports the
/// outcome. Returns the process exit code.
pub async fn run() -> i32 {
    let cli = Cli::parse();
    if let Err(err) = init_logging(&LoggingConfig {
        level: &cli.log_level,
        format: LogFormat::Pretty,
        build_sha: build_sha(),
    }) {
        eprintln!("warning: logging disabled: {err}");
    }

    let command_name = command_label(&cli.command);
    let trace_id = Uuid::new_v4();
    let span = tracing::info_span!("command", command = command_name, %trace_id);

    let result = match AppContext::from_cli(&cli) {
        Ok(ctx) => {
            dispatch(&ctx, cli.command, cli.output)
                .instrument(span.clone())
                .await
        }
        Err(err) => Err(err),
    };

    let _entered = span.enter();
    match result {
        Ok(()) => {
            tracing::debug!("command succeeded");
            0
        }
        Err(err) => {
            let exit_code = err.exit_code();
            eprintln!("error: {}", err.display_message());
            tracing::debug!(exit_code, "command failed");
            exit_code
        }
    }
}

pub(crate) async fn dispatch(
    ctx: &AppContext,
    command: Command,
    format: OutputFormat,
) -> CliResult<()> {
    match command {
        Command::Login(args) => handle_login(ctx, args, format).await,
        Command::Logout => handle_logout(ctx).await,
        Command::Whoami => handle_whoami(ctx, format),
        Command::Request(args) => handle_request(ctx, args, format).await,
    }
}

#[derive(Parser)]
#[command(name = "quire", about = "Session-aware client for the Quire CMS API")]
pub(crate) struct Cli {
    #[arg(
        long,
        global = true,
        env = ENV_API_URL,
        value_parser = parse_url,
        default_value = DEFAULT_API_URL
    )]
    pub(crate) api_url: Url,
    #[arg(
        long,
        global = true,
        env = ENV_SESSION_KEY,
        hide_env_values = true,
        help = "Passphrase protecting the stored session"
    )]
    pub(crate) session_key: Option<String>,
    #[arg(
        long,
        global = true,
        env = ENV_STATE_DIR,
        help = "Directory holding stored sessions"
    )]
    pub(crate) state_dir: Option<PathBuf>,
    #[arg(
        long,
        global = true,
        env = ENV_HTTP_TIMEOUT_SECS,
        default_value_t = DEFAULT_REQUEST_TIMEOUT_SECS
    )]
    pub(crate) timeout: u64,
    #[arg(long, global = true, help = "Use the admin session instead of the user session")]
    pub(crate) admin: bool,
    #[arg(
        long = "output",
        alias = "format",
        global = true,
        value_enum,
        default_value_t = OutputFormat::Table,
        help = "Select output format for commands that render structured data"
    )]
    pub(crate) output: OutputFormat,
    #[arg(long, global = true, env = ENV_LOG_LEVEL, default_value = DEFAULT_CLI_LOG_LEVEL)]
    pub(crate) log_level: String,
    #[command(subcommand)]
    pub(crate) command: Command,
}

impl Cli {
    pub(crate) const fn kind(&self) -> ClientKind {
        if self.admin {
            ClientKind::Admin
        } else {
            ClientKind::User
        }
    }
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Sign in and store the session.
    Login(LoginArgs),
    /// Sign out and forget the stored session.
    Logout,
    /// Show the stored identity.
    Whoami,
    /// Send an authenticated API call.
    Request(RequestArgs),
}

#[derive(Args)]
pub(crate) struct LoginArgs {
    #[arg(long, env = "QUIRE_EMAIL")]
    pub(crate) email: String,
    #[arg(
        long,
        env = "QUIRE_PASSWORD",
        hide_env_values = true,
        help = "Prompted for when omitted on a terminal"
    )]
    pub(crate) password: Option<String>,
}

#[derive(Args)]
pub(crate) struct RequestArgs {
    #[arg(value_parser = parse_method, help = "HTTP method, e.g. GET or POST")]
    pub(crate) method: Method,
    #[arg(help = "API path, e.g. /api/posts")]
    pub(crate) path: String,
    #[arg(long, conflicts_with = "file", help = "Inline JSON request body")]
    pub(crate) data: Option<String>,
    #[arg(short = 'f', long = "file", help = "Read the JSON request body from a file")]
    pub(crate) file: Option<PathBuf>,
    #[arg(long, help = "Print the response as-is without refreshing on 401")]
    pub(crate) raw: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Table,
    Json,
}

pub(crate) const fn command_label(command: &Command) -> &'static str {
    match command {
        Command::Login(_) => "login",
        Command::Logout => "logout",
        Command::Whoami => "whoami",
        Command::Request(_) => "request",
    }
}

fn parse_method(input: &str) -> Result<Method, String> {
    let upper = input.trim().to_ascii_uppercase();
    if upper.is_empty() {
        return Err("HTTP method cannot be empty".to_string());
    }
    Method::from_bytes(upper.as_bytes())
        .map_err(|err| format!("invalid HTTP method '{input}': {err}"))
}
