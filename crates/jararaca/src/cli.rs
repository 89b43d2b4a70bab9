//! Clap derive structures for the `jararaca` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// jararaca -- call a jararaca backend or tail its socket events
#[derive(Debug, Parser)]
#[command(
    name = "jararaca",
    version,
    about = "Call jararaca backends and tail their socket events",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file (defaults to the platform config directory)
    #[arg(long, env = "JARARACA_CONFIG_FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Backend base URL (overrides config)
    #[arg(long, short = 'u', global = true)]
    pub base_url: Option<String>,

    /// Access token sent as a bearer token
    #[arg(long, env = "JARARACA_TOKEN", global = true, hide_env = true)]
    pub token: Option<String>,

    /// Refresh token used to renew an expired access token
    #[arg(long, env = "JARARACA_REFRESH_TOKEN", global = true, hide_env = true)]
    pub refresh_token: Option<String>,

    /// Output format
    #[arg(long, short = 'o', default_value = "json", global = true)]
    pub output: OutputFormat,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Accept invalid TLS certificates
    #[arg(long, short = 'k', global = true)]
    pub insecure: bool,

    /// Request timeout in seconds (overrides config)
    #[arg(long, global = true)]
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// Strings unquoted, everything else as compact JSON
    Plain,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Send one request to the backend and print the response
    #[command(alias = "req", alias = "r")]
    Request(RequestArgs),

    /// Print socket events as they arrive
    Listen(ListenArgs),

    /// Print the cache key a query or paged query is stored under
    Key(KeyArgs),

    /// Inspect or create the config file
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
pub struct RequestArgs {
    /// HTTP method (GET, POST, PUT, PATCH, DELETE, ...)
    pub method: String,

    /// Path relative to the base URL; `:name` segments take --param values
    pub path: String,

    /// Path parameter, NAME=VALUE
    #[arg(long = "param", short = 'P', value_name = "NAME=VALUE")]
    pub params: Vec<String>,

    /// Query parameter, NAME=VALUE (repeatable; JSON values allowed)
    #[arg(long = "query", short = 'Q', value_name = "NAME=VALUE")]
    pub query: Vec<String>,

    /// Extra header, NAME=VALUE
    #[arg(long = "header", short = 'H', value_name = "NAME=VALUE")]
    pub headers: Vec<String>,

    /// JSON body, or @PATH to read it from a file
    #[arg(long, short = 'd', conflicts_with = "file")]
    pub body: Option<String>,

    /// Send a file as a multipart upload
    #[arg(long, short = 'f')]
    pub file: Option<PathBuf>,

    /// How to decode the response body
    #[arg(long, value_enum, default_value = "json")]
    pub response: ResponseKind,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ResponseKind {
    Json,
    Text,
    /// Raw bytes written to stdout as received
    Bytes,
}

#[derive(Debug, Args)]
pub struct ListenArgs {
    /// Event identifiers to print; numeric identifiers are matched as codes
    #[arg(required = true)]
    pub events: Vec<String>,

    /// Socket URL (overrides config)
    #[arg(long)]
    pub url: Option<String>,

    /// Exit after this many events
    #[arg(long, short = 'n')]
    pub count: Option<usize>,
}

#[derive(Debug, Args)]
pub struct KeyArgs {
    /// Controller name
    pub class: String,

    /// Method name
    pub method: String,

    /// Call arguments; JSON values keep their type
    pub args: Vec<String>,

    /// Key of the paged query instead of the plain one
    #[arg(long)]
    pub infinite: bool,

    /// Method-wide key that invalidates every call (ignores arguments)
    #[arg(long, conflicts_with = "args")]
    pub base: bool,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the effective configuration as TOML
    Show,

    /// Print the config file path
    Path,

    /// Write a config file
    Init {
        /// Backend base URL
        #[arg(long)]
        base_url: Option<String>,

        /// Socket URL
        #[arg(long)]
        websocket_url: Option<String>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}
