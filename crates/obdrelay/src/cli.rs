//! Clap derive structures for the `obdrelay` CLI.
//!
//! Also compiled by `build.rs` for man page generation, so this module
//! must only depend on clap and clap_complete.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// obdrelay -- forward OBD telemetry to Home Assistant
#[derive(Debug, Parser)]
#[command(
    name = "obdrelay",
    version,
    about = "Relay OBD telemetry samples to Home Assistant",
    long_about = "Reads telemetry samples, buffers and debounces them, and publishes\n\
        each one as a Home Assistant sensor state once the configured\n\
        transmission mode allows it. Optionally switches the WiFi association\n\
        to the publishing network and back to the data collection network.",
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
    /// Configuration profile to use
    #[arg(long, short = 'p', env = "OBDRELAY_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Home Assistant base URL (overrides profile)
    #[arg(long, short = 'u', env = "OBDRELAY_URL", global = true)]
    pub url: Option<String>,

    /// Long-lived access token (overrides profile)
    #[arg(long, env = "OBDRELAY_TOKEN", global = true, hide_env = true)]
    pub token: Option<String>,

    /// Ledger database path (overrides profile)
    #[arg(long, env = "OBDRELAY_LEDGER", global = true)]
    pub ledger: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "OBDRELAY_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Log line format
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Skip confirmation prompts
    #[arg(long, short = 'y', global = true)]
    pub yes: bool,

    /// Accept self-signed TLS certificates
    #[arg(long, short = 'k', env = "OBDRELAY_INSECURE", global = true)]
    pub insecure: bool,

    /// Request timeout in seconds (overrides profile)
    #[arg(long, env = "OBDRELAY_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
}

// ── Output, Color & Log Enums ────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per line
    Json,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Relay samples read as JSON lines until end of input or Ctrl-C
    Run(RunArgs),

    /// Check that Home Assistant is reachable and accepts the token
    Probe,

    /// Inspect and maintain the local sample ledger
    Ledger(LedgerArgs),

    /// Manage configuration and profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Run ──────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Read samples from this file instead of stdin ("-" for stdin)
    #[arg(long, short = 'i')]
    pub input: Option<PathBuf>,

    /// Seconds to keep relaying after end of input so pending samples
    /// can still be sent
    #[arg(long, default_value = "5")]
    pub linger: u64,

    /// Wireless interface used for network switching (auto-detected)
    #[arg(long, env = "OBDRELAY_WIFI_INTERFACE")]
    pub interface: Option<String>,

    /// Do not record samples in the ledger
    #[arg(long)]
    pub no_ledger: bool,

    /// Do not write newly seen keys back to the profile
    #[arg(long)]
    pub no_persist_keys: bool,
}

// ── Ledger ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct LedgerArgs {
    #[command(subcommand)]
    pub command: LedgerCommand,
}

#[derive(Debug, Subcommand)]
pub enum LedgerCommand {
    /// Record counts
    Stats,

    /// Records not yet published
    Unsent {
        /// Max records to show
        #[arg(long, short = 'l')]
        limit: Option<usize>,
    },

    /// Records within a time range (RFC 3339 or epoch milliseconds)
    Range {
        /// Start of range (inclusive)
        #[arg(long)]
        from: String,

        /// End of range (inclusive, defaults to now)
        #[arg(long)]
        to: Option<String>,
    },

    /// Delete sent records older than the retention period
    Purge {
        /// Override the profile's retention, in days
        #[arg(long)]
        older_than_days: Option<u64>,
    },

    /// Delete every record
    Clear,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Interactive configuration wizard
    Init,

    /// Display current configuration (tokens redacted)
    Show,

    /// Print the configuration file path
    Path,

    /// Store the access token in the system keyring
    SetToken,

    /// Choose which keys are published
    Select {
        /// Comma-separated keys; omit to pick interactively, pass "" to
        /// publish everything
        #[arg(long, value_delimiter = ',')]
        keys: Option<Vec<String>>,
    },

    /// Set the default profile
    Use {
        /// Profile name
        name: String,
    },

    /// List configured profiles
    Profiles,
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
