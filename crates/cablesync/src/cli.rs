//! Clap derive structures for the `cablesync` CLI.

use clap::{Args, Parser, Subcommand, ValueEnum};

use cablesync_core::DeviceState;

// ── Top-Level CLI ────────────────────────────────────────────────────

/// cablesync -- live status for cable devices
#[derive(Debug, Parser)]
#[command(
    name = "cablesync",
    version,
    about = "Watch cable device status from the command line",
    long_about = "Keeps a live, batched view of device status streamed from the\n\
        device server over a websocket, seeded from its REST device list.",
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
    /// Server profile to use
    #[arg(long, short = 'p', env = "CABLESYNC_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Websocket endpoint (overrides profile)
    #[arg(long, short = 's', env = "CABLESYNC_SERVER", global = true)]
    pub server: Option<String>,

    /// REST base URL for the device list (overrides profile)
    #[arg(long, env = "CABLESYNC_API_URL", global = true)]
    pub api_url: Option<String>,

    /// Bearer token
    #[arg(long, env = "CABLESYNC_TOKEN", global = true, hide_env = true)]
    pub token: Option<String>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "CABLESYNC_OUTPUT",
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

    /// Accept self-signed TLS certificates
    #[arg(long, short = 'k', env = "CABLESYNC_INSECURE", global = true)]
    pub insecure: bool,

    /// Request timeout in seconds (overrides profile)
    #[arg(long, env = "CABLESYNC_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON (one line per batch when watching)
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one device id per line
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

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List every device the server knows about
    #[command(alias = "dev", alias = "d")]
    Devices(DevicesArgs),

    /// Stream batched status changes until interrupted
    #[command(alias = "w")]
    Watch(WatchArgs),

    /// Inspect CLI configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Devices ──────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct DevicesArgs {
    /// Only show devices in this state (online, offline, error)
    #[arg(long)]
    pub status: Option<DeviceState>,
}

// ── Watch ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Device to watch (repeatable); omit to watch the whole fleet
    #[arg(long = "device", short = 'd')]
    pub devices: Vec<String>,

    /// Only show devices in this state (online, offline, error)
    #[arg(long)]
    pub status: Option<DeviceState>,

    /// Exit after this many batches
    #[arg(long, short = 'n')]
    pub count: Option<usize>,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file location
    Path,

    /// Display current configuration (tokens masked)
    Show,

    /// List configured profiles
    Profiles,
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
