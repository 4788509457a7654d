//! CLI command definitions and dispatch for the `exprbox` binary.

pub mod check;
pub mod eval;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use exprbox_infra::config::{default_config_path, load_sandbox_config};
use exprbox_types::bridge::BridgeKind;
use exprbox_types::config::SandboxConfig;

/// Evaluate untrusted workflow expressions in a sandbox.
#[derive(Parser)]
#[command(name = "exprbox", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit log events as JSON lines on stderr.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Export spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    /// Config file (default: `{config_dir}/exprbox/exprbox.toml`).
    #[arg(long, global = true, env = "EXPRBOX_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Evaluate an expression against JSON data.
    Eval(EvalArgs),

    /// Validate an expression without executing it.
    Check {
        /// Expression or `{{ }}` template to validate.
        expression: String,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },

    /// Serve the process backend's wire protocol on stdio.
    #[command(hide = true)]
    Runner,
}

#[derive(Args)]
pub struct EvalArgs {
    /// Expression or `{{ }}` template to evaluate.
    pub expression: String,

    /// JSON file exposed to the expression as `$json`.
    #[arg(long, conflicts_with = "context")]
    pub data: Option<PathBuf>,

    /// JSON file holding a complete evaluation context (items, node outputs, ids).
    #[arg(long)]
    pub context: Option<PathBuf>,

    /// Isolation backend (process, isolate, worker, in_process).
    #[arg(long)]
    pub backend: Option<BridgeKind>,

    /// Permit backends without a memory cap or forced cancellation.
    #[arg(long)]
    pub allow_unconfined: bool,

    /// Per-evaluation timeout in milliseconds.
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Skip the validator and run the compiled code as is.
    #[arg(long)]
    pub no_transform: bool,

    /// Bypass the compiled-expression cache.
    #[arg(long)]
    pub no_cache: bool,

    /// Print evaluator metrics after the result.
    #[arg(long)]
    pub stats: bool,
}

/// Run a parsed command. `Ok(false)` means the command ran but reported a failure.
pub async fn dispatch(cli: Cli) -> anyhow::Result<bool> {
    let config = load_config(cli.config.as_deref()).await;
    match cli.command {
        Commands::Eval(args) => eval::eval(config, args, cli.json, cli.quiet).await,
        Commands::Check { expression } => check::check(&config, &expression, cli.json),
        Commands::Completions { .. } | Commands::Runner => Ok(true),
    }
}

async fn load_config(explicit: Option<&std::path::Path>) -> SandboxConfig {
    match explicit.map(PathBuf::from).or_else(default_config_path) {
        Some(path) => load_sandbox_config(&path).await,
        None => SandboxConfig::default(),
    }
}
