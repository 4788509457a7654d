//! exprbox CLI entry point.
//!
//! Binary name: `exprbox`
//!
//! The hidden `runner` subcommand is the child side of the process backend;
//! it must start before any async runtime or log subscriber exists, since
//! it confines its own process and owns stdout for the wire protocol.

mod cli;

use std::process::ExitCode;

use clap::Parser;
use clap_complete::generate;
use exprbox_observe::tracing_setup::{LogOptions, init_tracing, shutdown_tracing};

use cli::{Cli, Commands};

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    if let Commands::Runner = cli.command {
        exprbox_infra::process::run_stdio()?;
        return Ok(ExitCode::SUCCESS);
    }

    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "exprbox", &mut std::io::stdout());
        return Ok(ExitCode::SUCCESS);
    }

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,exprbox=debug",
        _ => "trace",
    };
    let log = LogOptions::new(filter).json(cli.log_json).otel(cli.otel);
    init_tracing(&log).map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let outcome = runtime.block_on(cli::dispatch(cli));
    shutdown_tracing();

    Ok(if outcome? {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
