//! Ferron CLI — run a node or talk to one.
//!
//! `serve` hosts the built-in `node` context until Ctrl+C; `inspect` and
//! `call` start a short-lived client node, dial the target, and exit.

mod cli;
mod cmd;
mod node;
mod ui;

use crate::cli::{Cli, Commands};
use clap::Parser;

fn init_tracing_stderr() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing_stderr();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            ui::error(&format!("Failed to create Tokio runtime: {e}"));
            std::process::exit(1);
        }
    };

    let config = cli.config.as_deref();
    let result = rt.block_on(async {
        match &cli.command {
            Commands::Serve { listen } => cmd::serve::run(config, *listen).await,
            Commands::Inspect { addr } => cmd::inspect::run(config, *addr).await,
            Commands::Call {
                addr,
                context,
                member,
                args,
            } => cmd::call::run(config, *addr, context, member, args).await,
        }
    });

    if let Err(e) = result {
        ui::error(&format!("{e:#}"));
        std::process::exit(1);
    }
}
