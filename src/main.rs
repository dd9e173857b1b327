//! safe - Operator CLI for Vault-compatible KV secret stores
//!
//! Entry point for the CLI application.

use anyhow::{Context, Result};
use clap::Parser;
use kvsafe::config::{CliArgs, Command, TargetConfig};
use kvsafe::{Session, VaultClient};
use std::io::{self, Write};
use std::process::ExitCode;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let args = CliArgs::parse();

    setup_logging(args.verbose)?;

    let target = TargetConfig::from_args(&args).context("Invalid configuration")?;
    let client =
        VaultClient::new(target.client_config()).context("Failed to initialize client")?;
    debug!(addr = %client.addr(), "Connected");

    let session = Session::new(&client)
        .color(console::colors_enabled())
        .progress(args.progress)
        .workers(args.workers);

    let stdout = io::stdout();
    let mut out = stdout.lock();

    match &args.command {
        Command::Ls(ls) => session.ls(ls, &mut out),
        Command::Tree(tree) => session.tree(tree, &mut out),
        Command::Paths(paths) => session.paths(paths, &mut out),
        Command::Get(get) => session.get(get, &mut out),
        Command::Versions(versions) => session.versions(versions, &mut out),
        Command::Export(export) => session.export(export, &mut out),
        Command::Import(import) => session.import(import, &mut out),
    }?;

    out.flush()?;
    Ok(())
}

fn setup_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("kvsafe=debug,warn")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("kvsafe=warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    Ok(())
}
