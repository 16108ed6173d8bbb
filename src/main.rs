// src/main.rs

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

use cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over -v
    let default_level = if cli.global.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let global = &cli.global;
    match cli.command {
        Commands::Install {
            names,
            test,
            force,
            keep_going,
            jobs,
            keep_builddir,
        } => commands::cmd_install(global, &names, test, force, keep_going, jobs, keep_builddir),
        Commands::Test { name } => commands::cmd_test(global, &name),
        Commands::Fetch { names } => commands::cmd_fetch(global, &names),
        Commands::Plan { names, test } => commands::cmd_plan(global, &names, test),
        Commands::Validate { file } => commands::cmd_validate(&file),
        Commands::Receipts { name, json } => commands::cmd_receipts(global, name.as_deref(), json),
    }
}
