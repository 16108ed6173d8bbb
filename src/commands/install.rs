// src/commands/install.rs
//! Install command

use super::{load_config, open_orchestrator};
use crate::cli::GlobalArgs;
use anyhow::{bail, Result};
use formula_engine::orchestrator::{InstallOptions, InstallReport, Outcome};
use formula_engine::Error;
use tracing::info;

/// Build and install `names` with their dependencies
pub fn cmd_install(
    global: &GlobalArgs,
    names: &[String],
    test: bool,
    force: bool,
    keep_going: bool,
    jobs: Option<usize>,
    keep_builddir: bool,
) -> Result<()> {
    let mut config = load_config(global)?;
    if keep_builddir {
        config.keep_builddir = true;
    }
    let mut options = InstallOptions::from_config(&config);
    options.run_tests = test;
    options.force = force;
    options.keep_going |= keep_going;
    if let Some(jobs) = jobs {
        options.jobs = jobs.max(1);
    }

    let orchestrator = open_orchestrator(config)?;
    let report = orchestrator.install(names, &options)?;
    print_report(&report);

    let Some(failure) = report.failure else {
        info!("Install complete");
        return Ok(());
    };
    if let Error::BuildFailed { output, .. } | Error::TestFailed { output: Some(output), .. } =
        &failure.error
    {
        eprintln!("{}", output);
    }
    bail!("{}", failure)
}

pub(super) fn print_report(report: &InstallReport) {
    for entry in &report.formulas {
        let marker = match entry.outcome {
            Outcome::Installed { verified: Some(false) } => "[!!]",
            Outcome::Installed { .. } => "[OK]",
            Outcome::Satisfied => "[--]",
            Outcome::Failed { .. } => "[FAIL]",
            Outcome::NotAttempted { .. } => "[SKIP]",
        };
        println!("{} {} {}: {}", marker, entry.name, entry.version, entry.outcome);
    }
    for failure in &report.other_failures {
        println!("Also failed: {}", failure);
    }
    for entry in report.formulas.iter().filter(|e| !e.caveats.is_empty()) {
        println!("==> Caveats for {}", entry.name);
        for caveat in &entry.caveats {
            println!("{}", caveat);
        }
    }
}
