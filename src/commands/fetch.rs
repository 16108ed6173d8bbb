// src/commands/fetch.rs
//! Fetch command

use super::{load_config, open_orchestrator};
use crate::cli::GlobalArgs;
use anyhow::{bail, Result};

/// Download and verify every source the plan for `names` needs
pub fn cmd_fetch(global: &GlobalArgs, names: &[String]) -> Result<()> {
    let orchestrator = open_orchestrator(load_config(global)?)?;
    let results = orchestrator.fetch(names)?;

    let mut failed = 0;
    for (spec, result) in &results {
        match result {
            Ok(path) => println!("[OK] {} -> {}", spec.name, path.display()),
            Err(e) => {
                failed += 1;
                println!("[FAIL] {}: {}", spec.name, e);
            }
        }
    }

    if failed > 0 {
        bail!("{} of {} downloads failed", failed, results.len());
    }
    println!("Fetched {} resources", results.len());
    Ok(())
}
