// src/commands/validate.rs
//! Validate command

use anyhow::{Context, Result};
use formula_engine::formula::{parse_formula_file, resolve, validate_formula};
use formula_engine::HostFacts;
use std::path::Path;

/// Parse and check a formula file, printing any warnings
pub fn cmd_validate(file: &Path) -> Result<()> {
    println!("Reading formula: {}", file.display());
    let formula = parse_formula_file(file)
        .with_context(|| format!("Failed to parse formula: {}", file.display()))?;
    let warnings = validate_formula(&formula).context("Formula validation failed")?;

    // Conditions and placeholders must also resolve on this host
    resolve(&formula, &HostFacts::detect()).context("Formula does not resolve on this host")?;

    println!("Formula: {} version {}", formula.name(), formula.version());
    for warning in &warnings {
        println!("Warning: {}", warning);
    }
    if warnings.is_empty() {
        println!("[OK] No issues found");
    } else {
        println!("[OK] {} warning(s)", warnings.len());
    }
    Ok(())
}
