// src/formula/parser.rs

//! Formula file parsing

use crate::error::{Error, Result};
use crate::formula::format::{Formula, StepSpec};
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;

/// Parse a formula from a TOML string
pub fn parse_formula(content: &str) -> Result<Formula> {
    toml::from_str(content).map_err(|e| Error::invalid("<input>", e.to_string()))
}

/// Parse a formula from a file
pub fn parse_formula_file(path: &Path) -> Result<Formula> {
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content).map_err(|e| Error::invalid(path.display().to_string(), e.to_string()))
}

/// Validate a formula for completeness and correctness
///
/// Structural problems are errors; missing optional metadata comes back as
/// warnings.
pub fn validate_formula(formula: &Formula) -> Result<Vec<String>> {
    let mut warnings = Vec::new();
    let name = formula.name();

    if name.is_empty() {
        return Err(Error::invalid("<unnamed>", "formula name cannot be empty"));
    }
    if formula.version().is_empty() {
        return Err(Error::invalid(name, "formula version cannot be empty"));
    }
    if formula.source.url.is_empty() {
        return Err(Error::invalid(name, "source url cannot be empty"));
    }

    for dep in &formula.dependencies {
        if dep.name == name {
            return Err(Error::invalid(name, "formula depends on itself"));
        }
        if dep.since.is_some() && !dep.uses_from_macos {
            warnings.push(format!(
                "Dependency {} sets `since` without `uses_from_macos`",
                dep.name
            ));
        }
    }

    for conflict in &formula.conflicts_with {
        if conflict.name == name {
            return Err(Error::invalid(name, "formula conflicts with itself"));
        }
        if formula.dependencies.iter().any(|d| d.name == conflict.name) {
            return Err(Error::invalid(
                name,
                format!("{} is both a dependency and a conflict", conflict.name),
            ));
        }
    }

    let mut resource_names = HashSet::new();
    for resource in &formula.resources {
        if !resource_names.insert(resource.name.as_str()) {
            return Err(Error::invalid(
                name,
                format!("duplicate resource name: {}", resource.name),
            ));
        }
    }

    for fw in &formula.fails_with {
        if fw.version.is_some() && fw.build.is_some() {
            return Err(Error::invalid(
                name,
                format!("fails_with {} sets both version and build", fw.compiler),
            ));
        }
    }

    for (i, step) in formula.build.iter().enumerate() {
        validate_step(name, "build", i + 1, step)?;
        if step.status.is_some() || !step.assert.is_empty() {
            warnings.push(format!(
                "Build step {} has assertions; they only apply to test steps",
                i + 1
            ));
        }
    }

    if let Some(test) = &formula.test {
        for (i, step) in test.steps.iter().enumerate() {
            validate_step(name, "test", i + 1, step)?;
            for assertion in &step.assert {
                let checks = [
                    assertion.equals.is_some(),
                    assertion.contains.is_some(),
                    assertion.matches.is_some(),
                    assertion.not_contains.is_some(),
                    assertion.not_matches.is_some(),
                    assertion.path_exists.is_some(),
                ];
                if checks.iter().filter(|set| **set).count() != 1 {
                    return Err(Error::invalid(
                        name,
                        format!("test step {} assertion must set exactly one check", i + 1),
                    ));
                }
                for pattern in [&assertion.matches, &assertion.not_matches]
                    .into_iter()
                    .flatten()
                {
                    Regex::new(pattern).map_err(|e| {
                        Error::invalid(name, format!("test step {}: bad regex: {}", i + 1, e))
                    })?;
                }
            }
        }
    } else {
        warnings.push("No test procedure".to_string());
    }

    if formula.formula.license.is_none() {
        warnings.push("Missing license".to_string());
    }
    if formula.formula.desc.is_none() {
        warnings.push("Missing description".to_string());
    }
    if formula.build.is_empty() {
        warnings.push("No build steps".to_string());
    }

    Ok(warnings)
}

fn validate_step(formula: &str, phase: &str, index: usize, step: &StepSpec) -> Result<()> {
    let actions = [
        step.run.is_some(),
        step.inreplace.is_some(),
        step.patch.is_some(),
        step.write.is_some(),
        step.symlink.is_some(),
    ];
    let count = actions.iter().filter(|set| **set).count();
    if count != 1 {
        return Err(Error::invalid(
            formula,
            format!(
                "{} step {} must have exactly one of run, inreplace, patch, write, symlink (found {})",
                phase, index, count
            ),
        ));
    }

    if let Some(argv) = &step.run
        && argv.is_empty()
    {
        return Err(Error::invalid(
            formula,
            format!("{} step {} has an empty command", phase, index),
        ));
    }

    if let Some(inreplace) = &step.inreplace
        && inreplace.regex
    {
        Regex::new(&inreplace.pattern).map_err(|e| {
            Error::invalid(formula, format!("{} step {}: bad regex: {}", phase, index, e))
        })?;
    }

    if let Some(patch) = &step.patch {
        match (&patch.url, &patch.data) {
            (Some(_), None) if patch.sha256.is_none() => {
                return Err(Error::invalid(
                    formula,
                    format!("{} step {}: remote patch has no checksum", phase, index),
                ));
            }
            (Some(_), None) | (None, Some(_)) => {}
            _ => {
                return Err(Error::invalid(
                    formula,
                    format!(
                        "{} step {}: patch needs exactly one of url or data",
                        phase, index
                    ),
                ));
            }
        }
    }

    Ok(())
}
