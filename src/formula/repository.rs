// src/formula/repository.rs

//! Where formulas come from
//!
//! The engine only ever asks for a formula by name. A [`DirectorySource`]
//! serves `<root>/<name>.toml` files; a [`MemorySource`] serves formulas
//! built in code, which is what the integration tests use.

use crate::error::{Error, Result};
use crate::formula::format::Formula;
use crate::formula::parser::{parse_formula, parse_formula_file};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A lookup of formulas by name
pub trait FormulaSource: Send + Sync {
    /// Load one formula, failing with [`Error::FormulaNotFound`] if absent
    fn load(&self, name: &str) -> Result<Formula>;

    /// All formula names this source can serve, sorted
    fn names(&self) -> Result<Vec<String>>;
}

/// A directory of `<name>.toml` formula files
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.toml", name))
    }
}

impl FormulaSource for DirectorySource {
    fn load(&self, name: &str) -> Result<Formula> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(Error::FormulaNotFound(name.to_string()));
        }
        let path = self.path_for(name);
        if !path.is_file() {
            return Err(Error::FormulaNotFound(name.to_string()));
        }
        debug!("Loading formula {} from {}", name, path.display());

        let formula = parse_formula_file(&path)?;
        if formula.name() != name {
            return Err(Error::invalid(
                name,
                format!(
                    "{} declares name '{}'",
                    path.display(),
                    formula.name()
                ),
            ));
        }
        Ok(formula)
    }

    fn names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "toml")
                && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
            {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Formulas held in memory
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    formulas: BTreeMap<String, Formula>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a formula, replacing any with the same name
    pub fn insert(&mut self, formula: Formula) {
        self.formulas.insert(formula.name().to_string(), formula);
    }

    /// Parse and add a TOML formula
    pub fn insert_toml(&mut self, content: &str) -> Result<()> {
        self.insert(parse_formula(content)?);
        Ok(())
    }

    /// Builder-style [`MemorySource::insert`]
    pub fn with(mut self, formula: Formula) -> Self {
        self.insert(formula);
        self
    }
}

impl FormulaSource for MemorySource {
    fn load(&self, name: &str) -> Result<Formula> {
        self.formulas
            .get(name)
            .cloned()
            .ok_or_else(|| Error::FormulaNotFound(name.to_string()))
    }

    fn names(&self) -> Result<Vec<String>> {
        Ok(self.formulas.keys().cloned().collect())
    }
}
