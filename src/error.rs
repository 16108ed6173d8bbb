// src/error.rs

//! Error taxonomy for the formula engine
//!
//! Every failure the engine can surface maps onto one variant here. The
//! first seven variants are the install-time taxonomy reported to users
//! (`Unreachable` through `TestFailed`); the remainder cover loading,
//! persistence and plumbing.

use std::fmt;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Output captured from an external process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    /// Exit code, if the process exited normally
    pub exit_code: Option<i32>,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
}

impl CapturedOutput {
    /// Whether the process exited with status zero
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

impl fmt::Display for CapturedOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.exit_code {
            Some(code) => writeln!(f, "exit status: {}", code)?,
            None => writeln!(f, "exit status: terminated")?,
        }
        if !self.stdout.is_empty() {
            writeln!(f, "--- stdout ---")?;
            writeln!(f, "{}", self.stdout.trim_end())?;
        }
        if !self.stderr.is_empty() {
            writeln!(f, "--- stderr ---")?;
            writeln!(f, "{}", self.stderr.trim_end())?;
        }
        Ok(())
    }
}

/// Errors produced by the engine
#[derive(Error, Debug)]
pub enum Error {
    /// Every location for a resource failed at the transport level
    #[error("unreachable: {location}: {reason}")]
    Unreachable { location: String, reason: String },

    /// Downloaded or cached bytes did not match the declared hash
    #[error("integrity mismatch for {location}: expected {expected}, got {actual}")]
    IntegrityMismatch {
        location: String,
        expected: String,
        actual: String,
    },

    /// No transport handles the location's scheme
    #[error("unsupported transport '{scheme}' for {location}")]
    Unsupported { scheme: String, location: String },

    /// The dependency graph contains a cycle
    #[error("cyclic dependency: {}", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    /// The active compiler matches a `fails_with` exclusion
    #[error("{formula}: toolchain {compiler} is unsupported: {cause}")]
    ToolchainUnsupported {
        formula: String,
        compiler: String,
        cause: String,
    },

    /// A build step failed; `step` is 1-based
    #[error("{formula}: build failed at step {step} ({command})\n{output}")]
    BuildFailed {
        formula: String,
        step: usize,
        command: String,
        output: CapturedOutput,
    },

    /// The test procedure did not pass
    #[error("{formula}: test failed: {reason}")]
    TestFailed {
        formula: String,
        reason: String,
        output: Option<CapturedOutput>,
    },

    /// Two formulas that cannot share the link tree, or a linked path
    /// already owned by something else
    #[error("{formula} conflicts with {with}: {reason}")]
    Conflict {
        formula: String,
        with: String,
        reason: String,
    },

    /// A formula could not be found in the repository
    #[error("formula not found: {0}")]
    FormulaNotFound(String),

    /// A formula definition is malformed or inconsistent
    #[error("invalid formula {formula}: {reason}")]
    InvalidFormula { formula: String, reason: String },

    /// Configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(String),

    /// The install was cancelled at a step boundary
    #[error("cancelled before {0}")]
    Cancelled(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Receipt database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Coarse classification of an [`Error`], used in reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    Unreachable,
    IntegrityMismatch,
    Unsupported,
    CyclicDependency,
    ToolchainUnsupported,
    BuildFailed,
    TestFailed,
    Conflict,
    FormulaNotFound,
    InvalidFormula,
    Config,
    Cancelled,
    Io,
    Database,
    Json,
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unreachable { .. } => ErrorKind::Unreachable,
            Self::IntegrityMismatch { .. } => ErrorKind::IntegrityMismatch,
            Self::Unsupported { .. } => ErrorKind::Unsupported,
            Self::CyclicDependency { .. } => ErrorKind::CyclicDependency,
            Self::ToolchainUnsupported { .. } => ErrorKind::ToolchainUnsupported,
            Self::BuildFailed { .. } => ErrorKind::BuildFailed,
            Self::TestFailed { .. } => ErrorKind::TestFailed,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::FormulaNotFound(_) => ErrorKind::FormulaNotFound,
            Self::InvalidFormula { .. } => ErrorKind::InvalidFormula,
            Self::Config(_) => ErrorKind::Config,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::Io(_) => ErrorKind::Io,
            Self::Database(_) => ErrorKind::Database,
            Self::Json(_) => ErrorKind::Json,
        }
    }

    /// Shorthand for [`Error::InvalidFormula`]
    pub fn invalid(formula: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidFormula {
            formula: formula.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_display_names_path() {
        let err = Error::CyclicDependency {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "cyclic dependency: a -> b -> a");
        assert_eq!(err.kind(), ErrorKind::CyclicDependency);
    }

    #[test]
    fn test_build_failed_carries_output() {
        let err = Error::BuildFailed {
            formula: "y".into(),
            step: 2,
            command: "make".into(),
            output: CapturedOutput {
                exit_code: Some(2),
                stdout: String::new(),
                stderr: "no rule to make target".into(),
            },
        };
        let msg = err.to_string();
        assert!(msg.contains("y: build failed at step 2"));
        assert!(msg.contains("no rule to make target"));
        assert_eq!(err.kind().to_string(), "build_failed");
    }
}
