// src/formula/condition.rs

//! Condition predicates over host facts
//!
//! Conditions gate dependencies, resources, flags, steps and `fails_with`
//! entries. They are plain tagged data so a formula can be inspected
//! without a host, and they are evaluated exactly once when a formula is
//! resolved for an install attempt.
//!
//! ```toml
//! when = { os = "linux" }
//! when = { all = [{ os = "macos" }, { arch = "arm64" }] }
//! when = { compiler = { kind = "clang", max_build = 1499 } }
//! when = { not = { variant = "no-docs" } }
//! ```

use crate::host::{Arch, Compiler, CompilerKind, HostFacts, LenientVersion, Os};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A predicate over [`HostFacts`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// Host OS family equals
    Os(Os),
    /// Host OS release is at least this version
    OsVersionAtLeast(String),
    /// Host architecture equals
    Arch(Arch),
    /// Active compiler matches
    Compiler(CompilerCondition),
    /// A build variant flag is enabled
    Variant(String),
    /// Every inner condition holds
    All(Vec<Condition>),
    /// At least one inner condition holds
    Any(Vec<Condition>),
    /// The inner condition does not hold
    Not(Box<Condition>),
}

/// Compiler identity and optional inclusive version/build range
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilerCondition {
    pub kind: CompilerKind,
    #[serde(default)]
    pub min_version: Option<String>,
    #[serde(default)]
    pub max_version: Option<String>,
    #[serde(default)]
    pub max_build: Option<u32>,
}

impl CompilerCondition {
    fn matches(&self, compiler: &Compiler) -> bool {
        if compiler.kind != self.kind {
            return false;
        }

        if let Some(max_build) = self.max_build {
            match compiler.build {
                Some(build) if build <= max_build => {}
                _ => return false,
            }
        }

        let active = compiler.version.as_deref().and_then(LenientVersion::parse);
        if let Some(min) = self.min_version.as_deref().and_then(LenientVersion::parse) {
            match &active {
                Some(v) if v.cmp_to_bound(&min) != Ordering::Less => {}
                _ => return false,
            }
        }
        if let Some(max) = self.max_version.as_deref().and_then(LenientVersion::parse) {
            match &active {
                Some(v) if v.cmp_to_bound(&max) != Ordering::Greater => {}
                _ => return false,
            }
        }
        true
    }
}

impl Condition {
    /// Evaluate against frozen host facts
    pub fn evaluate(&self, host: &HostFacts) -> bool {
        match self {
            Self::Os(os) => host.os == *os,
            Self::OsVersionAtLeast(min) => {
                let (Some(actual), Some(min)) = (
                    host.os_version.as_deref().and_then(LenientVersion::parse),
                    LenientVersion::parse(min),
                ) else {
                    return false;
                };
                actual.cmp_to_bound(&min) != Ordering::Less
            }
            Self::Arch(arch) => host.arch == *arch,
            Self::Compiler(cond) => cond.matches(&host.compiler),
            Self::Variant(flag) => host.variants.contains(flag),
            Self::All(inner) => inner.iter().all(|c| c.evaluate(host)),
            Self::Any(inner) => inner.iter().any(|c| c.evaluate(host)),
            Self::Not(inner) => !inner.evaluate(host),
        }
    }

    /// Condition for a `uses_from_macos` dependency
    ///
    /// Needed everywhere except on macOS; with `since`, also needed on
    /// macOS releases older than `since`.
    pub fn uses_from_macos(since: Option<&str>) -> Self {
        let provided_by_system = match since {
            Some(version) => Self::All(vec![
                Self::Os(Os::Macos),
                Self::OsVersionAtLeast(version.to_string()),
            ]),
            None => Self::Os(Os::Macos),
        };
        Self::Not(Box::new(provided_by_system))
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |f: &mut fmt::Formatter<'_>, op: &str, inner: &[Condition]| {
            write!(f, "{}(", op)?;
            for (i, c) in inner.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", c)?;
            }
            write!(f, ")")
        };
        match self {
            Self::Os(os) => write!(f, "os={}", os),
            Self::OsVersionAtLeast(v) => write!(f, "os_version>={}", v),
            Self::Arch(arch) => write!(f, "arch={}", arch),
            Self::Compiler(c) => {
                write!(f, "compiler={}", c.kind)?;
                if let Some(v) = &c.min_version {
                    write!(f, ">={}", v)?;
                }
                if let Some(v) = &c.max_version {
                    write!(f, "<={}", v)?;
                }
                if let Some(b) = c.max_build {
                    write!(f, " build<={}", b)?;
                }
                Ok(())
            }
            Self::Variant(v) => write!(f, "variant={}", v),
            Self::All(inner) => join(f, "all", inner),
            Self::Any(inner) => join(f, "any", inner),
            Self::Not(inner) => write!(f, "not({})", inner),
        }
    }
}
