// src/formula/mod.rs

//! Formulas: declarative build recipes
//!
//! A formula names one upstream project and says how to turn its pinned
//! source into an installed prefix:
//! - Source archive and resources, each with an integrity hash
//! - Dependencies (build-only, runtime, test-only), optionally conditional
//! - Known-bad toolchains (`fails_with`)
//! - Flag composition and build steps
//! - A smoke test run against the installed result
//!
//! # Example Formula
//!
//! ```toml
//! [formula]
//! name = "hello"
//! version = "2.12"
//! license = "GPL-3.0-or-later"
//!
//! [source]
//! url = "https://ftp.gnu.org/gnu/hello/hello-%(version)s.tar.gz"
//! sha256 = "cf04af86dc085268c5f4470fbae49b18afbc221b78096aab842d934a76bad0ab"
//!
//! [[build]]
//! run = ["./configure", "*std_configure_args"]
//!
//! [[build]]
//! run = ["make", "install"]
//!
//! [test]
//! [[test.steps]]
//! run = ["%(bin)s/hello", "--greeting=brew"]
//! [[test.steps.assert]]
//! equals = "brew\n"
//! ```

pub mod condition;
mod format;
pub mod parser;
pub mod repository;
mod resolve;

pub use condition::{Condition, CompilerCondition};
pub use format::{
    pkg_version, substitute, AssertionSpec, CaveatSpec, ConflictSpec, DependencyKind,
    DependencySpec, EnvironmentSection, FailsWith, FlagOverride, Formula, FormulaSection,
    InreplaceSpec, PatchSpec, ResourceSpec, SourceSection, StepSpec, Stream, SymlinkSpec,
    TestSection, WriteSpec,
};
pub use parser::{parse_formula, parse_formula_file, validate_formula};
pub use repository::{DirectorySource, FormulaSource, MemorySource};
pub use resolve::{
    patch_fetch_spec, resolve, ConditionChoice, Dependency, Flags, ResolvedFormula,
    StagedResource,
};
