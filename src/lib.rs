// src/lib.rs

//! Formula Engine
//!
//! Builds and installs software from declarative formulas: pinned,
//! hash-verified sources, conditional dependencies, isolated build
//! environments and post-install smoke tests.
//!
//! # Architecture
//!
//! - `formula`: definition format, parsing, condition resolution
//! - `graph`: dependency graph and topologically ordered build plans
//! - `fetch`: content-addressed, coalescing resource fetcher
//! - `environment`: per-build isolated environment and toolchain checks
//! - `executor`: sequential build step execution
//! - `test_runner`: test procedures and output assertions
//! - `receipt`: SQLite-backed install receipts
//! - `link`: `opt` and shared-tree symlinks into the cellar
//! - `orchestrator`: drives a plan end to end

pub mod config;
pub mod environment;
mod error;
pub mod executor;
pub mod fetch;
pub mod formula;
pub mod graph;
pub mod hash;
pub mod host;
pub mod link;
pub mod orchestrator;
pub mod receipt;
pub mod test_runner;

pub use config::EngineConfig;
pub use error::{CapturedOutput, Error, ErrorKind, Result};
pub use fetch::{FetchSpec, Fetcher};
pub use formula::{Formula, FormulaSource, ResolvedFormula};
pub use graph::{build_plan, BuildPlan, DependencyGraph};
pub use host::HostFacts;
pub use orchestrator::{InstallOptions, InstallReport, Orchestrator, Outcome, Stage};
pub use receipt::{Receipt, ReceiptStore};
pub use test_runner::{TestOutcome, TestReport};
