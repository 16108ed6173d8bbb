// src/cli/mod.rs
//! CLI definitions for the formula engine
//!
//! Command implementations live in the `commands` module.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "formula")]
#[command(version)]
#[command(about = "Build and install software from declarative formulas", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every command; they override the config file
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Configuration file (default: <config dir>/formula-engine/config.toml)
    #[arg(long, global = true, env = "FORMULA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory of <name>.toml formulas
    #[arg(long, global = true, env = "FORMULA_DIR")]
    pub formula_dir: Option<PathBuf>,

    /// Install root
    #[arg(long, global = true)]
    pub cellar: Option<PathBuf>,

    /// Download cache directory
    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Enable a build variant (repeatable)
    #[arg(long = "variant", global = true)]
    pub variants: Vec<String>,

    /// Verbose logging (debug level)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build and install formulas and their dependencies
    Install {
        /// Formula names
        #[arg(required = true)]
        names: Vec<String>,

        /// Run each formula's test procedure after installing it
        #[arg(long)]
        test: bool,

        /// Rebuild requested formulas even if already installed
        #[arg(long)]
        force: bool,

        /// Keep building unrelated formulas after a failure
        #[arg(long)]
        keep_going: bool,

        /// Formulas to build in parallel
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Keep build directories for inspection
        #[arg(long)]
        keep_builddir: bool,
    },

    /// Run the test procedure of an installed formula
    Test {
        /// Formula name
        name: String,
    },

    /// Download and verify sources without building
    Fetch {
        /// Formula names
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Print the ordered build plan
    Plan {
        /// Formula names
        #[arg(required = true)]
        names: Vec<String>,

        /// Include test-only dependencies
        #[arg(long)]
        test: bool,
    },

    /// Check a formula file for errors
    Validate {
        /// Path to the formula file
        file: PathBuf,
    },

    /// Show install receipts
    Receipts {
        /// Only this formula
        name: Option<String>,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}
