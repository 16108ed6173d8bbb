// src/commands/mod.rs
//! Command handlers for the formula CLI

mod fetch;
mod install;
mod plan;
mod receipts;
mod validate;

pub use fetch::cmd_fetch;
pub use install::cmd_install;
pub use plan::cmd_plan;
pub use receipts::cmd_receipts;
pub use test::cmd_test;
pub use validate::cmd_validate;

use crate::cli::GlobalArgs;
use anyhow::{Context, Result};
use formula_engine::formula::DirectorySource;
use formula_engine::{EngineConfig, Fetcher, HostFacts, Orchestrator, ReceiptStore};

/// Load the config file and apply command line overrides
pub fn load_config(global: &GlobalArgs) -> Result<EngineConfig> {
    let mut config = EngineConfig::load_or_default(global.config.as_deref())
        .context("Failed to load configuration")?;

    if let Some(dir) = &global.formula_dir {
        config.formula_dir = dir.clone();
    }
    if let Some(dir) = &global.cellar {
        config.cellar = dir.clone();
    }
    if let Some(dir) = &global.cache_dir {
        config.cache_dir = dir.clone();
    }
    config.variants.extend(global.variants.iter().cloned());
    Ok(config)
}

/// Facts about this machine, with configured variants enabled
pub fn detect_host(config: &EngineConfig) -> HostFacts {
    config
        .variants
        .iter()
        .fold(HostFacts::detect(), |host, variant| host.with_variant(variant))
}

/// Wire up an orchestrator from configuration
pub fn open_orchestrator(config: EngineConfig) -> Result<Orchestrator> {
    config.validate().context("Invalid configuration")?;
    let host = detect_host(&config);

    let fetcher = Fetcher::new(&config.cache_dir, config.fetch_jobs, config.http_timeout())
        .with_context(|| format!("Failed to open cache {}", config.cache_dir.display()))?;
    let receipts = ReceiptStore::open(&config.receipts_db).with_context(|| {
        format!(
            "Failed to open receipt database {}",
            config.receipts_db.display()
        )
    })?;
    let source = DirectorySource::new(&config.formula_dir);

    Ok(Orchestrator::new(
        config,
        host,
        Box::new(source),
        fetcher,
        receipts,
    ))
}
