// src/commands/receipts.rs
//! Receipts command

use super::load_config;
use crate::cli::GlobalArgs;
use anyhow::{Context, Result};
use formula_engine::receipt::{Receipt, ReceiptStore};

/// List install receipts, optionally for one formula
pub fn cmd_receipts(global: &GlobalArgs, name: Option<&str>, json: bool) -> Result<()> {
    let config = load_config(global)?;
    let store = ReceiptStore::open(&config.receipts_db).with_context(|| {
        format!(
            "Failed to open receipt database {}",
            config.receipts_db.display()
        )
    })?;

    let receipts: Vec<Receipt> = store
        .list()?
        .into_iter()
        .filter(|r| name.is_none_or(|n| r.name == n))
        .collect();

    if json {
        let rows: Vec<serde_json::Value> = receipts.iter().map(to_json).collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if receipts.is_empty() {
        println!("No receipts found");
        return Ok(());
    }
    for r in &receipts {
        let verified = if r.verified { "verified" } else { "unverified" };
        let linked = if r.linked { ", linked" } else { "" };
        println!(
            "{} {} [{}{}] {} files at {}",
            r.name,
            r.pkg_version(),
            verified,
            linked,
            r.file_count,
            r.prefix.display()
        );
        println!("  installed {} with {}", r.installed_at.to_rfc3339(), r.host.compiler);
        if !r.runtime_dependencies.is_empty() {
            let deps: Vec<String> = r
                .runtime_dependencies
                .iter()
                .map(|d| format!("{} {}", d.name, d.version))
                .collect();
            println!("  runtime: {}", deps.join(", "));
        }
        for caveat in &r.caveats {
            println!("  caveat: {}", caveat);
        }
    }
    Ok(())
}

fn to_json(r: &Receipt) -> serde_json::Value {
    serde_json::json!({
        "name": r.name,
        "version": r.version,
        "revision": r.revision,
        "definition_hash": r.definition_hash,
        "closure_hash": r.closure_hash,
        "prefix": r.prefix,
        "runtime_dependencies": r.runtime_dependencies,
        "build_dependencies": r.build_dependencies,
        "choices": r.choices,
        "host": r.host,
        "file_count": r.file_count,
        "verified": r.verified,
        "keg_only": r.keg_only,
        "linked": r.linked,
        "caveats": r.caveats,
        "installed_at": r.installed_at.to_rfc3339(),
    })
}
