// src/receipt/mod.rs

//! Install receipts
//!
//! A receipt is written after a formula builds successfully. It records
//! what was installed and what it was built against, so later plans can
//! skip formulas that are already satisfied: a receipt only counts while
//! its definition hash and dependency closure hash both still match.
//! A failed test leaves the receipt in place with `verified = false`.

pub mod schema;

use crate::error::{Error, Result};
use crate::formula::{pkg_version, ConditionChoice};
use crate::host::HostFacts;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A dependency pinned in a receipt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptDependency {
    pub name: String,
    pub version: String,
}

/// Host facts at install time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSnapshot {
    pub os: String,
    #[serde(default)]
    pub os_version: Option<String>,
    pub arch: String,
    pub compiler: String,
    #[serde(default)]
    pub variants: Vec<String>,
}

impl From<&HostFacts> for HostSnapshot {
    fn from(host: &HostFacts) -> Self {
        Self {
            os: host.os.to_string(),
            os_version: host.os_version.clone(),
            arch: host.arch.to_string(),
            compiler: host.compiler.describe(),
            variants: host.variants.iter().cloned().collect(),
        }
    }
}

/// Record of one successful install
#[derive(Debug, Clone, PartialEq)]
pub struct Receipt {
    pub id: Option<i64>,
    pub name: String,
    pub version: String,
    /// Packaging revision; a new revision rebuilds the same upstream version
    pub revision: u32,
    pub definition_hash: String,
    pub closure_hash: String,
    pub prefix: PathBuf,
    pub runtime_dependencies: Vec<ReceiptDependency>,
    pub build_dependencies: Vec<ReceiptDependency>,
    /// Conditions evaluated for this install and their results
    pub choices: Vec<ConditionChoice>,
    pub host: HostSnapshot,
    pub file_count: usize,
    /// The test procedure ran and passed
    pub verified: bool,
    pub keg_only: bool,
    /// Post-install notes, already substituted
    pub caveats: Vec<String>,
    /// The prefix is linked into the shared tree
    pub linked: bool,
    pub installed_at: DateTime<Utc>,
}

impl Receipt {
    /// `version`, with `_<revision>` appended when the revision is non-zero
    pub fn pkg_version(&self) -> String {
        pkg_version(&self.version, self.revision)
    }

    /// Whether this receipt still covers a formula with these hashes
    pub fn satisfies(
        &self,
        version: &str,
        revision: u32,
        definition_hash: &str,
        closure_hash: &str,
    ) -> bool {
        self.version == version
            && self.revision == revision
            && self.definition_hash == definition_hash
            && self.closure_hash == closure_hash
            && self.prefix.is_dir()
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let installed_at: String = row.get(14)?;
        let installed_at = DateTime::parse_from_rfc3339(&installed_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(14, rusqlite::types::Type::Text, Box::new(e))
            })?;
        let prefix: String = row.get(6)?;
        let file_count: i64 = row.get(11)?;
        let revision: i64 = row.get(3)?;

        Ok(Self {
            id: Some(row.get(0)?),
            name: row.get(1)?,
            version: row.get(2)?,
            revision: revision.max(0) as u32,
            definition_hash: row.get(4)?,
            closure_hash: row.get(5)?,
            prefix: PathBuf::from(prefix),
            runtime_dependencies: json_column(row, 7)?,
            build_dependencies: json_column(row, 8)?,
            choices: json_column(row, 9)?,
            host: json_column(row, 10)?,
            file_count: file_count.max(0) as usize,
            verified: row.get(12)?,
            keg_only: row.get(13)?,
            installed_at,
            caveats: json_column(row, 15)?,
            linked: row.get(16)?,
        })
    }
}

fn json_column<T: DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

const COLUMNS: &str = "id, name, version, revision, definition_hash, closure_hash, prefix, \
     runtime_dependencies, build_dependencies, choices, host, file_count, verified, \
     keg_only, installed_at, caveats, linked";

/// SQLite-backed receipt storage, safe to share between build workers
pub struct ReceiptStore {
    conn: Mutex<Connection>,
}

impl ReceiptStore {
    /// Open (creating if needed) the database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        schema::migrate(&conn)?;
        debug!("Opened receipt database {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// A throwaway in-memory store
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Insert `receipt`, replacing any receipt for the same name, version,
    /// revision and closure hash
    pub fn record(&self, receipt: &Receipt) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO receipts (name, version, revision, definition_hash, closure_hash,
                 prefix, runtime_dependencies, build_dependencies, choices, host, file_count,
                 verified, keg_only, installed_at, caveats, linked)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
             ON CONFLICT(name, version, revision, closure_hash) DO UPDATE SET
                 definition_hash = excluded.definition_hash,
                 prefix = excluded.prefix,
                 runtime_dependencies = excluded.runtime_dependencies,
                 build_dependencies = excluded.build_dependencies,
                 choices = excluded.choices,
                 host = excluded.host,
                 file_count = excluded.file_count,
                 verified = excluded.verified,
                 keg_only = excluded.keg_only,
                 installed_at = excluded.installed_at,
                 caveats = excluded.caveats,
                 linked = excluded.linked",
            params![
                &receipt.name,
                &receipt.version,
                receipt.revision,
                &receipt.definition_hash,
                &receipt.closure_hash,
                receipt.prefix.display().to_string(),
                serde_json::to_string(&receipt.runtime_dependencies)?,
                serde_json::to_string(&receipt.build_dependencies)?,
                serde_json::to_string(&receipt.choices)?,
                serde_json::to_string(&receipt.host)?,
                receipt.file_count as i64,
                receipt.verified,
                receipt.keg_only,
                receipt.installed_at.to_rfc3339(),
                serde_json::to_string(&receipt.caveats)?,
                receipt.linked,
            ],
        )?;

        let id = conn.query_row(
            "SELECT id FROM receipts
             WHERE name = ?1 AND version = ?2 AND revision = ?3 AND closure_hash = ?4",
            params![
                &receipt.name,
                &receipt.version,
                receipt.revision,
                &receipt.closure_hash
            ],
            |row| row.get(0),
        )?;
        info!("Recorded receipt for {} {}", receipt.name, receipt.pkg_version());
        Ok(id)
    }

    /// Most recent receipt for `name`
    pub fn latest(&self, name: &str) -> Result<Option<Receipt>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM receipts WHERE name = ?1 ORDER BY installed_at DESC, id DESC LIMIT 1",
            COLUMNS
        ))?;
        Ok(stmt.query_row([name], Receipt::from_row).optional()?)
    }

    /// Receipt keyed by name, version, revision and closure hash
    pub fn find(
        &self,
        name: &str,
        version: &str,
        revision: u32,
        closure_hash: &str,
    ) -> Result<Option<Receipt>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM receipts
             WHERE name = ?1 AND version = ?2 AND revision = ?3 AND closure_hash = ?4",
            COLUMNS
        ))?;
        Ok(stmt
            .query_row(params![name, version, revision, closure_hash], Receipt::from_row)
            .optional()?)
    }

    /// Delete the receipt for one exact build, if any
    ///
    /// Called before a prefix is rebuilt, so a build that fails part way
    /// never leaves a receipt describing files that are gone.
    pub fn forget(
        &self,
        name: &str,
        version: &str,
        revision: u32,
        closure_hash: &str,
    ) -> Result<bool> {
        let conn = self.conn.lock();
        let removed = conn.execute(
            "DELETE FROM receipts
             WHERE name = ?1 AND version = ?2 AND revision = ?3 AND closure_hash = ?4",
            params![name, version, revision, closure_hash],
        )?;
        if removed > 0 {
            debug!("Forgot receipt for {} {} ({})", name, version, closure_hash);
        }
        Ok(removed > 0)
    }

    /// Record whether a receipt's prefix is linked into the shared tree
    pub fn set_linked(&self, id: i64, linked: bool) -> Result<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE receipts SET linked = ?1 WHERE id = ?2",
            params![linked, id],
        )?;
        if changed == 0 {
            return Err(Error::Database(rusqlite::Error::QueryReturnedNoRows));
        }
        Ok(())
    }

    /// Receipts for `name` that are currently linked
    pub fn linked(&self, name: &str) -> Result<Vec<Receipt>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM receipts WHERE name = ?1 AND linked = 1",
            COLUMNS
        ))?;
        let rows = stmt
            .query_map([name], Receipt::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Every receipt, ordered by name then install time
    pub fn list(&self) -> Result<Vec<Receipt>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM receipts ORDER BY name, installed_at",
            COLUMNS
        ))?;
        let rows = stmt
            .query_map([], Receipt::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Mark a receipt verified or unverified
    pub fn set_verified(&self, id: i64, verified: bool) -> Result<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE receipts SET verified = ?1 WHERE id = ?2",
            params![verified, id],
        )?;
        if changed == 0 {
            return Err(Error::Database(rusqlite::Error::QueryReturnedNoRows));
        }
        Ok(())
    }

    /// Delete every receipt for `name`, returning how many were removed
    pub fn remove(&self, name: &str) -> Result<usize> {
        let conn = self.conn.lock();
        Ok(conn.execute("DELETE FROM receipts WHERE name = ?1", [name])?)
    }
}

/// Number of regular files under `prefix`
pub fn count_files(prefix: &Path) -> usize {
    walkdir::WalkDir::new(prefix)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .count()
}
