// src/receipt/schema.rs

//! Receipt database schema and migrations

use crate::error::Result;
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

fn init_schema_version(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    init_schema_version(conn)?;

    let version = conn
        .query_row(
            "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// Apply all pending migrations
pub fn migrate(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;
    debug!("Receipt schema version: {}", current_version);

    if current_version >= SCHEMA_VERSION {
        return Ok(());
    }

    for version in (current_version + 1)..=SCHEMA_VERSION {
        info!("Applying receipt schema migration {}", version);
        apply_migration(conn, version)?;
        set_schema_version(conn, version)?;
    }
    Ok(())
}

fn apply_migration(conn: &Connection, version: i32) -> Result<()> {
    match version {
        1 => migrate_v1(conn),
        2 => migrate_v2(conn),
        _ => Err(crate::error::Error::Config(format!(
            "unknown receipt schema version {}",
            version
        ))),
    }
}

/// Version 1: install receipts
///
/// Dependency lists, condition choices and the host snapshot are JSON
/// columns; they are only ever read back whole.
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE receipts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            version TEXT NOT NULL,
            definition_hash TEXT NOT NULL,
            closure_hash TEXT NOT NULL,
            prefix TEXT NOT NULL,
            runtime_dependencies TEXT NOT NULL DEFAULT '[]',
            build_dependencies TEXT NOT NULL DEFAULT '[]',
            choices TEXT NOT NULL DEFAULT '[]',
            host TEXT NOT NULL,
            file_count INTEGER NOT NULL DEFAULT 0,
            verified INTEGER NOT NULL DEFAULT 0,
            keg_only INTEGER NOT NULL DEFAULT 0,
            installed_at TEXT NOT NULL,
            UNIQUE(name, version, closure_hash)
        );

        CREATE INDEX idx_receipts_name ON receipts(name);
        ",
    )?;
    Ok(())
}

/// Version 2: revisions, caveats and link state
///
/// The revision joins the unique key, which SQLite cannot alter in place,
/// so the table is rebuilt. Existing rows become revision 0.
fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE receipts_v2 (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            version TEXT NOT NULL,
            revision INTEGER NOT NULL DEFAULT 0,
            definition_hash TEXT NOT NULL,
            closure_hash TEXT NOT NULL,
            prefix TEXT NOT NULL,
            runtime_dependencies TEXT NOT NULL DEFAULT '[]',
            build_dependencies TEXT NOT NULL DEFAULT '[]',
            choices TEXT NOT NULL DEFAULT '[]',
            host TEXT NOT NULL,
            file_count INTEGER NOT NULL DEFAULT 0,
            verified INTEGER NOT NULL DEFAULT 0,
            keg_only INTEGER NOT NULL DEFAULT 0,
            installed_at TEXT NOT NULL,
            caveats TEXT NOT NULL DEFAULT '[]',
            linked INTEGER NOT NULL DEFAULT 0,
            UNIQUE(name, version, revision, closure_hash)
        );

        INSERT INTO receipts_v2 (id, name, version, definition_hash, closure_hash, prefix,
            runtime_dependencies, build_dependencies, choices, host, file_count, verified,
            keg_only, installed_at)
        SELECT id, name, version, definition_hash, closure_hash, prefix,
            runtime_dependencies, build_dependencies, choices, host, file_count, verified,
            keg_only, installed_at
        FROM receipts;

        DROP TABLE receipts;
        ALTER TABLE receipts_v2 RENAME TO receipts;
        CREATE INDEX idx_receipts_name ON receipts(name);
        ",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, SCHEMA_VERSION as i64);
    }

    #[test]
    fn test_v1_rows_survive_as_revision_zero() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema_version(&conn).unwrap();
        migrate_v1(&conn).unwrap();
        set_schema_version(&conn, 1).unwrap();
        conn.execute(
            "INSERT INTO receipts (name, version, definition_hash, closure_hash, prefix, host, installed_at)
             VALUES ('zlib', '1.3.1', 'd', 'c', '/cellar/zlib/1.3.1', '{}', '2024-01-01T00:00:00Z')",
            [],
        )
        .unwrap();

        migrate(&conn).unwrap();
        let (revision, caveats): (i64, String) = conn
            .query_row(
                "SELECT revision, caveats FROM receipts WHERE name = 'zlib'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(revision, 0);
        assert_eq!(caveats, "[]");
    }
}
