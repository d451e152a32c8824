//! SQLite schema definition and migrations.

use rusqlite::Connection;
use thiserror::Error;

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Schema version {found} is newer than supported {supported}")]
    VersionTooNew { found: i32, supported: i32 },

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

/// Initialize or migrate the database schema.
pub fn init_schema(conn: &Connection) -> Result<(), SchemaError> {
    let version = get_schema_version(conn)?;

    if version == 0 {
        create_schema_v1(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if version < SCHEMA_VERSION {
        migrate(conn, version)?;
    } else if version > SCHEMA_VERSION {
        return Err(SchemaError::VersionTooNew { found: version, supported: SCHEMA_VERSION });
    }

    Ok(())
}

fn get_schema_version(conn: &Connection) -> Result<i32, SchemaError> {
    let exists: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='schema_version'",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version: i32 =
        conn.query_row("SELECT version FROM schema_version", [], |row| row.get(0))?;

    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<(), SchemaError> {
    conn.execute(
        "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?1)",
        [version],
    )?;
    Ok(())
}

fn create_schema_v1(conn: &Connection) -> Result<(), SchemaError> {
    conn.execute_batch(
        r#"
        CREATE TABLE schema_version (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            version INTEGER NOT NULL
        );

        -- One row per entity instance. `id` has no declared type so that
        -- integer and text keys keep their storage class.
        CREATE TABLE records (
            entity TEXT NOT NULL,
            id NOT NULL,
            fields_json TEXT NOT NULL,
            PRIMARY KEY (entity, id)
        );

        CREATE INDEX idx_records_entity ON records(entity);

        -- Password hashes (PHC strings), keyed by member name.
        CREATE TABLE credentials (
            name TEXT PRIMARY KEY,
            hash TEXT NOT NULL
        );

        -- Per-script persistent JSON document.
        CREATE TABLE script_storage (
            name TEXT PRIMARY KEY,
            data_json TEXT NOT NULL
        );

        -- Host bookkeeping, e.g. last script invocations.
        CREATE TABLE misc (
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        );
        "#,
    )?;

    Ok(())
}

fn migrate(_conn: &Connection, from_version: i32) -> Result<(), SchemaError> {
    Err(SchemaError::MigrationFailed(format!(
        "No migration path from version {} to {}",
        from_version, SCHEMA_VERSION
    )))
}
