//! SQLite-backed record store.

use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, ErrorCode, OptionalExtension, params, params_from_iter};
use serde_json::{Map, Value};

use super::condition::Condition;
use super::schema::init_schema;
use super::types::{Record, RecordId};
use super::{RecordStore, StoreError};
use crate::entities::EntityKind;

/// Record database handle.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the given path.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| StoreError::Io(parent.display().to_string(), e))?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        init_schema(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Create an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        init_schema(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl RecordStore for Database {
    // ─────────────────────────────────────────────────────────────────────────
    // Records
    // ─────────────────────────────────────────────────────────────────────────

    fn insert(
        &self,
        entity: EntityKind,
        id: Option<RecordId>,
        fields: &Map<String, Value>,
    ) -> Result<RecordId, StoreError> {
        let conn = self.conn()?;
        insert_row(&conn, entity, id, fields)
    }

    fn insert_with_credential(
        &self,
        entity: EntityKind,
        id: Option<RecordId>,
        fields: &Map<String, Value>,
        hash: &str,
    ) -> Result<RecordId, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let id = insert_row(&tx, entity, id, fields)?;
        write_credential(&tx, &id.to_string(), hash)?;
        tx.commit()?;
        Ok(id)
    }

    fn fetch(&self, entity: EntityKind, id: &RecordId) -> Result<Option<Record>, StoreError> {
        let conn = self.conn()?;
        let json: Option<String> = conn
            .query_row(
                "SELECT fields_json FROM records WHERE entity = ?1 AND id = ?2",
                params![entity.as_str(), id],
                |row| row.get(0),
            )
            .optional()?;
        json.map(|j| row_to_record(entity, id.clone(), &j)).transpose()
    }

    fn exists(&self, entity: EntityKind, id: &RecordId) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM records WHERE entity = ?1 AND id = ?2",
            params![entity.as_str(), id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn update(
        &self,
        entity: EntityKind,
        id: &RecordId,
        fields: &Map<String, Value>,
    ) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "UPDATE records SET fields_json = ?3 WHERE entity = ?1 AND id = ?2",
            params![entity.as_str(), id, serde_json::to_string(fields)?],
        )?;
        Ok(rows > 0)
    }

    fn search(&self, entity: EntityKind, condition: &Condition) -> Result<Vec<Record>, StoreError> {
        let mut bound = vec![SqlValue::Text(entity.as_str().to_string())];
        let clause = condition.to_sql(&mut bound);
        let sql = format!(
            "SELECT id, fields_json FROM records WHERE entity = ?1 AND {clause} ORDER BY id"
        );

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(bound.iter()), |row| {
                Ok((row.get::<_, RecordId>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(|(id, json)| row_to_record(entity, id, &json)).collect()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Credentials
    // ─────────────────────────────────────────────────────────────────────────

    fn credential(&self, name: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn()?;
        Ok(conn
            .query_row("SELECT hash FROM credentials WHERE name = ?1", [name], |row| row.get(0))
            .optional()?)
    }

    fn set_credential(&self, name: &str, hash: &str) -> Result<(), StoreError> {
        let conn = self.conn()?;
        write_credential(&conn, name, hash)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Script storage and misc data
    // ─────────────────────────────────────────────────────────────────────────

    fn script_storage(&self, script: &str) -> Result<Option<Value>, StoreError> {
        self.read_json("SELECT data_json FROM script_storage WHERE name = ?1", script)
    }

    fn set_script_storage(&self, script: &str, data: &Value) -> Result<(), StoreError> {
        self.write_json(
            "INSERT INTO script_storage (name, data_json) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET data_json = excluded.data_json",
            script,
            data,
        )
    }

    fn misc(&self, key: &str) -> Result<Option<Value>, StoreError> {
        self.read_json("SELECT value_json FROM misc WHERE key = ?1", key)
    }

    fn set_misc(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        self.write_json(
            "INSERT INTO misc (key, value_json) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
            key,
            value,
        )
    }
}

impl Database {
    fn read_json(&self, sql: &str, key: &str) -> Result<Option<Value>, StoreError> {
        let conn = self.conn()?;
        let raw: Option<String> = conn.query_row(sql, [key], |row| row.get(0)).optional()?;
        Ok(raw.map(|r| serde_json::from_str(&r)).transpose()?)
    }

    fn write_json(&self, sql: &str, key: &str, value: &Value) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(sql, params![key, serde_json::to_string(value)?])?;
        Ok(())
    }
}

fn row_to_record(entity: EntityKind, id: RecordId, json: &str) -> Result<Record, StoreError> {
    match serde_json::from_str(json)? {
        Value::Object(fields) => Ok(Record { entity, id, fields }),
        _ => Err(StoreError::Corrupt { entity, id, reason: "fields are not an object".into() }),
    }
}

fn insert_row(
    conn: &Connection,
    entity: EntityKind,
    id: Option<RecordId>,
    fields: &Map<String, Value>,
) -> Result<RecordId, StoreError> {
    let id = match id {
        Some(id) => id,
        None => RecordId::Int(conn.query_row(
            "SELECT COALESCE(MAX(id), 0) + 1 FROM records
             WHERE entity = ?1 AND typeof(id) = 'integer'",
            [entity.as_str()],
            |row| row.get(0),
        )?),
    };
    let json = serde_json::to_string(fields)?;

    match conn.execute(
        "INSERT INTO records (entity, id, fields_json) VALUES (?1, ?2, ?3)",
        params![entity.as_str(), id, json],
    ) {
        Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
            Err(StoreError::Duplicate { entity, id })
        }
        Err(e) => Err(e.into()),
        Ok(_) => Ok(id),
    }
}

fn write_credential(conn: &Connection, name: &str, hash: &str) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO credentials (name, hash) VALUES (?1, ?2)
         ON CONFLICT(name) DO UPDATE SET hash = excluded.hash",
        [name, hash],
    )?;
    Ok(())
}
