use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use rand::Rng;
use rusqlite::{Connection, params};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::models::Record;

/// Config key holding the device's anonymous identity.
pub const ANONYMOUS_ID_KEY: &str = "soulful-space-user-id";

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// On-device store: whole-collection cache mirror plus client settings.
pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS cache_entries (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS user_settings (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS config (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );

                PRAGMA user_version = 1;",
            )?;
        }

        Ok(())
    }

    // --- Collection mirror ---

    /// Replace the whole array stored under `key`.
    pub fn write_collection<T: Serialize>(&self, key: &str, records: &[T]) -> Result<()> {
        let value = serde_json::to_string(records)
            .with_context(|| format!("Failed to serialize cache entry '{key}'"))?;
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO cache_entries (key, value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now],
        )?;
        Ok(())
    }

    /// Read the array stored under `key`. A missing key reads as empty.
    pub fn read_collection<T: DeserializeOwned>(&self, key: &str) -> Result<Vec<T>> {
        let mut stmt = self
            .conn
            .prepare("SELECT value FROM cache_entries WHERE key = ?1")?;
        let mut rows = stmt.query(params![key])?;
        let Some(row) = rows.next()? else {
            return Ok(Vec::new());
        };
        let value: String = row.get(0)?;
        serde_json::from_str(&value)
            .with_context(|| format!("Corrupt cache entry '{key}'"))
    }

    pub fn write_records<R: Record>(&self, records: &[R]) -> Result<()> {
        match R::COLLECTION.cache_key() {
            Some(key) => self.write_collection(key, records),
            None => Ok(()),
        }
    }

    pub fn read_records<R: Record>(&self) -> Result<Vec<R>> {
        match R::COLLECTION.cache_key() {
            Some(key) => self.read_collection(key),
            None => Ok(Vec::new()),
        }
    }

    // --- Identity ---

    /// Persistent scoping key for unauthenticated use, `user_<millis>_<suffix>`.
    /// Generated once and reused until the database is removed.
    pub fn get_or_create_anonymous_id(&self) -> Result<String> {
        let mut stmt = self
            .conn
            .prepare("SELECT value FROM config WHERE key = ?1")?;
        let mut rows = stmt.query(params![ANONYMOUS_ID_KEY])?;
        if let Some(row) = rows.next()? {
            return Ok(row.get(0)?);
        }
        drop(rows);
        drop(stmt);

        let mut rng = rand::rng();
        let suffix: String = (0..9)
            .map(|_| char::from(BASE36[rng.random_range(0..BASE36.len())]))
            .collect();
        let id = format!("user_{}_{suffix}", Utc::now().timestamp_millis());
        self.conn.execute(
            "INSERT INTO config (key, value) VALUES (?1, ?2)",
            params![ANONYMOUS_ID_KEY, id],
        )?;
        Ok(id)
    }

    // --- User Settings ---

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO user_settings (key, value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now],
        )?;
        Ok(())
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT value FROM user_settings WHERE key = ?1")?;
        let mut rows = stmt.query(params![key])?;
        if let Some(row) = rows.next()? {
            Ok(Some(row.get(0)?))
        } else {
            Ok(None)
        }
    }

    pub fn delete_setting(&self, key: &str) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM user_settings WHERE key = ?1", params![key])?;
        Ok(rows > 0)
    }
}
