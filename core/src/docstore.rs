use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Collection, instant};

/// A stored document: store-assigned id plus the JSON body as written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub data: Value,
}

/// Inclusive timestamp bounds for a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("The query requires an index on '{0}' (userId ASC, timestamp DESC)")]
    IndexMissing(Collection),
    #[error("{0}")]
    InvalidArgument(String),
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl StoreError {
    /// Wire error code, in the vocabulary clients classify on.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::IndexMissing(_) => "failed-precondition",
            Self::InvalidArgument(_) => "invalid-argument",
            Self::Storage(_) => "internal",
        }
    }
}

/// Backs the hosted remote and [`MemoryRemote`](crate::remote::memory::MemoryRemote).
/// Documents are JSON objects partitioned by collection and owner, ordered by
/// their `timestamp` field.
pub struct DocumentStore {
    conn: Connection,
}

impl DocumentStore {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open document store: {}", path.display()))?;
        let store = DocumentStore { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = DocumentStore { conn };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> anyhow::Result<()> {
        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS documents (
                    seq INTEGER PRIMARY KEY AUTOINCREMENT,
                    id TEXT NOT NULL UNIQUE,
                    path TEXT NOT NULL,
                    user_id TEXT NOT NULL,
                    ts_micros INTEGER NOT NULL,
                    created_at TEXT NOT NULL,
                    body TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_documents_owner
                    ON documents(path, user_id, ts_micros DESC);

                CREATE TABLE IF NOT EXISTS collection_versions (
                    path TEXT NOT NULL,
                    user_id TEXT NOT NULL,
                    version INTEGER NOT NULL,
                    PRIMARY KEY (path, user_id)
                );

                CREATE TABLE IF NOT EXISTS provisioned_indexes (
                    collection TEXT PRIMARY KEY
                );

                INSERT OR IGNORE INTO provisioned_indexes (collection)
                    VALUES ('emotions'), ('journalEntries'), ('reflections');

                PRAGMA user_version = 1;",
            )?;
        }

        Ok(())
    }

    // --- Index provisioning ---

    pub fn provision_index(&self, collection: Collection) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO provisioned_indexes (collection) VALUES (?1)",
            params![collection.name()],
        )?;
        Ok(())
    }

    pub fn drop_index(&self, collection: Collection) -> Result<bool, StoreError> {
        let rows = self.conn.execute(
            "DELETE FROM provisioned_indexes WHERE collection = ?1",
            params![collection.name()],
        )?;
        Ok(rows > 0)
    }

    pub fn has_index(&self, collection: Collection) -> Result<bool, StoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM provisioned_indexes WHERE collection = ?1",
            params![collection.name()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    // --- Documents ---

    /// Store `data` under the owner named by its `userId` field and return the
    /// new document id. The body must carry a parseable `timestamp`.
    pub fn insert(&self, collection: Collection, data: &Value) -> Result<String, StoreError> {
        let Some(body) = data.as_object() else {
            return Err(StoreError::InvalidArgument(
                "document body must be a JSON object".to_string(),
            ));
        };
        let user_id = body
            .get("userId")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| StoreError::InvalidArgument("document is missing userId".to_string()))?;
        let timestamp = body
            .get("timestamp")
            .cloned()
            .ok_or_else(|| {
                StoreError::InvalidArgument("document is missing timestamp".to_string())
            })
            .and_then(|v| {
                instant::deserialize(v).map_err(|e| StoreError::InvalidArgument(e.to_string()))
            })?;

        let id = Uuid::new_v4().to_string();
        let path = collection.path(user_id);
        let text = serde_json::to_string(data)
            .map_err(|e| StoreError::InvalidArgument(e.to_string()))?;

        self.conn.execute(
            "INSERT INTO documents (id, path, user_id, ts_micros, created_at, body)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id,
                path,
                user_id,
                timestamp.timestamp_micros(),
                Utc::now().to_rfc3339(),
                text
            ],
        )?;
        self.bump_version(&path, user_id)?;
        Ok(id)
    }

    /// Documents owned by `user_id`, newest first, optionally restricted to
    /// an inclusive timestamp range.
    pub fn query(
        &self,
        collection: Collection,
        user_id: &str,
        range: Option<TimeRange>,
    ) -> Result<Vec<Document>, StoreError> {
        if collection.requires_composite_index() && !self.has_index(collection)? {
            return Err(StoreError::IndexMissing(collection));
        }

        let path = collection.path(user_id);
        let (start, end) = match range {
            Some(r) => (r.start.timestamp_micros(), r.end.timestamp_micros()),
            None => (i64::MIN, i64::MAX),
        };

        let mut stmt = self.conn.prepare(
            "SELECT id, body FROM documents
             WHERE path = ?1 AND user_id = ?2 AND ts_micros BETWEEN ?3 AND ?4
             ORDER BY ts_micros DESC, seq DESC",
        )?;
        let rows = stmt.query_map(params![path, user_id, start, end], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut docs = Vec::new();
        for row in rows {
            let (id, body) = row?;
            // Bodies are only ever written from serialized JSON.
            let data = serde_json::from_str(&body).unwrap_or(Value::Null);
            docs.push(Document { id, data });
        }
        Ok(docs)
    }

    pub fn delete(
        &self,
        collection: Collection,
        user_id: &str,
        id: &str,
    ) -> Result<bool, StoreError> {
        let path = collection.path(user_id);
        let rows = self.conn.execute(
            "DELETE FROM documents WHERE id = ?1 AND path = ?2 AND user_id = ?3",
            params![id, path, user_id],
        )?;
        if rows > 0 {
            self.bump_version(&path, user_id)?;
        }
        Ok(rows > 0)
    }

    /// Change counter for one owner's view of a collection. Starts at 0 and
    /// increases on every insert or delete.
    pub fn version(&self, collection: Collection, user_id: &str) -> Result<u64, StoreError> {
        let path = collection.path(user_id);
        let mut stmt = self.conn.prepare(
            "SELECT version FROM collection_versions WHERE path = ?1 AND user_id = ?2",
        )?;
        let mut rows = stmt.query(params![path, user_id])?;
        if let Some(row) = rows.next()? {
            let v: i64 = row.get(0)?;
            Ok(v.unsigned_abs())
        } else {
            Ok(0)
        }
    }

    fn bump_version(&self, path: &str, user_id: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO collection_versions (path, user_id, version) VALUES (?1, ?2, 1)
             ON CONFLICT(path, user_id) DO UPDATE SET version = version + 1",
            params![path, user_id],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn doc(user: &str, name: &str, ts: &str) -> Value {
        json!({ "id": name, "name": name, "userId": user, "timestamp": ts })
    }

    #[test]
    fn test_query_orders_newest_first_and_scopes_by_user() {
        let store = DocumentStore::open_in_memory().unwrap();
        store
            .insert(Collection::Emotions, &doc("u1", "a", "2024-06-15T10:00:00Z"))
            .unwrap();
        store
            .insert(Collection::Emotions, &doc("u1", "b", "2024-06-15T12:00:00Z"))
            .unwrap();
        store
            .insert(Collection::Emotions, &doc("u2", "c", "2024-06-15T11:00:00Z"))
            .unwrap();

        let docs = store.query(Collection::Emotions, "u1", None).unwrap();
        let names: Vec<&str> = docs.iter().map(|d| d.data["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn test_missing_index_fails_precondition() {
        let store = DocumentStore::open_in_memory().unwrap();
        assert!(store.drop_index(Collection::JournalEntries).unwrap());
        let err = store
            .query(Collection::JournalEntries, "u1", None)
            .unwrap_err();
        assert_eq!(err.code(), "failed-precondition");
        assert!(err.to_string().contains("query requires an index"));

        // Progress logs are a single-field subcollection query.
        assert!(store.query(Collection::ProgressLogs, "u1", None).is_ok());

        store.provision_index(Collection::JournalEntries).unwrap();
        assert!(store.query(Collection::JournalEntries, "u1", None).is_ok());
    }

    #[test]
    fn test_range_is_inclusive() {
        let store = DocumentStore::open_in_memory().unwrap();
        for ts in [
            "2024-06-14T00:00:00Z",
            "2024-06-15T00:00:00Z",
            "2024-06-16T00:00:00Z",
            "2024-06-17T00:00:00Z",
        ] {
            store
                .insert(Collection::ProgressLogs, &doc("u1", ts, ts))
                .unwrap();
        }
        let range = TimeRange {
            start: Utc.with_ymd_and_hms(2024, 6, 15, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 6, 16, 0, 0, 0).unwrap(),
        };
        let docs = store
            .query(Collection::ProgressLogs, "u1", Some(range))
            .unwrap();
        assert_eq!(docs.len(), 2);
    }

    #[test]
    fn test_insert_validation() {
        let store = DocumentStore::open_in_memory().unwrap();
        let err = store
            .insert(Collection::Emotions, &json!({ "timestamp": "2024-06-15T00:00:00Z" }))
            .unwrap_err();
        assert_eq!(err.code(), "invalid-argument");

        let err = store
            .insert(Collection::Emotions, &json!({ "userId": "u1", "timestamp": "yesterday" }))
            .unwrap_err();
        assert_eq!(err.code(), "invalid-argument");

        assert!(store.insert(Collection::Emotions, &json!([1, 2])).is_err());
    }

    #[test]
    fn test_versions_track_changes_per_owner() {
        let store = DocumentStore::open_in_memory().unwrap();
        assert_eq!(store.version(Collection::Emotions, "u1").unwrap(), 0);
        let id = store
            .insert(Collection::Emotions, &doc("u1", "a", "2024-06-15T10:00:00Z"))
            .unwrap();
        assert_eq!(store.version(Collection::Emotions, "u1").unwrap(), 1);
        assert_eq!(store.version(Collection::Emotions, "u2").unwrap(), 0);

        assert!(!store.delete(Collection::Emotions, "u2", &id).unwrap());
        assert!(store.delete(Collection::Emotions, "u1", &id).unwrap());
        assert_eq!(store.version(Collection::Emotions, "u1").unwrap(), 2);
        assert!(store.query(Collection::Emotions, "u1", None).unwrap().is_empty());
    }

    #[test]
    fn test_progress_logs_live_under_user_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docs.db");
        {
            let store = DocumentStore::open(&path).unwrap();
            store
                .insert(Collection::ProgressLogs, &doc("u1", "p", "2024-06-15T10:00:00Z"))
                .unwrap();
        }
        let store = DocumentStore::open(&path).unwrap();
        assert_eq!(store.query(Collection::ProgressLogs, "u1", None).unwrap().len(), 1);
        assert!(store.query(Collection::ProgressLogs, "u2", None).unwrap().is_empty());
        assert!(store.query(Collection::Emotions, "u1", None).unwrap().is_empty());
    }
}
