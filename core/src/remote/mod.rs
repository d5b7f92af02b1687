pub mod memory;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::warn;

use crate::db::Database;
use crate::models::{Collection, Record};

pub use crate::docstore::{Document, TimeRange};

/// Closed classification of every failure the remote store can report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// A filtered, ordered query needs an index the operator has not created.
    #[error("remote index missing: {0}")]
    IndexMissing(String),
    #[error("remote unavailable: {0}")]
    Unavailable(String),
    #[error("remote error ({code}): {message}")]
    Unknown { code: String, message: String },
}

impl RemoteError {
    /// Map a store error code and message onto the closed taxonomy.
    #[must_use]
    pub fn classify(code: &str, message: &str) -> Self {
        match code {
            "failed-precondition"
                if message
                    .to_ascii_lowercase()
                    .contains("query requires an index") =>
            {
                Self::IndexMissing(message.to_string())
            }
            "unavailable" | "deadline-exceeded" => Self::Unavailable(message.to_string()),
            _ => Self::Unknown {
                code: code.to_string(),
                message: message.to_string(),
            },
        }
    }

    #[must_use]
    pub fn is_index_missing(&self) -> bool {
        matches!(self, Self::IndexMissing(_))
    }

    /// `Unknown` errors are handled as unavailability for flow control.
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        !self.is_index_missing()
    }
}

/// The identity all remote reads and writes are partitioned by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserScope {
    Authenticated(String),
    Anonymous(String),
}

impl UserScope {
    /// Prefer the signed-in user; otherwise fall back to the device's
    /// persistent anonymous id.
    pub fn resolve(authenticated: Option<&str>, db: &Database) -> Result<Self> {
        match authenticated.map(str::trim).filter(|s| !s.is_empty()) {
            Some(uid) => Ok(Self::Authenticated(uid.to_string())),
            None => Ok(Self::Anonymous(db.get_or_create_anonymous_id()?)),
        }
    }

    #[must_use]
    pub fn user_id(&self) -> &str {
        match self {
            Self::Authenticated(id) | Self::Anonymous(id) => id,
        }
    }
}

pub type Delivery = Result<Vec<Document>, RemoteError>;

/// Cancels a live subscription exactly once, explicitly or on drop.
pub struct Unsubscribe {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Unsubscribe {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn unsubscribe(mut self) {
        self.fire();
    }

    fn fire(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Unsubscribe {
    fn drop(&mut self) {
        self.fire();
    }
}

/// A live feed of full-collection snapshots. Each delivery is either the
/// complete current result set or a classified error.
pub struct Subscription {
    updates: mpsc::UnboundedReceiver<Delivery>,
    cancel: Unsubscribe,
}

impl Subscription {
    pub fn new(
        updates: mpsc::UnboundedReceiver<Delivery>,
        cancel: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            updates,
            cancel: Unsubscribe::new(cancel),
        }
    }

    /// Next delivery, or `None` once the producer has gone away.
    pub async fn next(&mut self) -> Option<Delivery> {
        self.updates.recv().await
    }

    pub fn into_parts(self) -> (mpsc::UnboundedReceiver<Delivery>, Unsubscribe) {
        (self.updates, self.cancel)
    }

    pub fn unsubscribe(self) {
        self.cancel.unsubscribe();
    }
}

/// Raw document operations against the hosted store. Implementations
/// classify their failures into [`RemoteError`] before returning.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn create(&self, collection: Collection, data: Value) -> Result<String, RemoteError>;

    async fn list(
        &self,
        collection: Collection,
        user_id: &str,
        range: Option<TimeRange>,
    ) -> Result<Vec<Document>, RemoteError>;

    /// Open a live feed. The first delivery is the current snapshot.
    fn subscribe(&self, collection: Collection, user_id: &str) -> Subscription;

    async fn delete(
        &self,
        collection: Collection,
        user_id: &str,
        id: &str,
    ) -> Result<(), RemoteError>;
}

/// Serialize a value for the store, stamping the owner and write time.
pub fn encode<T: Serialize>(value: &T, user_id: &str) -> Result<Value, RemoteError> {
    let mut data = serde_json::to_value(value).map_err(|e| RemoteError::Unknown {
        code: "invalid-argument".to_string(),
        message: e.to_string(),
    })?;
    let Some(fields) = data.as_object_mut() else {
        return Err(RemoteError::Unknown {
            code: "invalid-argument".to_string(),
            message: "record did not serialize to an object".to_string(),
        });
    };
    fields.insert("userId".to_string(), Value::String(user_id.to_string()));
    fields.insert(
        "createdAt".to_string(),
        Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::AutoSi, true)),
    );
    Ok(data)
}

/// Decode documents, keeping the record's own id when it carries one and the
/// document id otherwise. Documents that do not decode are skipped.
pub fn decode<T: DeserializeOwned>(collection: Collection, docs: Vec<Document>) -> Vec<T> {
    docs.into_iter()
        .filter_map(|doc| {
            let Document { id, mut data } = doc;
            if let Some(fields) = data.as_object_mut() {
                fields.entry("id").or_insert_with(|| Value::String(id.clone()));
            }
            match serde_json::from_value(data) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(%collection, document = %id, error = %e, "skipping malformed document");
                    None
                }
            }
        })
        .collect()
}

/// Typed, user-scoped access to the remote store.
#[derive(Clone)]
pub struct Gateway {
    store: Arc<dyn RemoteStore>,
    scope: UserScope,
}

impl Gateway {
    pub fn new(store: Arc<dyn RemoteStore>, scope: UserScope) -> Self {
        Self { store, scope }
    }

    #[must_use]
    pub fn scope(&self) -> &UserScope {
        &self.scope
    }

    #[must_use]
    pub fn user_id(&self) -> &str {
        self.scope.user_id()
    }

    pub async fn create<R: Record>(&self, record: &R) -> Result<String, RemoteError> {
        self.create_value(R::COLLECTION, record).await
    }

    pub async fn create_value<T: Serialize>(
        &self,
        collection: Collection,
        value: &T,
    ) -> Result<String, RemoteError> {
        let data = encode(value, self.user_id())?;
        self.store.create(collection, data).await
    }

    pub async fn list<R: Record>(&self) -> Result<Vec<R>, RemoteError> {
        let docs = self.store.list(R::COLLECTION, self.user_id(), None).await?;
        Ok(decode(R::COLLECTION, docs))
    }

    pub async fn list_documents(
        &self,
        collection: Collection,
        range: Option<TimeRange>,
    ) -> Result<Vec<Document>, RemoteError> {
        self.store.list(collection, self.user_id(), range).await
    }

    pub fn subscribe(&self, collection: Collection) -> Subscription {
        self.store.subscribe(collection, self.user_id())
    }

    pub async fn delete(&self, collection: Collection, id: &str) -> Result<(), RemoteError> {
        self.store.delete(collection, self.user_id(), id).await
    }
}
