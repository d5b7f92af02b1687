use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, watch};

use super::{Delivery, Document, RemoteError, RemoteStore, Subscription, TimeRange};
use crate::docstore::{DocumentStore, StoreError};
use crate::models::Collection;

impl From<StoreError> for RemoteError {
    fn from(e: StoreError) -> Self {
        RemoteError::classify(e.code(), &e.to_string())
    }
}

/// Snapshot of how often each remote operation was invoked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub create: usize,
    pub list: usize,
    pub subscribe: usize,
    pub unsubscribe: usize,
}

#[derive(Default)]
struct Counters {
    create: AtomicUsize,
    list: AtomicUsize,
    subscribe: AtomicUsize,
    unsubscribe: AtomicUsize,
}

struct Listener {
    id: u64,
    collection: Collection,
    user_id: String,
    tx: mpsc::UnboundedSender<Delivery>,
}

struct State {
    store: DocumentStore,
    unavailable: bool,
    fail_writes: bool,
    failing_collections: HashSet<Collection>,
    listeners: Vec<Listener>,
    next_listener: u64,
}

impl State {
    fn snapshot(&self, collection: Collection, user_id: &str) -> Delivery {
        self.store
            .query(collection, user_id, None)
            .map_err(RemoteError::from)
    }

    fn notify(&mut self, collection: Collection, user_id: &str) {
        let delivery = self.snapshot(collection, user_id);
        self.listeners.retain(|l| {
            if l.collection != collection || l.user_id != user_id {
                return true;
            }
            l.tx.send(delivery.clone()).is_ok()
        });
    }
}

/// In-process remote store over an in-memory [`DocumentStore`], with fault
/// injection and call counters.
pub struct MemoryRemote {
    state: Arc<Mutex<State>>,
    counters: Arc<Counters>,
    writes_open: watch::Sender<bool>,
}

impl MemoryRemote {
    pub fn new() -> anyhow::Result<Self> {
        let (writes_open, _) = watch::channel(true);
        Ok(Self {
            state: Arc::new(Mutex::new(State {
                store: DocumentStore::open_in_memory()?,
                unavailable: false,
                fail_writes: false,
                failing_collections: HashSet::new(),
                listeners: Vec::new(),
                next_listener: 0,
            })),
            counters: Arc::new(Counters::default()),
            writes_open,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // --- Fault injection ---

    pub fn drop_index(&self, collection: Collection) {
        let _ = self.lock().store.drop_index(collection);
    }

    pub fn provision_index(&self, collection: Collection) {
        let _ = self.lock().store.provision_index(collection);
    }

    /// While unavailable every call fails with `Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// Make writes fail with an unclassified internal error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    /// Make writes to one collection fail while the others succeed.
    pub fn fail_writes_for(&self, collection: Collection) {
        self.lock().failing_collections.insert(collection);
    }

    /// Hold every `create` until [`resume_writes`](Self::resume_writes).
    pub fn pause_writes(&self) {
        self.writes_open.send_replace(false);
    }

    pub fn resume_writes(&self) {
        self.writes_open.send_replace(true);
    }

    /// Push an error delivery to every open subscription.
    pub fn break_subscriptions(&self, error: &RemoteError) {
        let mut state = self.lock();
        state
            .listeners
            .retain(|l| l.tx.send(Err(error.clone())).is_ok());
    }

    // --- Inspection ---

    #[must_use]
    pub fn calls(&self) -> CallCounts {
        CallCounts {
            create: self.counters.create.load(Ordering::SeqCst),
            list: self.counters.list.load(Ordering::SeqCst),
            subscribe: self.counters.subscribe.load(Ordering::SeqCst),
            unsubscribe: self.counters.unsubscribe.load(Ordering::SeqCst),
        }
    }

    #[must_use]
    pub fn active_subscriptions(&self) -> usize {
        self.lock().listeners.len()
    }

    /// Stored documents regardless of index provisioning.
    pub fn documents(&self, collection: Collection, user_id: &str) -> Vec<Document> {
        let state = self.lock();
        let had_index = state.store.has_index(collection).unwrap_or(true);
        let _ = state.store.provision_index(collection);
        let docs = state.store.query(collection, user_id, None).unwrap_or_default();
        if !had_index {
            let _ = state.store.drop_index(collection);
        }
        docs
    }

    /// Seed a document directly, bypassing counters and faults.
    pub fn seed(&self, collection: Collection, data: &Value) -> Result<String, RemoteError> {
        let mut state = self.lock();
        let id = state.store.insert(collection, data)?;
        if let Some(user_id) = data.get("userId").and_then(Value::as_str) {
            state.notify(collection, user_id);
        }
        Ok(id)
    }
}

fn unavailable() -> RemoteError {
    RemoteError::Unavailable("remote store is unreachable".to_string())
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn create(&self, collection: Collection, data: Value) -> Result<String, RemoteError> {
        self.counters.create.fetch_add(1, Ordering::SeqCst);
        let mut gate = self.writes_open.subscribe();
        let _ = gate.wait_for(|open| *open).await;

        let mut state = self.lock();
        if state.unavailable {
            return Err(unavailable());
        }
        if state.fail_writes || state.failing_collections.contains(&collection) {
            return Err(RemoteError::classify("internal", "write rejected"));
        }
        let id = state.store.insert(collection, &data)?;
        if let Some(user_id) = data.get("userId").and_then(Value::as_str) {
            state.notify(collection, user_id);
        }
        Ok(id)
    }

    async fn list(
        &self,
        collection: Collection,
        user_id: &str,
        range: Option<TimeRange>,
    ) -> Result<Vec<Document>, RemoteError> {
        self.counters.list.fetch_add(1, Ordering::SeqCst);
        let state = self.lock();
        if state.unavailable {
            return Err(unavailable());
        }
        Ok(state.store.query(collection, user_id, range)?)
    }

    fn subscribe(&self, collection: Collection, user_id: &str) -> Subscription {
        self.counters.subscribe.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();

        let mut state = self.lock();
        let id = state.next_listener;
        state.next_listener += 1;
        let first = if state.unavailable {
            Err(unavailable())
        } else {
            state.snapshot(collection, user_id)
        };
        let _ = tx.send(first);
        state.listeners.push(Listener {
            id,
            collection,
            user_id: user_id.to_string(),
            tx,
        });
        drop(state);

        let shared = Arc::clone(&self.state);
        let counters = Arc::clone(&self.counters);
        Subscription::new(rx, move || {
            counters.unsubscribe.fetch_add(1, Ordering::SeqCst);
            shared
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .listeners
                .retain(|l| l.id != id);
        })
    }

    async fn delete(
        &self,
        collection: Collection,
        user_id: &str,
        id: &str,
    ) -> Result<(), RemoteError> {
        let mut state = self.lock();
        if state.unavailable {
            return Err(unavailable());
        }
        if state.store.delete(collection, user_id, id)? {
            state.notify(collection, user_id);
            Ok(())
        } else {
            Err(RemoteError::classify(
                "not-found",
                &format!("no document '{id}' in {collection}"),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn emotion(user: &str, ts: &str) -> Value {
        json!({
            "id": ts, "name": "Sad", "intensity": 6, "color": "c",
            "timestamp": ts, "userId": user
        })
    }

    #[tokio::test]
    async fn test_subscribe_delivers_initial_and_changes() {
        let remote = MemoryRemote::new().unwrap();
        remote
            .seed(Collection::Emotions, &emotion("u1", "2024-06-15T10:00:00Z"))
            .unwrap();

        let mut sub = remote.subscribe(Collection::Emotions, "u1");
        let first = sub.next().await.unwrap().unwrap();
        assert_eq!(first.len(), 1);

        remote
            .create(Collection::Emotions, emotion("u1", "2024-06-15T11:00:00Z"))
            .await
            .unwrap();
        let second = sub.next().await.unwrap().unwrap();
        assert_eq!(second.len(), 2);

        // Other owners do not wake this listener.
        remote
            .create(Collection::Emotions, emotion("u2", "2024-06-15T12:00:00Z"))
            .await
            .unwrap();
        assert!(sub.updates.try_recv().is_err());

        sub.unsubscribe();
        assert_eq!(remote.active_subscriptions(), 0);
        assert_eq!(remote.calls().unsubscribe, 1);
    }

    #[tokio::test]
    async fn test_missing_index_surfaces_on_list_and_subscribe() {
        let remote = MemoryRemote::new().unwrap();
        remote.drop_index(Collection::Reflections);

        let err = remote
            .list(Collection::Reflections, "u1", None)
            .await
            .unwrap_err();
        assert!(err.is_index_missing());

        let mut sub = remote.subscribe(Collection::Reflections, "u1");
        assert!(matches!(sub.next().await, Some(Err(RemoteError::IndexMissing(_)))));
    }

    #[tokio::test]
    async fn test_unavailable_and_failed_writes() {
        let remote = MemoryRemote::new().unwrap();
        remote.set_unavailable(true);
        let err = remote
            .create(Collection::Emotions, emotion("u1", "2024-06-15T10:00:00Z"))
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Unavailable(_)));

        remote.set_unavailable(false);
        remote.set_fail_writes(true);
        let err = remote
            .create(Collection::Emotions, emotion("u1", "2024-06-15T10:00:00Z"))
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Unknown { .. }));
        assert!(remote.documents(Collection::Emotions, "u1").is_empty());
        assert_eq!(remote.calls().create, 2);
    }

    #[tokio::test]
    async fn test_failed_writes_for_one_collection() {
        let remote = MemoryRemote::new().unwrap();
        remote.fail_writes_for(Collection::ProgressLogs);

        let err = remote
            .create(Collection::ProgressLogs, emotion("u1", "2024-06-15T10:00:00Z"))
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Unknown { .. }));
        remote
            .create(Collection::Emotions, emotion("u1", "2024-06-15T10:00:00Z"))
            .await
            .unwrap();
        assert_eq!(remote.documents(Collection::Emotions, "u1").len(), 1);
        assert!(remote.documents(Collection::ProgressLogs, "u1").is_empty());
    }

    #[tokio::test]
    async fn test_paused_writes_wait_for_resume() {
        let remote = Arc::new(MemoryRemote::new().unwrap());
        remote.pause_writes();

        let writer = Arc::clone(&remote);
        let handle = tokio::spawn(async move {
            writer
                .create(Collection::Emotions, emotion("u1", "2024-06-15T10:00:00Z"))
                .await
        });
        tokio::task::yield_now().await;
        assert!(remote.documents(Collection::Emotions, "u1").is_empty());

        remote.resume_writes();
        handle.await.unwrap().unwrap();
        assert_eq!(remote.documents(Collection::Emotions, "u1").len(), 1);
    }
}
