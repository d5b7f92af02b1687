use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::connectivity::Connectivity;
use crate::db::Database;
use crate::models::{Emotion, JournalEntry, Record, Reflection};
use crate::progress::ProgressLogs;
use crate::remote::{Delivery, Gateway, RemoteError, Unsubscribe, decode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    #[default]
    Uninitialized,
    Loading,
    Live,
    DegradedLocal,
    DegradedError,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Uninitialized => "uninitialized",
            Self::Loading => "loading",
            Self::Live => "live",
            Self::DegradedLocal => "degraded-local",
            Self::DegradedError => "degraded-error",
        })
    }
}

/// Process-wide sync flags. Both error flags may be raised at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub online: bool,
    pub remote_index_error: bool,
    pub remote_unavailable: bool,
    pub loading: bool,
}

impl SyncState {
    /// The single banner to show, by priority: offline, unavailable, index.
    #[must_use]
    pub fn banner(&self) -> Option<Banner> {
        if !self.online {
            Some(Banner::Offline)
        } else if self.remote_unavailable {
            Some(Banner::RemoteUnavailable)
        } else if self.remote_index_error {
            Some(Banner::IndexMissing)
        } else {
            None
        }
    }

    fn raise(&mut self, error: &RemoteError) {
        if error.is_index_missing() {
            self.remote_index_error = true;
        } else {
            self.remote_unavailable = true;
        }
    }

    fn degraded(&self) -> bool {
        self.remote_index_error || self.remote_unavailable
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Banner {
    Offline,
    RemoteUnavailable,
    IndexMissing,
}

impl Banner {
    #[must_use]
    pub fn title(self) -> &'static str {
        match self {
            Self::Offline => "Offline",
            Self::RemoteUnavailable => "Connection Issue",
            Self::IndexMissing => "Database Setup Required",
        }
    }

    #[must_use]
    pub fn message(self) -> &'static str {
        match self {
            Self::Offline => {
                "You're currently offline. Your data will sync when you reconnect to the internet."
            }
            Self::RemoteUnavailable => {
                "Unable to connect to the cloud database. Your data is being saved locally and will sync when the connection is restored."
            }
            Self::IndexMissing => {
                "Please create the required indexes for the cloud database. Your data is being saved locally in the meantime."
            }
        }
    }
}

/// Read-only copy of everything the view layer renders.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub emotions: Vec<Emotion>,
    pub journal_entries: Vec<JournalEntry>,
    pub reflections: Vec<Reflection>,
    pub state: SyncState,
    pub phase: Phase,
}

/// Result of one background remote write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Persisted,
    /// The record was stored but its progress log was not.
    ProgressFailed(RemoteError),
    Failed(RemoteError),
}

#[derive(Default)]
struct Collections {
    emotions: Vec<Emotion>,
    journal_entries: Vec<JournalEntry>,
    reflections: Vec<Reflection>,
}

trait Stored: Record {
    fn slot(data: &mut Collections) -> &mut Vec<Self>;
}

impl Stored for Emotion {
    fn slot(data: &mut Collections) -> &mut Vec<Self> {
        &mut data.emotions
    }
}

impl Stored for JournalEntry {
    fn slot(data: &mut Collections) -> &mut Vec<Self> {
        &mut data.journal_entries
    }
}

impl Stored for Reflection {
    fn slot(data: &mut Collections) -> &mut Vec<Self> {
        &mut data.reflections
    }
}

fn newest_first<R: Record>(records: &mut [R]) {
    records.sort_by_key(|r| std::cmp::Reverse(r.timestamp()));
}

#[derive(Default)]
struct Inner {
    data: Collections,
    state: SyncState,
    phase: Phase,
    /// Bumped on every subscription teardown; deliveries tagged with an older
    /// generation are discarded.
    generation: u64,
    loaded_once: bool,
}

/// State shared with subscription drain tasks. Lock order: `subscriptions`,
/// `inner`, then `cache`.
struct Shared {
    inner: Mutex<Inner>,
    cache: Mutex<Database>,
    subscriptions: Mutex<Option<SubscriptionSet>>,
}

impl Shared {
    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cache(&self) -> MutexGuard<'_, Database> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn subscriptions(&self) -> MutexGuard<'_, Option<SubscriptionSet>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace a whole collection and mirror it to the cache.
    fn replace<R: Stored>(&self, inner: &mut Inner, mut records: Vec<R>) {
        newest_first(&mut records);
        if let Err(e) = self.cache().write_records(&records) {
            error!(collection = %R::COLLECTION, error = %format!("{e:#}"), "failed to mirror collection to local cache");
        }
        *R::slot(&mut inner.data) = records;
    }

    fn hydrate<R: Stored>(&self, inner: &mut Inner) {
        let records = match self.cache().read_records::<R>() {
            Ok(records) => records,
            Err(e) => {
                error!(collection = %R::COLLECTION, error = %format!("{e:#}"), "failed to read local cache");
                Vec::new()
            }
        };
        *R::slot(&mut inner.data) = records;
    }

    /// Apply one live delivery. Returns `false` once the drain should stop.
    fn deliver<R: Stored>(&self, generation: u64, delivery: Delivery) -> bool {
        {
            let mut inner = self.inner();
            if inner.generation != generation {
                return false;
            }
            match delivery {
                Ok(docs) => {
                    let records: Vec<R> = decode(R::COLLECTION, docs);
                    debug!(collection = %R::COLLECTION, count = records.len(), "live update");
                    self.replace(&mut inner, records);
                    return true;
                }
                Err(e) => {
                    warn!(collection = %R::COLLECTION, error = %e, "live subscription failed, falling back to local data");
                    inner.state.raise(&e);
                    inner.generation += 1;
                    inner.phase = Phase::DegradedError;
                }
            }
        }
        self.retire(generation);
        false
    }

    /// Tear down the subscription set opened for `generation`, if it is still
    /// the registered one.
    fn retire(&self, generation: u64) {
        let Some(set) = self
            .subscriptions()
            .take_if(|set| set.generation == generation)
        else {
            return;
        };
        set.teardown();
        debug!("live subscriptions closed after an error");
    }
}

struct SubscriptionSet {
    generation: u64,
    cancels: Vec<Unsubscribe>,
    drains: Vec<JoinHandle<()>>,
}

impl SubscriptionSet {
    fn teardown(self) {
        for cancel in self.cancels {
            cancel.unsubscribe();
        }
        for drain in self.drains {
            drain.abort();
        }
    }
}

/// Owns the in-memory emotions, journal entries and reflections plus the
/// [`SyncState`] flags, and keeps them converged with the local cache. Remote
/// reads replace whole collections. Saves are optimistic and their remote
/// persistence runs in the background without retry.
pub struct SyncCoordinator {
    shared: Arc<Shared>,
    gateway: Gateway,
    progress: ProgressLogs,
    connectivity: Connectivity,
    writes: Mutex<JoinSet<WriteOutcome>>,
    rt: Handle,
}

impl SyncCoordinator {
    /// Must be called from within a tokio runtime; background writes and
    /// subscription drains are spawned on it.
    pub fn new(cache: Database, gateway: Gateway, connectivity: Connectivity) -> Result<Self> {
        let rt = Handle::try_current().context("Sync coordinator requires a tokio runtime")?;
        let state = SyncState {
            online: connectivity.is_online(),
            ..SyncState::default()
        };
        Ok(Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state,
                    ..Inner::default()
                }),
                cache: Mutex::new(cache),
                subscriptions: Mutex::new(None),
            }),
            progress: ProgressLogs::new(gateway.clone()),
            gateway,
            connectivity,
            writes: Mutex::new(JoinSet::new()),
            rt,
        })
    }

    fn writes(&self) -> MutexGuard<'_, JoinSet<WriteOutcome>> {
        self.writes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn user_id(&self) -> &str {
        self.gateway.user_id()
    }

    #[must_use]
    pub fn progress(&self) -> &ProgressLogs {
        &self.progress
    }

    #[must_use]
    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    // --- Loading ---

    /// Full reload. Online: fetch all three collections in parallel, each
    /// failure isolated to its own collection, then go live if nothing
    /// failed. Offline: hydrate from the local cache without remote calls.
    pub async fn load_all(&self) {
        self.unsubscribe();
        let online = self.connectivity.is_online();
        {
            let mut inner = self.shared.inner();
            inner.phase = Phase::Loading;
            inner.state = SyncState {
                online,
                remote_index_error: false,
                remote_unavailable: false,
                loading: !inner.loaded_once,
            };
        }

        if !online {
            let mut inner = self.shared.inner();
            self.shared.hydrate::<Emotion>(&mut inner);
            self.shared.hydrate::<JournalEntry>(&mut inner);
            self.shared.hydrate::<Reflection>(&mut inner);
            inner.phase = Phase::DegradedLocal;
            inner.state.loading = false;
            inner.loaded_once = true;
            info!("offline, loaded data from local cache");
            return;
        }

        let (emotions, journal, reflections) = tokio::join!(
            self.gateway.list::<Emotion>(),
            self.gateway.list::<JournalEntry>(),
            self.gateway.list::<Reflection>(),
        );

        let degraded = {
            let mut inner = self.shared.inner();
            self.apply_initial(&mut inner, emotions);
            self.apply_initial(&mut inner, journal);
            self.apply_initial(&mut inner, reflections);
            inner.state.loading = false;
            inner.loaded_once = true;
            inner.state.degraded()
        };

        if degraded {
            self.set_phase(Phase::DegradedError);
            return;
        }
        if !self.connectivity.is_online() {
            debug!("went offline during load, not subscribing");
            self.set_phase(Phase::DegradedLocal);
            return;
        }
        if self.subscribe() {
            self.set_phase(Phase::Live);
            info!("initial load complete, live updates active");
        }
    }

    fn apply_initial<R: Stored>(&self, inner: &mut Inner, result: Result<Vec<R>, RemoteError>) {
        match result {
            Ok(records) => {
                debug!(collection = %R::COLLECTION, count = records.len(), "loaded from remote");
                self.shared.replace(inner, records);
            }
            Err(e) => {
                match &e {
                    RemoteError::IndexMissing(_) => {
                        warn!(collection = %R::COLLECTION, error = %e, "remote index missing, using local cache only");
                    }
                    RemoteError::Unavailable(_) => {
                        warn!(collection = %R::COLLECTION, error = %e, "remote unavailable, using local cache only");
                    }
                    RemoteError::Unknown { .. } => {
                        error!(collection = %R::COLLECTION, error = %e, "unexpected remote error, using local cache only");
                    }
                }
                R::slot(&mut inner.data).clear();
                inner.state.raise(&e);
            }
        }
    }

    fn set_phase(&self, phase: Phase) {
        self.shared.inner().phase = phase;
    }

    // --- Live subscriptions ---

    /// Open one live subscription per collection, replacing any prior set.
    /// Returns `false` without subscribing while offline or degraded.
    ///
    /// The set is owned by the coordinator rather than handed back, so every
    /// exit path can reach it: [`unsubscribe`](Self::unsubscribe), a reload,
    /// shutdown, or an error delivered on any of its subscriptions.
    pub fn subscribe(&self) -> bool {
        let mut subscriptions = self.shared.subscriptions();
        let generation = {
            let mut inner = self.shared.inner();
            if !self.connectivity.is_online() || inner.state.degraded() {
                return false;
            }
            inner.generation += 1;
            inner.generation
        };
        if let Some(prior) = subscriptions.take() {
            prior.teardown();
        }

        let mut set = SubscriptionSet {
            generation,
            cancels: Vec::with_capacity(3),
            drains: Vec::with_capacity(3),
        };
        self.open::<Emotion>(generation, &mut set);
        self.open::<JournalEntry>(generation, &mut set);
        self.open::<Reflection>(generation, &mut set);
        *subscriptions = Some(set);
        true
    }

    fn open<R: Stored>(&self, generation: u64, set: &mut SubscriptionSet) {
        let (mut updates, cancel) = self.gateway.subscribe(R::COLLECTION).into_parts();
        let shared = Arc::clone(&self.shared);
        let drain = self.rt.spawn(async move {
            while let Some(delivery) = updates.recv().await {
                if !shared.deliver::<R>(generation, delivery) {
                    break;
                }
            }
        });
        set.cancels.push(cancel);
        set.drains.push(drain);
    }

    /// Tear down the active subscription set, if any. No delivery from it
    /// mutates state after this returns.
    pub fn unsubscribe(&self) {
        let mut subscriptions = self.shared.subscriptions();
        let Some(set) = subscriptions.take() else {
            return;
        };
        self.shared.inner().generation += 1;
        set.teardown();
        debug!("live subscriptions closed");
    }

    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.shared.subscriptions().is_some()
    }

    // --- Connectivity ---

    /// React to an online/offline report. Only transitions have an effect.
    pub async fn handle_connectivity(&self, online: bool) {
        let first = {
            let mut inner = self.shared.inner();
            let first = inner.phase == Phase::Uninitialized;
            if !first && inner.state.online == online {
                return;
            }
            inner.state.online = online;
            first
        };
        if first {
            self.load_all().await;
        } else if online {
            info!("back online, reloading");
            self.load_all().await;
        } else {
            info!("offline, closing live subscriptions");
            self.unsubscribe();
            self.set_phase(Phase::DegradedLocal);
        }
    }

    /// Follow the connectivity signal until `shutdown` resolves. Performs
    /// the initial load first if it has not happened yet.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) {
        let mut changes = self.connectivity.watch();
        if self.phase() == Phase::Uninitialized {
            self.load_all().await;
        }
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                () = &mut shutdown => break,
                changed = changes.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let online = *changes.borrow_and_update();
                    self.handle_connectivity(online).await;
                }
            }
        }
        self.unsubscribe();
    }

    // --- Saves ---

    pub fn save_emotion(&self, emotion: Emotion) -> Result<()> {
        self.save(emotion)
    }

    pub fn save_journal_entry(&self, entry: JournalEntry) -> Result<()> {
        self.save(entry)
    }

    pub fn save_reflection(&self, reflection: Reflection) -> Result<()> {
        self.save(reflection)
    }

    /// Optimistic save: the cache and in-memory collection are updated before
    /// this returns; the remote write runs in the background. Fails only if
    /// the local cache cannot be written, in which case nothing changes.
    fn save<R: Stored>(&self, record: R) -> Result<()> {
        let remote_unavailable = {
            let mut inner = self.shared.inner();
            let mut updated = R::slot(&mut inner.data).clone();
            let at = updated.partition_point(|r| r.timestamp() > record.timestamp());
            updated.insert(at, record.clone());
            self.shared
                .cache()
                .write_records(&updated)
                .with_context(|| format!("Failed to save {} locally", R::COLLECTION))?;
            *R::slot(&mut inner.data) = updated;
            inner.state.remote_unavailable
        };

        if !self.connectivity.is_online() || remote_unavailable {
            debug!(collection = %R::COLLECTION, id = record.id(), "saved locally only");
            return Ok(());
        }

        let gateway = self.gateway.clone();
        let progress = self.progress.clone();
        let mut writes = self.writes();
        while writes.try_join_next().is_some() {}
        writes.spawn_on(persist(gateway, progress, record), &self.rt);
        Ok(())
    }

    /// Wait for all background writes started so far.
    pub async fn flush(&self) -> Vec<WriteOutcome> {
        let mut pending = std::mem::take(&mut *self.writes());
        let mut outcomes = Vec::new();
        while let Some(joined) = pending.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => error!(error = %e, "background write task failed"),
            }
        }
        outcomes
    }

    /// Close subscriptions and wait for in-flight writes.
    pub async fn shutdown(&self) -> Vec<WriteOutcome> {
        self.unsubscribe();
        self.flush().await
    }

    // --- Reads ---

    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        let inner = self.shared.inner();
        Snapshot {
            emotions: inner.data.emotions.clone(),
            journal_entries: inner.data.journal_entries.clone(),
            reflections: inner.data.reflections.clone(),
            state: inner.state,
            phase: inner.phase,
        }
    }

    #[must_use]
    pub fn state(&self) -> SyncState {
        self.shared.inner().state
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.shared.inner().phase
    }

    #[must_use]
    pub fn emotions(&self) -> Vec<Emotion> {
        self.shared.inner().data.emotions.clone()
    }

    #[must_use]
    pub fn journal_entries(&self) -> Vec<JournalEntry> {
        self.shared.inner().data.journal_entries.clone()
    }

    #[must_use]
    pub fn reflections(&self) -> Vec<Reflection> {
        self.shared.inner().data.reflections.clone()
    }

    #[must_use]
    pub fn latest_emotion(&self) -> Option<Emotion> {
        self.shared.inner().data.emotions.first().cloned()
    }

    #[must_use]
    pub fn recent_emotions(&self, limit: usize) -> Vec<Emotion> {
        self.shared
            .inner()
            .data
            .emotions
            .iter()
            .take(limit)
            .cloned()
            .collect()
    }

    /// The reflection already recorded for a `YYYY-MM-DD` day, if any.
    #[must_use]
    pub fn reflection_for_date(&self, date: &str) -> Option<Reflection> {
        self.shared
            .inner()
            .data
            .reflections
            .iter()
            .find(|r| r.date == date)
            .cloned()
    }

    /// What the local cache currently holds for a collection.
    pub fn cached<R: Record>(&self) -> Result<Vec<R>> {
        self.shared.cache().read_records()
    }
}

async fn persist<R: Record>(gateway: Gateway, progress: ProgressLogs, record: R) -> WriteOutcome {
    match gateway.create(&record).await {
        Ok(document) => {
            info!(collection = %R::COLLECTION, id = record.id(), %document, "saved to remote");
            match progress.record(&record.project()).await {
                Ok(_) => WriteOutcome::Persisted,
                Err(e) => {
                    warn!(collection = %R::COLLECTION, id = record.id(), error = %e, "failed to record progress log");
                    WriteOutcome::ProgressFailed(e)
                }
            }
        }
        Err(e) => {
            error!(collection = %R::COLLECTION, id = record.id(), error = %e, "remote write failed, kept locally");
            WriteOutcome::Failed(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Collection, ProgressKind, ReflectionPrompts};
    use crate::remote::UserScope;
    use crate::remote::memory::MemoryRemote;
    use chrono::{Duration, NaiveDate, Utc};
    use serde_json::json;

    struct Harness {
        remote: Arc<MemoryRemote>,
        connectivity: Connectivity,
        coordinator: SyncCoordinator,
    }

    fn harness_with(online: bool, cache: Database) -> Harness {
        let remote = Arc::new(MemoryRemote::new().unwrap());
        let gateway = Gateway::new(remote.clone(), UserScope::Authenticated("u1".to_string()));
        let connectivity = Connectivity::new(online);
        let coordinator = SyncCoordinator::new(cache, gateway, connectivity.clone()).unwrap();
        Harness {
            remote,
            connectivity,
            coordinator,
        }
    }

    fn harness(online: bool) -> Harness {
        harness_with(online, Database::open_in_memory().unwrap())
    }

    async fn eventually(check: impl Fn() -> bool) {
        for _ in 0..500 {
            if check() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        panic!("condition not reached");
    }

    fn remote_emotion(name: &str, minutes_ago: i64) -> serde_json::Value {
        let ts = Utc::now() - Duration::minutes(minutes_ago);
        json!({
            "id": format!("{name}-{minutes_ago}"),
            "name": name,
            "intensity": 5,
            "color": "c",
            "timestamp": ts.to_rfc3339(),
            "userId": "u1",
        })
    }

    #[tokio::test]
    async fn test_offline_saves_match_cache() {
        let h = harness(false);
        h.coordinator.load_all().await;
        assert_eq!(h.coordinator.phase(), Phase::DegradedLocal);

        for (i, name) in ["Sad", "Joyful", "Anxious", "Content"].iter().enumerate() {
            let e = Emotion::new(name, i as i64 + 2).unwrap();
            h.coordinator.save_emotion(e.clone()).unwrap();
            h.coordinator
                .save_journal_entry(JournalEntry::new("entry", &e).unwrap())
                .unwrap();

            assert_eq!(
                h.coordinator.emotions(),
                h.coordinator.cached::<Emotion>().unwrap()
            );
            assert_eq!(
                h.coordinator.journal_entries(),
                h.coordinator.cached::<JournalEntry>().unwrap()
            );
        }
        assert_eq!(h.coordinator.emotions().len(), 4);
        assert_eq!(h.remote.calls().create, 0);
        assert_eq!(h.remote.calls().list, 0);
    }

    #[tokio::test]
    async fn test_offline_single_emotion() {
        let h = harness(false);
        h.coordinator.load_all().await;
        h.coordinator
            .save_emotion(Emotion::new("Sad", 6).unwrap())
            .unwrap();
        assert!(h.coordinator.flush().await.is_empty());

        let emotions = h.coordinator.emotions();
        assert_eq!(emotions.len(), 1);
        let cached = h.coordinator.cached::<Emotion>().unwrap();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].name, "Sad");
        assert_eq!(cached[0].intensity, 6);
        assert!(!h.coordinator.state().online);
        assert_eq!(h.coordinator.state().banner(), Some(Banner::Offline));
    }

    #[tokio::test]
    async fn test_offline_load_reads_cache() {
        let cache = Database::open_in_memory().unwrap();
        let stored = vec![Emotion::new("Lonely", 4).unwrap()];
        cache.write_records(&stored).unwrap();

        let h = harness_with(false, cache);
        h.coordinator.load_all().await;
        assert_eq!(h.coordinator.emotions(), stored);
        assert!(!h.coordinator.state().loading);
    }

    #[tokio::test]
    async fn test_save_is_visible_before_remote_resolves() {
        let h = harness(true);
        h.coordinator.load_all().await;
        h.remote.pause_writes();

        let e = Emotion::new("Excited", 9).unwrap();
        h.coordinator.save_emotion(e.clone()).unwrap();
        assert_eq!(h.coordinator.emotions(), vec![e.clone()]);
        assert!(h.remote.documents(Collection::Emotions, "u1").is_empty());

        h.remote.set_fail_writes(true);
        h.remote.resume_writes();
        let outcomes = h.coordinator.flush().await;
        assert!(matches!(outcomes.as_slice(), [WriteOutcome::Failed(_)]));

        // The failed write is kept and does not block the next save.
        assert!(h.coordinator.emotions().contains(&e));
        h.remote.set_fail_writes(false);
        h.coordinator
            .save_emotion(Emotion::new("Content", 5).unwrap())
            .unwrap();
        let outcomes = h.coordinator.flush().await;
        assert_eq!(outcomes, vec![WriteOutcome::Persisted]);
        assert_eq!(h.coordinator.cached::<Emotion>().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_offline_online_cycle_subscribes_once() {
        let h = harness(true);
        h.coordinator.load_all().await;
        assert_eq!(h.coordinator.phase(), Phase::Live);
        assert_eq!(h.remote.active_subscriptions(), 3);
        assert_eq!(h.remote.calls().list, 3);

        h.connectivity.set_online(false);
        h.coordinator.handle_connectivity(false).await;
        assert_eq!(h.remote.calls().unsubscribe, 3);
        assert_eq!(h.remote.active_subscriptions(), 0);
        assert_eq!(h.coordinator.phase(), Phase::DegradedLocal);
        assert!(!h.coordinator.is_subscribed());

        // A repeated report is not a transition.
        h.coordinator.handle_connectivity(false).await;
        assert_eq!(h.remote.calls().unsubscribe, 3);

        h.connectivity.set_online(true);
        h.coordinator.handle_connectivity(true).await;
        let calls = h.remote.calls();
        assert_eq!(calls.list, 6);
        assert_eq!(calls.subscribe, 6);
        assert_eq!(h.remote.active_subscriptions(), 3);
        assert_eq!(h.coordinator.phase(), Phase::Live);
    }

    #[tokio::test]
    async fn test_resubscribe_replaces_prior_set() {
        let h = harness(true);
        h.coordinator.load_all().await;
        assert!(h.coordinator.subscribe());
        assert_eq!(h.remote.active_subscriptions(), 3);
        assert_eq!(h.remote.calls().unsubscribe, 3);

        h.coordinator.load_all().await;
        assert_eq!(h.remote.active_subscriptions(), 3);
    }

    #[tokio::test]
    async fn test_index_missing_is_isolated() {
        let h = harness(true);
        h.remote
            .seed(Collection::Emotions, &remote_emotion("Sad", 5))
            .unwrap();
        h.remote
            .seed(
                Collection::Reflections,
                &json!({
                    "id": "r1", "date": "2024-06-15", "gratitude": "tea",
                    "mood": 7, "timestamp": Utc::now().to_rfc3339(), "userId": "u1"
                }),
            )
            .unwrap();
        h.remote.drop_index(Collection::JournalEntries);

        h.coordinator.load_all().await;
        let state = h.coordinator.state();
        assert!(state.remote_index_error);
        assert!(!state.remote_unavailable);
        assert_eq!(state.banner(), Some(Banner::IndexMissing));
        assert_eq!(h.coordinator.phase(), Phase::DegradedError);

        assert!(h.coordinator.journal_entries().is_empty());
        assert_eq!(h.coordinator.emotions().len(), 1);
        assert_eq!(h.coordinator.reflections().len(), 1);
        assert_eq!(h.coordinator.reflections()[0].challenge, "");
        assert_eq!(h.remote.calls().subscribe, 0);
    }

    #[tokio::test]
    async fn test_unavailable_at_load_skips_remote_writes() {
        let h = harness(true);
        h.remote.set_unavailable(true);
        h.coordinator.load_all().await;
        assert!(h.coordinator.state().remote_unavailable);
        assert_eq!(
            h.coordinator.state().banner(),
            Some(Banner::RemoteUnavailable)
        );

        h.coordinator
            .save_emotion(Emotion::new("Stressed", 8).unwrap())
            .unwrap();
        assert!(h.coordinator.flush().await.is_empty());
        assert_eq!(h.remote.calls().create, 0);
        assert_eq!(h.coordinator.cached::<Emotion>().unwrap().len(), 1);

        // Flags reset on the next successful reload.
        h.remote.set_unavailable(false);
        h.coordinator.load_all().await;
        assert_eq!(h.coordinator.state().banner(), None);
        assert_eq!(h.coordinator.phase(), Phase::Live);
        assert!(!h.coordinator.state().loading);
    }

    #[tokio::test]
    async fn test_remote_is_authoritative_at_load() {
        let cache = Database::open_in_memory().unwrap();
        cache
            .write_records(&[Emotion::new("Angry", 7).unwrap()])
            .unwrap();
        let h = harness_with(true, cache);
        h.remote
            .seed(Collection::Emotions, &remote_emotion("Grateful", 1))
            .unwrap();

        h.coordinator.load_all().await;
        let emotions = h.coordinator.emotions();
        assert_eq!(emotions.len(), 1);
        assert_eq!(emotions[0].name, "Grateful");
        assert_eq!(h.coordinator.cached::<Emotion>().unwrap(), emotions);
    }

    #[tokio::test]
    async fn test_live_delivery_replaces_collection_and_cache() {
        let h = harness(true);
        h.coordinator.load_all().await;

        h.remote
            .seed(Collection::Emotions, &remote_emotion("Joyful", 10))
            .unwrap();
        h.remote
            .seed(Collection::Emotions, &remote_emotion("Sad", 1))
            .unwrap();
        eventually(|| h.coordinator.emotions().len() == 2).await;

        let emotions = h.coordinator.emotions();
        assert_eq!(emotions[0].name, "Sad");
        assert_eq!(h.coordinator.cached::<Emotion>().unwrap(), emotions);
    }

    #[tokio::test]
    async fn test_no_delivery_after_teardown() {
        let h = harness(true);
        h.coordinator.load_all().await;
        h.coordinator.unsubscribe();

        h.remote
            .seed(Collection::Emotions, &remote_emotion("Joyful", 1))
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(h.coordinator.emotions().is_empty());
    }

    #[tokio::test]
    async fn test_subscription_error_degrades() {
        let h = harness(true);
        h.coordinator.load_all().await;
        h.coordinator
            .save_emotion(Emotion::new("Content", 5).unwrap())
            .unwrap();
        h.coordinator.flush().await;
        let creates = h.remote.calls().create;

        h.remote
            .break_subscriptions(&RemoteError::Unavailable("lost".to_string()));
        eventually(|| h.coordinator.state().remote_unavailable).await;
        assert_eq!(h.coordinator.phase(), Phase::DegradedError);
        eventually(|| !h.coordinator.is_subscribed()).await;
        assert_eq!(h.remote.active_subscriptions(), 0);
        assert_eq!(h.remote.calls().unsubscribe, 3);
        assert_eq!(h.coordinator.cached::<Emotion>().unwrap().len(), 1);

        h.coordinator
            .save_emotion(Emotion::new("Sad", 3).unwrap())
            .unwrap();
        h.coordinator.flush().await;
        assert_eq!(h.remote.calls().create, creates);
        assert_eq!(h.coordinator.emotions().len(), 2);
    }

    #[tokio::test]
    async fn test_reflection_with_only_gratitude() {
        let h = harness(false);
        h.coordinator.load_all().await;
        let date = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap();
        let prompts = ReflectionPrompts {
            gratitude: Some("a quiet morning".to_string()),
            ..Default::default()
        };

        h.coordinator
            .save_reflection(Reflection::new(date, &prompts, 8).unwrap())
            .unwrap();
        let stored = h.coordinator.reflection_for_date("2024-06-15").unwrap();
        assert_eq!(stored.gratitude, "a quiet morning");
        assert_eq!(stored.challenge, "");
        assert_eq!(stored.growth, "");
        assert_eq!(stored.tomorrow, "");

        // One per day is only checked by callers.
        h.coordinator
            .save_reflection(Reflection::new(date, &prompts, 6).unwrap())
            .unwrap();
        assert_eq!(h.coordinator.reflections().len(), 2);
    }

    #[tokio::test]
    async fn test_online_journal_save_emits_one_progress_log() {
        let h = harness(true);
        h.coordinator.load_all().await;
        let emotion = Emotion::new("Melancholic", 4).unwrap();
        let entry = JournalEntry::new("the rain kept on", &emotion).unwrap();

        h.coordinator.save_journal_entry(entry.clone()).unwrap();
        assert_eq!(h.coordinator.flush().await, vec![WriteOutcome::Persisted]);

        let logs = h.coordinator.progress().list().await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].kind, ProgressKind::Journal);
        assert_eq!(
            logs[0]
                .metadata
                .as_ref()
                .and_then(|m| m.journal_content.as_deref()),
            Some("the rain kept on")
        );

        let stored = h.remote.documents(Collection::JournalEntries, "u1");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].data["userId"], "u1");
        assert!(stored[0].data["createdAt"].is_string());
    }

    #[tokio::test]
    async fn test_failed_progress_log_keeps_record() {
        let h = harness(true);
        h.coordinator.load_all().await;
        h.remote.fail_writes_for(Collection::ProgressLogs);

        let emotion = Emotion::new("Hopeful", 7).unwrap();
        h.coordinator.save_emotion(emotion.clone()).unwrap();
        let outcomes = h.coordinator.flush().await;
        assert!(matches!(
            outcomes.as_slice(),
            [WriteOutcome::ProgressFailed(_)]
        ));

        let stored = h.remote.documents(Collection::Emotions, "u1");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].data["name"], "Hopeful");
        assert!(h.coordinator.emotions().contains(&emotion));
        assert!(h.coordinator.cached::<Emotion>().unwrap().contains(&emotion));
        assert!(h.remote.documents(Collection::ProgressLogs, "u1").is_empty());
    }

    #[tokio::test]
    async fn test_run_follows_connectivity() {
        let h = harness(true);
        let coordinator = Arc::new(h.coordinator);
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

        let runner = Arc::clone(&coordinator);
        let task = tokio::spawn(async move {
            runner
                .run(async {
                    let _ = stop_rx.await;
                })
                .await;
        });

        let remote = Arc::clone(&h.remote);
        eventually(|| remote.active_subscriptions() == 3).await;

        h.connectivity.set_online(false);
        eventually(|| remote.active_subscriptions() == 0).await;
        assert_eq!(coordinator.phase(), Phase::DegradedLocal);

        h.connectivity.set_online(true);
        eventually(|| coordinator.phase() == Phase::Live).await;
        assert_eq!(remote.active_subscriptions(), 3);

        stop_tx.send(()).unwrap();
        task.await.unwrap();
        assert_eq!(remote.active_subscriptions(), 0);
    }

    #[test]
    fn test_banner_priority() {
        let mut state = SyncState {
            online: true,
            remote_index_error: true,
            remote_unavailable: true,
            loading: false,
        };
        assert_eq!(state.banner(), Some(Banner::RemoteUnavailable));
        state.online = false;
        assert_eq!(state.banner(), Some(Banner::Offline));
        state.online = true;
        state.remote_unavailable = false;
        assert_eq!(state.banner(), Some(Banner::IndexMissing));
        assert!(Banner::Offline.message().contains("offline"));
    }
}
