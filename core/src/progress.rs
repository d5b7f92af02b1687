use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{
    Collection, Emotion, JournalEntry, ProgressKind, ProgressLog, ProgressMetadata, Reflection,
    ReflectionData, instant,
};
use crate::remote::{Gateway, RemoteError, Subscription, TimeRange, decode};

/// Emotion label recorded for reflections, whose intensity is the mood.
pub const REFLECTIVE: &str = "Reflective";

/// A progress log before the store assigns its id and owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProgressLog {
    pub emotion: String,
    pub intensity: u8,
    #[serde(with = "instant")]
    pub timestamp: DateTime<Utc>,
    pub note: String,
    #[serde(rename = "type")]
    pub kind: ProgressKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ProgressMetadata>,
}

impl NewProgressLog {
    #[must_use]
    pub fn with_note(mut self, note: &str) -> Self {
        self.note = note.to_string();
        self
    }

    fn into_log(self, id: &str, user_id: &str) -> ProgressLog {
        ProgressLog {
            id: id.to_string(),
            user_id: user_id.to_string(),
            emotion: self.emotion,
            intensity: self.intensity,
            timestamp: self.timestamp,
            note: self.note,
            kind: self.kind,
            metadata: self.metadata,
        }
    }
}

#[must_use]
pub fn from_emotion(emotion: &Emotion) -> NewProgressLog {
    NewProgressLog {
        emotion: emotion.name.clone(),
        intensity: emotion.intensity,
        timestamp: emotion.timestamp,
        note: String::new(),
        kind: ProgressKind::Emotion,
        metadata: None,
    }
}

#[must_use]
pub fn from_journal(entry: &JournalEntry) -> NewProgressLog {
    NewProgressLog {
        emotion: entry.emotion.name.clone(),
        intensity: entry.emotion.intensity,
        timestamp: entry.timestamp,
        note: "Journal entry".to_string(),
        kind: ProgressKind::Journal,
        metadata: Some(ProgressMetadata {
            journal_content: Some(entry.content.clone()),
            reflection_data: None,
        }),
    }
}

#[must_use]
pub fn from_reflection(reflection: &Reflection) -> NewProgressLog {
    NewProgressLog {
        emotion: REFLECTIVE.to_string(),
        intensity: reflection.mood,
        timestamp: reflection.timestamp,
        note: "Daily reflection".to_string(),
        kind: ProgressKind::Reflection,
        metadata: Some(ProgressMetadata {
            journal_content: None,
            reflection_data: Some(ReflectionData {
                gratitude: reflection.gratitude.clone(),
                challenge: reflection.challenge.clone(),
                growth: reflection.growth.clone(),
                tomorrow: reflection.tomorrow.clone(),
                mood: reflection.mood,
            }),
        }),
    }
}

/// Rebuild progress logs from local records, for analytics while the remote
/// subcollection cannot be read. Newest first.
#[must_use]
pub fn project_snapshot(
    user_id: &str,
    emotions: &[Emotion],
    journal: &[JournalEntry],
    reflections: &[Reflection],
) -> Vec<ProgressLog> {
    let mut logs: Vec<ProgressLog> = emotions
        .iter()
        .map(|e| from_emotion(e).into_log(&e.id, user_id))
        .chain(journal.iter().map(|j| from_journal(j).into_log(&j.id, user_id)))
        .chain(
            reflections
                .iter()
                .map(|r| from_reflection(r).into_log(&r.id, user_id)),
        )
        .collect();
    logs.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    logs
}

/// Typed live feed of the owner's progress logs.
pub struct ProgressFeed {
    inner: Subscription,
}

impl ProgressFeed {
    pub async fn next(&mut self) -> Option<Result<Vec<ProgressLog>, RemoteError>> {
        let delivery = self.inner.next().await?;
        Some(delivery.map(|docs| decode(Collection::ProgressLogs, docs)))
    }

    pub fn unsubscribe(self) {
        self.inner.unsubscribe();
    }
}

/// Append-only access to the owner's `progressLogs` subcollection. One
/// analytic record is written per saved emotion, journal entry or reflection.
#[derive(Clone)]
pub struct ProgressLogs {
    gateway: Gateway,
}

impl ProgressLogs {
    #[must_use]
    pub fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }

    pub async fn record(&self, log: &NewProgressLog) -> Result<String, RemoteError> {
        self.gateway
            .create_value(Collection::ProgressLogs, log)
            .await
    }

    pub async fn list(&self) -> Result<Vec<ProgressLog>, RemoteError> {
        let docs = self
            .gateway
            .list_documents(Collection::ProgressLogs, None)
            .await?;
        Ok(decode(Collection::ProgressLogs, docs))
    }

    /// Logs with `start <= timestamp <= end`, newest first.
    pub async fn list_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ProgressLog>, RemoteError> {
        if start > end {
            return Ok(Vec::new());
        }
        let docs = self
            .gateway
            .list_documents(Collection::ProgressLogs, Some(TimeRange { start, end }))
            .await?;
        Ok(decode(Collection::ProgressLogs, docs))
    }

    #[must_use]
    pub fn subscribe(&self) -> ProgressFeed {
        ProgressFeed {
            inner: self.gateway.subscribe(Collection::ProgressLogs),
        }
    }

    pub async fn delete(&self, id: &str) -> Result<(), RemoteError> {
        self.gateway.delete(Collection::ProgressLogs, id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ReflectionPrompts;
    use crate::remote::UserScope;
    use crate::remote::memory::MemoryRemote;
    use chrono::{Duration, NaiveDate, TimeZone};
    use std::sync::Arc;

    fn logs_for(remote: &Arc<MemoryRemote>) -> ProgressLogs {
        ProgressLogs::new(Gateway::new(
            remote.clone(),
            UserScope::Authenticated("u1".to_string()),
        ))
    }

    #[test]
    fn test_projections() {
        let emotion = Emotion::new("Grateful", 8).unwrap();
        let log = from_emotion(&emotion);
        assert_eq!(log.kind, ProgressKind::Emotion);
        assert_eq!(log.note, "");
        assert_eq!(log.timestamp, emotion.timestamp);
        assert!(log.metadata.is_none());

        let entry = JournalEntry::new("walked by the sea", &emotion).unwrap();
        let log = from_journal(&entry);
        assert_eq!(log.emotion, "Grateful");
        assert_eq!(log.intensity, 8);
        assert_eq!(log.note, "Journal entry");
        assert_eq!(
            log.metadata.unwrap().journal_content.as_deref(),
            Some("walked by the sea")
        );

        let prompts = ReflectionPrompts {
            gratitude: Some("friends".to_string()),
            ..Default::default()
        };
        let date = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap();
        let reflection = Reflection::new(date, &prompts, 4).unwrap();
        let log = from_reflection(&reflection).with_note("evening");
        assert_eq!(log.emotion, REFLECTIVE);
        assert_eq!(log.intensity, 4);
        assert_eq!(log.note, "evening");
        let data = log.metadata.unwrap().reflection_data.unwrap();
        assert_eq!(data.gratitude, "friends");
        assert_eq!(data.tomorrow, "");
        assert_eq!(data.mood, 4);
    }

    #[test]
    fn test_wire_shape() {
        let emotion = Emotion::new("Sad", 6).unwrap();
        let value = serde_json::to_value(from_journal(
            &JournalEntry::new("rain", &emotion).unwrap(),
        ))
        .unwrap();
        assert_eq!(value["type"], "journal");
        assert_eq!(value["metadata"]["journalContent"], "rain");
        assert!(value.get("id").is_none());
    }

    #[tokio::test]
    async fn test_record_list_and_delete() {
        let remote = Arc::new(MemoryRemote::new().unwrap());
        let logs = logs_for(&remote);

        let emotion = Emotion::new("Sad", 6).unwrap();
        let id = logs.record(&from_emotion(&emotion)).await.unwrap();

        let listed = logs.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, id);
        assert_eq!(listed[0].user_id, "u1");
        assert_eq!(listed[0].kind, ProgressKind::Emotion);

        logs.delete(&id).await.unwrap();
        assert!(logs.list().await.unwrap().is_empty());
        assert!(logs.delete(&id).await.is_err());
    }

    #[tokio::test]
    async fn test_list_between_inclusive() {
        let remote = Arc::new(MemoryRemote::new().unwrap());
        let logs = logs_for(&remote);
        let base = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();

        for day in 0..5 {
            let e = Emotion::at("Content", 5, base + Duration::days(day)).unwrap();
            logs.record(&from_emotion(&e)).await.unwrap();
        }

        let found = logs
            .list_between(base + Duration::days(1), base + Duration::days(3))
            .await
            .unwrap();
        assert_eq!(found.len(), 3);
        assert!(found[0].timestamp > found[2].timestamp);

        let none = logs
            .list_between(base + Duration::days(3), base)
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_feed_sees_new_logs() {
        let remote = Arc::new(MemoryRemote::new().unwrap());
        let logs = logs_for(&remote);
        let mut feed = logs.subscribe();
        assert!(feed.next().await.unwrap().unwrap().is_empty());

        let e = Emotion::new("Joyful", 9).unwrap();
        logs.record(&from_emotion(&e)).await.unwrap();
        let update = feed.next().await.unwrap().unwrap();
        assert_eq!(update.len(), 1);
        assert_eq!(update[0].emotion, "Joyful");
        feed.unsubscribe();
        assert_eq!(remote.active_subscriptions(), 0);
    }

    #[test]
    fn test_project_snapshot_orders_newest_first() {
        let base = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let old = Emotion::at("Sad", 3, base).unwrap();
        let new = Emotion::at("Joyful", 9, base + Duration::hours(2)).unwrap();
        let entry = JournalEntry::at("hmm", &old, base + Duration::hours(1)).unwrap();

        let logs = project_snapshot("u1", &[old, new], &[entry], &[]);
        let kinds: Vec<ProgressKind> = logs.iter().map(|l| l.kind).collect();
        assert_eq!(
            kinds,
            vec![ProgressKind::Emotion, ProgressKind::Journal, ProgressKind::Emotion]
        );
        assert_eq!(logs[0].emotion, "Joyful");
    }
}
