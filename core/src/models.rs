use anyhow::{Result, bail};
use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::progress::{self, NewProgressLog};

/// One selectable emotion: canonical label, display colour token, and the
/// category it is grouped under in the selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmotionKind {
    pub name: &'static str,
    pub color: &'static str,
    pub category: &'static str,
}

const fn kind(name: &'static str, color: &'static str, category: &'static str) -> EmotionKind {
    EmotionKind {
        name,
        color,
        category,
    }
}

pub const EMOTIONS: &[EmotionKind] = &[
    kind("Joyful", "from-yellow-400 to-amber-500", "Joy & Happiness"),
    kind("Content", "from-green-400 to-emerald-500", "Joy & Happiness"),
    kind("Excited", "from-orange-400 to-red-500", "Joy & Happiness"),
    kind("Grateful", "from-pink-400 to-rose-500", "Joy & Happiness"),
    kind("Sad", "from-blue-400 to-blue-600", "Sadness & Melancholy"),
    kind("Lonely", "from-indigo-400 to-purple-600", "Sadness & Melancholy"),
    kind("Disappointed", "from-gray-400 to-slate-600", "Sadness & Melancholy"),
    kind("Melancholic", "from-blue-300 to-indigo-500", "Sadness & Melancholy"),
    kind("Angry", "from-red-500 to-red-700", "Anger & Frustration"),
    kind("Frustrated", "from-orange-500 to-red-600", "Anger & Frustration"),
    kind("Irritated", "from-yellow-500 to-orange-600", "Anger & Frustration"),
    kind("Resentful", "from-red-400 to-pink-600", "Anger & Frustration"),
    kind("Anxious", "from-purple-400 to-indigo-600", "Fear & Anxiety"),
    kind("Fearful", "from-gray-500 to-gray-700", "Fear & Anxiety"),
    kind("Overwhelmed", "from-teal-400 to-cyan-600", "Fear & Anxiety"),
    kind("Stressed", "from-red-300 to-orange-500", "Fear & Anxiety"),
];

pub const MIN_SCALE: u8 = 1;
pub const MAX_SCALE: u8 = 10;

/// Look up an emotion label case-insensitively and return its catalogue entry.
pub fn validate_emotion_name(name: &str) -> Result<&'static EmotionKind> {
    let trimmed = name.trim();
    EMOTIONS
        .iter()
        .find(|k| k.name.eq_ignore_ascii_case(trimmed))
        .ok_or_else(|| {
            anyhow::anyhow!(
                "Unknown emotion '{name}'. Must be one of: {}",
                EMOTIONS.iter().map(|k| k.name).collect::<Vec<_>>().join(", ")
            )
        })
}

/// Validate a 1-10 scale value (emotion intensity or reflection mood).
pub fn validate_scale(value: i64, what: &str) -> Result<u8> {
    if !(i64::from(MIN_SCALE)..=i64::from(MAX_SCALE)).contains(&value) {
        bail!("{what} must be between {MIN_SCALE} and {MAX_SCALE} (got {value})");
    }
    Ok(value as u8)
}

pub fn validate_reflection_date(date: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|_| anyhow::anyhow!("Invalid reflection date '{date}'. Must be YYYY-MM-DD"))
}

/// Named collections. The three primary collections are scoped per user by a
/// `userId` field; progress logs live in a per-user subcollection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Collection {
    Emotions,
    JournalEntries,
    Reflections,
    ProgressLogs,
}

impl Collection {
    pub const PRIMARY: [Collection; 3] = [
        Collection::Emotions,
        Collection::JournalEntries,
        Collection::Reflections,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Emotions => "emotions",
            Self::JournalEntries => "journalEntries",
            Self::Reflections => "reflections",
            Self::ProgressLogs => "progressLogs",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "emotions" => Some(Self::Emotions),
            "journalEntries" => Some(Self::JournalEntries),
            "reflections" => Some(Self::Reflections),
            "progressLogs" => Some(Self::ProgressLogs),
            _ => None,
        }
    }

    /// Key under which the local cache mirrors this collection. Progress logs
    /// are never mirrored locally.
    #[must_use]
    pub fn cache_key(self) -> Option<&'static str> {
        match self {
            Self::Emotions => Some("soulful-emotions"),
            Self::JournalEntries => Some("soulful-journal-entries"),
            Self::Reflections => Some("soulful-reflections"),
            Self::ProgressLogs => None,
        }
    }

    /// Queries filtering on `userId` and ordering by `timestamp` need a
    /// composite index on the store side.
    #[must_use]
    pub fn requires_composite_index(self) -> bool {
        !matches!(self, Self::ProgressLogs)
    }

    /// Storage path of this collection for a given user.
    #[must_use]
    pub fn path(self, user_id: &str) -> String {
        match self {
            Self::ProgressLogs => format!("users/{user_id}/progressLogs"),
            other => other.name().to_string(),
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A user-owned record in one of the three primary collections.
pub trait Record: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    const COLLECTION: Collection;

    fn id(&self) -> &str;
    fn timestamp(&self) -> DateTime<Utc>;

    /// Analytic projection emitted after a successful remote write.
    fn project(&self) -> NewProgressLog;
}

/// Instants travel as RFC 3339 strings; epoch milliseconds are accepted on
/// read so older cached payloads still load.
pub mod instant {
    use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&value.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Millis(i64),
        }

        match Raw::deserialize(d)? {
            Raw::Text(s) => DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| D::Error::custom(format!("invalid timestamp '{s}': {e}"))),
            Raw::Millis(ms) => Utc
                .timestamp_millis_opt(ms)
                .single()
                .ok_or_else(|| D::Error::custom(format!("timestamp out of range: {ms}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Emotion {
    pub id: String,
    pub name: String,
    pub intensity: u8,
    pub color: String,
    #[serde(with = "instant")]
    pub timestamp: DateTime<Utc>,
}

impl Emotion {
    pub fn new(name: &str, intensity: i64) -> Result<Self> {
        Self::at(name, intensity, Utc::now())
    }

    pub fn at(name: &str, intensity: i64, timestamp: DateTime<Utc>) -> Result<Self> {
        let kind = validate_emotion_name(name)?;
        let intensity = validate_scale(intensity, "Intensity")?;
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            name: kind.name.to_string(),
            intensity,
            color: kind.color.to_string(),
            timestamp,
        })
    }
}

impl Record for Emotion {
    const COLLECTION: Collection = Collection::Emotions;

    fn id(&self) -> &str {
        &self.id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn project(&self) -> NewProgressLog {
        progress::from_emotion(self)
    }
}

/// A journal entry carries a full copy of the emotion that was active when it
/// was written, so later emotion records never change past entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    pub id: String,
    pub content: String,
    pub emotion: Emotion,
    #[serde(with = "instant")]
    pub timestamp: DateTime<Utc>,
}

impl JournalEntry {
    pub fn new(content: &str, emotion: &Emotion) -> Result<Self> {
        Self::at(content, emotion, Utc::now())
    }

    pub fn at(content: &str, emotion: &Emotion, timestamp: DateTime<Utc>) -> Result<Self> {
        let content = content.trim();
        if content.is_empty() {
            bail!("Journal entry must not be empty");
        }
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            content: content.to_string(),
            emotion: emotion.clone(),
            timestamp,
        })
    }
}

impl Record for JournalEntry {
    const COLLECTION: Collection = Collection::JournalEntries;

    fn id(&self) -> &str {
        &self.id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn project(&self) -> NewProgressLog {
        progress::from_journal(self)
    }
}

/// The four free-text prompts of a daily reflection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReflectionPrompts {
    pub gratitude: Option<String>,
    pub challenge: Option<String>,
    pub growth: Option<String>,
    pub tomorrow: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reflection {
    pub id: String,
    /// Calendar-day key, `YYYY-MM-DD`.
    pub date: String,
    #[serde(default)]
    pub gratitude: String,
    #[serde(default)]
    pub challenge: String,
    #[serde(default)]
    pub growth: String,
    #[serde(default)]
    pub tomorrow: String,
    pub mood: u8,
    #[serde(with = "instant")]
    pub timestamp: DateTime<Utc>,
}

impl Reflection {
    pub fn new(date: NaiveDate, prompts: &ReflectionPrompts, mood: i64) -> Result<Self> {
        Self::at(date, prompts, mood, Utc::now())
    }

    pub fn at(
        date: NaiveDate,
        prompts: &ReflectionPrompts,
        mood: i64,
        timestamp: DateTime<Utc>,
    ) -> Result<Self> {
        let clean = |s: &Option<String>| s.as_deref().map(str::trim).unwrap_or("").to_string();
        let gratitude = clean(&prompts.gratitude);
        let challenge = clean(&prompts.challenge);
        let growth = clean(&prompts.growth);
        let tomorrow = clean(&prompts.tomorrow);

        if gratitude.is_empty() && challenge.is_empty() && growth.is_empty() && tomorrow.is_empty()
        {
            bail!("A reflection needs at least one of gratitude, challenge, growth or tomorrow");
        }
        let mood = validate_scale(mood, "Mood")?;

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            date: date.format("%Y-%m-%d").to_string(),
            gratitude,
            challenge,
            growth,
            tomorrow,
            mood,
            timestamp,
        })
    }
}

impl Record for Reflection {
    const COLLECTION: Collection = Collection::Reflections;

    fn id(&self) -> &str {
        &self.id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn project(&self) -> NewProgressLog {
        progress::from_reflection(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressKind {
    Emotion,
    Journal,
    Reflection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReflectionData {
    pub gratitude: String,
    pub challenge: String,
    pub growth: String,
    pub tomorrow: String,
    pub mood: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub journal_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reflection_data: Option<ReflectionData>,
}

/// Append-only analytic record derived from a primary record save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressLog {
    pub id: String,
    pub user_id: String,
    pub emotion: String,
    pub intensity: u8,
    #[serde(with = "instant")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub note: String,
    #[serde(rename = "type")]
    pub kind: ProgressKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ProgressMetadata>,
}
