
use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde::Serialize;

use crate::models::{Emotion, JournalEntry, ProgressLog, Reflection};

pub const POSITIVE: &[&str] = &["Joyful", "Content", "Excited", "Grateful"];
pub const NEUTRAL: &[&str] = &["Melancholic", "Reflective"];

const TOP_FREQUENCIES: usize = 8;
const TREND_DAYS: usize = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum MoodCategory {
    Positive,
    Neutral,
    Challenging,
}

impl MoodCategory {
    #[must_use]
    pub fn of(emotion: &str) -> Self {
        if POSITIVE.contains(&emotion) {
            Self::Positive
        } else if NEUTRAL.contains(&emotion) {
            Self::Neutral
        } else {
            Self::Challenging
        }
    }
}

/// Chart window over progress logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Window {
    Week,
    Month,
}

impl Window {
    #[must_use]
    pub fn days(self) -> i64 {
        match self {
            Self::Week => 7,
            Self::Month => 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmotionStat {
    pub name: String,
    pub count: usize,
    pub average_intensity: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    pub total_emotions: usize,
    pub total_journal_entries: usize,
    pub total_reflections: usize,
    pub days_active: usize,
    pub average_intensity: u8,
    pub current_streak: usize,
    pub longest_streak: usize,
    pub emotion_stats: Vec<EmotionStat>,
    pub insights: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Frequency {
    pub emotion: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryShare {
    pub category: MoodCategory,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyIntensity {
    pub date: NaiveDate,
    pub average_intensity: u8,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Charts {
    pub window: Window,
    pub entries: usize,
    pub frequencies: Vec<Frequency>,
    pub distribution: Vec<CategoryShare>,
    pub trend: Vec<DailyIntensity>,
}

#[allow(clippy::cast_precision_loss, clippy::cast_sign_loss)]
fn rounded_mean(total: u64, count: usize) -> u8 {
    if count == 0 {
        return 0;
    }
    (total as f64 / count as f64).round() as u8
}

fn local_day<Tz: TimeZone>(ts: DateTime<Utc>, tz: &Tz) -> NaiveDate {
    ts.with_timezone(tz).date_naive()
}

/// Per-emotion counts with rounded mean intensity, most frequent first.
#[must_use]
pub fn emotion_stats(emotions: &[Emotion]) -> Vec<EmotionStat> {
    let mut totals: HashMap<&str, (usize, u64)> = HashMap::new();
    for e in emotions {
        let entry = totals.entry(e.name.as_str()).or_default();
        entry.0 += 1;
        entry.1 += u64::from(e.intensity);
    }
    let mut stats: Vec<EmotionStat> = totals
        .into_iter()
        .map(|(name, (count, total))| EmotionStat {
            name: name.to_string(),
            count,
            average_intensity: rounded_mean(total, count),
        })
        .collect();
    stats.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
    stats
}

/// Distinct calendar days with any activity.
#[must_use]
pub fn active_days<Tz: TimeZone>(
    emotions: &[Emotion],
    journal: &[JournalEntry],
    reflections: &[Reflection],
    tz: &Tz,
) -> BTreeSet<NaiveDate> {
    emotions
        .iter()
        .map(|e| e.timestamp)
        .chain(journal.iter().map(|j| j.timestamp))
        .chain(reflections.iter().map(|r| r.timestamp))
        .map(|ts| local_day(ts, tz))
        .collect()
}

/// Consecutive active days ending today, or ending yesterday while today
/// has no activity yet.
#[must_use]
pub fn current_streak(days: &BTreeSet<NaiveDate>, today: NaiveDate) -> usize {
    let mut streak = 0;
    let mut day = match today.pred_opt() {
        Some(yesterday) if !days.contains(&today) => yesterday,
        _ => today,
    };
    while days.contains(&day) {
        streak += 1;
        let Some(prev) = day.pred_opt() else { break };
        day = prev;
    }
    streak
}

#[must_use]
pub fn longest_streak(days: &BTreeSet<NaiveDate>) -> usize {
    let mut longest = 0;
    let mut run = 0;
    let mut prev: Option<NaiveDate> = None;
    for &day in days {
        run = match prev {
            Some(p) if p.succ_opt() == Some(day) => run + 1,
            _ => 1,
        };
        longest = longest.max(run);
        prev = Some(day);
    }
    longest
}

fn insights(
    days_active: usize,
    journal_count: usize,
    reflection_count: usize,
    emotions: &[Emotion],
    average_intensity: u8,
    recent_emotions: &[&Emotion],
    recent_reflections: &[&Reflection],
) -> Vec<String> {
    let mut out = Vec::new();
    if days_active >= 7 {
        out.push("You've been consistently tracking your emotions - that's amazing self-awareness!");
    }
    if journal_count >= 5 {
        out.push("Your journaling practice is developing beautifully. Keep expressing yourself!");
    }
    if reflection_count >= 3 {
        out.push("Your daily reflection practice is building emotional intelligence!");
    }
    if !emotions.is_empty() && average_intensity <= 5 {
        out.push("Your emotional intensity has been relatively balanced recently.");
    }
    if !recent_emotions.is_empty() {
        let positive = recent_emotions
            .iter()
            .filter(|e| POSITIVE.contains(&e.name.as_str()))
            .count();
        if positive * 2 > recent_emotions.len() {
            out.push("You've been experiencing more positive emotions lately - wonderful!");
        }
    }
    if recent_reflections.len() >= 3 {
        let total: u64 = recent_reflections.iter().map(|r| u64::from(r.mood)).sum();
        if total >= 7 * recent_reflections.len() as u64 {
            out.push("Your recent reflection moods show you're doing well overall!");
        }
    }
    if out.is_empty() {
        out.push("Every emotion you track is a step toward greater self-understanding.");
    }
    out.into_iter().map(str::to_string).collect()
}

/// Everything the progress view shows. Calendar days are evaluated in the
/// time zone of `now`.
#[must_use]
pub fn overview<Tz: TimeZone>(
    emotions: &[Emotion],
    journal: &[JournalEntry],
    reflections: &[Reflection],
    now: &DateTime<Tz>,
) -> Overview {
    let tz = now.timezone();
    let now_utc = now.with_timezone(&Utc);
    let week_ago = now_utc - Duration::days(7);

    let days = active_days(emotions, journal, reflections, &tz);
    let total_intensity: u64 = emotions.iter().map(|e| u64::from(e.intensity)).sum();
    let average_intensity = rounded_mean(total_intensity, emotions.len());

    let recent_emotions: Vec<&Emotion> =
        emotions.iter().filter(|e| e.timestamp >= week_ago).collect();
    let recent_reflections: Vec<&Reflection> = reflections
        .iter()
        .filter(|r| r.timestamp >= week_ago)
        .collect();

    Overview {
        total_emotions: emotions.len(),
        total_journal_entries: journal.len(),
        total_reflections: reflections.len(),
        days_active: days.len(),
        average_intensity,
        current_streak: current_streak(&days, now.date_naive()),
        longest_streak: longest_streak(&days),
        emotion_stats: emotion_stats(emotions),
        insights: insights(
            days.len(),
            journal.len(),
            reflections.len(),
            emotions,
            average_intensity,
            &recent_emotions,
            &recent_reflections,
        ),
    }
}

/// Chart data over the progress logs that fall inside `window`.
#[must_use]
pub fn charts<Tz: TimeZone>(logs: &[ProgressLog], window: Window, now: &DateTime<Tz>) -> Charts {
    let tz = now.timezone();
    let cutoff = now.with_timezone(&Utc) - Duration::days(window.days());
    let recent: Vec<&ProgressLog> = logs.iter().filter(|l| l.timestamp >= cutoff).collect();

    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut categories: BTreeMap<MoodCategory, usize> = BTreeMap::new();
    let mut daily: BTreeMap<NaiveDate, (usize, u64)> = BTreeMap::new();
    for log in &recent {
        *counts.entry(log.emotion.as_str()).or_default() += 1;
        *categories.entry(MoodCategory::of(&log.emotion)).or_default() += 1;
        let day = daily.entry(local_day(log.timestamp, &tz)).or_default();
        day.0 += 1;
        day.1 += u64::from(log.intensity);
    }

    let mut frequencies: Vec<Frequency> = counts
        .into_iter()
        .map(|(emotion, count)| Frequency {
            emotion: emotion.to_string(),
            count,
        })
        .collect();
    frequencies.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.emotion.cmp(&b.emotion)));
    frequencies.truncate(TOP_FREQUENCIES);

    let trend: Vec<DailyIntensity> = daily
        .into_iter()
        .map(|(date, (count, total))| DailyIntensity {
            date,
            average_intensity: rounded_mean(total, count),
            count,
        })
        .collect();
    let skip = trend.len().saturating_sub(TREND_DAYS);

    Charts {
        window,
        entries: recent.len(),
        frequencies,
        distribution: categories
            .into_iter()
            .map(|(category, count)| CategoryShare { category, count })
            .collect(),
        trend: trend.into_iter().skip(skip).collect(),
    }
}
