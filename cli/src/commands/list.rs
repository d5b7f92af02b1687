use anyhow::Result;
use clap::ValueEnum;
use std::process;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use soulful_core::models::{Emotion, JournalEntry, Reflection};
use soulful_core::sync::SyncCoordinator;

use super::helpers::{local_time, scale_bar, truncate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum ListKind {
    Emotions,
    Journal,
    Reflections,
}

pub(crate) fn cmd_list(
    coordinator: &SyncCoordinator,
    kind: ListKind,
    limit: Option<usize>,
    json: bool,
) -> Result<()> {
    let limit = limit.unwrap_or(usize::MAX);
    let (count, rendered) = match kind {
        ListKind::Emotions => {
            let items: Vec<Emotion> = coordinator.recent_emotions(limit);
            let out = if json {
                serde_json::to_string_pretty(&items)?
            } else {
                emotion_table(&items)
            };
            (items.len(), out)
        }
        ListKind::Journal => {
            let items: Vec<JournalEntry> =
                coordinator.journal_entries().into_iter().take(limit).collect();
            let out = if json {
                serde_json::to_string_pretty(&items)?
            } else {
                journal_table(&items)
            };
            (items.len(), out)
        }
        ListKind::Reflections => {
            let items: Vec<Reflection> =
                coordinator.reflections().into_iter().take(limit).collect();
            let out = if json {
                serde_json::to_string_pretty(&items)?
            } else {
                reflection_table(&items)
            };
            (items.len(), out)
        }
    };

    if count == 0 && !json {
        eprintln!("Nothing recorded yet");
        process::exit(2);
    }
    println!("{rendered}");
    Ok(())
}

pub(crate) fn emotion_table(emotions: &[Emotion]) -> String {
    #[derive(Tabled)]
    struct EmotionRow {
        #[tabled(rename = "When")]
        when: String,
        #[tabled(rename = "Emotion")]
        name: String,
        #[tabled(rename = "Intensity")]
        bar: String,
        #[tabled(rename = "/10")]
        intensity: u8,
    }

    let rows: Vec<EmotionRow> = emotions
        .iter()
        .map(|e| EmotionRow {
            when: local_time(e.timestamp),
            name: e.name.clone(),
            bar: scale_bar(e.intensity),
            intensity: e.intensity,
        })
        .collect();

    Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(3..4)).with(Alignment::right()))
        .to_string()
}

pub(crate) fn journal_table(entries: &[JournalEntry]) -> String {
    #[derive(Tabled)]
    struct JournalRow {
        #[tabled(rename = "When")]
        when: String,
        #[tabled(rename = "Feeling")]
        feeling: String,
        #[tabled(rename = "Entry")]
        content: String,
    }

    let rows: Vec<JournalRow> = entries
        .iter()
        .map(|j| JournalRow {
            when: local_time(j.timestamp),
            feeling: format!("{} {}/10", j.emotion.name, j.emotion.intensity),
            content: truncate(&j.content, 50),
        })
        .collect();

    Table::new(&rows).with(Style::rounded()).to_string()
}

pub(crate) fn reflection_table(reflections: &[Reflection]) -> String {
    #[derive(Tabled)]
    struct ReflectionRow {
        #[tabled(rename = "Date")]
        date: String,
        #[tabled(rename = "Mood")]
        mood: u8,
        #[tabled(rename = "Grateful for")]
        gratitude: String,
        #[tabled(rename = "Challenge")]
        challenge: String,
        #[tabled(rename = "Growth")]
        growth: String,
        #[tabled(rename = "Tomorrow")]
        tomorrow: String,
    }

    let rows: Vec<ReflectionRow> = reflections
        .iter()
        .map(|r| ReflectionRow {
            date: r.date.clone(),
            mood: r.mood,
            gratitude: truncate(&r.gratitude, 24),
            challenge: truncate(&r.challenge, 24),
            growth: truncate(&r.growth, 24),
            tomorrow: truncate(&r.tomorrow, 24),
        })
        .collect();

    Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(1..2)).with(Alignment::right()))
        .to_string()
}
