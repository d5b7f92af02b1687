use anyhow::{Result, bail};
use chrono::NaiveDate;
use std::process;

use soulful_core::models::{Emotion, JournalEntry, Reflection, ReflectionPrompts};
use soulful_core::sync::SyncCoordinator;

use super::helpers::{json_error, parse_date, scale_bar, truncate};

pub(crate) const DEFAULT_INTENSITY: i64 = 5;

pub(crate) fn cmd_feel(
    coordinator: &SyncCoordinator,
    emotion: &str,
    intensity: i64,
    json: bool,
) -> Result<()> {
    let emotion = Emotion::new(emotion, intensity)?;
    coordinator.save_emotion(emotion.clone())?;

    if json {
        println!("{}", serde_json::to_string_pretty(&emotion)?);
    } else {
        println!(
            "Feeling {} {} {}/10",
            emotion.name,
            scale_bar(emotion.intensity),
            emotion.intensity
        );
    }
    Ok(())
}

/// The emotion a journal entry embeds: the one named, or the most recently
/// recorded one.
pub(crate) fn journal_emotion(
    coordinator: &SyncCoordinator,
    name: Option<&str>,
    intensity: Option<i64>,
) -> Result<Emotion> {
    match (name, coordinator.latest_emotion()) {
        (Some(name), _) => Emotion::new(name, intensity.unwrap_or(DEFAULT_INTENSITY)),
        (None, Some(latest)) => match intensity {
            Some(i) => Emotion::new(&latest.name, i),
            None => Ok(latest),
        },
        (None, None) => {
            bail!("No emotion selected yet. Pass --emotion or run `soulful feel` first")
        }
    }
}

pub(crate) fn cmd_journal(
    coordinator: &SyncCoordinator,
    text: &str,
    emotion: Option<&str>,
    intensity: Option<i64>,
    json: bool,
) -> Result<()> {
    let emotion = journal_emotion(coordinator, emotion, intensity)?;
    let entry = JournalEntry::new(text, &emotion)?;
    coordinator.save_journal_entry(entry.clone())?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entry)?);
    } else {
        println!(
            "Journal entry saved ({} {}/10): {}",
            entry.emotion.name,
            entry.emotion.intensity,
            truncate(&entry.content, 60)
        );
    }
    Ok(())
}

/// Save a reflection unless one already exists for `date`.
pub(crate) fn reflect(
    coordinator: &SyncCoordinator,
    date: NaiveDate,
    prompts: &ReflectionPrompts,
    mood: i64,
) -> Result<Option<Reflection>> {
    let key = date.format("%Y-%m-%d").to_string();
    if coordinator.reflection_for_date(&key).is_some() {
        return Ok(None);
    }
    let reflection = Reflection::new(date, prompts, mood)?;
    coordinator.save_reflection(reflection.clone())?;
    Ok(Some(reflection))
}

pub(crate) fn cmd_reflect(
    coordinator: &SyncCoordinator,
    date: Option<String>,
    prompts: &ReflectionPrompts,
    mood: i64,
    json: bool,
) -> Result<()> {
    let date = parse_date(date)?;
    let Some(reflection) = reflect(coordinator, date, prompts, mood)? else {
        let message = format!("You have already reflected on {}", date.format("%Y-%m-%d"));
        if json {
            println!("{}", json_error(&message));
        } else {
            eprintln!("{message}");
        }
        process::exit(2);
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&reflection)?);
    } else {
        println!(
            "Reflection saved for {} (mood {}/10)",
            reflection.date, reflection.mood
        );
    }
    Ok(())
}
