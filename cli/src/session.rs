use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::Local;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::oneshot;

use soulful_core::models::{Emotion, JournalEntry, ReflectionPrompts};
use soulful_core::sync::SyncCoordinator;

use crate::commands::helpers::{print_banner, report_writes};
use crate::commands::{
    DEFAULT_INTENSITY, ListKind, emotion_table, journal_emotion, journal_table, reflect,
    reflection_table, render_status, status_view,
};

const HELP: &str = "\
  feel <emotion> [intensity]   record how you feel (intensity 1-10)
  journal <text>               write about your latest emotion
  reflect <mood> <gratitude>   today's reflection
  list [emotions|journal|reflections]
  status                       sync state
  online | offline             simulate a network change
  help | quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SessionCommand {
    Feel { emotion: String, intensity: i64 },
    Journal(String),
    Reflect { mood: i64, gratitude: String },
    List(ListKind),
    Status,
    Online,
    Offline,
    Help,
    Quit,
}

pub(crate) fn parse_line(line: &str) -> Result<Option<SessionCommand>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();

    let command = match word.to_lowercase().as_str() {
        "feel" => {
            let mut parts = rest.split_whitespace();
            let Some(emotion) = parts.next() else {
                bail!("Usage: feel <emotion> [intensity]");
            };
            let intensity = match parts.next() {
                Some(n) => n
                    .parse()
                    .with_context(|| format!("Invalid intensity '{n}'"))?,
                None => DEFAULT_INTENSITY,
            };
            SessionCommand::Feel {
                emotion: emotion.to_string(),
                intensity,
            }
        }
        "journal" => {
            if rest.is_empty() {
                bail!("Usage: journal <text>");
            }
            SessionCommand::Journal(rest.to_string())
        }
        "reflect" => {
            let Some((mood, gratitude)) = rest.split_once(char::is_whitespace) else {
                bail!("Usage: reflect <mood> <gratitude>");
            };
            SessionCommand::Reflect {
                mood: mood
                    .parse()
                    .with_context(|| format!("Invalid mood '{mood}'"))?,
                gratitude: gratitude.trim().to_string(),
            }
        }
        "list" | "ls" => SessionCommand::List(match rest {
            "" | "emotions" => ListKind::Emotions,
            "journal" => ListKind::Journal,
            "reflections" => ListKind::Reflections,
            other => bail!("Unknown list '{other}'. Use emotions, journal or reflections"),
        }),
        "status" => SessionCommand::Status,
        "online" => SessionCommand::Online,
        "offline" => SessionCommand::Offline,
        "help" | "?" => SessionCommand::Help,
        "quit" | "exit" | "q" => SessionCommand::Quit,
        other => bail!("Unknown command '{other}'. Type 'help' for commands"),
    };
    Ok(Some(command))
}

fn execute(coordinator: &SyncCoordinator, command: SessionCommand) -> Result<()> {
    match command {
        SessionCommand::Feel { emotion, intensity } => {
            let emotion = Emotion::new(&emotion, intensity)?;
            println!("Feeling {} {}/10", emotion.name, emotion.intensity);
            coordinator.save_emotion(emotion)?;
        }
        SessionCommand::Journal(text) => {
            let emotion = journal_emotion(coordinator, None, None)?;
            coordinator.save_journal_entry(JournalEntry::new(&text, &emotion)?)?;
            println!("Journal entry saved");
        }
        SessionCommand::Reflect { mood, gratitude } => {
            let prompts = ReflectionPrompts {
                gratitude: Some(gratitude),
                ..Default::default()
            };
            match reflect(coordinator, Local::now().date_naive(), &prompts, mood)? {
                Some(r) => println!("Reflection saved for {}", r.date),
                None => println!("You have already reflected today"),
            }
        }
        SessionCommand::List(kind) => {
            let table = match kind {
                ListKind::Emotions => emotion_table(&coordinator.recent_emotions(10)),
                ListKind::Journal => journal_table(&coordinator.journal_entries()),
                ListKind::Reflections => reflection_table(&coordinator.reflections()),
            };
            println!("{table}");
        }
        SessionCommand::Status => println!("{}", render_status(&status_view(coordinator))),
        SessionCommand::Online => {
            if coordinator.connectivity().set_online(true) {
                println!("Back online, syncing");
            }
        }
        SessionCommand::Offline => {
            if coordinator.connectivity().set_online(false) {
                println!("Offline. Saves stay on this device");
            }
        }
        SessionCommand::Help => println!("{HELP}"),
        SessionCommand::Quit => {}
    }
    Ok(())
}

/// Interactive loop that keeps live subscriptions open and lets the user
/// toggle connectivity by hand.
pub(crate) async fn run_session(coordinator: SyncCoordinator) -> Result<()> {
    let coordinator = Arc::new(coordinator);
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let runner = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move {
            coordinator
                .run(async {
                    let _ = stop_rx.await;
                })
                .await;
        })
    };

    println!("soulful space. Type 'help' for commands.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print_banner(&coordinator.state());
        eprint!("soulful> ");
        std::io::stderr().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        match parse_line(&line) {
            Ok(None) => {}
            Ok(Some(SessionCommand::Quit)) => break,
            Ok(Some(command)) => {
                if let Err(e) = execute(&coordinator, command) {
                    eprintln!("Error: {e:#}");
                }
            }
            Err(e) => eprintln!("{e}"),
        }
    }

    let _ = stop_tx.send(());
    let _ = runner.await;
    report_writes(&coordinator.shutdown().await);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_feel() {
        assert_eq!(
            parse_line("feel sad 6").unwrap(),
            Some(SessionCommand::Feel {
                emotion: "sad".to_string(),
                intensity: 6
            })
        );
        assert_eq!(
            parse_line("  feel joyful ").unwrap(),
            Some(SessionCommand::Feel {
                emotion: "joyful".to_string(),
                intensity: DEFAULT_INTENSITY
            })
        );
        assert!(parse_line("feel").is_err());
        assert!(parse_line("feel sad lots").is_err());
    }

    #[test]
    fn test_parse_text_commands() {
        assert_eq!(
            parse_line("journal a long walk helped").unwrap(),
            Some(SessionCommand::Journal("a long walk helped".to_string()))
        );
        assert_eq!(
            parse_line("reflect 8 my sister called").unwrap(),
            Some(SessionCommand::Reflect {
                mood: 8,
                gratitude: "my sister called".to_string()
            })
        );
        assert!(parse_line("reflect 8").is_err());
        assert!(parse_line("journal").is_err());
    }

    #[test]
    fn test_parse_misc() {
        assert_eq!(parse_line("").unwrap(), None);
        assert_eq!(
            parse_line("list journal").unwrap(),
            Some(SessionCommand::List(ListKind::Journal))
        );
        assert_eq!(
            parse_line("ls").unwrap(),
            Some(SessionCommand::List(ListKind::Emotions))
        );
        assert_eq!(parse_line("OFFLINE").unwrap(), Some(SessionCommand::Offline));
        assert_eq!(parse_line("q").unwrap(), Some(SessionCommand::Quit));
        assert!(parse_line("dance").is_err());
    }
}
