use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::Serialize;

use soulful_core::models::MAX_SCALE;
use soulful_core::sync::{SyncState, WriteOutcome};

pub(crate) fn parse_date(date_str: Option<String>) -> Result<NaiveDate> {
    match date_str {
        None => Ok(Local::now().date_naive()),
        Some(s) => match s.as_str() {
            "today" => Ok(Local::now().date_naive()),
            "yesterday" => Ok(Local::now().date_naive() - chrono::Duration::days(1)),
            _ => NaiveDate::parse_from_str(&s, "%Y-%m-%d").with_context(|| {
                format!("Invalid date '{s}'. Use YYYY-MM-DD or today/yesterday")
            }),
        },
    }
}

pub(crate) fn json_error(message: &str) -> String {
    #[derive(Serialize)]
    struct CliError<'a> {
        error: &'a str,
    }
    serde_json::to_string(&CliError { error: message })
        .unwrap_or_else(|_| format!("{{\"error\":\"{message}\"}}"))
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let end = s.char_indices().nth(max.saturating_sub(3)).map_or(s.len(), |(i, _)| i);
        format!("{}...", &s[..end])
    }
}

/// `■■■■■■□□□□` for a 1-10 value.
pub(crate) fn scale_bar(value: u8) -> String {
    let filled = usize::from(value.min(MAX_SCALE));
    let empty = usize::from(MAX_SCALE) - filled;
    format!("{}{}", "■".repeat(filled), "□".repeat(empty))
}

pub(crate) fn local_time(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

pub(crate) fn print_banner(state: &SyncState) {
    if let Some(banner) = state.banner() {
        eprintln!("[{}] {}", banner.title(), banner.message());
    }
}

/// Tell the user about background writes that did not reach the remote.
/// Their data is already in the local cache either way.
pub(crate) fn report_writes(outcomes: &[WriteOutcome]) {
    for outcome in outcomes {
        match outcome {
            WriteOutcome::Persisted => {}
            WriteOutcome::ProgressFailed(e) => {
                eprintln!("Note: saved, but the progress log was not recorded ({e})");
            }
            WriteOutcome::Failed(e) => {
                eprintln!("Note: saved locally only; cloud save failed ({e})");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date_none() {
        let today = Local::now().date_naive();
        assert_eq!(parse_date(None).unwrap(), today);
    }

    #[test]
    fn test_parse_date_keywords() {
        let today = Local::now().date_naive();
        assert_eq!(parse_date(Some("today".to_string())).unwrap(), today);
        assert_eq!(
            parse_date(Some("yesterday".to_string())).unwrap(),
            today - chrono::Duration::days(1)
        );
    }

    #[test]
    fn test_parse_date_iso() {
        let date = parse_date(Some("2024-01-15".to_string())).unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
    }

    #[test]
    fn test_parse_date_invalid() {
        assert!(parse_date(Some("nope".to_string())).is_err());
    }

    #[test]
    fn test_truncate_utf8() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello world this is long", 10), "hello w...");
        assert_eq!(truncate("Crème fraîche", 10), "Crème f...");
        assert_eq!(truncate("hello", 2), "...");
        assert_eq!(truncate("hello", 0), "...");
    }

    #[test]
    fn test_scale_bar() {
        assert_eq!(scale_bar(3), "■■■□□□□□□□");
        assert_eq!(scale_bar(10), "■■■■■■■■■■");
        assert_eq!(scale_bar(12).chars().count(), 10);
    }

    #[test]
    fn test_json_error_escapes() {
        let out = json_error("bad \"quote\"");
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["error"], "bad \"quote\"");
    }
}
