use anyhow::{Result, bail};
use chrono::{Duration, Local, Utc};
use serde::Serialize;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};
use tracing::warn;

use soulful_core::models::ProgressLog;
use soulful_core::progress::project_snapshot;
use soulful_core::stats::{Charts, Overview, Window, charts, overview};
use soulful_core::sync::SyncCoordinator;

use super::helpers::scale_bar;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum LogSource {
    Remote,
    Local,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ProgressReport {
    overview: Overview,
    charts: Charts,
    source: LogSource,
}

pub(crate) fn window_for(days: u32) -> Result<Window> {
    match days {
        7 => Ok(Window::Week),
        30 => Ok(Window::Month),
        _ => bail!("Invalid window '{days}'. Use --days 7 or --days 30"),
    }
}

/// Progress logs for the window: read from the remote while it is usable,
/// otherwise rebuilt from the local collections.
async fn window_logs(coordinator: &SyncCoordinator, window: Window) -> (Vec<ProgressLog>, LogSource) {
    let state = coordinator.state();
    if state.online && !state.remote_unavailable {
        let end = Utc::now();
        let start = end - Duration::days(window.days());
        match coordinator.progress().list_between(start, end).await {
            Ok(logs) => return (logs, LogSource::Remote),
            Err(e) => warn!(error = %e, "progress logs unavailable, using local records"),
        }
    }
    let snapshot = coordinator.snapshot();
    let logs = project_snapshot(
        coordinator.user_id(),
        &snapshot.emotions,
        &snapshot.journal_entries,
        &snapshot.reflections,
    );
    (logs, LogSource::Local)
}

pub(crate) async fn progress_report(
    coordinator: &SyncCoordinator,
    window: Window,
) -> ProgressReport {
    let now = Local::now();
    let snapshot = coordinator.snapshot();
    let (logs, source) = window_logs(coordinator, window).await;
    ProgressReport {
        overview: overview(
            &snapshot.emotions,
            &snapshot.journal_entries,
            &snapshot.reflections,
            &now,
        ),
        charts: charts(&logs, window, &now),
        source,
    }
}

pub(crate) async fn cmd_progress(coordinator: &SyncCoordinator, days: u32, json: bool) -> Result<()> {
    let window = window_for(days)?;
    let report = progress_report(coordinator, window).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let o = &report.overview;
    println!("=== Your journey ===\n");
    println!(
        "  {} emotions | {} journal entries | {} reflections",
        o.total_emotions, o.total_journal_entries, o.total_reflections
    );
    println!(
        "  Days active: {} | Current streak: {} | Longest streak: {}",
        o.days_active, o.current_streak, o.longest_streak
    );
    println!("  Average intensity: {}/10\n", o.average_intensity);

    if !o.emotion_stats.is_empty() {
        #[derive(Tabled)]
        struct StatRow {
            #[tabled(rename = "Emotion")]
            name: String,
            #[tabled(rename = "Times")]
            count: usize,
            #[tabled(rename = "Avg")]
            avg: u8,
            #[tabled(rename = "")]
            bar: String,
        }
        let rows: Vec<StatRow> = o
            .emotion_stats
            .iter()
            .map(|s| StatRow {
                name: s.name.clone(),
                count: s.count,
                avg: s.average_intensity,
                bar: scale_bar(s.average_intensity),
            })
            .collect();
        let table = Table::new(&rows)
            .with(Style::rounded())
            .with(Modify::new(Columns::new(1..3)).with(Alignment::right()))
            .to_string();
        println!("{table}\n");
    }

    let c = &report.charts;
    let label = match c.window {
        Window::Week => "last 7 days",
        Window::Month => "last 30 days",
    };
    let source = match report.source {
        LogSource::Remote => "",
        LogSource::Local => " (from this device)",
    };
    println!("=== {label}: {} entries{source} ===\n", c.entries);

    for f in &c.frequencies {
        println!("  {:<14} {}", f.emotion, "●".repeat(f.count));
    }
    if !c.distribution.is_empty() {
        let shares: Vec<String> = c
            .distribution
            .iter()
            .map(|s| format!("{:?} {}", s.category, s.count))
            .collect();
        println!("\n  Mood mix: {}", shares.join(" | "));
    }
    if !c.trend.is_empty() {
        println!();
        for day in &c.trend {
            println!(
                "  {} {} {}",
                day.date.format("%a %d %b"),
                scale_bar(day.average_intensity),
                day.average_intensity
            );
        }
    }

    println!("\n=== Insights ===\n");
    for insight in &o.insights {
        println!("  * {insight}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use soulful_core::connectivity::Connectivity;
    use soulful_core::db::Database;
    use soulful_core::models::Emotion;
    use soulful_core::remote::memory::MemoryRemote;
    use soulful_core::remote::{Gateway, UserScope};
    use std::sync::Arc;

    async fn coordinator(remote: &Arc<MemoryRemote>, online: bool) -> SyncCoordinator {
        let coordinator = SyncCoordinator::new(
            Database::open_in_memory().unwrap(),
            Gateway::new(remote.clone(), UserScope::Anonymous("user_1".to_string())),
            Connectivity::new(online),
        )
        .unwrap();
        coordinator.load_all().await;
        coordinator
    }

    #[test]
    fn test_window_for() {
        assert_eq!(window_for(7).unwrap(), Window::Week);
        assert_eq!(window_for(30).unwrap(), Window::Month);
        assert!(window_for(14).is_err());
    }

    #[tokio::test]
    async fn test_offline_report_uses_local_records() {
        let remote = Arc::new(MemoryRemote::new().unwrap());
        let coordinator = coordinator(&remote, false).await;
        coordinator
            .save_emotion(Emotion::new("Content", 6).unwrap())
            .unwrap();

        let report = progress_report(&coordinator, Window::Week).await;
        assert_eq!(report.source, LogSource::Local);
        assert_eq!(report.charts.entries, 1);
        assert_eq!(report.overview.total_emotions, 1);
        assert_eq!(remote.calls().list, 0);
    }

    #[tokio::test]
    async fn test_online_report_reads_progress_logs() {
        let remote = Arc::new(MemoryRemote::new().unwrap());
        let coordinator = coordinator(&remote, true).await;
        coordinator
            .save_emotion(Emotion::new("Joyful", 9).unwrap())
            .unwrap();
        coordinator.flush().await;

        let report = progress_report(&coordinator, Window::Week).await;
        assert_eq!(report.source, LogSource::Remote);
        assert_eq!(report.charts.entries, 1);
        assert_eq!(report.charts.frequencies[0].emotion, "Joyful");
        coordinator.shutdown().await;
    }
}
