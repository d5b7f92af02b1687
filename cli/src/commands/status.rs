use anyhow::Result;
use serde::Serialize;
use tabled::{Table, Tabled, settings::Style};

use soulful_core::sync::{Banner, Phase, SyncCoordinator, SyncState};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BannerView {
    kind: Banner,
    title: &'static str,
    message: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StatusView {
    user_id: String,
    phase: Phase,
    subscribed: bool,
    #[serde(flatten)]
    state: SyncState,
    banner: Option<BannerView>,
    emotions: usize,
    journal_entries: usize,
    reflections: usize,
}

pub(crate) fn status_view(coordinator: &SyncCoordinator) -> StatusView {
    let snapshot = coordinator.snapshot();
    StatusView {
        user_id: coordinator.user_id().to_string(),
        phase: snapshot.phase,
        subscribed: coordinator.is_subscribed(),
        state: snapshot.state,
        banner: snapshot.state.banner().map(|b| BannerView {
            kind: b,
            title: b.title(),
            message: b.message(),
        }),
        emotions: snapshot.emotions.len(),
        journal_entries: snapshot.journal_entries.len(),
        reflections: snapshot.reflections.len(),
    }
}

fn yes_no(flag: bool) -> String {
    if flag { "yes" } else { "no" }.to_string()
}

pub(crate) fn render_status(view: &StatusView) -> String {
    #[derive(Tabled)]
    struct Row {
        #[tabled(rename = "Sync")]
        key: &'static str,
        #[tabled(rename = "")]
        value: String,
    }

    let rows = vec![
        Row {
            key: "User",
            value: view.user_id.clone(),
        },
        Row {
            key: "Phase",
            value: view.phase.to_string(),
        },
        Row {
            key: "Online",
            value: yes_no(view.state.online),
        },
        Row {
            key: "Live updates",
            value: yes_no(view.subscribed),
        },
        Row {
            key: "Cloud unavailable",
            value: yes_no(view.state.remote_unavailable),
        },
        Row {
            key: "Index missing",
            value: yes_no(view.state.remote_index_error),
        },
        Row {
            key: "Emotions",
            value: view.emotions.to_string(),
        },
        Row {
            key: "Journal entries",
            value: view.journal_entries.to_string(),
        },
        Row {
            key: "Reflections",
            value: view.reflections.to_string(),
        },
    ];

    let mut out = Table::new(&rows).with(Style::rounded()).to_string();
    if let Some(ref banner) = view.banner {
        out.push_str(&format!("\n\n{}\n  {}", banner.title, banner.message));
    }
    out
}

pub(crate) fn cmd_status(coordinator: &SyncCoordinator, json: bool) -> Result<()> {
    let view = status_view(coordinator);
    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
    } else {
        println!("{}", render_status(&view));
    }
    Ok(())
}
