pub(crate) mod helpers;
mod list;
mod progress;
mod record;
mod remote;
mod status;

use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use crate::config::{Config, RemoteSettings};
use crate::remote_http::HttpRemote;
use soulful_core::connectivity::Connectivity;
use soulful_core::db::Database;
use soulful_core::remote::{Gateway, UserScope};
use soulful_core::sync::SyncCoordinator;

pub(crate) use list::{ListKind, cmd_list, emotion_table, journal_table, reflection_table};
pub(crate) use progress::cmd_progress;
pub(crate) use record::{
    DEFAULT_INTENSITY, cmd_feel, cmd_journal, cmd_reflect, journal_emotion, reflect,
};
pub(crate) use remote::{
    cmd_login, cmd_logout, cmd_remote_clear, cmd_remote_set, cmd_remote_show, cmd_whoami,
};
pub(crate) use status::{cmd_status, render_status, status_view};

/// Build a coordinator over the local cache and the configured remote.
/// Without a configured remote, or with `--offline`, it starts offline.
pub(crate) fn connect(config: &Config, offline: bool) -> Result<SyncCoordinator> {
    let db = Database::open(&config.db_path)?;
    let settings = RemoteSettings::load(&db)?;
    let scope = UserScope::resolve(settings.user.as_deref(), &db)?;
    let online = !offline && settings.url.is_some();
    debug!(user = scope.user_id(), online, "connecting");

    let remote = Arc::new(HttpRemote::new(
        settings.url.as_deref(),
        settings.api_key.as_deref(),
    )?);
    SyncCoordinator::new(db, Gateway::new(remote, scope), Connectivity::new(online))
}
