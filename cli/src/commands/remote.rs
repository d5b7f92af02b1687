use anyhow::{Result, bail};
use serde::Serialize;

use soulful_core::db::Database;
use soulful_core::remote::UserScope;

use crate::config::{AUTH_USER_KEY, REMOTE_API_KEY_KEY, REMOTE_URL_KEY, RemoteSettings};

fn validate_url(url: &str) -> Result<String> {
    let url = url.trim().trim_end_matches('/');
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        bail!("Invalid remote URL '{url}'. Must start with http:// or https://");
    }
    Ok(url.to_string())
}

fn mask(key: &str) -> String {
    if key.chars().count() <= 8 {
        return "********".to_string();
    }
    let head: String = key.chars().take(4).collect();
    let tail: String = key.chars().skip(key.chars().count() - 4).collect();
    format!("{head}...{tail}")
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RemoteView {
    url: Option<String>,
    api_key: Option<String>,
}

impl RemoteView {
    fn from_settings(settings: &RemoteSettings) -> Self {
        Self {
            url: settings.url.clone(),
            api_key: settings.api_key.as_deref().map(mask),
        }
    }
}

pub(crate) fn cmd_remote_set(
    db: &Database,
    url: &str,
    api_key: Option<&str>,
    json: bool,
) -> Result<()> {
    let url = validate_url(url)?;
    db.set_setting(REMOTE_URL_KEY, &url)?;
    match api_key.map(str::trim).filter(|k| !k.is_empty()) {
        Some(key) => db.set_setting(REMOTE_API_KEY_KEY, key)?,
        None => {
            db.delete_setting(REMOTE_API_KEY_KEY)?;
        }
    }

    let settings = RemoteSettings::load(db)?;
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&RemoteView::from_settings(&settings))?
        );
    } else {
        println!("Cloud sync set to {url}");
    }
    Ok(())
}

pub(crate) fn cmd_remote_show(db: &Database, json: bool) -> Result<()> {
    let settings = RemoteSettings::load(db)?;
    let view = RemoteView::from_settings(&settings);
    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }
    match view.url {
        Some(ref url) => {
            println!("Remote:  {url}");
            println!(
                "API key: {}",
                view.api_key.as_deref().unwrap_or("(none)")
            );
        }
        None => println!("No cloud sync configured. Data stays on this device."),
    }
    Ok(())
}

pub(crate) fn cmd_remote_clear(db: &Database, json: bool) -> Result<()> {
    let cleared = db.delete_setting(REMOTE_URL_KEY)?;
    db.delete_setting(REMOTE_API_KEY_KEY)?;
    if json {
        println!("{}", serde_json::json!({ "cleared": cleared }));
    } else if cleared {
        println!("Cloud sync removed. Data stays on this device.");
    } else {
        println!("No cloud sync was configured");
    }
    Ok(())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IdentityView {
    user_id: String,
    authenticated: bool,
}

fn identity(db: &Database) -> Result<IdentityView> {
    let settings = RemoteSettings::load(db)?;
    let scope = UserScope::resolve(settings.user.as_deref(), db)?;
    Ok(IdentityView {
        authenticated: matches!(scope, UserScope::Authenticated(_)),
        user_id: scope.user_id().to_string(),
    })
}

pub(crate) fn cmd_login(db: &Database, user: &str, json: bool) -> Result<()> {
    let user = user.trim();
    if user.is_empty() {
        bail!("User id cannot be empty");
    }
    db.set_setting(AUTH_USER_KEY, user)?;
    let view = identity(db)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
    } else {
        println!("Signed in as {}", view.user_id);
    }
    Ok(())
}

pub(crate) fn cmd_logout(db: &Database, json: bool) -> Result<()> {
    db.delete_setting(AUTH_USER_KEY)?;
    let view = identity(db)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
    } else {
        println!("Signed out. Using anonymous id {}", view.user_id);
    }
    Ok(())
}

pub(crate) fn cmd_whoami(db: &Database, json: bool) -> Result<()> {
    let view = identity(db)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
    } else if view.authenticated {
        println!("{}", view.user_id);
    } else {
        println!("{} (anonymous)", view.user_id);
    }
    Ok(())
}
