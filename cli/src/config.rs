use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

use soulful_core::db::Database;

pub const REMOTE_URL_KEY: &str = "remote_url";
pub const REMOTE_API_KEY_KEY: &str = "remote_api_key";
pub const AUTH_USER_KEY: &str = "auth_user";

const URL_ENV: &str = "SOULFUL_REMOTE_URL";
const API_KEY_ENV: &str = "SOULFUL_API_KEY";

pub struct Config {
    pub db_path: PathBuf,
    pub store_path: PathBuf,
    pub data_dir: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        let proj_dirs =
            ProjectDirs::from("", "", "soulful").context("Could not determine home directory")?;
        Self::in_dir(proj_dirs.data_dir())
    }

    pub fn in_dir(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        Ok(Config {
            db_path: data_dir.join("soulful.db"),
            store_path: data_dir.join("documents.db"),
            data_dir: data_dir.to_path_buf(),
        })
    }

    /// Load the API key from disk, or generate a new one.
    ///
    /// Returns `(key, newly_created)` where `newly_created` is true when a
    /// fresh key was just generated (first run).
    pub fn load_or_create_api_key(&self) -> Result<(String, bool)> {
        use rand::Rng;
        use std::fmt::Write;

        let path = self.data_dir.join("api_key");

        if path.exists() {
            let key = std::fs::read_to_string(&path).context("Failed to read API key file")?;
            let key = key.trim().to_string();
            if !key.is_empty() {
                return Ok((key, false));
            }
        }

        let bytes: [u8; 32] = rand::rng().random();
        let key = bytes
            .iter()
            .fold(String::with_capacity(64), |mut acc: String, b| {
                let _ = write!(acc, "{b:02x}");
                acc
            });
        std::fs::write(&path, &key).context("Failed to write API key file")?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
                .context("Failed to set API key file permissions")?;
        }
        eprintln!("Generated new API key: {key}");
        eprintln!("Give it to clients with: soulful remote set <url> --api-key {key}");
        Ok((key, true))
    }
}

/// Where the hosted store lives and who we are to it. Stored as settings in
/// the local cache database; the environment overrides the URL and key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteSettings {
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub user: Option<String>,
}

impl RemoteSettings {
    pub fn load(db: &Database) -> Result<Self> {
        Self::resolve(
            db,
            std::env::var(URL_ENV).ok(),
            std::env::var(API_KEY_ENV).ok(),
        )
    }

    fn resolve(
        db: &Database,
        env_url: Option<String>,
        env_key: Option<String>,
    ) -> Result<Self> {
        let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        Ok(Self {
            url: non_empty(env_url).or(non_empty(db.get_setting(REMOTE_URL_KEY)?)),
            api_key: non_empty(env_key).or(non_empty(db.get_setting(REMOTE_API_KEY_KEY)?)),
            user: non_empty(db.get_setting(AUTH_USER_KEY)?),
        })
    }
}
