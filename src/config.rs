use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::error::BotError;
use crate::quota::DEFAULT_QUOTA_CEILING;

pub const TELEGRAM_TOKEN_VAR: &str = "TELEGRAM_BOT_TOKEN";
pub const SPOTIFY_CLIENT_ID_VAR: &str = "SPOTIFY_CLIENT_ID";
pub const SPOTIFY_CLIENT_SECRET_VAR: &str = "SPOTIFY_CLIENT_SECRET";

/// Telegram rejects bot uploads above 50 MiB.
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;
pub const DEFAULT_PACE_MS: u64 = 1000;
pub const DEFAULT_FETCH_WORKERS: usize = 2;

const DEFAULT_SETTINGS_FILE: &str = "tunedrop.json";

/// Optional, non-secret settings read from `tunedrop.json`.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub quota_ceiling: Option<u32>,
    #[serde(default)]
    pub max_upload_bytes: Option<u64>,
    #[serde(default)]
    pub pace_ms: Option<u64>,
    #[serde(default)]
    pub download_dir: Option<String>,
    #[serde(default)]
    pub counter_file: Option<String>,
    #[serde(default)]
    pub spotdl_bin: Option<String>,
    #[serde(default)]
    pub fetch_workers: Option<usize>,
}

#[derive(Clone)]
pub struct Credentials {
    pub telegram_token: String,
    pub spotify_client_id: String,
    pub spotify_client_secret: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("telegram_token", &"<redacted>")
            .field("spotify_client_id", &self.spotify_client_id)
            .field("spotify_client_secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub credentials: Credentials,
    pub quota_ceiling: u32,
    pub max_upload_bytes: u64,
    pub pace_interval: Duration,
    pub download_dir: Utf8PathBuf,
    pub counter_file: Utf8PathBuf,
    pub spotdl_bin: String,
    pub fetch_workers: usize,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads settings from `path` (or `tunedrop.json` when present) and
    /// credentials from the process environment.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, BotError> {
        let settings = Self::load_settings(path)?;
        Self::resolve_config(settings, |name| std::env::var(name).ok())
    }

    pub fn load_settings(path: Option<&str>) -> Result<Settings, BotError> {
        let settings_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_SETTINGS_FILE),
        };

        if path.is_none() && !settings_path.exists() {
            return Ok(Settings::default());
        }

        let content = fs::read_to_string(&settings_path)
            .map_err(|_| BotError::ConfigRead(settings_path.clone()))?;
        serde_json::from_str(&content).map_err(|err| BotError::ConfigParse(err.to_string()))
    }

    pub fn resolve_config<F>(settings: Settings, lookup: F) -> Result<ResolvedConfig, BotError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .ok_or_else(|| BotError::ConfigurationMissing(name.to_string()))
        };

        let credentials = Credentials {
            telegram_token: required(TELEGRAM_TOKEN_VAR)?,
            spotify_client_id: required(SPOTIFY_CLIENT_ID_VAR)?,
            spotify_client_secret: required(SPOTIFY_CLIENT_SECRET_VAR)?,
        };

        let quota_ceiling = settings.quota_ceiling.unwrap_or(DEFAULT_QUOTA_CEILING);
        if quota_ceiling == 0 {
            return Err(invalid("quota_ceiling", "must be greater than zero"));
        }
        let fetch_workers = settings.fetch_workers.unwrap_or(DEFAULT_FETCH_WORKERS);
        if fetch_workers == 0 {
            return Err(invalid("fetch_workers", "must be greater than zero"));
        }

        Ok(ResolvedConfig {
            credentials,
            quota_ceiling,
            max_upload_bytes: settings
                .max_upload_bytes
                .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
            pace_interval: Duration::from_millis(settings.pace_ms.unwrap_or(DEFAULT_PACE_MS)),
            download_dir: settings
                .download_dir
                .map(Utf8PathBuf::from)
                .unwrap_or_else(default_download_dir),
            counter_file: Utf8PathBuf::from(
                settings
                    .counter_file
                    .unwrap_or_else(|| "counter.txt".to_string()),
            ),
            spotdl_bin: settings.spotdl_bin.unwrap_or_else(|| "spotdl".to_string()),
            fetch_workers,
        })
    }
}

pub fn default_download_dir() -> Utf8PathBuf {
    BaseDirs::new()
        .and_then(|dirs| {
            Utf8PathBuf::from_path_buf(dirs.cache_dir().join("tunedrop").join("downloads")).ok()
        })
        .unwrap_or_else(|| Utf8PathBuf::from("downloads"))
}

fn invalid(name: &str, message: &str) -> BotError {
    BotError::InvalidSetting {
        name: name.to_string(),
        message: message.to_string(),
    }
}
