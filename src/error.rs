use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum BotError {
    #[error("missing required environment variable {0}")]
    #[diagnostic(help("set TELEGRAM_BOT_TOKEN, SPOTIFY_CLIENT_ID and SPOTIFY_CLIENT_SECRET"))]
    ConfigurationMissing(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid setting {name}: {message}")]
    InvalidSetting { name: String, message: String },

    #[error("nothing found for {0}")]
    ResolutionEmpty(String),

    #[error("resolve failed: {0}")]
    Resolve(String),

    #[error("fetch failed: {0}")]
    FetchFailed(String),

    #[error("payload of {size} bytes exceeds the {limit} byte upload limit")]
    OversizePayload { size: u64, limit: u64 },

    #[error("upload failed: {0}")]
    UploadFailed(String),

    #[error("weekly quota reached ({count}/{ceiling})")]
    QuotaExhausted { count: u32, ceiling: u32 },

    #[error("quota store error: {0}")]
    QuotaStore(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("bundle failed: {0}")]
    Bundle(String),

    #[error("link request failed: {0}")]
    LinkHttp(String),

    #[error("chat request failed: {0}")]
    Chat(String),
}
