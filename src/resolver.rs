use async_trait::async_trait;
use serde::Deserialize;

use crate::domain::Song;
use crate::error::BotError;
use crate::spotdl::SpotdlTool;

#[async_trait]
pub trait Resolver: Send + Sync {
    /// Songs for a link or a free-text query, in catalog order. An empty
    /// vector means nothing was found.
    async fn resolve(&self, query: &str) -> Result<Vec<Song>, BotError>;
}

/// One entry of a `.spotdl` save file.
#[derive(Debug, Deserialize)]
struct SavedSong {
    name: String,
    #[serde(default)]
    artist: Option<String>,
    #[serde(default)]
    artists: Vec<String>,
    #[serde(default)]
    album_name: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    url: Option<String>,
}

pub fn parse_saved_songs(content: &str) -> Result<Vec<Song>, BotError> {
    let saved: Vec<SavedSong> =
        serde_json::from_str(content).map_err(|err| BotError::Resolve(err.to_string()))?;
    Ok(saved
        .into_iter()
        .filter_map(|entry| {
            let url = entry.url.filter(|url| !url.trim().is_empty())?;
            let artist = entry
                .artist
                .filter(|artist| !artist.is_empty())
                .or_else(|| entry.artists.first().cloned())
                .unwrap_or_default();
            Some(Song {
                title: entry.name,
                artist,
                duration_seconds: entry
                    .duration
                    .filter(|value| value.is_finite() && *value > 0.0)
                    .map(|value| value.round() as u32)
                    .unwrap_or(0),
                url,
                album: entry.album_name,
            })
        })
        .collect())
}

/// Resolves queries with `spotdl save`, which writes the matched songs as JSON.
#[derive(Clone)]
pub struct SpotdlResolver {
    tool: SpotdlTool,
}

impl SpotdlResolver {
    pub fn new(tool: SpotdlTool) -> Self {
        Self { tool }
    }
}

#[async_trait]
impl Resolver for SpotdlResolver {
    async fn resolve(&self, query: &str) -> Result<Vec<Song>, BotError> {
        let temp_dir = tempfile::Builder::new()
            .prefix("tunedrop-resolve")
            .tempdir()
            .map_err(|err| BotError::Filesystem(err.to_string()))?;
        let save_file = temp_dir.path().join("query.spotdl");
        let extra = vec![
            "--save-file".to_string(),
            save_file.to_string_lossy().to_string(),
        ];

        let started = std::time::Instant::now();
        self.tool
            .run("save", query, &extra, Some(temp_dir.path()), BotError::Resolve)
            .await?;

        let content = match tokio::fs::read_to_string(&save_file).await {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(BotError::Filesystem(err.to_string())),
        };
        let songs = parse_saved_songs(&content)?;
        tracing::info!(
            query,
            songs = songs.len(),
            latency_ms = started.elapsed().as_millis() as u64,
            "resolved query"
        );
        Ok(songs)
    }
}
