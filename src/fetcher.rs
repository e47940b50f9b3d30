use std::sync::Arc;

use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use tokio::sync::Semaphore;

use crate::domain::{FetchedFile, Song};
use crate::error::BotError;
use crate::spotdl::SpotdlTool;

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Downloads `song` into `workdir` and reports the produced file.
    async fn fetch(&self, song: &Song, workdir: &Utf8Path) -> Result<FetchedFile, BotError>;
}

#[derive(Clone)]
pub struct SpotdlFetcher {
    tool: SpotdlTool,
}

impl SpotdlFetcher {
    pub fn new(tool: SpotdlTool) -> Self {
        Self { tool }
    }
}

#[async_trait]
impl Fetcher for SpotdlFetcher {
    async fn fetch(&self, song: &Song, workdir: &Utf8Path) -> Result<FetchedFile, BotError> {
        tokio::fs::create_dir_all(workdir.as_std_path())
            .await
            .map_err(|err| BotError::Filesystem(err.to_string()))?;
        let extra = vec![
            "--output".to_string(),
            workdir.as_str().to_string(),
            "--format".to_string(),
            "mp3".to_string(),
        ];
        self.tool
            .run(
                "download",
                &song.url,
                &extra,
                Some(workdir.as_std_path()),
                BotError::FetchFailed,
            )
            .await?;

        let path = find_audio(workdir, "mp3").ok_or_else(|| {
            BotError::FetchFailed(format!("spotdl produced no mp3 for {}", song.url))
        })?;
        describe_file(path)
    }
}

/// Caps the number of fetches in flight across all requests. Callers await
/// a permit instead of spawning a thread per download.
pub struct BoundedFetcher<F: Fetcher> {
    inner: F,
    permits: Arc<Semaphore>,
}

impl<F: Fetcher> BoundedFetcher<F> {
    pub fn new(inner: F, workers: usize) -> Self {
        Self {
            inner,
            permits: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    pub fn inner(&self) -> &F {
        &self.inner
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

#[async_trait]
impl<F: Fetcher> Fetcher for BoundedFetcher<F> {
    async fn fetch(&self, song: &Song, workdir: &Utf8Path) -> Result<FetchedFile, BotError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|err| BotError::FetchFailed(err.to_string()))?;
        self.inner.fetch(song, workdir).await
    }
}

pub fn describe_file(path: Utf8PathBuf) -> Result<FetchedFile, BotError> {
    let size_bytes = std::fs::metadata(path.as_std_path())
        .map_err(|err| BotError::Filesystem(format!("stat {path}: {err}")))?
        .len();
    Ok(FetchedFile { path, size_bytes })
}

/// Largest file with extension `ext` anywhere under `root`. spotdl may nest
/// output under artist or album folders.
fn find_audio(root: &Utf8Path, ext: &str) -> Option<Utf8PathBuf> {
    let mut best: Option<(u64, Utf8PathBuf)> = None;
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let Ok(entries) = dir.read_dir_utf8() else {
            continue;
        };
        for entry in entries.flatten() {
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            let path = entry.path();
            if meta.is_dir() {
                pending.push(path.to_path_buf());
                continue;
            }
            let matches = path
                .extension()
                .is_some_and(|found| found.eq_ignore_ascii_case(ext));
            if matches && best.as_ref().is_none_or(|(size, _)| meta.len() > *size) {
                best = Some((meta.len(), path.to_path_buf()));
            }
        }
    }
    best.map(|(_, path)| path)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn finds_nested_mp3() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let nested = root.join("Artist");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("cover.jpg"), b"img").unwrap();
        fs::write(nested.join("Song.MP3"), b"abc").unwrap();

        let found = find_audio(&root, "mp3").unwrap();
        assert!(found.ends_with("Artist/Song.MP3"));
        let fetched = describe_file(found).unwrap();
        assert_eq!(fetched.size_bytes, 3);
    }

    #[test]
    fn prefers_the_largest_match() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        fs::write(root.join("preview.mp3"), b"ab").unwrap();
        fs::write(root.join("full.mp3"), b"abcdef").unwrap();

        assert_eq!(find_audio(&root, "mp3").unwrap(), root.join("full.mp3"));
        assert!(find_audio(&root, "flac").is_none());
    }
}
