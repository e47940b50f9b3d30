use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::TempDir;

use crate::bundle::BundleWriter;
use crate::config::{DEFAULT_MAX_UPLOAD_BYTES, DEFAULT_PACE_MS, ResolvedConfig};
use crate::domain::{ChatRef, DeliveryReport, FetchedFile, ItemOutcome, Song};
use crate::error::BotError;
use crate::fetcher::Fetcher;
use crate::outbox::{NoticeRef, Outbox};
use crate::quota::QuotaStore;
use crate::resolver::Resolver;

#[derive(Debug, Clone)]
pub struct DeliveryOptions {
    pub max_upload_bytes: u64,
    /// Pause between two songs of one request.
    pub pace_interval: Duration,
    /// Parent of the per-item working directories.
    pub work_root: Utf8PathBuf,
}

impl DeliveryOptions {
    pub fn new(work_root: Utf8PathBuf) -> Self {
        Self {
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            pace_interval: Duration::from_millis(DEFAULT_PACE_MS),
            work_root,
        }
    }

    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self {
            max_upload_bytes: config.max_upload_bytes,
            pace_interval: config.pace_interval,
            work_root: config.download_dir.clone(),
        }
    }
}

/// Turns a link or query into delivered audio: quota gate, resolve, then
/// fetch, size guard, upload, cleanup and count each song in order.
pub struct Pipeline<Q: QuotaStore, R: Resolver, F: Fetcher> {
    quota: Q,
    resolver: R,
    fetcher: F,
    options: DeliveryOptions,
}

impl<Q: QuotaStore, R: Resolver, F: Fetcher> Pipeline<Q, R, F> {
    pub fn new(quota: Q, resolver: R, fetcher: F, options: DeliveryOptions) -> Self {
        Self {
            quota,
            resolver,
            fetcher,
            options,
        }
    }

    pub fn quota(&self) -> &Q {
        &self.quota
    }

    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub fn options(&self) -> &DeliveryOptions {
        &self.options
    }

    /// Link flow: every song behind a track, album or playlist link is sent
    /// as its own audio message, followed by a summary.
    pub async fn deliver_links(
        &self,
        chat: ChatRef,
        input: &str,
        outbox: &dyn Outbox,
    ) -> Result<DeliveryReport, BotError> {
        self.quota_gate(chat, outbox).await?;

        notify(outbox, chat, "Link detected, looking up its content...").await;
        let songs = self
            .resolve_or_notify(chat, input, outbox, "Nothing found for that link.")
            .await?;

        let total = songs.len();
        let noun = plural(total, "song", "songs (album/playlist)");
        notify(
            outbox,
            chat,
            &format!("Found {total} {noun}. They will be sent one by one, this may take a while..."),
        )
        .await;

        let mut report = DeliveryReport::default();
        for (index, song) in songs.iter().enumerate() {
            let room = self.has_room(0);
            if !matches!(room, Ok(true)) {
                let remaining = &songs[index..];
                let outcome = self.stop_outcome(chat, room, remaining.len());
                for skipped in remaining {
                    report.push(skipped, outcome.clone());
                }
                notify(outbox, chat, &self.stop_notice(&outcome, remaining.len())).await;
                break;
            }

            tracing::info!(%chat, position = index + 1, total, title = %song.title, "processing song");
            let outcome = self.deliver_one(chat, song, outbox).await;
            report.push(song, outcome);

            if index + 1 < total {
                tokio::time::sleep(self.options.pace_interval).await;
            }
        }

        notify(
            outbox,
            chat,
            &format!(
                "Done: {} attempted, {} delivered.",
                report.attempted(),
                report.delivered()
            ),
        )
        .await;
        Ok(report)
    }

    /// Search flow: only the best match is delivered.
    pub async fn deliver_search(
        &self,
        chat: ChatRef,
        query: &str,
        outbox: &dyn Outbox,
    ) -> Result<DeliveryReport, BotError> {
        self.quota_gate(chat, outbox).await?;

        notify(outbox, chat, &format!("Searching: {query}")).await;
        let songs = self
            .resolve_or_notify(chat, query, outbox, "No results for that search.")
            .await?;

        let mut report = DeliveryReport::default();
        if let Some(song) = songs.first() {
            let outcome = self.deliver_one(chat, song, outbox).await;
            report.push(song, outcome);
        }
        Ok(report)
    }

    /// Runs one song through fetch, size guard, upload and cleanup. Never
    /// fails: every problem ends in a terminal [`ItemOutcome`].
    pub async fn deliver_one(
        &self,
        chat: ChatRef,
        song: &Song,
        outbox: &dyn Outbox,
    ) -> ItemOutcome {
        let notice = notify(outbox, chat, &format!("Downloading: {}", song.display_name())).await;

        let (_workdir, fetched) = match self.fetch_into_workdir(song).await {
            Ok(result) => result,
            Err(err) => {
                tracing::error!(%chat, title = %song.title, error = %err, "fetch failed");
                update(outbox, chat, notice, &format!("Download failed: {}", song.title)).await;
                return ItemOutcome::Failed {
                    reason: err.to_string(),
                };
            }
        };

        if fetched.size_bytes > self.options.max_upload_bytes {
            let err = BotError::OversizePayload {
                size: fetched.size_bytes,
                limit: self.options.max_upload_bytes,
            };
            tracing::warn!(%chat, title = %song.title, error = %err, "refusing oversize file");
            remove_file(&fetched.path);
            update(
                outbox,
                chat,
                notice,
                &format!(
                    "File too large (>{}): {}",
                    format_limit(self.options.max_upload_bytes),
                    song.title
                ),
            )
            .await;
            return ItemOutcome::SkippedTooLarge {
                size_bytes: fetched.size_bytes,
            };
        }

        update(outbox, chat, notice, &format!("Uploading: {}", song.title)).await;
        let upload = outbox.send_audio(chat, &fetched.path, &song.tags()).await;
        remove_file(&fetched.path);

        if let Err(err) = upload {
            tracing::error!(%chat, title = %song.title, error = %err, "upload failed");
            update(
                outbox,
                chat,
                notice,
                &format!("Something went wrong while sending '{}'.", song.title),
            )
            .await;
            return ItemOutcome::Failed {
                reason: err.to_string(),
            };
        }

        if let Some(notice) = notice {
            if let Err(err) = outbox.delete_notice(chat, notice).await {
                tracing::debug!(%chat, error = %err, "could not delete progress notice");
            }
        }
        match self.quota.increase(1) {
            Ok(record) => {
                tracing::info!(%chat, title = %song.title, count = record.count, "song delivered")
            }
            Err(err) => {
                tracing::error!(%chat, title = %song.title, error = %err, "delivered but not counted")
            }
        }
        ItemOutcome::Delivered
    }

    /// Bundle flow: songs are fetched in order, packed into one zip archive
    /// and sent as a single document. They count against the quota only
    /// once the archive is delivered.
    pub async fn deliver_bundle(
        &self,
        chat: ChatRef,
        input: &str,
        outbox: &dyn Outbox,
    ) -> Result<DeliveryReport, BotError> {
        self.quota_gate(chat, outbox).await?;

        notify(outbox, chat, "Link detected, looking up its content...").await;
        let songs = self
            .resolve_or_notify(chat, input, outbox, "Nothing found for that link.")
            .await?;
        let total = songs.len();
        let progress = notify(
            outbox,
            chat,
            &format!("Found {total} {}. Building the archive...", plural(total, "song", "songs")),
        )
        .await;

        let (_bundle_dir, mut bundle) = match self.open_bundle() {
            Ok(opened) => opened,
            Err(err) => {
                tracing::error!(%chat, error = %err, "could not prepare archive");
                update(outbox, chat, progress, "Could not prepare the archive, try again later.")
                    .await;
                return Err(err);
            }
        };

        // None marks a song packed into the archive but not yet delivered.
        let mut outcomes: Vec<Option<ItemOutcome>> = Vec::with_capacity(total);
        for (index, song) in songs.iter().enumerate() {
            let remaining = total - index;
            let room = self.has_room(bundle.entries() as u32);
            if !matches!(room, Ok(true)) {
                let outcome = self.stop_outcome(chat, room, remaining);
                notify(outbox, chat, &self.stop_notice(&outcome, remaining)).await;
                outcomes.extend(std::iter::repeat_n(Some(outcome), remaining));
                break;
            }

            update(
                outbox,
                chat,
                progress,
                &format!("Downloading {}/{total}: {}", index + 1, song.display_name()),
            )
            .await;
            let (_workdir, fetched) = match self.fetch_into_workdir(song).await {
                Ok(result) => result,
                Err(err) => {
                    tracing::error!(%chat, title = %song.title, error = %err, "fetch failed");
                    outcomes.push(Some(ItemOutcome::Failed {
                        reason: err.to_string(),
                    }));
                    continue;
                }
            };

            let projected = bundle.payload_bytes() + fetched.size_bytes;
            if projected > self.options.max_upload_bytes {
                remove_file(&fetched.path);
                tracing::warn!(%chat, projected, skipped = remaining, "archive would exceed upload limit");
                let outcome = ItemOutcome::SkippedTooLarge {
                    size_bytes: projected,
                };
                notify(outbox, chat, &self.stop_notice(&outcome, remaining)).await;
                outcomes.extend(std::iter::repeat_n(Some(outcome), remaining));
                break;
            }

            let added = bundle.add(&fetched);
            remove_file(&fetched.path);
            outcomes.push(match added {
                Ok(()) => None,
                Err(err) => {
                    tracing::error!(%chat, title = %song.title, error = %err, "could not add song to archive");
                    Some(ItemOutcome::Failed {
                        reason: err.to_string(),
                    })
                }
            });
        }

        let bundled = bundle.entries();
        let packed = if bundled == 0 {
            update(outbox, chat, progress, "None of the songs could be downloaded.").await;
            ItemOutcome::Failed {
                reason: "archive is empty".to_string(),
            }
        } else {
            self.send_archive(chat, bundle, bundled as u32, outbox, progress)
                .await
        };

        let mut report = DeliveryReport::default();
        for (song, outcome) in songs.iter().zip(outcomes) {
            report.push(song, outcome.unwrap_or_else(|| packed.clone()));
        }
        notify(
            outbox,
            chat,
            &format!(
                "Done: {} attempted, {} delivered.",
                report.attempted(),
                report.delivered()
            ),
        )
        .await;
        Ok(report)
    }

    async fn send_archive(
        &self,
        chat: ChatRef,
        bundle: BundleWriter,
        bundled: u32,
        outbox: &dyn Outbox,
        progress: Option<NoticeRef>,
    ) -> ItemOutcome {
        let archive = match bundle.finish() {
            Ok(archive) => archive,
            Err(err) => {
                tracing::error!(%chat, error = %err, "could not finish archive");
                update(outbox, chat, progress, "Could not build the archive.").await;
                return ItemOutcome::Failed {
                    reason: err.to_string(),
                };
            }
        };

        if archive.size_bytes > self.options.max_upload_bytes {
            tracing::warn!(%chat, size = archive.size_bytes, "archive exceeds upload limit");
            remove_file(&archive.path);
            update(
                outbox,
                chat,
                progress,
                &format!(
                    "Archive too large (>{}), nothing was sent.",
                    format_limit(self.options.max_upload_bytes)
                ),
            )
            .await;
            return ItemOutcome::SkippedTooLarge {
                size_bytes: archive.size_bytes,
            };
        }

        update(outbox, chat, progress, "Uploading the archive...").await;
        let sent = outbox.send_document(chat, &archive.path).await;
        remove_file(&archive.path);
        match sent {
            Ok(()) => {
                if let Err(err) = self.quota.increase(bundled) {
                    tracing::error!(%chat, bundled, error = %err, "archive delivered but not counted");
                }
                ItemOutcome::Delivered
            }
            Err(err) => {
                tracing::error!(%chat, error = %err, "archive upload failed");
                update(outbox, chat, progress, "Something went wrong while sending the archive.")
                    .await;
                ItemOutcome::Failed {
                    reason: err.to_string(),
                }
            }
        }
    }

    /// Refuses the request with a notice when the weekly quota is used up
    /// or the counter cannot be read.
    pub async fn quota_gate(&self, chat: ChatRef, outbox: &dyn Outbox) -> Result<(), BotError> {
        let allowed = match self.quota.can_download_more() {
            Ok(allowed) => allowed,
            Err(err) => {
                tracing::error!(%chat, error = %err, "quota store unavailable");
                notify(outbox, chat, "The download counter is unavailable, try again later.")
                    .await;
                return Err(err);
            }
        };
        if allowed {
            return Ok(());
        }

        let ceiling = self.quota.ceiling();
        let count = self.quota.current().map(|record| record.count).unwrap_or(ceiling);
        tracing::info!(%chat, count, ceiling, "request rejected, weekly quota reached");
        notify(
            outbox,
            chat,
            &format!("Weekly limit of {ceiling} songs reached. Try again next week."),
        )
        .await;
        Err(BotError::QuotaExhausted { count, ceiling })
    }

    /// Whether one more song fits next to `pending` songs not counted yet.
    fn has_room(&self, pending: u32) -> Result<bool, BotError> {
        let record = self.quota.current()?;
        Ok(record.count.saturating_add(pending) < self.quota.ceiling())
    }

    /// Outcome for the songs left over when a batch stops at the quota check.
    fn stop_outcome(
        &self,
        chat: ChatRef,
        room: Result<bool, BotError>,
        remaining: usize,
    ) -> ItemOutcome {
        match room {
            Err(err) => {
                tracing::error!(%chat, skipped = remaining, error = %err, "quota store unavailable, stopping batch");
                ItemOutcome::Failed {
                    reason: err.to_string(),
                }
            }
            Ok(_) => {
                tracing::warn!(%chat, skipped = remaining, "weekly quota reached in the middle of a batch");
                ItemOutcome::SkippedQuota
            }
        }
    }

    fn stop_notice(&self, outcome: &ItemOutcome, remaining: usize) -> String {
        match outcome {
            ItemOutcome::SkippedQuota => format!(
                "Weekly limit of {} songs reached, {remaining} remaining song(s) skipped.",
                self.quota.ceiling()
            ),
            ItemOutcome::SkippedTooLarge { .. } => format!(
                "Archive size limit of {} reached, {remaining} remaining song(s) left out.",
                format_limit(self.options.max_upload_bytes)
            ),
            _ => format!(
                "The download counter is unavailable, {remaining} remaining song(s) skipped."
            ),
        }
    }

    async fn resolve_or_notify(
        &self,
        chat: ChatRef,
        input: &str,
        outbox: &dyn Outbox,
        not_found: &str,
    ) -> Result<Vec<Song>, BotError> {
        let songs = match self.resolver.resolve(input).await {
            Ok(songs) => songs,
            Err(err) => {
                tracing::error!(%chat, input, error = %err, "resolve failed");
                notify(outbox, chat, "Something went wrong while looking that up.").await;
                return Err(err);
            }
        };
        if songs.is_empty() {
            tracing::info!(%chat, input, "nothing found");
            notify(outbox, chat, not_found).await;
            return Err(BotError::ResolutionEmpty(input.to_string()));
        }
        Ok(songs)
    }

    /// The returned [`TempDir`] removes everything the fetch left behind
    /// when dropped.
    async fn fetch_into_workdir(&self, song: &Song) -> Result<(TempDir, FetchedFile), BotError> {
        let workdir = self.workdir("tunedrop-item")?;
        let path = utf8_dir(&workdir)?;
        let fetched = self.fetcher.fetch(song, &path).await?;
        Ok((workdir, fetched))
    }

    /// The returned [`TempDir`] holds the archive until the request is done.
    fn open_bundle(&self) -> Result<(TempDir, BundleWriter), BotError> {
        let dir = self.workdir("tunedrop-bundle")?;
        let bundle = BundleWriter::create(&utf8_dir(&dir)?.join("playlist.zip"))?;
        Ok((dir, bundle))
    }

    fn workdir(&self, prefix: &str) -> Result<TempDir, BotError> {
        std::fs::create_dir_all(self.options.work_root.as_std_path())
            .map_err(|err| BotError::Filesystem(err.to_string()))?;
        tempfile::Builder::new()
            .prefix(prefix)
            .tempdir_in(self.options.work_root.as_std_path())
            .map_err(|err| BotError::Filesystem(err.to_string()))
    }
}

fn plural<'a>(count: usize, one: &'a str, many: &'a str) -> &'a str {
    if count == 1 { one } else { many }
}

/// Upload limit as shown to users: whole megabytes when exact.
fn format_limit(bytes: u64) -> String {
    const MIB: u64 = 1024 * 1024;
    if bytes >= MIB && bytes % MIB == 0 {
        format!("{} MB", bytes / MIB)
    } else if bytes >= MIB {
        format!("{:.1} MB", bytes as f64 / MIB as f64)
    } else if bytes >= 1024 {
        format!("{} KB", bytes / 1024)
    } else {
        format!("{bytes} bytes")
    }
}

fn utf8_dir(dir: &TempDir) -> Result<Utf8PathBuf, BotError> {
    Utf8PathBuf::from_path_buf(dir.path().to_path_buf())
        .map_err(|_| BotError::Filesystem("non-utf8 working directory".to_string()))
}

fn remove_file(path: &Utf8Path) {
    if let Err(err) = std::fs::remove_file(path.as_std_path()) {
        if err.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path, error = %err, "could not remove local file");
        }
    }
}

async fn notify(outbox: &dyn Outbox, chat: ChatRef, text: &str) -> Option<NoticeRef> {
    match outbox.send_notice(chat, text).await {
        Ok(notice) => Some(notice),
        Err(err) => {
            tracing::warn!(%chat, error = %err, "could not send notice");
            None
        }
    }
}

/// Edits the progress notice in place, or sends a new one if there is none.
async fn update(outbox: &dyn Outbox, chat: ChatRef, notice: Option<NoticeRef>, text: &str) {
    let result = match notice {
        Some(notice) => outbox.edit_notice(chat, notice, text).await,
        None => outbox.send_notice(chat, text).await.map(|_| ()),
    };
    if let Err(err) = result {
        tracing::warn!(%chat, error = %err, "could not update notice");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_are_readable_at_any_size() {
        assert_eq!(format_limit(50 * 1024 * 1024), "50 MB");
        assert_eq!(format_limit(1024 * 1024 + 512 * 1024), "1.5 MB");
        assert_eq!(format_limit(4096), "4 KB");
        assert_eq!(format_limit(200), "200 bytes");
    }

    #[test]
    fn singular_song_count() {
        assert_eq!(plural(1, "song", "songs"), "song");
        assert_eq!(plural(3, "song", "songs"), "songs");
    }
}
