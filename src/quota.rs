use std::fs;
use std::io::Write;
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::Datelike;
use tempfile::Builder;

use crate::domain::QuotaRecord;
use crate::error::BotError;

pub const DEFAULT_QUOTA_CEILING: u32 = 500;

pub trait WeekClock: Send + Sync {
    /// ISO week number (1..=53) of "now".
    fn current_week(&self) -> u32;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemWeekClock;

impl WeekClock for SystemWeekClock {
    fn current_week(&self) -> u32 {
        chrono::Local::now().iso_week().week()
    }
}

pub trait QuotaStore: Send + Sync {
    /// Current record with the weekly rollover applied.
    fn current(&self) -> Result<QuotaRecord, BotError>;
    fn increase(&self, n: u32) -> Result<QuotaRecord, BotError>;
    fn ceiling(&self) -> u32;

    fn can_download_more(&self) -> Result<bool, BotError> {
        Ok(self.current()?.count < self.ceiling())
    }
}

/// Quota persisted as a single `week,count` text file.
///
/// Reads and writes go through one mutex, so concurrent requests inside
/// the process never lose an increment. Nothing protects the file from a
/// second process.
pub struct FileQuotaStore<C: WeekClock = SystemWeekClock> {
    path: Utf8PathBuf,
    ceiling: u32,
    clock: C,
    lock: Mutex<()>,
}

impl FileQuotaStore<SystemWeekClock> {
    pub fn new(path: Utf8PathBuf, ceiling: u32) -> Self {
        Self::with_clock(path, ceiling, SystemWeekClock)
    }
}

impl<C: WeekClock> FileQuotaStore<C> {
    pub fn with_clock(path: Utf8PathBuf, ceiling: u32, clock: C) -> Self {
        Self {
            path,
            ceiling,
            clock,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn read_rolled(&self) -> Result<QuotaRecord, BotError> {
        let week = self.clock.current_week();
        let stored = match fs::read_to_string(self.path.as_std_path()) {
            Ok(content) => Some(content.parse::<QuotaRecord>()?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
            Err(err) => {
                return Err(BotError::QuotaStore(format!(
                    "read {}: {err}",
                    self.path
                )));
            }
        };

        match stored {
            Some(record) if record.week == week => Ok(record),
            Some(record) => {
                tracing::info!(
                    stored_week = record.week,
                    week,
                    previous_count = record.count,
                    "new week, resetting download counter"
                );
                let fresh = QuotaRecord::fresh(week);
                self.write(&fresh)?;
                Ok(fresh)
            }
            None => {
                let fresh = QuotaRecord::fresh(week);
                self.write(&fresh)?;
                Ok(fresh)
            }
        }
    }

    fn write(&self, record: &QuotaRecord) -> Result<(), BotError> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_str().is_empty() => parent.to_path_buf(),
            _ => Utf8PathBuf::from("."),
        };
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| BotError::QuotaStore(err.to_string()))?;
        let mut temp = Builder::new()
            .prefix(".quota")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| BotError::QuotaStore(err.to_string()))?;
        temp.write_all(record.to_string().as_bytes())
            .map_err(|err| BotError::QuotaStore(err.to_string()))?;
        temp.persist(self.path.as_std_path())
            .map_err(|err| BotError::QuotaStore(err.to_string()))?;
        Ok(())
    }
}

impl<C: WeekClock> QuotaStore for FileQuotaStore<C> {
    fn current(&self) -> Result<QuotaRecord, BotError> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| BotError::QuotaStore("quota lock poisoned".to_string()))?;
        self.read_rolled()
    }

    fn increase(&self, n: u32) -> Result<QuotaRecord, BotError> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| BotError::QuotaStore("quota lock poisoned".to_string()))?;
        let mut record = self.read_rolled()?;
        record.count = record.count.saturating_add(n);
        self.write(&record)?;
        tracing::debug!(week = record.week, count = record.count, "download counter updated");
        Ok(record)
    }

    fn ceiling(&self) -> u32 {
        self.ceiling
    }
}
