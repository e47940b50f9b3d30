use std::fmt;
use std::str::FromStr;

use camino::Utf8PathBuf;
use serde::Serialize;

use crate::error::BotError;

/// Chat the request came from. Kept independent of the chat library so the
/// pipeline can be driven by any outbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ChatRef(pub i64);

impl fmt::Display for ChatRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Song {
    pub title: String,
    pub artist: String,
    pub duration_seconds: u32,
    pub url: String,
    pub album: Option<String>,
}

impl Song {
    pub fn display_name(&self) -> String {
        if self.artist.is_empty() {
            self.title.clone()
        } else {
            format!("{} - {}", self.title, self.artist)
        }
    }

    pub fn tags(&self) -> AudioTags {
        AudioTags {
            title: self.title.clone(),
            performer: self.artist.clone(),
            duration_seconds: self.duration_seconds,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioTags {
    pub title: String,
    pub performer: String,
    pub duration_seconds: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedFile {
    pub path: Utf8PathBuf,
    pub size_bytes: u64,
}

/// Persisted weekly counter, stored on disk as `week,count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotaRecord {
    pub week: u32,
    pub count: u32,
}

impl QuotaRecord {
    pub fn fresh(week: u32) -> Self {
        Self { week, count: 0 }
    }
}

impl fmt::Display for QuotaRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.week, self.count)
    }
}

impl FromStr for QuotaRecord {
    type Err = BotError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let malformed = || BotError::QuotaStore(format!("malformed quota record: {value:?}"));
        let (week, count) = value.trim().split_once(',').ok_or_else(malformed)?;
        let week: u32 = week.trim().parse().map_err(|_| malformed())?;
        let count: u32 = count.trim().parse().map_err(|_| malformed())?;
        if !(1..=53).contains(&week) {
            return Err(malformed());
        }
        Ok(Self { week, count })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ItemOutcome {
    Delivered,
    SkippedQuota,
    SkippedTooLarge { size_bytes: u64 },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemReport {
    pub title: String,
    pub outcome: ItemOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub items: Vec<ItemReport>,
}

impl DeliveryReport {
    pub fn push(&mut self, song: &Song, outcome: ItemOutcome) {
        self.items.push(ItemReport {
            title: song.title.clone(),
            outcome,
        });
    }

    pub fn attempted(&self) -> usize {
        self.items.len()
    }

    pub fn delivered(&self) -> usize {
        self.items
            .iter()
            .filter(|item| item.outcome == ItemOutcome::Delivered)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_quota_record() {
        let record: QuotaRecord = "42,17\n".parse().unwrap();
        assert_eq!(record, QuotaRecord { week: 42, count: 17 });
        assert_eq!(record.to_string(), "42,17");
    }

    #[test]
    fn parse_quota_record_rejects_garbage() {
        assert_matches!("".parse::<QuotaRecord>(), Err(BotError::QuotaStore(_)));
        assert_matches!("12".parse::<QuotaRecord>(), Err(BotError::QuotaStore(_)));
        assert_matches!("0,3".parse::<QuotaRecord>(), Err(BotError::QuotaStore(_)));
        assert_matches!("7,-1".parse::<QuotaRecord>(), Err(BotError::QuotaStore(_)));
    }
}
