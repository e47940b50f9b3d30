use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use tunedrop::domain::QuotaRecord;
use tunedrop::error::BotError;
use tunedrop::quota::{FileQuotaStore, QuotaStore, WeekClock};

#[derive(Clone)]
struct ManualClock(Arc<AtomicU32>);

impl ManualClock {
    fn at(week: u32) -> Self {
        Self(Arc::new(AtomicU32::new(week)))
    }

    fn set(&self, week: u32) {
        self.0.store(week, Ordering::SeqCst);
    }
}

impl WeekClock for ManualClock {
    fn current_week(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }
}

fn store_in(
    temp: &tempfile::TempDir,
    ceiling: u32,
    week: u32,
) -> (FileQuotaStore<ManualClock>, ManualClock) {
    let path = Utf8PathBuf::from_path_buf(temp.path().join("counter.txt")).unwrap();
    let clock = ManualClock::at(week);
    (FileQuotaStore::with_clock(path, ceiling, clock.clone()), clock)
}

#[test]
fn record_is_created_lazily() {
    let temp = tempfile::tempdir().unwrap();
    let (store, _clock) = store_in(&temp, 500, 14);
    assert!(!store.path().as_std_path().exists());

    assert_eq!(store.current().unwrap(), QuotaRecord { week: 14, count: 0 });
    let content = std::fs::read_to_string(store.path().as_std_path()).unwrap();
    assert_eq!(content, "14,0");
}

#[test]
fn increase_accumulates_within_a_week() {
    let temp = tempfile::tempdir().unwrap();
    let (store, _clock) = store_in(&temp, 500, 20);

    store.increase(3).unwrap();
    let record = store.increase(4).unwrap();
    assert_eq!(record.count, 7);
    assert_eq!(store.current().unwrap().count, 7);
    let content = std::fs::read_to_string(store.path().as_std_path()).unwrap();
    assert_eq!(content, "20,7");
}

#[test]
fn crossing_a_week_resets_before_adding() {
    let temp = tempfile::tempdir().unwrap();
    let (store, clock) = store_in(&temp, 500, 20);

    store.increase(9).unwrap();
    clock.set(21);
    let record = store.increase(2).unwrap();
    assert_eq!(record, QuotaRecord { week: 21, count: 2 });
}

#[test]
fn rollover_reopens_an_exhausted_quota() {
    let temp = tempfile::tempdir().unwrap();
    let (store, clock) = store_in(&temp, 500, 52);

    store.increase(500).unwrap();
    assert!(!store.can_download_more().unwrap());

    clock.set(1);
    assert!(store.can_download_more().unwrap());
    assert_eq!(store.current().unwrap(), QuotaRecord { week: 1, count: 0 });
}

#[test]
fn below_ceiling_allows_one_more() {
    let temp = tempfile::tempdir().unwrap();
    let (store, _clock) = store_in(&temp, 500, 5);

    store.increase(499).unwrap();
    assert!(store.can_download_more().unwrap());
    store.increase(1).unwrap();
    assert!(!store.can_download_more().unwrap());
}

#[test]
fn existing_record_from_same_week_is_kept() {
    let temp = tempfile::tempdir().unwrap();
    std::fs::write(temp.path().join("counter.txt"), "33,120").unwrap();
    let (store, _clock) = store_in(&temp, 500, 33);

    assert_eq!(store.current().unwrap().count, 120);
}

#[test]
fn malformed_record_is_an_error() {
    let temp = tempfile::tempdir().unwrap();
    std::fs::write(temp.path().join("counter.txt"), "not a counter").unwrap();
    let (store, _clock) = store_in(&temp, 500, 33);

    assert_matches!(store.current(), Err(BotError::QuotaStore(_)));
    assert_matches!(store.increase(1), Err(BotError::QuotaStore(_)));
}

#[test]
fn concurrent_increments_are_not_lost() {
    let temp = tempfile::tempdir().unwrap();
    let (store, _clock) = store_in(&temp, 500, 8);
    let store = Arc::new(store);

    let handles = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for _ in 0..25 {
                    store.increase(1).unwrap();
                }
            })
        })
        .collect::<Vec<_>>();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(store.current().unwrap().count, 100);
}
