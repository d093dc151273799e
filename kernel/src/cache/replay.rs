// Deterministic Replay
//
// Folds log entries into a cache store in log order. The stream consumer
// runs every batch through here, and the same fold rebuilds a projection
// from a full log.

use crate::event::CacheEvent;
use crate::log::{LogEntry, Position};

use super::store::{Applied, CacheStore};

/// Summary of one replayed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayOutcome {
    /// Position of the last entry seen, decodable or not.
    pub cursor: Option<Position>,
    pub applied: u64,
    pub skipped: u64,
    pub absent_deletes: u64,
}

/// Apply `entries` to `store` in order.
///
/// Undecodable entries are skipped but still advance the cursor, so one
/// malformed payload never blocks the entries behind it.
pub fn replay<'a, I>(store: &CacheStore, entries: I) -> ReplayOutcome
where
    I: IntoIterator<Item = &'a LogEntry>,
{
    let mut outcome = ReplayOutcome::default();

    for entry in entries {
        match CacheEvent::decode(&entry.payload) {
            Ok(event) => {
                let cat_id = event.cat_id();
                if store.apply(event) == Applied::Absent {
                    tracing::warn!(position = %entry.position, %cat_id, "delete for uncached cat");
                    outcome.absent_deletes += 1;
                }
                outcome.applied += 1;
            }
            Err(error) => {
                tracing::warn!(position = %entry.position, %error, "skipping undecodable event");
                outcome.skipped += 1;
            }
        }
        outcome.cursor = Some(entry.position);
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CatId, CatRecord};

    fn entry(seq: u64, payload: Vec<u8>) -> LogEntry {
        LogEntry {
            position: Position::new(0, seq),
            payload,
        }
    }

    fn create(seq: u64, record: &CatRecord) -> LogEntry {
        entry(seq, CacheEvent::Create(record.clone()).encode().unwrap())
    }

    fn delete(seq: u64, id: CatId) -> LogEntry {
        entry(seq, CacheEvent::Delete(id).encode().unwrap())
    }

    fn tom() -> CatRecord {
        CatRecord {
            id: CatId::new_v4(),
            name: "Tom".into(),
            age: 2,
            vaccinated: true,
        }
    }

    #[test]
    fn later_delete_wins_over_earlier_create() {
        let store = CacheStore::new();
        let tom = tom();

        let outcome = replay(&store, &[create(1, &tom), delete(2, tom.id)]);

        assert_eq!(store.get(&tom.id), None);
        assert_eq!(outcome.applied, 2);
        assert_eq!(outcome.cursor, Some(Position::new(0, 2)));
    }

    #[test]
    fn duplicate_create_is_idempotent() {
        let once = CacheStore::new();
        let twice = CacheStore::new();
        let tom = tom();

        replay(&once, &[create(1, &tom)]);
        replay(&twice, &[create(1, &tom), create(2, &tom)]);

        assert_eq!(once.snapshot(), twice.snapshot());
        assert_eq!(twice.len(), 1);
    }

    #[test]
    fn malformed_entry_does_not_block_neighbours() {
        let store = CacheStore::new();
        let before = tom();
        let after = CatRecord {
            id: CatId::new_v4(),
            name: "Felix".into(),
            ..tom()
        };

        let outcome = replay(
            &store,
            &[
                create(1, &before),
                entry(2, b"{not json".to_vec()),
                create(3, &after),
            ],
        );

        assert_eq!(store.get(&before.id), Some(before));
        assert_eq!(store.get(&after.id), Some(after));
        assert_eq!(outcome.skipped, 1);
        assert_eq!(outcome.applied, 2);
        assert_eq!(outcome.cursor, Some(Position::new(0, 3)));
    }

    #[test]
    fn trailing_malformed_entry_still_advances_cursor() {
        let store = CacheStore::new();
        let outcome = replay(&store, &[entry(7, Vec::new())]);

        assert_eq!(outcome.cursor, Some(Position::new(0, 7)));
        assert_eq!(outcome.skipped, 1);
        assert!(store.is_empty());
    }

    #[test]
    fn delete_of_uncached_cat_is_counted() {
        let store = CacheStore::new();
        let outcome = replay(&store, &[delete(1, CatId::new_v4())]);

        assert_eq!(outcome.absent_deletes, 1);
        assert_eq!(outcome.applied, 1);
    }

    #[test]
    fn replay_in_two_batches_matches_single_fold() {
        let tom = tom();
        let felix = CatRecord {
            id: CatId::new_v4(),
            name: "Felix".into(),
            ..tom.clone()
        };
        let log = vec![
            create(1, &tom),
            create(2, &felix),
            delete(3, tom.id),
            create(4, &CatRecord { age: 9, ..felix.clone() }),
        ];

        let whole = CacheStore::new();
        replay(&whole, &log);

        let split = CacheStore::new();
        replay(&split, &log[..2]);
        replay(&split, &log[2..]);

        assert_eq!(whole.snapshot(), split.snapshot());
        assert_eq!(split.get(&felix.id).unwrap().age, 9);
    }
}
