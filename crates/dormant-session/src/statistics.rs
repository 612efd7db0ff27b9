//! Session factory statistics.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

macro_rules! counters {
    ($( $field:ident, $record:ident; )*) => {
        /// Counters shared by every session of a factory.
        #[derive(Debug, Default)]
        pub struct Statistics {
            $( $field: AtomicU64, )*
        }

        /// Point-in-time copy of [`Statistics`].
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
        pub struct StatisticsSnapshot {
            $( pub $field: u64, )*
        }

        impl Statistics {
            $(
                pub(crate) fn $record(&self) {
                    self.$field.fetch_add(1, Ordering::Relaxed);
                }

                pub fn $field(&self) -> u64 {
                    self.$field.load(Ordering::Relaxed)
                }
            )*

            pub fn snapshot(&self) -> StatisticsSnapshot {
                StatisticsSnapshot {
                    $( $field: self.$field.load(Ordering::Relaxed), )*
                }
            }

            pub fn clear(&self) {
                $( self.$field.store(0, Ordering::Relaxed); )*
            }
        }
    };
}

counters! {
    entity_inserts, entity_inserted;
    entity_updates, entity_updated;
    entity_deletes, entity_deleted;
    entity_loads, entity_loaded;
    collection_loads, collection_loaded;
    collection_recreates, collection_recreated;
    collection_updates, collection_updated;
    collection_removes, collection_removed;
    flushes, flushed;
    transactions, transaction_begun;
    successful_transactions, transaction_committed;
    optimistic_failures, optimistic_failure;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_and_clears() {
        let stats = Statistics::default();
        stats.entity_inserted();
        stats.entity_inserted();
        stats.flushed();
        assert_eq!(stats.entity_inserts(), 2);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.flushes, 1);
        assert_eq!(snapshot.entity_updates, 0);

        stats.clear();
        assert_eq!(stats.snapshot(), StatisticsSnapshot::default());
    }

    #[test]
    fn snapshot_serializes() {
        let stats = Statistics::default();
        stats.optimistic_failure();
        let json = serde_json::to_value(stats.snapshot()).unwrap();
        assert_eq!(json["optimistic_failures"], 1);
    }
}
