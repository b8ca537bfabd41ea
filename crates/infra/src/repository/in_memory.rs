use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::sync::RwLock;

use orderflow_core::OrderId;
use orderflow_orders::{OrderStatus, StatusUpdate, StatusUpdateRecord};

use super::r#trait::{OrderStatusRepository, RepositoryError};

type Key = (OrderId, u64);

/// In-memory status history.
///
/// Intended for tests/dev. The `BTreeMap` keeps rows ordered by `(order_id, version)`,
/// so an order's history is a contiguous, already-sorted range.
#[derive(Debug, Default)]
pub struct InMemoryOrderStatusRepository {
    rows: RwLock<BTreeMap<Key, StatusUpdateRecord>>,
}

impl InMemoryOrderStatusRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn order_range(order_id: OrderId) -> RangeInclusive<Key> {
        (order_id, 0)..=(order_id, u64::MAX)
    }

    fn poisoned() -> RepositoryError {
        RepositoryError::StorageUnavailable("lock poisoned".to_string())
    }

    fn overwrite_locked(
        rows: &mut BTreeMap<Key, StatusUpdateRecord>,
        order_id: OrderId,
        new_status: OrderStatus,
        version: u64,
    ) -> Result<u64, RepositoryError> {
        let keys: Vec<Key> = rows
            .range(Self::order_range(order_id))
            .map(|(k, _)| *k)
            .collect();

        match keys.as_slice() {
            [] => Ok(0),
            [key] => {
                // Re-key: the version is part of the primary key.
                let Some(mut record) = rows.remove(key) else {
                    return Ok(0);
                };
                record.new_status = new_status;
                record.version = version;
                rows.insert(record.key(), record);
                Ok(1)
            }
            _ => Err(RepositoryError::DuplicateVersion { order_id, version }),
        }
    }
}

impl OrderStatusRepository for InMemoryOrderStatusRepository {
    fn ensure_schema(&self) -> Result<(), RepositoryError> {
        Ok(())
    }

    fn add_order_status_update(&self, update: &StatusUpdate) -> Result<(), RepositoryError> {
        let mut rows = self.rows.write().map_err(|_| Self::poisoned())?;

        let key = (update.order_id, update.version);
        if rows.contains_key(&key) {
            return Err(RepositoryError::DuplicateVersion {
                order_id: update.order_id,
                version: update.version,
            });
        }

        rows.insert(key, StatusUpdateRecord::from(update));
        Ok(())
    }

    fn update_status(
        &self,
        order_id: OrderId,
        new_status: OrderStatus,
        version: u64,
    ) -> Result<u64, RepositoryError> {
        let mut rows = self.rows.write().map_err(|_| Self::poisoned())?;
        Self::overwrite_locked(&mut rows, order_id, new_status, version)
    }

    fn overwrite_or_insert(&self, update: &StatusUpdate) -> Result<u64, RepositoryError> {
        let mut rows = self.rows.write().map_err(|_| Self::poisoned())?;

        let overwritten =
            Self::overwrite_locked(&mut rows, update.order_id, update.new_status, update.version)?;
        if overwritten == 0 {
            rows.insert((update.order_id, update.version), StatusUpdateRecord::from(update));
        }
        Ok(overwritten)
    }

    fn get_order_status_updates(
        &self,
        order_id: OrderId,
    ) -> Result<Vec<StatusUpdateRecord>, RepositoryError> {
        let rows = self.rows.read().map_err(|_| Self::poisoned())?;
        Ok(rows
            .range(Self::order_range(order_id))
            .map(|(_, r)| r.clone())
            .collect())
    }

    fn revert_to_version(
        &self,
        order_id: OrderId,
        target_version: u64,
    ) -> Result<u64, RepositoryError> {
        let Some(first_removed) = target_version.checked_add(1) else {
            return Ok(0);
        };

        let mut rows = self.rows.write().map_err(|_| Self::poisoned())?;
        let doomed: Vec<Key> = rows
            .range((order_id, first_removed)..=(order_id, u64::MAX))
            .map(|(k, _)| *k)
            .collect();

        for key in &doomed {
            rows.remove(key);
        }

        Ok(doomed.len() as u64)
    }

    fn latest_version(&self, order_id: OrderId) -> Result<Option<u64>, RepositoryError> {
        let rows = self.rows.read().map_err(|_| Self::poisoned())?;
        Ok(rows
            .range(Self::order_range(order_id))
            .next_back()
            .map(|((_, v), _)| *v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::contract;

    #[test]
    fn satisfies_repository_contract() {
        contract::run_all(&InMemoryOrderStatusRepository::new());
    }

    #[test]
    fn versions_at_the_top_of_the_range_are_accepted() {
        let repo = InMemoryOrderStatusRepository::new();
        let order_id = OrderId::new();
        repo.add_order_status_update(&StatusUpdate {
            order_id,
            old_status: OrderStatus::Pending,
            new_status: OrderStatus::Processed,
            version: u64::MAX,
        })
        .unwrap();

        assert_eq!(repo.revert_to_version(order_id, u64::MAX).unwrap(), 0);
        assert_eq!(repo.latest_version(order_id).unwrap(), Some(u64::MAX));
    }

    #[test]
    fn concurrent_first_transitions_leave_a_single_row() {
        use std::sync::Barrier;

        for _ in 0..50 {
            let repo = InMemoryOrderStatusRepository::new();
            let order_id = OrderId::new();
            let barrier = Barrier::new(4);

            std::thread::scope(|scope| {
                for version in 1..=4u64 {
                    let (repo, barrier) = (&repo, &barrier);
                    scope.spawn(move || {
                        barrier.wait();
                        repo.overwrite_or_insert(&contract::update(
                            order_id,
                            OrderStatus::Pending,
                            OrderStatus::Processed,
                            version,
                        ))
                        .unwrap();
                    });
                }
            });

            assert_eq!(repo.get_order_status_updates(order_id).unwrap().len(), 1);
        }
    }
}
