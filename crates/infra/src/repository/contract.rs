//! Behaviour every `OrderStatusRepository` backend must show.
//!
//! Each check uses fresh order ids, so the whole suite can run against one shared
//! repository instance (including a database that outlives the test).

use orderflow_core::OrderId;
use orderflow_orders::{OrderStatus, StatusUpdate, StatusUpdateRecord};

use super::r#trait::{OrderStatusRepository, RepositoryError};

pub(crate) fn update(
    order_id: OrderId,
    old_status: OrderStatus,
    new_status: OrderStatus,
    version: u64,
) -> StatusUpdate {
    StatusUpdate {
        order_id,
        old_status,
        new_status,
        version,
    }
}

/// v1 Pending→Processed, v2 Processed→Shipped, v3 Shipped→Delivered.
pub(crate) fn seed_full_lifecycle<R: OrderStatusRepository + ?Sized>(repo: &R, order_id: OrderId) {
    use OrderStatus::*;
    for u in [
        update(order_id, Pending, Processed, 1),
        update(order_id, Processed, Shipped, 2),
        update(order_id, Shipped, Delivered, 3),
    ] {
        repo.add_order_status_update(&u).unwrap();
    }
}

fn versions(history: &[StatusUpdateRecord]) -> Vec<u64> {
    history.iter().map(|r| r.version).collect()
}

pub(crate) fn run_all<R: OrderStatusRepository + ?Sized>(repo: &R) {
    schema_setup_is_repeatable(repo);
    unknown_order_has_empty_history(repo);
    history_is_sorted_by_version(repo);
    duplicate_version_is_rejected(repo);
    same_version_is_allowed_for_different_orders(repo);
    revert_keeps_versions_up_to_target_and_is_idempotent(repo);
    revert_below_nothing_is_a_noop(repo);
    revert_is_scoped_to_one_order(repo);
    update_status_on_unknown_order_is_a_noop(repo);
    update_status_overwrites_a_single_row(repo);
    update_status_rejects_rekeying_several_rows(repo);
    overwrite_or_insert_inserts_then_overwrites(repo);
    overwrite_or_insert_on_several_rows_changes_nothing(repo);
    latest_version_tracks_history(repo);
}

fn schema_setup_is_repeatable<R: OrderStatusRepository + ?Sized>(repo: &R) {
    repo.ensure_schema().unwrap();
    repo.ensure_schema().unwrap();
}

fn unknown_order_has_empty_history<R: OrderStatusRepository + ?Sized>(repo: &R) {
    assert!(repo.get_order_status_updates(OrderId::new()).unwrap().is_empty());
}

fn history_is_sorted_by_version<R: OrderStatusRepository + ?Sized>(repo: &R) {
    use OrderStatus::*;
    let order_id = OrderId::new();

    repo.add_order_status_update(&update(order_id, Shipped, Delivered, 30)).unwrap();
    repo.add_order_status_update(&update(order_id, Pending, Processed, 10)).unwrap();
    repo.add_order_status_update(&update(order_id, Processed, Shipped, 20)).unwrap();

    let history = repo.get_order_status_updates(order_id).unwrap();
    assert_eq!(versions(&history), vec![10, 20, 30]);
    assert_eq!(history[0].old_status, Pending);
    assert_eq!(history[2].new_status, Delivered);
    assert!(history.iter().all(|r| r.order_id == order_id));
}

fn duplicate_version_is_rejected<R: OrderStatusRepository + ?Sized>(repo: &R) {
    use OrderStatus::*;
    let order_id = OrderId::new();

    repo.add_order_status_update(&update(order_id, Pending, Processed, 1)).unwrap();
    let err = repo
        .add_order_status_update(&update(order_id, Processed, Shipped, 1))
        .unwrap_err();

    match err {
        RepositoryError::DuplicateVersion { order_id: id, version } => {
            assert_eq!(id, order_id);
            assert_eq!(version, 1);
        }
        other => panic!("expected DuplicateVersion, got {other:?}"),
    }

    // The original row is untouched.
    let history = repo.get_order_status_updates(order_id).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].new_status, Processed);
}

fn same_version_is_allowed_for_different_orders<R: OrderStatusRepository + ?Sized>(repo: &R) {
    use OrderStatus::*;
    let a = OrderId::new();
    let b = OrderId::new();

    repo.add_order_status_update(&update(a, Pending, Processed, 1)).unwrap();
    repo.add_order_status_update(&update(b, Pending, Shipped, 1)).unwrap();

    assert_eq!(repo.get_order_status_updates(a).unwrap().len(), 1);
    assert_eq!(repo.get_order_status_updates(b).unwrap().len(), 1);
}

fn revert_keeps_versions_up_to_target_and_is_idempotent<R: OrderStatusRepository + ?Sized>(
    repo: &R,
) {
    let order_id = OrderId::new();
    seed_full_lifecycle(repo, order_id);

    let before = repo.get_order_status_updates(order_id).unwrap();
    assert_eq!(versions(&before), vec![1, 2, 3]);

    assert_eq!(repo.revert_to_version(order_id, 1).unwrap(), 2);
    let after = repo.get_order_status_updates(order_id).unwrap();
    assert_eq!(after, before[..1].to_vec());

    assert_eq!(repo.revert_to_version(order_id, 1).unwrap(), 0);
    assert_eq!(repo.get_order_status_updates(order_id).unwrap(), after);
}

fn revert_below_nothing_is_a_noop<R: OrderStatusRepository + ?Sized>(repo: &R) {
    let order_id = OrderId::new();
    assert_eq!(repo.revert_to_version(order_id, 0).unwrap(), 0);

    seed_full_lifecycle(repo, order_id);
    assert_eq!(repo.revert_to_version(order_id, 3).unwrap(), 0);
    assert_eq!(repo.revert_to_version(order_id, 99).unwrap(), 0);
    assert_eq!(repo.get_order_status_updates(order_id).unwrap().len(), 3);

    // Reverting to 0 empties the history.
    assert_eq!(repo.revert_to_version(order_id, 0).unwrap(), 3);
    assert!(repo.get_order_status_updates(order_id).unwrap().is_empty());
}

fn revert_is_scoped_to_one_order<R: OrderStatusRepository + ?Sized>(repo: &R) {
    let reverted = OrderId::new();
    let bystander = OrderId::new();
    seed_full_lifecycle(repo, reverted);
    seed_full_lifecycle(repo, bystander);

    repo.revert_to_version(reverted, 1).unwrap();

    assert_eq!(repo.get_order_status_updates(reverted).unwrap().len(), 1);
    assert_eq!(repo.get_order_status_updates(bystander).unwrap().len(), 3);
}

fn update_status_on_unknown_order_is_a_noop<R: OrderStatusRepository + ?Sized>(repo: &R) {
    let order_id = OrderId::new();
    assert_eq!(
        repo.update_status(order_id, OrderStatus::Shipped, 4).unwrap(),
        0
    );
    assert!(repo.get_order_status_updates(order_id).unwrap().is_empty());
}

fn update_status_overwrites_a_single_row<R: OrderStatusRepository + ?Sized>(repo: &R) {
    use OrderStatus::*;
    let order_id = OrderId::new();
    repo.add_order_status_update(&update(order_id, Pending, Processed, 1)).unwrap();

    assert_eq!(repo.update_status(order_id, Shipped, 2).unwrap(), 1);

    let history = repo.get_order_status_updates(order_id).unwrap();
    assert_eq!(
        history,
        vec![StatusUpdateRecord {
            order_id,
            old_status: Pending,
            new_status: Shipped,
            version: 2,
        }]
    );
}

fn update_status_rejects_rekeying_several_rows<R: OrderStatusRepository + ?Sized>(repo: &R) {
    let order_id = OrderId::new();
    seed_full_lifecycle(repo, order_id);
    let before = repo.get_order_status_updates(order_id).unwrap();

    let err = repo
        .update_status(order_id, OrderStatus::Pending, 7)
        .unwrap_err();
    assert!(
        matches!(err, RepositoryError::DuplicateVersion { version: 7, .. }),
        "got {err:?}"
    );

    assert_eq!(repo.get_order_status_updates(order_id).unwrap(), before);
}

fn overwrite_or_insert_inserts_then_overwrites<R: OrderStatusRepository + ?Sized>(repo: &R) {
    use OrderStatus::*;
    let order_id = OrderId::new();

    assert_eq!(
        repo.overwrite_or_insert(&update(order_id, Pending, Processed, 1)).unwrap(),
        0
    );
    assert_eq!(
        repo.overwrite_or_insert(&update(order_id, Processed, Shipped, 2)).unwrap(),
        1
    );

    assert_eq!(
        repo.get_order_status_updates(order_id).unwrap(),
        vec![StatusUpdateRecord {
            order_id,
            old_status: Pending,
            new_status: Shipped,
            version: 2,
        }]
    );
}

/// An order holding several rows (written under the append policy) can no longer be
/// overwritten; every attempt fails until the history is reverted to one row.
fn overwrite_or_insert_on_several_rows_changes_nothing<R: OrderStatusRepository + ?Sized>(
    repo: &R,
) {
    use OrderStatus::*;
    let order_id = OrderId::new();
    repo.add_order_status_update(&update(order_id, Pending, Processed, 1)).unwrap();
    repo.add_order_status_update(&update(order_id, Processed, Shipped, 2)).unwrap();
    let before = repo.get_order_status_updates(order_id).unwrap();

    for version in [3, 4] {
        let err = repo
            .overwrite_or_insert(&update(order_id, Shipped, Delivered, version))
            .unwrap_err();
        assert!(
            matches!(err, RepositoryError::DuplicateVersion { version: v, .. } if v == version),
            "got {err:?}"
        );
    }
    assert_eq!(repo.get_order_status_updates(order_id).unwrap(), before);

    repo.revert_to_version(order_id, 1).unwrap();
    assert_eq!(
        repo.overwrite_or_insert(&update(order_id, Shipped, Delivered, 3)).unwrap(),
        1
    );
    assert_eq!(versions(&repo.get_order_status_updates(order_id).unwrap()), vec![3]);
}

fn latest_version_tracks_history<R: OrderStatusRepository + ?Sized>(repo: &R) {
    let order_id = OrderId::new();
    assert_eq!(repo.latest_version(order_id).unwrap(), None);

    seed_full_lifecycle(repo, order_id);
    assert_eq!(repo.latest_version(order_id).unwrap(), Some(3));

    repo.revert_to_version(order_id, 2).unwrap();
    assert_eq!(repo.latest_version(order_id).unwrap(), Some(2));
}

mod properties {
    use std::collections::BTreeSet;

    use proptest::prelude::*;

    use super::*;
    use crate::repository::InMemoryOrderStatusRepository;

    fn any_status() -> impl Strategy<Value = OrderStatus> {
        prop::sample::select(OrderStatus::ALL.to_vec())
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Whatever is inserted, successfully stored versions are distinct and the
        /// history comes back sorted.
        #[test]
        fn stored_versions_are_unique_and_sorted(
            inserts in prop::collection::vec((0u64..20, any_status(), any_status()), 0..40)
        ) {
            let repo = InMemoryOrderStatusRepository::new();
            let order_id = OrderId::new();
            let mut accepted = BTreeSet::new();

            for (version, old, new) in inserts {
                match repo.add_order_status_update(&update(order_id, old, new, version)) {
                    Ok(()) => prop_assert!(accepted.insert(version)),
                    Err(RepositoryError::DuplicateVersion { .. }) => {
                        prop_assert!(accepted.contains(&version))
                    }
                    Err(other) => return Err(TestCaseError::fail(format!("{other:?}"))),
                }
            }

            let stored = versions(&repo.get_order_status_updates(order_id).unwrap());
            prop_assert_eq!(stored, accepted.into_iter().collect::<Vec<_>>());
        }

        /// Revert keeps exactly the rows at or below the target, and a second revert to
        /// the same target changes nothing.
        #[test]
        fn revert_keeps_exactly_the_prefix(
            version_set in prop::collection::btree_set(0u64..50, 0..20),
            target in 0u64..60,
        ) {
            let repo = InMemoryOrderStatusRepository::new();
            let order_id = OrderId::new();
            for v in &version_set {
                repo.add_order_status_update(
                    &update(order_id, OrderStatus::Pending, OrderStatus::Shipped, *v),
                ).unwrap();
            }

            let before = repo.get_order_status_updates(order_id).unwrap();
            let expected: Vec<StatusUpdateRecord> =
                before.into_iter().filter(|r| r.version <= target).collect();

            repo.revert_to_version(order_id, target).unwrap();
            let once = repo.get_order_status_updates(order_id).unwrap();
            prop_assert_eq!(&once, &expected);

            prop_assert_eq!(repo.revert_to_version(order_id, target).unwrap(), 0);
            prop_assert_eq!(repo.get_order_status_updates(order_id).unwrap(), once);
        }
    }
}
