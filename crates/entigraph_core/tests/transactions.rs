//! Transaction modes, snapshot isolation, rollback and the single writer.

use entigraph_core::{Config, CoreError, CoreResult, EntityId, TransactionState, TxMode};
use entigraph_testkit::prelude::*;
use proptest::prelude::*;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc, Barrier};
use std::thread;
use std::time::Duration;

fn author_count(store: &entigraph_core::Store) -> usize {
    store.read(|txn| Ok(txn.scan("Author")?.count())).unwrap()
}

#[test]
fn read_only_transactions_reject_mutations() {
    with_temp_store(|store| {
        let catalog = seed_bookstore(store).unwrap();
        let mut txn = store.begin(TxMode::ReadOnly).unwrap();
        assert!(matches!(
            txn.create("Author", [("name", "Anne".into())]),
            Err(CoreError::ReadOnly)
        ));
        assert!(matches!(txn.set(catalog.bronte, "yearOfDeath", 1850), Err(CoreError::ReadOnly)));
        assert!(matches!(txn.delete(catalog.hobbit), Err(CoreError::ReadOnly)));
        assert!(matches!(
            txn.add_link(catalog.martin, "books", catalog.hobbit),
            Err(CoreError::ReadOnly)
        ));
        assert!(matches!(txn.entity_mut(catalog.bronte), Err(CoreError::ReadOnly)));
        txn.commit().unwrap();
    });
}

#[test]
fn reader_keeps_its_snapshot_after_a_writer_commits() {
    with_temp_store(|store| {
        let catalog = seed_bookstore(store).unwrap();
        let reader = store.begin(TxMode::ReadOnly).unwrap();

        let anne = store
            .write(|txn| {
                txn.set(catalog.tolkien, "countryOfBirth", "South.Africa")?;
                txn.create("Author", [("name", "Anne".into()), ("yearOfBirth", 1820.into())])
            })
            .unwrap();

        assert_eq!(reader.scan("Author").unwrap().count(), 3);
        assert!(reader.read("Author", anne).unwrap().is_none());
        let tolkien = reader.entity(catalog.tolkien).unwrap();
        assert_eq!(tolkien.string("countryOfBirth"), Some("England"));
        assert!(reader.snapshot_seq() < store.committed_seq());
        reader.commit().unwrap();

        assert_eq!(author_count(store), 4);
    });
}

#[test]
fn concurrent_reader_is_isolated() {
    with_temp_store(|store| {
        seed_bookstore(store).unwrap();
        let started = Barrier::new(2);
        let committed = Barrier::new(2);

        thread::scope(|scope| {
            let reader = scope.spawn(|| {
                let txn = store.begin(TxMode::ReadOnly).unwrap();
                let before = txn.scan("Author").unwrap().count();
                started.wait();
                committed.wait();
                let after = txn.scan("Author").unwrap().count();
                (before, after)
            });

            started.wait();
            store
                .write(|txn| {
                    txn.create("Author", [("name", "Anne".into()), ("yearOfBirth", 1820.into())])
                })
                .unwrap();
            committed.wait();

            assert_eq!(reader.join().unwrap(), (3, 3));
        });
        assert_eq!(author_count(store), 4);
    });
}

#[test]
fn writers_are_serialized() {
    with_temp_store(|store| {
        let first = store.begin(TxMode::ReadWrite).unwrap();
        let (tx, rx) = mpsc::channel();

        thread::scope(|scope| {
            scope.spawn(|| {
                let id = store
                    .write(|txn| {
                        txn.create("Author", [("name", "Second".into()), ("yearOfBirth", 1900.into())])
                    })
                    .unwrap();
                tx.send(id).unwrap();
            });

            // the second writer cannot finish while the first is active
            assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
            first.rollback().unwrap();
            rx.recv_timeout(Duration::from_secs(10)).unwrap();
        });
        assert_eq!(author_count(store), 1);
    });
}

#[test]
fn writer_wait_timeout_reports_retryable_conflict() {
    let storage = RestartableStorage::new();
    let store = entigraph_core::Store::open_with_backends(
        Config::default().writer_wait_timeout(Duration::from_millis(20)),
        Box::new(storage.wal.clone()),
        Box::new(storage.segments.clone()),
        bookstore_schema(),
    )
    .unwrap();

    let writer = store.begin(TxMode::ReadWrite).unwrap();
    thread::scope(|scope| {
        let err = scope
            .spawn(|| store.begin(TxMode::ReadWrite).map(|_| ()).unwrap_err())
            .join()
            .unwrap();
        assert!(matches!(err, CoreError::Conflict { .. }));
        assert!(err.is_recoverable());
    });
    writer.commit().unwrap();
    store.begin(TxMode::ReadWrite).unwrap().rollback().unwrap();
}

#[test]
fn rollback_discards_everything() {
    with_temp_store(|store| {
        let seq = store.committed_seq();
        let mut txn = store.begin(TxMode::ReadWrite).unwrap();
        let fantasy = txn.enum_member("Genre", "FANTASY").unwrap();
        let author = txn
            .create("Author", [("name", "Anne".into()), ("yearOfBirth", 1820.into())])
            .unwrap();
        let book = txn.create("Book", [("title", "Agnes Grey".into())]).unwrap();
        txn.add_link(book, "genres", fantasy).unwrap();
        txn.add_link(book, "authors", author).unwrap();
        txn.rollback().unwrap();

        assert_eq!(store.committed_seq(), seq);
        store
            .read(|txn| {
                assert!(!txn.exists(author)?);
                assert!(!txn.exists(book)?);
                assert_eq!(txn.scan("Book")?.count(), 0);
                Ok(())
            })
            .unwrap();
    });
}

#[test]
fn failed_validation_publishes_nothing() {
    with_temp_store(|store| {
        let seq = store.committed_seq();
        let err = store
            .write(|txn| {
                txn.create("Author", [("name", "Valid".into()), ("yearOfBirth", 1900.into())])?;
                txn.create("Author", [("name", "Invalid!".into()), ("yearOfBirth", 1900.into())])
            })
            .unwrap_err();
        assert!(matches!(err, CoreError::ConstraintViolation { .. }));
        assert_eq!(store.committed_seq(), seq);
        assert_eq!(author_count(store), 0);
    });
}

#[test]
fn body_error_rolls_back() {
    with_temp_store(|store| {
        let err = store
            .write(|txn| {
                txn.create("Author", [("name", "Anne".into()), ("yearOfBirth", 1820.into())])?;
                txn.entity(EntityId::new(9_999)).map(|_| ())
            })
            .unwrap_err();
        assert!(matches!(err, CoreError::EntityNotFound { .. }));
        assert_eq!(author_count(store), 0);
    });
}

#[test]
fn panic_in_body_rolls_back_and_releases_the_writer() {
    with_temp_store(|store| {
        let fail = true;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            store.write(|txn| {
                txn.create("Author", [("name", "Anne".into()), ("yearOfBirth", 1820.into())])?;
                if fail {
                    panic!("body failed");
                }
                Ok(())
            })
        }));
        assert!(outcome.is_err());
        assert_eq!(author_count(store), 0);

        // a new writer can start, so the slot was released
        store
            .write(|txn| txn.create("Author", [("name", "Emily".into()), ("yearOfBirth", 1818.into())]))
            .unwrap();
        assert_eq!(author_count(store), 1);
    });
}

#[test]
fn dropped_transaction_rolls_back() {
    with_temp_store(|store| {
        {
            let mut txn = store.begin(TxMode::ReadWrite).unwrap();
            txn.create("Author", [("name", "Anne".into()), ("yearOfBirth", 1820.into())])
                .unwrap();
        }
        assert_eq!(author_count(store), 0);
    });
}

#[test]
fn transaction_introspection() {
    with_temp_store(|store| {
        let reader = store.begin(TxMode::ReadOnly).unwrap();
        assert_eq!(reader.mode(), TxMode::ReadOnly);
        assert_eq!(reader.state(), TransactionState::Active);
        assert!(reader.is_active());
        assert_eq!(reader.snapshot_seq(), store.committed_seq());
        let reader_id = reader.id();
        reader.rollback().unwrap();

        let writer = store.begin(TxMode::ReadWrite).unwrap();
        assert!(writer.id() > reader_id);
        assert_eq!(writer.mode(), TxMode::ReadWrite);
        writer.commit().unwrap();
    });
}

#[test]
fn missing_entities_are_not_found() {
    with_temp_store(|store| {
        let ghost = EntityId::new(4_242);
        let mut txn = store.begin(TxMode::ReadWrite).unwrap();
        assert!(matches!(txn.entity(ghost), Err(CoreError::EntityNotFound { .. })));
        assert!(matches!(txn.delete(ghost), Err(CoreError::EntityNotFound { .. })));
        assert!(matches!(
            txn.update(ghost, [("name", Some("x".into()))]),
            Err(CoreError::EntityNotFound { .. })
        ));
        assert!(txn.read("Author", ghost).unwrap().is_none());
    });
}

#[test]
fn read_checks_the_type() {
    with_temp_store(|store| {
        let catalog = seed_bookstore(store).unwrap();
        store
            .read(|txn| {
                assert!(txn.read("Book", catalog.bronte)?.is_none());
                assert!(txn.read("Author", catalog.bronte)?.is_some());
                assert!(matches!(txn.read("Publisher", catalog.bronte), Err(CoreError::UnknownType { .. })));
                Ok(())
            })
            .unwrap();
    });
}

#[test]
fn writer_sees_its_own_staged_changes() {
    with_temp_store(|store| {
        let catalog = seed_bookstore(store).unwrap();
        store
            .write(|txn| {
                txn.update(catalog.jane_eyre, [("year", Some(1848.into())), ("title", Some("Jane Eyre: An Autobiography".into()))])?;
                txn.delete(catalog.game_of_thrones)?;
                let recent = txn
                    .query("Book")?
                    .filter(|b| b.integer("year").is_some_and(|y| y < 1900));
                assert_eq!(recent.ids(), vec![catalog.jane_eyre]);
                assert_eq!(txn.query("Book")?.size(), 3);
                Ok(())
            })
            .unwrap();
    });
}

#[test]
fn update_with_none_clears_optional_property() {
    with_temp_store(|store| {
        let catalog = seed_bookstore(store).unwrap();
        store
            .write(|txn| {
                txn.entity_mut(catalog.hobbit)?.unset("year")?;
                txn.update(catalog.bronte, [("yearOfDeath", None)])
            })
            .unwrap();
        store
            .read(|txn| {
                assert_eq!(txn.entity(catalog.hobbit)?.integer("year"), None);
                assert_eq!(txn.entity(catalog.bronte)?.integer("yearOfDeath"), None);
                Ok(())
            })
            .unwrap();
    });
}

#[test]
fn scan_is_in_creation_order() {
    with_temp_store(|store| {
        let catalog = seed_bookstore(store).unwrap();
        let ids: Vec<EntityId> = store.read(|txn| Ok(txn.scan("Book")?.collect())).unwrap();
        assert_eq!(
            ids,
            vec![
                catalog.jane_eyre,
                catalog.hobbit,
                catalog.lord_of_the_rings,
                catalog.game_of_thrones
            ]
        );
    });
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn ids_increase_in_creation_order(
        names in prop::collection::vec(author_name_strategy(), 1..12),
        per_txn in 1usize..4,
    ) {
        let store = TestStore::memory();
        let mut created = Vec::new();
        for chunk in names.chunks(per_txn) {
            let ids = store
                .write(|txn| {
                    chunk
                        .iter()
                        .map(|name| {
                            txn.create(
                                "Author",
                                [("name", name.as_str().into()), ("yearOfBirth", 1900.into())],
                            )
                        })
                        .collect::<CoreResult<Vec<_>>>()
                })
                .unwrap();
            created.extend(ids);
        }

        prop_assert!(created.windows(2).all(|pair| pair[0] < pair[1]));
        let scanned: Vec<EntityId> = store.read(|txn| Ok(txn.scan("Author")?.collect())).unwrap();
        prop_assert_eq!(scanned, created);
    }

    #[test]
    fn unallocated_ids_are_not_found(id in entity_id_strategy()) {
        let store = TestStore::memory();
        let genres: Vec<EntityId> = store.read(|txn| Ok(txn.scan("Genre")?.collect())).unwrap();
        prop_assume!(!genres.contains(&id));

        let txn = store.begin(TxMode::ReadOnly).unwrap();
        let is_not_found = matches!(txn.entity(id), Err(CoreError::EntityNotFound { .. }));
        prop_assert!(is_not_found);
        prop_assert!(txn.read("Author", id).unwrap().is_none());
    }
}
