/// Asynchronous scalar tests
///
/// Scalars run their read transaction on whichever thread computes them.
/// Run with: cargo test --test async_scalar_tests
mod common;

use common::{Book, book, fixture, fixture_with};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use txbridge::StoreSettings;
use txbridge::executor::{Executor, Task};
use txbridge::orm::EntityStore;

fn seeded(f: &common::Fixture) {
    f.store
        .with_transaction(|store| {
            store.insert_all(vec![
                book(1, "Dune", 412),
                book(2, "Emma", 474),
                book(3, "Ulysses", 730),
            ])
        })
        .unwrap();
}

/// Runs each task on a fresh thread and counts submissions
#[derive(Default)]
struct CountingExecutor {
    submitted: AtomicUsize,
}

impl Executor for CountingExecutor {
    fn execute(&self, task: Task) {
        self.submitted.fetch_add(1, Ordering::SeqCst);
        std::thread::spawn(task);
    }
}

#[tokio::test]
async fn test_count_future_resolves_inside_runtime() {
    let f = fixture("scalar_runtime");
    seeded(&f);
    let before = f.manager.counts();

    let count = f.store.count::<Book>().get().unwrap().to_future().await.unwrap();

    assert_eq!(count, 3);
    let delta = f.manager.since(before);
    assert_eq!((delta.begins, delta.commits), (1, 1));
}

#[test]
fn test_count_future_waits_without_runtime() {
    let f = fixture("scalar_blocking");
    seeded(&f);

    let scalar = f
        .store
        .count::<Book>()
        .where_eq("title", "Emma")
        .get()
        .unwrap();

    assert_eq!(scalar.to_future().wait().unwrap(), 1);
    assert_eq!(tokio_test::block_on(scalar.to_future()).unwrap(), 1);
    assert!(!f.manager.is_transaction_active());
}

#[test]
fn test_configured_write_executor_runs_scalars() {
    let executor = Arc::new(CountingExecutor::default());
    let settings = StoreSettings::new().write_executor(executor.clone());
    let f = fixture_with("scalar_executor", settings);
    seeded(&f);

    let scalar = f.store.count::<Book>().get().unwrap();
    assert_eq!(scalar.to_future().wait().unwrap(), 3);
    assert_eq!(executor.submitted.load(Ordering::SeqCst), 1);

    let other = Arc::new(CountingExecutor::default());
    assert_eq!(scalar.to_future_on(other.clone()).wait().unwrap(), 3);
    assert_eq!(other.submitted.load(Ordering::SeqCst), 1);
    assert_eq!(executor.submitted.load(Ordering::SeqCst), 1);
}

#[test]
fn test_supplier_opens_a_transaction_per_call() {
    let f = fixture("scalar_supplier");
    seeded(&f);
    let supplier = f.store.count::<Book>().get().unwrap().to_supplier();
    let before = f.manager.counts();

    assert_eq!(supplier().unwrap(), 3);
    f.store
        .with_transaction(|store| store.insert(book(4, "Walden", 352)))
        .unwrap();
    assert_eq!(supplier().unwrap(), 4);

    let delta = f.manager.since(before);
    assert_eq!(delta.begins, 3);
    assert_eq!(delta.commits, 3);
}

#[test]
fn test_scalar_joins_caller_transaction() {
    let f = fixture("scalar_join");
    seeded(&f);
    let scalar = f.store.count::<Book>().get().unwrap();
    let before = f.manager.counts();

    let seen = f
        .store
        .with_transaction(|store| {
            store.insert(book(4, "Walden", 352))?;
            let mut seen = 0;
            scalar.consume(&mut |n| seen = n)?;
            Ok(seen)
        })
        .unwrap();

    assert_eq!(seen, 4);
    let delta = f.manager.since(before);
    assert_eq!(delta.begins, 1);
    assert!(delta.joins >= 1);
}
