/// Connection identity tests
///
/// Every object reachable from a logical connection must report that
/// connection, including when it sits on top of a transaction proxy.
/// Run with: cargo test --test identity_tests
mod common;

use common::{Book, book};
use std::sync::Arc;
use txbridge::connection::{Connection, DataSource, LinkedDataSource, ResultSet, same_connection};
use txbridge::core::{StoreError, Value};
use txbridge::managed::ManagedEntityStore;
use txbridge::orm::{ConfigurationBuilder, EmptyEntityCache, EntityModel, EntityStore, SqlEntityStore, TransactionMode};
use txbridge::storage::MemoryDataSource;
use txbridge::transaction::{DataSourceTransactionManager, TransactionManager, TransactionOperations};

fn manager(name: &str) -> (Arc<MemoryDataSource>, Arc<DataSourceTransactionManager>) {
    let source = Arc::new(MemoryDataSource::new(name));
    let setup = source.connection().unwrap();
    setup
        .create_statement()
        .unwrap()
        .execute("CREATE TABLE books (id INTEGER PRIMARY KEY, title TEXT, pages INTEGER)")
        .unwrap();
    setup.close().unwrap();
    let manager = Arc::new(DataSourceTransactionManager::new(name, source.clone()));
    (source, manager)
}

fn owner(rs: &dyn ResultSet) -> Arc<dyn Connection> {
    rs.statement().unwrap().unwrap().connection().unwrap()
}

#[test]
fn test_linked_proxy_reports_logical_connection() {
    let (_source, manager) = manager("linked_proxy");
    let linked = LinkedDataSource::new(manager.transactional_data_source());

    manager
        .execute_write(|_| {
            let connection = linked.connection()?;

            let statement = connection.create_statement()?;
            assert!(same_connection(&statement.connection()?, &connection));

            let prepared = connection.prepare_statement("INSERT INTO books VALUES (?, ?, ?)")?;
            assert!(same_connection(&prepared.connection()?, &connection));
            prepared.set_value(1, Value::Integer(1))?;
            prepared.set_value(2, Value::from("Dune"))?;
            prepared.set_value(3, Value::Integer(412))?;
            prepared.execute_update_prepared()?;

            let keys = prepared.generated_keys()?;
            assert!(same_connection(&owner(keys.as_ref()), &connection));

            let callable = connection.prepare_call("SELECT * FROM books")?;
            assert!(same_connection(&callable.connection()?, &connection));

            let rs = statement.execute_query("SELECT * FROM books")?;
            assert!(same_connection(&owner(rs.as_ref()), &connection));
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_closing_through_linked_owner_keeps_transaction() {
    let (source, manager) = manager("linked_close");
    let linked = LinkedDataSource::new(manager.transactional_data_source());

    manager
        .execute_write(|_| {
            let connection = linked.connection()?;
            let statement = connection.create_statement()?;
            statement.execute_update("INSERT INTO books VALUES (1, 'Dune', 412)")?;

            let rs = statement.execute_query("SELECT * FROM books")?;
            owner(rs.as_ref()).close()?;

            statement.execute_update("INSERT INTO books VALUES (2, 'Emma', 474)")?;
            Ok(())
        })
        .unwrap();

    assert_eq!(source.database().row_count("books").unwrap(), 2);
    assert_eq!(source.stats().active, 0);
}

#[test]
fn test_raw_proxy_leaks_driver_connection() {
    let (_source, manager) = manager("raw_proxy");
    let proxy = manager.transactional_data_source();

    manager
        .execute_write(|_| {
            let connection = proxy.connection()?;
            let statement = connection.create_statement()?;
            assert!(!same_connection(&statement.connection()?, &connection));

            let rs = statement.execute_query("SELECT * FROM books")?;
            assert!(!same_connection(&owner(rs.as_ref()), &connection));
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_store_without_linked_closes_the_transaction_connection() {
    let (source, inner) = manager("unlinked_store");
    let transactional: Arc<dyn DataSource> = inner.transactional_data_source();
    let model = Arc::new(EntityModel::new("unlinked_store").with::<Book>());
    let configuration = Arc::new(
        ConfigurationBuilder::new(transactional, model)
            .cache(Arc::new(EmptyEntityCache))
            .transaction_mode(TransactionMode::None)
            .build()
            .unwrap(),
    );
    let manager: Arc<dyn TransactionManager> = inner.clone();
    let store = ManagedEntityStore::new(SqlEntityStore::new(configuration), manager.clone()).unwrap();

    let result = manager.execute_write(|_| store.insert(book(1, "Dune", 412)).map(|_| ()));

    assert!(matches!(result, Err(StoreError::ConnectionClosed)));
    assert_eq!(source.database().row_count("books").unwrap(), 0);
    assert!(!inner.is_transaction_active());
}

#[test]
fn test_store_with_linked_commits_the_same_work() {
    let (source, inner) = manager("linked_store");
    let model = Arc::new(EntityModel::new("linked_store").with::<Book>());
    let store = txbridge::ManagedStoreFactory::new()
        .create_for("linked_store", model, inner.clone())
        .unwrap();

    inner
        .execute_write(|_| store.insert(book(1, "Dune", 412)).map(|_| ()))
        .unwrap();

    assert_eq!(source.database().row_count("books").unwrap(), 1);
    assert!(!inner.is_transaction_active());
}
