//! Test fixtures and database helpers.
//!
//! Provides the sample entity registry and an environment with an
//! in-memory database holding every table the registry needs.

use std::collections::BTreeMap;
use std::sync::Arc;

use tally_core::{
    Config, CoreResult, DataStore, EntityBuilder, FieldSpec, KeyAllocation, ListOfValues,
    RowInit, Session, Transaction, TypeRegistry,
};
use tally_sql::{ConnectionPool, InMemoryDatabase};

/// Builds the sample registry.
///
/// - `customer`: stored key `code`, placeholder inserts on key completion
/// - `order`: key `customer.seq`, `seq` counted per customer
/// - `order_line`: key `order.line`, child of `order` through `order`
/// - `widget`: counted key `id`, mandatory `name`
/// - `note`: storage-assigned key `id`, not transactional
pub fn sample_registry() -> Arc<TypeRegistry> {
    let mut builder = TypeRegistry::builder();
    builder
        .add_list(
            ListOfValues::new("colour")
                .item("red", "Red")
                .item("green", "Green")
                .inactive_item("mauve", "Mauve"),
        )
        .add_list(
            ListOfValues::new("order_status")
                .item("draft", "Draft")
                .item("placed", "Placed")
                .item("shipped", "Shipped"),
        );
    builder
        .add_entity(customer())
        .and_then(|b| b.add_entity(order()))
        .and_then(|b| b.add_entity(order_line()))
        .and_then(|b| b.add_entity(widget()))
        .and_then(|b| b.add_entity(note()))
        .expect("sample entities are valid");
    builder.build()
}

/// The `customer` entity.
pub fn customer() -> EntityBuilder {
    EntityBuilder::new("customer", "Customer")
        .field(FieldSpec::text("code").label("Code").data_length(10).mandatory())
        .field(FieldSpec::text("name").label("Name").mandatory())
        .field(FieldSpec::email("email").label("Email"))
        .primary_key(["code"])
        .transactional()
        .allocation(KeyAllocation::MaxScan)
        .title_field("name")
}

/// The `order` entity.
pub fn order() -> EntityBuilder {
    EntityBuilder::new("order", "Order")
        .table("orders")
        .field(FieldSpec::reference("customer", "customer").label("Customer").mandatory())
        .field(FieldSpec::number("seq").label("Number").auto_generate())
        .field(FieldSpec::date("order_date").label("Order Date"))
        .field(
            FieldSpec::option("status", "order_status")
                .label("Status")
                .default_val("draft"),
        )
        .primary_key(["customer", "seq"])
        .transactional()
        .allocation(KeyAllocation::Counter)
        .label_pattern("Order {key}")
}

/// The `order_line` entity.
pub fn order_line() -> EntityBuilder {
    EntityBuilder::new("order_line", "Order Line")
        .field(FieldSpec::reference("order", "order").label("Order").mandatory())
        .field(FieldSpec::number("line").label("Line").auto_generate())
        .field(FieldSpec::text("product").label("Product").mandatory())
        .field(FieldSpec::number("quantity").label("Quantity").min("1"))
        .primary_key(["order", "line"])
        .parent("order", "order")
        .transactional()
        .allocation(KeyAllocation::Counter)
        .title_field("product")
}

/// The `widget` entity.
pub fn widget() -> EntityBuilder {
    EntityBuilder::new("widget", "Widget")
        .field(FieldSpec::number("id").label("Id").auto_generate())
        .field(FieldSpec::text("name").label("Name").data_length(40).mandatory())
        .field(FieldSpec::option("colour", "colour").label("Colour"))
        .field(
            FieldSpec::number("weight")
                .label("Weight")
                .max("1000")
                .decimal_digits(2),
        )
        .primary_key(["id"])
        .transactional()
        .allocation(KeyAllocation::Counter)
        .title_field("name")
}

/// The `note` entity.
pub fn note() -> EntityBuilder {
    EntityBuilder::new("note", "Note")
        .field(FieldSpec::number("id").label("Id").auto_generate())
        .field(FieldSpec::textarea("text").label("Text"))
        .primary_key(["id"])
        .allocation(KeyAllocation::AutoIncrement)
}

/// A test environment with automatic table setup.
pub struct TestEnv {
    /// The database instance.
    pub db: Arc<InMemoryDatabase>,
    /// The data store over the database.
    pub store: DataStore,
    /// A session for user `tester`.
    pub session: Arc<Session>,
}

impl TestEnv {
    /// Creates an environment over the sample registry.
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Creates an environment over the sample registry with a custom configuration.
    pub fn with_config(config: Config) -> Self {
        Self::with_registry(sample_registry(), config)
    }

    /// Creates an environment over any registry.
    pub fn with_registry(registry: Arc<TypeRegistry>, config: Config) -> Self {
        let db = Arc::new(InMemoryDatabase::new());
        for schema in registry.table_schemas() {
            db.create_table(schema).expect("Failed to create table");
        }
        let pool: Arc<dyn ConnectionPool> = db.clone();
        Self {
            db,
            store: DataStore::with_config(registry, pool, config),
            session: Arc::new(Session::new("tester")),
        }
    }

    /// Begins a transaction in the environment's session.
    pub fn begin(&self) -> Transaction {
        self.store
            .begin(&self.session)
            .expect("Failed to begin transaction")
    }

    /// Begins a transaction in a new session for another user.
    pub fn begin_as(&self, user: &str) -> Transaction {
        self.store
            .begin(&Arc::new(Session::new(user)))
            .expect("Failed to begin transaction")
    }

    /// Saves a customer in its own transaction.
    pub fn seed_customer(&self, code: &str, name: &str) -> CoreResult<()> {
        self.store.transaction(&self.session, Some("seed"), |tx| {
            tx.create_new_row(
                "customer",
                RowInit::new().value("code", code).value("name", name),
            )?;
            Ok(())
        })
    }

    /// Returns the committed rows of a table.
    pub fn rows(&self, table: &str) -> Vec<BTreeMap<String, Option<String>>> {
        self.db.table_rows(table).expect("Failed to read table")
    }

    /// Returns the number of committed rows in a table.
    pub fn count(&self, table: &str) -> usize {
        self.db.row_count(table).expect("Failed to count rows")
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs a test with a fresh environment.
///
/// # Example
///
/// ```rust,ignore
/// use tally_testkit::with_env;
///
/// #[test]
/// fn my_test() {
///     with_env(|env| {
///         let mut tx = env.begin();
///         // ... test operations
///     });
/// }
/// ```
pub fn with_env<F, R>(f: F) -> R
where
    F: FnOnce(&TestEnv) -> R,
{
    f(&TestEnv::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_registry_layout() {
        let registry = sample_registry();
        let order = registry.entity("order").unwrap();
        assert_eq!(order.table(), "orders");
        assert_eq!(order.key().pieces(), 2);
        assert_eq!(registry.entity("order_line").unwrap().key().pieces(), 3);
        assert_eq!(registry.children_of("order"), ["order_line".to_string()]);
    }

    #[test]
    fn env_creates_all_tables() {
        let env = TestEnv::new();
        for table in ["customer", "orders", "order_line", "widget", "note", "ac_tx", "ac_max_key"] {
            assert!(env.db.has_table(table), "missing {table}");
        }
        assert!(env.db.has_table("_history_widget"));
        assert!(!env.db.has_table("_history_note"));
    }

    #[test]
    fn seed_customer_commits() {
        let env = TestEnv::new();
        env.seed_customer("C1", "Acme").unwrap();
        let rows = env.rows("customer");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["_key"].as_deref(), Some("C1"));
        assert_eq!(rows[0]["name"].as_deref(), Some("Acme"));
    }
}
