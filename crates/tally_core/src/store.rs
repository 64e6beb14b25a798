//! Data store facade.

use std::sync::Arc;
use tracing::{debug, warn};

use tally_sql::{ConnectionPool, TableSchema};

use crate::config::Config;
use crate::error::CoreResult;
use crate::registry::TypeRegistry;
use crate::session::Session;
use crate::transaction::Transaction;

/// The main entry point: a registry of entities bound to a connection pool.
///
/// `DataStore` is cheap to share; every unit of work begins here.
///
/// ```rust,ignore
/// use tally_core::{DataStore, RowInit, Session};
///
/// let store = DataStore::new(registry, pool);
/// let session = Arc::new(Session::new("alice"));
///
/// store.transaction(&session, None, |tx| {
///     let widget = tx.create_new_row("widget", RowInit::new().value("name", "bolt"))?;
///     Ok(widget)
/// })?;
/// ```
pub struct DataStore {
    registry: Arc<TypeRegistry>,
    pool: Arc<dyn ConnectionPool>,
    config: Config,
}

impl std::fmt::Debug for DataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataStore")
            .field("entities", &self.registry.entities().count())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DataStore {
    /// Creates a data store with the default configuration.
    #[must_use]
    pub fn new(registry: Arc<TypeRegistry>, pool: Arc<dyn ConnectionPool>) -> Self {
        Self::with_config(registry, pool, Config::default())
    }

    /// Creates a data store with a custom configuration.
    #[must_use]
    pub fn with_config(
        registry: Arc<TypeRegistry>,
        pool: Arc<dyn ConnectionPool>,
        config: Config,
    ) -> Self {
        Self {
            registry,
            pool,
            config,
        }
    }

    /// Begins a transaction for a session.
    ///
    /// # Errors
    ///
    /// Returns an error if no transaction connection is available or the
    /// audit row cannot be written.
    pub fn begin(&self, session: &Arc<Session>) -> CoreResult<Transaction> {
        Transaction::begin(
            Arc::clone(&self.registry),
            Arc::clone(&self.pool),
            self.config.clone(),
            Arc::clone(session),
        )
    }

    /// Runs `f` in a transaction: saved when `f` succeeds, cancelled when it fails.
    ///
    /// # Errors
    ///
    /// Returns the error from `f`, or from beginning or saving.
    pub fn transaction<F, T>(&self, session: &Arc<Session>, outcome: Option<&str>, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut Transaction) -> CoreResult<T>,
    {
        let mut tx = self.begin(session)?;
        match f(&mut tx) {
            Ok(value) => {
                tx.save(outcome)?;
                debug!(tx = %tx.id(), "transaction closure saved");
                Ok(value)
            }
            Err(e) => {
                if let Err(cancel) = tx.cancel() {
                    warn!(tx = %tx.id(), error = %cancel, "cancel after failed closure");
                }
                Err(e)
            }
        }
    }

    /// Returns the registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the connection pool.
    #[must_use]
    pub fn pool(&self) -> &Arc<dyn ConnectionPool> {
        &self.pool
    }

    /// Returns every table the store needs: audit tables, then entity and
    /// history tables.
    #[must_use]
    pub fn table_schemas(&self) -> Vec<TableSchema> {
        self.registry.table_schemas()
    }
}
