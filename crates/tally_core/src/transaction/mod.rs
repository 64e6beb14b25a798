//! The unit of work.
//!
//! A [`Transaction`] owns one connection and every row it touches. Rows are
//! created, loaded and changed through it; `save` persists all modified
//! rows under one COMMIT and `cancel` rolls everything back.

mod cache;
mod commit;
mod handle;
mod keys;

pub use handle::RowMut;

use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use tally_sql::{Connection, ConnectionPool};

use crate::audit;
use crate::config::Config;
use crate::entity::{EntityDef, RowEvent};
use crate::error::{CoreError, CoreResult};
use crate::message::MessageList;
use crate::registry::TypeRegistry;
use crate::row::{ParentLink, Row};
use crate::session::Session;
use crate::types::{Action, RowId, TransactionId};
use cache::{RowCache, TxContext};

/// Transaction state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction is active.
    Active,
    /// Transaction has been committed.
    Committed,
    /// Transaction has been cancelled or failed to save.
    Aborted,
}

/// Overall status reported by [`Transaction::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Committed.
    Saved,
    /// Cancelled or failed.
    Inactive,
    /// Active and would pass validation.
    Valid,
    /// Active with outstanding errors.
    Invalid,
}

/// Initial values and parent for a new row.
#[derive(Debug, Clone, Default)]
pub struct RowInit {
    values: Vec<(String, String)>,
    parent: Option<RowId>,
}

impl RowInit {
    /// Creates an empty initializer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a field once defaults are in place.
    #[must_use]
    pub fn value(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.push((field.into(), value.into()));
        self
    }

    /// Links the new row to its parent row.
    #[must_use]
    pub fn parent(mut self, parent: RowId) -> Self {
        self.parent = Some(parent);
        self
    }
}

/// A unit of work over one connection.
pub struct Transaction {
    id: TransactionId,
    registry: Arc<TypeRegistry>,
    pool: Arc<dyn ConnectionPool>,
    config: Config,
    session: Arc<Session>,
    connection: Option<Box<dyn Connection>>,
    rows: Vec<Option<Row>>,
    cache: RowCache,
    state: TransactionState,
    modified: bool,
    messages: MessageList,
    presave_called: bool,
    outcome: Option<String>,
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("rows", &self.rows.iter().flatten().count())
            .field("modified", &self.modified)
            .field("presave_called", &self.presave_called)
            .finish_non_exhaustive()
    }
}

impl Transaction {
    pub(crate) fn begin(
        registry: Arc<TypeRegistry>,
        pool: Arc<dyn ConnectionPool>,
        config: Config,
        session: Arc<Session>,
    ) -> CoreResult<Self> {
        let tag = format!("Trans_{}", session.session_id());
        let mut connection = pool.trans_connection(&tag)?;
        let id = match audit::open_transaction(pool.as_ref(), &session, connection.as_ref()) {
            Ok(id) => id,
            Err(e) => {
                connection.finished();
                return Err(e);
            }
        };
        session.add_active_transaction(id);
        debug!(tx = %id, user = session.user_id(), connection = %connection.id(), "transaction begun");
        Ok(Self {
            id,
            registry,
            pool,
            config,
            session,
            connection: Some(connection),
            rows: Vec::new(),
            cache: RowCache::default(),
            state: TransactionState::Active,
            modified: false,
            messages: MessageList::new(),
            presave_called: false,
            outcome: None,
        })
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the transaction state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Returns true if the transaction is active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Returns true if any row was changed.
    #[must_use]
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Returns true once `presave` has run.
    #[must_use]
    pub fn is_presave_called(&self) -> bool {
        self.presave_called
    }

    /// Returns transaction-level messages.
    #[must_use]
    pub fn messages(&self) -> &MessageList {
        &self.messages
    }

    /// Returns the owning session.
    #[must_use]
    pub fn session(&self) -> &Arc<Session> {
        &self.session
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

    /// Ensures the transaction is active.
    pub(crate) fn ensure_active(&self) -> CoreResult<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(CoreError::NotActive { id: self.id })
        }
    }

    pub(crate) fn conn(&mut self) -> CoreResult<&mut (dyn Connection + 'static)> {
        let id = self.id;
        self.connection
            .as_deref_mut()
            .ok_or(CoreError::NotActive { id })
    }

    /// Returns a row.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownRow`] if the row was never issued or was removed.
    pub fn row(&self, id: RowId) -> CoreResult<&Row> {
        self.rows
            .get(id.index())
            .and_then(Option::as_ref)
            .ok_or(CoreError::UnknownRow { row: id })
    }

    pub(crate) fn row_state(&mut self, id: RowId) -> CoreResult<&mut Row> {
        self.rows
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or(CoreError::UnknownRow { row: id })
    }

    /// Returns a mutable handle on a row.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownRow`] if the row was never issued or was removed.
    pub fn row_mut(&mut self, id: RowId) -> CoreResult<RowMut<'_>> {
        self.row(id)?;
        Ok(RowMut::new(self, id))
    }

    /// Returns a field value of a row.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownRow`] or [`CoreError::UnknownField`].
    pub fn get(&self, id: RowId, field: &str) -> CoreResult<&str> {
        self.row(id)?.get(field)
    }

    /// Borrows a row together with a validation context over the rest of
    /// the transaction.
    pub(crate) fn split(&mut self, id: RowId) -> CoreResult<(&mut Row, TxContext<'_>)> {
        let Self {
            rows,
            registry,
            pool,
            session,
            cache,
            connection,
            ..
        } = self;
        let row = rows
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or(CoreError::UnknownRow { row: id })?;
        let ctx = TxContext {
            registry: &**registry,
            pool: &**pool,
            session: &**session,
            cache: &*cache,
            connection: connection.as_deref_mut(),
        };
        Ok((row, ctx))
    }

    fn new_row(&mut self, entity: Arc<EntityDef>) -> RowId {
        let number = u32::try_from(self.rows.len() + 1).unwrap_or(u32::MAX);
        let id = RowId::new(number);
        self.rows.push(Some(Row::new(entity, id)));
        id
    }

    /// Frees the slot of a row that never became usable. The last slot is
    /// popped so the next row takes its number.
    fn discard_row(&mut self, id: RowId) {
        if id.index() + 1 == self.rows.len() {
            self.rows.pop();
        } else if let Some(slot) = self.rows.get_mut(id.index()) {
            *slot = None;
        }
    }

    /// Runs the hooks for a row event.
    fn fire(&mut self, id: RowId, event: RowEvent) -> CoreResult<()> {
        let entity = Arc::clone(&self.row(id)?.entity);
        for hook in entity.hooks.row_hooks(event) {
            hook(&mut RowMut::new(self, id))?;
        }
        Ok(())
    }

    /// Creates a row for a new record.
    ///
    /// Defaults are applied, the parent linked and the initial values set,
    /// then key generation is attempted: the row moves to the full-key cache
    /// as soon as its key completes.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotActive`], [`CoreError::UnknownEntity`], or any
    /// error raised while setting values, generating the key or running hooks.
    pub fn create_new_row(&mut self, entity: &str, init: RowInit) -> CoreResult<RowId> {
        self.ensure_active()?;
        let entity = Arc::clone(self.registry.entity(entity)?);
        let id = self.new_row(entity);
        self.row_state(id)?.action = Some(Action::Create);
        self.cache.push_partial(id);
        self.init_new_row(id, None, init)?;
        debug!(tx = %self.id, row = %id, key = self.row(id)?.key(), "row created");
        Ok(id)
    }

    fn init_new_row(&mut self, id: RowId, key: Option<&str>, init: RowInit) -> CoreResult<()> {
        self.row_state(id)?.fields.set_default_values();
        if let Some(key) = key {
            let values = self.row(id)?.entity.key().split(key)?;
            for (field, value) in values {
                self.set_field(id, &field, &value)?;
            }
        }
        if let Some(parent) = init.parent {
            self.link_to_parent(id, parent)?;
        }
        for (field, value) in &init.values {
            self.set_field(id, field, value)?;
        }
        self.generate_key(id)?;
        self.fire(id, RowEvent::InitCreate)?;
        if self.presave_called {
            self.presave_row(id)?;
        }
        Ok(())
    }

    /// Returns the row for a stored record, loading it on first request.
    ///
    /// Repeated requests for the same key return the same row.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidKey`] for a malformed key,
    /// [`CoreError::NotFound`] if storage has no such record and
    /// [`CoreError::RecordLocked`] if the record cannot be read.
    pub fn get_active_row(&mut self, entity: &str, key: &str) -> CoreResult<RowId> {
        self.ensure_active()?;
        if let Some(id) = self.cache.lookup(entity, key) {
            return Ok(id);
        }
        let entity = Arc::clone(self.registry.entity(entity)?);
        let values = entity.key().split(key)?;
        let id = self.new_row(entity);
        let row = self.row_state(id)?;
        for (field, value) in &values {
            row.fields.get_field_mut(field)?.set_initial(value);
        }
        row.key = key.to_string();
        if let Err(e) = self.load_row(id) {
            self.discard_row(id);
            return Err(e);
        }
        self.add_to_cache(id, None)?;
        self.fire(id, RowEvent::InitUpdate)?;
        if self.presave_called {
            self.presave_row(id)?;
        }
        Ok(id)
    }

    /// Returns the row for a key, creating a new row with that key when
    /// storage has no such record.
    ///
    /// # Errors
    ///
    /// Fails as [`Transaction::get_active_row`] does, except for
    /// [`CoreError::NotFound`].
    pub fn get_row(&mut self, entity: &str, key: &str, init: RowInit) -> CoreResult<RowId> {
        match self.get_active_row(entity, key) {
            Err(CoreError::NotFound { .. }) => {
                let def = Arc::clone(self.registry.entity(entity)?);
                let id = self.new_row(def);
                self.row_state(id)?.action = Some(Action::Create);
                self.cache.push_partial(id);
                self.init_new_row(id, Some(key), init)?;
                debug!(tx = %self.id, row = %id, key, "row created for missing key");
                Ok(id)
            }
            other => other,
        }
    }

    fn load_row(&mut self, id: RowId) -> CoreResult<()> {
        let statement = self.row(id)?.select_statement();
        let outcome = self.conn()?.execute_query(&statement);
        let result = match outcome {
            Ok(result) => result,
            Err(e) if e.is_lock_wait_timeout() => {
                let row = self.row(id)?;
                return Err(CoreError::RecordLocked {
                    entity: row.entity_id().to_string(),
                    key: row.key.clone(),
                });
            }
            Err(e) => return Err(e.into()),
        };
        let row = self.row_state(id)?;
        let Some(record) = result.first() else {
            return Err(CoreError::NotFound {
                entity: row.entity_id().to_string(),
                key: row.key.clone(),
            });
        };
        row.populate(&record);
        row.action = Some(Action::Update);
        row.exists_in_db = true;
        debug!(row = %id, key = row.key(), "row loaded");
        self.fire(id, RowEvent::Load)
    }

    /// Links a row to its parent so the parent's key flows into the link field.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if the row's entity does not
    /// declare the parent's entity as its parent.
    pub fn link_to_parent(&mut self, id: RowId, parent: RowId) -> CoreResult<()> {
        let (parent_entity, parent_key, parent_full) = {
            let parent = self.row(parent)?;
            (
                parent.entity_id().to_string(),
                parent.key.clone(),
                parent.is_full_key(),
            )
        };
        let row = self.row_state(id)?;
        let link_field = match (row.entity.parent_entity(), row.entity.link_field()) {
            (Some(declared), Some(link)) if declared == parent_entity => link.to_string(),
            _ => {
                return Err(CoreError::invalid_operation(format!(
                    "{} is not a parent of {}",
                    parent_entity,
                    row.entity_id()
                )))
            }
        };
        row.parent = Some(ParentLink {
            row: parent,
            link_field: link_field.clone(),
        });
        if parent_full && row.fields.get(&link_field)? != parent_key {
            self.set_field(id, &link_field, &parent_key)?;
        }
        Ok(())
    }

    /// Changes a field of a row. Returns true if the value changed.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotModifiable`], [`CoreError::FixedKey`],
    /// [`CoreError::Vetoed`], or any error from re-keying and hooks.
    pub fn set(&mut self, id: RowId, field: &str, value: &str) -> CoreResult<bool> {
        self.set_field(id, field, value)
    }

    /// Marks or unmarks a row for deletion.
    ///
    /// Marking a stored row also marks its child rows, stored and new.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotModifiable`] if the row was already saved.
    pub fn set_delete(&mut self, id: RowId, deleting: bool) -> CoreResult<()> {
        self.ensure_active()?;
        let changed = self.row_state(id)?.fields.set_deleting(deleting)?;
        if !changed {
            return Ok(());
        }
        self.modified = true;
        self.lock_if_needed(id, None)?;

        let (entity, key, exists) = {
            let row = self.row(id)?;
            (Arc::clone(&row.entity), row.key.clone(), row.exists_in_db)
        };
        if !deleting || !exists {
            return Ok(());
        }
        for child_id in self.registry.children_of(entity.id()).to_vec() {
            let child = Arc::clone(self.registry.entity(&child_id)?);
            let Some(link) = child.link_field() else {
                continue;
            };
            let stored = self.conn()?.execute_query(
                &tally_sql::Statement::select(child.table())
                    .column(crate::key::KEY_COLUMN)
                    .filter(link, key.clone()),
            )?;
            let keys: Vec<String> = stored
                .rows()
                .filter_map(|r| r.get(crate::key::KEY_COLUMN).map(str::to_string))
                .collect();
            for child_key in keys {
                let child_row = self.get_active_row(&child_id, &child_key)?;
                self.set_delete(child_row, true)?;
            }
            let created: Vec<RowId> = self
                .rows
                .iter()
                .flatten()
                .filter(|r| {
                    r.entity_id() == child_id
                        && r.action == Some(Action::Create)
                        && r.fields.get(link).is_ok_and(|v| v == key)
                })
                .map(Row::row_id)
                .collect();
            for child_row in created {
                self.set_delete(child_row, true)?;
            }
        }
        Ok(())
    }

    /// Copies the non-key field values of one row into another.
    ///
    /// # Errors
    ///
    /// Fails as [`Transaction::set`] does.
    pub fn copy_from(&mut self, target: RowId, source: RowId) -> CoreResult<()> {
        let values: Vec<(String, String)> = {
            let target_row = self.row(target)?;
            self.row(source)?
                .fields
                .values()
                .into_iter()
                .filter(|(field, _)| {
                    target_row.fields.field(field).is_some() && !target_row.is_key_field(field)
                })
                .collect()
        };
        for (field, value) in values {
            self.set_field(target, &field, &value)?;
        }
        Ok(())
    }

    /// Drops a row from the transaction without saving it.
    ///
    /// Counter values the row took are given back, and a record inserted to
    /// claim its key is deleted.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownRow`] or an error releasing counter values
    /// or deleting the claimed record.
    pub fn remove_row(&mut self, id: RowId) -> CoreResult<()> {
        self.ensure_active()?;
        let row = self.row(id)?;
        if row.exists_in_db && row.action == Some(Action::Create) {
            let statement = row.delete_statement();
            self.conn()?.execute_update(&statement)?;
            trace!(tx = %self.id, row = %id, "claimed record deleted");
        }
        let row = self.row(id)?;
        let table = row.entity.table().to_string();
        let reservations = row.reservations.clone();
        if !reservations.is_empty() {
            let mut conn = self.pool.query_connection("ac_max_key")?;
            for rest_of_key in &reservations {
                audit::release_counter(conn.as_mut(), &table, rest_of_key, self.id)?;
            }
            conn.finished();
        }
        self.cache.remove_row(id);
        self.rows[id.index()] = None;
        debug!(tx = %self.id, row = %id, "row removed");
        Ok(())
    }

    /// Returns true if a row with this key is in the full-key cache.
    #[must_use]
    pub fn is_in_cache(&self, entity: &str, key: &str) -> bool {
        self.cache.lookup(entity, key).is_some()
    }

    /// Returns the full-key rows, of one entity or all, ordered by key.
    #[must_use]
    pub fn existing_rows(&self, entity: Option<&str>) -> Vec<RowId> {
        let mut ids = match entity {
            Some(entity) => self.cache.entity_rows(entity),
            None => self.cache.full_rows(),
        };
        ids.sort_by(|a, b| {
            let key = |id: &RowId| {
                self.row(*id)
                    .map(|r| (r.key.clone(), r.entity_id().to_string()))
                    .unwrap_or_default()
            };
            key(a).cmp(&key(b))
        });
        ids
    }

    fn live_rows(&self) -> impl Iterator<Item = &Row> {
        self.rows.iter().flatten()
    }

    /// Returns the number of rows, optionally only modified ones.
    #[must_use]
    pub fn row_count(&self, modified_only: bool) -> usize {
        self.live_rows()
            .filter(|r| !modified_only || r.is_modified())
            .count()
    }

    /// Returns the number of full-key rows, optionally only modified ones.
    #[must_use]
    pub fn full_key_row_count(&self, modified_only: bool) -> usize {
        self.cache
            .full_rows()
            .into_iter()
            .filter_map(|id| self.row(id).ok())
            .filter(|r| !modified_only || r.is_modified())
            .count()
    }

    /// Returns the number of partial-key rows, optionally only modified ones.
    #[must_use]
    pub fn partial_key_row_count(&self, modified_only: bool) -> usize {
        self.cache
            .partial_rows()
            .iter()
            .filter_map(|id| self.row(*id).ok())
            .filter(|r| !modified_only || r.is_modified())
            .count()
    }

    /// Describes the partial-key rows, for messages.
    #[must_use]
    pub fn partial_key_rows_description(&self) -> String {
        self.cache
            .partial_rows()
            .iter()
            .filter_map(|id| self.row(*id).ok())
            .map(Row::describe)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Runs the update hooks of every row.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::AlreadyPresaved`] once `presave` has run, or any
    /// hook error.
    pub fn update(&mut self) -> CoreResult<()> {
        self.ensure_active()?;
        if self.presave_called {
            return Err(CoreError::AlreadyPresaved);
        }
        let ids: Vec<RowId> = self.live_rows().map(Row::row_id).collect();
        for id in ids {
            self.update_row(id)?;
        }
        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.is_active() {
            if let Err(e) = self.cancel() {
                warn!(tx = %self.id, error = %e, "cancel on drop failed");
            }
        }
    }
}
