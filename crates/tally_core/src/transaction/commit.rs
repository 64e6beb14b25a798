//! Validation, presave, save and cancel.

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use super::{RowMut, Transaction, TransactionState, TransactionStatus};
use crate::audit;
use crate::entity::RowEvent;
use crate::error::{CoreError, CoreResult};
use crate::key::KeyAllocation;
use crate::message::{MessageKind, MessageTag};
use crate::row::Row;
use crate::types::{Action, RowId};

impl Transaction {
    /// Rows whose validity decides the transaction's: modified full-key rows
    /// and partial-key rows not marked for deletion.
    fn rows_to_check(&self) -> Vec<RowId> {
        let mut ids: Vec<RowId> = self
            .cache
            .full_rows()
            .into_iter()
            .filter(|id| self.row(*id).is_ok_and(Row::is_modified))
            .collect();
        ids.extend(
            self.cache
                .partial_rows()
                .iter()
                .copied()
                .filter(|id| self.row(*id).is_ok_and(|r| !r.is_deleting())),
        );
        ids
    }

    fn row_is_valid(&mut self, id: RowId) -> CoreResult<bool> {
        let (row, mut ctx) = self.split(id)?;
        let fields_valid = row.fields.is_valid(false, None, &mut ctx)?;
        Ok(fields_valid && !row.messages.has_errors())
    }

    /// Returns true if every row that would be saved is valid and no
    /// transaction-level error is outstanding.
    ///
    /// Every row is validated so each carries its messages afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error only if a validation lookup fails.
    pub fn is_valid(&mut self) -> CoreResult<bool> {
        let mut valid = !self.messages.has_errors();
        for id in self.rows_to_check() {
            valid &= self.row_is_valid(id)?;
        }
        Ok(valid)
    }

    /// Returns the transaction status, validating if still active.
    ///
    /// # Errors
    ///
    /// Returns an error only if a validation lookup fails.
    pub fn status(&mut self) -> CoreResult<TransactionStatus> {
        let state = self.state;
        Ok(match state {
            TransactionState::Committed => TransactionStatus::Saved,
            TransactionState::Aborted => TransactionStatus::Inactive,
            TransactionState::Active if self.is_valid()? => TransactionStatus::Valid,
            TransactionState::Active => TransactionStatus::Invalid,
        })
    }

    /// Returns every outstanding error: transaction messages first, then
    /// each row's, field errors prefixed by the field label.
    #[must_use]
    pub fn message_report(&self) -> Vec<String> {
        let fully_identify = self.config.fully_identify_rows_in_messages;
        let mut texts: Vec<String> = self
            .messages
            .iter()
            .filter(|m| m.kind == MessageKind::Error)
            .map(|m| m.text.clone())
            .collect();
        for row in self.live_rows() {
            texts.extend(row.error_texts(fully_identify));
        }
        texts
    }

    /// Re-checks a conflicting key and runs the row's update hooks.
    pub(crate) fn update_row(&mut self, id: RowId) -> CoreResult<()> {
        let row = self.row(id)?;
        let conflict = row
            .messages
            .tagged(MessageTag::DuplicateKey)
            .and_then(|m| m.field.clone());
        if let Some(field) = conflict {
            if !row.exists_in_db {
                self.key_change(id, &field)?;
            }
        }
        self.fire(id, RowEvent::Update)
    }

    /// Runs the last business checks before persistence.
    ///
    /// Each remaining partial-key row adds an error; every modified
    /// full-key row gets its presave hooks.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::AlreadyPresaved`] on a second call, or any hook error.
    pub fn presave(&mut self, outcome: Option<&str>) -> CoreResult<()> {
        self.ensure_active()?;
        if self.presave_called {
            return Err(CoreError::AlreadyPresaved);
        }
        self.presave_called = true;
        self.outcome = outcome.map(str::to_string);

        let partial: Vec<String> = self
            .cache
            .partial_rows()
            .iter()
            .filter_map(|id| self.row(*id).ok())
            .filter(|r| !r.is_deleting())
            .map(Row::describe)
            .collect();
        for description in partial {
            self.messages
                .error(format!("partial-key row still exists: {description}"));
        }

        let ids: Vec<RowId> = self
            .cache
            .full_rows()
            .into_iter()
            .filter(|id| self.row(*id).is_ok_and(Row::is_modified))
            .collect();
        for id in ids {
            self.presave_row(id)?;
        }
        debug!(tx = %self.id, outcome = ?self.outcome, "presave done");
        Ok(())
    }

    pub(crate) fn presave_row(&mut self, id: RowId) -> CoreResult<()> {
        let row = self.row_state(id)?;
        if row.presave_called {
            return Ok(());
        }
        row.presave_called = true;
        let entity = Arc::clone(&row.entity);
        let outcome = self.outcome.clone();
        for hook in &entity.hooks.presave {
            hook(&mut RowMut::new(self, id), outcome.as_deref())?;
        }
        Ok(())
    }

    /// Persists every modified row and commits.
    ///
    /// Runs `presave` first if it has not run. A transaction that is
    /// unmodified or invalid is refused and stays active; a failure during
    /// persistence rolls everything back and ends the transaction.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotModified`], [`CoreError::Invalid`] with every
    /// outstanding message, or the error that stopped persistence.
    pub fn save(&mut self, outcome: Option<&str>) -> CoreResult<()> {
        self.ensure_active()?;
        if !self.presave_called {
            self.presave(outcome)?;
        } else if outcome.is_some() {
            self.outcome = outcome.map(str::to_string);
        }
        if !self.modified && !self.config.allow_no_modifications {
            return Err(CoreError::NotModified);
        }
        if !self.is_valid()? {
            return Err(CoreError::Invalid {
                messages: self.message_report(),
            });
        }
        match self.persist() {
            Ok(()) => {
                self.finish_commit();
                Ok(())
            }
            Err(e) => {
                warn!(tx = %self.id, error = %e, "save failed, rolling back");
                if let Err(cleanup) = self.close() {
                    warn!(tx = %self.id, error = %cleanup, "cleanup after failed save");
                }
                Err(e)
            }
        }
    }

    /// Writes the rows in dependency order: deletions children first, then
    /// everything else parents first.
    fn persist(&mut self) -> CoreResult<()> {
        let mut order: Vec<(bool, isize, RowId)> = self
            .cache
            .full_rows()
            .into_iter()
            .filter_map(|id| {
                let row = self.row(id).ok()?;
                if !row.is_modified() {
                    return None;
                }
                let depth = isize::try_from(row.entity.depth()).unwrap_or(isize::MAX);
                Some(if row.is_deleting() {
                    (false, -depth, id)
                } else {
                    (true, depth, id)
                })
            })
            .collect();
        order.sort_unstable();
        for (_, _, id) in order {
            self.save_row(id)?;
        }
        let (tx, outcome) = (self.id, self.outcome.clone());
        audit::record_commit(self.conn()?, tx, outcome.as_deref())?;
        self.conn()?.commit()?;
        Ok(())
    }

    fn save_row(&mut self, id: RowId) -> CoreResult<()> {
        let tx = self.id;
        let entity = Arc::clone(&self.row(id)?.entity);
        let allocation = self.allocation(&entity);
        let deleting = self.row(id)?.is_deleting();
        if !deleting && !self.row_is_valid(id)? {
            let row = self.row(id)?;
            return Err(CoreError::InvalidRecord {
                entity: entity.id().to_string(),
                key: row.key.clone(),
                messages: row.error_texts(false),
            });
        }

        let row = self.row(id)?;
        let missing = || CoreError::NoDbRecord {
            entity: entity.id().to_string(),
            key: row.key.clone(),
        };
        if !deleting && !row.exists_in_db && allocation != KeyAllocation::Counter {
            return Err(missing());
        }
        entity.key().check_key(&row.key)?;

        let (statement, action) = if deleting {
            if row.exists_in_db {
                (Some(row.delete_statement()), Some(Action::Delete))
            } else {
                (None, None)
            }
        } else if !row.exists_in_db {
            (Some(row.insert_statement(tx, &row.key)), Some(Action::Create))
        } else {
            let action = row.action.unwrap_or(Action::Update);
            match row.update_statement(tx, action == Action::Create) {
                Some(statement) => (Some(statement), Some(action)),
                None => (None, None),
            }
        };
        let history = (!deleting && action.is_some() && entity.is_transactional())
            .then(|| row.history_statement(tx));
        let audit_row = action.filter(|_| entity.is_transactional()).map(|action| {
            audit::sub_row(
                tx,
                id.number(),
                entity.id(),
                &row.key,
                action,
                row.curr_tx.as_deref(),
            )
        });
        let error = missing();

        let conn = self.conn()?;
        if let Some(statement) = &statement {
            trace!(sql = %statement, "saving row");
            let affected = conn.execute_update(statement)?;
            let expected = match action {
                Some(Action::Delete) => affected == 1,
                Some(_) => affected > 0,
                None => true,
            };
            if !expected {
                return Err(error);
            }
        }
        for statement in history.iter().chain(audit_row.iter()) {
            trace!(sql = %statement, "audit");
            conn.execute_update(statement)?;
        }

        let row = self.row_state(id)?;
        row.action = action;
        row.fields.set_modifiable(false);
        row.saved = true;
        row.exists_in_db = !deleting && (row.exists_in_db || action.is_some());
        if action.is_some() && entity.is_transactional() {
            row.curr_tx = Some(tx.as_u64().to_string());
        }
        debug!(row = %id, key = row.key(), action = ?action, "row saved");
        Ok(())
    }

    fn finish_commit(&mut self) {
        if let Some(mut conn) = self.connection.take() {
            conn.finished();
        }
        self.state = TransactionState::Committed;
        self.session.remove_active_transaction(self.id);

        let saved: Vec<&Row> = self.live_rows().filter(|r| r.saved).collect();
        let entities: BTreeSet<String> = saved.iter().map(|r| r.entity_id().to_string()).collect();
        let deleted: Vec<RowId> = saved
            .iter()
            .filter(|r| r.action == Some(Action::Delete))
            .map(|r| r.row_id)
            .collect();
        let count = saved.len();
        for entity in &entities {
            self.session.lov_cache().invalidate_entity(entity);
        }
        for id in deleted {
            self.cache.remove_row(id);
        }
        debug!(tx = %self.id, rows = count, "transaction committed");
    }

    /// Rolls back, gives back counter values and marks the audit row
    /// cancelled. Every step runs; the first error is returned.
    fn close(&mut self) -> CoreResult<()> {
        let mut errors: Vec<CoreError> = Vec::new();
        if let Some(mut conn) = self.connection.take() {
            if conn.in_transaction() {
                if let Err(e) = conn.rollback() {
                    errors.push(e.into());
                }
            }
            conn.finished();
        }
        if let Err(e) = self.release_reservations() {
            errors.push(e);
        }
        if let Err(e) = audit::record_cancel(self.pool.as_ref(), self.id) {
            errors.push(e);
        }
        self.state = TransactionState::Aborted;
        self.session.remove_active_transaction(self.id);
        debug!(tx = %self.id, "transaction rolled back");
        errors.into_iter().next().map_or(Ok(()), Err)
    }

    /// Gives back the counter values taken for created rows.
    fn release_reservations(&self) -> CoreResult<()> {
        let pending: Vec<(&str, &str)> = self
            .live_rows()
            .filter(|r| r.action == Some(Action::Create))
            .flat_map(|r| {
                r.reservations
                    .iter()
                    .map(move |rest| (r.entity.table(), rest.as_str()))
            })
            .collect();
        if pending.is_empty() {
            return Ok(());
        }
        let mut conn = self.pool.query_connection("ac_max_key")?;
        let result = pending.iter().try_for_each(|(table, rest_of_key)| {
            audit::release_counter(conn.as_mut(), table, rest_of_key, self.id).map(|_| ())
        });
        conn.finished();
        trace!(tx = %self.id, count = pending.len(), "counter values released");
        result
    }

    /// Rolls the transaction back and ends it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotActive`] if already ended, or the first error
    /// met while cleaning up; cleanup still completes.
    pub fn cancel(&mut self) -> CoreResult<()> {
        self.ensure_active()?;
        debug!(tx = %self.id, "cancelling transaction");
        self.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::entity::EntityBuilder;
    use crate::field::FieldSpec;
    use crate::registry::TypeRegistry;
    use crate::session::Session;
    use crate::transaction::RowInit;
    use tally_sql::{ConnectionPool, InMemoryDatabase, Statement};

    struct Fixture {
        db: Arc<InMemoryDatabase>,
        registry: Arc<TypeRegistry>,
        session: Arc<Session>,
    }

    impl Fixture {
        fn new() -> Self {
            let mut builder = TypeRegistry::builder();
            builder
                .add_entity(
                    EntityBuilder::new("widget", "Widget")
                        .field(FieldSpec::number("id").auto_generate())
                        .field(FieldSpec::text("name").mandatory())
                        .primary_key(["id"])
                        .transactional(),
                )
                .unwrap();
            let registry = builder.build();
            let db = Arc::new(InMemoryDatabase::new());
            for schema in registry.table_schemas() {
                db.create_table(schema).unwrap();
            }
            Self {
                db,
                registry,
                session: Arc::new(Session::new("t")),
            }
        }

        fn begin(&self) -> Transaction {
            let pool: Arc<dyn ConnectionPool> = self.db.clone();
            Transaction::begin(
                Arc::clone(&self.registry),
                pool,
                Config::default(),
                Arc::clone(&self.session),
            )
            .unwrap()
        }

        fn tx_stat(&self, tx: &Transaction) -> Option<String> {
            let id = tx.id().as_u64().to_string();
            self.db
                .table_rows(audit::TX_TABLE)
                .unwrap()
                .into_iter()
                .find(|r| r["id"].as_deref() == Some(id.as_str()))
                .and_then(|r| r["tx_stat"].clone())
        }
    }

    #[test]
    fn status_reports_validity() {
        let fixture = Fixture::new();
        let mut tx = fixture.begin();
        let row = tx.create_new_row("widget", RowInit::new()).unwrap();
        assert_eq!(tx.status().unwrap(), TransactionStatus::Invalid);
        tx.set(row, "name", "bolt").unwrap();
        assert_eq!(tx.status().unwrap(), TransactionStatus::Valid);
    }

    #[test]
    fn missing_record_aborts_the_save() {
        let fixture = Fixture::new();
        let mut seed = fixture.begin();
        seed.create_new_row("widget", RowInit::new().value("name", "bolt"))
            .unwrap();
        seed.save(None).unwrap();

        let mut tx = fixture.begin();
        let first = tx
            .create_new_row("widget", RowInit::new().value("name", "nut"))
            .unwrap();
        assert_eq!(tx.row(first).unwrap().key(), "2");
        let stored = tx.get_active_row("widget", "1").unwrap();
        tx.set(stored, "name", "washer").unwrap();
        assert!(tx.row(stored).unwrap().is_locked());
        tx.conn()
            .unwrap()
            .execute_update(&Statement::delete("widget").filter("_key", "1"))
            .unwrap();

        let err = tx.save(None).unwrap_err();
        assert!(matches!(err, CoreError::NoDbRecord { ref key, .. } if key == "1"));
        assert_eq!(tx.state(), TransactionState::Aborted);
        assert_eq!(fixture.tx_stat(&tx).as_deref(), Some("C"));
        assert!(fixture.session.active_transactions().is_empty());

        let rows = fixture.db.table_rows("widget").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"].as_deref(), Some("bolt"));
        assert_eq!(fixture.db.row_count("_history_widget").unwrap(), 1);
        assert_eq!(fixture.db.locked_row_count(), 0);

        let mut retry = fixture.begin();
        let row = retry
            .create_new_row("widget", RowInit::new().value("name", "nut"))
            .unwrap();
        assert_eq!(retry.row(row).unwrap().key(), "2");
    }
}
