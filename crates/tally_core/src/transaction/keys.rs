//! Field changes, row locks and key maintenance.

use std::sync::Arc;
use tracing::{debug, trace, warn};

use tally_sql::Statement;

use super::{RowMut, Transaction};
use crate::audit::{self, CounterRequest};
use crate::entity::EntityDef;
use crate::error::{CoreError, CoreResult};
use crate::key::{KeyAllocation, KEY_COLUMN, TX_COLUMN};
use crate::message::MessageTag;
use crate::types::{Action, RowId};

const LOCK_FAILURE: &str = "record has been updated by another user, please cancel and try again";

impl Transaction {
    /// Returns how keys of this entity are generated.
    pub(crate) fn allocation(&self, entity: &EntityDef) -> KeyAllocation {
        match entity.allocation() {
            Some(allocation) => allocation,
            None if self.config.key_allocation == KeyAllocation::AutoIncrement => {
                KeyAllocation::Counter
            }
            None => self.config.key_allocation,
        }
    }

    pub(crate) fn set_field(&mut self, id: RowId, field: &str, value: &str) -> CoreResult<bool> {
        let row = self.row(id)?;
        let prepared = row.fields.prepare_change(field, value)?;
        self.ensure_active()?;
        let Some(value) = prepared else {
            if self.config.relock_on_unchanged_set {
                self.lock_if_needed(id, Some(field))?;
            }
            return Ok(false);
        };
        let is_key = row.is_key_field(field);
        if is_key && row.exists_in_db {
            return Err(CoreError::FixedKey {
                field: field.to_string(),
            });
        }
        if is_key && value.is_empty() && row.is_full_key() {
            return Err(CoreError::invalid_operation(format!(
                "key field {field} of {} cannot be cleared",
                row.describe()
            )));
        }
        let entity = Arc::clone(&row.entity);
        for veto in &entity.hooks.before_field_change {
            veto(row, field, &value)?;
        }

        self.lock_if_needed(id, Some(field))?;
        let fields = &self.row(id)?.fields;
        let before = (
            fields.get_field(field)?.clone(),
            fields.is_modified(),
            self.modified,
        );
        let row = self.row_state(id)?;
        let old = row.fields.commit_change(field, value)?;
        row.fields.touch();
        self.modified = true;
        trace!(row = %id, field, old = %old, "field set");

        if is_key {
            let (row, mut ctx) = self.split(id)?;
            let target = row.fields.get_field_mut(field)?;
            target.validate(&mut ctx)?;
            if !target.messages().has_errors() {
                if let Err(e) = self.key_change(id, field) {
                    if matches!(e, CoreError::DuplicateKeyInCache { .. }) {
                        let (saved, set_modified, tx_modified) = before;
                        self.row_state(id)?.fields.restore_field(saved, set_modified)?;
                        self.modified = tx_modified;
                    }
                    return Err(e);
                }
            }
        }
        for hook in &entity.hooks.after_field_change {
            hook(&mut RowMut::new(self, id), field, &old)?;
        }
        Ok(true)
    }

    /// Locks the stored record of a row.
    ///
    /// Returns false, with a message on the row, if the record has changed
    /// since it was read or another transaction holds it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if the row has no stored record.
    pub fn lock(&mut self, id: RowId) -> CoreResult<bool> {
        self.ensure_active()?;
        self.lock_row(id, None)
    }

    /// Locks a loaded row before its first change.
    pub(crate) fn lock_if_needed(&mut self, id: RowId, field: Option<&str>) -> CoreResult<bool> {
        let row = self.row(id)?;
        if row.exists_in_db && row.action == Some(Action::Update) && !row.locked {
            self.lock_row(id, field)
        } else {
            Ok(row.locked)
        }
    }

    fn lock_row(&mut self, id: RowId, field: Option<&str>) -> CoreResult<bool> {
        let row = self.row(id)?;
        if !row.exists_in_db {
            return Err(CoreError::invalid_operation(format!(
                "cannot lock {}: no stored record",
                row.describe()
            )));
        }
        if row.locked {
            return Ok(true);
        }
        let statement = row.lock_statement();
        let transactional = row.entity.is_transactional();
        let curr_tx = row.curr_tx.clone();
        let outcome = self.conn()?.execute_query(&statement);
        let locked = match outcome {
            Ok(result) => result.first().is_some_and(|record| {
                !transactional || record.get(TX_COLUMN) == curr_tx.as_deref()
            }),
            Err(e) if e.is_lock_wait_timeout() => false,
            Err(e) => return Err(e.into()),
        };
        let tx = self.id;
        let row = self.row_state(id)?;
        if locked {
            row.locked = true;
            row.messages.remove_tagged(MessageTag::LockFailure);
            trace!(tx = %tx, row = %id, "row locked");
        } else {
            row.messages
                .set_tagged(MessageTag::LockFailure, field, LOCK_FAILURE);
            warn!(tx = %tx, row = %row.describe(), "row lock failed");
        }
        Ok(locked)
    }

    /// Re-keys a row after one of its key fields changed.
    pub(crate) fn key_change(&mut self, id: RowId, field: &str) -> CoreResult<()> {
        let row = self.row(id)?;
        let entity = Arc::clone(&row.entity);
        if row.exists_in_db {
            return Err(CoreError::invalid_operation(format!(
                "key of stored row {} cannot change",
                row.describe()
            )));
        }
        let new_key = entity.key().compose(&row.fields);
        let prev_key = row.key.clone();
        if !entity.key().is_complete(&new_key) {
            self.generate_key(id)?;
            return Ok(());
        }
        match self.cache.lookup(entity.id(), &new_key) {
            Some(other) if other == id => return Ok(()),
            Some(_) => {
                return Err(CoreError::DuplicateKeyInCache {
                    entity: entity.id().to_string(),
                    key: new_key,
                })
            }
            None => {}
        }

        let duplicate = if self.allocation(&entity) == KeyAllocation::Counter {
            let statement = row.key_count_statement(&new_key);
            self.conn()?
                .execute_query(&statement)?
                .scalar_int()
                .unwrap_or(0)
                > 0
        } else {
            let statement = row.insert_statement(self.id, &new_key);
            let outcome = self.conn()?.execute_update(&statement);
            match outcome {
                Ok(_) => {
                    let row = self.row_state(id)?;
                    row.exists_in_db = true;
                    row.db_record_key = Some(row.identity_value(&new_key));
                    false
                }
                Err(e) if e.is_duplicate_key() => true,
                Err(e) => return Err(e.into()),
            }
        };

        let row = self.row_state(id)?;
        if duplicate {
            row.messages.set_tagged(
                MessageTag::DuplicateKey,
                Some(field),
                format!("key value conflicts with another record: {new_key}"),
            );
            debug!(row = %id, key = %new_key, "key conflicts with stored record");
            return Ok(());
        }
        row.messages.remove_tagged(MessageTag::DuplicateKey);
        row.key = new_key;
        self.add_to_cache(id, (!prev_key.is_empty()).then_some(prev_key))
    }

    /// Fills a blank generated key field once the other key fields are set.
    ///
    /// Returns true if a value was generated.
    pub(crate) fn generate_key(&mut self, id: RowId) -> CoreResult<bool> {
        let row = self.row(id)?;
        let entity = Arc::clone(&row.entity);
        let Some(auto) = entity.key().auto_field() else {
            return Ok(false);
        };
        if !row.fields.get(&auto.field_id)?.is_empty() {
            return Ok(false);
        }
        let mut rest_of_key = String::new();
        let mut conditions = Vec::new();
        for part in entity.key().parts().iter().filter(|p| !p.auto_generate) {
            let value = row.fields.get(&part.field_id)?;
            if value.is_empty() {
                return Ok(false);
            }
            rest_of_key.push_str(value);
            rest_of_key.push('|');
            conditions.push((part.field_id.clone(), value.to_string()));
        }

        let allocation = self.allocation(&entity);
        if allocation == KeyAllocation::AutoIncrement && entity.key().parts().len() == 1 {
            self.insert_auto_increment(id)?;
            return Ok(true);
        }

        let attempts = self.config.key_generation_attempts.max(1);
        let mut floor = 0;
        for attempt in 1..=attempts {
            let value = if allocation == KeyAllocation::Counter {
                let request = CounterRequest {
                    table: entity.table(),
                    rest_of_key: &rest_of_key,
                    column: &auto.field_id,
                    conditions: &conditions,
                    tx: self.id,
                };
                let value = audit::allocate_counter(self.pool.as_ref(), &request, attempts)?;
                self.row_state(id)?.reservations.push(rest_of_key.clone());
                value
            } else {
                let mut statement = Statement::max(entity.table(), auto.field_id.clone());
                for (column, value) in &conditions {
                    statement = statement.filter(column.clone(), value.clone());
                }
                let mut conn = self.pool.uncommitted_connection("max_scan")?;
                let outcome = conn.execute_query(&statement);
                conn.finished();
                outcome?.scalar_int().unwrap_or(0).max(floor) + 1
            };
            self.set_field(id, &auto.field_id, &value.to_string())?;
            if allocation == KeyAllocation::Counter
                || !self.row(id)?.messages.has_tag(MessageTag::DuplicateKey)
            {
                debug!(row = %id, field = %auto.field_id, value, "key generated");
                return Ok(true);
            }
            debug!(row = %id, value, attempt, "generated key taken, retrying");
            floor = value;
        }
        Ok(true)
    }

    /// Inserts a row's record so storage assigns its identity column.
    fn insert_auto_increment(&mut self, id: RowId) -> CoreResult<()> {
        let row = self.row(id)?;
        let entity = Arc::clone(&row.entity);
        let Some(column) = entity.key().auto_increment_column.clone() else {
            return Err(CoreError::invalid_definition(format!(
                "{} has no auto-increment column",
                entity.id()
            )));
        };
        let statement = row.insert_statement(self.id, "");
        let conn = self.conn()?;
        conn.execute_update(&statement)?;
        let value = conn
            .last_insert_id()
            .ok_or_else(|| CoreError::invalid_operation("no id returned for auto-increment row"))?
            .to_string();

        let row = self.row_state(id)?;
        row.fields.get_field_mut(&column)?.set_initial(&value);
        row.exists_in_db = true;
        row.db_record_key = Some(value.clone());
        row.key = entity.key().compose(&row.fields);
        let key = row.key.clone();
        self.add_to_cache(id, None)?;
        self.conn()?.execute_update(
            &Statement::update(entity.table())
                .set(KEY_COLUMN, key)
                .filter(column, value),
        )?;
        debug!(row = %id, key = self.row(id)?.key(), "identity assigned by storage");
        Ok(())
    }

    /// Files a full-key row in the cache and hands its key to linked children.
    pub(crate) fn add_to_cache(&mut self, id: RowId, prev_key: Option<String>) -> CoreResult<()> {
        let row = self.row(id)?;
        let entity = row.entity_id().to_string();
        let key = row.key.clone();
        row.entity.key().check_key(&key)?;
        if self.cache.lookup(&entity, &key).is_some_and(|other| other != id) {
            return Err(CoreError::AlreadyCached { entity, key });
        }
        self.cache.remove_partial(id);
        if let Some(prev) = prev_key {
            if self.cache.lookup(&entity, &prev) == Some(id) {
                self.cache.remove_key(&entity, &prev);
            }
        }
        self.cache.insert(&entity, &key, id);
        trace!(row = %id, entity = %entity, key = %key, "row cached");

        let children: Vec<(RowId, String)> = self
            .cache
            .full_rows()
            .into_iter()
            .chain(self.cache.partial_rows().iter().copied())
            .filter_map(|child| {
                let link = self.row(child).ok()?.parent.as_ref()?;
                (link.row == id).then(|| (child, link.link_field.clone()))
            })
            .collect();
        for (child, link_field) in children {
            if self.row(child)?.get(&link_field)? != key {
                self.set_field(child, &link_field, &key)?;
            }
        }
        Ok(())
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
    use tally_sql::{ConnectionPool, InMemoryDatabase};

    fn setup(allocation: KeyAllocation) -> (Arc<InMemoryDatabase>, Transaction) {
        let mut builder = TypeRegistry::builder();
        builder
            .add_entity(
                EntityBuilder::new("widget", "Widget")
                    .field(FieldSpec::number("id").auto_generate())
                    .field(FieldSpec::text("name").mandatory())
                    .primary_key(["id"])
                    .transactional()
                    .allocation(allocation),
            )
            .unwrap();
        let registry = builder.build();
        let db = Arc::new(InMemoryDatabase::new());
        for schema in registry.table_schemas() {
            db.create_table(schema).unwrap();
        }
        let pool: Arc<dyn ConnectionPool> = db.clone();
        let tx = Transaction::begin(registry, pool, Config::default(), Arc::new(Session::new("t")))
            .unwrap();
        (db, tx)
    }

    #[test]
    fn counter_keys_are_cached() {
        let (_db, mut tx) = setup(KeyAllocation::Counter);
        let first = tx.create_new_row("widget", RowInit::new()).unwrap();
        let second = tx.create_new_row("widget", RowInit::new()).unwrap();
        assert_eq!(tx.row(first).unwrap().key(), "1");
        assert_eq!(tx.row(second).unwrap().key(), "2");
        assert!(tx.is_in_cache("widget", "2"));
        assert_eq!(tx.row(first).unwrap().reservations, vec![String::new()]);
        assert!(!tx.row(first).unwrap().exists_in_db());
    }

    #[test]
    fn max_scan_inserts_placeholder() {
        let (_db, mut tx) = setup(KeyAllocation::MaxScan);
        let row = tx.create_new_row("widget", RowInit::new()).unwrap();
        let row = tx.row(row).unwrap();
        assert_eq!(row.key(), "1");
        assert!(row.exists_in_db());
        assert_eq!(row.action(), Some(Action::Create));
    }

    #[test]
    fn max_scan_skips_values_taken_by_others() {
        let (db, mut tx) = setup(KeyAllocation::MaxScan);
        let mut other = db.trans_connection("other").unwrap();
        other
            .execute_update(&Statement::insert("widget").value("_key", "1").value("id", "1"))
            .unwrap();

        let row = tx.create_new_row("widget", RowInit::new()).unwrap();
        assert_eq!(tx.row(row).unwrap().key(), "2");
        assert!(!tx.row(row).unwrap().messages().has_tag(MessageTag::DuplicateKey));
    }

    #[test]
    fn duplicate_key_in_transaction_is_rejected() {
        let (_db, mut tx) = setup(KeyAllocation::Counter);
        tx.create_new_row("widget", RowInit::new()).unwrap();
        let second = tx.create_new_row("widget", RowInit::new()).unwrap();
        let err = tx.set(second, "id", "1").unwrap_err();
        assert!(matches!(err, CoreError::DuplicateKeyInCache { .. }));
    }

    #[test]
    fn refused_key_change_keeps_the_old_key() {
        let (db, mut tx) = setup(KeyAllocation::Counter);
        let first = tx.create_new_row("widget", RowInit::new()).unwrap();
        let second = tx.create_new_row("widget", RowInit::new()).unwrap();
        assert!(tx.set(second, "id", "1").is_err());
        assert_eq!(tx.get(second, "id").unwrap(), "2");
        assert_eq!(tx.row(second).unwrap().key(), "2");

        tx.set(first, "name", "bolt").unwrap();
        tx.set(second, "name", "nut").unwrap();
        tx.save(None).unwrap();
        let stored: Vec<(Option<String>, Option<String>)> = db
            .table_rows("widget")
            .unwrap()
            .into_iter()
            .map(|r| (r["_key"].clone(), r["id"].clone()))
            .collect();
        assert_eq!(
            stored,
            vec![
                (Some("1".to_string()), Some("1".to_string())),
                (Some("2".to_string()), Some("2".to_string())),
            ]
        );
    }

    #[test]
    fn lock_needs_stored_record() {
        let (_db, mut tx) = setup(KeyAllocation::Counter);
        let row = tx.create_new_row("widget", RowInit::new()).unwrap();
        assert!(matches!(tx.lock(row), Err(CoreError::InvalidOperation { .. })));
    }
}
