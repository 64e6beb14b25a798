//! Statements that read and write a row's stored record.

use tally_sql::{ResultRow, Statement};

use super::Row;
use crate::key::{history_table, KEY_COLUMN, TX_COLUMN};
use crate::types::TransactionId;

fn non_blank(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

impl Row {
    /// Stored identity of the row: the saved record key, else the current key.
    fn stored_identity(&self) -> String {
        self.db_record_key
            .clone()
            .unwrap_or_else(|| self.identity_value(&self.key))
    }

    pub(crate) fn select_statement(&self) -> Statement {
        Statement::select(self.entity.table())
            .filter(self.entity.key().identity_column(), self.identity_value(&self.key))
    }

    pub(crate) fn lock_statement(&self) -> Statement {
        let column = if self.entity.is_transactional() {
            TX_COLUMN
        } else {
            self.entity.key().identity_column()
        };
        Statement::select(self.entity.table())
            .column(column)
            .filter(self.entity.key().identity_column(), self.stored_identity())
            .for_update()
    }

    /// Loads field values from a stored record and fixes the key fields.
    pub(crate) fn populate(&mut self, record: &ResultRow<'_>) {
        for def in self.entity.field_defs() {
            let value = record.get(def.id()).unwrap_or_default();
            if let Ok(field) = self.fields.get_field_mut(def.id()) {
                field.set_initial(value);
            }
        }
        if self.entity.is_transactional() {
            self.curr_tx = record.get(TX_COLUMN).map(str::to_string);
        }
        for part in self.entity.key().parts() {
            if let Ok(field) = self.fields.get_field_mut(&part.field_id) {
                field.fix_key();
            }
        }
        self.key = self.entity.key().compose(&self.fields);
        self.db_record_key = Some(self.identity_value(&self.key));
    }

    pub(crate) fn insert_statement(&self, tx: TransactionId, key: &str) -> Statement {
        let mut statement = Statement::insert(self.entity.table()).value(KEY_COLUMN, key);
        if self.entity.is_transactional() {
            statement = statement.value(TX_COLUMN, tx.as_u64().to_string());
        }
        for field in self.fields.fields() {
            statement = statement.value_opt(field.id(), non_blank(field.get()));
        }
        statement
    }

    /// Builds the update for a stored record.
    ///
    /// With `all_columns` every field is written, otherwise only modified
    /// fields. Returns `None` when there is nothing to write.
    pub(crate) fn update_statement(&self, tx: TransactionId, all_columns: bool) -> Option<Statement> {
        let mut statement = Statement::update(self.entity.table());
        let mut changed = false;
        if all_columns {
            statement = statement.set(KEY_COLUMN, self.key.clone());
        }
        for field in self.fields.fields() {
            if all_columns || field.is_modified() {
                statement = statement.set_opt(field.id(), non_blank(field.get()));
                changed = true;
            }
        }
        if !changed {
            return None;
        }
        if self.entity.is_transactional() {
            statement = statement.set(TX_COLUMN, tx.as_u64().to_string());
        }
        Some(statement.filter(self.entity.key().identity_column(), self.stored_identity()))
    }

    pub(crate) fn delete_statement(&self) -> Statement {
        Statement::delete(self.entity.table())
            .filter(self.entity.key().identity_column(), self.stored_identity())
    }

    pub(crate) fn history_statement(&self, tx: TransactionId) -> Statement {
        let mut statement = Statement::replace(history_table(self.entity.table()))
            .value(TX_COLUMN, tx.as_u64().to_string())
            .value(KEY_COLUMN, self.key.clone());
        for field in self.fields.fields() {
            statement = statement.value_opt(field.id(), non_blank(field.get()));
        }
        statement
    }

    pub(crate) fn key_count_statement(&self, key: &str) -> Statement {
        Statement::count(self.entity.table()).filter(KEY_COLUMN, key)
    }
}
