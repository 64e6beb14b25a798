//! Mutable row handles.

use super::Transaction;
use crate::error::CoreResult;
use crate::row::Row;
use crate::types::RowId;

/// A row borrowed mutably through its transaction.
///
/// Hooks receive one of these; callers get one from
/// [`Transaction::row_mut`]. Every change goes through the transaction so
/// locking, re-keying and cache moves stay consistent.
#[derive(Debug)]
pub struct RowMut<'t> {
    tx: &'t mut Transaction,
    id: RowId,
}

impl<'t> RowMut<'t> {
    pub(crate) fn new(tx: &'t mut Transaction, id: RowId) -> Self {
        Self { tx, id }
    }

    /// Returns the row's handle.
    #[must_use]
    pub fn id(&self) -> RowId {
        self.id
    }

    /// Returns the row.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownRow`](crate::CoreError::UnknownRow) if the
    /// row was removed.
    pub fn row(&self) -> CoreResult<&Row> {
        self.tx.row(self.id)
    }

    /// Returns a field value.
    ///
    /// # Errors
    ///
    /// Returns an error if the row or field is unknown.
    pub fn get(&self, field: &str) -> CoreResult<String> {
        self.tx.get(self.id, field).map(str::to_string)
    }

    /// Returns the key; empty while incomplete.
    ///
    /// # Errors
    ///
    /// Returns an error if the row was removed.
    pub fn key(&self) -> CoreResult<String> {
        Ok(self.row()?.key().to_string())
    }

    /// Changes a field. Returns true if the value changed.
    ///
    /// # Errors
    ///
    /// Fails as [`Transaction::set`] does.
    pub fn set(&mut self, field: &str, value: &str) -> CoreResult<bool> {
        self.tx.set_field(self.id, field, value)
    }

    /// Sets the key fields from a key string.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidKey`](crate::CoreError::InvalidKey) for a
    /// malformed key, or fails as [`Transaction::set`] does.
    pub fn populate_from_key(&mut self, key: &str) -> CoreResult<()> {
        let values = self.row()?.entity.key().split(key)?;
        for (field, value) in values {
            self.set(&field, &value)?;
        }
        Ok(())
    }

    /// Marks or unmarks the row for deletion.
    ///
    /// # Errors
    ///
    /// Fails as [`Transaction::set_delete`] does.
    pub fn set_delete(&mut self, deleting: bool) -> CoreResult<()> {
        self.tx.set_delete(self.id, deleting)
    }

    /// Adds an error to the row, making its transaction invalid.
    ///
    /// # Errors
    ///
    /// Returns an error if the row was removed.
    pub fn add_error(&mut self, text: impl Into<String>) -> CoreResult<()> {
        self.tx.row_state(self.id)?.messages.error(text);
        Ok(())
    }

    /// Adds a warning to the row.
    ///
    /// # Errors
    ///
    /// Returns an error if the row was removed.
    pub fn add_warning(&mut self, text: impl Into<String>) -> CoreResult<()> {
        self.tx.row_state(self.id)?.messages.warning(text);
        Ok(())
    }

    /// Links the row to a parent row.
    ///
    /// # Errors
    ///
    /// Fails as [`Transaction::link_to_parent`] does.
    pub fn link_to_parent(&mut self, parent: RowId) -> CoreResult<()> {
        self.tx.link_to_parent(self.id, parent)
    }

    /// Locks the row's stored record.
    ///
    /// # Errors
    ///
    /// Fails as [`Transaction::lock`] does.
    pub fn lock(&mut self) -> CoreResult<bool> {
        self.tx.lock(self.id)
    }

    /// Returns true if every field of the row is valid and the row has no
    /// errors.
    ///
    /// # Errors
    ///
    /// Returns an error only if a validation lookup fails.
    pub fn is_valid(&mut self) -> CoreResult<bool> {
        let (row, mut ctx) = self.tx.split(self.id)?;
        let valid = row.fields.is_valid(false, None, &mut ctx)?;
        Ok(valid && !row.messages.has_errors())
    }

    /// Re-checks a conflicting key and runs the row's update hooks.
    ///
    /// # Errors
    ///
    /// Returns any re-keying or hook error.
    pub fn update(&mut self) -> CoreResult<()> {
        self.tx.update_row(self.id)
    }

    /// Returns the transaction, for work on other rows.
    pub fn transaction(&mut self) -> &mut Transaction {
        &mut *self.tx
    }
}
