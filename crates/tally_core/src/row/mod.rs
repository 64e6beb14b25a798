//! Entity rows.
//!
//! A [`Row`] is a field set bound to an entity, a key and a persistence
//! lifecycle. Rows live in their transaction's arena; callers address them
//! by [`RowId`] and mutate them through the transaction.

mod persist;

use std::sync::Arc;

use crate::entity::EntityDef;
use crate::error::CoreResult;
use crate::field::Field;
use crate::fieldset::FieldSet;
use crate::message::MessageList;
use crate::types::{Action, RowId};

/// The parent row a child row takes its link field value from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ParentLink {
    pub(crate) row: RowId,
    pub(crate) link_field: String,
}

/// An instance of an entity within a transaction.
#[derive(Debug)]
pub struct Row {
    pub(crate) entity: Arc<EntityDef>,
    pub(crate) row_id: RowId,
    pub(crate) fields: FieldSet,
    pub(crate) key: String,
    pub(crate) db_record_key: Option<String>,
    pub(crate) exists_in_db: bool,
    pub(crate) locked: bool,
    pub(crate) action: Option<Action>,
    pub(crate) curr_tx: Option<String>,
    pub(crate) messages: MessageList,
    pub(crate) parent: Option<ParentLink>,
    /// Key scopes this row took a counter value from.
    pub(crate) reservations: Vec<String>,
    pub(crate) presave_called: bool,
    pub(crate) saved: bool,
}

impl Row {
    pub(crate) fn new(entity: Arc<EntityDef>, row_id: RowId) -> Self {
        let fields = FieldSet::from_defs(entity.field_defs());
        Self {
            entity,
            row_id,
            fields,
            key: String::new(),
            db_record_key: None,
            exists_in_db: false,
            locked: false,
            action: None,
            curr_tx: None,
            messages: MessageList::new(),
            parent: None,
            reservations: Vec::new(),
            presave_called: false,
            saved: false,
        }
    }

    /// Returns the entity definition.
    #[must_use]
    pub fn entity(&self) -> &Arc<EntityDef> {
        &self.entity
    }

    /// Returns the entity id.
    #[must_use]
    pub fn entity_id(&self) -> &str {
        self.entity.id()
    }

    /// Returns the row's handle.
    #[must_use]
    pub fn row_id(&self) -> RowId {
        self.row_id
    }

    /// Returns the key; empty until the key is complete.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns true if the key is complete.
    #[must_use]
    pub fn is_full_key(&self) -> bool {
        self.entity.key().is_complete(&self.key)
    }

    /// Returns true if storage holds a record for this row.
    #[must_use]
    pub fn exists_in_db(&self) -> bool {
        self.exists_in_db
    }

    /// Returns true if this transaction holds the row lock.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Returns what saving the row does or did.
    #[must_use]
    pub fn action(&self) -> Option<Action> {
        self.action
    }

    /// Returns the id of the transaction that last wrote the stored record.
    #[must_use]
    pub fn curr_tx(&self) -> Option<&str> {
        self.curr_tx.as_deref()
    }

    /// Returns the parent row, if linked.
    #[must_use]
    pub fn parent(&self) -> Option<RowId> {
        self.parent.as_ref().map(|p| p.row)
    }

    /// Returns true once the row has been persisted by a save.
    #[must_use]
    pub fn is_saved(&self) -> bool {
        self.saved
    }

    /// Returns a field value.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownField`](crate::CoreError::UnknownField) if absent.
    pub fn get(&self, field: &str) -> CoreResult<&str> {
        self.fields.get(field)
    }

    /// Returns a field.
    #[must_use]
    pub fn field(&self, id: &str) -> Option<&Field> {
        self.fields.field(id)
    }

    /// Returns the row's field set.
    #[must_use]
    pub fn fields(&self) -> &FieldSet {
        &self.fields
    }

    /// Returns true if any field was changed or the row was marked for deletion.
    #[must_use]
    pub fn is_modified(&self) -> bool {
        self.fields.is_modified()
    }

    /// Returns true if fields may still change.
    #[must_use]
    pub fn is_modifiable(&self) -> bool {
        self.fields.is_modifiable()
    }

    /// Returns true if the row is marked for deletion.
    #[must_use]
    pub fn is_deleting(&self) -> bool {
        self.fields.is_deleting()
    }

    /// Returns row-level messages, such as lock failures and key conflicts.
    #[must_use]
    pub fn messages(&self) -> &MessageList {
        &self.messages
    }

    /// Returns true if the field is part of the key.
    #[must_use]
    pub fn is_key_field(&self, field: &str) -> bool {
        self.entity.key().is_key_field(field)
    }

    /// Returns the number of pieces in a full key of this row.
    #[must_use]
    pub fn key_pieces(&self) -> usize {
        self.entity.key().pieces()
    }

    /// Returns the maximum key length of this row.
    #[must_use]
    pub fn key_length(&self) -> usize {
        self.entity.key().length()
    }

    /// Returns the row's display label.
    #[must_use]
    pub fn label(&self) -> String {
        self.entity.label_for(&self.key, |id| {
            self.fields.field(id).map(|f| f.get().to_string())
        })
    }

    /// Returns `entity:key`, or `entity:row:n` while the key is incomplete.
    #[must_use]
    pub fn describe(&self) -> String {
        if self.key.is_empty() {
            format!("{}:{}", self.entity.id(), self.row_id)
        } else {
            format!("{}:{}", self.entity.id(), self.key)
        }
    }

    /// Returns the value storage identifies this row by.
    pub(crate) fn identity_value(&self, key: &str) -> String {
        match &self.entity.key().auto_increment_column {
            Some(column) => self.fields.get(column).unwrap_or_default().to_string(),
            None => key.to_string(),
        }
    }

    /// Returns every error text on the row and its fields.
    pub(crate) fn error_texts(&self, fully_identify: bool) -> Vec<String> {
        let prefix = if fully_identify {
            format!("{} {}: ", self.entity.title(), self.label())
        } else {
            String::new()
        };
        let mut texts: Vec<String> = self
            .messages
            .iter()
            .filter(|m| m.kind == crate::message::MessageKind::Error)
            .map(|m| format!("{prefix}{}", m.text))
            .collect();
        for field in self.fields.fields() {
            for message in field.messages().iter() {
                if message.kind == crate::message::MessageKind::Error {
                    texts.push(format!("{prefix}{}: {}", field.label(), message.text));
                }
            }
        }
        texts
    }
}
