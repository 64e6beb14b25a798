//! Primary keys: composition, shape checks and table layouts.
//!
//! A key string joins the values of an entity's key fields with `.`. A
//! reference key field contributes as many pieces as the key of the entity
//! it points at.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tally_sql::TableSchema;

use crate::entity::EntityDef;
use crate::error::{CoreError, CoreResult};
use crate::fieldset::FieldSet;

/// Key piece separator.
pub const KEY_SEPARATOR: char = '.';

/// Column holding each row's key string.
pub const KEY_COLUMN: &str = "_key";

/// Column holding the id of the transaction that last wrote the row.
pub const TX_COLUMN: &str = "_tx";

/// Prefix of history table names.
pub const HISTORY_PREFIX: &str = "_history_";

static KEY_PIECE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("key piece pattern compiles"));

/// How the generated key field of an entity gets its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyAllocation {
    /// A per-scope counter row, reserved in a side transaction.
    Counter,
    /// One more than the highest value visible, claimed by inserting a
    /// placeholder row, retried on conflict.
    MaxScan,
    /// The storage auto-increment column of a single-field key.
    AutoIncrement,
}

/// One field of a primary key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPart {
    /// The key field.
    pub field_id: String,
    /// Key pieces the field contributes.
    pub pieces: usize,
    /// Whether key generation fills the field.
    pub auto_generate: bool,
}

/// Primary key layout of an entity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyDef {
    pub(crate) parts: Vec<KeyPart>,
    pub(crate) pieces: usize,
    pub(crate) length: usize,
    pub(crate) auto_increment_column: Option<String>,
}

impl KeyDef {
    /// Returns the key fields in order.
    #[must_use]
    pub fn parts(&self) -> &[KeyPart] {
        &self.parts
    }

    /// Returns the number of pieces a full key has.
    #[must_use]
    pub fn pieces(&self) -> usize {
        self.pieces
    }

    /// Returns the maximum key string length.
    #[must_use]
    pub fn length(&self) -> usize {
        self.length
    }

    /// Returns true if the field is part of the key.
    #[must_use]
    pub fn is_key_field(&self, field_id: &str) -> bool {
        self.parts.iter().any(|p| p.field_id == field_id)
    }

    /// Returns the generated key field, if any.
    #[must_use]
    pub fn auto_field(&self) -> Option<&KeyPart> {
        self.parts.iter().find(|p| p.auto_generate)
    }

    /// Returns the column storage identifies rows by.
    #[must_use]
    pub fn identity_column(&self) -> &str {
        self.auto_increment_column.as_deref().unwrap_or(KEY_COLUMN)
    }

    /// Checks the shape of a key string.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidKey`] if the key is blank, has the wrong
    /// number of pieces, or has a blank or ill-formed piece.
    pub fn check_key(&self, key: &str) -> CoreResult<()> {
        if key.is_empty() {
            return Err(CoreError::invalid_key(key, "key must be nonblank string"));
        }
        let pieces: Vec<&str> = key.split(KEY_SEPARATOR).collect();
        if pieces.len() != self.pieces {
            return Err(CoreError::invalid_key(key, "wrong number of key pieces"));
        }
        for piece in pieces {
            if piece.is_empty() {
                return Err(CoreError::invalid_key(key, "key piece is blank"));
            }
            if !KEY_PIECE.is_match(piece) {
                return Err(CoreError::invalid_key(key, "invalid character in key string"));
            }
        }
        Ok(())
    }

    /// Returns true if the key string is complete and well formed.
    #[must_use]
    pub fn is_complete(&self, key: &str) -> bool {
        self.check_key(key).is_ok()
    }

    /// Joins the key field values of a field set.
    #[must_use]
    pub fn compose(&self, fields: &FieldSet) -> String {
        self.parts
            .iter()
            .map(|p| fields.get(&p.field_id).unwrap_or_default())
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Splits a key string into `(field id, value)` pairs.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidKey`] if the key is malformed.
    pub fn split(&self, key: &str) -> CoreResult<Vec<(String, String)>> {
        self.check_key(key)?;
        let pieces: Vec<&str> = key.split(KEY_SEPARATOR).collect();
        let mut start = 0;
        let mut values = Vec::with_capacity(self.parts.len());
        for part in &self.parts {
            let end = start + part.pieces;
            values.push((part.field_id.clone(), pieces[start..end].join(".")));
            start = end;
        }
        Ok(values)
    }
}

/// Returns the main table layout of an entity.
///
/// Columns are `_key`, `_tx` for transactional entities, then the fields.
#[must_use]
pub fn table_schema(entity: &EntityDef) -> TableSchema {
    let mut schema = TableSchema::new(entity.table())
        .column(KEY_COLUMN, format!("CHAR({})", entity.key().length().max(1)));
    if entity.is_transactional() {
        schema = schema.column(TX_COLUMN, "INT");
    }
    for def in entity.field_defs() {
        schema = schema.column(def.id(), def.sql_type());
    }
    if let Some(column) = &entity.key().auto_increment_column {
        schema = schema.auto_increment(column.clone());
    }
    schema.unique([entity.key().identity_column()])
}

/// Returns the history table layout of a transactional entity.
///
/// One row per (transaction, key) holds the image the transaction wrote.
#[must_use]
pub fn history_schema(entity: &EntityDef) -> TableSchema {
    let mut schema = TableSchema::new(history_table(entity.table()))
        .column(TX_COLUMN, "INT")
        .column(KEY_COLUMN, format!("CHAR({})", entity.key().length().max(1)));
    for def in entity.field_defs() {
        schema = schema.column(def.id(), def.sql_type());
    }
    schema.unique([TX_COLUMN, KEY_COLUMN])
}

/// Returns the history table name for a table.
#[must_use]
pub fn history_table(table: &str) -> String {
    format!("{HISTORY_PREFIX}{table}")
}
