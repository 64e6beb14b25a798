//! Error types for Tally core.

use crate::types::{RowId, TransactionId};
use tally_sql::SqlError;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in Tally core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// SQL collaborator error with no domain-level recovery.
    #[error("sql error: {0}")]
    Sql(#[from] SqlError),

    /// A field change was attempted on a set that is not modifiable.
    #[error("fieldset not modifiable: {field}")]
    NotModifiable {
        /// The field being changed.
        field: String,
    },

    /// A primary-key field was changed after the key became fixed.
    #[error("trying to change fixed key field: {field}")]
    FixedKey {
        /// The key field.
        field: String,
    },

    /// An id was reused within a field set or registry.
    #[error("duplicate id: {id}")]
    DuplicateId {
        /// The reused id.
        id: String,
    },

    /// A field type name is not registered.
    #[error("unknown field type: {type_name}")]
    UnknownType {
        /// The unregistered type.
        type_name: String,
    },

    /// An entity id is not registered.
    #[error("unknown entity: {entity}")]
    UnknownEntity {
        /// The requested entity.
        entity: String,
    },

    /// A field id does not exist in its owner.
    #[error("unknown field {field} in {owner}")]
    UnknownField {
        /// Entity or field set searched.
        owner: String,
        /// The requested field.
        field: String,
    },

    /// A row id does not belong to this transaction, or the row was removed.
    #[error("unknown row: {row}")]
    UnknownRow {
        /// The requested row.
        row: RowId,
    },

    /// A field's regex pattern does not compile.
    #[error("invalid pattern for field {field}: {message}")]
    InvalidPattern {
        /// The field declaring the pattern.
        field: String,
        /// Compiler message.
        message: String,
    },

    /// A key string does not have the shape its entity requires.
    #[error("invalid key '{key}': {reason}")]
    InvalidKey {
        /// The rejected key.
        key: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A re-key targets a key already held by another row in the transaction.
    #[error("key already in cache: {entity}:{key}")]
    DuplicateKeyInCache {
        /// Entity of the row.
        entity: String,
        /// The contested key.
        key: String,
    },

    /// The (entity, key) cache slot is already occupied.
    #[error("id already present in cache: {entity}:{key}")]
    AlreadyCached {
        /// Entity of the row.
        entity: String,
        /// The occupied key.
        key: String,
    },

    /// An invalid row reached persistence.
    #[error("cannot save invalid record: {entity}:{key}: {}", messages.join("; "))]
    InvalidRecord {
        /// Entity of the row.
        entity: String,
        /// Key of the row.
        key: String,
        /// The row's outstanding messages.
        messages: Vec<String>,
    },

    /// An update was persisted for a row missing from storage.
    #[error("cannot save db record non-existent: {entity}:{key}")]
    NoDbRecord {
        /// Entity of the row.
        entity: String,
        /// Key of the row.
        key: String,
    },

    /// `presave` was called a second time.
    #[error("presave already called")]
    AlreadyPresaved,

    /// `save` was called on an unmodified transaction.
    #[error("transaction not modified so won't save")]
    NotModified,

    /// `save` refused an invalid transaction.
    #[error("transaction invalid: {}", messages.join("; "))]
    Invalid {
        /// Every outstanding error message.
        messages: Vec<String>,
    },

    /// The transaction has been saved or cancelled.
    #[error("transaction not active: {id}")]
    NotActive {
        /// The transaction.
        id: TransactionId,
    },

    /// A row could not be read or locked because another transaction holds it.
    #[error("record locked: {entity}:{key}")]
    RecordLocked {
        /// Entity of the row.
        entity: String,
        /// Key of the row.
        key: String,
    },

    /// The requested key is absent from storage.
    #[error("record not found: {entity}:{key}")]
    NotFound {
        /// Entity searched.
        entity: String,
        /// The missing key.
        key: String,
    },

    /// A before-change observer rejected a field change.
    #[error("change to {field} rejected: {reason}")]
    Vetoed {
        /// The field being changed.
        field: String,
        /// Why the change was rejected.
        reason: String,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// An entity or field definition is inconsistent.
    #[error("invalid definition: {message}")]
    InvalidDefinition {
        /// What is wrong with the definition.
        message: String,
    },
}

/// Broad classes callers use to decide how to react to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Field- or row-level validation; correct the data and retry.
    Validation,
    /// Another transaction holds the row; retry or cancel.
    RecordLocked,
    /// Key conflict; choose another key.
    DuplicateKey,
    /// Programmer error; the operation must not be retried as is.
    InvariantViolation,
    /// The requested record does not exist.
    NotFound,
    /// SQL or connection failure.
    Infrastructure,
}

impl CoreError {
    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates an invalid definition error.
    pub fn invalid_definition(message: impl Into<String>) -> Self {
        Self::InvalidDefinition {
            message: message.into(),
        }
    }

    /// Creates an invalid key error.
    pub fn invalid_key(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Creates a veto error, for use by before-change observers.
    pub fn vetoed(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Vetoed {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Returns the class of this error.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Sql(e) if e.is_lock_wait_timeout() => ErrorClass::RecordLocked,
            Self::Sql(e) if e.is_duplicate_key() => ErrorClass::DuplicateKey,
            Self::Sql(_) => ErrorClass::Infrastructure,
            Self::InvalidRecord { .. }
            | Self::Invalid { .. }
            | Self::NotModified
            | Self::Vetoed { .. } => ErrorClass::Validation,
            Self::RecordLocked { .. } => ErrorClass::RecordLocked,
            Self::DuplicateKeyInCache { .. } | Self::AlreadyCached { .. } => {
                ErrorClass::DuplicateKey
            }
            Self::NotFound { .. } => ErrorClass::NotFound,
            Self::NotModifiable { .. }
            | Self::FixedKey { .. }
            | Self::DuplicateId { .. }
            | Self::UnknownType { .. }
            | Self::UnknownEntity { .. }
            | Self::UnknownField { .. }
            | Self::UnknownRow { .. }
            | Self::InvalidPattern { .. }
            | Self::InvalidKey { .. }
            | Self::NoDbRecord { .. }
            | Self::AlreadyPresaved
            | Self::NotActive { .. }
            | Self::InvalidOperation { .. }
            | Self::InvalidDefinition { .. } => ErrorClass::InvariantViolation,
        }
    }

    /// Returns true if the caller can correct the situation and carry on.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::Validation | ErrorClass::RecordLocked | ErrorClass::DuplicateKey
        )
    }
}
