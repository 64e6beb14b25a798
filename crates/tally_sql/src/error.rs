//! Error types for SQL operations.

use thiserror::Error;

/// Result type for SQL operations.
pub type SqlResult<T> = Result<T, SqlError>;

/// Errors that can occur while executing statements.
#[derive(Debug, Error)]
pub enum SqlError {
    /// A row needed by the statement is locked by another connection.
    #[error("lock wait timeout exceeded on table {table}")]
    LockWaitTimeout {
        /// The table holding the locked row.
        table: String,
    },

    /// An insert or update would violate a unique constraint.
    #[error("duplicate entry '{value}' for key '{constraint}' in table {table}")]
    DuplicateKey {
        /// The table the constraint belongs to.
        table: String,
        /// Comma-separated columns of the violated constraint.
        constraint: String,
        /// The conflicting value, joined like the constraint.
        value: String,
    },

    /// The statement referenced a table that does not exist.
    #[error("table '{table}' doesn't exist")]
    NoSuchTable {
        /// The requested table.
        table: String,
    },

    /// The statement referenced a column that does not exist.
    #[error("unknown column '{column}' in table {table}")]
    NoSuchColumn {
        /// The table searched.
        table: String,
        /// The requested column.
        column: String,
    },

    /// A table with the same name already exists.
    #[error("table '{table}' already exists")]
    TableExists {
        /// The table name.
        table: String,
    },

    /// The connection has been returned to its pool.
    #[error("connection {connection} has been released")]
    ConnectionClosed {
        /// Display form of the connection id.
        connection: String,
    },

    /// COMMIT or ROLLBACK issued outside a transaction.
    #[error("no transaction in progress on connection {connection}")]
    NotInTransaction {
        /// Display form of the connection id.
        connection: String,
    },

    /// A value could not be interpreted as the column requires.
    #[error("incorrect value '{value}' for column {column}")]
    InvalidValue {
        /// The column being written.
        column: String,
        /// The rejected value.
        value: String,
    },

    /// Any other backend failure.
    #[error("backend error: {0}")]
    Backend(String),
}

impl SqlError {
    /// Returns true if this error is a lock wait timeout.
    #[must_use]
    pub fn is_lock_wait_timeout(&self) -> bool {
        matches!(self, Self::LockWaitTimeout { .. })
    }

    /// Returns true if this error is a unique constraint violation.
    #[must_use]
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, Self::DuplicateKey { .. })
    }

    /// Creates a backend error.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_lock_and_duplicate() {
        let lock = SqlError::LockWaitTimeout {
            table: "widget".into(),
        };
        assert!(lock.is_lock_wait_timeout());
        assert!(!lock.is_duplicate_key());

        let dup = SqlError::DuplicateKey {
            table: "widget".into(),
            constraint: "_key".into(),
            value: "7".into(),
        };
        assert!(dup.is_duplicate_key());
        assert_eq!(
            dup.to_string(),
            "duplicate entry '7' for key '_key' in table widget"
        );
    }
}
