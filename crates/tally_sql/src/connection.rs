//! Connection and pool traits.

use crate::error::SqlResult;
use crate::result::ResultSet;
use crate::statement::Statement;
use std::fmt;

/// Identifier of a connection, unique within its pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    /// Creates a new connection id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw id value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn:{}", self.0)
    }
}

/// Read isolation of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    /// Reads see committed data plus this connection's own changes.
    ReadCommitted,
    /// Reads also see other connections' uncommitted changes.
    ReadUncommitted,
}

/// A database connection.
///
/// A connection is owned by exactly one caller at a time. Outside a
/// transaction every statement commits on its own.
///
/// # Invariants
///
/// - Row locks taken inside a transaction are held until `commit` or `rollback`
/// - After `finished` every other call fails with `ConnectionClosed`
/// - Dropping a connection with an open transaction rolls it back
pub trait Connection: Send {
    /// Returns the connection id.
    fn id(&self) -> ConnectionId;

    /// Returns the read isolation level.
    fn isolation(&self) -> IsolationLevel;

    /// Returns true while a transaction is open.
    fn in_transaction(&self) -> bool;

    /// Starts a transaction (`START TRANSACTION`).
    ///
    /// # Errors
    ///
    /// Returns an error if the connection has been released.
    fn begin(&mut self) -> SqlResult<()>;

    /// Commits the open transaction and releases its row locks.
    ///
    /// # Errors
    ///
    /// Returns `NotInTransaction` if no transaction is open.
    fn commit(&mut self) -> SqlResult<()>;

    /// Rolls back the open transaction and releases its row locks.
    ///
    /// # Errors
    ///
    /// Returns `NotInTransaction` if no transaction is open.
    fn rollback(&mut self) -> SqlResult<()>;

    /// Runs a reading statement.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown tables or columns, or `LockWaitTimeout`
    /// when a locking read meets a row locked elsewhere.
    fn execute_query(&mut self, statement: &Statement) -> SqlResult<ResultSet>;

    /// Runs a writing statement and returns the number of rows affected.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateKey` on a unique constraint violation or
    /// `LockWaitTimeout` when a target row is locked elsewhere.
    fn execute_update(&mut self, statement: &Statement) -> SqlResult<u64>;

    /// Returns the auto-increment value assigned by the last insert.
    fn last_insert_id(&self) -> Option<u64>;

    /// Returns the connection to its pool, rolling back any open transaction.
    fn finished(&mut self);
}

/// Hands out connections by purpose.
///
/// The `tag` identifies the requester in logs.
pub trait ConnectionPool: Send + Sync {
    /// Returns an autocommit, read-committed connection.
    ///
    /// # Errors
    ///
    /// Returns an error if no connection can be provided.
    fn query_connection(&self, tag: &str) -> SqlResult<Box<dyn Connection>>;

    /// Returns a read-committed connection with a transaction already started.
    ///
    /// # Errors
    ///
    /// Returns an error if no connection can be provided.
    fn trans_connection(&self, tag: &str) -> SqlResult<Box<dyn Connection>>;

    /// Returns an autocommit, read-uncommitted connection.
    ///
    /// # Errors
    ///
    /// Returns an error if no connection can be provided.
    fn uncommitted_connection(&self, tag: &str) -> SqlResult<Box<dyn Connection>>;
}
