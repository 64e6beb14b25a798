//! # Tally SQL
//!
//! The SQL execution collaborator used by Tally.
//!
//! This crate is the lowest layer of the workspace. It knows nothing about
//! entities, fields or keys; it runs structured statements against tables
//! and reports rows affected, result sets and auto-increment ids.
//!
//! ## Design Principles
//!
//! - Statements are structured values ([`Statement`]) that render to SQL text
//! - Connections are exclusively owned (`&mut self`) and `Send`
//! - Pools hand out connections by purpose: autocommit query connections,
//!   transactional connections and read-uncommitted connections
//! - Lock conflicts surface as [`SqlError::LockWaitTimeout`] rather than blocking
//!
//! ## Available Backends
//!
//! - [`InMemoryDatabase`] - a shared in-process engine with row locks,
//!   unique constraints and commit/rollback, for tests and tooling
//!
//! ## Example
//!
//! ```rust
//! use tally_sql::{Connection, ConnectionPool, InMemoryDatabase, Statement, TableSchema};
//!
//! let db = InMemoryDatabase::new();
//! db.create_table(TableSchema::new("colour").column("_key", "CHAR(10)").unique(["_key"]))
//!     .unwrap();
//!
//! let mut conn = db.query_connection("example").unwrap();
//! conn.execute_update(&Statement::insert("colour").value("_key", "red")).unwrap();
//! let rows = conn.execute_query(&Statement::select("colour")).unwrap();
//! assert_eq!(rows.len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod connection;
mod error;
mod memory;
mod result;
mod schema;
mod statement;

pub use connection::{Connection, ConnectionId, ConnectionPool, IsolationLevel};
pub use error::{SqlError, SqlResult};
pub use memory::InMemoryDatabase;
pub use result::{ResultRow, ResultSet};
pub use schema::{Column, TableSchema};
pub use statement::{escape, Assignment, Condition, Statement};
