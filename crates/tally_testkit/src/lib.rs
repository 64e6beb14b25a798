//! # Tally Testkit
//!
//! Test utilities for Tally.
//!
//! This crate provides:
//! - A sample registry of related entities (customers, orders, order lines,
//!   widgets and notes)
//! - [`TestEnv`]: an in-memory database with every table created, a data
//!   store and a session
//! - Property-based generators for keys and field values using proptest
//! - Integration checks of history, audit and rollback behaviour
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tally_testkit::prelude::*;
//!
//! #[test]
//! fn creates_widget() {
//!     let env = TestEnv::new();
//!     let mut tx = env.begin();
//!     let row = tx.create_new_row("widget", RowInit::new().value("name", "bolt")).unwrap();
//!     tx.save(None).unwrap();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod integration;

#[cfg(test)]
mod lifecycle;
#[cfg(test)]
mod properties;
#[cfg(test)]
mod scenarios;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use tally_core::{
        Action, CoreError, DataStore, KeyAllocation, RowId, RowInit, Session, Transaction,
        TransactionState, TransactionStatus,
    };
}

pub use fixtures::*;
pub use generators::*;
pub use integration::*;
