//! # Tally Core
//!
//! Entity rows and the unit-of-work transaction engine for Tally.
//!
//! This crate provides:
//! - Typed fields with normalisation and validation ([`FieldType`] strategies)
//! - Field sets and entity rows with composite, generated keys
//! - A type registry of entities, field types and lists of values
//! - Transactions that cache rows by identity, lock stored records on first
//!   change, cascade key and delete changes to child rows and persist
//!   everything under a single commit with audit and history rows
//!
//! Storage is reached only through the `tally_sql` connection traits.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod audit;
mod config;
mod entity;
mod error;
mod field;
mod fieldset;
pub mod key;
mod lov;
mod message;
mod registry;
mod row;
mod session;
mod store;
mod transaction;
mod types;

pub use config::Config;
pub use entity::{
    EntityBuilder, EntityDef, EntitySpec, FieldChangeHook, FieldVeto, PresaveHook, RowHook,
};
pub use error::{CoreError, CoreResult, ErrorClass};
pub use field::{
    builtin_types, Boolean, Date, Email, Field, FieldDef, FieldSpec, FieldType, NoContext, Number,
    OptionList, Reference, Text, Textarea, ValidationContext,
};
pub use fieldset::FieldSet;
pub use key::{KeyAllocation, KeyDef, KeyPart};
pub use lov::{ListOfValues, LovCache, LovItem};
pub use message::{Message, MessageKind, MessageList, MessageTag};
pub use registry::{RegistryBuilder, RegistryContext, TypeRegistry};
pub use row::Row;
pub use session::Session;
pub use store::DataStore;
pub use transaction::{RowInit, RowMut, Transaction, TransactionState, TransactionStatus};
pub use types::{Action, RowId, TransactionId};
