//! Data store configuration.

use crate::key::KeyAllocation;

/// Configuration shared by every transaction a data store begins.
#[derive(Debug, Clone)]
pub struct Config {
    /// Key allocation used by entities that do not choose their own.
    pub key_allocation: KeyAllocation,

    /// How many times a generated key is retried after a conflict.
    pub key_generation_attempts: u32,

    /// Whether `save` accepts a transaction with no modifications.
    pub allow_no_modifications: bool,

    /// Whether setting a field to its current value still attempts the row lock.
    pub relock_on_unchanged_set: bool,

    /// Whether outstanding messages name each row by its label.
    pub fully_identify_rows_in_messages: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            key_allocation: KeyAllocation::Counter,
            key_generation_attempts: 5,
            allow_no_modifications: false,
            relock_on_unchanged_set: false,
            fully_identify_rows_in_messages: false,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default key allocation.
    #[must_use]
    pub const fn key_allocation(mut self, allocation: KeyAllocation) -> Self {
        self.key_allocation = allocation;
        self
    }

    /// Sets the number of key generation attempts.
    #[must_use]
    pub const fn key_generation_attempts(mut self, attempts: u32) -> Self {
        self.key_generation_attempts = attempts;
        self
    }

    /// Sets whether unmodified transactions may be saved.
    #[must_use]
    pub const fn allow_no_modifications(mut self, value: bool) -> Self {
        self.allow_no_modifications = value;
        self
    }

    /// Sets whether an unchanged `set` attempts the row lock.
    #[must_use]
    pub const fn relock_on_unchanged_set(mut self, value: bool) -> Self {
        self.relock_on_unchanged_set = value;
        self
    }

    /// Sets whether messages are prefixed with full row labels.
    #[must_use]
    pub const fn fully_identify_rows_in_messages(mut self, value: bool) -> Self {
        self.fully_identify_rows_in_messages = value;
        self
    }
}
