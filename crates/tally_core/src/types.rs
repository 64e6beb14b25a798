//! Core type definitions for Tally.

use std::fmt;

/// Identifier of a transaction: the id of its `ac_tx` audit row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Creates a new transaction ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx:{}", self.0)
    }
}

/// Handle of a row within its transaction.
///
/// Row ids are the transaction's row sequence numbers, starting at 1. They
/// are only meaningful to the transaction that issued them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowId(pub u32);

impl RowId {
    /// Creates a row id from a sequence number.
    #[must_use]
    pub const fn new(number: u32) -> Self {
        Self(number)
    }

    /// Returns the row sequence number.
    #[must_use]
    pub const fn number(self) -> u32 {
        self.0
    }

    pub(crate) fn index(self) -> usize {
        (self.0 as usize).saturating_sub(1)
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row:{}", self.0)
    }
}

/// What a row's save does to storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// The row is new.
    Create,
    /// The row was loaded and may be changed.
    Update,
    /// The row is being deleted.
    Delete,
}

impl Action {
    /// Returns the audit code: `C`, `U` or `D`.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Create => "C",
            Self::Update => "U",
            Self::Delete => "D",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_forms() {
        assert_eq!(TransactionId::new(7).to_string(), "tx:7");
        assert_eq!(RowId::new(3).to_string(), "row:3");
        assert_eq!(Action::Delete.to_string(), "D");
    }

    #[test]
    fn row_index_is_zero_based() {
        assert_eq!(RowId::new(1).index(), 0);
        assert_eq!(RowId::new(5).index(), 4);
    }
}
