//! Structured SQL statements.
//!
//! Statements are built with small builder methods and rendered to SQL text
//! through `Display`. Backends execute the structured form directly; the text
//! is what gets logged.

use std::fmt;

/// Quotes a value as an SQL literal.
///
/// `None` renders as `NULL`. Single quotes are doubled and backslashes escaped.
#[must_use]
pub fn escape(value: Option<&str>) -> String {
    match value {
        None => "NULL".to_string(),
        Some(text) => {
            let mut out = String::with_capacity(text.len() + 2);
            out.push('\'');
            for ch in text.chars() {
                match ch {
                    '\'' => out.push_str("''"),
                    '\\' => out.push_str("\\\\"),
                    other => out.push(other),
                }
            }
            out.push('\'');
            out
        }
    }
}

/// An equality condition. A `None` value matches SQL `NULL`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    /// Column compared.
    pub column: String,
    /// Value the column must equal.
    pub value: Option<String>,
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            None => write!(f, "{} IS NULL", self.column),
            Some(value) => write!(f, "{} = {}", self.column, escape(Some(value))),
        }
    }
}

/// A column assignment in an UPDATE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assignment {
    /// `column = value`
    Set {
        /// Column written.
        column: String,
        /// New value.
        value: Option<String>,
    },
    /// `column = column + by`
    Increment {
        /// Column written.
        column: String,
        /// Signed delta.
        by: i64,
    },
}

impl Assignment {
    /// Returns the assigned column.
    #[must_use]
    pub fn column(&self) -> &str {
        match self {
            Self::Set { column, .. } | Self::Increment { column, .. } => column,
        }
    }
}

impl fmt::Display for Assignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Set { column, value } => write!(f, "{column} = {}", escape(value.as_deref())),
            Self::Increment { column, by } if *by < 0 => {
                write!(f, "{column} = {column} - {}", by.unsigned_abs())
            }
            Self::Increment { column, by } => write!(f, "{column} = {column} + {by}"),
        }
    }
}

/// A statement the SQL collaborator can execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// Row selection, optionally taking row locks.
    Select {
        /// Table read.
        table: String,
        /// Columns returned; empty means every column.
        columns: Vec<String>,
        /// Conditions joined by AND.
        filter: Vec<Condition>,
        /// Whether matched rows are locked until the transaction ends.
        for_update: bool,
    },
    /// `SELECT COUNT(*)`.
    Count {
        /// Table read.
        table: String,
        /// Conditions joined by AND.
        filter: Vec<Condition>,
    },
    /// `SELECT MAX(column)`; yields `NULL` when no row matches.
    Max {
        /// Table read.
        table: String,
        /// Integer column scanned.
        column: String,
        /// Conditions joined by AND.
        filter: Vec<Condition>,
    },
    /// `INSERT` or `REPLACE`.
    Insert {
        /// Table written.
        table: String,
        /// Column values in insertion order.
        values: Vec<(String, Option<String>)>,
        /// Whether conflicting rows are replaced instead of rejected.
        replace: bool,
    },
    /// `UPDATE`.
    Update {
        /// Table written.
        table: String,
        /// Assignments applied to every matched row.
        assignments: Vec<Assignment>,
        /// Conditions joined by AND.
        filter: Vec<Condition>,
    },
    /// `DELETE`.
    Delete {
        /// Table written.
        table: String,
        /// Conditions joined by AND.
        filter: Vec<Condition>,
    },
}

impl Statement {
    /// Starts a `SELECT * FROM table`.
    pub fn select(table: impl Into<String>) -> Self {
        Self::Select {
            table: table.into(),
            columns: Vec::new(),
            filter: Vec::new(),
            for_update: false,
        }
    }

    /// Starts a `SELECT COUNT(*) FROM table`.
    pub fn count(table: impl Into<String>) -> Self {
        Self::Count {
            table: table.into(),
            filter: Vec::new(),
        }
    }

    /// Starts a `SELECT MAX(column) FROM table`.
    pub fn max(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self::Max {
            table: table.into(),
            column: column.into(),
            filter: Vec::new(),
        }
    }

    /// Starts an `INSERT INTO table`.
    pub fn insert(table: impl Into<String>) -> Self {
        Self::Insert {
            table: table.into(),
            values: Vec::new(),
            replace: false,
        }
    }

    /// Starts a `REPLACE INTO table`.
    pub fn replace(table: impl Into<String>) -> Self {
        Self::Insert {
            table: table.into(),
            values: Vec::new(),
            replace: true,
        }
    }

    /// Starts an `UPDATE table`.
    pub fn update(table: impl Into<String>) -> Self {
        Self::Update {
            table: table.into(),
            assignments: Vec::new(),
            filter: Vec::new(),
        }
    }

    /// Starts a `DELETE FROM table`.
    pub fn delete(table: impl Into<String>) -> Self {
        Self::Delete {
            table: table.into(),
            filter: Vec::new(),
        }
    }

    /// Returns the table the statement addresses.
    #[must_use]
    pub fn table(&self) -> &str {
        match self {
            Self::Select { table, .. }
            | Self::Count { table, .. }
            | Self::Max { table, .. }
            | Self::Insert { table, .. }
            | Self::Update { table, .. }
            | Self::Delete { table, .. } => table,
        }
    }

    /// Returns the statement's conditions (empty for inserts).
    #[must_use]
    pub fn conditions(&self) -> &[Condition] {
        match self {
            Self::Select { filter, .. }
            | Self::Count { filter, .. }
            | Self::Max { filter, .. }
            | Self::Update { filter, .. }
            | Self::Delete { filter, .. } => filter,
            Self::Insert { .. } => &[],
        }
    }

    /// Adds a returned column to a select. Ignored by other statements.
    #[must_use]
    pub fn column(mut self, name: impl Into<String>) -> Self {
        if let Self::Select { columns, .. } = &mut self {
            columns.push(name.into());
        }
        self
    }

    /// Adds `column = value` to the conditions. Ignored by inserts.
    #[must_use]
    pub fn filter(self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.filter_value(column, Some(value.into()))
    }

    /// Adds a condition that may compare against `NULL`. Ignored by inserts.
    #[must_use]
    pub fn filter_value(mut self, column: impl Into<String>, value: Option<String>) -> Self {
        let condition = Condition {
            column: column.into(),
            value,
        };
        match &mut self {
            Self::Select { filter, .. }
            | Self::Count { filter, .. }
            | Self::Max { filter, .. }
            | Self::Update { filter, .. }
            | Self::Delete { filter, .. } => filter.push(condition),
            Self::Insert { .. } => {}
        }
        self
    }

    /// Makes a select lock the rows it returns.
    #[must_use]
    pub fn for_update(mut self) -> Self {
        if let Self::Select { for_update, .. } = &mut self {
            *for_update = true;
        }
        self
    }

    /// Adds a column value to an insert. Ignored by other statements.
    #[must_use]
    pub fn value(self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.value_opt(column, Some(value.into()))
    }

    /// Adds a possibly-`NULL` column value to an insert.
    #[must_use]
    pub fn value_opt(mut self, column: impl Into<String>, value: Option<String>) -> Self {
        if let Self::Insert { values, .. } = &mut self {
            values.push((column.into(), value));
        }
        self
    }

    /// Adds `column = value` to an update. Ignored by other statements.
    #[must_use]
    pub fn set(self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_opt(column, Some(value.into()))
    }

    /// Adds a possibly-`NULL` assignment to an update.
    #[must_use]
    pub fn set_opt(mut self, column: impl Into<String>, value: Option<String>) -> Self {
        if let Self::Update { assignments, .. } = &mut self {
            assignments.push(Assignment::Set {
                column: column.into(),
                value,
            });
        }
        self
    }

    /// Adds `column = column + by` to an update.
    #[must_use]
    pub fn increment(mut self, column: impl Into<String>, by: i64) -> Self {
        if let Self::Update { assignments, .. } = &mut self {
            assignments.push(Assignment::Increment {
                column: column.into(),
                by,
            });
        }
        self
    }

    /// Returns true if the statement only reads.
    #[must_use]
    pub fn is_query(&self) -> bool {
        matches!(
            self,
            Self::Select { .. } | Self::Count { .. } | Self::Max { .. }
        )
    }
}

fn write_where(f: &mut fmt::Formatter<'_>, filter: &[Condition]) -> fmt::Result {
    for (i, condition) in filter.iter().enumerate() {
        let joiner = if i == 0 { " WHERE " } else { " AND " };
        write!(f, "{joiner}{condition}")?;
    }
    Ok(())
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Select {
                table,
                columns,
                filter,
                for_update,
            } => {
                let columns = if columns.is_empty() {
                    "*".to_string()
                } else {
                    columns.join(", ")
                };
                write!(f, "SELECT {columns} FROM {table}")?;
                write_where(f, filter)?;
                if *for_update {
                    write!(f, " FOR UPDATE")?;
                }
                Ok(())
            }
            Self::Count { table, filter } => {
                write!(f, "SELECT COUNT(*) FROM {table}")?;
                write_where(f, filter)
            }
            Self::Max {
                table,
                column,
                filter,
            } => {
                write!(f, "SELECT MAX({column}) FROM {table}")?;
                write_where(f, filter)
            }
            Self::Insert {
                table,
                values,
                replace,
            } => {
                let verb = if *replace { "REPLACE" } else { "INSERT" };
                let columns: Vec<&str> = values.iter().map(|(c, _)| c.as_str()).collect();
                let literals: Vec<String> =
                    values.iter().map(|(_, v)| escape(v.as_deref())).collect();
                write!(
                    f,
                    "{verb} INTO {table} ( {} ) VALUES ( {} )",
                    columns.join(", "),
                    literals.join(", ")
                )
            }
            Self::Update {
                table,
                assignments,
                filter,
            } => {
                let sets: Vec<String> = assignments.iter().map(ToString::to_string).collect();
                write!(f, "UPDATE {table} SET {}", sets.join(", "))?;
                write_where(f, filter)
            }
            Self::Delete { table, filter } => {
                write!(f, "DELETE FROM {table}")?;
                write_where(f, filter)
            }
        }
    }
}
