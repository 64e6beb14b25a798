//! Table shapes.

use std::fmt;

/// A column of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Declared SQL type, used for display only.
    pub sql_type: String,
}

/// The shape of a table: columns, unique constraints and an optional
/// auto-increment column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    /// Table name.
    pub name: String,
    /// Columns in declaration order.
    pub columns: Vec<Column>,
    /// Unique constraints; the first one is treated as the primary key.
    pub unique: Vec<Vec<String>>,
    /// Column filled from a per-table counter when inserted without a value.
    pub auto_increment: Option<String>,
}

impl TableSchema {
    /// Creates an empty schema for a table.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            unique: Vec::new(),
            auto_increment: None,
        }
    }

    /// Adds a column.
    #[must_use]
    pub fn column(mut self, name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        self.columns.push(Column {
            name: name.into(),
            sql_type: sql_type.into(),
        });
        self
    }

    /// Adds a unique constraint over the given columns.
    #[must_use]
    pub fn unique<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unique.push(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Marks a column as auto-increment.
    #[must_use]
    pub fn auto_increment(mut self, column: impl Into<String>) -> Self {
        self.auto_increment = Some(column.into());
        self
    }

    /// Returns the index of a column.
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Returns the column names in order.
    #[must_use]
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

impl fmt::Display for TableSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut lines: Vec<String> = self
            .columns
            .iter()
            .map(|column| {
                let auto = if self.auto_increment.as_deref() == Some(column.name.as_str()) {
                    " AUTO_INCREMENT"
                } else {
                    ""
                };
                format!("  {} {}{}", column.name, column.sql_type, auto)
            })
            .collect();
        for (i, unique) in self.unique.iter().enumerate() {
            let kind = if i == 0 { "PRIMARY KEY" } else { "UNIQUE" };
            lines.push(format!("  {kind} ( {} )", unique.join(", ")));
        }
        write!(f, "CREATE TABLE {} (\n{}\n)", self.name, lines.join(",\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_and_renders() {
        let schema = TableSchema::new("note")
            .column("_key", "CHAR(10)")
            .column("id", "INT")
            .unique(["id"])
            .auto_increment("id");
        assert_eq!(schema.column_index("id"), Some(1));
        let ddl = schema.to_string();
        assert!(ddl.contains("id INT AUTO_INCREMENT"));
        assert!(ddl.contains("PRIMARY KEY ( id )"));
    }
}
