//! Query results.

/// Rows returned by a query, with their column names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultSet {
    columns: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
}

impl ResultSet {
    /// Creates a result set from column names and row values.
    #[must_use]
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Option<String>>>) -> Self {
        Self { columns, rows }
    }

    /// Creates a single-row, single-column result.
    #[must_use]
    pub fn scalar(column: impl Into<String>, value: Option<String>) -> Self {
        Self {
            columns: vec![column.into()],
            rows: vec![vec![value]],
        }
    }

    /// Returns the column names.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Returns the number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if no rows were returned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns the first row, if any.
    #[must_use]
    pub fn first(&self) -> Option<ResultRow<'_>> {
        self.rows.first().map(|values| ResultRow {
            columns: &self.columns,
            values,
        })
    }

    /// Iterates over the rows.
    pub fn rows(&self) -> impl Iterator<Item = ResultRow<'_>> {
        self.rows.iter().map(|values| ResultRow {
            columns: &self.columns,
            values,
        })
    }

    /// Reads the first column of the first row as an integer.
    ///
    /// `NULL`, a missing row or a non-numeric value all yield `None`.
    #[must_use]
    pub fn scalar_int(&self) -> Option<i64> {
        self.first().and_then(|row| row.get_int_at(0))
    }
}

/// A borrowed view of one result row.
#[derive(Debug, Clone, Copy)]
pub struct ResultRow<'a> {
    columns: &'a [String],
    values: &'a [Option<String>],
}

impl<'a> ResultRow<'a> {
    /// Returns the value of the named column; `None` for `NULL` or an unknown column.
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&'a str> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|i| self.get_at(i))
    }

    /// Returns the value at a column index.
    #[must_use]
    pub fn get_at(&self, index: usize) -> Option<&'a str> {
        self.values.get(index).and_then(|v| v.as_deref())
    }

    /// Returns the named column parsed as an integer.
    #[must_use]
    pub fn get_int(&self, column: &str) -> Option<i64> {
        self.get(column).and_then(|v| v.trim().parse().ok())
    }

    /// Returns the column at an index parsed as an integer.
    #[must_use]
    pub fn get_int_at(&self, index: usize) -> Option<i64> {
        self.get_at(index).and_then(|v| v.trim().parse().ok())
    }

    /// Returns true if the named column exists in the result.
    #[must_use]
    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }
}
