//! In-memory SQL engine for tests and tooling.

use crate::connection::{Connection, ConnectionId, ConnectionPool, IsolationLevel};
use crate::error::{SqlError, SqlResult};
use crate::result::ResultSet;
use crate::schema::TableSchema;
use crate::statement::{Assignment, Condition, Statement};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, trace};

type Values = Vec<Option<String>>;

/// One stored row with its committed image and any uncommitted change.
#[derive(Debug)]
struct StoredRow {
    /// What other connections see. `None` until an insert commits.
    committed: Option<Values>,
    /// The latest image. `None` once deleted by the owner.
    current: Option<Values>,
    /// Connection holding the row lock.
    owner: Option<ConnectionId>,
}

impl StoredRow {
    fn visible(&self, conn: ConnectionId, isolation: IsolationLevel) -> Option<&Values> {
        if self.owner == Some(conn) || isolation == IsolationLevel::ReadUncommitted {
            self.current.as_ref()
        } else {
            self.committed.as_ref()
        }
    }

    /// The image a write or locking read acts on.
    fn writable(&self, conn: ConnectionId) -> Option<&Values> {
        if self.owner == Some(conn) {
            self.current.as_ref()
        } else {
            self.committed.as_ref()
        }
    }

    /// Images a new unique value must not collide with.
    fn versions(&self, conn: ConnectionId) -> Vec<&Values> {
        if self.owner == Some(conn) {
            self.current.iter().collect()
        } else {
            self.current.iter().chain(self.committed.iter()).collect()
        }
    }

    fn locked_by_other(&self, conn: ConnectionId) -> bool {
        self.owner.is_some_and(|owner| owner != conn)
    }
}

#[derive(Debug)]
struct Table {
    schema: TableSchema,
    rows: Vec<StoredRow>,
    next_auto: u64,
}

impl Table {
    fn column(&self, name: &str) -> SqlResult<usize> {
        self.schema
            .column_index(name)
            .ok_or_else(|| SqlError::NoSuchColumn {
                table: self.schema.name.clone(),
                column: name.to_string(),
            })
    }

    fn resolve(&self, filter: &[Condition]) -> SqlResult<Vec<(usize, Option<String>)>> {
        filter
            .iter()
            .map(|c| Ok((self.column(&c.column)?, c.value.clone())))
            .collect()
    }

    fn lock_timeout(&self) -> SqlError {
        SqlError::LockWaitTimeout {
            table: self.schema.name.clone(),
        }
    }

    /// Checks `values` against every unique constraint, skipping row `skip`.
    fn check_unique(
        &self,
        conn: ConnectionId,
        values: &Values,
        skip: Option<usize>,
    ) -> SqlResult<()> {
        for constraint in &self.schema.unique {
            if !self.conflicts(conn, values, constraint, skip)?.is_empty() {
                return Err(self.duplicate(constraint, values));
            }
        }
        Ok(())
    }

    /// Returns the rows whose values collide with `values` on `constraint`.
    ///
    /// Constraints with a `NULL` member never collide.
    fn conflicts(
        &self,
        conn: ConnectionId,
        values: &Values,
        constraint: &[String],
        skip: Option<usize>,
    ) -> SqlResult<Vec<usize>> {
        let idx: Vec<usize> = constraint
            .iter()
            .map(|c| self.column(c))
            .collect::<SqlResult<_>>()?;
        if idx.iter().any(|&i| values[i].is_none()) {
            return Ok(Vec::new());
        }
        Ok(self
            .rows
            .iter()
            .enumerate()
            .filter(|(row_index, _)| Some(*row_index) != skip)
            .filter(|(_, row)| {
                row.versions(conn)
                    .into_iter()
                    .any(|version| idx.iter().all(|&i| version[i] == values[i]))
            })
            .map(|(row_index, _)| row_index)
            .collect())
    }

    fn duplicate(&self, constraint: &[String], values: &Values) -> SqlError {
        let value = constraint
            .iter()
            .filter_map(|c| self.schema.column_index(c))
            .map(|i| values[i].clone().unwrap_or_default())
            .collect::<Vec<_>>()
            .join("-");
        SqlError::DuplicateKey {
            table: self.schema.name.clone(),
            constraint: constraint.join(","),
            value,
        }
    }
}

fn matches(values: &Values, filter: &[(usize, Option<String>)]) -> bool {
    filter.iter().all(|(i, v)| values[*i] == *v)
}

#[derive(Debug, Default)]
struct Engine {
    tables: BTreeMap<String, Table>,
    next_connection: u64,
}

impl Engine {
    fn table(&self, name: &str) -> SqlResult<&Table> {
        self.tables.get(name).ok_or_else(|| SqlError::NoSuchTable {
            table: name.to_string(),
        })
    }

    fn table_mut(&mut self, name: &str) -> SqlResult<&mut Table> {
        self.tables.get_mut(name).ok_or_else(|| SqlError::NoSuchTable {
            table: name.to_string(),
        })
    }

    fn query(
        &mut self,
        conn: ConnectionId,
        isolation: IsolationLevel,
        in_transaction: bool,
        statement: &Statement,
    ) -> SqlResult<ResultSet> {
        match statement {
            Statement::Select {
                table,
                columns,
                filter,
                for_update,
            } => {
                let table = self.table_mut(table)?;
                let filter = table.resolve(filter)?;
                let (names, picks): (Vec<String>, Vec<usize>) = if columns.is_empty() {
                    (
                        table.schema.column_names(),
                        (0..table.schema.columns.len()).collect(),
                    )
                } else {
                    let picks = columns
                        .iter()
                        .map(|c| table.column(c))
                        .collect::<SqlResult<Vec<_>>>()?;
                    (columns.clone(), picks)
                };

                let mut selected = Vec::new();
                if *for_update {
                    for (i, row) in table.rows.iter().enumerate() {
                        if row.writable(conn).is_some_and(|v| matches(v, &filter)) {
                            if row.locked_by_other(conn) {
                                return Err(table.lock_timeout());
                            }
                            selected.push(i);
                        }
                    }
                    if in_transaction {
                        for &i in &selected {
                            table.rows[i].owner = Some(conn);
                        }
                    }
                } else {
                    for (i, row) in table.rows.iter().enumerate() {
                        if row.visible(conn, isolation).is_some_and(|v| matches(v, &filter)) {
                            selected.push(i);
                        }
                    }
                }

                let rows = selected
                    .into_iter()
                    .filter_map(|i| {
                        let row = &table.rows[i];
                        let values = if *for_update {
                            row.writable(conn)
                        } else {
                            row.visible(conn, isolation)
                        }?;
                        Some(picks.iter().map(|&p| values[p].clone()).collect())
                    })
                    .collect();
                Ok(ResultSet::new(names, rows))
            }
            Statement::Count { table, filter } => {
                let table = self.table(table)?;
                let filter = table.resolve(filter)?;
                let count = table
                    .rows
                    .iter()
                    .filter(|row| {
                        row.visible(conn, isolation)
                            .is_some_and(|v| matches(v, &filter))
                    })
                    .count();
                Ok(ResultSet::scalar("count", Some(count.to_string())))
            }
            Statement::Max {
                table,
                column,
                filter,
            } => {
                let table = self.table(table)?;
                let filter = table.resolve(filter)?;
                let col = table.column(column)?;
                let max = table
                    .rows
                    .iter()
                    .filter_map(|row| row.visible(conn, isolation))
                    .filter(|v| matches(v, &filter))
                    .filter_map(|v| v[col].as_deref().and_then(|s| s.trim().parse::<i64>().ok()))
                    .max();
                Ok(ResultSet::scalar("max", max.map(|m| m.to_string())))
            }
            other => Err(SqlError::backend(format!(
                "statement is not a query: {other}"
            ))),
        }
    }

    fn update(
        &mut self,
        conn: ConnectionId,
        in_transaction: bool,
        statement: &Statement,
    ) -> SqlResult<(u64, Option<u64>)> {
        match statement {
            Statement::Insert {
                table,
                values,
                replace,
            } => {
                let table = self.table_mut(table)?;
                let mut row: Values = vec![None; table.schema.columns.len()];
                for (column, value) in values {
                    row[table.column(column)?] = value.clone();
                }

                let mut insert_id = None;
                if let Some(auto) = table.schema.auto_increment.clone() {
                    let idx = table.column(&auto)?;
                    match row[idx].as_deref().map(str::trim) {
                        None | Some("") => {
                            let id = table.next_auto;
                            table.next_auto += 1;
                            row[idx] = Some(id.to_string());
                            insert_id = Some(id);
                        }
                        Some(given) => {
                            let given: u64 = given.parse().map_err(|_| SqlError::InvalidValue {
                                column: auto.clone(),
                                value: given.to_string(),
                            })?;
                            table.next_auto = table.next_auto.max(given + 1);
                        }
                    }
                }

                let mut affected = 1;
                if *replace {
                    let mut doomed = Vec::new();
                    for constraint in &table.schema.unique {
                        for i in table.conflicts(conn, &row, constraint, None)? {
                            if table.rows[i].locked_by_other(conn) {
                                return Err(table.lock_timeout());
                            }
                            if !doomed.contains(&i) {
                                doomed.push(i);
                            }
                        }
                    }
                    affected += doomed.len() as u64;
                    doomed.sort_unstable();
                    if in_transaction {
                        for i in doomed {
                            table.rows[i].owner = Some(conn);
                            table.rows[i].current = None;
                        }
                    } else {
                        for i in doomed.into_iter().rev() {
                            table.rows.remove(i);
                        }
                    }
                } else {
                    table.check_unique(conn, &row, None)?;
                }

                table.rows.push(if in_transaction {
                    StoredRow {
                        committed: None,
                        current: Some(row),
                        owner: Some(conn),
                    }
                } else {
                    StoredRow {
                        committed: Some(row.clone()),
                        current: Some(row),
                        owner: None,
                    }
                });
                Ok((affected, insert_id))
            }
            Statement::Update {
                table,
                assignments,
                filter,
            } => {
                let table = self.table_mut(table)?;
                let filter = table.resolve(filter)?;
                let targets: Vec<(usize, Assignment)> = assignments
                    .iter()
                    .map(|a| Ok((table.column(a.column())?, a.clone())))
                    .collect::<SqlResult<_>>()?;

                let mut changes = Vec::new();
                for (i, row) in table.rows.iter().enumerate() {
                    let Some(values) = row.writable(conn) else {
                        continue;
                    };
                    if !matches(values, &filter) {
                        continue;
                    }
                    if row.locked_by_other(conn) {
                        return Err(table.lock_timeout());
                    }
                    let mut next = values.clone();
                    for (idx, assignment) in &targets {
                        next[*idx] = match assignment {
                            Assignment::Set { value, .. } => value.clone(),
                            Assignment::Increment { column, by } => {
                                let current = next[*idx].as_deref().unwrap_or("");
                                let number: i64 = current.trim().parse().map_err(|_| {
                                    SqlError::InvalidValue {
                                        column: column.clone(),
                                        value: current.to_string(),
                                    }
                                })?;
                                Some((number + by).to_string())
                            }
                        };
                    }
                    changes.push((i, next));
                }
                for (i, next) in &changes {
                    table.check_unique(conn, next, Some(*i))?;
                }

                let affected = changes.len() as u64;
                for (i, next) in changes {
                    let row = &mut table.rows[i];
                    if in_transaction {
                        row.owner = Some(conn);
                    } else {
                        row.committed = Some(next.clone());
                    }
                    row.current = Some(next);
                }
                Ok((affected, None))
            }
            Statement::Delete { table, filter } => {
                let table = self.table_mut(table)?;
                let filter = table.resolve(filter)?;
                let mut doomed = Vec::new();
                for (i, row) in table.rows.iter().enumerate() {
                    if row.writable(conn).is_some_and(|v| matches(v, &filter)) {
                        if row.locked_by_other(conn) {
                            return Err(table.lock_timeout());
                        }
                        doomed.push(i);
                    }
                }
                let affected = doomed.len() as u64;
                if in_transaction {
                    for i in doomed {
                        table.rows[i].owner = Some(conn);
                        table.rows[i].current = None;
                    }
                } else {
                    for i in doomed.into_iter().rev() {
                        table.rows.remove(i);
                    }
                }
                Ok((affected, None))
            }
            other => Err(SqlError::backend(format!(
                "statement is not an update: {other}"
            ))),
        }
    }

    fn finish_transaction(&mut self, conn: ConnectionId, commit: bool) {
        for table in self.tables.values_mut() {
            table.rows.retain_mut(|row| {
                if row.owner != Some(conn) {
                    return true;
                }
                row.owner = None;
                if commit {
                    row.committed = row.current.clone();
                } else {
                    row.current = row.committed.clone();
                }
                row.current.is_some()
            });
        }
    }
}

/// A shared in-process SQL engine.
///
/// Cloning the handle shares the same tables. The engine implements:
/// - per-row write locks held until commit or rollback
/// - read-committed and read-uncommitted visibility
/// - unique constraints checked against uncommitted rows too
/// - per-table auto-increment counters that are never rolled back
///
/// A statement that meets a row locked by another connection fails at once
/// with [`SqlError::LockWaitTimeout`] instead of waiting.
///
/// # Example
///
/// ```rust
/// use tally_sql::{Connection, ConnectionPool, InMemoryDatabase, Statement, TableSchema};
///
/// let db = InMemoryDatabase::new();
/// db.create_table(TableSchema::new("t").column("_key", "CHAR(4)").unique(["_key"]))
///     .unwrap();
///
/// let mut writer = db.trans_connection("writer").unwrap();
/// writer.execute_update(&Statement::insert("t").value("_key", "a")).unwrap();
///
/// let mut reader = db.query_connection("reader").unwrap();
/// assert!(reader.execute_query(&Statement::select("t")).unwrap().is_empty());
///
/// writer.commit().unwrap();
/// assert_eq!(reader.execute_query(&Statement::select("t")).unwrap().len(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryDatabase {
    engine: Arc<Mutex<Engine>>,
}

impl InMemoryDatabase {
    /// Creates an empty database.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a table.
    ///
    /// # Errors
    ///
    /// Returns `TableExists` if the name is taken, or `NoSuchColumn` if a
    /// constraint names an undeclared column.
    pub fn create_table(&self, schema: TableSchema) -> SqlResult<()> {
        let mut engine = self.engine.lock();
        if engine.tables.contains_key(&schema.name) {
            return Err(SqlError::TableExists {
                table: schema.name.clone(),
            });
        }
        let referenced = schema
            .unique
            .iter()
            .flatten()
            .chain(schema.auto_increment.iter());
        for column in referenced {
            if schema.column_index(column).is_none() {
                return Err(SqlError::NoSuchColumn {
                    table: schema.name.clone(),
                    column: column.clone(),
                });
            }
        }
        debug!(table = %schema.name, columns = schema.columns.len(), "create table");
        engine.tables.insert(
            schema.name.clone(),
            Table {
                schema,
                rows: Vec::new(),
                next_auto: 1,
            },
        );
        Ok(())
    }

    /// Returns true if the table exists.
    #[must_use]
    pub fn has_table(&self, name: &str) -> bool {
        self.engine.lock().tables.contains_key(name)
    }

    /// Returns the schema of a table.
    #[must_use]
    pub fn schema(&self, name: &str) -> Option<TableSchema> {
        self.engine.lock().tables.get(name).map(|t| t.schema.clone())
    }

    /// Returns the committed rows of a table as column maps.
    ///
    /// # Errors
    ///
    /// Returns `NoSuchTable` if the table does not exist.
    pub fn table_rows(&self, name: &str) -> SqlResult<Vec<BTreeMap<String, Option<String>>>> {
        let engine = self.engine.lock();
        let table = engine.table(name)?;
        Ok(table
            .rows
            .iter()
            .filter_map(|row| row.committed.as_ref())
            .map(|values| {
                table
                    .schema
                    .columns
                    .iter()
                    .zip(values)
                    .map(|(c, v)| (c.name.clone(), v.clone()))
                    .collect()
            })
            .collect())
    }

    /// Returns the number of committed rows in a table.
    ///
    /// # Errors
    ///
    /// Returns `NoSuchTable` if the table does not exist.
    pub fn row_count(&self, name: &str) -> SqlResult<usize> {
        let engine = self.engine.lock();
        Ok(engine
            .table(name)?
            .rows
            .iter()
            .filter(|row| row.committed.is_some())
            .count())
    }

    /// Returns the number of row locks currently held across all tables.
    #[must_use]
    pub fn locked_row_count(&self) -> usize {
        self.engine
            .lock()
            .tables
            .values()
            .flat_map(|t| t.rows.iter())
            .filter(|row| row.owner.is_some())
            .count()
    }

    fn connect(&self, tag: &str, isolation: IsolationLevel) -> MemoryConnection {
        let id = {
            let mut engine = self.engine.lock();
            engine.next_connection += 1;
            ConnectionId::new(engine.next_connection)
        };
        trace!(connection = %id, tag, ?isolation, "connection opened");
        MemoryConnection {
            id,
            tag: tag.to_string(),
            isolation,
            engine: Arc::clone(&self.engine),
            in_transaction: false,
            last_insert_id: None,
            closed: false,
        }
    }
}

impl ConnectionPool for InMemoryDatabase {
    fn query_connection(&self, tag: &str) -> SqlResult<Box<dyn Connection>> {
        Ok(Box::new(self.connect(tag, IsolationLevel::ReadCommitted)))
    }

    fn trans_connection(&self, tag: &str) -> SqlResult<Box<dyn Connection>> {
        let mut conn = self.connect(tag, IsolationLevel::ReadCommitted);
        conn.begin()?;
        Ok(Box::new(conn))
    }

    fn uncommitted_connection(&self, tag: &str) -> SqlResult<Box<dyn Connection>> {
        Ok(Box::new(self.connect(tag, IsolationLevel::ReadUncommitted)))
    }
}

/// A connection to an [`InMemoryDatabase`].
struct MemoryConnection {
    id: ConnectionId,
    tag: String,
    isolation: IsolationLevel,
    engine: Arc<Mutex<Engine>>,
    in_transaction: bool,
    last_insert_id: Option<u64>,
    closed: bool,
}

impl MemoryConnection {
    fn ensure_open(&self) -> SqlResult<()> {
        if self.closed {
            return Err(SqlError::ConnectionClosed {
                connection: self.id.to_string(),
            });
        }
        Ok(())
    }

    fn end_transaction(&mut self, commit: bool) -> SqlResult<()> {
        self.ensure_open()?;
        if !self.in_transaction {
            return Err(SqlError::NotInTransaction {
                connection: self.id.to_string(),
            });
        }
        self.engine.lock().finish_transaction(self.id, commit);
        self.in_transaction = false;
        trace!(connection = %self.id, tag = %self.tag, commit, "transaction ended");
        Ok(())
    }
}

impl Connection for MemoryConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    fn begin(&mut self) -> SqlResult<()> {
        self.ensure_open()?;
        self.in_transaction = true;
        trace!(connection = %self.id, tag = %self.tag, "START TRANSACTION");
        Ok(())
    }

    fn commit(&mut self) -> SqlResult<()> {
        self.end_transaction(true)
    }

    fn rollback(&mut self) -> SqlResult<()> {
        self.end_transaction(false)
    }

    fn execute_query(&mut self, statement: &Statement) -> SqlResult<ResultSet> {
        self.ensure_open()?;
        trace!(connection = %self.id, sql = %statement, "query");
        self.engine
            .lock()
            .query(self.id, self.isolation, self.in_transaction, statement)
    }

    fn execute_update(&mut self, statement: &Statement) -> SqlResult<u64> {
        self.ensure_open()?;
        trace!(connection = %self.id, sql = %statement, "update");
        let (affected, insert_id) =
            self.engine
                .lock()
                .update(self.id, self.in_transaction, statement)?;
        if insert_id.is_some() {
            self.last_insert_id = insert_id;
        }
        Ok(affected)
    }

    fn last_insert_id(&self) -> Option<u64> {
        self.last_insert_id
    }

    fn finished(&mut self) {
        if self.closed {
            return;
        }
        if self.in_transaction {
            self.engine.lock().finish_transaction(self.id, false);
            self.in_transaction = false;
        }
        self.closed = true;
        trace!(connection = %self.id, tag = %self.tag, "connection released");
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.finished();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn widget_db() -> InMemoryDatabase {
        let db = InMemoryDatabase::new();
        db.create_table(
            TableSchema::new("widget")
                .column("_key", "CHAR(10)")
                .column("_tx", "INT")
                .column("name", "VARCHAR(40)")
                .unique(["_key"]),
        )
        .unwrap();
        db
    }

    fn insert(conn: &mut dyn Connection, key: &str, name: &str) -> SqlResult<u64> {
        conn.execute_update(
            &Statement::insert("widget")
                .value("_key", key)
                .value("_tx", "1")
                .value("name", name),
        )
    }

    #[test]
    fn uncommitted_insert_visibility() {
        let db = widget_db();
        let mut writer = db.trans_connection("w").unwrap();
        insert(writer.as_mut(), "1", "a").unwrap();

        let mut committed = db.query_connection("r").unwrap();
        let mut dirty = db.uncommitted_connection("d").unwrap();
        assert!(committed
            .execute_query(&Statement::select("widget"))
            .unwrap()
            .is_empty());
        assert_eq!(
            dirty
                .execute_query(&Statement::max("widget", "_key"))
                .unwrap()
                .scalar_int(),
            Some(1)
        );

        writer.rollback().unwrap();
        assert_eq!(db.row_count("widget").unwrap(), 0);
    }

    #[test]
    fn unique_constraint_sees_uncommitted_rows() {
        let db = widget_db();
        let mut a = db.trans_connection("a").unwrap();
        let mut b = db.trans_connection("b").unwrap();
        insert(a.as_mut(), "1", "a").unwrap();
        let err = insert(b.as_mut(), "1", "b").unwrap_err();
        assert!(err.is_duplicate_key());
    }

    #[test]
    fn for_update_conflicts_until_commit() {
        let db = widget_db();
        let mut seed = db.query_connection("seed").unwrap();
        insert(seed.as_mut(), "1", "a").unwrap();

        let lock = Statement::select("widget")
            .column("_tx")
            .filter("_key", "1")
            .for_update();
        let mut a = db.trans_connection("a").unwrap();
        let mut b = db.trans_connection("b").unwrap();
        assert_eq!(a.execute_query(&lock).unwrap().len(), 1);
        assert_eq!(db.locked_row_count(), 1);
        assert!(b.execute_query(&lock).unwrap_err().is_lock_wait_timeout());

        a.commit().unwrap();
        assert_eq!(db.locked_row_count(), 0);
        assert_eq!(b.execute_query(&lock).unwrap().len(), 1);
    }

    #[test]
    fn update_and_delete_respect_locks() {
        let db = widget_db();
        let mut seed = db.query_connection("seed").unwrap();
        insert(seed.as_mut(), "1", "a").unwrap();

        let mut a = db.trans_connection("a").unwrap();
        let rename = Statement::update("widget")
            .set("name", "b")
            .filter("_key", "1");
        assert_eq!(a.execute_update(&rename).unwrap(), 1);

        let err = seed
            .execute_update(&Statement::delete("widget").filter("_key", "1"))
            .unwrap_err();
        assert!(err.is_lock_wait_timeout());

        a.commit().unwrap();
        let rows = db.table_rows("widget").unwrap();
        assert_eq!(rows[0]["name"].as_deref(), Some("b"));
        assert_eq!(
            seed.execute_update(&Statement::delete("widget").filter("_key", "1"))
                .unwrap(),
            1
        );
        assert_eq!(db.row_count("widget").unwrap(), 0);
    }

    #[test]
    fn auto_increment_assigns_and_survives_rollback() {
        let db = InMemoryDatabase::new();
        db.create_table(
            TableSchema::new("ac_tx")
                .column("id", "INT")
                .column("tx_stat", "CHAR(1)")
                .unique(["id"])
                .auto_increment("id"),
        )
        .unwrap();

        let mut conn = db.trans_connection("t").unwrap();
        conn.execute_update(&Statement::insert("ac_tx").value("tx_stat", "P"))
            .unwrap();
        assert_eq!(conn.last_insert_id(), Some(1));
        conn.rollback().unwrap();

        conn.begin().unwrap();
        conn.execute_update(&Statement::insert("ac_tx").value("tx_stat", "P"))
            .unwrap();
        assert_eq!(conn.last_insert_id(), Some(2));
    }

    #[test]
    fn replace_overwrites_conflicting_row() {
        let db = widget_db();
        let mut conn = db.query_connection("c").unwrap();
        insert(conn.as_mut(), "1", "a").unwrap();
        let affected = conn
            .execute_update(
                &Statement::replace("widget")
                    .value("_key", "1")
                    .value("name", "z"),
            )
            .unwrap();
        assert_eq!(affected, 2);
        let rows = db.table_rows("widget").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"].as_deref(), Some("z"));
    }

    #[test]
    fn released_connection_rejects_work_and_rolls_back() {
        let db = widget_db();
        let mut conn = db.trans_connection("c").unwrap();
        insert(conn.as_mut(), "1", "a").unwrap();
        conn.finished();
        assert!(matches!(
            conn.execute_query(&Statement::select("widget")),
            Err(SqlError::ConnectionClosed { .. })
        ));
        assert_eq!(db.row_count("widget").unwrap(), 0);
        assert_eq!(db.locked_row_count(), 0);
    }

    #[test]
    fn unknown_table_and_column() {
        let db = widget_db();
        let mut conn = db.query_connection("c").unwrap();
        assert!(matches!(
            conn.execute_query(&Statement::select("nope")),
            Err(SqlError::NoSuchTable { .. })
        ));
        assert!(matches!(
            conn.execute_query(&Statement::select("widget").filter("colour", "red")),
            Err(SqlError::NoSuchColumn { .. })
        ));
    }
}
