//! Audit rows and key counters.
//!
//! Every transaction owns an `ac_tx` row: written as pending when the
//! transaction begins, marked committed or cancelled when it ends. Each saved
//! row of a transactional entity adds an `ac_tx_sub` row. Counter key
//! allocation keeps one `ac_max_key` row per (table, key scope).

use chrono::Utc;
use tally_sql::{Connection, ConnectionPool, SqlError, Statement, TableSchema};
use tracing::{debug, warn};

use crate::error::{CoreError, CoreResult};
use crate::session::Session;
use crate::types::{Action, TransactionId};

/// Transaction audit table.
pub const TX_TABLE: &str = "ac_tx";

/// Row audit table.
pub const TX_SUB_TABLE: &str = "ac_tx_sub";

/// Key counter table.
pub const MAX_KEY_TABLE: &str = "ac_max_key";

/// Status recorded in `ac_tx.tx_stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    /// Begun, not yet finished.
    Pending,
    /// Saved.
    Committed,
    /// Cancelled or failed.
    Cancelled,
}

impl TxStatus {
    /// Returns the stored code: `P`, `A` or `C`.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Pending => "P",
            Self::Committed => "A",
            Self::Cancelled => "C",
        }
    }
}

/// Returns the audit and counter table layouts.
#[must_use]
pub fn system_tables() -> Vec<TableSchema> {
    vec![
        TableSchema::new(TX_TABLE)
            .column("id", "INT")
            .column("start_point", "DATETIME")
            .column("commit_point", "DATETIME")
            .column("user_id", "VARCHAR(255)")
            .column("session_id", "CHAR(36)")
            .column("tx_stat", "CHAR(1)")
            .column("outcome", "VARCHAR(255)")
            .column("conn_id", "VARCHAR(40)")
            .auto_increment("id")
            .unique(["id"]),
        TableSchema::new(TX_SUB_TABLE)
            .column("_key", "CHAR(30)")
            .column("tx", "INT")
            .column("id", "INT")
            .column("entity", "VARCHAR(255)")
            .column("key_string", "VARCHAR(255)")
            .column("action_type", "CHAR(1)")
            .column("prev_tx", "INT")
            .unique(["_key"]),
        TableSchema::new(MAX_KEY_TABLE)
            .column("entity", "VARCHAR(255)")
            .column("rest_of_key", "VARCHAR(255)")
            .column("highest_val", "INT")
            .column("taken_by_tx", "INT")
            .unique(["entity", "rest_of_key"]),
    ]
}

fn now() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Writes the pending `ac_tx` row and returns its id.
pub(crate) fn open_transaction(
    pool: &dyn ConnectionPool,
    session: &Session,
    connection: &dyn Connection,
) -> CoreResult<TransactionId> {
    let mut conn = pool.query_connection("ac_tx")?;
    let statement = Statement::insert(TX_TABLE)
        .value("start_point", now())
        .value("user_id", session.user_id())
        .value("session_id", session.session_id().to_string())
        .value("tx_stat", TxStatus::Pending.code())
        .value("conn_id", connection.id().to_string());
    conn.execute_update(&statement)?;
    let id = conn
        .last_insert_id()
        .ok_or_else(|| CoreError::invalid_operation("no id returned for ac_tx row"))?;
    conn.finished();
    Ok(TransactionId::new(id))
}

/// Marks the `ac_tx` row committed as part of the transaction itself.
pub(crate) fn record_commit(
    conn: &mut dyn Connection,
    tx: TransactionId,
    outcome: Option<&str>,
) -> CoreResult<()> {
    let statement = Statement::update(TX_TABLE)
        .set("tx_stat", TxStatus::Committed.code())
        .set("commit_point", now())
        .set_opt("outcome", outcome.map(str::to_string))
        .filter("id", tx.as_u64().to_string());
    conn.execute_update(&statement)?;
    Ok(())
}

/// Marks the `ac_tx` row cancelled on an autocommit connection.
pub(crate) fn record_cancel(pool: &dyn ConnectionPool, tx: TransactionId) -> CoreResult<()> {
    let mut conn = pool.query_connection("ac_tx")?;
    let statement = Statement::update(TX_TABLE)
        .set("tx_stat", TxStatus::Cancelled.code())
        .filter("id", tx.as_u64().to_string());
    conn.execute_update(&statement)?;
    conn.finished();
    Ok(())
}

/// Builds the `ac_tx_sub` row for one saved row.
pub(crate) fn sub_row(
    tx: TransactionId,
    row_number: u32,
    entity: &str,
    key: &str,
    action: Action,
    prev_tx: Option<&str>,
) -> Statement {
    Statement::insert(TX_SUB_TABLE)
        .value("_key", format!("{}.{row_number}", tx.as_u64()))
        .value("tx", tx.as_u64().to_string())
        .value("id", row_number.to_string())
        .value("entity", entity)
        .value("key_string", key)
        .value("action_type", action.code())
        .value_opt("prev_tx", prev_tx.map(str::to_string))
}

/// A request for the next counter value of a key scope.
#[derive(Debug)]
pub(crate) struct CounterRequest<'a> {
    /// Table of the entity.
    pub table: &'a str,
    /// Values of the other key fields, each followed by `|`.
    pub rest_of_key: &'a str,
    /// Generated key column, used to seed a new counter.
    pub column: &'a str,
    /// Other key columns and their values, used to seed a new counter.
    pub conditions: &'a [(String, String)],
    /// Transaction taking the value.
    pub tx: TransactionId,
}

/// Takes the next counter value in a committed side transaction.
///
/// Lock and duplicate conflicts with concurrent allocators are retried.
pub(crate) fn allocate_counter(
    pool: &dyn ConnectionPool,
    request: &CounterRequest<'_>,
    attempts: u32,
) -> CoreResult<i64> {
    for attempt in 1..=attempts.max(1) {
        let mut conn = pool.trans_connection("ac_max_key")?;
        match try_allocate(conn.as_mut(), request) {
            Ok(value) => {
                conn.commit()?;
                conn.finished();
                debug!(table = request.table, rest_of_key = request.rest_of_key, value, "counter value taken");
                return Ok(value);
            }
            Err(e) if e.is_lock_wait_timeout() || e.is_duplicate_key() => {
                warn!(table = request.table, attempt, error = %e, "counter allocation conflict");
                conn.finished();
            }
            Err(e) => {
                conn.finished();
                return Err(e.into());
            }
        }
    }
    Err(CoreError::RecordLocked {
        entity: MAX_KEY_TABLE.to_string(),
        key: format!("{}:{}", request.table, request.rest_of_key),
    })
}

fn try_allocate(conn: &mut dyn Connection, request: &CounterRequest<'_>) -> Result<i64, SqlError> {
    let current = conn.execute_query(
        &Statement::select(MAX_KEY_TABLE)
            .column("highest_val")
            .filter("entity", request.table)
            .filter("rest_of_key", request.rest_of_key)
            .for_update(),
    )?;
    if let Some(row) = current.first() {
        let next = row.get_int("highest_val").unwrap_or(0) + 1;
        conn.execute_update(
            &Statement::update(MAX_KEY_TABLE)
                .set("highest_val", next.to_string())
                .set("taken_by_tx", request.tx.as_u64().to_string())
                .filter("entity", request.table)
                .filter("rest_of_key", request.rest_of_key),
        )?;
        return Ok(next);
    }

    let mut seed = Statement::max(request.table, request.column);
    for (column, value) in request.conditions {
        seed = seed.filter(column.clone(), value.clone());
    }
    let next = conn.execute_query(&seed)?.scalar_int().unwrap_or(0) + 1;
    conn.execute_update(
        &Statement::insert(MAX_KEY_TABLE)
            .value("entity", request.table)
            .value("rest_of_key", request.rest_of_key)
            .value("highest_val", next.to_string())
            .value("taken_by_tx", request.tx.as_u64().to_string()),
    )?;
    Ok(next)
}

/// Gives back a counter value if this transaction was the last to take it.
pub(crate) fn release_counter(
    conn: &mut dyn Connection,
    table: &str,
    rest_of_key: &str,
    tx: TransactionId,
) -> CoreResult<bool> {
    let affected = conn.execute_update(
        &Statement::update(MAX_KEY_TABLE)
            .increment("highest_val", -1)
            .filter("entity", table)
            .filter("taken_by_tx", tx.as_u64().to_string())
            .filter("rest_of_key", rest_of_key),
    )?;
    Ok(affected > 0)
}
