//! Cross-crate integration checks.
//!
//! Each check drives a [`TestEnv`] through the data store and verifies the
//! tables the SQL backend ends up holding.

use std::collections::BTreeMap;

use tally_core::{CoreError, RowInit, TransactionId};
use tally_sql::{ConnectionPool, Statement};

use crate::fixtures::TestEnv;

type Record = BTreeMap<String, Option<String>>;

fn column<'a>(record: &'a Record, name: &str) -> Option<&'a str> {
    record.get(name).and_then(|v| v.as_deref())
}

fn tx_value(tx: TransactionId) -> String {
    tx.as_u64().to_string()
}

/// Returns the `ac_tx` status of a transaction.
pub fn tx_status(env: &TestEnv, tx: TransactionId) -> Option<String> {
    let id = tx_value(tx);
    env.rows("ac_tx")
        .into_iter()
        .find(|r| column(r, "id") == Some(id.as_str()))
        .and_then(|r| r["tx_stat"].clone())
}

/// Test history and audit rows of transactional entities.
pub mod history {
    use super::*;

    /// Saves a widget, renames it in a second transaction and verifies one
    /// history image per transaction and the matching audit sub rows.
    pub fn test_history_images(env: &TestEnv) {
        let mut create = env.begin();
        create
            .create_new_row("widget", RowInit::new().value("name", "bolt"))
            .expect("Failed to create widget");
        create.save(None).expect("Failed to save widget");
        let first = tx_value(create.id());

        let mut update = env.begin();
        let row = update
            .get_active_row("widget", "1")
            .expect("Failed to load widget");
        update.set(row, "name", "nut").expect("Failed to rename widget");
        update.save(None).expect("Failed to save rename");
        let second = tx_value(update.id());

        let images: Vec<(String, String, String)> = env
            .rows("_history_widget")
            .iter()
            .map(|r| {
                (
                    column(r, "_tx").unwrap_or_default().to_string(),
                    column(r, "_key").unwrap_or_default().to_string(),
                    column(r, "name").unwrap_or_default().to_string(),
                )
            })
            .collect();
        assert_eq!(
            images,
            vec![
                (first.clone(), "1".to_string(), "bolt".to_string()),
                (second.clone(), "1".to_string(), "nut".to_string()),
            ],
            "one image per saving transaction"
        );

        let stored = env.rows("widget");
        assert_eq!(column(&stored[0], "_tx"), Some(second.as_str()));

        let subs: Vec<(String, String, Option<String>)> = env
            .rows("ac_tx_sub")
            .iter()
            .map(|r| {
                (
                    column(r, "tx").unwrap_or_default().to_string(),
                    column(r, "action_type").unwrap_or_default().to_string(),
                    r["prev_tx"].clone(),
                )
            })
            .collect();
        assert_eq!(
            subs,
            vec![
                (first.clone(), "C".to_string(), None),
                (second, "U".to_string(), Some(first)),
            ]
        );
    }

    /// Verifies that entities kept out of the audit trail write no history.
    pub fn test_plain_entities_have_no_history(env: &TestEnv) {
        env.store
            .transaction(&env.session, None, |tx| {
                tx.create_new_row("note", RowInit::new().value("text", "first"))?;
                Ok(())
            })
            .expect("Failed to save note");
        assert_eq!(env.count("note"), 1);
        assert_eq!(env.count("ac_tx_sub"), 0);
    }
}

/// Test recovery from failed saves.
pub mod recovery {
    use super::*;

    /// Makes the second of two inserts collide with a record committed by
    /// another connection after the key was checked, then verifies that the
    /// first insert is rolled back, the audit row is cancelled and the
    /// counter values are given back.
    pub fn test_failed_save_rolls_back(env: &TestEnv) {
        let mut tx = env.begin();
        tx.create_new_row("widget", RowInit::new().value("name", "bolt"))
            .expect("Failed to create widget");
        let second = tx
            .create_new_row("widget", RowInit::new().value("name", "nut"))
            .expect("Failed to create widget");
        tx.set(second, "id", "7").expect("Failed to set key");
        assert_eq!(tx.row(second).expect("row").key(), "7");

        let mut other = env
            .db
            .trans_connection("other")
            .expect("Failed to open connection");
        other
            .execute_update(
                &Statement::insert("widget")
                    .value("_key", "7")
                    .value("id", "7")
                    .value("name", "taken"),
            )
            .expect("Failed to insert");
        other.commit().expect("Failed to commit");

        let err = tx.save(None).unwrap_err();
        assert!(
            matches!(&err, CoreError::Sql(e) if e.is_duplicate_key()),
            "unexpected error: {err}"
        );
        assert!(!tx.is_active());
        assert_eq!(tx_status(env, tx.id()).as_deref(), Some("C"));

        let keys: Vec<Option<String>> = env
            .rows("widget")
            .into_iter()
            .map(|r| r["_key"].clone())
            .collect();
        assert_eq!(keys, vec![Some("7".to_string())]);
        assert_eq!(env.count("_history_widget"), 0);
        assert_eq!(env.count("ac_tx_sub"), 0);
        assert_eq!(env.db.locked_row_count(), 0);

        let counters = env.rows("ac_max_key");
        assert_eq!(column(&counters[0], "highest_val"), Some("0"));

        let mut retry = env.begin();
        let row = retry
            .create_new_row("widget", RowInit::new().value("name", "bolt"))
            .expect("Failed to create widget");
        assert_eq!(retry.row(row).expect("row").key(), "1");
        retry.save(None).expect("Failed to save retry");
    }

    /// Deletes a loaded record through another connection before its first
    /// change. The lock attempt notices, and the save is refused while the
    /// transaction stays open.
    pub fn test_record_deleted_elsewhere(env: &TestEnv) {
        env.store
            .transaction(&env.session, None, |tx| {
                tx.create_new_row("widget", RowInit::new().value("name", "bolt"))?;
                Ok(())
            })
            .expect("Failed to seed widget");

        let mut tx = env.begin();
        let row = tx.get_active_row("widget", "1").expect("Failed to load widget");

        let mut other = env
            .db
            .trans_connection("other")
            .expect("Failed to open connection");
        other
            .execute_update(&Statement::delete("widget").filter("_key", "1"))
            .expect("Failed to delete");
        other.commit().expect("Failed to commit");

        tx.set(row, "name", "nut").expect("Failed to set name");
        assert!(!tx.row(row).expect("row").is_locked());
        assert!(matches!(tx.save(None), Err(CoreError::Invalid { .. })));
        assert!(tx.is_active());
        tx.cancel().expect("Failed to cancel");
        assert_eq!(tx_status(env, tx.id()).as_deref(), Some("C"));
        assert_eq!(env.count("widget"), 0);
    }
}
