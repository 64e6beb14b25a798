//! End-to-end scenarios over the sample registry.

use tally_core::{Action, CoreError, MessageTag, RowInit, TransactionState, TransactionStatus};

use crate::TestEnv;

fn seed_widget(env: &TestEnv, name: &str) {
    env.store
        .transaction(&env.session, None, |tx| {
            tx.create_new_row("widget", RowInit::new().value("name", name))?;
            Ok(())
        })
        .unwrap();
}

#[test]
fn blank_mandatory_field_refuses_save() {
    let env = TestEnv::new();
    let mut tx = env.begin();
    let row = tx.create_new_row("widget", RowInit::new()).unwrap();
    assert_eq!(tx.row(row).unwrap().key(), "1");

    assert!(!tx.is_valid().unwrap());
    assert!(tx
        .row(row)
        .unwrap()
        .field("name")
        .unwrap()
        .messages()
        .contains("mandatory"));

    match tx.save(None) {
        Err(CoreError::Invalid { messages }) => {
            assert_eq!(messages, vec!["Name: mandatory".to_string()]);
        }
        other => panic!("expected Invalid, got {other:?}"),
    }
    assert!(tx.is_active());
    assert_eq!(tx.status().unwrap(), TransactionStatus::Invalid);
    assert_eq!(env.count("widget"), 0);
}

#[test]
fn saved_row_is_no_longer_modifiable() {
    let env = TestEnv::new();
    let mut tx = env.begin();
    let row = tx.create_new_row("widget", RowInit::new()).unwrap();
    tx.set(row, "name", "Foo").unwrap();
    tx.save(None).unwrap();

    assert_eq!(tx.state(), TransactionState::Committed);
    assert_eq!(tx.status().unwrap(), TransactionStatus::Saved);
    let saved = tx.row(row).unwrap();
    assert!(saved.exists_in_db());
    assert!(!saved.is_modifiable());
    assert_eq!(saved.action(), Some(Action::Create));
    assert!(matches!(
        tx.set(row, "name", "Bar"),
        Err(CoreError::NotModifiable { .. })
    ));

    let rows = env.rows("widget");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["name"].as_deref(), Some("Foo"));
    assert_eq!(rows[0]["_tx"].as_deref(), Some(tx.id().as_u64().to_string().as_str()));
}

#[test]
fn concurrent_edit_fails_lock_and_validity() {
    let env = TestEnv::new();
    seed_widget(&env, "bolt");

    let mut a = env.begin();
    let row_a = a.get_active_row("widget", "1").unwrap();
    a.set(row_a, "name", "nut").unwrap();
    assert!(a.row(row_a).unwrap().is_locked());

    let mut b = env.begin_as("other");
    let row_b = b.get_active_row("widget", "1").unwrap();
    assert_eq!(b.get(row_b, "name").unwrap(), "bolt");
    b.set(row_b, "name", "washer").unwrap();
    let locked_out = b.row(row_b).unwrap();
    assert!(!locked_out.is_locked());
    assert!(locked_out.messages().has_tag(MessageTag::LockFailure));
    assert!(!b.is_valid().unwrap());
    match b.save(None) {
        Err(CoreError::Invalid { messages }) => {
            assert!(messages
                .iter()
                .any(|m| m.contains("record has been updated by another user")));
        }
        other => panic!("expected Invalid, got {other:?}"),
    }

    a.save(None).unwrap();
    assert_eq!(env.rows("widget")[0]["name"].as_deref(), Some("nut"));

    // the record now carries a's transaction id, so b stays locked out
    b.set(row_b, "name", "washer 2").unwrap();
    assert!(b.row(row_b).unwrap().messages().has_tag(MessageTag::LockFailure));
    b.cancel().unwrap();
}

#[test]
fn lock_failure_clears_once_lock_succeeds() {
    let env = TestEnv::new();
    seed_widget(&env, "bolt");

    let mut a = env.begin();
    let row_a = a.get_active_row("widget", "1").unwrap();
    a.set(row_a, "name", "nut").unwrap();

    let mut b = env.begin_as("other");
    let row_b = b.get_active_row("widget", "1").unwrap();
    b.set(row_b, "name", "washer").unwrap();
    assert!(b.row(row_b).unwrap().messages().has_tag(MessageTag::LockFailure));

    a.cancel().unwrap();
    b.set(row_b, "weight", "3").unwrap();
    let row = b.row(row_b).unwrap();
    assert!(row.is_locked());
    assert!(!row.messages().has_tag(MessageTag::LockFailure));
    b.save(None).unwrap();

    let rows = env.rows("widget");
    assert_eq!(rows[0]["name"].as_deref(), Some("washer"));
    assert_eq!(rows[0]["weight"].as_deref(), Some("3"));
}

#[test]
fn child_created_first_gets_parent_key() {
    let env = TestEnv::new();
    env.seed_customer("C1", "Acme").unwrap();

    let mut tx = env.begin();
    let line = tx
        .create_new_row(
            "order_line",
            RowInit::new().value("product", "bolt").value("quantity", "2"),
        )
        .unwrap();
    assert_eq!(tx.row(line).unwrap().key(), "");
    assert_eq!(tx.partial_key_row_count(false), 1);

    let order = tx.create_new_row("order", RowInit::new()).unwrap();
    assert_eq!(tx.get(order, "status").unwrap(), "draft");
    tx.link_to_parent(line, order).unwrap();
    assert_eq!(tx.partial_key_row_count(false), 2);

    tx.set(order, "customer", "C1").unwrap();
    assert_eq!(tx.row(order).unwrap().key(), "C1.1");
    assert_eq!(tx.get(line, "order").unwrap(), "C1.1");
    assert_eq!(tx.row(line).unwrap().key(), "C1.1.1");
    assert!(tx.is_in_cache("order_line", "C1.1.1"));
    assert_eq!(tx.partial_key_row_count(false), 0);
    assert_eq!(tx.full_key_row_count(true), 2);

    tx.save(Some("placed")).unwrap();
    let lines = env.rows("order_line");
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["_key"].as_deref(), Some("C1.1.1"));
    assert_eq!(lines[0]["order"].as_deref(), Some("C1.1"));
    assert_eq!(env.rows("orders")[0]["status"].as_deref(), Some("draft"));
}

#[test]
fn partial_rows_block_save() {
    let env = TestEnv::new();
    let mut tx = env.begin();
    let order = tx
        .create_new_row("order", RowInit::new().value("order_date", "2026-01-05"))
        .unwrap();
    assert!(tx.is_modified());
    assert_eq!(tx.partial_key_rows_description(), "order:row:1");
    tx.presave(None).unwrap();
    assert!(tx
        .messages()
        .contains("partial-key row still exists: order:row:1"));
    assert!(!tx.row(order).unwrap().is_full_key());
    assert!(matches!(tx.save(None), Err(CoreError::Invalid { .. })));
}

#[test]
fn presave_twice_is_rejected() {
    let env = TestEnv::new();
    let mut tx = env.begin();
    tx.create_new_row("widget", RowInit::new().value("name", "bolt"))
        .unwrap();
    tx.presave(None).unwrap();
    assert!(matches!(tx.presave(None), Err(CoreError::AlreadyPresaved)));
    assert!(matches!(tx.update(), Err(CoreError::AlreadyPresaved)));
    tx.save(None).unwrap();
}

#[test]
fn same_key_gives_same_row() {
    let env = TestEnv::new();
    seed_widget(&env, "bolt");

    let mut tx = env.begin();
    let first = tx.get_active_row("widget", "1").unwrap();
    let second = tx.get_active_row("widget", "1").unwrap();
    let third = tx.get_row("widget", "1", RowInit::new()).unwrap();
    assert_eq!(first, second);
    assert_eq!(first, third);
    assert_eq!(tx.row_count(false), 1);
    assert_eq!(tx.row(first).unwrap().action(), Some(Action::Update));
}

#[test]
fn unknown_and_malformed_keys() {
    let env = TestEnv::new();
    let mut tx = env.begin();
    assert!(matches!(
        tx.get_active_row("widget", "9"),
        Err(CoreError::NotFound { .. })
    ));
    assert!(matches!(
        tx.get_active_row("order", "C1"),
        Err(CoreError::InvalidKey { .. })
    ));
    assert!(matches!(
        tx.get_active_row("gadget", "1"),
        Err(CoreError::UnknownEntity { .. })
    ));
    assert_eq!(tx.row_count(false), 0);
}

#[test]
fn get_row_creates_missing_record() {
    let env = TestEnv::new();
    env.seed_customer("C1", "Acme").unwrap();

    let mut tx = env.begin();
    let existing = tx.get_row("customer", "C1", RowInit::new()).unwrap();
    assert_eq!(tx.row(existing).unwrap().action(), Some(Action::Update));

    let created = tx
        .get_row("customer", "C9", RowInit::new().value("name", "Zeta"))
        .unwrap();
    assert_eq!(created.number(), existing.number() + 1);
    let row = tx.row(created).unwrap();
    assert_eq!(row.action(), Some(Action::Create));
    assert_eq!(row.key(), "C9");
    assert!(row.exists_in_db());
    tx.save(None).unwrap();

    let names: Vec<_> = env
        .rows("customer")
        .into_iter()
        .filter_map(|r| r["name"].clone())
        .collect();
    assert_eq!(names, vec!["Acme".to_string(), "Zeta".to_string()]);
}

#[test]
fn unmodified_transaction_is_not_saved() {
    let env = TestEnv::new();
    let mut tx = env.begin();
    assert!(matches!(tx.save(None), Err(CoreError::NotModified)));
    assert!(tx.is_active());
    tx.cancel().unwrap();
    assert!(matches!(tx.cancel(), Err(CoreError::NotActive { .. })));
}
