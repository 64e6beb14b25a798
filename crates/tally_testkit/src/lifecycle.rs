//! Row lifecycle: deletion, hooks, rollback and key allocation.

use tally_core::{
    Config, CoreError, ListOfValues, MessageTag, RowInit, TransactionState, TransactionStatus,
    TypeRegistry,
};

use crate::{widget, TestEnv};

fn tx_stat(env: &TestEnv, id: u64) -> Option<String> {
    env.rows("ac_tx")
        .into_iter()
        .find(|r| r["id"].as_deref() == Some(id.to_string().as_str()))
        .and_then(|r| r["tx_stat"].clone())
}

#[test]
fn deleting_order_deletes_its_lines() {
    let env = TestEnv::new();
    env.seed_customer("C1", "Acme").unwrap();
    env.store
        .transaction(&env.session, None, |tx| {
            let order = tx.create_new_row("order", RowInit::new().value("customer", "C1"))?;
            for product in ["bolt", "nut"] {
                tx.create_new_row(
                    "order_line",
                    RowInit::new().parent(order).value("product", product),
                )?;
            }
            Ok(())
        })
        .unwrap();
    assert_eq!(env.count("orders"), 1);
    assert_eq!(env.count("order_line"), 2);

    let mut tx = env.begin();
    let order = tx.get_active_row("order", "C1.1").unwrap();
    tx.set_delete(order, true).unwrap();
    assert!(tx.is_in_cache("order_line", "C1.1.1"));
    assert!(tx.is_in_cache("order_line", "C1.1.2"));
    let line = tx.get_active_row("order_line", "C1.1.2").unwrap();
    assert!(tx.row(line).unwrap().is_deleting());
    tx.save(None).unwrap();

    assert_eq!(env.count("orders"), 0);
    assert_eq!(env.count("order_line"), 0);
    assert_eq!(env.count("customer"), 1);
    let deletes = env
        .rows("ac_tx_sub")
        .into_iter()
        .filter(|r| r["action_type"].as_deref() == Some("D"))
        .count();
    assert_eq!(deletes, 3);
    assert!(!tx.is_in_cache("order", "C1.1"));
}

#[test]
fn unsaved_children_follow_parent_deletion() {
    let env = TestEnv::new();
    env.seed_customer("C1", "Acme").unwrap();
    env.store
        .transaction(&env.session, None, |tx| {
            tx.create_new_row("order", RowInit::new().value("customer", "C1"))?;
            Ok(())
        })
        .unwrap();

    let mut tx = env.begin();
    let order = tx.get_active_row("order", "C1.1").unwrap();
    let line = tx
        .create_new_row("order_line", RowInit::new().parent(order).value("product", "bolt"))
        .unwrap();
    tx.set_delete(order, true).unwrap();
    assert!(tx.row(line).unwrap().is_deleting());
    tx.save(None).unwrap();
    assert_eq!(env.count("orders"), 0);
    assert_eq!(env.count("order_line"), 0);
}

fn hooked_env() -> TestEnv {
    let mut builder = TypeRegistry::builder();
    builder.add_list(ListOfValues::new("colour").item("red", "Red"));
    builder
        .add_entity(
            widget()
                .on_init_create(|row| {
                    row.set("weight", "1")?;
                    Ok(())
                })
                .on_presave(|row, outcome| {
                    if outcome == Some("stamp") {
                        let name = row.get("name")?;
                        row.set("name", &format!("{name}!"))?;
                    }
                    Ok(())
                })
                .on_before_field_change(|_, field, value| {
                    if field == "name" && value == "forbidden" {
                        Err(CoreError::vetoed(field, "name is reserved"))
                    } else {
                        Ok(())
                    }
                })
                .on_after_field_change(|row, field, old| {
                    if field == "weight" {
                        row.add_warning(format!("weight was {old}"))?;
                    }
                    Ok(())
                }),
        )
        .unwrap();
    TestEnv::with_registry(builder.build(), Config::default())
}

#[test]
fn hooks_run_at_each_stage() {
    let env = hooked_env();
    let mut tx = env.begin();
    let row = tx.create_new_row("widget", RowInit::new()).unwrap();
    assert_eq!(tx.get(row, "weight").unwrap(), "1");

    tx.set(row, "weight", "5").unwrap();
    assert!(tx.row(row).unwrap().messages().contains("weight was 1"));

    assert!(matches!(
        tx.set(row, "name", "forbidden"),
        Err(CoreError::Vetoed { .. })
    ));
    assert_eq!(tx.get(row, "name").unwrap(), "");

    tx.set(row, "name", "bolt").unwrap();
    tx.save(Some("stamp")).unwrap();

    let rows = env.rows("widget");
    assert_eq!(rows[0]["name"].as_deref(), Some("bolt!"));
    assert_eq!(rows[0]["weight"].as_deref(), Some("5"));
    let audit = env.rows("ac_tx");
    let own = audit
        .iter()
        .find(|r| r["id"].as_deref() == Some(tx.id().as_u64().to_string().as_str()))
        .unwrap();
    assert_eq!(own["outcome"].as_deref(), Some("stamp"));
    assert_eq!(own["tx_stat"].as_deref(), Some("A"));
}

#[test]
fn dropped_transaction_rolls_back() {
    let env = TestEnv::new();
    let id = {
        let mut tx = env.begin();
        let row = tx
            .create_new_row("widget", RowInit::new().value("name", "bolt"))
            .unwrap();
        assert_eq!(tx.row(row).unwrap().key(), "1");
        tx.id()
    };
    assert!(env.session.active_transactions().is_empty());
    assert_eq!(tx_stat(&env, id.as_u64()).as_deref(), Some("C"));
    assert_eq!(env.count("widget"), 0);

    let mut tx = env.begin();
    let row = tx
        .create_new_row("widget", RowInit::new().value("name", "nut"))
        .unwrap();
    assert_eq!(tx.row(row).unwrap().key(), "1");
    tx.save(None).unwrap();
    assert_eq!(tx_stat(&env, tx.id().as_u64()).as_deref(), Some("A"));
}

#[test]
fn removed_row_gives_back_its_counter() {
    let env = TestEnv::new();
    let mut tx = env.begin();
    let first = tx.create_new_row("widget", RowInit::new()).unwrap();
    tx.remove_row(first).unwrap();
    assert!(matches!(tx.row(first), Err(CoreError::UnknownRow { .. })));
    assert!(!tx.is_in_cache("widget", "1"));

    let second = tx
        .create_new_row("widget", RowInit::new().value("name", "bolt"))
        .unwrap();
    assert_eq!(tx.row(second).unwrap().key(), "1");
    assert_eq!(tx.row_count(false), 1);
    tx.save(None).unwrap();
}

#[test]
fn removed_row_deletes_its_claimed_record() {
    let env = TestEnv::new();
    let mut tx = env.begin();
    let claimed = tx
        .create_new_row("customer", RowInit::new().value("code", "C9"))
        .unwrap();
    assert!(tx.row(claimed).unwrap().exists_in_db());
    tx.remove_row(claimed).unwrap();

    let again = tx
        .create_new_row(
            "customer",
            RowInit::new().value("code", "C9").value("name", "Zeta"),
        )
        .unwrap();
    assert!(!tx.row(again).unwrap().messages().has_tag(MessageTag::DuplicateKey));
    tx.create_new_row("widget", RowInit::new().value("name", "bolt"))
        .unwrap();
    tx.save(None).unwrap();

    let customers = env.rows("customer");
    assert_eq!(customers.len(), 1);
    assert_eq!(customers[0]["name"].as_deref(), Some("Zeta"));
}

#[test]
fn counters_are_unique_across_transactions() {
    let env = TestEnv::new();
    let mut a = env.begin();
    let mut b = env.begin_as("other");
    let row_a = a
        .create_new_row("widget", RowInit::new().value("name", "bolt"))
        .unwrap();
    let row_b = b
        .create_new_row("widget", RowInit::new().value("name", "nut"))
        .unwrap();
    let row_a2 = a
        .create_new_row("widget", RowInit::new().value("name", "washer"))
        .unwrap();
    assert_eq!(a.row(row_a).unwrap().key(), "1");
    assert_eq!(b.row(row_b).unwrap().key(), "2");
    assert_eq!(a.row(row_a2).unwrap().key(), "3");

    b.save(None).unwrap();
    a.save(None).unwrap();
    assert_eq!(env.count("widget"), 3);
}

#[test]
fn stored_key_conflict_is_reported_then_cleared() {
    let env = TestEnv::new();
    env.seed_customer("C1", "Acme").unwrap();

    let mut tx = env.begin();
    let row = tx
        .create_new_row(
            "customer",
            RowInit::new().value("code", "C1").value("name", "Other"),
        )
        .unwrap();
    let conflict = tx.row(row).unwrap().messages().tagged(MessageTag::DuplicateKey);
    assert_eq!(
        conflict.map(|m| (m.field.as_deref(), m.text.as_str())),
        Some((Some("code"), "key value conflicts with another record: C1"))
    );
    assert!(!tx.row(row).unwrap().is_full_key());
    assert_eq!(tx.status().unwrap(), TransactionStatus::Invalid);

    tx.set(row, "code", "C2").unwrap();
    let fixed = tx.row(row).unwrap();
    assert!(!fixed.messages().has_tag(MessageTag::DuplicateKey));
    assert_eq!(fixed.key(), "C2");
    assert!(fixed.exists_in_db());
    assert!(tx.is_in_cache("customer", "C2"));
    assert_eq!(tx.status().unwrap(), TransactionStatus::Valid);
    tx.save(None).unwrap();
    assert_eq!(env.count("customer"), 2);
}

#[test]
fn stored_key_fields_are_fixed() {
    let env = TestEnv::new();
    env.seed_customer("C1", "Acme").unwrap();
    let mut tx = env.begin();
    let row = tx.get_active_row("customer", "C1").unwrap();
    assert!(matches!(
        tx.set(row, "code", "C7"),
        Err(CoreError::FixedKey { .. })
    ));
    assert!(tx.set(row, "name", "Acme Ltd").unwrap());
    tx.save(None).unwrap();
    assert_eq!(env.rows("customer")[0]["name"].as_deref(), Some("Acme Ltd"));
}

#[test]
fn status_follows_lifecycle() {
    let env = TestEnv::new();
    let mut saved = env.begin();
    let row = saved.create_new_row("widget", RowInit::new()).unwrap();
    assert_eq!(saved.status().unwrap(), TransactionStatus::Invalid);
    saved.set(row, "name", "bolt").unwrap();
    assert_eq!(saved.status().unwrap(), TransactionStatus::Valid);
    saved.save(None).unwrap();
    assert_eq!(saved.status().unwrap(), TransactionStatus::Saved);

    let mut cancelled = env.begin();
    cancelled.cancel().unwrap();
    assert_eq!(cancelled.state(), TransactionState::Aborted);
    assert_eq!(cancelled.status().unwrap(), TransactionStatus::Inactive);
    assert!(matches!(
        cancelled.create_new_row("widget", RowInit::new()),
        Err(CoreError::NotActive { .. })
    ));
}

#[test]
fn existing_rows_are_ordered_by_key() {
    let env = TestEnv::new();
    let mut tx = env.begin();
    let widget = tx
        .create_new_row("widget", RowInit::new().value("name", "bolt"))
        .unwrap();
    let b2 = tx
        .create_new_row("customer", RowInit::new().value("code", "B2").value("name", "Bee"))
        .unwrap();
    let a1 = tx
        .create_new_row("customer", RowInit::new().value("code", "A1").value("name", "Ay"))
        .unwrap();

    assert_eq!(tx.existing_rows(Some("customer")), vec![a1, b2]);
    assert_eq!(tx.existing_rows(None), vec![widget, a1, b2]);
    assert_eq!(tx.full_key_row_count(false), 3);
}

#[test]
fn values_survive_reload() {
    let env = TestEnv::new();
    env.store
        .transaction(&env.session, None, |tx| {
            tx.create_new_row(
                "widget",
                RowInit::new()
                    .value("name", "bolt")
                    .value("colour", "red")
                    .value("weight", "12.5"),
            )?;
            tx.create_new_row("note", RowInit::new().value("text", "first line"))?;
            Ok(())
        })
        .unwrap();

    let mut tx = env.begin();
    let widget = tx.get_active_row("widget", "1").unwrap();
    assert_eq!(tx.get(widget, "name").unwrap(), "bolt");
    assert_eq!(tx.get(widget, "colour").unwrap(), "red");
    assert_eq!(tx.get(widget, "weight").unwrap(), "12.5");
    assert!(!tx.row(widget).unwrap().is_modified());

    let note = tx.get_active_row("note", "1").unwrap();
    assert_eq!(tx.get(note, "text").unwrap(), "first line");
    assert_eq!(tx.get(note, "id").unwrap(), "1");
    assert!(tx.row(note).unwrap().curr_tx().is_none());
}
