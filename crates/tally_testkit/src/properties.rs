//! Property tests for key strings and field values.

use proptest::prelude::*;
use tally_core::{CoreError, FieldSet, FieldSpec, NoContext, RowInit, TypeRegistry};

use crate::{
    bad_piece_strategy, decimal_strategy, key_piece_strategy, key_strategy, sample_registry,
    whole_number_strategy, widget_name_strategy, TestEnv,
};

fn criteria() -> FieldSet {
    let types = TypeRegistry::builder().build();
    let mut set = FieldSet::new(true);
    set.add_field(FieldSpec::text("name").data_length(8).mandatory(), &types)
        .unwrap();
    set.add_field(FieldSpec::number("count").min("0").max("500"), &types)
        .unwrap();
    set
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn order_keys_need_two_pieces(good in key_strategy(2), long in key_strategy(3)) {
        let registry = sample_registry();
        let key = registry.entity("order").unwrap().key();
        prop_assert!(key.check_key(&good).is_ok());
        prop_assert!(key.is_complete(&good));
        let is_invalid = matches!(key.check_key(&long), Err(CoreError::InvalidKey { .. }));
        prop_assert!(is_invalid);
    }

    #[test]
    fn split_gives_back_each_piece(customer in key_piece_strategy(), seq in key_piece_strategy()) {
        let registry = sample_registry();
        let key = registry.entity("order").unwrap().key();
        let values = key.split(&format!("{customer}.{seq}")).unwrap();
        prop_assert_eq!(
            values,
            vec![("customer".to_string(), customer), ("seq".to_string(), seq)]
        );
    }

    #[test]
    fn line_keys_carry_the_order_key(order in key_strategy(2), line in key_piece_strategy()) {
        let registry = sample_registry();
        let key = registry.entity("order_line").unwrap().key();
        let values = key.split(&format!("{order}.{line}")).unwrap();
        prop_assert_eq!(&values[0].1, &order);
        prop_assert_eq!(&values[1].1, &line);
    }

    #[test]
    fn bad_pieces_are_rejected(bad in bad_piece_strategy(), good in key_piece_strategy()) {
        let registry = sample_registry();
        let key = registry.entity("order").unwrap().key();
        let joined = format!("{good}.{bad}");
        let trailing = format!("{good}.");
        prop_assert!(key.check_key(&joined).is_err());
        prop_assert!(key.check_key(&trailing).is_err());
        prop_assert!(key.check_key("").is_err());
    }

    #[test]
    fn validation_is_repeatable(name in "[a-z]{0,12}", count in whole_number_strategy(-50, 600)) {
        let mut set = criteria();
        set.set("name", &name).unwrap();
        set.set("count", &count).unwrap();

        let first = set.is_valid(false, None, &mut NoContext).unwrap();
        let messages: Vec<String> = set
            .fields()
            .flat_map(|f| f.messages().iter().map(|m| m.text.clone()).collect::<Vec<_>>())
            .collect();
        set.validate(&mut NoContext).unwrap();
        let again: Vec<String> = set
            .fields()
            .flat_map(|f| f.messages().iter().map(|m| m.text.clone()).collect::<Vec<_>>())
            .collect();
        prop_assert_eq!(&messages, &again);

        let n: i64 = count.parse().unwrap();
        let expected = !name.is_empty() && name.len() <= 8 && (0..=500).contains(&n);
        prop_assert_eq!(first, expected);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn widget_values_round_trip(name in widget_name_strategy(), weight in decimal_strategy(1000, 2)) {
        let env = TestEnv::new();
        env.store
            .transaction(&env.session, None, |tx| {
                tx.create_new_row(
                    "widget",
                    RowInit::new().value("name", name.as_str()).value("weight", weight.as_str()),
                )?;
                Ok(())
            })
            .unwrap();

        let mut tx = env.begin();
        let row = tx.get_active_row("widget", "1").unwrap();
        prop_assert_eq!(tx.get(row, "name").unwrap(), name.as_str());
        prop_assert_eq!(tx.get(row, "weight").unwrap(), weight.as_str());
        tx.cancel().unwrap();
    }
}
