//! Property-based test generators using proptest.
//!
//! Provides strategies for key strings, well formed and not, and for
//! field values of the built-in types.

use proptest::prelude::*;

/// Strategy for one well-formed key piece.
pub fn key_piece_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Za-z0-9_-]{1,10}").expect("Invalid regex")
}

/// Strategy for well-formed keys with a given number of pieces.
pub fn key_strategy(pieces: usize) -> impl Strategy<Value = String> {
    prop::collection::vec(key_piece_strategy(), pieces).prop_map(|parts| parts.join("."))
}

/// Strategy for strings containing at least one character not allowed in a key piece.
pub fn bad_piece_strategy() -> impl Strategy<Value = String> {
    (
        prop::string::string_regex("[A-Za-z0-9]{0,4}").expect("Invalid regex"),
        prop::sample::select(vec![' ', '\'', '|', '/', '%', '*', '"']),
        prop::string::string_regex("[A-Za-z0-9]{0,4}").expect("Invalid regex"),
    )
        .prop_map(|(head, bad, tail)| format!("{head}{bad}{tail}"))
}

/// Strategy for whole numbers in a range, as field input.
pub fn whole_number_strategy(min: i64, max: i64) -> impl Strategy<Value = String> {
    (min..=max).prop_map(|n| n.to_string())
}

/// Strategy for decimals below `max_whole` with up to `places` decimal
/// places, as field input.
pub fn decimal_strategy(max_whole: u32, places: u32) -> impl Strategy<Value = String> {
    (0..max_whole, 0..=places).prop_map(|(whole, digits)| {
        if digits == 0 {
            whole.to_string()
        } else {
            let fraction = 10u32.pow(digits) - 1;
            format!("{whole}.{fraction}")
        }
    })
}

/// Strategy for valid ISO dates.
pub fn iso_date_strategy() -> impl Strategy<Value = String> {
    (1970i32..2100, 1u32..=12, 1u32..=28)
        .prop_map(|(year, month, day)| format!("{year:04}-{month:02}-{day:02}"))
}

/// Strategy for widget names within the sample registry's length limit.
pub fn widget_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z ]{0,39}").expect("Invalid regex")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::strategy::ValueTree;
    use proptest::test_runner::TestRunner;

    #[test]
    fn key_strategy_piece_count() {
        let mut runner = TestRunner::default();
        for _ in 0..20 {
            let key = key_strategy(3).new_tree(&mut runner).unwrap().current();
            assert_eq!(key.split('.').count(), 3);
        }
    }

    #[test]
    fn decimal_places_bounded() {
        let mut runner = TestRunner::default();
        for _ in 0..20 {
            let value = decimal_strategy(1000, 2).new_tree(&mut runner).unwrap().current();
            let places = value.split_once('.').map_or(0, |(_, f)| f.len());
            assert!(places <= 2, "{value}");
        }
    }
}
