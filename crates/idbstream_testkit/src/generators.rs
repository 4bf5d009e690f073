//! Property-based test generators using proptest.

use idbstream_engine::{Key, Value};
use proptest::prelude::*;

/// Strategy for keys of either kind.
pub fn key_strategy() -> impl Strategy<Value = Key> {
    prop_oneof![
        any::<i64>().prop_map(Key::Int),
        text_key_strategy(),
    ]
}

/// Strategy for text keys.
pub fn text_key_strategy() -> impl Strategy<Value = Key> {
    prop::string::string_regex("[a-z][a-z0-9_-]{0,15}")
        .expect("Invalid regex")
        .prop_map(Key::Text)
}

/// Strategy for valid object store names.
pub fn store_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z][a-zA-Z0-9_]{0,31}").expect("Invalid regex")
}

/// Strategy for structured values: scalars, arrays and small objects.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i32>().prop_map(Value::from),
        "[ -~]{0,24}".prop_map(Value::from),
    ];
    leaf.prop_recursive(3, 16, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::from),
            prop::collection::btree_map("[a-z]{1,8}", inner, 0..4)
                .prop_map(|map| Value::Object(map.into_iter().collect())),
        ]
    })
}

/// Strategy for batches of distinct text keys with values.
pub fn entries_strategy(max: usize) -> impl Strategy<Value = Vec<(Key, Value)>> {
    prop::collection::btree_map(
        prop::string::string_regex("[a-z]{1,12}").expect("Invalid regex"),
        value_strategy(),
        0..max,
    )
    .prop_map(|map| map.into_iter().map(|(k, v)| (Key::Text(k), v)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn store_names_are_nonempty(name in store_name_strategy()) {
            prop_assert!(!name.is_empty());
        }

        #[test]
        fn generated_entries_are_sorted_and_distinct(entries in entries_strategy(8)) {
            let keys: Vec<&Key> = entries.iter().map(|(k, _)| k).collect();
            let mut sorted = keys.clone();
            sorted.sort();
            sorted.dedup();
            prop_assert_eq!(keys, sorted);
        }
    }
}
