//! Keys and values stored in object stores.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A structured value stored against a key.
pub type Value = serde_json::Value;

/// A valid object-store key.
///
/// Keys order integers before text, matching the ordering used by the
/// browser engine for numbers and strings. Auto-increment stores generate
/// integer keys starting at 1.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Key {
    /// An integer key.
    Int(i64),
    /// A text key.
    Text(String),
}

impl Key {
    /// Returns the integer value if this is an integer key.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            Self::Text(_) => None,
        }
    }

    /// Returns the text value if this is a text key.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Int(_) => None,
            Self::Text(value) => Some(value),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(value) => write!(f, "{value}"),
            Self::Text(value) => write!(f, "{value:?}"),
        }
    }
}

impl From<i64> for Key {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Key {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&String> for Key {
    fn from(value: &String) -> Self {
        Self::Text(value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn integers_order_before_text() {
        let mut keys = vec![Key::from("b"), Key::from(10), Key::from("a"), Key::from(2)];
        keys.sort();
        assert_eq!(
            keys,
            vec![Key::Int(2), Key::Int(10), Key::from("a"), Key::from("b")]
        );
    }

    #[test]
    fn serializes_untagged() {
        assert_eq!(serde_json::to_value(Key::Int(3)).unwrap(), serde_json::json!(3));
        assert_eq!(
            serde_json::to_value(Key::from("k")).unwrap(),
            serde_json::json!("k")
        );
        let key: Key = serde_json::from_value(serde_json::json!("k")).unwrap();
        assert_eq!(key, Key::from("k"));
    }

    #[test]
    fn display() {
        assert_eq!(Key::Int(7).to_string(), "7");
        assert_eq!(Key::from("x").to_string(), "\"x\"");
    }

    proptest! {
        #[test]
        fn every_integer_sorts_before_every_text(n in any::<i64>(), text in ".{0,12}") {
            prop_assert!(Key::Int(n) < Key::Text(text));
        }
    }
}
