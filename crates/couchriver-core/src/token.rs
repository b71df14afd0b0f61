//! Sequence tokens: the opaque position markers emitted by the `_changes` feed.
//!
//! CouchDB emits `seq` as an integer, classic BigCouch as an array and
//! CouchDB 2.x+ as a string. The river never interprets a token; it only
//! keeps the last one seen and turns it into the string stored in the
//! checkpoint, which is later passed back verbatim as `since`.

use serde_json::Value;

/// A feed position, exactly as the feed reported it.
#[derive(Debug, Clone, PartialEq)]
pub enum SequenceToken {
    /// A single scalar (number, string, bool) or an object.
    Scalar(Value),
    /// An ordered sequence of values (BigCouch style).
    Sequence(Vec<Value>),
}

impl SequenceToken {
    /// Build a token from the raw `seq` field. `null` yields no token.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Array(items) => Some(Self::Sequence(items)),
            other => Some(Self::Scalar(other)),
        }
    }

    /// The checkpoint form of this token.
    ///
    /// Strings are stored as-is, other scalars as their JSON text and
    /// sequences as a compact JSON array.
    pub fn to_checkpoint_string(&self) -> String {
        match self {
            Self::Scalar(Value::String(s)) => s.clone(),
            Self::Scalar(other) => other.to_string(),
            Self::Sequence(items) => Value::Array(items.clone()).to_string(),
        }
    }
}

impl std::fmt::Display for SequenceToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_checkpoint_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn null_seq_is_no_token() {
        assert!(SequenceToken::from_value(Value::Null).is_none());
    }

    #[test]
    fn scalar_tokens_use_plain_form() {
        let n = SequenceToken::from_value(json!(6)).unwrap();
        assert_eq!(n.to_checkpoint_string(), "6");

        let s = SequenceToken::from_value(json!("12-g1AAAAFTeJzLYWBg")).unwrap();
        assert_eq!(s.to_checkpoint_string(), "12-g1AAAAFTeJzLYWBg");
    }

    #[test]
    fn sequence_token_is_json_array() {
        let t = SequenceToken::from_value(json!([3, "g1AAAAG3eJzLYWBg"])).unwrap();
        let stored = t.to_checkpoint_string();
        assert_eq!(stored, r#"[3,"g1AAAAG3eJzLYWBg"]"#);

        // Reparsing the stored form gives back the same sequence.
        let reparsed: Value = serde_json::from_str(&stored).unwrap();
        assert_eq!(SequenceToken::from_value(reparsed), Some(t));
    }
}
