//! Change events read from the feed and the mutations derived from them.

use serde_json::{Map, Value};

use crate::token::SequenceToken;

/// Prefix of CouchDB design document ids. Design documents are never indexed.
pub const DESIGN_DOC_PREFIX: &str = "_design/";

/// Field of `doc` holding attachment metadata.
pub const ATTACHMENTS_FIELD: &str = "_attachments";

/// One parsed line of the `_changes` feed.
///
/// Fields the river does not interpret (`changes`, `rev`, anything a
/// transform adds) are kept in `extra` so a transform sees the whole record.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    /// `seq`: position of this change in the feed.
    pub seq: Option<SequenceToken>,
    /// `id`: the document id.
    pub id: String,
    /// `deleted`: the document was deleted.
    pub deleted: bool,
    /// `ignore`: set by a transform to skip the change.
    pub ignore: bool,
    /// `doc`: the document body (present with `include_docs=true`).
    pub doc: Option<Map<String, Value>>,
    /// `_index` override.
    pub index: Option<String>,
    /// `_type` override.
    pub doc_type: Option<String>,
    /// `_routing` override.
    pub routing: Option<String>,
    /// `_parent` override.
    pub parent: Option<String>,
    /// Every other field of the record.
    pub extra: Map<String, Value>,
}

impl ChangeEvent {
    /// Create an event for `id` with no payload.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            seq: None,
            id: id.into(),
            deleted: false,
            ignore: false,
            doc: None,
            index: None,
            doc_type: None,
            routing: None,
            parent: None,
            extra: Map::new(),
        }
    }

    /// Build an event from a parsed feed record.
    ///
    /// Returns `None` when the record carries no `id`. A non-string id is
    /// used through its JSON text.
    pub fn from_map(mut record: Map<String, Value>) -> Option<Self> {
        let id = match record.remove("id")? {
            Value::Null => return None,
            Value::String(s) => s,
            other => other.to_string(),
        };
        let seq = record.remove("seq").and_then(SequenceToken::from_value);
        let deleted = take_flag(&mut record, "deleted");
        let ignore = take_flag(&mut record, "ignore");
        let doc = match record.remove("doc") {
            Some(Value::Object(doc)) => Some(doc),
            Some(other) => {
                // Not a mapping: leave it visible to a transform.
                record.insert("doc".into(), other);
                None
            }
            None => None,
        };

        Some(Self {
            seq,
            id,
            deleted,
            ignore,
            doc,
            index: take_str(&mut record, "_index"),
            doc_type: take_str(&mut record, "_type"),
            routing: take_str(&mut record, "_routing"),
            parent: take_str(&mut record, "_parent"),
            extra: record,
        })
    }

    /// Convert back into the raw record shape.
    pub fn into_map(self) -> Map<String, Value> {
        let mut record = self.extra;
        if let Some(seq) = self.seq {
            let v = match seq {
                SequenceToken::Scalar(v) => v,
                SequenceToken::Sequence(items) => Value::Array(items),
            };
            record.insert("seq".into(), v);
        }
        record.insert("id".into(), Value::String(self.id));
        if self.deleted {
            record.insert("deleted".into(), Value::Bool(true));
        }
        if self.ignore {
            record.insert("ignore".into(), Value::Bool(true));
        }
        if let Some(doc) = self.doc {
            record.insert("doc".into(), Value::Object(doc));
        }
        for (key, value) in [
            ("_index", self.index),
            ("_type", self.doc_type),
            ("_routing", self.routing),
            ("_parent", self.parent),
        ] {
            if let Some(v) = value {
                record.insert(key.into(), Value::String(v));
            }
        }
        record
    }

    /// Returns `true` if this is a design document.
    pub fn is_design_doc(&self) -> bool {
        self.id.starts_with(DESIGN_DOC_PREFIX)
    }
}

fn take_flag(record: &mut Map<String, Value>, key: &str) -> bool {
    match record.remove(key) {
        Some(Value::Bool(b)) => b,
        Some(other) => {
            record.insert(key.into(), other);
            false
        }
        None => false,
    }
}

fn take_str(record: &mut Map<String, Value>, key: &str) -> Option<String> {
    match record.remove(key)? {
        Value::String(s) => Some(s),
        other => {
            record.insert(key.into(), other);
            None
        }
    }
}

/// A write against the index, derived from one change event.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Upsert {
        index: String,
        doc_type: String,
        id: String,
        document: Map<String, Value>,
        routing: Option<String>,
        parent: Option<String>,
    },
    Delete {
        index: String,
        doc_type: String,
        id: String,
        routing: Option<String>,
        parent: Option<String>,
    },
}

impl Mutation {
    pub fn id(&self) -> &str {
        match self {
            Self::Upsert { id, .. } | Self::Delete { id, .. } => id,
        }
    }

    pub fn index(&self) -> &str {
        match self {
            Self::Upsert { index, .. } | Self::Delete { index, .. } => index,
        }
    }

    pub fn doc_type(&self) -> &str {
        match self {
            Self::Upsert { doc_type, .. } | Self::Delete { doc_type, .. } => doc_type,
        }
    }

    pub fn routing(&self) -> Option<&str> {
        match self {
            Self::Upsert { routing, .. } | Self::Delete { routing, .. } => routing.as_deref(),
        }
    }

    pub fn parent(&self) -> Option<&str> {
        match self {
            Self::Upsert { parent, .. } | Self::Delete { parent, .. } => parent.as_deref(),
        }
    }

    /// Bulk action name (`"index"` or `"delete"`).
    pub fn action(&self) -> &'static str {
        match self {
            Self::Upsert { .. } => "index",
            Self::Delete { .. } => "delete",
        }
    }
}

impl std::fmt::Display for Mutation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]: [{}]/[{}]/[{}]", self.action(), self.index(), self.doc_type(), self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn parses_full_record() {
        let ev = ChangeEvent::from_map(record(json!({
            "seq": 5,
            "id": "doc1",
            "changes": [{"rev": "1-abc"}],
            "doc": {"_id": "doc1", "a": 1},
            "_index": "other",
            "_routing": "r1"
        })))
        .unwrap();

        assert_eq!(ev.id, "doc1");
        assert_eq!(ev.seq, Some(SequenceToken::Scalar(json!(5))));
        assert_eq!(ev.doc.as_ref().unwrap()["a"], json!(1));
        assert_eq!(ev.index.as_deref(), Some("other"));
        assert_eq!(ev.routing.as_deref(), Some("r1"));
        assert!(ev.doc_type.is_none());
        assert!(ev.extra.contains_key("changes"));
        assert!(!ev.deleted);
    }

    #[test]
    fn missing_or_null_id_yields_none() {
        assert!(ChangeEvent::from_map(record(json!({"seq": 1}))).is_none());
        assert!(ChangeEvent::from_map(record(json!({"seq": 1, "id": null}))).is_none());
    }

    #[test]
    fn non_bool_flags_are_not_set() {
        let ev = ChangeEvent::from_map(record(json!({"id": "x", "deleted": "yes"}))).unwrap();
        assert!(!ev.deleted);
        assert_eq!(ev.extra["deleted"], json!("yes"));
    }

    #[test]
    fn map_roundtrip_keeps_fields() {
        let raw = record(json!({
            "seq": [1, "abc"],
            "id": "d",
            "deleted": true,
            "_type": "t",
            "rev": "2-x"
        }));
        let ev = ChangeEvent::from_map(raw.clone()).unwrap();
        assert_eq!(ev.clone().into_map(), raw);
        assert!(ev.deleted);
    }

    #[test]
    fn design_doc_detection() {
        assert!(ChangeEvent::new("_design/views").is_design_doc());
        assert!(!ChangeEvent::new("design/views").is_design_doc());
    }
}
