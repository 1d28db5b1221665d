use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::artifact::stamp_location;
use crate::{EpochMillis, TaskPath};

/// Free-form key/value record attached to a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataEntry {
    pub field_name: String,
    pub value: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl MetadataEntry {
    pub fn new(field_name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
            value: value.into(),
            kind: String::new(),
            tags: Vec::new(),
            fields: Map::new(),
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn locate(&mut self, path: &TaskPath, now: EpochMillis) {
        stamp_location(&mut self.fields, path, now);
    }

    pub fn ts_epoch(&self) -> EpochMillis {
        self.fields
            .get("ts_epoch")
            .and_then(Value::as_i64)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_field_is_renamed() {
        let raw = r#"{"field_name":"attempt","value":"0","type":"attempt","tags":["attempt_id:0"]}"#;
        let entry: MetadataEntry = serde_json::from_str(raw).unwrap();
        assert_eq!(entry.kind, "attempt");
        assert_eq!(entry.tags, vec!["attempt_id:0".to_string()]);

        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["type"], "attempt");
    }

    #[test]
    fn ts_epoch_reads_from_stamped_fields() {
        let mut entry = MetadataEntry::new("attempt", "0");
        assert_eq!(entry.ts_epoch(), 0);
        entry.locate(&TaskPath::new("F", 1, "start", 0), 1234);
        assert_eq!(entry.ts_epoch(), 1234);
    }
}
