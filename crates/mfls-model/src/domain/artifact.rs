use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{EpochMillis, TaskPath};

/// Named value record registered against a task attempt.
///
/// Only `name` and `attempt_id` are interpreted by the service; every other
/// key the client sends (`ds_type`, `location`, `sha`, `type`, ...) is kept verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    #[serde(default)]
    pub attempt_id: u32,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Artifact {
    pub fn new(name: impl Into<String>, attempt_id: u32) -> Self {
        Self {
            name: name.into(),
            attempt_id,
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Stamp the owning task's location, and a timestamp if the client sent none.
    pub fn locate(&mut self, path: &TaskPath, now: EpochMillis) {
        stamp_location(&mut self.fields, path, now);
    }
}

pub(crate) fn stamp_location(fields: &mut Map<String, Value>, path: &TaskPath, now: EpochMillis) {
    fields.insert("flow_id".into(), Value::from(path.flow.clone()));
    fields.insert("run_number".into(), Value::from(path.run));
    fields.insert("step_name".into(), Value::from(path.step.clone()));
    fields.insert("task_id".into(), Value::from(path.task));
    if !fields.get("ts_epoch").is_some_and(Value::is_i64) {
        fields.insert("ts_epoch".into(), Value::from(now));
    }
}
