use serde::{Deserialize, Serialize};

use crate::{CreateSpec, EpochMillis};

/// Persisted snapshot of a registered flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowRecord {
    pub flow_id: String,
    pub user_name: String,
    pub tags: Vec<String>,
    pub system_tags: Vec<String>,
    pub ts_epoch: EpochMillis,
}

impl FlowRecord {
    pub fn new(flow_id: impl Into<String>, spec: &CreateSpec) -> Self {
        Self {
            flow_id: flow_id.into(),
            user_name: spec.resolved_user(),
            tags: spec.resolved_tags(),
            system_tags: spec.resolved_system_tags(),
            ts_epoch: spec.resolved_ts(),
        }
    }
}
