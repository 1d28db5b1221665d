use serde::{Deserialize, Serialize};

use crate::{CreateSpec, EpochMillis, RunNumber};

/// Persisted snapshot of one execution of a flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub flow_id: String,
    pub run_number: RunNumber,
    pub user_name: String,
    pub tags: Vec<String>,
    pub system_tags: Vec<String>,
    pub ts_epoch: EpochMillis,
    /// Last heartbeat received for this run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat_ts: Option<EpochMillis>,
}

impl RunRecord {
    pub fn new(flow_id: impl Into<String>, run_number: RunNumber, spec: &CreateSpec) -> Self {
        Self {
            flow_id: flow_id.into(),
            run_number,
            user_name: spec.resolved_user(),
            tags: spec.resolved_tags(),
            system_tags: spec.resolved_system_tags(),
            ts_epoch: spec.resolved_ts(),
            last_heartbeat_ts: None,
        }
    }
}
