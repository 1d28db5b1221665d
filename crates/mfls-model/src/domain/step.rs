use serde::{Deserialize, Serialize};

use crate::{CreateSpec, EpochMillis, RunNumber};

/// Persisted snapshot of a named stage within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub flow_id: String,
    pub run_number: RunNumber,
    pub step_name: String,
    pub user_name: String,
    pub tags: Vec<String>,
    pub system_tags: Vec<String>,
    pub ts_epoch: EpochMillis,
}

impl StepRecord {
    pub fn new(
        flow_id: impl Into<String>,
        run_number: RunNumber,
        step_name: impl Into<String>,
        spec: &CreateSpec,
    ) -> Self {
        Self {
            flow_id: flow_id.into(),
            run_number,
            step_name: step_name.into(),
            user_name: spec.resolved_user(),
            tags: spec.resolved_tags(),
            system_tags: spec.resolved_system_tags(),
            ts_epoch: spec.resolved_ts(),
        }
    }
}
