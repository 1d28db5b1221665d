use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{CreateSpec, EpochMillis, RunNumber, TaskNumber};

/// Fully-qualified address of a task: `flow/run/step/task`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskPath {
    pub flow: String,
    pub run: RunNumber,
    pub step: String,
    pub task: TaskNumber,
}

impl TaskPath {
    pub fn new(
        flow: impl Into<String>,
        run: RunNumber,
        step: impl Into<String>,
        task: TaskNumber,
    ) -> Self {
        Self {
            flow: flow.into(),
            run,
            step: step.into(),
            task,
        }
    }
}

/// Renders the pathspec form used by filtered task queries.
impl fmt::Display for TaskPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}/{}", self.flow, self.run, self.step, self.task)
    }
}

/// Persisted snapshot of a unit of work within a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub flow_id: String,
    pub run_number: RunNumber,
    pub step_name: String,
    pub task_id: TaskNumber,
    pub user_name: String,
    pub tags: Vec<String>,
    pub system_tags: Vec<String>,
    pub ts_epoch: EpochMillis,
    /// Last heartbeat received for this task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat_ts: Option<EpochMillis>,
}

impl TaskRecord {
    pub fn new(path: &TaskPath, spec: &CreateSpec) -> Self {
        Self {
            flow_id: path.flow.clone(),
            run_number: path.run,
            step_name: path.step.clone(),
            task_id: path.task,
            user_name: spec.resolved_user(),
            tags: spec.resolved_tags(),
            system_tags: spec.resolved_system_tags(),
            ts_epoch: spec.resolved_ts(),
            last_heartbeat_ts: None,
        }
    }

    pub fn path(&self) -> TaskPath {
        TaskPath::new(
            self.flow_id.clone(),
            self.run_number,
            self.step_name.clone(),
            self.task_id,
        )
    }
}
