mod spec;
pub use spec::CreateSpec;

mod flow;
pub use flow::FlowRecord;

mod run;
pub use run::RunRecord;

mod step;
pub use step::StepRecord;

mod task;
pub use task::{TaskPath, TaskRecord};

mod artifact;
pub use artifact::Artifact;

mod metadata;
pub use metadata::MetadataEntry;

mod tags;
pub use tags::TagMutation;

mod names;
pub use names::validate_name;

/// Milliseconds since the Unix epoch.
///
/// Every `ts_epoch` and heartbeat field on disk and on the wire uses this unit.
pub type EpochMillis = i64;

/// Sequential run identifier, unique within a flow. The first run is `1`.
pub type RunNumber = u64;

/// Sequential task identifier, unique within a `(flow, run)` pair. The first task is `0`.
pub type TaskNumber = u64;

/// Current wall-clock time in [`EpochMillis`].
pub fn now_millis() -> EpochMillis {
    let nanos = time::OffsetDateTime::now_utc().unix_timestamp_nanos();
    (nanos / 1_000_000) as EpochMillis
}
