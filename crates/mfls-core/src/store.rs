//! Durable metadata store over the `.metaflow/` tree.
//!
//! Every entity is a directory holding `_meta/_self.json`. Creation goes through
//! [`fsio::atomic_create`] (create-if-absent), updates through [`fsio::atomic_write`].
//! The only in-memory state are the run-number and task-id sequences, which are
//! seeded from the directory names already on disk the first time a key is used.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use mfls_model::{
    Artifact, CreateSpec, FlowRecord, MetadataEntry, RunNumber, RunRecord, StepRecord,
    TagMutation, TaskPath, TaskRecord, now_millis, validate_name,
};
use regex::Regex;
use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, info, trace};

use crate::{
    error::StoreError,
    fsio,
    keyed::{KeyedSlots, Sequences, lock},
    layout::{self, Layout},
};

const FLOW: &str = "flow";
const RUN: &str = "run";
const STEP: &str = "step";
const TASK: &str = "task";
const ARTIFACT: &str = "artifact";
const METADATA_FIELD: &str = "metadata field";

const FIRST_RUN_NUMBER: RunNumber = 1;
const FIRST_TASK_ID: u64 = 0;

/// Metadata store bound to one storage root.
///
/// Cheap to clone; clones share the identifier sequences.
#[derive(Clone)]
pub struct MetadataStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    storage_root: PathBuf,
    layout: Layout,
    /// Next run number per flow.
    runs: Sequences,
    /// Next task id per `flow/run`.
    tasks: Sequences,
    /// Serializes read-modify-write updates per record file.
    records: KeyedSlots<()>,
}

impl MetadataStore {
    /// Open (and create if needed) the `.metaflow` tree under `storage_root`.
    pub fn open(storage_root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let requested = storage_root.as_ref();
        let storage_root = requested
            .canonicalize()
            .map_err(StoreError::io(requested))?;
        let layout = Layout::new(&storage_root);
        fs::create_dir_all(layout.root()).map_err(StoreError::io(layout.root()))?;

        debug!(root = %layout.root().display(), "metadata store opened");
        Ok(Self {
            inner: Arc::new(StoreInner {
                storage_root,
                layout,
                runs: Sequences::new(),
                tasks: Sequences::new(),
                records: KeyedSlots::new(),
            }),
        })
    }

    /// Canonical storage root this store is bound to.
    pub fn storage_root(&self) -> &Path {
        &self.inner.storage_root
    }

    /// The `.metaflow` directory under the storage root.
    pub fn datastore_root(&self) -> &Path {
        self.inner.layout.root()
    }

    fn layout(&self) -> &Layout {
        &self.inner.layout
    }

    // ========================================================================
    // Flows
    // ========================================================================

    pub fn create_flow(&self, flow: &str, spec: &CreateSpec) -> Result<FlowRecord, StoreError> {
        validate_name(FLOW, flow)?;
        let record = FlowRecord::new(flow, spec);
        let file = Layout::self_file(&self.layout().flow_dir(flow));
        if !create_record(&file, &record)? {
            return Err(StoreError::conflict(FLOW, flow));
        }
        info!(flow, "flow registered");
        Ok(record)
    }

    pub fn get_flow(&self, flow: &str) -> Result<FlowRecord, StoreError> {
        validate_name(FLOW, flow)?;
        let file = Layout::self_file(&self.layout().flow_dir(flow));
        read_record(&file)?.ok_or_else(|| StoreError::not_found(FLOW, flow))
    }

    fn ensure_flow(&self, flow: &str, spec: &CreateSpec) -> Result<(), StoreError> {
        match self.create_flow(flow, spec) {
            Err(e) if e.is_conflict() => Ok(()),
            other => other.map(|_| ()),
        }
    }

    // ========================================================================
    // Runs
    // ========================================================================

    /// Create a run with the next run number of `flow`, registering the flow if needed.
    pub fn create_run(&self, flow: &str, spec: &CreateSpec) -> Result<RunRecord, StoreError> {
        validate_name(FLOW, flow)?;
        self.ensure_flow(flow, spec)?;

        let run_number = self
            .inner
            .runs
            .next(flow, || self.seed_run_number(flow))?;
        let record = RunRecord::new(flow, run_number, spec);
        let file = Layout::self_file(&self.layout().run_dir(flow, run_number));
        if !create_record(&file, &record)? {
            return Err(StoreError::conflict(RUN, run_key(flow, run_number)));
        }

        info!(flow, run = run_number, "run created");
        Ok(record)
    }

    pub fn get_run(&self, flow: &str, run: RunNumber) -> Result<RunRecord, StoreError> {
        validate_name(FLOW, flow)?;
        let file = Layout::self_file(&self.layout().run_dir(flow, run));
        read_record(&file)?.ok_or_else(|| StoreError::not_found(RUN, run_key(flow, run)))
    }

    pub fn list_runs(&self, flow: &str) -> Result<Vec<RunRecord>, StoreError> {
        self.get_flow(flow)?;
        let flow_dir = self.layout().flow_dir(flow);
        let mut runs: Vec<RunRecord> = read_children(&flow_dir, numeric_children(&flow_dir)?)?;
        runs.sort_by_key(|r| r.run_number);
        Ok(runs)
    }

    /// Stamp the run's `last_heartbeat_ts`.
    pub fn heartbeat_run(&self, flow: &str, run: RunNumber) -> Result<RunRecord, StoreError> {
        validate_name(FLOW, flow)?;
        let file = Layout::self_file(&self.layout().run_dir(flow, run));
        let now = now_millis();
        let record = self.update_record(&file, RUN, || run_key(flow, run), |r: &mut RunRecord| {
            r.last_heartbeat_ts = Some(now);
        })?;
        trace!(flow, run, "run heartbeat");
        Ok(record)
    }

    /// Merge a tag mutation into the run's user tags and return the resulting tags.
    pub fn mutate_tags(
        &self,
        flow: &str,
        run: RunNumber,
        mutation: &TagMutation,
    ) -> Result<Vec<String>, StoreError> {
        validate_name(FLOW, flow)?;
        let file = Layout::self_file(&self.layout().run_dir(flow, run));
        let record = self.update_record(&file, RUN, || run_key(flow, run), |r: &mut RunRecord| {
            r.tags = mutation.apply(&r.tags);
        })?;
        debug!(flow, run, tags = ?record.tags, "run tags mutated");
        Ok(record.tags)
    }

    fn seed_run_number(&self, flow: &str) -> Result<RunNumber, StoreError> {
        let max = max_numeric_child(&self.layout().flow_dir(flow))?;
        let seed = max.map_or(FIRST_RUN_NUMBER, |m| m + 1);
        debug!(flow, seed, "run number sequence seeded");
        Ok(seed)
    }

    // ========================================================================
    // Steps
    // ========================================================================

    pub fn create_step(
        &self,
        flow: &str,
        run: RunNumber,
        step: &str,
        spec: &CreateSpec,
    ) -> Result<StepRecord, StoreError> {
        validate_name(STEP, step)?;
        self.get_run(flow, run)?;

        let record = StepRecord::new(flow, run, step, spec);
        let file = Layout::self_file(&self.layout().step_dir(flow, run, step));
        if !create_record(&file, &record)? {
            return Err(StoreError::conflict(STEP, step_key(flow, run, step)));
        }
        debug!(flow, run, step, "step created");
        Ok(record)
    }

    pub fn get_step(&self, flow: &str, run: RunNumber, step: &str) -> Result<StepRecord, StoreError> {
        validate_name(FLOW, flow)?;
        validate_name(STEP, step)?;
        let file = Layout::self_file(&self.layout().step_dir(flow, run, step));
        read_record(&file)?.ok_or_else(|| StoreError::not_found(STEP, step_key(flow, run, step)))
    }

    pub fn list_steps(&self, flow: &str, run: RunNumber) -> Result<Vec<StepRecord>, StoreError> {
        self.get_run(flow, run)?;
        let run_dir = self.layout().run_dir(flow, run);
        let mut steps: Vec<StepRecord> = read_children(&run_dir, entity_children(&run_dir)?)?;
        steps.sort_by(|a, b| a.step_name.cmp(&b.step_name));
        Ok(steps)
    }

    fn ensure_step(
        &self,
        flow: &str,
        run: RunNumber,
        step: &str,
        spec: &CreateSpec,
    ) -> Result<(), StoreError> {
        match self.create_step(flow, run, step, spec) {
            Err(e) if e.is_conflict() => Ok(()),
            other => other.map(|_| ()),
        }
    }

    // ========================================================================
    // Tasks
    // ========================================================================

    /// Create a task with the next task id of the `(flow, run)` pair.
    ///
    /// The run must exist; the step is registered if needed. Task ids are shared by
    /// all steps of a run.
    pub fn create_task(
        &self,
        flow: &str,
        run: RunNumber,
        step: &str,
        spec: &CreateSpec,
    ) -> Result<TaskRecord, StoreError> {
        validate_name(STEP, step)?;
        self.get_run(flow, run)?;
        self.ensure_step(flow, run, step, spec)?;

        let task_id = self
            .inner
            .tasks
            .next(&run_key(flow, run), || self.seed_task_id(flow, run))?;
        let path = TaskPath::new(flow, run, step, task_id);
        let record = TaskRecord::new(&path, spec);
        let file = Layout::self_file(&self.layout().task_dir(&path));
        if !create_record(&file, &record)? {
            return Err(StoreError::conflict(TASK, path.to_string()));
        }

        debug!(flow, run, step, task = task_id, "task created");
        Ok(record)
    }

    pub fn get_task(&self, path: &TaskPath) -> Result<TaskRecord, StoreError> {
        validate_name(FLOW, &path.flow)?;
        validate_name(STEP, &path.step)?;
        let file = Layout::self_file(&self.layout().task_dir(path));
        read_record(&file)?.ok_or_else(|| StoreError::not_found(TASK, path.to_string()))
    }

    pub fn list_tasks(
        &self,
        flow: &str,
        run: RunNumber,
        step: &str,
    ) -> Result<Vec<TaskRecord>, StoreError> {
        self.get_step(flow, run, step)?;
        let step_dir = self.layout().step_dir(flow, run, step);
        let mut tasks: Vec<TaskRecord> =
            read_children(&step_dir, numeric_children(&step_dir)?)?;
        tasks.sort_by_key(|t| t.task_id);
        Ok(tasks)
    }

    /// Stamp the task's `last_heartbeat_ts`.
    pub fn heartbeat_task(&self, path: &TaskPath) -> Result<TaskRecord, StoreError> {
        validate_name(FLOW, &path.flow)?;
        validate_name(STEP, &path.step)?;
        let file = Layout::self_file(&self.layout().task_dir(path));
        let now = now_millis();
        let record = self.update_record(&file, TASK, || path.to_string(), |t: &mut TaskRecord| {
            t.last_heartbeat_ts = Some(now);
        })?;
        trace!(task = %path, "task heartbeat");
        Ok(record)
    }

    /// One past the highest task directory found under any step of the run, or 0.
    fn seed_task_id(&self, flow: &str, run: RunNumber) -> Result<u64, StoreError> {
        let run_dir = self.layout().run_dir(flow, run);
        let mut max: Option<u64> = None;
        for step in entity_children(&run_dir)? {
            if let Some(m) = max_numeric_child(&run_dir.join(step))? {
                max = Some(max.map_or(m, |cur| cur.max(m)));
            }
        }
        let seed = max.map_or(FIRST_TASK_ID, |m| m + 1);
        debug!(flow, run, seed, "task id sequence seeded");
        Ok(seed)
    }

    // ========================================================================
    // Artifacts
    // ========================================================================

    /// Store artifact records for a task. A record with the same attempt and name
    /// replaces the previous one.
    pub fn register_artifacts(
        &self,
        path: &TaskPath,
        artifacts: Vec<Artifact>,
    ) -> Result<usize, StoreError> {
        self.get_task(path)?;
        for artifact in &artifacts {
            validate_name(ARTIFACT, &artifact.name)?;
        }

        let now = now_millis();
        let count = artifacts.len();
        for mut artifact in artifacts {
            artifact.locate(path, now);
            let file = self
                .layout()
                .artifact_file(path, artifact.attempt_id, &artifact.name);
            write_record(&file, &artifact)?;
        }
        debug!(task = %path, count, "artifacts registered");
        Ok(count)
    }

    /// Artifacts of a task, for one attempt or all attempts, ordered by attempt then name.
    pub fn list_artifacts(
        &self,
        path: &TaskPath,
        attempt: Option<u32>,
    ) -> Result<Vec<Artifact>, StoreError> {
        self.get_task(path)?;
        let meta_dir = Layout::meta_dir(&self.layout().task_dir(path));
        let mut artifacts: Vec<Artifact> =
            read_files(&meta_dir, |name| layout::is_artifact_file(name, attempt))?;
        artifacts.sort_by(|a, b| (a.attempt_id, &a.name).cmp(&(b.attempt_id, &b.name)));
        Ok(artifacts)
    }

    // ========================================================================
    // Metadata
    // ========================================================================

    pub fn register_metadata(
        &self,
        path: &TaskPath,
        entries: Vec<MetadataEntry>,
    ) -> Result<usize, StoreError> {
        self.get_task(path)?;
        for entry in &entries {
            validate_name(METADATA_FIELD, &entry.field_name)?;
        }

        // Consecutive timestamps within a batch.
        let now = now_millis();
        let count = entries.len();
        for (offset, mut entry) in (0..).zip(entries) {
            entry.locate(path, now + offset);
            let file = self.layout().metadata_file(path, &entry.field_name);
            write_record(&file, &entry)?;
        }
        debug!(task = %path, count, "metadata registered");
        Ok(count)
    }

    /// All metadata entries of a task, oldest first.
    pub fn get_metadata(&self, path: &TaskPath) -> Result<Vec<MetadataEntry>, StoreError> {
        self.get_task(path)?;
        let meta_dir = Layout::meta_dir(&self.layout().task_dir(path));
        let mut entries: Vec<MetadataEntry> = read_files(&meta_dir, layout::is_metadata_file)?;
        entries.sort_by(|a, b| {
            (a.ts_epoch(), &a.field_name).cmp(&(b.ts_epoch(), &b.field_name))
        });
        Ok(entries)
    }

    /// Pathspecs of the step's tasks having a `field_name` entry whose value matches `pattern`.
    ///
    /// `pattern` is a regular expression with search semantics.
    pub fn filter_tasks_by_metadata(
        &self,
        flow: &str,
        run: RunNumber,
        step: &str,
        field_name: &str,
        pattern: &str,
    ) -> Result<Vec<String>, StoreError> {
        let regex = Regex::new(pattern)?;
        let mut matched = Vec::new();
        for task in self.list_tasks(flow, run, step)? {
            let path = task.path();
            let hit = self
                .get_metadata(&path)?
                .iter()
                .any(|e| e.field_name == field_name && regex.is_match(&e.value));
            if hit {
                matched.push(path.to_string());
            }
        }
        trace!(flow, run, step, field_name, pattern, count = matched.len(), "tasks filtered");
        Ok(matched)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn update_record<T, K, F>(
        &self,
        file: &Path,
        kind: &'static str,
        key: K,
        mutate: F,
    ) -> Result<T, StoreError>
    where
        T: Serialize + DeserializeOwned,
        K: FnOnce() -> String,
        F: FnOnce(&mut T),
    {
        let slot = self.inner.records.slot(&file.to_string_lossy());
        let _guard = lock(&slot);

        let mut record: T =
            read_record(file)?.ok_or_else(|| StoreError::not_found(kind, key()))?;
        mutate(&mut record);
        write_record(file, &record)?;
        Ok(record)
    }
}

fn run_key(flow: &str, run: RunNumber) -> String {
    format!("{flow}/{run}")
}

fn step_key(flow: &str, run: RunNumber, step: &str) -> String {
    format!("{flow}/{run}/{step}")
}

fn encode<T: Serialize>(file: &Path, record: &T) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec(record).map_err(|source| StoreError::Corrupt {
        path: file.to_path_buf(),
        source,
    })
}

fn read_record<T: DeserializeOwned>(file: &Path) -> Result<Option<T>, StoreError> {
    let Some(bytes) = fsio::read_optional(file).map_err(StoreError::io(file))? else {
        return Ok(None);
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| StoreError::Corrupt {
            path: file.to_path_buf(),
            source,
        })
}

fn write_record<T: Serialize>(file: &Path, record: &T) -> Result<(), StoreError> {
    let bytes = encode(file, record)?;
    fsio::atomic_write(file, &bytes).map_err(StoreError::io(file))
}

fn create_record<T: Serialize>(file: &Path, record: &T) -> Result<bool, StoreError> {
    let bytes = encode(file, record)?;
    fsio::atomic_create(file, &bytes).map_err(StoreError::io(file))
}

/// Sub-directory names of `dir`, or nothing if `dir` does not exist.
fn child_dirs(dir: &Path) -> Result<Vec<String>, StoreError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StoreError::io(dir)(e)),
    };

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(StoreError::io(dir))?;
        let is_dir = entry
            .file_type()
            .map_err(StoreError::io(&entry.path()))?
            .is_dir();
        if is_dir {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    Ok(names)
}

/// Sub-directories that are entities (everything except `_meta` and hidden entries).
fn entity_children(dir: &Path) -> Result<Vec<String>, StoreError> {
    Ok(child_dirs(dir)?
        .into_iter()
        .filter(|name| name != layout::META_DIR && !name.starts_with('.'))
        .collect())
}

/// Sub-directories named by a decimal integer (runs, tasks).
fn numeric_children(dir: &Path) -> Result<Vec<String>, StoreError> {
    Ok(child_dirs(dir)?
        .into_iter()
        .filter(|name| name.parse::<u64>().is_ok())
        .collect())
}

fn max_numeric_child(dir: &Path) -> Result<Option<u64>, StoreError> {
    Ok(child_dirs(dir)?
        .iter()
        .filter_map(|name| name.parse::<u64>().ok())
        .max())
}

/// Load `_self.json` of each named child; children without one are skipped.
fn read_children<T: DeserializeOwned>(dir: &Path, names: Vec<String>) -> Result<Vec<T>, StoreError> {
    let mut records = Vec::with_capacity(names.len());
    for name in names {
        if let Some(record) = read_record(&Layout::self_file(&dir.join(name)))? {
            records.push(record);
        }
    }
    Ok(records)
}

/// Load every file in `dir` whose name passes `select`.
fn read_files<T, P>(dir: &Path, select: P) -> Result<Vec<T>, StoreError>
where
    T: DeserializeOwned,
    P: Fn(&str) -> bool,
{
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StoreError::io(dir)(e)),
    };

    let mut records = Vec::new();
    for entry in entries {
        let entry = entry.map_err(StoreError::io(dir))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if fsio::is_temp_name(&name) || !select(&name) {
            continue;
        }
        if let Some(record) = read_record(&entry.path())? {
            records.push(record);
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, thread};

    use super::*;

    fn store() -> (tempfile::TempDir, MetadataStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::open(dir.path()).unwrap();
        (dir, store)
    }

    fn spec() -> CreateSpec {
        CreateSpec::new().with_user("tester")
    }

    /// Flow `F`, run 1, ready for steps and tasks.
    fn with_run() -> (tempfile::TempDir, MetadataStore) {
        let (dir, store) = store();
        store.create_run("F", &spec()).unwrap();
        (dir, store)
    }

    #[test]
    fn open_creates_datastore_dir() {
        let (dir, store) = store();
        assert!(dir.path().join(".metaflow").is_dir());
        assert_eq!(store.storage_root(), dir.path().canonicalize().unwrap());
    }

    #[test]
    fn open_rejects_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let err = MetadataStore::open(dir.path().join("missing")).err().unwrap();
        assert!(matches!(err, StoreError::Io { .. }));
    }

    // ---- flows ----

    #[test]
    fn flow_roundtrip_and_conflict() {
        let (_dir, store) = store();
        let spec = spec().with_tags(["t1"]).with_system_tags(["runtime:dev"]);

        let created = store.create_flow("f", &spec).unwrap();
        assert_eq!(created.flow_id, "f");
        assert_eq!(store.get_flow("f").unwrap(), created);

        let err = store.create_flow("f", &spec).unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn missing_flow_is_not_found() {
        let (_dir, store) = store();
        assert!(store.get_flow("nope").unwrap_err().is_not_found());
        assert!(store.list_runs("nope").unwrap_err().is_not_found());
    }

    #[test]
    fn invalid_names_are_rejected() {
        let (_dir, store) = store();
        assert!(matches!(
            store.create_flow("../escape", &spec()),
            Err(StoreError::InvalidName(_))
        ));
        assert!(matches!(
            store.create_flow("_meta", &spec()),
            Err(StoreError::InvalidName(_))
        ));
    }

    // ---- runs ----

    #[test]
    fn run_numbers_start_at_one_and_increase() {
        let (_dir, store) = store();
        store.create_flow("f", &spec()).unwrap();

        assert_eq!(store.create_run("f", &spec()).unwrap().run_number, 1);
        assert_eq!(store.create_run("f", &spec()).unwrap().run_number, 2);
        assert!(store.create_flow("f", &spec()).unwrap_err().is_conflict());
    }

    #[test]
    fn create_run_registers_missing_flow() {
        let (_dir, store) = store();
        let run = store.create_run("Auto", &spec().with_tags(["x"])).unwrap();
        assert_eq!(run.tags, vec!["x".to_string()]);
        assert_eq!(store.get_flow("Auto").unwrap().flow_id, "Auto");
    }

    #[test]
    fn run_numbers_continue_after_reopen() {
        let (dir, store) = store();
        store.create_run("f", &spec()).unwrap();
        store.create_run("f", &spec()).unwrap();
        drop(store);

        let reopened = MetadataStore::open(dir.path()).unwrap();
        assert_eq!(reopened.create_run("f", &spec()).unwrap().run_number, 3);
    }

    #[test]
    fn list_runs_is_sorted_and_scoped_to_flow() {
        let (_dir, store) = store();
        for _ in 0..11 {
            store.create_run("A", &spec()).unwrap();
        }
        store.create_run("B", &spec()).unwrap();

        let numbers: Vec<_> = store
            .list_runs("A")
            .unwrap()
            .iter()
            .map(|r| r.run_number)
            .collect();
        assert_eq!(numbers, (1..=11).collect::<Vec<_>>());
        assert_eq!(store.list_runs("B").unwrap().len(), 1);
    }

    #[test]
    fn get_run_roundtrip() {
        let (_dir, store) = with_run();
        let run = store.get_run("F", 1).unwrap();
        assert_eq!(run.flow_id, "F");
        assert_eq!(run.user_name, "tester");
        assert!(store.get_run("F", 99).unwrap_err().is_not_found());
    }

    #[test]
    fn heartbeat_run_stamps_timestamp() {
        let (_dir, store) = with_run();
        assert!(store.get_run("F", 1).unwrap().last_heartbeat_ts.is_none());

        let beat = store.heartbeat_run("F", 1).unwrap();
        assert!(beat.last_heartbeat_ts.is_some());
        assert_eq!(store.get_run("F", 1).unwrap(), beat);

        assert!(store.heartbeat_run("F", 2).unwrap_err().is_not_found());
    }

    #[test]
    fn mutate_tags_merges() {
        let (_dir, store) = store();
        store
            .create_run("F", &spec().with_tags(["keep", "drop"]).with_system_tags(["sys"]))
            .unwrap();

        let tags = store
            .mutate_tags("F", 1, &TagMutation::new().add("new").remove("drop"))
            .unwrap();
        assert_eq!(tags, vec!["keep".to_string(), "new".to_string()]);

        let run = store.get_run("F", 1).unwrap();
        assert_eq!(run.tags, tags);
        assert_eq!(run.system_tags, vec!["sys".to_string()]);
    }

    // ---- steps ----

    #[test]
    fn step_roundtrip_conflict_and_list() {
        let (_dir, store) = with_run();
        let start = store.create_step("F", 1, "start", &spec()).unwrap();
        store.create_step("F", 1, "end", &spec()).unwrap();

        assert_eq!(store.get_step("F", 1, "start").unwrap(), start);
        assert!(store
            .create_step("F", 1, "start", &spec())
            .unwrap_err()
            .is_conflict());

        let names: Vec<_> = store
            .list_steps("F", 1)
            .unwrap()
            .into_iter()
            .map(|s| s.step_name)
            .collect();
        assert_eq!(names, vec!["end".to_string(), "start".to_string()]);
    }

    #[test]
    fn step_requires_existing_run() {
        let (_dir, store) = with_run();
        assert!(store
            .create_step("F", 7, "start", &spec())
            .unwrap_err()
            .is_not_found());
        assert!(store.get_step("F", 1, "missing").unwrap_err().is_not_found());
    }

    // ---- tasks ----

    #[test]
    fn first_task_id_is_zero() {
        let (_dir, store) = with_run();
        let task = store.create_task("F", 1, "start", &spec()).unwrap();
        assert_eq!(task.task_id, 0);
        assert_eq!(store.get_step("F", 1, "start").unwrap().step_name, "start");
    }

    #[test]
    fn task_ids_are_shared_across_steps_of_a_run() {
        let (_dir, store) = with_run();
        assert_eq!(store.create_task("F", 1, "start", &spec()).unwrap().task_id, 0);
        assert_eq!(store.create_task("F", 1, "a", &spec()).unwrap().task_id, 1);
        assert_eq!(store.create_task("F", 1, "b", &spec()).unwrap().task_id, 2);

        store.create_run("F", &spec()).unwrap();
        assert_eq!(store.create_task("F", 2, "start", &spec()).unwrap().task_id, 0);
    }

    #[test]
    fn task_ids_continue_from_existing_directories() {
        let (dir, store) = with_run();
        let step_dir = dir.path().join(".metaflow/F/1/start");
        for id in 0..5 {
            fs::create_dir_all(step_dir.join(id.to_string())).unwrap();
        }
        fs::create_dir_all(step_dir.join("not-a-task")).unwrap();
        drop(store);

        let fresh = MetadataStore::open(dir.path()).unwrap();
        assert_eq!(fresh.create_task("F", 1, "end", &spec()).unwrap().task_id, 5);
    }

    #[test]
    fn task_ids_survive_restart() {
        let (dir, store) = with_run();
        for _ in 0..3 {
            store.create_task("F", 1, "start", &spec()).unwrap();
        }
        drop(store);

        let fresh = MetadataStore::open(dir.path()).unwrap();
        assert_eq!(fresh.create_task("F", 1, "start", &spec()).unwrap().task_id, 3);
    }

    #[test]
    fn concurrent_create_task_hands_out_contiguous_ids() {
        let (_dir, store) = with_run();
        store.create_task("F", 1, "start", &spec()).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                thread::spawn(move || {
                    let step = format!("s{}", i % 3);
                    (0..10)
                        .map(|_| store.create_task("F", 1, &step, &spec()).unwrap().task_id)
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let ids: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        let unique: HashSet<u64> = ids.iter().copied().collect();
        assert_eq!(ids.len(), 80);
        assert_eq!(unique, (1..=80).collect::<HashSet<u64>>());
    }

    #[test]
    fn task_roundtrip_list_and_heartbeat() {
        let (_dir, store) = with_run();
        let t0 = store.create_task("F", 1, "start", &spec().with_tags(["x"])).unwrap();
        let t1 = store.create_task("F", 1, "start", &spec()).unwrap();

        assert_eq!(store.get_task(&t0.path()).unwrap(), t0);
        let listed = store.list_tasks("F", 1, "start").unwrap();
        assert_eq!(listed, vec![t0.clone(), t1]);

        let beat = store.heartbeat_task(&t0.path()).unwrap();
        assert!(beat.last_heartbeat_ts.is_some());

        let missing = TaskPath::new("F", 1, "start", 42);
        assert!(store.get_task(&missing).unwrap_err().is_not_found());
        assert!(store.heartbeat_task(&missing).unwrap_err().is_not_found());
    }

    #[test]
    fn create_task_requires_existing_run() {
        let (_dir, store) = store();
        assert!(store
            .create_task("F", 1, "start", &spec())
            .unwrap_err()
            .is_not_found());
    }

    // ---- artifacts ----

    #[test]
    fn artifacts_are_scoped_by_attempt() {
        let (_dir, store) = with_run();
        let task = store.create_task("F", 1, "start", &spec()).unwrap();
        let path = task.path();

        store
            .register_artifacts(
                &path,
                vec![
                    Artifact::new("a", 1).with_field("sha", "1"),
                    Artifact::new("b", 1).with_field("sha", "2"),
                ],
            )
            .unwrap();

        let attempt1 = store.list_artifacts(&path, Some(1)).unwrap();
        let names: Vec<_> = attempt1.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(attempt1[0].fields["task_id"], 0);
        assert_eq!(attempt1[0].fields["sha"], "1");

        assert!(store.list_artifacts(&path, Some(2)).unwrap().is_empty());
        assert_eq!(store.list_artifacts(&path, None).unwrap().len(), 2);
    }

    #[test]
    fn artifacts_require_existing_task() {
        let (_dir, store) = with_run();
        let path = TaskPath::new("F", 1, "start", 0);
        assert!(store
            .register_artifacts(&path, vec![Artifact::new("a", 0)])
            .unwrap_err()
            .is_not_found());
    }

    // ---- metadata ----

    #[test]
    fn metadata_roundtrip_in_registration_order() {
        let (_dir, store) = with_run();
        let path = store.create_task("F", 1, "start", &spec()).unwrap().path();

        store
            .register_metadata(
                &path,
                (0..6)
                    .map(|i| MetadataEntry::new("attempt", i.to_string()).with_kind("attempt"))
                    .collect(),
            )
            .unwrap();

        let entries = store.get_metadata(&path).unwrap();
        let values: Vec<&str> = entries.iter().map(|e| e.value.as_str()).collect();
        assert_eq!(values, ["0", "1", "2", "3", "4", "5"]);
        assert!(entries.iter().all(|e| e.kind == "attempt"));
        assert!(entries.iter().all(|e| e.fields["step_name"] == "start"));
    }

    #[test]
    fn filter_tasks_matches_field_and_pattern() {
        let (_dir, store) = with_run();
        let t0 = store.create_task("F", 1, "start", &spec()).unwrap().path();
        let t1 = store.create_task("F", 1, "start", &spec()).unwrap().path();
        store.create_task("F", 1, "start", &spec()).unwrap();

        store
            .register_metadata(&t0, vec![MetadataEntry::new("origin-run-id", "run-12")])
            .unwrap();
        store
            .register_metadata(&t1, vec![MetadataEntry::new("origin-run-id", "run-34")])
            .unwrap();

        let hits = store
            .filter_tasks_by_metadata("F", 1, "start", "origin-run-id", "12$")
            .unwrap();
        assert_eq!(hits, vec!["F/1/start/0".to_string()]);

        let all = store
            .filter_tasks_by_metadata("F", 1, "start", "origin-run-id", ".*")
            .unwrap();
        assert_eq!(all.len(), 2);

        assert!(matches!(
            store.filter_tasks_by_metadata("F", 1, "start", "origin-run-id", "("),
            Err(StoreError::InvalidPattern(_))
        ));
    }

    #[test]
    fn writes_leave_no_temp_files() {
        let (dir, store) = with_run();
        let path = store.create_task("F", 1, "start", &spec()).unwrap().path();
        store.heartbeat_task(&path).unwrap();
        store
            .register_artifacts(&path, vec![Artifact::new("a", 0)])
            .unwrap();

        let meta = dir.path().join(".metaflow/F/1/start/0/_meta");
        let leftovers: Vec<_> = fs::read_dir(meta)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty(), "{leftovers:?}");
    }
}
