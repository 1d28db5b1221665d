use std::path::{Path, PathBuf};

use mfls_model::{RunNumber, TaskPath};

pub(crate) const DATASTORE_DIR: &str = ".metaflow";
pub(crate) const META_DIR: &str = "_meta";
const SELF_FILE: &str = "_self.json";
const ARTIFACT_MARKER: &str = "_artifact_";
pub(crate) const METADATA_PREFIX: &str = "sysmeta_";
pub(crate) const JSON_EXT: &str = ".json";

/// Path arithmetic for the on-disk tree:
///
/// ```text
/// .metaflow/{flow}/_meta/_self.json
/// .metaflow/{flow}/{run}/_meta/_self.json
/// .metaflow/{flow}/{run}/{step}/_meta/_self.json
/// .metaflow/{flow}/{run}/{step}/{task}/_meta/_self.json
/// .metaflow/{flow}/{run}/{step}/{task}/_meta/{attempt}_artifact_{name}.json
/// .metaflow/{flow}/{run}/{step}/{task}/_meta/sysmeta_{field}_{unique}.json
/// ```
#[derive(Debug, Clone)]
pub(crate) struct Layout {
    root: PathBuf,
}

impl Layout {
    pub(crate) fn new(storage_root: &Path) -> Self {
        Self {
            root: storage_root.join(DATASTORE_DIR),
        }
    }

    pub(crate) fn root(&self) -> &Path {
        &self.root
    }

    pub(crate) fn flow_dir(&self, flow: &str) -> PathBuf {
        self.root.join(flow)
    }

    pub(crate) fn run_dir(&self, flow: &str, run: RunNumber) -> PathBuf {
        self.flow_dir(flow).join(run.to_string())
    }

    pub(crate) fn step_dir(&self, flow: &str, run: RunNumber, step: &str) -> PathBuf {
        self.run_dir(flow, run).join(step)
    }

    pub(crate) fn task_dir(&self, path: &TaskPath) -> PathBuf {
        self.step_dir(&path.flow, path.run, &path.step)
            .join(path.task.to_string())
    }

    pub(crate) fn meta_dir(dir: &Path) -> PathBuf {
        dir.join(META_DIR)
    }

    pub(crate) fn self_file(dir: &Path) -> PathBuf {
        Self::meta_dir(dir).join(SELF_FILE)
    }

    pub(crate) fn artifact_file(&self, path: &TaskPath, attempt: u32, name: &str) -> PathBuf {
        Self::meta_dir(&self.task_dir(path)).join(format!(
            "{}{name}{JSON_EXT}",
            artifact_prefix(Some(attempt))
        ))
    }

    pub(crate) fn metadata_file(&self, path: &TaskPath, field: &str) -> PathBuf {
        Self::meta_dir(&self.task_dir(path)).join(format!(
            "{METADATA_PREFIX}{field}_{}{JSON_EXT}",
            uuid::Uuid::new_v4().simple()
        ))
    }
}

/// File name prefix selecting artifacts of one attempt, or of all attempts.
pub(crate) fn artifact_prefix(attempt: Option<u32>) -> String {
    match attempt {
        Some(n) => format!("{n}{ARTIFACT_MARKER}"),
        None => ARTIFACT_MARKER.to_string(),
    }
}

/// Whether `file_name` is an artifact record of `attempt` (or of any attempt).
pub(crate) fn is_artifact_file(file_name: &str, attempt: Option<u32>) -> bool {
    if !file_name.ends_with(JSON_EXT) {
        return false;
    }
    match attempt {
        Some(_) => file_name.starts_with(&artifact_prefix(attempt)),
        None => file_name
            .split_once(ARTIFACT_MARKER)
            .is_some_and(|(n, _)| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit())),
    }
}

pub(crate) fn is_metadata_file(file_name: &str) -> bool {
    file_name.starts_with(METADATA_PREFIX) && file_name.ends_with(JSON_EXT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_paths_nest_under_datastore() {
        let layout = Layout::new(Path::new("/tmp/root"));
        let path = TaskPath::new("F", 2, "start", 7);

        assert_eq!(
            Layout::self_file(&layout.task_dir(&path)),
            Path::new("/tmp/root/.metaflow/F/2/start/7/_meta/_self.json")
        );
        assert_eq!(
            layout.artifact_file(&path, 1, "x"),
            Path::new("/tmp/root/.metaflow/F/2/start/7/_meta/1_artifact_x.json")
        );
    }

    #[test]
    fn artifact_file_matching() {
        assert!(is_artifact_file("1_artifact_x.json", Some(1)));
        assert!(!is_artifact_file("11_artifact_x.json", Some(1)));
        assert!(!is_artifact_file("1_artifact_x.json", Some(2)));
        assert!(is_artifact_file("11_artifact_x.json", None));
        assert!(!is_artifact_file("sysmeta_attempt_1.json", None));
        assert!(!is_artifact_file("_self.json", None));
        assert!(!is_artifact_file(".1_artifact_x.json.abc.tmp", None));
    }

    #[test]
    fn metadata_files_are_unique() {
        let layout = Layout::new(Path::new("/r"));
        let path = TaskPath::new("F", 1, "s", 0);
        let a = layout.metadata_file(&path, "attempt");
        let b = layout.metadata_file(&path, "attempt");
        assert_ne!(a, b);
        assert!(is_metadata_file(&a.file_name().unwrap().to_string_lossy()));
    }
}
