use std::path::{Path, PathBuf};

pub const BIN: &str = env!("CARGO_BIN_EXE_metaflow-local-service");

const ENV_VARS: &[&str] = &[
    "METAFLOW_LOCAL_SERVICE_PORT",
    "METAFLOW_LOCAL_SERVICE_ROOT",
    "METAFLOW_LOCAL_SERVICE_IDLE_TIMEOUT",
    "METAFLOW_LOCAL_SERVICE_DEBUG",
    "METAFLOW_LOCAL_SERVICE_LOG_FORMAT",
];

/// Strip the caller's environment overrides from a command for this binary.
pub fn isolate(cmd: &mut std::process::Command) -> &mut std::process::Command {
    for var in ENV_VARS {
        cmd.env_remove(var);
    }
    cmd
}

#[allow(dead_code)]
pub fn state_path(root: &Path) -> PathBuf {
    root.join(".metaflow-local-service").join("state.json")
}
