use std::{io, path::PathBuf};

use mfls_core::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("metaflow-local-service failed to start on {}: {hint}", describe_port(*port))]
    Unreachable { port: u16, hint: String },

    #[error("failed to spawn daemon {}: {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to bind 127.0.0.1:{port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("failed to signal pid {pid}: {source}")]
    Signal {
        pid: u32,
        #[source]
        source: io::Error,
    },

    #[error("failed to install signal handler: {0}")]
    SignalHandler(#[source] io::Error),

    #[error("io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("health probe error: {0}")]
    Probe(#[from] reqwest::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("server stopped abnormally: {0}")]
    Serve(String),
}

impl DaemonError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> DaemonError {
        let path = path.into();
        move |source| DaemonError::Io { path, source }
    }
}

fn describe_port(port: u16) -> String {
    match port {
        0 => "an ephemeral port".to_string(),
        p => format!("port {p}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_names_the_port() {
        let fixed = DaemonError::Unreachable {
            port: 8080,
            hint: "retry".into(),
        };
        assert_eq!(
            fixed.to_string(),
            "metaflow-local-service failed to start on port 8080: retry"
        );

        let ephemeral = DaemonError::Unreachable {
            port: 0,
            hint: "retry".into(),
        };
        assert!(ephemeral.to_string().contains("an ephemeral port"));
    }
}
