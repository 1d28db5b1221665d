use thiserror::Error;
use tracing_subscriber::{filter::ParseError, util::TryInitError};

#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("unknown log format {0:?} (expected text, json or journald)")]
    UnknownFormat(String),

    #[error("journald logging needs Linux and the `journald` feature")]
    JournaldUnavailable,

    #[error("invalid log filter {directives:?}: {source}")]
    Filter {
        directives: String,
        #[source]
        source: ParseError,
    },

    #[error("a global logger is already installed")]
    AlreadyInstalled,

    #[error("failed to install logger: {0}")]
    Install(#[from] TryInitError),

    #[cfg(all(target_os = "linux", feature = "journald"))]
    #[error("cannot connect to journald: {0}")]
    Journald(#[source] std::io::Error),
}
