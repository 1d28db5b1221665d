pub mod config;
pub use config::{DaemonConfig, RuntimeConfig, SupervisorConfig};

mod error;
pub use error::DaemonError;

mod shutdown;
pub use shutdown::{ShutdownReason, ShutdownTrigger};

mod idle;
pub use idle::{IdleMonitor, MonitorState};

pub mod proc;
mod probe;
pub use probe::Probe;

mod state;
pub use state::{DaemonState, StateFile};

mod runtime;
pub use runtime::{DaemonRuntime, RunningDaemon};

mod supervisor;
pub use supervisor::{ProcessSupervisor, StartOutcome};
