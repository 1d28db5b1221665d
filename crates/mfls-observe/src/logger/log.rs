use time::{UtcOffset, format_description::well_known::Rfc3339};
use tracing_subscriber::{
    EnvFilter, Layer, Registry, fmt, fmt::time::OffsetTime, layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::logger::{config::LoggerConfig, error::LoggerError, format::LoggerFormat};

type Output = Box<dyn Layer<Registry> + Send + Sync>;

/// Syslog identifier of journald records.
#[cfg(all(target_os = "linux", feature = "journald"))]
const SYSLOG_IDENTIFIER: &str = "metaflow-local-service";

pub(crate) fn install(cfg: &LoggerConfig) -> Result<(), LoggerError> {
    let filter = env_filter(&cfg.level)?;
    let output: Output = match cfg.format {
        LoggerFormat::Text => fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(cfg.use_color)
            .with_target(cfg.with_targets)
            .with_timer(local_timer())
            .boxed(),
        LoggerFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .with_target(cfg.with_targets)
            .with_timer(local_timer())
            .boxed(),
        LoggerFormat::Journald => journald()?,
    };

    if tracing::dispatcher::has_been_set() {
        return Err(LoggerError::AlreadyInstalled);
    }
    tracing_subscriber::registry()
        .with(output.with_filter(filter))
        .try_init()?;
    Ok(())
}

fn env_filter(directives: &str) -> Result<EnvFilter, LoggerError> {
    EnvFilter::try_new(directives).map_err(|source| LoggerError::Filter {
        directives: directives.to_string(),
        source,
    })
}

fn local_timer() -> OffsetTime<Rfc3339> {
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    OffsetTime::new(offset, Rfc3339)
}

#[cfg(all(target_os = "linux", feature = "journald"))]
fn journald() -> Result<Output, LoggerError> {
    let layer = tracing_journald::layer()
        .map_err(LoggerError::Journald)?
        .with_syslog_identifier(SYSLOG_IDENTIFIER.to_string());
    Ok(layer.boxed())
}

#[cfg(not(all(target_os = "linux", feature = "journald")))]
fn journald() -> Result<Output, LoggerError> {
    Err(LoggerError::JournaldUnavailable)
}
