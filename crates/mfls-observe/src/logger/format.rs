use std::str::FromStr;

use crate::logger::error::LoggerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggerFormat {
    Text,
    Json,
    Journald,
}

const JOURNALD: bool = cfg!(all(target_os = "linux", feature = "journald"));

impl FromStr for LoggerFormat {
    type Err = LoggerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        match name.to_ascii_lowercase().as_str() {
            "text" => Ok(LoggerFormat::Text),
            "json" => Ok(LoggerFormat::Json),
            "journald" | "journal" if JOURNALD => Ok(LoggerFormat::Journald),
            "journald" | "journal" => Err(LoggerError::JournaldUnavailable),
            _ => Err(LoggerError::UnknownFormat(name.to_string())),
        }
    }
}
