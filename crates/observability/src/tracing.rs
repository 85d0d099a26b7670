//! Tracing/logging initialization.
//!
//! One fmt subscriber per process: `RUST_LOG` wins over the configured level,
//! every line carries the emitting thread's name (one thread per agent), and
//! output goes either to stderr or to an append-mode log file.

use std::fs::OpenOptions;
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Mutex;

use serde::Deserialize;
use thiserror::Error;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

#[derive(Debug, Error)]
pub enum ObservabilityError {
    #[error("unknown log level {0:?} (expected ERROR, WARNING, INFO or DEBUG)")]
    UnknownLevel(String),

    #[error("cannot open log file {path}: {source}")]
    OpenLogFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Minimum level written when `RUST_LOG` is not set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    #[default]
    Debug,
}

impl LogLevel {
    fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }
}

impl FromStr for LogLevel {
    type Err = ObservabilityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ERROR" => Ok(LogLevel::Error),
            "WARNING" | "WARN" => Ok(LogLevel::Warn),
            "INFO" => Ok(LogLevel::Info),
            "DEBUG" => Ok(LogLevel::Debug),
            _ => Err(ObservabilityError::UnknownLevel(s.to_string())),
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = ObservabilityError;

    fn try_from(value: String) -> Result<Self, ObservabilityError> {
        value.parse()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogOptions {
    pub level: LogLevel,
    pub format: LogFormat,
    /// Append to this file instead of writing to stderr.
    pub file: Option<PathBuf>,
}

/// Install the process-wide subscriber.
///
/// Safe to call multiple times (subsequent calls are no-ops). Fails only if the
/// log file cannot be opened.
pub fn init(options: &LogOptions) -> Result<(), ObservabilityError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(options.level.as_directive()));

    let (writer, ansi) = match &options.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| ObservabilityError::OpenLogFile {
                    path: path.clone(),
                    source,
                })?;
            (BoxMakeWriter::new(Mutex::new(file)), false)
        }
        None => (BoxMakeWriter::new(io::stderr), io::stderr().is_terminal()),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(ansi)
        .with_thread_names(true)
        .with_target(false);

    let installed = match options.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    };
    if installed.is_ok() {
        ::tracing::debug!(level = ?options.level, format = ?options.format, "logging initialised");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_parse_case_insensitively() {
        assert_eq!("debug".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!("WARNING".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("Warn".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("ERROR".parse::<LogLevel>().unwrap(), LogLevel::Error);
        assert!(matches!(
            "TRACE".parse::<LogLevel>(),
            Err(ObservabilityError::UnknownLevel(_))
        ));
    }

    #[test]
    fn level_converts_from_owned_string() {
        assert_eq!(LogLevel::try_from("Warn".to_string()).unwrap(), LogLevel::Warn);
        assert!(matches!(
            LogLevel::try_from(String::new()),
            Err(ObservabilityError::UnknownLevel(_))
        ));
    }

    #[test]
    fn level_and_format_deserialize() {
        let level: LogLevel = serde_json::from_str("\"info\"").unwrap();
        assert_eq!(level, LogLevel::Info);
        assert!(serde_json::from_str::<LogLevel>("\"loud\"").is_err());

        let format: LogFormat = serde_json::from_str("\"json\"").unwrap();
        assert_eq!(format, LogFormat::Json);
    }

    #[test]
    fn unwritable_log_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let options = LogOptions {
            file: Some(dir.path().join("missing").join("hgcs.log")),
            ..LogOptions::default()
        };
        assert!(matches!(init(&options), Err(ObservabilityError::OpenLogFile { .. })));
    }

    #[test]
    fn init_twice_is_harmless() {
        let dir = tempfile::tempdir().unwrap();
        let options = LogOptions {
            file: Some(dir.path().join("hgcs.log")),
            ..LogOptions::default()
        };
        assert!(init(&options).is_ok());
        assert!(init(&options).is_ok());
        assert!(dir.path().join("hgcs.log").exists());
    }
}
