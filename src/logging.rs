//! Log setup
//!
//! Events go to stderr or to a file, never to stdout: stdout carries the
//! prompt loop and the replay report.

use std::env;
use std::fs::OpenOptions;
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::{Layered, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

/// Quiet by default so the interactive console stays readable
const DEFAULT_FILTER: &str = "warn";

type FilteredRegistry = Layered<EnvFilter, Registry>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogConfig {
    /// `EnvFilter` directives, e.g. `info` or `lsp_exerciser::lsp=trace`
    pub filter: String,
    /// Append to this file instead of writing to stderr
    pub file: Option<PathBuf>,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_FILTER.to_string(),
            file: None,
            format: LogFormat::Text,
        }
    }
}

impl LogConfig {
    /// `RUST_LOG`, `LSP_EXERCISER_LOG_FILE` and `LSP_EXERCISER_LOG_JSON=true`
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            filter: env::var("RUST_LOG").unwrap_or(defaults.filter),
            file: env::var_os("LSP_EXERCISER_LOG_FILE").map(PathBuf::from),
            format: match env::var("LSP_EXERCISER_LOG_JSON").as_deref() {
                Ok("true") => LogFormat::Json,
                _ => defaults.format,
            },
        }
    }

    /// Command-line values win over the environment
    pub fn with_overrides(mut self, filter: Option<String>, file: Option<PathBuf>) -> Self {
        self.filter = filter.unwrap_or(self.filter);
        self.file = file.or(self.file);
        self
    }

    fn writer(&self) -> io::Result<(BoxMakeWriter, bool)> {
        match &self.file {
            Some(path) => {
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                Ok((BoxMakeWriter::new(Mutex::new(file)), false))
            }
            None => Ok((BoxMakeWriter::new(io::stderr), io::stderr().is_terminal())),
        }
    }
}

/// Install the global subscriber; fails if the filter is unusable or the
/// log file cannot be opened
pub fn init_logging(config: LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    let filter =
        EnvFilter::try_new(&config.filter).or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))?;
    let (writer, ansi) = config.writer()?;

    let layer: Box<dyn Layer<FilteredRegistry> + Send + Sync> = match config.format {
        LogFormat::Json => fmt::layer().json().with_writer(writer).boxed(),
        LogFormat::Text => fmt::layer()
            .with_writer(writer)
            .with_ansi(ansi)
            .with_target(true)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()?;
    Ok(())
}

/// Log one structured LSP request/response event on a single line
#[macro_export]
macro_rules! log_lsp_message {
    ($level:expr, $direction:expr, $method:expr, $data:expr) => {
        tracing::event!(
            $level,
            direction = $direction,
            method = $method,
            data = ?$data,
            "LSP message"
        );
    };
}

/// Log how long a remote call took
#[macro_export]
macro_rules! log_timing {
    ($level:expr, $operation:expr, $duration:expr) => {
        tracing::event!(
            $level,
            operation = $operation,
            duration_ms = $duration.as_millis(),
            "Call finished"
        );
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_quiet_text_on_stderr() {
        let config = LogConfig::default();
        assert_eq!(config.filter, "warn");
        assert!(config.file.is_none());
        assert_eq!(config.format, LogFormat::Text);
    }

    #[test]
    fn test_cli_overrides_take_precedence() {
        let config = LogConfig::default().with_overrides(
            Some("debug".to_string()),
            Some(PathBuf::from("/tmp/exerciser.log")),
        );
        assert_eq!(config.filter, "debug");
        assert_eq!(config.file, Some(PathBuf::from("/tmp/exerciser.log")));

        assert_eq!(
            LogConfig::default().with_overrides(None, None),
            LogConfig::default()
        );
    }

    #[test]
    fn test_file_writer_creates_the_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exerciser.log");
        let config = LogConfig::default().with_overrides(None, Some(path.clone()));

        let (_writer, ansi) = config.writer().unwrap();
        assert!(!ansi);
        assert!(path.exists());
    }

    #[test]
    fn test_unwritable_log_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config =
            LogConfig::default().with_overrides(None, Some(dir.path().join("missing/x.log")));

        assert!(config.writer().is_err());
    }
}
