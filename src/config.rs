//! Run configuration
//!
//! Turns the command line into an `ExerciserConfig` and holds the
//! language-to-server registry. Validation here fails before any process is
//! spawned or socket opened.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Default TCP address, Go-style (host omitted)
pub const DEFAULT_ADDR: &str = ":2088";

/// Configuration errors, all fatal at startup
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid mode {0:?} (expected \"stdio\" or \"tcp\")")]
    InvalidMode(String),

    #[error("--root is required")]
    MissingRoot,

    #[error("a server command is required in stdio mode")]
    MissingCommand,

    #[error("provide an address to connect to in tcp mode")]
    EmptyAddress,

    #[error("no server command registered for language {0:?}")]
    UnknownLanguage(String),
}

/// How to reach the language server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportMode {
    #[default]
    Stdio,
    Tcp,
}

impl FromStr for TransportMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stdio" => Ok(TransportMode::Stdio),
            "tcp" => Ok(TransportMode::Tcp),
            other => Err(ConfigError::InvalidMode(other.to_string())),
        }
    }
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportMode::Stdio => f.write_str("stdio"),
            TransportMode::Tcp => f.write_str("tcp"),
        }
    }
}

/// A fully resolved server endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerTarget {
    Spawn { command: String },
    Connect { addr: String },
}

impl fmt::Display for ServerTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerTarget::Spawn { command } => write!(f, "{command} (stdio)"),
            ServerTarget::Connect { addr } => write!(f, "{addr} (tcp)"),
        }
    }
}

/// Expand a `:PORT` address to `localhost:PORT`
pub fn normalize_addr(addr: &str) -> Result<String, ConfigError> {
    let addr = addr.trim();
    if addr.is_empty() {
        return Err(ConfigError::EmptyAddress);
    }

    Ok(match addr.strip_prefix(':') {
        Some(port) => format!("localhost:{port}"),
        None => addr.to_string(),
    })
}

/// Language identifier to server executable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerRegistry {
    commands: BTreeMap<String, String>,
}

impl Default for ServerRegistry {
    fn default() -> Self {
        Self::empty()
            .with_command("go", "langserver-go")
            .with_command("python", "langserver-python")
            .with_command("sample", "langserver-sample")
    }
}

impl ServerRegistry {
    pub fn empty() -> Self {
        Self {
            commands: BTreeMap::new(),
        }
    }

    /// Register (or replace) the command for a language
    pub fn with_command(mut self, language: impl Into<String>, command: impl Into<String>) -> Self {
        self.commands.insert(language.into(), command.into());
        self
    }

    pub fn command_for(&self, language: &str) -> Result<&str, ConfigError> {
        self.commands
            .get(language)
            .map(String::as_str)
            .ok_or_else(|| ConfigError::UnknownLanguage(language.to_string()))
    }

    pub fn languages(&self) -> impl Iterator<Item = &str> {
        self.commands.keys().map(String::as_str)
    }
}

/// What the run does once connected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMode {
    Interactive,
    Replay { language: String },
}

/// Raw command-line values, before validation
#[derive(Debug, Clone, Default)]
pub struct RawOptions {
    pub mode: String,
    pub addr: String,
    pub root: Option<PathBuf>,
    pub command: Option<String>,
    pub replay: Option<String>,
}

/// Validated configuration for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExerciserConfig {
    pub mode: TransportMode,
    pub target: ServerTarget,
    pub root: PathBuf,
    pub run: RunMode,
}

impl ExerciserConfig {
    /// Validate the command line against the registry
    ///
    /// In replay mode with stdio transport the server command comes from the
    /// registry unless one was given explicitly.
    pub fn from_args(options: RawOptions, registry: &ServerRegistry) -> Result<Self, ConfigError> {
        let mode: TransportMode = options.mode.parse()?;
        let root = options
            .root
            .filter(|root| !root.as_os_str().is_empty())
            .ok_or(ConfigError::MissingRoot)?;

        let run = match options.replay {
            Some(language) => {
                registry.command_for(&language)?;
                RunMode::Replay { language }
            }
            None => RunMode::Interactive,
        };

        let target = match mode {
            TransportMode::Stdio => {
                let command = match (options.command, &run) {
                    (Some(command), _) if !command.is_empty() => command,
                    (_, RunMode::Replay { language }) => {
                        registry.command_for(language)?.to_string()
                    }
                    _ => return Err(ConfigError::MissingCommand),
                };
                ServerTarget::Spawn { command }
            }
            TransportMode::Tcp => ServerTarget::Connect {
                addr: normalize_addr(&options.addr)?,
            },
        };

        Ok(Self {
            mode,
            target,
            root,
            run,
        })
    }
}
