mod config;
mod driver;
mod fixture;
mod io;
mod logging;
mod lsp;
mod session;

#[cfg(test)]
mod test_utils;

use clap::Parser;
use config::{ConfigError, DEFAULT_ADDR, ExerciserConfig, RawOptions, RunMode, ServerRegistry};
use driver::DriverError;
use driver::interactive::{self, Prompter};
use driver::replay;
use logging::{LogConfig, init_logging};
use session::Session;
use std::path::PathBuf;
use tracing::{debug, error, info};

/// Exercise a language server interactively, or replay recorded fixtures against it
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Communication mode (stdio|tcp)
    #[arg(long, default_value = "stdio")]
    mode: String,

    /// Server address (tcp mode); ":PORT" means localhost
    #[arg(long, default_value = DEFAULT_ADDR)]
    addr: String,

    /// Workspace root path sent with initialize
    #[arg(long, value_name = "DIR")]
    root: Option<PathBuf>,

    /// Replay the built-in fixtures for LANG instead of prompting;
    /// fixture repositories are looked up under --root
    #[arg(long, value_name = "LANG")]
    replay: Option<String>,

    /// Log level (overrides RUST_LOG env var)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Log file path (overrides LSP_EXERCISER_LOG_FILE env var)
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// Language server executable to spawn (stdio mode)
    #[arg(value_name = "COMMAND")]
    command: Option<String>,
}

impl Args {
    fn into_options(self) -> RawOptions {
        RawOptions {
            mode: self.mode,
            addr: self.addr,
            root: self.root,
            command: self.command,
            replay: self.replay,
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error("replay failed: {passed} of {total} cases passed{teardown}")]
    ReplayFailed {
        passed: usize,
        total: usize,
        teardown: String,
    },
}

async fn run(args: Args) -> Result<(), AppError> {
    let registry = ServerRegistry::default();
    debug!(
        "Registered languages: {:?}",
        registry.languages().collect::<Vec<_>>()
    );

    let config = ExerciserConfig::from_args(args.into_options(), &registry)?;
    info!(
        "Mode {}: server {}, root {}",
        config.mode,
        config.target,
        config.root.display()
    );

    match &config.run {
        RunMode::Interactive => {
            let mut session = Session::open(&config.target)
                .await
                .map_err(DriverError::from)?;
            let root = config.root.to_string_lossy();
            let mut prompter = Prompter::stdio();
            interactive::run(&mut session, &root, &mut prompter).await?;
        }
        RunMode::Replay { language } => {
            let report = replay::run(&config, language).await?;
            println!("{report}");

            if !report.is_success() {
                let teardown = if report.teardown_errors.is_empty() {
                    String::new()
                } else {
                    format!(", teardown failed: {}", report.teardown_errors.join("; "))
                };
                return Err(AppError::ReplayFailed {
                    passed: report.passed(),
                    total: report.outcomes.len(),
                    teardown,
                });
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let log_config =
        LogConfig::from_env().with_overrides(args.log_level.clone(), args.log_file.clone());
    if let Err(e) = init_logging(log_config) {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(1);
    }

    if let Err(e) = run(args).await {
        error!("{}", e);
        eprintln!("{e}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let args =
            Args::try_parse_from(["lsp-exerciser", "--root", "/workspace", "langserver-sample"])
                .unwrap();

        assert_eq!(args.mode, "stdio");
        assert_eq!(args.addr, ":2088");
        assert_eq!(args.root, Some(PathBuf::from("/workspace")));
        assert_eq!(args.command.as_deref(), Some("langserver-sample"));
        assert!(args.replay.is_none());
    }

    #[tokio::test]
    async fn test_missing_root_fails_before_any_work() {
        let args = Args::try_parse_from(["lsp-exerciser", "langserver-sample"]).unwrap();

        let err = run(args).await.unwrap_err();
        assert!(matches!(err, AppError::Config(ConfigError::MissingRoot)));
    }

    #[tokio::test]
    async fn test_invalid_mode_fails_before_any_work() {
        let args =
            Args::try_parse_from(["lsp-exerciser", "--mode", "udp", "--root", "/w", "x"]).unwrap();

        let err = run(args).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid mode \"udp\" (expected \"stdio\" or \"tcp\")"
        );
    }

    #[tokio::test]
    async fn test_spawn_failure_is_fatal() {
        let args = Args::try_parse_from([
            "lsp-exerciser",
            "--root",
            "/workspace",
            "definitely-not-a-language-server-xyz",
        ])
        .unwrap();

        let err = run(args).await.unwrap_err();
        assert!(matches!(err, AppError::Driver(DriverError::Session(_))));
    }
}
