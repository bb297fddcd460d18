//! Process management layer
//!
//! Handles the language server process lifecycle and stderr draining,
//! completely separate from transport concerns.

use crate::io::transport::{StreamTransport, Transport};
use async_trait::async_trait;
use std::io;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// How long a graceful stop waits for the process before killing it
const GRACEFUL_EXIT_TIMEOUT: Duration = Duration::from_secs(2);

// ============================================================================
// Process State Management
// ============================================================================

/// How to stop a process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    /// Ask politely (SIGTERM), wait briefly, then force kill
    Graceful,
    /// Force kill immediately (SIGKILL)
    Force,
}

/// Process lifecycle states
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessState {
    /// Process has not been started yet
    NotStarted,
    /// Process is currently running
    Running { pid: u32 },
    /// Process has been stopped (either gracefully or forcefully)
    Stopped,
}

impl ProcessState {
    /// Get the process ID if the process is running
    pub fn pid(&self) -> Option<u32> {
        match self {
            ProcessState::Running { pid } => Some(*pid),
            _ => None,
        }
    }

    /// Check if the process is currently running
    pub fn is_running(&self) -> bool {
        matches!(self, ProcessState::Running { .. })
    }
}

// ============================================================================
// Stderr Monitoring Trait
// ============================================================================

/// Trait for monitoring stderr output from external processes
pub trait StderrMonitor: Send + Sync {
    /// Install a handler for stderr lines
    ///
    /// Must be installed before the process starts. Without a handler the
    /// lines are still drained so the server never blocks on a full pipe.
    fn on_stderr_line<F>(&mut self, handler: F)
    where
        F: Fn(String) + Send + Sync + 'static;
}

// ============================================================================
// Process Management
// ============================================================================

/// Error types for process management
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to start {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Process not started")]
    NotStarted,

    #[error("Process already started")]
    AlreadyStarted,

    #[error("Stdin not available")]
    StdinNotAvailable,

    #[error("Stdout not available")]
    StdoutNotAvailable,
}

/// Trait for managing external process lifecycle
#[async_trait]
pub trait ProcessManager: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Start the external process
    async fn start(&mut self) -> Result<(), Self::Error>;

    /// Stop the external process
    async fn stop(&mut self, mode: StopMode) -> Result<(), Self::Error>;

    /// Check if the process is currently running
    fn is_running(&self) -> bool;

    /// Hand out the transport over the process stdin/stdout (once)
    fn create_stdio_transport(&mut self) -> Result<StreamTransport, Self::Error>;

    /// Synchronous force kill for Drop implementations
    fn kill_sync(&mut self);
}

/// Manages a language server spawned via Command, with no arguments
pub struct ChildProcessManager {
    /// Executable to run
    command: String,

    /// Process state
    state: ProcessState,

    /// The spawned child process (if running)
    child: Option<Child>,

    /// Stdio transport (created when process starts)
    stdio_transport: Option<StreamTransport>,

    /// Stderr handler
    stderr_handler: Option<Box<dyn Fn(String) + Send + Sync>>,

    /// Stderr draining task handle
    stderr_task: Option<JoinHandle<()>>,
}

impl ChildProcessManager {
    /// Create a new child process manager for `command`
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            state: ProcessState::NotStarted,
            child: None,
            stdio_transport: None,
            stderr_handler: None,
            stderr_task: None,
        }
    }

    /// Current process state
    #[cfg(test)]
    pub fn state(&self) -> &ProcessState {
        &self.state
    }

    /// Executable this manager runs
    pub fn command(&self) -> &str {
        &self.command
    }

    fn spawn_stderr_drain(&mut self, stderr: ChildStderr) {
        let handler = self.stderr_handler.take();
        let command = self.command.clone();

        let task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim_end().to_string();
                        if line.is_empty() {
                            continue;
                        }
                        match &handler {
                            Some(handler) => handler(line),
                            None => trace!("{} stderr: {}", command, line),
                        }
                    }
                    Ok(None) => {
                        trace!("ChildProcessManager: stderr EOF reached");
                        break;
                    }
                    Err(e) => {
                        error!("Failed to read from stderr: {}", e);
                        break;
                    }
                }
            }
        });

        self.stderr_task = Some(task);
    }

    #[cfg(unix)]
    fn send_sigterm(pid: u32) {
        // SAFETY: kill(2) with a pid we spawned and still own; no memory is touched.
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        if rc == 0 {
            debug!("Sent SIGTERM to process {}", pid);
        }
    }

    #[cfg(not(unix))]
    fn send_sigterm(pid: u32) {
        warn!("No graceful termination signal on this platform for PID {}", pid);
    }
}

#[async_trait]
impl ProcessManager for ChildProcessManager {
    type Error = ProcessError;

    async fn start(&mut self) -> Result<(), Self::Error> {
        if self.is_running() {
            return Err(ProcessError::AlreadyStarted);
        }

        info!("Starting language server: {}", self.command);

        let mut child = Command::new(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                command: self.command.clone(),
                source,
            })?;

        let pid = child
            .id()
            .ok_or_else(|| io::Error::other("spawned process has no PID"))?;
        info!("Language server started with PID: {}", pid);

        let stdin = child.stdin.take().ok_or(ProcessError::StdinNotAvailable)?;
        let stdout = child
            .stdout
            .take()
            .ok_or(ProcessError::StdoutNotAvailable)?;
        if let Some(stderr) = child.stderr.take() {
            self.spawn_stderr_drain(stderr);
        }

        self.stdio_transport = Some(StreamTransport::from_child(stdin, stdout));
        self.child = Some(child);
        self.state = ProcessState::Running { pid };

        Ok(())
    }

    async fn stop(&mut self, mode: StopMode) -> Result<(), Self::Error> {
        let pid = self.state.pid().ok_or(ProcessError::NotStarted)?;
        let mut child = self.child.take().ok_or(ProcessError::NotStarted)?;

        // An unclaimed transport still holds the pipes; close it first.
        if let Some(mut transport) = self.stdio_transport.take() {
            let _ = transport.close().await;
        }

        let graceful_exit = match mode {
            StopMode::Graceful => {
                info!("Gracefully stopping process with PID: {}", pid);
                if matches!(child.try_wait(), Ok(None)) {
                    Self::send_sigterm(pid);
                }
                tokio::time::timeout(GRACEFUL_EXIT_TIMEOUT, child.wait())
                    .await
                    .ok()
            }
            StopMode::Force => None,
        };

        match graceful_exit {
            Some(Ok(status)) => info!("Process {} exited with status: {}", pid, status),
            Some(Err(e)) => warn!("Error waiting for process {}: {}", pid, e),
            None => {
                info!("Force killing process with PID: {}", pid);
                child.kill().await?;
            }
        }

        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
        self.state = ProcessState::Stopped;

        Ok(())
    }

    fn is_running(&self) -> bool {
        self.state.is_running()
    }

    fn create_stdio_transport(&mut self) -> Result<StreamTransport, Self::Error> {
        self.stdio_transport.take().ok_or(ProcessError::NotStarted)
    }

    fn kill_sync(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };

        info!("Synchronously force killing process with PID: {:?}", child.id());
        if let Err(e) = child.start_kill() {
            debug!("start_kill failed (process likely already exited): {}", e);
        }
        // Reap if it is already gone; otherwise tokio's orphan reaper collects it.
        let _ = child.try_wait();

        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
        self.state = ProcessState::Stopped;
    }
}

impl StderrMonitor for ChildProcessManager {
    fn on_stderr_line<F>(&mut self, handler: F)
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        self.stderr_handler = Some(Box::new(handler));
    }
}

impl Drop for ChildProcessManager {
    fn drop(&mut self) {
        self.kill_sync();
    }
}
