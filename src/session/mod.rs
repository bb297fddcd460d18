//! Language server session
//!
//! A `Session` owns one JSON-RPC connection (and, in stdio mode, the server
//! process behind it) and exposes the handful of typed calls the drivers
//! need. Every call goes through the lifecycle state machine first, so an
//! illegal call never reaches the wire.

pub mod error;
pub mod state;

pub use error::SessionError;
pub use state::{QueryKind, SessionOperation, SessionState};

use crate::config::ServerTarget;
use crate::io::{
    ChildProcessManager, ProcessManager, StderrMonitor, StopMode, StreamTransport, Transport,
};
use crate::log_timing;
use crate::lsp::JsonRpcClient;
use crate::lsp::protocol::JsonRpcNotification;
use crate::lsp::types::{DocumentPositionParams, InitializeParams, ReferenceParams};
use async_trait::async_trait;
use lsp_types::{
    ClientCapabilities, ClientInfo, GotoCapability, GotoDefinitionResponse, Hover,
    HoverClientCapabilities, HoverProviderCapability, InitializeResult, Location, MarkupKind,
    OneOf, ReferenceClientCapabilities, ServerCapabilities, TextDocumentClientCapabilities,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use state::Lifecycle;
use std::time::Instant;
use tracing::{Level, debug, info, warn};
use url::Url;

// ============================================================================
// Session Trait
// ============================================================================

/// The operations a driver can issue against a language server
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LanguageSession: Send {
    /// Handshake; must be the first call and succeeds at most once
    async fn initialize(&mut self, root_path: &str) -> Result<(), SessionError>;

    /// Hover payload at a position; `None` when the server has nothing
    async fn hover(
        &mut self,
        document: &str,
        line: u32,
        character: u32,
    ) -> Result<Option<Hover>, SessionError>;

    /// Definition locations, possibly empty
    async fn definition(
        &mut self,
        document: &str,
        line: u32,
        character: u32,
    ) -> Result<Vec<Location>, SessionError>;

    /// Reference locations, declaration included
    async fn references(
        &mut self,
        document: &str,
        line: u32,
        character: u32,
    ) -> Result<Vec<Location>, SessionError>;

    /// Ask the server to shut down; no queries are allowed afterwards
    async fn shutdown(&mut self) -> Result<(), SessionError>;

    /// Release the connection and stop the server process. Idempotent.
    async fn close(&mut self) -> Result<(), SessionError>;
}

// ============================================================================
// Session Implementation
// ============================================================================

/// One connection to one language server
pub struct Session<T: Transport> {
    rpc: JsonRpcClient<T>,

    lifecycle: Lifecycle,

    /// Present only when this session spawned the server
    process: Option<ChildProcessManager>,

    /// Captured from the initialize response
    server_capabilities: Option<ServerCapabilities>,
}

impl<T: Transport + 'static> Session<T> {
    /// Wrap an already established transport
    pub fn new(transport: T) -> Self {
        Self {
            rpc: JsonRpcClient::new(transport),
            lifecycle: Lifecycle::new(),
            process: None,
            server_capabilities: None,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> SessionState {
        self.lifecycle.state()
    }

    /// Validate, send, await and record one request
    async fn call<P, R>(
        &mut self,
        operation: SessionOperation,
        method: &str,
        params: Option<P>,
    ) -> Result<R, SessionError>
    where
        P: Serialize + Send,
        R: DeserializeOwned + Send,
    {
        self.lifecycle.begin(operation)?;

        let started = Instant::now();
        let result = self
            .rpc
            .request(method, params)
            .await
            .map_err(|e| SessionError::from_rpc(method, e));
        log_timing!(Level::DEBUG, method, started.elapsed());

        let result = result?;
        self.lifecycle.complete(operation);
        Ok(result)
    }

    /// The shared shape of hover, definition and references
    async fn positional_call<P, R>(&mut self, kind: QueryKind, params: P) -> Result<R, SessionError>
    where
        P: Serialize + Send,
        R: DeserializeOwned + Send,
    {
        debug!("{} request", kind);
        if let Some(capabilities) = &self.server_capabilities
            && !advertises(capabilities, kind)
        {
            warn!("Server did not advertise {} support", kind);
        }
        self.call(SessionOperation::Query(kind), kind.method(), Some(params))
            .await
    }
}

impl Session<StreamTransport> {
    /// Spawn `command` (no arguments) and talk to it over its stdio
    pub async fn spawn(command: &str) -> Result<Self, SessionError> {
        let mut process = ChildProcessManager::new(command);
        let server = command.to_string();
        process.on_stderr_line(move |line| {
            debug!(target: "lsp_exerciser::server", "[{}] {}", server, line)
        });

        process.start().await?;
        let transport = process.create_stdio_transport()?;

        let mut session = Self::new(transport);
        session.process = Some(process);
        Ok(session)
    }

    /// Connect to a language server listening on `addr`
    pub async fn connect(addr: &str) -> Result<Self, SessionError> {
        let transport = StreamTransport::connect(addr).await?;
        Ok(Self::new(transport))
    }

    /// Spawn or connect, whichever the target calls for
    pub async fn open(target: &ServerTarget) -> Result<Self, SessionError> {
        match target {
            ServerTarget::Spawn { command } => Self::spawn(command).await,
            ServerTarget::Connect { addr } => Self::connect(addr).await,
        }
    }
}

#[async_trait]
impl<T: Transport + 'static> LanguageSession for Session<T> {
    async fn initialize(&mut self, root_path: &str) -> Result<(), SessionError> {
        info!("Initializing session with root {}", root_path);
        self.rpc.on_notification(log_server_notification).await;

        let params = InitializeParams {
            process_id: Some(std::process::id()),
            root_path: root_path.to_string(),
            root_uri: root_uri(root_path),
            capabilities: client_capabilities(),
            client_info: ClientInfo {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            },
        };

        let result: Value = self
            .call(SessionOperation::Initialize, "initialize", Some(params))
            .await?;

        match serde_json::from_value::<InitializeResult>(result) {
            Ok(result) => {
                debug!("Server capabilities: {:?}", result.capabilities);
                self.server_capabilities = Some(result.capabilities);
            }
            Err(e) => warn!("Could not read server capabilities: {}", e),
        }

        self.rpc
            .notify("initialized", Some(serde_json::json!({})))
            .map_err(|e| SessionError::from_rpc("initialized", e))?;

        info!("Session initialized");
        Ok(())
    }

    async fn hover(
        &mut self,
        document: &str,
        line: u32,
        character: u32,
    ) -> Result<Option<Hover>, SessionError> {
        let params = DocumentPositionParams::new(document, line, character);
        self.positional_call(QueryKind::Hover, params).await
    }

    async fn definition(
        &mut self,
        document: &str,
        line: u32,
        character: u32,
    ) -> Result<Vec<Location>, SessionError> {
        let params = DocumentPositionParams::new(document, line, character);
        let response: Option<GotoDefinitionResponse> =
            self.positional_call(QueryKind::Definition, params).await?;
        Ok(definition_locations(response))
    }

    async fn references(
        &mut self,
        document: &str,
        line: u32,
        character: u32,
    ) -> Result<Vec<Location>, SessionError> {
        let params = ReferenceParams::from(DocumentPositionParams::new(document, line, character));
        let response: Option<Vec<Location>> =
            self.positional_call(QueryKind::References, params).await?;
        Ok(response.unwrap_or_default())
    }

    async fn shutdown(&mut self) -> Result<(), SessionError> {
        info!("Shutting down language server");

        let _: Value = self
            .call(SessionOperation::Shutdown, "shutdown", None::<Value>)
            .await?;

        if !self.rpc.is_connected() {
            debug!("Connection already gone, not sending exit");
        } else if let Err(e) = self.rpc.notify("exit", None::<Value>) {
            debug!("Could not send exit notification: {}", e);
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        if self.lifecycle.is_closed() {
            debug!("Session already closed");
            return Ok(());
        }

        let shut_down = self.lifecycle.state() == SessionState::ShuttingDown;
        self.lifecycle.close();

        let closed = self
            .rpc
            .close()
            .await
            .map_err(|e| SessionError::from_rpc("close", e));

        if let Some(mut process) = self.process.take() {
            let mode = if shut_down {
                StopMode::Graceful
            } else {
                StopMode::Force
            };
            if let Err(e) = process.stop(mode).await {
                warn!("Failed to stop {}: {}", process.command(), e);
                process.kill_sync();
            }
        }

        info!("Session closed");
        closed
    }
}

fn log_server_notification(notification: JsonRpcNotification) {
    match notification.method.as_str() {
        "window/logMessage" | "window/showMessage" => {
            let message = notification
                .params
                .as_ref()
                .and_then(|params| params.get("message"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            info!(target: "lsp_exerciser::server", "{}", message);
        }
        method => debug!("Server notification: {}", method),
    }
}

/// Percent-encoded `file://` form of an absolute root
fn root_uri(root_path: &str) -> Option<String> {
    Url::from_file_path(root_path).ok().map(String::from)
}

fn client_capabilities() -> ClientCapabilities {
    ClientCapabilities {
        text_document: Some(TextDocumentClientCapabilities {
            hover: Some(HoverClientCapabilities {
                dynamic_registration: Some(false),
                content_format: Some(vec![MarkupKind::PlainText, MarkupKind::Markdown]),
            }),
            definition: Some(GotoCapability {
                dynamic_registration: Some(false),
                link_support: Some(false),
            }),
            references: Some(ReferenceClientCapabilities {
                dynamic_registration: Some(false),
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Whether the initialize response announced support for `kind`
fn advertises(capabilities: &ServerCapabilities, kind: QueryKind) -> bool {
    match kind {
        QueryKind::Hover => !matches!(
            capabilities.hover_provider,
            None | Some(HoverProviderCapability::Simple(false))
        ),
        QueryKind::Definition => !matches!(
            capabilities.definition_provider,
            None | Some(OneOf::Left(false))
        ),
        QueryKind::References => !matches!(
            capabilities.references_provider,
            None | Some(OneOf::Left(false))
        ),
    }
}

/// Flatten every definition result shape into an ordered list of locations
fn definition_locations(response: Option<GotoDefinitionResponse>) -> Vec<Location> {
    match response {
        None => Vec::new(),
        Some(GotoDefinitionResponse::Scalar(location)) => vec![location],
        Some(GotoDefinitionResponse::Array(locations)) => locations,
        Some(GotoDefinitionResponse::Link(links)) => links
            .into_iter()
            .map(|link| Location::new(link.target_uri, link.target_selection_range))
            .collect(),
    }
}
