//! JSON-RPC 2.0 protocol layer
//!
//! Request/response correlation over a framed transport. One background task
//! owns the transport; callers hand it outbound messages through a channel and
//! wait on a per-request oneshot for the matching response.

use crate::io::transport::Transport;
use crate::log_lsp_message;
use crate::lsp::framing::LspFraming;
use crate::lsp::jsonrpc_utils::{
    JSONRPC_VERSION, method_not_found_response, null_success_response, success_response,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{Level, debug, error, trace, warn};

// ============================================================================
// JSON-RPC Types
// ============================================================================

/// JSON-RPC 2.0 request message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: Value,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// JSON-RPC 2.0 response message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    /// Present if successful. A `null` result deserializes to `None`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcErrorObject>,
}

/// JSON-RPC 2.0 notification message (no response expected)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// JSON-RPC error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcErrorObject {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Any message the server can send us
#[derive(Debug)]
enum InboundMessage {
    Response(JsonRpcResponse),
    Request(JsonRpcRequest),
    Notification(JsonRpcNotification),
}

impl InboundMessage {
    fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(raw)?;
        let has_method = value.get("method").is_some();
        let has_id = value.get("id").is_some_and(|id| !id.is_null());

        Ok(match (has_method, has_id) {
            (true, true) => InboundMessage::Request(serde_json::from_value(value)?),
            (true, false) => InboundMessage::Notification(serde_json::from_value(value)?),
            (false, _) => InboundMessage::Response(serde_json::from_value(value)?),
        })
    }
}

// ============================================================================
// JSON-RPC Errors
// ============================================================================

/// JSON-RPC error type
#[derive(Debug, thiserror::Error)]
pub enum JsonRpcError {
    #[error("JSON-RPC server error ({code}): {message}")]
    Server {
        code: i32,
        message: String,
        data: Option<Value>,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Connection closed before a response arrived")]
    ConnectionClosed,

    #[error("Serialization error: {0}")]
    Serialization(serde_json::Error),

    #[error("Deserialization error: {0}")]
    Deserialization(serde_json::Error),
}

// ============================================================================
// JSON-RPC Client
// ============================================================================

type NotificationHandler = Arc<dyn Fn(JsonRpcNotification) + Send + Sync>;
type PendingRequests = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

/// State shared between the client handle and its I/O task
struct Dispatch {
    pending_requests: PendingRequests,
    notification_handler: Arc<Mutex<Option<NotificationHandler>>>,
}

/// JSON-RPC client with request/response correlation
pub struct JsonRpcClient<T: Transport> {
    /// Channel for outbound messages (requests and notifications)
    outbound_sender: mpsc::UnboundedSender<String>,

    /// Tells the I/O task to stop and close the transport
    close_sender: Option<oneshot::Sender<()>>,

    /// The I/O task, awaited on close
    io_task: Option<JoinHandle<()>>,

    request_id: AtomicU64,

    pending_requests: PendingRequests,

    notification_handler: Arc<Mutex<Option<NotificationHandler>>>,

    _phantom: PhantomData<fn() -> T>,
}

impl<T: Transport + 'static> JsonRpcClient<T> {
    /// Take ownership of a transport and start the I/O task
    pub fn new(transport: T) -> Self {
        let (outbound_sender, outbound_receiver) = mpsc::unbounded_channel::<String>();
        let (close_sender, close_receiver) = oneshot::channel();
        let pending_requests: PendingRequests = Arc::new(Mutex::new(HashMap::new()));
        let notification_handler = Arc::new(Mutex::new(None::<NotificationHandler>));

        let dispatch = Dispatch {
            pending_requests: Arc::clone(&pending_requests),
            notification_handler: Arc::clone(&notification_handler),
        };

        let io_task = tokio::spawn(Self::io_loop(
            LspFraming::new(transport),
            outbound_receiver,
            close_receiver,
            dispatch,
        ));

        Self {
            outbound_sender,
            close_sender: Some(close_sender),
            io_task: Some(io_task),
            request_id: AtomicU64::new(1),
            pending_requests,
            notification_handler,
            _phantom: PhantomData,
        }
    }

    /// Set notification handler
    pub async fn on_notification<F>(&self, handler: F)
    where
        F: Fn(JsonRpcNotification) + Send + Sync + 'static,
    {
        *self.notification_handler.lock().await = Some(Arc::new(handler));
    }

    async fn io_loop(
        mut transport: LspFraming<T>,
        mut outbound: mpsc::UnboundedReceiver<String>,
        mut close: oneshot::Receiver<()>,
        dispatch: Dispatch,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = &mut close => {
                    trace!("JsonRpcClient: close requested");
                    // Flush whatever was queued before close (e.g. the exit notification).
                    while transport.is_connected()
                        && let Ok(message) = outbound.try_recv()
                    {
                        if let Err(e) = transport.send(&message).await {
                            debug!("JsonRpcClient: dropping queued message on close: {}", e);
                            break;
                        }
                    }
                    break;
                }
                Some(message) = outbound.recv() => {
                    if let Err(e) = transport.send(&message).await {
                        error!("Failed to send message: {}", e);
                        break;
                    }
                }
                result = transport.receive() => {
                    match result {
                        Ok(message) => {
                            let reply = Self::process_inbound_message(&message, &dispatch).await;
                            if let Some(reply) = reply
                                && let Err(e) = transport.send(&reply).await
                            {
                                error!("Failed to reply to server request: {}", e);
                                break;
                            }
                        }
                        Err(e) => {
                            debug!("JsonRpcClient: connection ended: {}", e);
                            break;
                        }
                    }
                }
            }
        }

        if let Err(e) = transport.close().await {
            debug!("JsonRpcClient: error closing transport: {}", e);
        }

        // Dropping the senders fails every call still waiting.
        let mut pending = dispatch.pending_requests.lock().await;
        if !pending.is_empty() {
            warn!(
                "JsonRpcClient: failing {} pending request(s), connection closed",
                pending.len()
            );
        }
        pending.clear();
        trace!("JsonRpcClient: I/O task finished");
    }

    /// Route one inbound message; returns a serialized reply for server requests
    async fn process_inbound_message(message: &str, dispatch: &Dispatch) -> Option<String> {
        trace!("JsonRpcClient: received message: {}", message);

        let inbound = match InboundMessage::parse(message) {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!("JsonRpcClient: unparseable message ({}): {}", e, message);
                return None;
            }
        };

        match inbound {
            InboundMessage::Response(response) => {
                let Some(id) = response.id.as_u64() else {
                    debug!("Received response with non-numeric id: {}", response.id);
                    return None;
                };
                match dispatch.pending_requests.lock().await.remove(&id) {
                    Some(sender) => {
                        if sender.send(response).is_err() {
                            debug!("Response receiver dropped for request {}", id);
                        }
                    }
                    None => debug!("Received response for unknown request {}", id),
                }
                None
            }
            InboundMessage::Notification(notification) => {
                debug!("Received notification: {}", notification.method);
                let handler = dispatch.notification_handler.lock().await.clone();
                if let Some(handler) = handler {
                    handler(notification);
                }
                None
            }
            InboundMessage::Request(request) => {
                debug!("Received server request: {}", request.method);
                let response = default_request_reply(request);
                match serde_json::to_string(&response) {
                    Ok(reply) => Some(reply),
                    Err(e) => {
                        error!("Failed to serialize reply to server request: {}", e);
                        None
                    }
                }
            }
        }
    }

    /// Send a request and wait, without timeout, for the matching response
    pub async fn request<P, R>(&self, method: &str, params: Option<P>) -> Result<R, JsonRpcError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Value::from(id),
            method: method.to_string(),
            params: params
                .map(|p| serde_json::to_value(p).map_err(JsonRpcError::Serialization))
                .transpose()?,
        };
        let request_json = serde_json::to_string(&request).map_err(JsonRpcError::Serialization)?;
        log_lsp_message!(Level::DEBUG, "outgoing", method, &request.params);

        let (response_sender, response_receiver) = oneshot::channel();
        self.pending_requests
            .lock()
            .await
            .insert(id, response_sender);

        if self.outbound_sender.send(request_json).is_err() {
            self.pending_requests.lock().await.remove(&id);
            return Err(JsonRpcError::ConnectionClosed);
        }

        let response = response_receiver
            .await
            .map_err(|_| JsonRpcError::ConnectionClosed)?;
        log_lsp_message!(Level::DEBUG, "incoming", method, &response);

        if let Some(error) = response.error {
            return Err(JsonRpcError::Server {
                code: error.code,
                message: error.message,
                data: error.data,
            });
        }

        serde_json::from_value(response.result.unwrap_or(Value::Null))
            .map_err(JsonRpcError::Deserialization)
    }

    /// Send a JSON-RPC notification
    pub fn notify<P>(&self, method: &str, params: Option<P>) -> Result<(), JsonRpcError>
    where
        P: Serialize,
    {
        let notification = JsonRpcNotification {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.to_string(),
            params: params
                .map(|p| serde_json::to_value(p).map_err(JsonRpcError::Serialization))
                .transpose()?,
        };

        let notification_json =
            serde_json::to_string(&notification).map_err(JsonRpcError::Serialization)?;
        log_lsp_message!(Level::DEBUG, "outgoing", method, &notification.params);

        self.outbound_sender
            .send(notification_json)
            .map_err(|_| JsonRpcError::Transport("Outbound channel closed".to_string()))
    }

    /// False once the I/O task has stopped
    pub fn is_connected(&self) -> bool {
        self.io_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Stop the I/O task and close the transport; safe to call repeatedly
    pub async fn close(&mut self) -> Result<(), JsonRpcError> {
        if let Some(close_sender) = self.close_sender.take() {
            // Err means the task already ended on its own.
            let _ = close_sender.send(());
        }

        if let Some(task) = self.io_task.take() {
            task.await
                .map_err(|e| JsonRpcError::Transport(format!("I/O task failed: {e}")))?;
        }

        Ok(())
    }
}

/// Reply to a server-to-client request
///
/// Servers commonly block until these requests are answered, so the
/// harmless ones get a null result; anything else is method-not-found.
fn default_request_reply(request: JsonRpcRequest) -> JsonRpcResponse {
    match request.method.as_str() {
        "window/workDoneProgress/create"
        | "client/registerCapability"
        | "client/unregisterCapability"
        | "workspace/workspaceFolders" => null_success_response(request.id),
        "workspace/configuration" => {
            let items = request
                .params
                .as_ref()
                .and_then(|params| params.get("items"))
                .and_then(Value::as_array)
                .map_or(0, Vec::len);
            success_response(request.id, Value::Array(vec![Value::Null; items]))
        }
        method => method_not_found_response(request.id, method),
    }
}
