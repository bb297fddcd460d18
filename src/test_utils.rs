//! Test utilities and global setup
//!
//! Test logging plus an in-process language server that speaks framed
//! JSON-RPC, so sessions and drivers can be exercised without a real server.

use crate::io::{StreamTransport, Transport};
use crate::lsp::framing::LspFraming;
use serde_json::{Value, json};
use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Test logging utilities
#[cfg(feature = "test-logging")]
pub mod logging {
    use std::sync::Once;
    use tracing_subscriber::{EnvFilter, fmt};

    static INIT: Once = Once::new();

    /// Initialize test logging globally - safe to call multiple times
    ///
    /// Respects `RUST_LOG`; defaults to debug for this crate.
    ///
    /// ```bash
    /// RUST_LOG=lsp_exerciser::lsp=trace cargo test --features test-logging
    /// ```
    pub fn init() {
        INIT.call_once(|| {
            let env_filter = EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("debug,tokio=info"));

            fmt()
                .with_env_filter(env_filter)
                .with_test_writer()
                .with_target(true)
                .with_thread_ids(true)
                .compact()
                .try_init()
                .ok();
        });
    }

    #[ctor::ctor]
    fn init_test_logging() {
        init();
    }
}

/// Where the checked-out test repositories live for integration tests
#[cfg(feature = "langserver-integration-tests")]
pub fn test_repos_dir() -> std::path::PathBuf {
    match std::env::var("LSP_EXERCISER_TEST_REPOS") {
        Ok(dir) => std::path::PathBuf::from(dir),
        Err(_) => std::env::current_dir().unwrap().join("test_repos"),
    }
}

/// What the mock server does with one incoming request
#[derive(Debug, Clone)]
pub enum MockReply {
    Result(Value),
    Error {
        code: i32,
        message: String,
    },
    /// Leave the request pending
    NoReply,
    /// Drop the connection without answering
    Hangup,
    /// Emit a notification, then answer
    NotifyThenResult {
        method: String,
        params: Value,
        result: Value,
    },
    /// Issue a server-to-client request, then answer
    RequestThenResult {
        method: String,
        params: Value,
        result: Value,
    },
}

/// Scripted language server running on a background task
///
/// Records every message it receives (requests, notifications and replies to
/// its own requests) in arrival order.
pub struct MockLanguageServer {
    task: JoinHandle<Vec<Value>>,
}

impl MockLanguageServer {
    /// Serve over an in-memory pipe; returns the client end as a transport
    pub fn start<F>(handler: F) -> (StreamTransport, Self)
    where
        F: Fn(&str, &Value) -> MockReply + Send + 'static,
    {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(client);
        let (server_read, server_write) = tokio::io::split(server);

        let task = tokio::spawn(Self::serve(server_write, server_read, handler));
        (
            StreamTransport::new("duplex", client_write, client_read),
            Self { task },
        )
    }

    /// Accept a single TCP connection on an ephemeral local port
    pub async fn listen<F>(handler: F) -> (String, Self)
    where
        F: Fn(&str, &Value) -> MockReply + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let task = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, write_half) = stream.into_split();
            Self::serve(write_half, read_half, handler).await
        });
        (addr, Self { task })
    }

    /// Wait for the client to hang up and return everything received
    pub async fn finish(self) -> Vec<Value> {
        self.task.await.unwrap()
    }

    async fn serve<W, R, F>(writer: W, reader: R, handler: F) -> Vec<Value>
    where
        W: AsyncWrite + Unpin + Send + 'static,
        R: AsyncRead + Unpin + Send + 'static,
        F: Fn(&str, &Value) -> MockReply + Send + 'static,
    {
        let mut framing = LspFraming::new(StreamTransport::new("mock-server", writer, reader));
        let mut received = Vec::new();
        let mut next_server_id = 1;

        while let Ok(raw) = framing.receive().await {
            let message: Value = serde_json::from_str(&raw).unwrap();
            received.push(message.clone());

            let (Some(method), Some(id)) = (
                message.get("method").and_then(Value::as_str),
                message.get("id"),
            ) else {
                continue;
            };
            let params = message.get("params").cloned().unwrap_or(Value::Null);

            let outgoing = match handler(method, &params) {
                MockReply::Result(result) => vec![response(id, result)],
                MockReply::Error { code, message } => vec![json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {"code": code, "message": message}
                })],
                MockReply::NoReply => Vec::new(),
                MockReply::Hangup => break,
                MockReply::NotifyThenResult {
                    method,
                    params,
                    result,
                } => vec![
                    json!({"jsonrpc": "2.0", "method": method, "params": params}),
                    response(id, result),
                ],
                MockReply::RequestThenResult {
                    method,
                    params,
                    result,
                } => {
                    let request_id = format!("mock-{next_server_id}");
                    next_server_id += 1;
                    vec![
                        json!({
                            "jsonrpc": "2.0",
                            "id": request_id,
                            "method": method,
                            "params": params
                        }),
                        response(id, result),
                    ]
                }
            };

            for message in outgoing {
                if framing.send(&message.to_string()).await.is_err() {
                    break;
                }
            }
        }

        let _ = framing.close().await;
        received
    }
}

fn response(id: &Value, result: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "result": result})
}

/// A zero-width location in `file:///ws/a.py`
pub fn sample_location(line: u32, character: u32) -> Value {
    json!({
        "uri": "file:///ws/a.py",
        "range": {
            "start": {"line": line, "character": character},
            "end": {"line": line, "character": character}
        }
    })
}
