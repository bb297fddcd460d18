//! LSP protocol layer
//!
//! Framing, JSON-RPC correlation and the request parameter types used by the
//! session. Everything here is transport-agnostic.

pub mod framing;
pub mod jsonrpc_utils;
pub mod protocol;
pub mod types;

pub use protocol::{JsonRpcClient, JsonRpcError};
