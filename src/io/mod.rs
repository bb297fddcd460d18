//! I/O layer - Generic abstractions for process management and transport
//!
//! - **Transport**: duplex message exchange over child stdio or a TCP socket
//! - **Process**: language server process lifecycle with stdio integration
//!
//! Nothing here knows about JSON-RPC or LSP.

pub mod process;
pub mod transport;

pub use process::{ChildProcessManager, ProcessError, ProcessManager, StderrMonitor, StopMode};
pub use transport::{StreamTransport, Transport, TransportError};
