//! # Bidirectional JSON-RPC 2.0 over byte streams
//!
//! Runs JSON-RPC 2.0 over any pair of async byte streams carrying one JSON
//! document per line: pipes to a subprocess, a TCP connection, or in-memory
//! pipes in tests. A session can issue calls, answer them, or do both over
//! the same connection.
//!
//! ## Features
//! - Newline-delimited framing with reassembly of split reads
//! - Out-of-order response correlation for concurrent calls
//! - Method dispatch with notification semantics and masked internal errors
//! - Duplex sessions that route requests and responses over one stream
//! - Per-call deadlines and cooperative cancellation
//! - Optional admission control for in-flight dispatch
//!
//! ```rust,no_run
//! use turul_json_rpc_stream::prelude::*;
//!
//! # async fn run() -> Result<(), SessionError> {
//! let handler = Handler::builder()
//!     .method("ping", |_cx| async { Ok("pong") })
//!     .build();
//!
//! let session = SessionBuilder::new(tokio::io::stdin(), tokio::io::stdout())
//!     .with_server(handler)
//!     .build()?;
//! session.run().await
//! # }
//! ```

pub mod cancellation;
pub mod client;
pub mod config;
mod dispatch;
pub mod error;
pub mod framing;
pub mod handler;
pub mod message;
pub mod pool;
pub mod prelude;
pub mod server;
pub mod session;
pub mod validation;

// Re-export main types
pub use cancellation::{CallContext, CancellationHandle};
pub use client::{Client, ClientCore};
pub use config::SessionConfig;
pub use error::{
    ClientError, HandlerError, JsonRpcErrorCode, JsonRpcErrorObject, ProtocolError, SessionError,
};
pub use framing::{FrameReader, FrameWriter};
pub use handler::{Handler, HandlerBuilder, MethodHandler, RequestContext};
pub use message::{Incoming, Message, Request, Response};
pub use pool::BufferPool;
pub use server::ServerCore;
pub use session::{Session, SessionBuilder};
pub use validation::{NoopValidator, ValidationError, Validator};

/// JSON-RPC 2.0 version constant
pub const JSONRPC_VERSION: &str = "2.0";

/// Standard JSON-RPC 2.0 error codes
pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
}
