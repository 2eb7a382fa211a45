//! # Prelude
//!
//! Convenient re-exports of the types most sessions need.
//!
//! ```rust
//! use turul_json_rpc_stream::prelude::*;
//! ```

// Sessions
pub use crate::config::SessionConfig;
pub use crate::session::{Session, SessionBuilder};

// Calling
pub use crate::cancellation::{CallContext, CancellationHandle};
pub use crate::client::Client;

// Serving
pub use crate::handler::{Handler, HandlerBuilder, MethodHandler, RequestContext};

// Wire types and errors
pub use crate::error::{
    ClientError, HandlerError, JsonRpcErrorCode, JsonRpcErrorObject, SessionError,
};
pub use crate::message::{Request, Response};
pub use crate::validation::{NoopValidator, ValidationError, Validator};

// Standard error codes
pub use crate::error_codes::*;
