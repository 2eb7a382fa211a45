//! Method handler table and request evaluation.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error};

use crate::JSONRPC_VERSION;
use crate::error::{HandlerError, JsonRpcErrorObject};
use crate::message::{Request, Response};
use crate::validation::{SharedValidator, noop, validate_composite};

/// Request-scoped accessor handed to a method handler
pub struct RequestContext {
    method: String,
    id: Option<Value>,
    params: Option<Value>,
    validator: SharedValidator,
}

impl RequestContext {
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Raw request id; `None` for notifications
    pub fn id(&self) -> Option<&Value> {
        self.id.as_ref()
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// Raw parameter payload
    pub fn raw_params(&self) -> Option<&Value> {
        self.params.as_ref()
    }

    /// Decode and validate the parameters.
    ///
    /// Absent parameters decode from `null`. Failures map to Invalid Params
    /// with the underlying message.
    pub fn params<T: DeserializeOwned>(&self) -> Result<T, HandlerError> {
        let value = self.params.clone().unwrap_or(Value::Null);
        let params = T::deserialize(&value)
            .map_err(|err| HandlerError::InvalidParams(err.to_string()))?;
        validate_composite(self.validator.as_ref(), &value)
            .map_err(|err| HandlerError::InvalidParams(err.to_string()))?;
        Ok(params)
    }

    /// Encode and validate a result before returning it.
    ///
    /// A result that fails validation is an internal error of this side.
    pub fn result<T: Serialize + ?Sized>(&self, result: &T) -> Result<Value, HandlerError> {
        let value = serde_json::to_value(result).map_err(HandlerError::Encode)?;
        validate_composite(self.validator.as_ref(), &value).map_err(|err| {
            HandlerError::internal(format!("invalid response from server: {err}"))
        })?;
        Ok(value)
    }
}

/// A method implementation
#[async_trait]
pub trait MethodHandler: Send + Sync {
    async fn handle(&self, cx: RequestContext) -> Result<Value, HandlerError>;
}

/// Adapts an async closure returning any serializable result
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut, R> MethodHandler for FnHandler<F>
where
    F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, HandlerError>> + Send + 'static,
    R: Serialize + Send + 'static,
{
    async fn handle(&self, cx: RequestContext) -> Result<Value, HandlerError> {
        let result = (self.0)(cx).await?;
        serde_json::to_value(result).map_err(HandlerError::Encode)
    }
}

/// Builder for a [`Handler`]
#[derive(Default)]
pub struct HandlerBuilder {
    methods: HashMap<String, Arc<dyn MethodHandler>>,
}

impl HandlerBuilder {
    /// Register an async closure for `name`, replacing any earlier one
    pub fn method<F, Fut, R>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, HandlerError>> + Send + 'static,
        R: Serialize + Send + 'static,
    {
        self.handler(name, FnHandler(f))
    }

    /// Register a [`MethodHandler`] for `name`
    pub fn handler<H>(mut self, name: impl Into<String>, handler: H) -> Self
    where
        H: MethodHandler + 'static,
    {
        self.methods.insert(name.into(), Arc::new(handler));
        self
    }

    pub fn build(self) -> Handler {
        Handler {
            methods: Arc::new(self.methods),
        }
    }
}

/// Immutable table from method name to handler.
///
/// Built once, then shared by every dispatch task without locking.
#[derive(Clone)]
pub struct Handler {
    methods: Arc<HashMap<String, Arc<dyn MethodHandler>>>,
}

impl Handler {
    pub fn builder() -> HandlerBuilder {
        HandlerBuilder::default()
    }

    /// Registered method names, sorted
    pub fn methods(&self) -> Vec<String> {
        let mut names: Vec<String> = self.methods.keys().cloned().collect();
        names.sort();
        names
    }

    /// Evaluate a request without structural validation.
    ///
    /// Returns `None` for notifications, whatever the outcome.
    pub async fn handle(&self, request: Request) -> Option<Response> {
        self.handle_with(request, &noop()).await
    }

    pub(crate) async fn handle_with(
        &self,
        request: Request,
        validator: &SharedValidator,
    ) -> Option<Response> {
        let Request {
            jsonrpc,
            method,
            params,
            id,
        } = request;

        if jsonrpc != JSONRPC_VERSION || method.is_empty() {
            debug!(version = %jsonrpc, method = %method, "Invalid request envelope");
            return id.map(|id| Response::error(id, JsonRpcErrorObject::invalid_request()));
        }

        let Some(handler) = self.methods.get(&method) else {
            debug!(method = %method, "Method not found");
            return id.map(|id| Response::error(id, JsonRpcErrorObject::method_not_found()));
        };

        let cx = RequestContext {
            method: method.clone(),
            id: id.clone(),
            params,
            validator: Arc::clone(validator),
        };

        let outcome = match AssertUnwindSafe(handler.handle(cx)).catch_unwind().await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(err)) => {
                match &err {
                    HandlerError::Encode(_) | HandlerError::Internal(_) => {
                        error!(method = %method, id = ?id, error = %err, "Handler failed");
                    }
                    HandlerError::InvalidParams(_) | HandlerError::Rpc(_) => {
                        debug!(method = %method, id = ?id, error = %err, "Handler returned error");
                    }
                }
                Err(err.to_error_object())
            }
            Err(_) => {
                error!(method = %method, id = ?id, "Handler panicked");
                Err(JsonRpcErrorObject::internal_error())
            }
        };

        let id = id?;
        Some(match outcome {
            Ok(result) => Response::success(id, result),
            Err(error) => Response::error(id, error),
        })
    }
}
