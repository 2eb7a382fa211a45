//! Pluggable structural validation of parameter and result values.
//!
//! Validation runs only on composite values (JSON objects and arrays), the
//! same values a struct validator would see. Scalars always pass.

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

/// A rejected value, with a human-readable reason
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ValidationError {
    pub message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Structural validation capability shared by the client and server halves
/// of a session
pub trait Validator: Send + Sync {
    fn validate(&self, value: &Value) -> Result<(), ValidationError>;
}

impl<F> Validator for F
where
    F: Fn(&Value) -> Result<(), ValidationError> + Send + Sync,
{
    fn validate(&self, value: &Value) -> Result<(), ValidationError> {
        self(value)
    }
}

/// Accepts every value
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopValidator;

impl Validator for NoopValidator {
    fn validate(&self, _value: &Value) -> Result<(), ValidationError> {
        Ok(())
    }
}

pub type SharedValidator = Arc<dyn Validator>;

pub(crate) fn noop() -> SharedValidator {
    Arc::new(NoopValidator)
}

/// Run `validator` if `value` is composite
pub(crate) fn validate_composite(
    validator: &dyn Validator,
    value: &Value,
) -> Result<(), ValidationError> {
    match value {
        Value::Object(_) | Value::Array(_) => validator.validate(value),
        _ => Ok(()),
    }
}
