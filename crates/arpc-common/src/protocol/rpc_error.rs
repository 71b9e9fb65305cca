//! Built-in RPC errors
//!
//! These are the errors the runtime itself raises, and the errors user code
//! may return (through `anyhow`) to produce a specific built-in envelope,
//! such as a `Ratelimited` error from a rate limiter.
//!
//! # Status Codes
//!
//! - `InternalServerError`: `500`
//! - everything else, including `Unauthorized` and `Ratelimited`: `400`

use hyper::StatusCode;
use serde_json::Value;
use thiserror::Error;

use super::codes;
use super::envelope::ErrorEnvelope;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RpcError {
    #[error("{message}")]
    BadRequest {
        code: String,
        message: String,
        body: Option<Value>,
    },

    #[error("{message}")]
    Unauthorized { code: String, message: String },

    #[error("{message}")]
    Ratelimited { message: String, body: Option<Value> },

    #[error("Internal Server Error")]
    InternalServerError,
}

impl RpcError {
    pub fn bad_request(code: impl Into<String>, message: impl Into<String>) -> Self {
        RpcError::BadRequest {
            code: code.into(),
            message: message.into(),
            body: None,
        }
    }

    pub fn unauthorized(code: impl Into<String>, message: impl Into<String>) -> Self {
        RpcError::Unauthorized {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Creates the error a rate limiter returns to reject a call.
    ///
    /// # Example
    ///
    /// ```
    /// use arpc_common::RpcError;
    /// use serde_json::json;
    ///
    /// let err = RpcError::ratelimited("msg", Some(json!({"k": 1})));
    /// let envelope = err.to_envelope();
    /// assert_eq!(envelope.name, "Ratelimited");
    /// assert_eq!(envelope.body, Some(json!({"k": 1})));
    /// ```
    pub fn ratelimited(message: impl Into<String>, body: Option<Value>) -> Self {
        RpcError::Ratelimited {
            message: message.into(),
            body,
        }
    }

    pub fn internal() -> Self {
        RpcError::InternalServerError
    }

    /// Attaches structured detail to a `BadRequest` or `Ratelimited` error.
    /// Other variants are returned unchanged.
    pub fn with_body(self, body: Value) -> Self {
        match self {
            RpcError::BadRequest { code, message, .. } => RpcError::BadRequest {
                code,
                message,
                body: Some(body),
            },
            RpcError::Ratelimited { message, .. } => RpcError::Ratelimited {
                message,
                body: Some(body),
            },
            other => other,
        }
    }

    /// Returns the error class name used on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            RpcError::BadRequest { .. } => "BadRequest",
            RpcError::Unauthorized { .. } => "Unauthorized",
            RpcError::Ratelimited { .. } => "Ratelimited",
            RpcError::InternalServerError => "InternalServerError",
        }
    }

    pub fn code(&self) -> &str {
        match self {
            RpcError::BadRequest { code, .. } | RpcError::Unauthorized { code, .. } => code,
            RpcError::Ratelimited { .. } => codes::RATELIMITED,
            RpcError::InternalServerError => codes::INTERNAL_ERROR,
        }
    }

    /// Returns the HTTP status for this error.
    ///
    /// Authentication failures are deliberately `400`, not `401`/`403`.
    pub fn status(&self) -> StatusCode {
        match self {
            RpcError::InternalServerError => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    /// Converts the error into its wire envelope.
    pub fn to_envelope(&self) -> ErrorEnvelope {
        let body = match self {
            RpcError::BadRequest { body, .. } | RpcError::Ratelimited { body, .. } => body.clone(),
            _ => None,
        };
        ErrorEnvelope::built_in(self.name(), self.code(), self.to_string(), body)
    }
}
