//! arpc Error Envelope
//!
//! This module defines the structured error payload every failed call
//! returns to the client.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// RPC method result (dynamic value)
///
/// Arguments and results travel as MessagePack and are handled as
/// `serde_json::Value` on both sides of the wire.
pub type RpcResult = Value;

/// The wire shape of a failed call.
///
/// # Fields
///
/// - `built_in`: `true` for errors raised by the runtime itself, `false` for
///   application errors registered with the server
/// - `name`: error class name (`BadRequest`, `Unauthorized`, `Ratelimited`,
///   `InternalServerError`, or a registered application name)
/// - `code`: machine readable code for built-in errors
/// - `message`: human readable description
/// - `body`: optional structured detail (validation issues, rate limit data,
///   application payload)
///
/// On the wire the fields are camelCase (`builtIn`), and `code`/`body` are
/// omitted when absent.
///
/// # Example
///
/// ```
/// use arpc_common::protocol::ErrorEnvelope;
///
/// let envelope = ErrorEnvelope::custom("OutOfStock", "no more widgets", None);
/// assert!(!envelope.built_in);
/// assert!(envelope.code.is_none());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    pub built_in: bool,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl ErrorEnvelope {
    /// Creates an envelope for a runtime error.
    pub fn built_in(
        name: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
        body: Option<Value>,
    ) -> Self {
        Self {
            built_in: true,
            name: name.into(),
            code: Some(code.into()),
            message: message.into(),
            body,
        }
    }

    /// Creates an envelope for a registered application error.
    pub fn custom(name: impl Into<String>, message: impl Into<String>, body: Option<Value>) -> Self {
        Self {
            built_in: false,
            name: name.into(),
            code: None,
            message: message.into(),
            body,
        }
    }
}
