//! Error classification
//!
//! Handlers, auth validators, rate limiters and ledger callbacks fail with
//! `anyhow::Error`. Before anything reaches the client the error is
//! classified into a [`Failure`]:
//!
//! | Error | Envelope | Status |
//! |-------|----------|--------|
//! | [`RpcError::InternalServerError`] | built-in | 500 |
//! | any other [`RpcError`] | built-in | 400 |
//! | a registered [`DomainError`] | `builtIn: false`, registered name | 400 |
//! | anything else | generic `InternalServerError` | 500 |
//!
//! Unregistered errors are logged server side; their message never reaches
//! the client.
//!
//! # Example
//!
//! ```
//! use arpc_server::exceptions::{DomainError, ExceptionRegistry};
//! use serde_json::{json, Value};
//!
//! #[derive(Debug, thiserror::Error)]
//! #[error("only {left} left")]
//! struct OutOfStock {
//!     left: u32,
//! }
//!
//! impl DomainError for OutOfStock {
//!     fn body(&self) -> Option<Value> {
//!         Some(json!({ "left": self.left }))
//!     }
//! }
//!
//! let registry = ExceptionRegistry::new().register::<OutOfStock>("OutOfStock");
//!
//! let failure = registry.classify(&anyhow::Error::new(OutOfStock { left: 2 }));
//! assert_eq!(failure.status.as_u16(), 400);
//! assert!(!failure.envelope.built_in);
//! assert_eq!(failure.envelope.name, "OutOfStock");
//! assert_eq!(failure.envelope.message, "only 2 left");
//! assert_eq!(failure.envelope.body, Some(json!({ "left": 2 })));
//! ```

use std::fmt;
use std::sync::Arc;

use arpc_common::{codes, ErrorEnvelope, HttpTransport, HyperResponse, RpcError};
use hyper::StatusCode;
use serde_json::Value;

use crate::routes::HandlerError;
use crate::self_client::SelfCallError;

/// An application error that is reported to clients by name.
pub trait DomainError: std::error::Error + Send + Sync + 'static {
    /// Structured detail sent as the envelope `body`.
    fn body(&self) -> Option<Value> {
        None
    }
}

/// A classified error: the envelope sent to the client and its status.
#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    pub envelope: ErrorEnvelope,
    pub status: StatusCode,
}

impl Failure {
    pub fn into_response(self) -> HyperResponse {
        HttpTransport::envelopes(self.status, &[self.envelope])
    }

    /// Builds the response for one or more failures of the same request.
    ///
    /// A single failure is sent as a bare envelope, several as an array. The
    /// status is the highest member status.
    pub fn response(failures: Vec<Failure>) -> HyperResponse {
        let status = failures
            .iter()
            .map(|f| f.status)
            .max()
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let envelopes: Vec<ErrorEnvelope> = failures.into_iter().map(|f| f.envelope).collect();
        if envelopes.is_empty() {
            return HttpTransport::error(&RpcError::internal());
        }
        HttpTransport::envelopes(status, &envelopes)
    }
}

impl From<RpcError> for Failure {
    fn from(err: RpcError) -> Self {
        Self {
            envelope: err.to_envelope(),
            status: err.status(),
        }
    }
}

impl From<&RpcError> for Failure {
    fn from(err: &RpcError) -> Self {
        Self {
            envelope: err.to_envelope(),
            status: err.status(),
        }
    }
}

type Matcher = dyn Fn(&anyhow::Error) -> Option<ErrorEnvelope> + Send + Sync;

struct Registered {
    name: String,
    matcher: Arc<Matcher>,
}

/// The application errors a server reports by name.
#[derive(Clone, Default)]
pub struct ExceptionRegistry {
    entries: Vec<Arc<Registered>>,
}

impl ExceptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `E` under `name`.
    ///
    /// Errors are matched anywhere in the `anyhow` chain, so context added
    /// with `.context(..)` does not hide them.
    pub fn register<E: DomainError>(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        let envelope_name = name.clone();
        let matcher = move |err: &anyhow::Error| {
            err.chain()
                .find_map(|cause| cause.downcast_ref::<E>())
                .map(|e| ErrorEnvelope::custom(envelope_name.clone(), e.to_string(), e.body()))
        };
        self.entries.push(Arc::new(Registered {
            name,
            matcher: Arc::new(matcher),
        }));
        self
    }

    /// Returns the registered names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Classifies an error from user code.
    pub fn classify(&self, err: &anyhow::Error) -> Failure {
        // a route that failed under a nested self-call keeps its own error
        if let Some(SelfCallError::Failed(inner)) = err.downcast_ref::<SelfCallError>() {
            return self.classify(inner);
        }

        if let Some(rpc) = err.chain().find_map(|cause| cause.downcast_ref::<RpcError>()) {
            return Failure::from(rpc);
        }

        for entry in &self.entries {
            if let Some(envelope) = (entry.matcher)(err) {
                return Failure {
                    envelope,
                    status: StatusCode::BAD_REQUEST,
                };
            }
        }

        tracing::error!("Unhandled error: {:#}", err);
        Failure::from(RpcError::internal())
    }

    /// Classifies the result of a [`Handler::call`](crate::routes::Handler::call).
    ///
    /// Input that fails validation is `INVALID_ARG` with the issues as body.
    pub fn classify_handler(&self, err: HandlerError) -> Failure {
        match err {
            HandlerError::InvalidInput(schema) => Failure::from(
                RpcError::bad_request(codes::INVALID_ARG, format!("Invalid argument: {}", schema))
                    .with_body(schema.to_body()),
            ),
            HandlerError::Failed(err) => self.classify(&err),
        }
    }
}

impl fmt::Debug for ExceptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
