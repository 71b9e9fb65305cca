//! HTTP Transport Utilities
//!
//! This module turns call outcomes into hyper responses.
//!
//! # Architecture
//!
//! - Non-null results: `200`, `Content-Type: application/msgpack`
//! - Null results: `204` with an empty body
//! - Errors: the status of the error, with the encoded envelope (or an
//!   array of envelopes for atomic flushes with several failures)
//!
//! All responses carry `X-Is-Arpc: true`. Builders never fail: a value that
//! cannot be encoded turns into an internal error response.

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use hyper::{Response, StatusCode};
use serde_json::Value;

use super::codec::MsgpackCodec;
use crate::protocol::{ErrorEnvelope, RpcError};

/// Header marking a response as produced by an arpc server
pub const ARPC_MARKER_HEADER: &str = "x-is-arpc";

pub const MSGPACK_CONTENT_TYPE: &str = "application/msgpack";

/// Type alias for Hyper responses with full body
pub type HyperResponse = Response<Full<Bytes>>;

/// HTTP transport utility functions
pub struct HttpTransport;

impl HttpTransport {
    /// Create a response for a successful call
    ///
    /// # Arguments
    ///
    /// * `value` - The call result
    ///
    /// # Returns
    ///
    /// `204` for `null`, otherwise `200` with the encoded value
    pub fn success(value: &Value) -> HyperResponse {
        if value.is_null() {
            return Self::empty(StatusCode::NO_CONTENT);
        }
        match MsgpackCodec::encode(value) {
            Ok(bytes) => Self::encoded(StatusCode::OK, bytes),
            Err(e) => {
                tracing::error!("Failed to encode result: {}", e);
                Self::error(&RpcError::internal())
            }
        }
    }

    /// Create a response for a built-in error
    ///
    /// # Example
    ///
    /// ```
    /// use arpc_common::transport::HttpTransport;
    /// use arpc_common::RpcError;
    /// use hyper::StatusCode;
    ///
    /// let response = HttpTransport::error(&RpcError::internal());
    /// assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    /// ```
    pub fn error(err: &RpcError) -> HyperResponse {
        Self::envelopes(err.status(), &[err.to_envelope()])
    }

    /// Create an error response from one or more envelopes
    ///
    /// A single envelope is encoded on its own; several are encoded as an array.
    ///
    /// # Arguments
    ///
    /// * `status` - HTTP status of the response
    /// * `envelopes` - The collected error envelopes
    pub fn envelopes(status: StatusCode, envelopes: &[ErrorEnvelope]) -> HyperResponse {
        let encoded = match envelopes {
            [single] => MsgpackCodec::encode(single),
            many => MsgpackCodec::encode(many),
        };
        match encoded {
            Ok(bytes) => Self::encoded(status, bytes),
            Err(e) => {
                tracing::error!("Failed to encode error envelope: {}", e);
                Self::empty(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    /// Create a response from already-encoded MessagePack bytes
    pub fn encoded(status: StatusCode, bytes: Vec<u8>) -> HyperResponse {
        let mut response = Response::new(Full::new(Bytes::from(bytes)));
        *response.status_mut() = status;
        let headers = response.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(MSGPACK_CONTENT_TYPE));
        headers.insert(ARPC_MARKER_HEADER, HeaderValue::from_static("true"));
        response
    }

    fn empty(status: StatusCode) -> HyperResponse {
        let mut response = Response::new(Full::new(Bytes::new()));
        *response.status_mut() = status;
        response
            .headers_mut()
            .insert(ARPC_MARKER_HEADER, HeaderValue::from_static("true"));
        response
    }

    /// Returns true if the headers carry the arpc marker (case-insensitive value).
    pub fn is_arpc(headers: &HeaderMap) -> bool {
        headers
            .get(ARPC_MARKER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }
}
