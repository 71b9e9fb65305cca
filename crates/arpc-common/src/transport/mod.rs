//! arpc Transport Layer
//!
//! This module provides the MessagePack codec and the hyper response builders
//! shared by the server and the client.
//!
//! # Architecture
//!
//! - **Transport**: HTTP/1.1 through hyper
//! - **Codec**: MessagePack through `rmp-serde`, with structs written as maps
//! - **Marker**: every server response carries `X-Is-Arpc: true` so clients
//!   can tell an arpc error apart from a proxy or gateway error
//!
//! # Components
//!
//! - **[`MsgpackCodec`]**: Encode/decode values and envelopes
//! - **[`HttpTransport`]**: Build success and error responses
//! - **[`HyperResponse`]**: Type alias for hyper responses with a full body
//!
//! # Example
//!
//! ```
//! use arpc_common::transport::{HttpTransport, MsgpackCodec};
//! use hyper::StatusCode;
//! use serde_json::json;
//!
//! let response = HttpTransport::success(&json!("hello"));
//! assert_eq!(response.status(), StatusCode::OK);
//! assert!(HttpTransport::is_arpc(response.headers()));
//!
//! let response = HttpTransport::success(&json!(null));
//! assert_eq!(response.status(), StatusCode::NO_CONTENT);
//! ```

pub mod codec;
pub mod http;

pub use codec::MsgpackCodec;
pub use http::{HttpTransport, HyperResponse, ARPC_MARKER_HEADER, MSGPACK_CONTENT_TYPE};
