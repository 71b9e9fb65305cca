//! arpc Common Types and Transport
//!
//! This crate provides the wire protocol shared by the arpc server, the Rust
//! client and the CLI.
//!
//! # Overview
//!
//! arpc exposes a tree of named method handlers over HTTP. Every call is
//! addressed by a dot-separated route (`echo.string`) and an API version
//! (`v1`), carries a single argument and returns a single value. A second
//! mode, the *atomic* route, carries a small program of several calls that
//! the server executes in one round trip.
//!
//! - **Protocol Layer**: error envelopes, built-in error codes, query
//!   parameters and the atomic instruction types
//! - **Transport Layer**: MessagePack codec and hyper response builders
//!
//! # Wire Format
//!
//! - **Query**: `?route=<path>&version=<version>[&arg=<percent-encoded bytes>]`
//! - **Serialization**: MessagePack for both arguments and results
//! - **Success**: `200` with the encoded value, or `204` when the value is `null`
//! - **Failure**: `400`/`500` with an encoded [`ErrorEnvelope`] (or an array of them)
//! - **Marker**: every response carries `X-Is-Arpc: true`
//!
//! # Example
//!
//! ```
//! use arpc_common::{MsgpackCodec, RpcError};
//! use serde_json::json;
//!
//! let bytes = MsgpackCodec::encode(&json!({"n": 1000})).unwrap();
//! let value: serde_json::Value = MsgpackCodec::decode(&bytes).unwrap();
//! assert_eq!(value, json!({"n": 1000}));
//!
//! let envelope = RpcError::ratelimited("slow down", None).to_envelope();
//! assert_eq!(envelope.code.as_deref(), Some("RATELIMITED"));
//! ```

pub mod auth;
pub mod protocol;
pub mod transport;

pub use protocol::*;
pub use transport::{HttpTransport, HyperResponse, MsgpackCodec};
