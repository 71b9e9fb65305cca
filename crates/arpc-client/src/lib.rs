//! arpc Client
//!
//! HTTP client for calling arpc servers: single calls over `POST` or `GET`
//! and atomic programs, with MessagePack bodies and decoded error envelopes.

pub mod client;

pub use client::{validate_http_url, ArpcClient, DEFAULT_TIMEOUT};
