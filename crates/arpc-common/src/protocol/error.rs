use thiserror::Error;

use super::envelope::ErrorEnvelope;

/// Errors raised by the transport and codec layers, and by clients that
/// receive an error envelope from a server.
#[derive(Error, Debug)]
pub enum ArpcError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("MessagePack encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("MessagePack decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Response is missing the X-Is-Arpc marker (status {0})")]
    NotArpc(u16),

    #[error("Remote error (status {status}): {}", summarize(.envelopes))]
    Remote {
        status: u16,
        envelopes: Vec<ErrorEnvelope>,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn summarize(envelopes: &[ErrorEnvelope]) -> String {
    envelopes
        .iter()
        .map(|e| match &e.code {
            Some(code) => format!("{} [{}]: {}", e.name, code, e.message),
            None => format!("{}: {}", e.name, e.message),
        })
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<hyper::http::Error> for ArpcError {
    fn from(err: hyper::http::Error) -> Self {
        ArpcError::InvalidRequest(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ArpcError>;
