use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::protocol::error::Result;

/// MessagePack codec for arguments, results and error envelopes.
///
/// Structs are encoded as maps keyed by field name, so an encoded
/// [`ErrorEnvelope`](crate::protocol::ErrorEnvelope) decodes on any
/// MessagePack implementation as `{ builtIn, name, code?, message, body? }`.
///
/// Dynamic values are decoded into `serde_json::Value`. Maps must have string
/// keys and binary (`bin`) values are not representable; both fail to decode.
///
/// # Example
///
/// ```
/// use arpc_common::transport::MsgpackCodec;
/// use serde_json::{json, Value};
///
/// let encoded = MsgpackCodec::encode(&json!({"n": [1, 2, 3]})).unwrap();
/// let decoded: Value = MsgpackCodec::decode(&encoded).unwrap();
/// assert_eq!(decoded, json!({"n": [1, 2, 3]}));
/// ```
pub struct MsgpackCodec;

impl MsgpackCodec {
    /// Encode a value to MessagePack bytes
    ///
    /// # Arguments
    ///
    /// * `value` - Any serializable value
    ///
    /// # Returns
    ///
    /// The encoded bytes, with structs written as maps
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MessagePack bytes into a typed value
    ///
    /// # Arguments
    ///
    /// * `data` - The encoded bytes
    ///
    /// # Returns
    ///
    /// The decoded value
    pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(data)?)
    }

    /// Decode MessagePack bytes into a dynamic value
    pub fn decode_value(data: &[u8]) -> Result<Value> {
        Self::decode(data)
    }
}
