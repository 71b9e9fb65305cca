//! Plucking values out of call results
//!
//! Assignments and gates may name a path into an object result. Each segment
//! selects a field of the current object; anything else fails the call.

use arpc_common::{codes, RpcError};
use serde_json::Value;

/// Path segment that is never plucked.
pub const FORBIDDEN_SEGMENT: &str = "constructor";

/// Walks `path` through nested objects of `value`.
///
/// # Errors
///
/// `BadRequest` with `INVALID_PLUCK` if a segment is `"constructor"`, names
/// a missing field, or would step into anything that is not an object.
///
/// # Example
///
/// ```
/// use arpc_server::atomic::pluck;
/// use serde_json::json;
///
/// let user = json!({"profile": {"name": "ada"}});
/// let path = vec!["profile".to_string(), "name".to_string()];
/// assert_eq!(pluck(&user, &path).unwrap(), json!("ada"));
///
/// assert!(pluck(&user, &["constructor".to_string()]).is_err());
/// ```
pub fn pluck(value: &Value, path: &[String]) -> Result<Value, RpcError> {
    let mut current = value;
    for (depth, segment) in path.iter().enumerate() {
        if segment == FORBIDDEN_SEGMENT {
            return Err(invalid(path, "'constructor' cannot be plucked"));
        }

        current = match current {
            Value::Object(map) => match map.get(segment) {
                Some(next) => next,
                None => return Err(invalid(path, &format!("missing field '{}'", segment))),
            },
            other => {
                let at = if depth == 0 {
                    "the value".to_string()
                } else {
                    format!("'{}'", path[..depth].join("."))
                };
                return Err(invalid(
                    path,
                    &format!("cannot read '{}' of {} ({})", segment, at, kind(other)),
                ));
            }
        };
    }
    Ok(current.clone())
}

fn invalid(path: &[String], reason: &str) -> RpcError {
    RpcError::bad_request(
        codes::INVALID_PLUCK,
        format!("Cannot pluck [{}]: {}", path.join(", "), reason),
    )
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
