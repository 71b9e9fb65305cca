//! Request addressing
//!
//! Every arpc call is addressed through the query string:
//! `?route=<path>&version=<version>[&arg=<percent-encoded msgpack>]`.
//! The `arg` parameter is only read for `GET` requests; every other method
//! carries the encoded argument in the body.

use percent_encoding::{percent_decode_str, percent_encode, AsciiSet, NON_ALPHANUMERIC};

use super::codes;
use super::rpc_error::RpcError;

/// Route names that select atomic (batch) mode by default.
pub const ATOMIC_ROUTES: [&str; 2] = ["atomic", "batch"];

/// Characters escaped when writing `route` and `version` values.
const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'.')
    .remove(b'-')
    .remove(b'_')
    .remove(b'~');

/// The parsed query parameters of an arpc request.
///
/// `arg` is kept in its percent-encoded form; use [`RpcQuery::decode_arg`] to
/// obtain the raw MessagePack bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcQuery {
    pub route: String,
    pub version: String,
    pub arg: Option<String>,
}

impl RpcQuery {
    pub fn new(route: impl Into<String>, version: impl Into<String>) -> Self {
        RpcQuery {
            route: route.into(),
            version: version.into(),
            arg: None,
        }
    }

    /// Attaches an encoded argument, percent-encoding every non-alphanumeric byte.
    pub fn with_arg_bytes(mut self, bytes: &[u8]) -> Self {
        self.arg = Some(percent_encode(bytes, NON_ALPHANUMERIC).to_string());
        self
    }

    /// Parses the query string of a request URI.
    ///
    /// # Arguments
    ///
    /// * `query` - The raw query string without the leading `?`, if any
    ///
    /// # Returns
    ///
    /// The parsed query, or a `BadRequest` error with `MISSING_ROUTE`,
    /// `MISSING_VERSION` or `INVALID_URL`
    ///
    /// # Example
    ///
    /// ```
    /// use arpc_common::protocol::RpcQuery;
    ///
    /// let query = RpcQuery::parse(Some("route=echo.string&version=v1")).unwrap();
    /// assert_eq!(query.route, "echo.string");
    /// assert_eq!(query.version, "v1");
    /// assert!(query.arg.is_none());
    /// ```
    pub fn parse(query: Option<&str>) -> Result<Self, RpcError> {
        let mut route = None;
        let mut version = None;
        let mut arg = None;

        for pair in query.unwrap_or("").split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            match key {
                "route" if route.is_none() => route = Some(decode_text(value)?),
                "version" if version.is_none() => version = Some(decode_text(value)?),
                "arg" if arg.is_none() => arg = Some(value.to_string()),
                _ => {}
            }
        }

        let route = route
            .filter(|r| !r.is_empty())
            .ok_or_else(|| RpcError::bad_request(codes::MISSING_ROUTE, "Missing route parameter"))?;
        let version = version
            .filter(|v| !v.is_empty())
            .ok_or_else(|| RpcError::bad_request(codes::MISSING_VERSION, "Missing version parameter"))?;

        Ok(RpcQuery { route, version, arg })
    }

    /// Decodes the `arg` parameter to raw bytes.
    ///
    /// Returns `Ok(None)` when no `arg` parameter was sent.
    pub fn decode_arg(&self) -> Result<Option<Vec<u8>>, RpcError> {
        self.arg.as_deref().map(strict_percent_decode).transpose()
    }

    /// Renders the query back into `route=..&version=..[&arg=..]` form.
    pub fn to_query_string(&self) -> String {
        let mut query = format!(
            "route={}&version={}",
            percent_encode(self.route.as_bytes(), QUERY_VALUE),
            percent_encode(self.version.as_bytes(), QUERY_VALUE)
        );
        if let Some(arg) = &self.arg {
            query.push_str("&arg=");
            query.push_str(arg);
        }
        query
    }

    /// Returns true if the route selects atomic mode for the given aliases.
    pub fn is_atomic<S: AsRef<str>>(&self, aliases: &[S]) -> bool {
        aliases.iter().any(|alias| alias.as_ref() == self.route)
    }
}

/// Percent-decodes a string straight to bytes, rejecting malformed escapes.
///
/// Unlike a lenient decoder, a `%` not followed by two hex digits is an
/// `INVALID_URL` error rather than being passed through.
///
/// # Example
///
/// ```
/// use arpc_common::protocol::requests::strict_percent_decode;
///
/// assert_eq!(strict_percent_decode("%A5hello").unwrap(), b"\xa5hello".to_vec());
/// assert!(strict_percent_decode("%G1").is_err());
/// assert!(strict_percent_decode("abc%2").is_err());
/// ```
pub fn strict_percent_decode(input: &str) -> Result<Vec<u8>, RpcError> {
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let valid = bytes.len() > i + 2
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit();
            if !valid {
                return Err(RpcError::bad_request(
                    codes::INVALID_URL,
                    format!("Malformed percent-encoding at byte {}", i),
                ));
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    Ok(percent_decode_str(input).collect())
}

fn decode_text(value: &str) -> Result<String, RpcError> {
    let bytes = strict_percent_decode(value)?;
    String::from_utf8(bytes)
        .map_err(|_| RpcError::bad_request(codes::INVALID_URL, "Query parameter is not valid UTF-8"))
}
