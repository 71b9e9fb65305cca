//! Authorization header handling for arpc
//!
//! Clients authenticate by sending `Authorization: <type> <token>`. The server
//! splits the header on the first space, resolves the token type against the
//! types its auth handler declares, and hands the token to the handler.
//!
//! # Architecture
//!
//! - **[`TokenTypes`]**: the token types a server accepts, as human name to
//!   wire string (for example `"bearer" -> "Bearer"`), plus an optional default
//! - **[`Authorization`]**: a parsed header
//! - **[`constant_time_eq`]**: secret comparison for key based handlers
//!
//! Authentication failures are `Unauthorized` errors with status `400`.
//!
//! # Example
//!
//! ```
//! use arpc_common::auth::{Authorization, TokenTypes};
//!
//! let types = TokenTypes::new().with_type("bearer", "Bearer");
//! let auth = Authorization::parse("bearer abc123").unwrap();
//! let token_type = types.resolve(auth.token_type).unwrap();
//!
//! assert_eq!(token_type.name, "bearer");
//! assert_eq!(token_type.wire, "Bearer");
//! assert_eq!(auth.token, "abc123");
//! ```

use crate::protocol::codes;
use crate::protocol::RpcError;

/// A token type accepted by a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenType {
    /// Name used by the application
    pub name: String,
    /// Value sent in the `Authorization` header
    pub wire: String,
}

/// The set of token types an auth handler accepts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenTypes {
    types: Vec<TokenType>,
    default: Option<String>,
}

impl TokenTypes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a token type.
    ///
    /// # Arguments
    ///
    /// * `name` - Name used by the application
    /// * `wire` - Value clients put before the token in the header
    pub fn with_type(mut self, name: impl Into<String>, wire: impl Into<String>) -> Self {
        self.types.push(TokenType {
            name: name.into(),
            wire: wire.into(),
        });
        self
    }

    /// Marks a declared type (by name) as the one clients use unless told otherwise.
    pub fn with_default(mut self, name: impl Into<String>) -> Self {
        self.default = Some(name.into());
        self
    }

    /// Returns the default token type, if one is declared.
    pub fn default_type(&self) -> Option<&TokenType> {
        let name = self.default.as_deref()?;
        self.types.iter().find(|t| t.name == name)
    }

    /// Looks up a header token type, ignoring ASCII case.
    pub fn resolve(&self, header_type: &str) -> Option<&TokenType> {
        self.types
            .iter()
            .find(|t| t.wire.eq_ignore_ascii_case(header_type))
    }

    pub fn iter(&self) -> impl Iterator<Item = &TokenType> {
        self.types.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

/// A parsed `Authorization` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Authorization<'a> {
    pub token_type: &'a str,
    pub token: &'a str,
}

impl<'a> Authorization<'a> {
    /// Splits a header value on its first space.
    ///
    /// A header without a space, or with nothing after it, is an
    /// `Unauthorized` error with code `MISSING_TOKEN`.
    ///
    /// # Example
    ///
    /// ```
    /// use arpc_common::auth::Authorization;
    ///
    /// let auth = Authorization::parse("Bearer a b").unwrap();
    /// assert_eq!(auth.token_type, "Bearer");
    /// assert_eq!(auth.token, "a b");
    ///
    /// assert!(Authorization::parse("Bearer").is_err());
    /// assert!(Authorization::parse("Bearer ").is_err());
    /// ```
    pub fn parse(header: &'a str) -> Result<Self, RpcError> {
        match header.split_once(' ') {
            Some((token_type, token)) if !token.is_empty() => Ok(Authorization { token_type, token }),
            _ => Err(RpcError::unauthorized(
                codes::MISSING_TOKEN,
                "Authorization header is missing a token",
            )),
        }
    }

    /// Formats a header value for a client.
    pub fn header_value(token_type: &str, token: &str) -> String {
        format!("{} {}", token_type, token)
    }
}

/// Performs constant-time string comparison to prevent timing attacks.
///
/// Always walks the full length of equal-length inputs regardless of where
/// the first difference occurs.
///
/// # Example
///
/// ```
/// use arpc_common::auth::constant_time_eq;
///
/// assert!(constant_time_eq("key-1", "key-1"));
/// assert!(!constant_time_eq("key-1", "key-2"));
/// ```
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (byte_a, byte_b) in a.bytes().zip(b.bytes()) {
        result |= byte_a ^ byte_b;
    }

    result == 0
}
