//! Authentication handlers
//!
//! A server with an [`AuthHandler`] resolves the `Authorization` header of each
//! request to a user before any route runs. A server without one is
//! unauthenticated: no header is inspected and every route may be called.
//!
//! # Flow
//!
//! 1. No header: the request continues without a user
//! 2. `type token` split on the first space; no token is `MISSING_TOKEN`
//! 3. `type` is matched case-insensitively against the handler's token types;
//!    no match is `BAD_TOKEN_TYPE`
//! 4. [`AuthHandler::validate`] runs; `None` is `INVALID_TOKEN`, an error goes
//!    through the server's exception handling
//!
//! # Example
//!
//! ```
//! use arpc_server::auth::{authenticate, ApiKeyAuth};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let auth = ApiKeyAuth::new().with_key("secret-key", "ada".to_string());
//!
//! let user = authenticate(&auth, Some("ApiKey secret-key")).await.unwrap();
//! assert_eq!(user.as_deref(), Some("ada"));
//!
//! assert!(authenticate(&auth, Some("ApiKey wrong")).await.is_err());
//! assert_eq!(authenticate(&auth, None).await.unwrap(), None);
//! # });
//! ```

use std::fmt;

use arpc_common::auth::{constant_time_eq, Authorization, TokenType, TokenTypes};
use arpc_common::{codes, RpcError};
use async_trait::async_trait;

/// Resolves request tokens to users.
#[async_trait]
pub trait AuthHandler<U>: Send + Sync {
    /// The token types this handler accepts.
    fn token_types(&self) -> &TokenTypes;

    /// Resolves a token to a user; `Ok(None)` rejects the token.
    async fn validate(&self, token: &str, token_type: &TokenType) -> anyhow::Result<Option<U>>;
}

/// Authenticates a request from its `Authorization` header value.
///
/// Built-in rejections are returned as [`RpcError`] inside the `anyhow::Error`;
/// errors from [`AuthHandler::validate`] are passed through unchanged.
pub async fn authenticate<U, H>(handler: &H, header: Option<&str>) -> anyhow::Result<Option<U>>
where
    H: AuthHandler<U> + ?Sized,
{
    let Some(header) = header else {
        return Ok(None);
    };

    let auth = Authorization::parse(header)?;
    let token_type = handler.token_types().resolve(auth.token_type).ok_or_else(|| {
        RpcError::unauthorized(
            codes::BAD_TOKEN_TYPE,
            format!("Unsupported token type '{}'", auth.token_type),
        )
    })?;

    match handler.validate(auth.token, token_type).await? {
        Some(user) => Ok(Some(user)),
        None => Err(RpcError::unauthorized(codes::INVALID_TOKEN, "Invalid token").into()),
    }
}

/// An [`AuthHandler`] that maps static API keys to users.
///
/// Keys are compared in constant time, and every configured key is compared
/// on each attempt.
#[derive(Clone)]
pub struct ApiKeyAuth<U> {
    keys: Vec<(String, U)>,
    token_types: TokenTypes,
}

impl<U> ApiKeyAuth<U> {
    /// Creates a handler accepting `Authorization: ApiKey <key>`.
    pub fn new() -> Self {
        Self {
            keys: Vec::new(),
            token_types: TokenTypes::new()
                .with_type("apiKey", "ApiKey")
                .with_default("apiKey"),
        }
    }

    /// Adds a key and the user it authenticates as.
    pub fn with_key(mut self, key: impl Into<String>, user: U) -> Self {
        self.keys.push((key.into(), user));
        self
    }

    /// Replaces the accepted token types.
    pub fn with_token_types(mut self, token_types: TokenTypes) -> Self {
        self.token_types = token_types;
        self
    }
}

impl<U> Default for ApiKeyAuth<U> {
    fn default() -> Self {
        Self::new()
    }
}

impl<U> fmt::Debug for ApiKeyAuth<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ApiKeyAuth({} keys, *****)", self.keys.len())
    }
}

#[async_trait]
impl<U: Clone + Send + Sync> AuthHandler<U> for ApiKeyAuth<U> {
    fn token_types(&self) -> &TokenTypes {
        &self.token_types
    }

    async fn validate(&self, token: &str, _token_type: &TokenType) -> anyhow::Result<Option<U>> {
        let mut found = None;
        for (key, user) in &self.keys {
            if constant_time_eq(key, token) && found.is_none() {
                found = Some(user.clone());
            }
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth() -> ApiKeyAuth<String> {
        ApiKeyAuth::new()
            .with_key("key-ada", "ada".to_string())
            .with_key("key-bob", "bob".to_string())
    }

    fn code_of(err: &anyhow::Error) -> Option<String> {
        err.downcast_ref::<RpcError>().map(|e| e.code().to_string())
    }

    struct FailingAuth(TokenTypes);

    #[async_trait]
    impl AuthHandler<String> for FailingAuth {
        fn token_types(&self) -> &TokenTypes {
            &self.0
        }

        async fn validate(&self, _token: &str, _token_type: &TokenType) -> anyhow::Result<Option<String>> {
            anyhow::bail!("database unavailable")
        }
    }

    #[tokio::test]
    async fn test_valid_keys() {
        let auth = auth();
        assert_eq!(authenticate(&auth, Some("ApiKey key-ada")).await.unwrap().as_deref(), Some("ada"));
        assert_eq!(authenticate(&auth, Some("apikey key-bob")).await.unwrap().as_deref(), Some("bob"));
    }

    #[tokio::test]
    async fn test_no_header() {
        assert_eq!(authenticate(&auth(), None).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_missing_token() {
        let err = authenticate(&auth(), Some("ApiKey")).await.unwrap_err();
        assert_eq!(code_of(&err).as_deref(), Some(codes::MISSING_TOKEN));
    }

    #[tokio::test]
    async fn test_bad_token_type() {
        let err = authenticate(&auth(), Some("Bearer key-ada")).await.unwrap_err();
        assert_eq!(code_of(&err).as_deref(), Some(codes::BAD_TOKEN_TYPE));
    }

    #[tokio::test]
    async fn test_invalid_token() {
        let err = authenticate(&auth(), Some("ApiKey key-eve")).await.unwrap_err();
        assert_eq!(code_of(&err).as_deref(), Some(codes::INVALID_TOKEN));
    }

    #[tokio::test]
    async fn test_validate_error_passes_through() {
        let handler = FailingAuth(TokenTypes::new().with_type("bearer", "Bearer"));
        let err = authenticate(&handler, Some("Bearer tok")).await.unwrap_err();
        assert!(code_of(&err).is_none());
        assert_eq!(err.to_string(), "database unavailable");
    }

    #[tokio::test]
    async fn test_dyn_handler() {
        let handler: std::sync::Arc<dyn AuthHandler<String>> = std::sync::Arc::new(auth());
        let user = authenticate(handler.as_ref(), Some("ApiKey key-ada")).await.unwrap();
        assert_eq!(user.as_deref(), Some("ada"));
    }

    #[test]
    fn test_debug_hides_keys() {
        let text = format!("{:?}", auth());
        assert!(!text.contains("key-ada"));
        assert!(text.contains("2 keys"));
    }
}
