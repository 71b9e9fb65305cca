//! API schema
//!
//! An [`ApiSchema`] is everything a server serves: one route tree per API
//! version plus the optional auth handler, rate limiter and registered
//! application errors. It is built once at startup and shared read-only by
//! every request.
//!
//! # Example
//!
//! ```
//! use arpc_server::{ApiKeyAuth, ApiSchema, Route, RouteTree};
//!
//! async fn echo(input: String, _user: Option<String>) -> anyhow::Result<String> {
//!     Ok(input)
//! }
//!
//! let schema = ApiSchema::new()
//!     .version("v1", RouteTree::new().route("echo.string", Route::new(echo).public()))
//!     .with_auth(ApiKeyAuth::new().with_key("k", "ada".to_string()));
//!
//! assert!(schema.tree("v1").is_some());
//! assert!(schema.tree("v2").is_none());
//! assert_eq!(schema.versions(), vec!["v1"]);
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::auth::AuthHandler;
use crate::exceptions::{DomainError, ExceptionRegistry};
use crate::rate_limit::RateLimiter;
use crate::routes::RouteTree;
use crate::self_client::{Anonymous, SelfClient};

/// Route trees by version, plus the hooks every call goes through.
pub struct ApiSchema<U> {
    versions: BTreeMap<String, Arc<RouteTree<U>>>,
    auth: Option<Arc<dyn AuthHandler<U>>>,
    rate_limiter: Option<Arc<dyn RateLimiter<U>>>,
    exceptions: ExceptionRegistry,
}

impl<U> Default for ApiSchema<U> {
    fn default() -> Self {
        Self {
            versions: BTreeMap::new(),
            auth: None,
            rate_limiter: None,
            exceptions: ExceptionRegistry::new(),
        }
    }
}

impl<U: 'static> ApiSchema<U> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `tree` as version `name`, replacing any previous tree.
    pub fn version(mut self, name: impl Into<String>, tree: RouteTree<U>) -> Self {
        self.versions.insert(name.into(), Arc::new(tree));
        self
    }

    /// Authenticates requests with `handler`.
    pub fn with_auth(mut self, handler: impl AuthHandler<U> + 'static) -> Self {
        self.auth = Some(Arc::new(handler));
        self
    }

    /// Checks every route call with `limiter`.
    pub fn with_rate_limiter(mut self, limiter: impl RateLimiter<U> + 'static) -> Self {
        self.rate_limiter = Some(Arc::new(limiter));
        self
    }

    pub fn with_exceptions(mut self, exceptions: ExceptionRegistry) -> Self {
        self.exceptions = exceptions;
        self
    }

    /// Reports `E` to clients as `name` (see [`ExceptionRegistry::register`]).
    pub fn exception<E: DomainError>(mut self, name: impl Into<String>) -> Self {
        self.exceptions = self.exceptions.register::<E>(name);
        self
    }

    pub fn tree(&self, version: &str) -> Option<&Arc<RouteTree<U>>> {
        self.versions.get(version)
    }

    /// Returns the served versions in sorted order.
    pub fn versions(&self) -> Vec<&str> {
        self.versions.keys().map(String::as_str).collect()
    }

    pub fn auth(&self) -> Option<&Arc<dyn AuthHandler<U>>> {
        self.auth.as_ref()
    }

    pub fn rate_limiter(&self) -> Option<&Arc<dyn RateLimiter<U>>> {
        self.rate_limiter.as_ref()
    }

    pub fn exceptions(&self) -> &ExceptionRegistry {
        &self.exceptions
    }

    /// Returns an anonymous in-process client for `version`.
    pub fn client(&self, version: &str) -> Option<SelfClient<U, Anonymous>>
    where
        U: Clone + Send + Sync,
    {
        self.tree(version).map(|tree| SelfClient::new(tree.clone()))
    }
}

impl<U> fmt::Debug for ApiSchema<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiSchema")
            .field("versions", &self.versions.keys().collect::<Vec<_>>())
            .field("auth", &self.auth.is_some())
            .field("rate_limiter", &self.rate_limiter.is_some())
            .field("exceptions", &self.exceptions)
            .finish()
    }
}
