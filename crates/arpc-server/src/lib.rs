//! arpc Server
//!
//! This crate provides the server runtime for arpc: typed routes grouped in
//! versioned route trees, an HTTP dispatcher speaking the MessagePack
//! envelope, atomic multi-call programs, a request-scoped context and a
//! commit/rollback ledger.
//!
//! # Components
//!
//! - [`routes`] - Typed route handles and the route tree
//! - [`schema`] - Versions, auth, rate limiting and error registration
//! - [`dispatcher`] - Turns one HTTP request into one response
//! - [`atomic`] - Validator and executor for atomic programs
//! - [`context`] - Request-scoped context on a tokio task-local
//! - [`ledger`] - Commit/rollback callbacks and deduplicated transactions
//! - [`self_client`] - In-process client over a route tree
//! - [`http_server`] - hyper HTTP/1.1 server
//!
//! # Example
//!
//! ```
//! use arpc_server::{ApiKeyAuth, ApiSchema, Route, RouteTree, ServerConfig};
//!
//! async fn greet(name: String, user: Option<String>) -> anyhow::Result<String> {
//!     Ok(format!("hello {} from {}", name, user.unwrap_or_default()))
//! }
//!
//! let tree = RouteTree::new().route("greet", Route::new(greet).query());
//! let schema = ApiSchema::new()
//!     .version("v1", tree)
//!     .with_auth(ApiKeyAuth::new().with_key("secret", "ada".to_string()));
//!
//! assert_eq!(schema.versions(), vec!["v1"]);
//! assert!(ServerConfig::default().validate().is_ok());
//! ```

pub mod atomic;
pub mod auth;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod exceptions;
pub mod http_server;
pub mod ledger;
pub mod rate_limit;
pub mod routes;
pub mod schema;
pub mod self_client;

pub use auth::{ApiKeyAuth, AuthHandler};
pub use config::ServerConfig;
pub use context::{use_context, use_request, RequestContext};
pub use dispatcher::Dispatcher;
pub use exceptions::{DomainError, ExceptionRegistry};
pub use http_server::HttpServer;
pub use ledger::{register_commit, register_rollback, use_transaction, Transaction};
pub use rate_limit::{RateLimitConfig, RateLimiter, TokenBucketLimiter};
pub use routes::{Authenticated, Public, Route, RouteTree, SchemaError};
pub use schema::ApiSchema;
pub use self_client::{SelfCallError, SelfClient};
