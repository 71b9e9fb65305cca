//! Server configuration.
//!
//! Limits and addresses the HTTP server and dispatcher run with.

use std::net::SocketAddr;

use arpc_common::ATOMIC_ROUTES;

/// Default request body limit: 10 MiB
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Default listen address
pub const DEFAULT_BIND: &str = "127.0.0.1:8080";

/// Configuration for an arpc server.
///
/// # Fields
///
/// - `bind` - Address the HTTP server listens on (default: `127.0.0.1:8080`)
/// - `max_body_bytes` - Largest accepted request body (default: 10 MiB)
/// - `atomic_routes` - Route names that select atomic mode (default: `atomic`, `batch`)
///
/// # Example
///
/// ```
/// use arpc_server::ServerConfig;
///
/// let config = ServerConfig::new()
///     .with_bind("0.0.0.0:9000".parse().unwrap())
///     .with_max_body_bytes(1024 * 1024);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Address the HTTP server listens on
    pub bind: SocketAddr,
    /// Largest accepted request body in bytes
    pub max_body_bytes: usize,
    /// Route names that select atomic mode
    pub atomic_routes: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8080)),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            atomic_routes: ATOMIC_ROUTES.iter().map(|r| r.to_string()).collect(),
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bind(mut self, bind: SocketAddr) -> Self {
        self.bind = bind;
        self
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    /// Replaces the route names that select atomic mode.
    pub fn with_atomic_routes<I, S>(mut self, routes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.atomic_routes = routes.into_iter().map(Into::into).collect();
        self
    }

    /// Returns true if `route` selects atomic mode.
    pub fn is_atomic_route(&self, route: &str) -> bool {
        self.atomic_routes.iter().any(|r| r == route)
    }

    /// Reads overrides from `ARPC_BIND` and `ARPC_MAX_BODY_BYTES`.
    ///
    /// Unset variables keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns a description if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let mut config = Self::default();

        if let Some(bind) = lookup("ARPC_BIND") {
            config.bind = bind
                .parse()
                .map_err(|e| format!("invalid ARPC_BIND '{}': {}", bind, e))?;
        }

        if let Some(max) = lookup("ARPC_MAX_BODY_BYTES") {
            config.max_body_bytes = max
                .parse()
                .map_err(|e| format!("invalid ARPC_MAX_BODY_BYTES '{}': {}", max, e))?;
        }

        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Returns
    ///
    /// `Ok(())` if the configuration is valid, `Err` with a description otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The body limit is zero
    /// - No atomic route name is configured, or one is empty or contains a dot
    pub fn validate(&self) -> Result<(), String> {
        if self.max_body_bytes == 0 {
            return Err("max body bytes must be greater than zero".to_string());
        }

        if self.atomic_routes.is_empty() {
            return Err("at least one atomic route name is required".to_string());
        }

        for route in &self.atomic_routes {
            if route.is_empty() || route.contains('.') {
                return Err(format!(
                    "atomic route names must be non-empty and contain no '.' (got '{}')",
                    route
                ));
            }
        }

        Ok(())
    }
}
