//! HTTP Server for arpc
//!
//! Serves an [`ApiSchema`] over HTTP/1.1 with hyper. Each connection runs on
//! its own tokio task and every request on it is handed to the
//! [`Dispatcher`].
//!
//! # Example
//!
//! ```no_run
//! use arpc_server::{ApiSchema, HttpServer, Route, RouteTree, ServerConfig};
//! use std::sync::Arc;
//!
//! async fn hello(name: String, _user: Option<()>) -> anyhow::Result<String> {
//!     Ok(format!("hello {}", name))
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let schema = ApiSchema::new().version("v1", RouteTree::new().route("hello", Route::new(hello).public()));
//!     let server = HttpServer::new(Arc::new(schema), ServerConfig::default()).unwrap();
//!     server.run().await.unwrap();
//! }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use arpc_common::ArpcError;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

use crate::config::ServerConfig;
use crate::dispatcher::Dispatcher;
use crate::schema::ApiSchema;

/// HTTP server for an arpc schema.
pub struct HttpServer<U> {
    dispatcher: Dispatcher<U>,
}

impl<U> HttpServer<U>
where
    U: Clone + Send + Sync + 'static,
{
    /// Creates a server after validating `config`.
    pub fn new(schema: Arc<ApiSchema<U>>, config: ServerConfig) -> Result<Self, ArpcError> {
        config.validate().map_err(ArpcError::Config)?;
        Ok(Self {
            dispatcher: Dispatcher::new(schema, config),
        })
    }

    pub fn dispatcher(&self) -> &Dispatcher<U> {
        &self.dispatcher
    }

    /// Binds the configured address and serves until the listener fails.
    pub async fn run(self) -> Result<(), ArpcError> {
        let addr = self.dispatcher.config().bind;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ArpcError::Transport(format!("Failed to bind to {}: {}", addr, e)))?;
        self.serve(listener).await
    }

    /// Serves connections accepted from `listener`.
    pub async fn serve(self, listener: TcpListener) -> Result<(), ArpcError> {
        let local = listener
            .local_addr()
            .map_err(|e| ArpcError::Transport(format!("Failed to get local address: {}", e)))?;
        self.log_routes();
        tracing::info!("arpc server listening on {}", local);

        loop {
            let (stream, remote) = listener
                .accept()
                .await
                .map_err(|e| ArpcError::Transport(format!("Failed to accept connection: {}", e)))?;

            let io = TokioIo::new(stream);
            let dispatcher = self.dispatcher.clone();

            tokio::task::spawn(async move {
                let service = service_fn(move |req| {
                    let dispatcher = dispatcher.clone();
                    async move {
                        Ok::<_, std::convert::Infallible>(dispatcher.handle_with_remote(req, Some(remote)).await)
                    }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    tracing::error!("Error serving connection from {}: {}", remote, err);
                }
            });
        }
    }

    fn log_routes(&self) {
        let schema = self.dispatcher.schema();
        for version in schema.versions() {
            if let Some(tree) = schema.tree(version) {
                let routes = tree.routes();
                tracing::info!("Version {}: {} routes", version, routes.len());
                for (path, flags) in routes {
                    tracing::debug!(
                        "  {} (mutation={}, parallel={}, authenticated={})",
                        path,
                        flags.mutation,
                        flags.parallel,
                        flags.authenticated
                    );
                }
            }
        }
    }
}

/// Binds `addr` and returns the listener with its resolved local address.
///
/// Useful for binding port 0 and learning the chosen port before serving.
pub async fn bind(addr: SocketAddr) -> Result<(TcpListener, SocketAddr), ArpcError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ArpcError::Transport(format!("Failed to bind to {}: {}", addr, e)))?;
    let local = listener
        .local_addr()
        .map_err(|e| ArpcError::Transport(format!("Failed to get local address: {}", e)))?;
    Ok((listener, local))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::{Route, RouteTree};

    async fn echo(input: String, _user: Option<()>) -> anyhow::Result<String> {
        Ok(input)
    }

    fn schema() -> Arc<ApiSchema<()>> {
        Arc::new(ApiSchema::new().version("v1", RouteTree::new().route("echo", Route::new(echo).public())))
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = ServerConfig::default().with_max_body_bytes(0);
        match HttpServer::new(schema(), config) {
            Err(ArpcError::Config(msg)) => assert!(msg.contains("max body bytes")),
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("expected a configuration error"),
        }
    }

    #[tokio::test]
    async fn test_bind_port_zero() {
        let (_listener, addr) = bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        assert_ne!(addr.port(), 0);
    }

    #[test]
    fn test_server_keeps_config() {
        let config = ServerConfig::default().with_atomic_routes(["multi"]);
        let server = HttpServer::new(schema(), config).unwrap();
        assert!(server.dispatcher().config().is_atomic_route("multi"));
    }
}
