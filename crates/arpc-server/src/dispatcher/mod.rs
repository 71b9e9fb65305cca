//! Request dispatcher
//!
//! Turns one HTTP request into one response. Every request runs in its own
//! [`RequestContext`], and the ledger of that context is settled before the
//! response is built.
//!
//! # Flow
//!
//! 1. Parse `route`, `version` and (for `GET`) `arg` from the query string
//! 2. Resolve the version's route tree (`VERSION_NOT_FOUND`)
//! 3. Establish the request context
//! 4. Authenticate from the `Authorization` header, if the schema has an
//!    auth handler
//! 5. Decode the argument: the `arg` parameter for `GET`, the body otherwise
//! 6. Run a single call, or validate and execute an atomic program
//! 7. Success runs the commit callbacks, failure the rollback callbacks
//! 8. Encode the result or the error envelopes
//!
//! Requests rejected before a route runs (steps 1 to 5, or a program that
//! fails validation) have nothing to roll back.

use std::net::SocketAddr;
use std::sync::Arc;

use arpc_common::{codes, HttpTransport, HyperResponse, MsgpackCodec, RpcError, RpcQuery};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::header::AUTHORIZATION;
use hyper::http::request::Parts;
use hyper::{Method, Request};
use serde_json::Value;

use crate::atomic::{execute, validate};
use crate::auth::authenticate;
use crate::config::ServerConfig;
use crate::context::{with_context, RequestContext, RequestInfo};
use crate::exceptions::Failure;
use crate::ledger;
use crate::routes::{find_route, Handler, RouteTree};
use crate::schema::ApiSchema;

/// Runs one route call: rate limit, authentication requirement, then the
/// handler with its input and output validation.
pub(crate) async fn invoke<U>(
    schema: &ApiSchema<U>,
    route: &str,
    handler: &dyn Handler<U>,
    arg: Value,
    user: Option<U>,
) -> Result<Value, Failure>
where
    U: Clone + Send + Sync + 'static,
{
    if let Some(limiter) = schema.rate_limiter() {
        limiter
            .check(route, &arg, user.as_ref())
            .await
            .map_err(|e| schema.exceptions().classify(&e))?;
    }

    if schema.auth().is_some() && handler.flags().authenticated && user.is_none() {
        return Err(Failure::from(RpcError::unauthorized(
            codes::UNAUTHENTICATED,
            format!("Route '{}' requires authentication", route),
        )));
    }

    handler
        .call(arg, user)
        .await
        .map_err(|e| schema.exceptions().classify_handler(e))
}

/// What a request resolved to before any route ran.
struct Call<U> {
    query: RpcQuery,
    tree: Arc<RouteTree<U>>,
    user: Option<U>,
    arg: Option<Value>,
}

/// Handles arpc requests against an [`ApiSchema`].
///
/// Cloning is cheap; clones share the schema and configuration.
pub struct Dispatcher<U> {
    schema: Arc<ApiSchema<U>>,
    config: Arc<ServerConfig>,
}

impl<U> Clone for Dispatcher<U> {
    fn clone(&self) -> Self {
        Self {
            schema: self.schema.clone(),
            config: self.config.clone(),
        }
    }
}

impl<U> Dispatcher<U>
where
    U: Clone + Send + Sync + 'static,
{
    pub fn new(schema: Arc<ApiSchema<U>>, config: ServerConfig) -> Self {
        Self {
            schema,
            config: Arc::new(config),
        }
    }

    pub fn schema(&self) -> &Arc<ApiSchema<U>> {
        &self.schema
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Handles a request with no known peer address.
    pub async fn handle<B>(&self, req: Request<B>) -> HyperResponse
    where
        B: Body + Send,
        B::Data: Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        self.handle_with_remote(req, None).await
    }

    /// Handles a request. Never fails: every error becomes an error response.
    pub async fn handle_with_remote<B>(&self, req: Request<B>, remote_addr: Option<SocketAddr>) -> HyperResponse
    where
        B: Body + Send,
        B::Data: Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let (parts, body) = req.into_parts();

        let query = match RpcQuery::parse(parts.uri.query()) {
            Ok(query) => query,
            Err(e) => {
                tracing::debug!("Rejected {} {}: {}", parts.method, parts.uri, e);
                return HttpTransport::error(&e);
            }
        };

        let tree = match self.schema.tree(&query.version) {
            Some(tree) => tree.clone(),
            None => {
                return HttpTransport::error(&RpcError::bad_request(
                    codes::VERSION_NOT_FOUND,
                    format!("Version '{}' not found", query.version),
                ))
            }
        };

        tracing::debug!("{} route={} version={}", parts.method, query.route, query.version);

        let ctx = RequestContext::for_request(RequestInfo::from_parts(&parts, remote_addr));
        with_context(ctx.clone(), async move {
            match self.prepare(query, tree, &parts, body).await {
                Ok(call) => self.run(&ctx, call).await,
                Err(failure) => failure.into_response(),
            }
        })
        .await
    }

    async fn prepare<B>(
        &self,
        query: RpcQuery,
        tree: Arc<RouteTree<U>>,
        parts: &Parts,
        body: B,
    ) -> Result<Call<U>, Failure>
    where
        B: Body + Send,
        B::Data: Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let user = match self.schema.auth() {
            Some(auth) => {
                let header = parts
                    .headers
                    .get(AUTHORIZATION)
                    .map(|value| {
                        value.to_str().map_err(|_| {
                            RpcError::unauthorized(codes::INVALID_TOKEN, "Authorization header is not valid text")
                        })
                    })
                    .transpose()?;
                authenticate(auth.as_ref(), header)
                    .await
                    .map_err(|e| self.schema.exceptions().classify(&e))?
            }
            None => None,
        };

        let bytes = if parts.method == Method::GET {
            query.decode_arg()?
        } else {
            self.read_body(body).await?
        };

        let arg = match bytes {
            Some(bytes) => Some(MsgpackCodec::decode_value(&bytes).map_err(|e| {
                RpcError::bad_request(codes::INVALID_ARG, format!("Argument is not valid MessagePack: {}", e))
            })?),
            None => None,
        };

        Ok(Call { query, tree, user, arg })
    }

    /// Reads the whole body, or `None` when it is empty.
    async fn read_body<B>(&self, body: B) -> Result<Option<Vec<u8>>, RpcError>
    where
        B: Body + Send,
        B::Data: Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let limit = self.config.max_body_bytes;
        let collected = Limited::new(body, limit).collect().await.map_err(|e| {
            if e.downcast_ref::<LengthLimitError>().is_some() {
                RpcError::bad_request(
                    codes::REQUEST_TOO_LARGE,
                    format!("Request body exceeds {} bytes", limit),
                )
            } else {
                RpcError::bad_request(codes::INVALID_ARG, format!("Failed to read request body: {}", e))
            }
        })?;

        let bytes = collected.to_bytes();
        Ok(if bytes.is_empty() { None } else { Some(bytes.to_vec()) })
    }

    async fn run(&self, ctx: &RequestContext, call: Call<U>) -> HyperResponse {
        let outcome = if self.config.is_atomic_route(&call.query.route) {
            self.run_atomic(call).await
        } else {
            self.run_single(call).await
        };

        match outcome {
            Ok(value) => match ledger::commit(ctx).await {
                Ok(()) => HttpTransport::success(&value),
                Err(e) => {
                    tracing::error!("Commit failed after successful call: {:#}", e);
                    self.schema.exceptions().classify(&e).into_response()
                }
            },
            Err(Outcome::Rejected(failure)) => failure.into_response(),
            Err(Outcome::Failed(failures)) => {
                ledger::rollback(ctx).await;
                Failure::response(failures)
            }
        }
    }

    async fn run_single(&self, call: Call<U>) -> Result<Value, Outcome> {
        let route = call.query.route.as_str();
        let handler = find_route(route, &*call.tree).ok_or_else(|| {
            Outcome::Rejected(Failure::from(RpcError::bad_request(
                codes::ROUTE_NOT_FOUND,
                format!("Route '{}' not found", route),
            )))
        })?;

        invoke(
            &self.schema,
            route,
            handler.as_ref(),
            call.arg.unwrap_or(Value::Null),
            call.user,
        )
        .await
        .map_err(|failure| Outcome::Failed(vec![failure]))
    }

    async fn run_atomic(&self, call: Call<U>) -> Result<Value, Outcome> {
        let raw = call.arg.ok_or_else(|| {
            Outcome::Rejected(Failure::from(RpcError::bad_request(
                codes::MISSING_ARG,
                "Atomic requests require an instruction array",
            )))
        })?;

        let program = validate(&raw, &*call.tree).map_err(|e| {
            tracing::debug!("Rejected atomic program: {} ({})", e, e.code);
            Outcome::Rejected(Failure::from(e.into_rpc_error()))
        })?;

        execute(&self.schema, program, call.user).await.map_err(Outcome::Failed)
    }
}

/// How a call that did not succeed ended.
enum Outcome {
    /// Refused before any route ran
    Rejected(Failure),
    /// One or more route calls failed
    Failed(Vec<Failure>),
}
