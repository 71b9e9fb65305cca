//! In-process client over a route tree
//!
//! A [`SelfClient`] calls routes without going through HTTP while keeping the
//! rest of the call path: input checks, the route method and output checks.
//! It is useful from background jobs, tests and from inside other routes.
//!
//! Typed calls take the [`Route`] handle itself and do not look it up in the
//! client's tree, so a handle works whether or not it is registered there.
//! Only [`SelfClient::call_path`] resolves routes through the tree.
//!
//! Anonymous clients can only call public routes through typed handles.
//! Calling an authenticated route is a compile error:
//!
//! ```compile_fail
//! use arpc_server::{Route, RouteTree, SelfClient};
//! use std::sync::Arc;
//!
//! async fn whoami(_input: (), user: Option<String>) -> anyhow::Result<Option<String>> {
//!     Ok(user)
//! }
//!
//! # async fn run() {
//! let route = Route::new(whoami);
//! let client = SelfClient::new(Arc::new(RouteTree::<String>::new()));
//! let _ = client.call(&route, ()).await;
//! # }
//! ```
//!
//! Authorized clients carry a user and can call any route:
//!
//! ```
//! use arpc_server::{Route, RouteTree, SelfClient};
//! use std::sync::Arc;
//!
//! async fn whoami(_input: (), user: Option<String>) -> anyhow::Result<Option<String>> {
//!     Ok(user)
//! }
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let route = Route::new(whoami);
//! let client = SelfClient::new(Arc::new(RouteTree::new())).authorize("ada".to_string());
//! assert_eq!(client.call(&route, ()).await.unwrap(), Some("ada".to_string()));
//! # });
//! ```
//!
//! Calls made outside of a request run in a fresh [`RequestContext`]; its
//! ledger is committed when the call succeeds and rolled back when it fails.
//! Calls made during a request share that request's context and ledger.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::context::{self, with_context, RequestContext};
use crate::ledger;
use crate::routes::{find_route, Access, HandlerError, Public, Route, RouteTree, SchemaError};

/// Client state with no user.
pub struct Anonymous;

/// Client state bound to a user.
pub struct Authorized;

#[derive(Error, Debug)]
pub enum SelfCallError {
    #[error("route '{0}' not found")]
    RouteNotFound(String),

    #[error("route '{0}' requires authentication")]
    Unauthenticated(String),

    #[error("invalid input: {0}")]
    InvalidInput(SchemaError),

    #[error("invalid output: {0}")]
    InvalidOutput(SchemaError),

    #[error(transparent)]
    Failed(anyhow::Error),
}

pub struct SelfClient<U, S = Anonymous> {
    tree: Arc<RouteTree<U>>,
    user: Option<U>,
    _state: PhantomData<fn() -> S>,
}

impl<U: Clone, S> Clone for SelfClient<U, S> {
    fn clone(&self) -> Self {
        Self {
            tree: self.tree.clone(),
            user: self.user.clone(),
            _state: PhantomData,
        }
    }
}

impl<U> SelfClient<U, Anonymous>
where
    U: Clone + Send + Sync + 'static,
{
    pub fn new(tree: Arc<RouteTree<U>>) -> Self {
        Self {
            tree,
            user: None,
            _state: PhantomData,
        }
    }

    /// Returns a client that calls routes as `user`.
    pub fn authorize(&self, user: U) -> SelfClient<U, Authorized> {
        SelfClient {
            tree: self.tree.clone(),
            user: Some(user),
            _state: PhantomData,
        }
    }

    /// Calls a public route.
    pub async fn call<I, O>(&self, route: &Route<U, I, O, Public>, input: I) -> Result<O, SelfCallError>
    where
        I: Send + 'static,
        O: Send + 'static,
    {
        settled(call_route(route, input, None)).await
    }
}

impl<U> SelfClient<U, Authorized>
where
    U: Clone + Send + Sync + 'static,
{
    /// Calls any route as the client's user.
    pub async fn call<I, O, A>(&self, route: &Route<U, I, O, A>, input: I) -> Result<O, SelfCallError>
    where
        I: Send + 'static,
        O: Send + 'static,
        A: Access,
    {
        settled(call_route(route, input, self.user.clone())).await
    }
}

impl<U, S> SelfClient<U, S>
where
    U: Clone + Send + Sync + 'static,
{
    pub fn tree(&self) -> &RouteTree<U> {
        &self.tree
    }

    /// The user calls are made as; always set on authorized clients.
    pub fn user(&self) -> Option<&U> {
        self.user.as_ref()
    }

    /// Calls a route by its dotted path with an untyped argument.
    ///
    /// Authenticated routes fail with [`SelfCallError::Unauthenticated`]
    /// when the client has no user.
    pub async fn call_path(&self, path: &str, arg: Value) -> Result<Value, SelfCallError> {
        let handler = find_route(path, &*self.tree).ok_or_else(|| SelfCallError::RouteNotFound(path.to_string()))?;
        if handler.flags().authenticated && self.user.is_none() {
            return Err(SelfCallError::Unauthenticated(path.to_string()));
        }

        let user = self.user.clone();
        settled(async move {
            handler.call(arg, user).await.map_err(|e| match e {
                HandlerError::InvalidInput(issues) => SelfCallError::InvalidInput(issues),
                HandlerError::Failed(err) => SelfCallError::Failed(err),
            })
        })
        .await
    }
}

async fn call_route<U, I, O, A>(route: &Route<U, I, O, A>, input: I, user: Option<U>) -> Result<O, SelfCallError>
where
    A: Access,
{
    route.validate_input(&input).map_err(SelfCallError::InvalidInput)?;
    let output = route.invoke(input, user).await.map_err(SelfCallError::Failed)?;
    route.validate_output(&output).map_err(SelfCallError::InvalidOutput)?;
    Ok(output)
}

/// Runs `call` in the current context, or in a fresh one whose ledger is
/// settled by the outcome.
async fn settled<T, F>(call: F) -> Result<T, SelfCallError>
where
    F: Future<Output = Result<T, SelfCallError>>,
{
    if context::current().is_some() {
        return call.await;
    }

    let ctx = RequestContext::new();
    let result = with_context(ctx.clone(), call).await;
    if result.is_ok() {
        ledger::commit(&ctx).await.map_err(SelfCallError::Failed)?;
    } else {
        tracing::debug!("Self-call failed, rolling back");
        ledger::rollback(&ctx).await;
    }
    result
}
