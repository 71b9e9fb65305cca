//! Request-scoped context
//!
//! Every HTTP request (and every self-client call made outside of one) runs
//! inside a [`RequestContext`]. The context is bound to the request's task with
//! `tokio::task_local!`, so any code awaited by the request, including the
//! futures joined together in one atomic flush, sees the same context without
//! it being passed around.
//!
//! # Architecture
//!
//! The context holds:
//! - **Request info**: method, URI, headers and peer address of the HTTP request
//! - **Ledger**: commit and rollback callbacks (see [`crate::ledger`])
//! - **Transactions**: deduplicated transactions created through
//!   [`use_transaction`](crate::ledger::use_transaction)
//! - **Extensions**: arbitrary typed entries for application code
//!
//! A context is created at the start of request handling and dropped at the
//! end. It is never shared between requests.
//!
//! # Example
//!
//! ```
//! use arpc_server::context::{self, RequestContext};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! assert!(context::current().is_none());
//!
//! let ctx = RequestContext::new();
//! context::with_context(ctx, async {
//!     context::use_context().unwrap().insert(42u32);
//!     assert_eq!(context::use_context().unwrap().get::<u32>(), Some(42));
//! })
//! .await;
//! # });
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use hyper::http::{request::Parts, Extensions};
use hyper::{HeaderMap, Method, Uri};
use thiserror::Error;

use crate::ledger::{Ledger, TransactionKey};

tokio::task_local! {
    static CURRENT: RequestContext;
}

/// Errors raised by context accessors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    #[error("called outside of a request context")]
    OutsideRequestContext,

    #[error("the current context was not created for an HTTP request")]
    NoRequest,
}

/// The parts of the HTTP request visible to handlers.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub remote_addr: Option<SocketAddr>,
}

impl RequestInfo {
    pub fn from_parts(parts: &Parts, remote_addr: Option<SocketAddr>) -> Self {
        Self {
            method: parts.method.clone(),
            uri: parts.uri.clone(),
            headers: parts.headers.clone(),
            remote_addr,
        }
    }
}

#[derive(Default)]
pub(crate) struct ContextState {
    pub(crate) request: Option<RequestInfo>,
    pub(crate) ledger: Ledger,
    pub(crate) transactions: HashMap<TransactionKey, Arc<dyn Any + Send + Sync>>,
    pub(crate) extensions: Extensions,
}

/// A handle to the state of one request.
///
/// Cloning is cheap and every clone refers to the same state.
#[derive(Clone, Default)]
pub struct RequestContext {
    inner: Arc<Mutex<ContextState>>,
}

pub(crate) type WeakContext = Weak<Mutex<ContextState>>;

impl RequestContext {
    /// Creates a context with no HTTP request attached.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a context for an HTTP request.
    pub fn for_request(info: RequestInfo) -> Self {
        let ctx = Self::new();
        ctx.with_state(|state| state.request = Some(info));
        ctx
    }

    /// Returns the HTTP request this context was created for.
    pub fn request(&self) -> Option<RequestInfo> {
        self.with_state(|state| state.request.clone())
    }

    /// Stores a typed entry, returning the previous entry of that type.
    pub fn insert<T: Clone + Send + Sync + 'static>(&self, value: T) -> Option<T> {
        self.with_state(|state| state.extensions.insert(value))
    }

    /// Returns a copy of the typed entry, if present.
    pub fn get<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.with_state(|state| state.extensions.get::<T>().cloned())
    }

    pub fn remove<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.with_state(|state| state.extensions.remove::<T>())
    }

    /// Returns the number of pending commit and rollback callbacks.
    pub fn ledger_len(&self) -> (usize, usize) {
        self.with_state(|state| state.ledger.len())
    }

    /// Runs `f` with the state locked. Never hold the lock across an await.
    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut ContextState) -> R) -> R {
        f(&mut lock(&self.inner))
    }

    pub(crate) fn downgrade(&self) -> WeakContext {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(weak: &WeakContext) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }
}

fn lock(mutex: &Mutex<ContextState>) -> MutexGuard<'_, ContextState> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Runs `future` with `context` as the current context.
///
/// Every [`current`] call made while `future` is polled, including from
/// futures it joins, returns `context`. Tasks spawned from inside the future
/// do not inherit it.
pub async fn with_context<F>(context: RequestContext, future: F) -> F::Output
where
    F: Future,
{
    CURRENT.scope(context, future).await
}

/// Returns the current context, or `None` outside of a request.
pub fn current() -> Option<RequestContext> {
    CURRENT.try_with(|ctx| ctx.clone()).ok()
}

/// Returns the current context.
///
/// # Errors
///
/// [`ContextError::OutsideRequestContext`] when called outside of a request.
pub fn use_context() -> Result<RequestContext, ContextError> {
    current().ok_or(ContextError::OutsideRequestContext)
}

/// Returns the HTTP request being handled.
///
/// # Errors
///
/// - [`ContextError::OutsideRequestContext`] outside of a request
/// - [`ContextError::NoRequest`] inside a context created by a self-client call
pub fn use_request() -> Result<RequestInfo, ContextError> {
    use_context()?.request().ok_or(ContextError::NoRequest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;

    fn request_info(path: &str) -> RequestInfo {
        RequestInfo {
            method: Method::POST,
            uri: path.parse().unwrap(),
            headers: HeaderMap::new(),
            remote_addr: None,
        }
    }

    #[test]
    fn test_outside_context() {
        assert!(current().is_none());
        assert_eq!(use_context().err(), Some(ContextError::OutsideRequestContext));
        assert_eq!(use_request().err(), Some(ContextError::OutsideRequestContext));
        assert_eq!(
            ContextError::OutsideRequestContext.to_string(),
            "called outside of a request context"
        );
    }

    #[tokio::test]
    async fn test_use_request_inside_context() {
        let ctx = RequestContext::for_request(request_info("/?route=a&version=v1"));
        let uri = with_context(ctx, async { use_request().unwrap().uri }).await;
        assert_eq!(uri.query(), Some("route=a&version=v1"));
    }

    #[tokio::test]
    async fn test_use_request_without_request() {
        let result = with_context(RequestContext::new(), async { use_request() }).await;
        assert_eq!(result.err(), Some(ContextError::NoRequest));
    }

    #[tokio::test]
    async fn test_context_survives_awaits() {
        let ctx = RequestContext::new();
        with_context(ctx.clone(), async {
            use_context().unwrap().insert(String::from("before"));
            tokio::task::yield_now().await;
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            assert_eq!(use_context().unwrap().get::<String>().as_deref(), Some("before"));
        })
        .await;
        assert_eq!(ctx.get::<String>().as_deref(), Some("before"));
    }

    #[tokio::test]
    async fn test_joined_futures_share_context() {
        let ctx = RequestContext::new();
        ctx.insert(0usize);
        with_context(ctx.clone(), async {
            join_all((0..10).map(|_| async {
                tokio::task::yield_now().await;
                let ctx = use_context().unwrap();
                let n = ctx.get::<usize>().unwrap_or(0);
                ctx.insert(n + 1);
            }))
            .await;
        })
        .await;
        assert_eq!(ctx.get::<usize>(), Some(10));
    }

    #[tokio::test]
    async fn test_concurrent_requests_are_isolated() {
        let a = RequestContext::new();
        let b = RequestContext::new();

        let fut_a = with_context(a.clone(), async {
            use_context().unwrap().insert("a");
            tokio::task::yield_now().await;
            use_context().unwrap().get::<&'static str>()
        });
        let fut_b = with_context(b.clone(), async {
            use_context().unwrap().insert("b");
            tokio::task::yield_now().await;
            use_context().unwrap().get::<&'static str>()
        });

        let (seen_a, seen_b) = tokio::join!(fut_a, fut_b);
        assert_eq!(seen_a, Some("a"));
        assert_eq!(seen_b, Some("b"));
    }

    #[tokio::test]
    async fn test_context_cleared_after_scope() {
        with_context(RequestContext::new(), async {}).await;
        assert!(current().is_none());
    }

    #[test]
    fn test_extensions_insert_remove() {
        let ctx = RequestContext::new();
        assert_eq!(ctx.insert(1u8), None);
        assert_eq!(ctx.insert(2u8), Some(1));
        assert_eq!(ctx.remove::<u8>(), Some(2));
        assert_eq!(ctx.get::<u8>(), None);
    }
}
