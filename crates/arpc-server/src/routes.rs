//! Route handlers and route trees
//!
//! A route tree maps dot-separated paths (`users.get`) to handlers. Trees are
//! built at startup and only read while serving requests.
//!
//! # Architecture
//!
//! - **[`Handler`]**: the type-erased interface the dispatcher calls, taking
//!   and returning dynamic values
//! - **[`Route`]**: a typed handler built from an async function; input is
//!   deserialized (and optionally checked) before the function runs, output is
//!   checked and serialized after
//! - **[`RouteTree`]**: nested namespaces whose leaves are handlers
//!
//! # Example
//!
//! ```
//! use arpc_server::routes::{find_route, Route, RouteTree};
//!
//! async fn shout(input: String, _user: Option<()>) -> anyhow::Result<String> {
//!     Ok(input.to_uppercase())
//! }
//!
//! let tree = RouteTree::new().route("text.shout", Route::new(shout).public());
//! assert!(find_route("text.shout", &tree).is_some());
//! assert!(find_route("text", &tree).is_none());
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// Per-route metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RouteFlags {
    /// The route changes state. Informational; clients may use it to pick
    /// `POST` over `GET`.
    pub mutation: bool,
    /// The route may run concurrently with neighbouring parallel calls in an
    /// atomic program
    pub parallel: bool,
    /// The route requires an authenticated user when the server has an auth
    /// handler
    pub authenticated: bool,
}

impl Default for RouteFlags {
    fn default() -> Self {
        Self {
            mutation: true,
            parallel: false,
            authenticated: true,
        }
    }
}

/// One problem found while validating a value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    /// Field path to the offending value; empty for the value itself
    pub path: Vec<String>,
    pub message: String,
}

/// A value failed to deserialize or did not pass a check.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub struct SchemaError {
    pub issues: Vec<Issue>,
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .issues
            .iter()
            .map(|issue| {
                if issue.path.is_empty() {
                    issue.message.clone()
                } else {
                    format!("{}: {}", issue.path.join("."), issue.message)
                }
            })
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

impl SchemaError {
    pub fn new(message: impl Into<String>) -> Self {
        Self::at(Vec::<String>::new(), message)
    }

    /// Creates an error for the field at `path`.
    pub fn at<I, S>(path: I, message: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            issues: vec![Issue {
                path: path.into_iter().map(Into::into).collect(),
                message: message.into(),
            }],
        }
    }

    /// Returns the `{ "issues": [...] }` body sent with `INVALID_ARG`.
    pub fn to_body(&self) -> Value {
        json!({ "issues": self.issues })
    }
}

impl From<serde_json::Error> for SchemaError {
    fn from(err: serde_json::Error) -> Self {
        SchemaError::new(err.to_string())
    }
}

/// Errors a handler call can end with.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// The argument did not match the route's input
    #[error("invalid input: {0}")]
    InvalidInput(#[from] SchemaError),

    /// The method failed, or its output did not match the route's output
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

/// The type-erased interface of a route.
#[async_trait]
pub trait Handler<U>: Send + Sync {
    fn flags(&self) -> RouteFlags;

    /// Validates `arg`, runs the method and returns its validated output.
    async fn call(&self, arg: Value, user: Option<U>) -> Result<Value, HandlerError>;
}

pub type SharedHandler<U> = Arc<dyn Handler<U>>;

/// Access marker for routes callable without a user.
pub struct Public;

/// Access marker for routes that require a user (the default).
pub struct Authenticated;

pub trait Access: Send + Sync + 'static {
    const AUTHENTICATED: bool;
}

impl Access for Public {
    const AUTHENTICATED: bool = false;
}

impl Access for Authenticated {
    const AUTHENTICATED: bool = true;
}

type Method<U, I, O> = dyn Fn(I, Option<U>) -> BoxFuture<'static, anyhow::Result<O>> + Send + Sync;
type Check<T> = dyn Fn(&T) -> Result<(), SchemaError> + Send + Sync;

/// A typed route.
///
/// `U` is the user type, `I` and `O` the input and output types, and `A`
/// marks whether the route needs a user. The marker lets the self-client
/// reject calls to authenticated routes at compile time.
///
/// # Example
///
/// ```
/// use arpc_server::routes::{Handler, Route, SchemaError};
/// use serde_json::json;
///
/// async fn add(input: (i64, i64), _user: Option<String>) -> anyhow::Result<i64> {
///     Ok(input.0 + input.1)
/// }
///
/// let route = Route::new(add)
///     .public()
///     .parallel()
///     .query()
///     .check_input(|(a, b): &(i64, i64)| {
///         if *a < 0 || *b < 0 {
///             return Err(SchemaError::new("operands must be non-negative"));
///         }
///         Ok(())
///     });
///
/// let flags = route.flags();
/// assert!(flags.parallel && !flags.mutation && !flags.authenticated);
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// assert_eq!(route.call(json!([2, 3]), None).await.unwrap(), json!(5));
/// assert!(route.call(json!([-2, 3]), None).await.is_err());
/// assert!(route.call(json!("nope"), None).await.is_err());
/// # });
/// ```
pub struct Route<U, I, O, A = Authenticated> {
    method: Arc<Method<U, I, O>>,
    input_check: Option<Arc<Check<I>>>,
    output_check: Option<Arc<Check<O>>>,
    mutation: bool,
    parallel: bool,
    _access: PhantomData<fn() -> A>,
}

impl<U, I, O, A> Clone for Route<U, I, O, A> {
    fn clone(&self) -> Self {
        Self {
            method: self.method.clone(),
            input_check: self.input_check.clone(),
            output_check: self.output_check.clone(),
            mutation: self.mutation,
            parallel: self.parallel,
            _access: PhantomData,
        }
    }
}

impl<U, I, O> Route<U, I, O, Authenticated>
where
    U: Send + 'static,
    I: Send + 'static,
    O: Send + 'static,
{
    /// Creates an authenticated, non-parallel mutation route.
    pub fn new<F, Fut>(method: F) -> Self
    where
        F: Fn(I, Option<U>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
    {
        Self {
            method: Arc::new(move |input: I, user: Option<U>| -> BoxFuture<'static, anyhow::Result<O>> {
                Box::pin(method(input, user))
            }),
            input_check: None,
            output_check: None,
            mutation: true,
            parallel: false,
            _access: PhantomData,
        }
    }

    /// Makes the route callable without a user.
    pub fn public(self) -> Route<U, I, O, Public> {
        Route {
            method: self.method,
            input_check: self.input_check,
            output_check: self.output_check,
            mutation: self.mutation,
            parallel: self.parallel,
            _access: PhantomData,
        }
    }
}

impl<U, I, O, A: Access> Route<U, I, O, A> {
    /// Lets the route share a flush group with other parallel calls.
    pub fn parallel(mut self) -> Self {
        self.parallel = true;
        self
    }

    /// Marks the route as read-only.
    pub fn query(mut self) -> Self {
        self.mutation = false;
        self
    }

    /// Adds a check that runs on the deserialized input.
    pub fn check_input<F>(mut self, check: F) -> Self
    where
        F: Fn(&I) -> Result<(), SchemaError> + Send + Sync + 'static,
    {
        self.input_check = Some(Arc::new(check));
        self
    }

    /// Adds a check that runs on the method's output before it is returned.
    pub fn check_output<F>(mut self, check: F) -> Self
    where
        F: Fn(&O) -> Result<(), SchemaError> + Send + Sync + 'static,
    {
        self.output_check = Some(Arc::new(check));
        self
    }

    pub fn flags(&self) -> RouteFlags {
        RouteFlags {
            mutation: self.mutation,
            parallel: self.parallel,
            authenticated: A::AUTHENTICATED,
        }
    }

    pub(crate) fn validate_input(&self, input: &I) -> Result<(), SchemaError> {
        match &self.input_check {
            Some(check) => check(input),
            None => Ok(()),
        }
    }

    pub(crate) fn validate_output(&self, output: &O) -> Result<(), SchemaError> {
        match &self.output_check {
            Some(check) => check(output),
            None => Ok(()),
        }
    }

    pub(crate) fn invoke(&self, input: I, user: Option<U>) -> BoxFuture<'static, anyhow::Result<O>> {
        (self.method)(input, user)
    }
}

#[async_trait]
impl<U, I, O, A> Handler<U> for Route<U, I, O, A>
where
    U: Send + 'static,
    I: DeserializeOwned + Send + 'static,
    O: Serialize + Send + 'static,
    A: Access,
{
    fn flags(&self) -> RouteFlags {
        Route::flags(self)
    }

    async fn call(&self, arg: Value, user: Option<U>) -> Result<Value, HandlerError> {
        let input: I = serde_json::from_value(arg).map_err(SchemaError::from)?;
        self.validate_input(&input)?;

        let output = self.invoke(input, user).await?;

        self.validate_output(&output)
            .map_err(|e| anyhow::anyhow!("output validation failed: {}", e))?;
        Ok(serde_json::to_value(output)
            .map_err(|e| anyhow::anyhow!("output serialization failed: {}", e))?)
    }
}

/// A node of a route tree.
pub enum RouteNode<U> {
    Namespace(RouteTree<U>),
    Handler(SharedHandler<U>),
}

/// Nested map from names to namespaces or handlers.
pub struct RouteTree<U> {
    nodes: BTreeMap<String, RouteNode<U>>,
}

impl<U> Default for RouteTree<U> {
    fn default() -> Self {
        Self {
            nodes: BTreeMap::new(),
        }
    }
}

impl<U: 'static> RouteTree<U> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a handler at a dotted path, creating namespaces as needed.
    ///
    /// # Panics
    ///
    /// Panics if the path is invalid or collides with an existing entry (see
    /// [`RouteTree::insert`]). Route trees are built at startup, so a bad path
    /// is a programming error.
    pub fn route(mut self, path: &str, handler: impl Handler<U> + 'static) -> Self {
        if let Err(e) = self.insert(path, Arc::new(handler)) {
            panic!("invalid route '{}': {}", path, e);
        }
        self
    }

    /// Mounts a whole tree under `name`.
    ///
    /// # Panics
    ///
    /// Panics if `name` is empty, contains a dot, or is already taken.
    pub fn namespace(mut self, name: &str, tree: RouteTree<U>) -> Self {
        if name.is_empty() || name.contains('.') {
            panic!("invalid namespace name '{}'", name);
        }
        if self.nodes.contains_key(name) {
            panic!("namespace '{}' is already registered", name);
        }
        self.nodes.insert(name.to_string(), RouteNode::Namespace(tree));
        self
    }

    /// Inserts a handler at a dotted path.
    ///
    /// # Errors
    ///
    /// Returns a description if the path has an empty segment, if a prefix
    /// of it is already a handler, or if the path itself is already taken.
    pub fn insert(&mut self, path: &str, handler: SharedHandler<U>) -> Result<(), String> {
        let segments: Vec<&str> = path.split('.').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err("path segments must be non-empty".to_string());
        }

        let (last, parents) = match segments.split_last() {
            Some(split) => split,
            None => return Err("path must not be empty".to_string()),
        };

        let mut tree = self;
        for segment in parents {
            let node = tree
                .nodes
                .entry(segment.to_string())
                .or_insert_with(|| RouteNode::Namespace(RouteTree::new()));
            tree = match node {
                RouteNode::Namespace(inner) => inner,
                RouteNode::Handler(_) => {
                    return Err(format!("'{}' is already a handler", segment));
                }
            };
        }

        if tree.nodes.contains_key(*last) {
            return Err(format!("'{}' is already registered", last));
        }
        tree.nodes.insert(last.to_string(), RouteNode::Handler(handler));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&RouteNode<U>> {
        self.nodes.get(name)
    }

    /// Lists every handler path with its flags, in sorted order.
    pub fn routes(&self) -> Vec<(String, RouteFlags)> {
        let mut out = Vec::new();
        self.collect_routes("", &mut out);
        out
    }

    fn collect_routes(&self, prefix: &str, out: &mut Vec<(String, RouteFlags)>) {
        for (name, node) in &self.nodes {
            let path = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{}.{}", prefix, name)
            };
            match node {
                RouteNode::Namespace(tree) => tree.collect_routes(&path, out),
                RouteNode::Handler(handler) => out.push((path, handler.flags())),
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Resolves a dotted path to a handler.
///
/// Returns `None` for an empty path, a missing segment, or a path that ends
/// at a namespace.
pub fn find_route<'a, U>(path: &str, tree: &'a RouteTree<U>) -> Option<&'a SharedHandler<U>> {
    if path.is_empty() {
        return None;
    }

    let mut segments = path.split('.').peekable();
    let mut current = tree;
    while let Some(segment) = segments.next() {
        match current.nodes.get(segment)? {
            RouteNode::Namespace(inner) => current = inner,
            RouteNode::Handler(handler) => {
                return if segments.peek().is_none() {
                    Some(handler)
                } else {
                    None
                };
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn echo(input: String, _user: Option<String>) -> anyhow::Result<String> {
        Ok(input)
    }

    async fn whoami(_input: (), user: Option<String>) -> anyhow::Result<Option<String>> {
        Ok(user)
    }

    async fn fail(_input: (), _user: Option<String>) -> anyhow::Result<()> {
        anyhow::bail!("boom")
    }

    fn tree() -> RouteTree<String> {
        RouteTree::new()
            .route("echo.string", Route::new(echo).public())
            .route("whoami", Route::new(whoami))
            .namespace(
                "admin",
                RouteTree::new().route("users.fail", Route::new(fail).parallel()),
            )
    }

    // ========================================================================
    // Route Resolution
    // ========================================================================

    #[test]
    fn test_find_route() {
        let tree = tree();
        assert!(find_route("echo.string", &tree).is_some());
        assert!(find_route("whoami", &tree).is_some());
        assert!(find_route("admin.users.fail", &tree).is_some());
    }

    #[test]
    fn test_find_route_misses() {
        let tree = tree();
        assert!(find_route("", &tree).is_none());
        assert!(find_route("echo", &tree).is_none());
        assert!(find_route("echo.number", &tree).is_none());
        assert!(find_route("echo.string.more", &tree).is_none());
        assert!(find_route("admin.users", &tree).is_none());
        assert!(find_route(".", &tree).is_none());
        assert!(find_route("echo..string", &tree).is_none());
    }

    #[test]
    fn test_routes_listing() {
        let routes = tree().routes();
        let paths: Vec<&str> = routes.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(paths, vec!["admin.users.fail", "echo.string", "whoami"]);

        let (_, flags) = &routes[0];
        assert!(flags.parallel);
        assert!(flags.authenticated);
        assert!(flags.mutation);

        assert!(!routes[1].1.authenticated);
    }

    #[test]
    fn test_insert_errors() {
        let mut tree: RouteTree<String> = RouteTree::new();
        let handler: SharedHandler<String> = Arc::new(Route::new(echo));

        assert!(tree.insert("a.b", handler.clone()).is_ok());
        assert!(tree.insert("a.b", handler.clone()).unwrap_err().contains("already registered"));
        assert!(tree.insert("a.b.c", handler.clone()).unwrap_err().contains("already a handler"));
        assert!(tree.insert("", handler.clone()).is_err());
        assert!(tree.insert("a..c", handler.clone()).is_err());
        assert!(tree.insert("a.c", handler).is_ok());
    }

    #[test]
    #[should_panic(expected = "invalid route")]
    fn test_route_builder_panics_on_bad_path() {
        let _ = RouteTree::<String>::new().route("bad..path", Route::new(echo));
    }

    // ========================================================================
    // Typed Routes
    // ========================================================================

    #[test]
    fn test_default_flags() {
        let flags = Route::new(echo).flags();
        assert_eq!(flags, RouteFlags::default());
        assert!(flags.mutation && !flags.parallel && flags.authenticated);
    }

    #[tokio::test]
    async fn test_call_parses_input() {
        let route = Route::new(echo);
        let out = route.call(json!("hi"), None).await.unwrap();
        assert_eq!(out, json!("hi"));

        let err = route.call(json!(42), None).await.unwrap_err();
        assert!(matches!(err, HandlerError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_unit_input_accepts_null() {
        let route = Route::new(whoami);
        let out = route.call(Value::Null, Some("ada".into())).await.unwrap();
        assert_eq!(out, json!("ada"));
    }

    #[tokio::test]
    async fn test_input_check_reports_issues() {
        let route = Route::new(echo).check_input(|s: &String| {
            if s.len() > 3 {
                Err(SchemaError::at(["value"], "too long"))
            } else {
                Ok(())
            }
        });

        match route.call(json!("toolong"), None).await {
            Err(HandlerError::InvalidInput(e)) => {
                assert_eq!(e.to_body(), json!({"issues": [{"path": ["value"], "message": "too long"}]}));
                assert_eq!(e.to_string(), "value: too long");
            }
            other => panic!("expected invalid input, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_output_check_failure_is_handler_failure() {
        let route = Route::new(echo).check_output(|_s: &String| Err(SchemaError::new("never valid")));
        let err = route.call(json!("x"), None).await.unwrap_err();
        assert!(matches!(err, HandlerError::Failed(_)));
        assert!(err.to_string().contains("never valid"));
    }

    #[tokio::test]
    async fn test_method_failure() {
        let route = Route::new(fail);
        let err = route.call(Value::Null, None).await.unwrap_err();
        match err {
            HandlerError::Failed(e) => assert_eq!(e.to_string(), "boom"),
            other => panic!("expected failure, got {:?}", other),
        }
    }
}
