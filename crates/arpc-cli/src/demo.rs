//! Demo schema served by `arpc demo`
//!
//! A handful of routes for trying the protocol from the command line:
//!
//! - `echo.string`, `echo.number`: return their argument
//! - `echo.value`: returns any argument, parallel
//! - `number`: always `2`
//! - `whoami`: the authenticated user (requires `--api-key`)
//! - `counter.add`: adds to a shared counter when the request commits
//! - `counter.get`: the counter's value

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use arpc_server::{register_commit, ApiKeyAuth, ApiSchema, Route, RouteTree, SchemaError, TokenBucketLimiter};
use serde_json::Value;

/// User type of the demo schema: the name bound to an API key
pub type DemoUser = String;

async fn echo_string(input: String, _user: Option<DemoUser>) -> anyhow::Result<String> {
    Ok(input)
}

async fn echo_number(input: f64, _user: Option<DemoUser>) -> anyhow::Result<f64> {
    Ok(input)
}

async fn echo_value(input: Value, _user: Option<DemoUser>) -> anyhow::Result<Value> {
    Ok(input)
}

async fn number(_input: (), _user: Option<DemoUser>) -> anyhow::Result<i64> {
    Ok(2)
}

async fn whoami(_input: (), user: Option<DemoUser>) -> anyhow::Result<Option<DemoUser>> {
    Ok(user)
}

fn counter_routes(counter: Arc<AtomicI64>) -> RouteTree<DemoUser> {
    let add = {
        let counter = counter.clone();
        Route::new(move |amount: i64, _user: Option<DemoUser>| {
            let counter = counter.clone();
            async move {
                let pending = counter.load(Ordering::SeqCst) + amount;
                register_commit(move || async move {
                    counter.fetch_add(amount, Ordering::SeqCst);
                    Ok::<(), anyhow::Error>(())
                })?;
                Ok::<_, anyhow::Error>(pending)
            }
        })
        .public()
        .check_input(|amount: &i64| {
            if *amount == 0 {
                Err(SchemaError::new("amount must not be zero"))
            } else {
                Ok(())
            }
        })
    };

    let get = Route::new(move |_input: (), _user: Option<DemoUser>| {
        let value = counter.load(Ordering::SeqCst);
        async move { Ok::<_, anyhow::Error>(value) }
    })
    .public()
    .query()
    .parallel();

    RouteTree::new().route("add", add).route("get", get)
}

/// Builds the demo schema under version `v1`.
pub fn schema(api_key: Option<&str>, limiter: Option<TokenBucketLimiter<DemoUser>>) -> ApiSchema<DemoUser> {
    let tree = RouteTree::new()
        .route("echo.string", Route::new(echo_string).public().query())
        .route("echo.number", Route::new(echo_number).public().query())
        .route("echo.value", Route::new(echo_value).public().query().parallel())
        .route("number", Route::new(number).public().query())
        .route("whoami", Route::new(whoami).query())
        .namespace("counter", counter_routes(Arc::new(AtomicI64::new(0))));

    let mut schema = ApiSchema::new().version("v1", tree);
    if let Some(key) = api_key {
        schema = schema.with_auth(ApiKeyAuth::new().with_key(key, "demo".to_string()));
    }
    if let Some(limiter) = limiter {
        schema = schema.with_rate_limiter(limiter);
    }
    schema
}
