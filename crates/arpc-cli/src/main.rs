//! # arpc CLI
//!
//! Command-line client for arpc servers, plus a demo server for trying the
//! protocol.
//!
//! ## Usage
//!
//! ```bash
//! # Serve the demo schema
//! arpc demo --bind 127.0.0.1:8080 --api-key secret
//!
//! # Call a route (outputs raw JSON)
//! arpc call http://127.0.0.1:8080 echo.string '"hello"'
//!
//! # Call an authenticated route
//! arpc call http://127.0.0.1:8080 whoami --token secret
//!
//! # Run an atomic program
//! arpc atomic http://127.0.0.1:8080 '[["number", null, "n"], [["n"], "echo.number"]]'
//! ```
//!
//! ## URL Format
//!
//! All URLs must include the `http://` or `https://` prefix.

mod demo;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use arpc_client::{validate_http_url, ArpcClient};
use arpc_server::{HttpServer, RateLimitConfig, ServerConfig, TokenBucketLimiter};
use argh::FromArgs;
use serde_json::Value;

#[derive(FromArgs)]
/// arpc - MessagePack RPC over HTTP
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Call(CallArgs),
    Atomic(AtomicArgs),
    Demo(DemoArgs),
}

// Prints the result as raw JSON on stdout (`null` for no result). Errors go
// to stderr with a non-zero exit code.
#[derive(FromArgs)]
#[argh(subcommand, name = "call")]
/// call a route on an arpc server
struct CallArgs {
    /// address of the server, with the http:// or https:// prefix
    #[argh(positional)]
    server_address: String,

    /// dotted route path, e.g. `echo.string`
    #[argh(positional)]
    route: String,

    /// argument as JSON; omitted means no argument
    #[argh(positional)]
    arg: Option<String>,

    /// the version of the API to call (default: v1)
    #[argh(option, short = 'v', default = "\"v1\".into()")]
    version: String,

    /// send the call as a GET request with the argument in the query string
    #[argh(switch)]
    get: bool,

    /// token sent in the Authorization header
    #[argh(option)]
    token: Option<String>,

    /// token type sent with --token (default: ApiKey)
    #[argh(option, long = "token-type", default = "\"ApiKey\".into()")]
    token_type: String,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "atomic")]
/// run an atomic program on an arpc server
struct AtomicArgs {
    /// address of the server, with the http:// or https:// prefix
    #[argh(positional)]
    server_address: String,

    /// the instruction array as JSON
    #[argh(positional)]
    program: String,

    /// the version of the API to call (default: v1)
    #[argh(option, short = 'v', default = "\"v1\".into()")]
    version: String,

    /// token sent in the Authorization header
    #[argh(option)]
    token: Option<String>,

    /// token type sent with --token (default: ApiKey)
    #[argh(option, long = "token-type", default = "\"ApiKey\".into()")]
    token_type: String,
}

// Flags take priority over `ARPC_BIND` and `ARPC_MAX_BODY_BYTES`.
#[derive(FromArgs)]
#[argh(subcommand, name = "demo")]
/// serve the demo schema
struct DemoArgs {
    /// address to bind to (default: ARPC_BIND or 127.0.0.1:8080)
    #[argh(option, short = 'b')]
    bind: Option<String>,

    /// largest accepted request body in bytes (default: ARPC_MAX_BODY_BYTES or 10 MiB)
    #[argh(option, long = "max-body-bytes")]
    max_body_bytes: Option<usize>,

    /// key that authenticates as user `demo`; enables authentication
    #[argh(option, long = "api-key")]
    api_key: Option<String>,

    /// optional rate limit in requests per second per route and user
    ///
    /// Burst size is automatically set to 2x the rate.
    #[argh(option, long = "rate-limit-rps")]
    rate_limit_rps: Option<f64>,
}

impl DemoArgs {
    /// Builds the server configuration: environment first, flags on top.
    fn server_config(&self) -> Result<ServerConfig> {
        let mut config = ServerConfig::from_env().map_err(|e| anyhow::anyhow!(e))?;

        if let Some(bind) = &self.bind {
            let addr: SocketAddr = bind
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid bind address {}: {}", bind, e))?;
            config = config.with_bind(addr);
        }
        if let Some(max) = self.max_body_bytes {
            config = config.with_max_body_bytes(max);
        }

        config.validate().map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // call and atomic keep stdout clean for piping to other tools
    if matches!(cli.command, Commands::Demo(_)) {
        // Set default log level to INFO, but allow RUST_LOG env var to override
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    match cli.command {
        Commands::Call(args) => run_call(args).await,
        Commands::Atomic(args) => run_atomic(args).await,
        Commands::Demo(args) => run_demo(args).await,
    }
}

fn build_client(server_address: &str, version: &str, token_type: &str, token: Option<&str>) -> Result<ArpcClient> {
    validate_http_url(server_address, "server address")?;
    let mut client = ArpcClient::new(server_address, version)?;
    if let Some(token) = token {
        client = client.with_auth(token_type, token);
    }
    Ok(client)
}

fn parse_json(input: &str, what: &str) -> Result<Value> {
    serde_json::from_str(input).map_err(|e| anyhow::anyhow!("Invalid JSON in {}: {}", what, e))
}

/// Executes the `call` subcommand and prints the result as raw JSON.
async fn run_call(args: CallArgs) -> Result<()> {
    let client = build_client(&args.server_address, &args.version, &args.token_type, args.token.as_deref())?;
    let arg = args.arg.as_deref().map(|a| parse_json(a, "argument")).transpose()?;

    let result: Option<Value> = if args.get {
        client.query(&args.route, arg.as_ref()).await?
    } else {
        match &arg {
            Some(arg) => client.call(&args.route, arg).await?,
            None => client.call(&args.route, &()).await?,
        }
    };

    println!("{}", serde_json::to_string(&result.unwrap_or(Value::Null))?);
    Ok(())
}

/// Executes the `atomic` subcommand and prints the slots as raw JSON.
async fn run_atomic(args: AtomicArgs) -> Result<()> {
    let client = build_client(&args.server_address, &args.version, &args.token_type, args.token.as_deref())?;
    let program = parse_json(&args.program, "program")?;
    if !program.is_array() {
        anyhow::bail!("Program must be a JSON array of instructions");
    }

    let result = client.atomic_raw(&program).await?;
    println!("{}", serde_json::to_string(&result)?);
    Ok(())
}

async fn run_demo(args: DemoArgs) -> Result<()> {
    let config = args.server_config()?;

    let limiter = match args.rate_limit_rps {
        Some(rps) => {
            let limit = RateLimitConfig::per_second(rps);
            limit.validate().map_err(|e| anyhow::anyhow!("Invalid rate limit: {}", e))?;
            tracing::info!("Rate limiting enabled: {} requests per second", rps);
            Some(TokenBucketLimiter::new(limit).with_user_key(|user: &demo::DemoUser| user.clone()))
        }
        None => None,
    };
    if args.api_key.is_some() {
        tracing::info!("API key authentication enabled");
    }

    let schema = demo::schema(args.api_key.as_deref(), limiter);
    tracing::info!("Starting arpc demo server on {}", config.bind);

    let server = HttpServer::new(Arc::new(schema), config)?;
    server.run().await?;
    Ok(())
}

#[cfg(test)]
mod tests;
