//! HTTP Client Integration Tests
//!
//! These tests run the client against a small hyper server that answers with
//! canned arpc responses, and verify:
//! - `POST` and `GET` calls with MessagePack arguments
//! - `204` responses mapping to `None`
//! - Error envelopes (single and arrays) mapping to `ArpcError::Remote`
//! - Rejection of responses without the `X-Is-Arpc` marker
//! - The `Authorization` header
//!
//! Test URLs use `http://127.0.0.1:PORT`.

use std::convert::Infallible;

use arpc_client::ArpcClient;
use arpc_common::protocol::error::ArpcError;
use arpc_common::{codes, AtomicItem, ErrorEnvelope, HttpTransport, MsgpackCodec, RpcError, RpcQuery};
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::{json, Value};
use tokio::net::TcpListener;

/// Test server that runs on a separate task
struct TestServer {
    addr: String,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestServer {
    /// Starts a new test server on a random port
    async fn new() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        let (stream, _) = match result {
                            Ok(accepted) => accepted,
                            Err(err) => {
                                eprintln!("Accept error: {}", err);
                                continue;
                            }
                        };
                        let io = TokioIo::new(stream);
                        tokio::spawn(async move {
                            if let Err(err) = http1::Builder::new()
                                .serve_connection(io, service_fn(Self::handle))
                                .await
                            {
                                eprintln!("Server error: {}", err);
                            }
                        });
                    }
                    _ = &mut shutdown_rx => {
                        break;
                    }
                }
            }
        });

        Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Answers by route name:
    /// - `echo`: the argument (body for POST, `arg` for GET)
    /// - `nothing`: 204
    /// - `whoami`: the Authorization header as a string
    /// - `fail`: a `ROUTE_NOT_FOUND` envelope
    /// - `atomic`: the program length in every slot, or two envelopes for an empty program
    /// - `plain`: a 200 without the arpc marker
    async fn handle(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
        let query = RpcQuery::parse(req.uri().query()).unwrap();
        let method = req.method().clone();
        let authorization = req
            .headers()
            .get(hyper::header::AUTHORIZATION)
            .map(|v| v.to_str().unwrap().to_string());
        let body = req.into_body().collect().await.unwrap().to_bytes();

        let arg = if method == Method::GET {
            query.decode_arg().unwrap().map(|b| MsgpackCodec::decode_value(&b).unwrap())
        } else if body.is_empty() {
            None
        } else {
            Some(MsgpackCodec::decode_value(&body).unwrap())
        };

        let response = match query.route.as_str() {
            "echo" => HttpTransport::success(&arg.unwrap_or(Value::Null)),
            "nothing" => HttpTransport::success(&Value::Null),
            "whoami" => HttpTransport::success(&json!(authorization)),
            "fail" => HttpTransport::error(&RpcError::bad_request(codes::ROUTE_NOT_FOUND, "Route 'fail' not found")),
            "atomic" => match arg {
                Some(Value::Array(items)) if !items.is_empty() => {
                    HttpTransport::success(&Value::Array(vec![json!(items.len()); items.len()]))
                }
                _ => HttpTransport::envelopes(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    &[
                        RpcError::internal().to_envelope(),
                        ErrorEnvelope::custom("SoldOut", "gone", None),
                    ],
                ),
            },
            _ => Response::new(Full::new(Bytes::from_static(b"not arpc"))),
        };
        Ok(response)
    }

    fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

// ============================================================================
// Basic Functionality Tests
// ============================================================================

#[tokio::test]
async fn test_client_post_call() {
    let server = TestServer::new().await;
    let client = ArpcClient::new(server.base_url(), "v1").unwrap();

    let arg = json!({"echo": "hello", "n": [1, 2, 3]});
    let result: Option<Value> = client.call("echo", &arg).await.unwrap();
    assert_eq!(result, Some(arg));
}

#[tokio::test]
async fn test_client_get_query() {
    let server = TestServer::new().await;
    let client = ArpcClient::new(server.base_url(), "v1").unwrap();

    let result: Option<String> = client.query("echo", Some("hello")).await.unwrap();
    assert_eq!(result.as_deref(), Some("hello"));

    let result: Option<Value> = client.query::<Value, Value>("echo", None).await.unwrap();
    assert_eq!(result, None);
}

#[tokio::test]
async fn test_client_no_content_is_none() {
    let server = TestServer::new().await;
    let client = ArpcClient::new(server.base_url(), "v1").unwrap();

    let result: Option<Value> = client.call("nothing", &json!(1)).await.unwrap();
    assert_eq!(result, None);
}

#[tokio::test]
async fn test_client_sends_authorization() {
    let server = TestServer::new().await;
    let client = ArpcClient::new(server.base_url(), "v1").unwrap();

    let anonymous: Option<Value> = client.call("whoami", &json!(null)).await.unwrap();
    assert_eq!(anonymous, None);

    let authed = client.clone().with_auth("Bearer", "abc");
    let header: Option<String> = authed.call("whoami", &json!(null)).await.unwrap();
    assert_eq!(header.as_deref(), Some("Bearer abc"));
}

#[tokio::test]
async fn test_client_concurrent_calls() {
    let server = TestServer::new().await;
    let client = ArpcClient::new(server.base_url(), "v1").unwrap();
    let client2 = client.clone();

    let (a, b) = tokio::join!(
        client.call::<_, i64>("echo", &1),
        client2.call::<_, i64>("echo", &2)
    );
    assert_eq!(a.unwrap(), Some(1));
    assert_eq!(b.unwrap(), Some(2));
}

// ============================================================================
// Atomic Programs
// ============================================================================

#[tokio::test]
async fn test_client_atomic() {
    let server = TestServer::new().await;
    let client = ArpcClient::new(server.base_url(), "v1").unwrap();

    let program = vec![
        AtomicItem::call("echo.string", json!("hello")).assign("result".into()),
        AtomicItem::fetch("result", "echo.string"),
    ];
    let result = client.atomic(&program).await.unwrap();
    assert_eq!(result, Some(vec![json!(2), json!(2)]));
}

#[tokio::test]
async fn test_client_atomic_multiple_failures() {
    let server = TestServer::new().await;
    let client = ArpcClient::new(server.base_url(), "v1").unwrap();

    match client.atomic_raw(&json!([])).await.unwrap_err() {
        ArpcError::Remote { status, envelopes } => {
            assert_eq!(status, 500);
            let names: Vec<&str> = envelopes.iter().map(|e| e.name.as_str()).collect();
            assert_eq!(names, vec!["InternalServerError", "SoldOut"]);
            assert!(!envelopes[1].built_in);
        }
        other => panic!("unexpected error: {}", other),
    }
}

// ============================================================================
// Error Handling Tests
// ============================================================================

#[tokio::test]
async fn test_client_remote_error() {
    let server = TestServer::new().await;
    let client = ArpcClient::new(server.base_url(), "v1").unwrap();

    let err = client.call::<_, Value>("fail", &json!(1)).await.unwrap_err();
    match &err {
        ArpcError::Remote { status, envelopes } => {
            assert_eq!(*status, 400);
            assert_eq!(envelopes.len(), 1);
            assert_eq!(envelopes[0].code.as_deref(), Some(codes::ROUTE_NOT_FOUND));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(err.to_string().contains("ROUTE_NOT_FOUND"));
}

#[tokio::test]
async fn test_client_rejects_non_arpc_response() {
    let server = TestServer::new().await;
    let client = ArpcClient::new(server.base_url(), "v1").unwrap();

    let err = client.call::<_, Value>("plain", &json!(1)).await.unwrap_err();
    assert!(matches!(err, ArpcError::NotArpc(200)));
}

#[tokio::test]
async fn test_client_connection_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = ArpcClient::new(format!("http://{}", addr), "v1").unwrap();
    let err = client.call::<_, Value>("echo", &json!(1)).await.unwrap_err();
    assert!(matches!(err, ArpcError::Transport(_)));
}
