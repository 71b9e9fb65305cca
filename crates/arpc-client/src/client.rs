use std::time::Duration;

use arpc_common::auth::Authorization;
use arpc_common::protocol::error::{ArpcError, Result};
use arpc_common::transport::{HttpTransport, MSGPACK_CONTENT_TYPE};
use arpc_common::{AtomicItem, ErrorEnvelope, MsgpackCodec, RpcQuery, ATOMIC_ROUTES};
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::header::{AUTHORIZATION, CONTENT_TYPE};
use hyper::{Method, Request, StatusCode};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Default time allowed for one request, response body included
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Checks that `url` starts with `http://` or `https://`.
///
/// `description` names the URL in the error, e.g. "server URL".
pub fn validate_http_url(url: &str, description: &str) -> Result<()> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(ArpcError::Config(format!(
            "Invalid {}: '{}' must start with http:// or https://",
            description, url
        )))
    }
}

/// arpc client for one server and API version
///
/// Uses hyper's pooled client, so clones share connections and calls can run
/// concurrently.
///
/// # Example
///
/// ```no_run
/// use arpc_client::ArpcClient;
/// use serde_json::json;
///
/// # async fn run() -> arpc_common::protocol::error::Result<()> {
/// let client = ArpcClient::new("http://127.0.0.1:8080", "v1")?.with_auth("ApiKey", "secret");
/// let greeting: Option<String> = client.call("greet", &json!("ada")).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ArpcClient {
    base_url: String,
    version: String,
    authorization: Option<String>,
    timeout: Duration,
    http: Client<HttpConnector, Full<Bytes>>,
}

impl ArpcClient {
    /// Create a client for `base_url` (e.g. `http://127.0.0.1:8080`) that
    /// calls routes of `version`.
    pub fn new(base_url: impl Into<String>, version: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into();
        validate_http_url(&base_url, "server URL")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            version: version.into(),
            authorization: None,
            timeout: DEFAULT_TIMEOUT,
            http: Client::builder(TokioExecutor::new()).build_http(),
        })
    }

    /// Send `Authorization: <token_type> <token>` with every request.
    pub fn with_auth(mut self, token_type: &str, token: &str) -> Self {
        self.authorization = Some(Authorization::header_value(token_type, token));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Call a route with the argument in a `POST` body.
    ///
    /// Returns `None` when the route returned null (`204`).
    pub async fn call<I, O>(&self, route: &str, arg: &I) -> Result<Option<O>>
    where
        I: Serialize + ?Sized,
        O: DeserializeOwned,
    {
        let body = MsgpackCodec::encode(arg)?;
        let bytes = self.send(Method::POST, RpcQuery::new(route, &self.version), body).await?;
        decode_optional(bytes)
    }

    /// Call a route with `GET`, the argument percent-encoded in the query string.
    pub async fn query<I, O>(&self, route: &str, arg: Option<&I>) -> Result<Option<O>>
    where
        I: Serialize + ?Sized,
        O: DeserializeOwned,
    {
        let mut query = RpcQuery::new(route, &self.version);
        if let Some(arg) = arg {
            query = query.with_arg_bytes(&MsgpackCodec::encode(arg)?);
        }
        let bytes = self.send(Method::GET, query, Vec::new()).await?;
        decode_optional(bytes)
    }

    /// Run an atomic program.
    ///
    /// Returns one slot per instruction, or `None` when every slot was null.
    pub async fn atomic(&self, program: &[AtomicItem]) -> Result<Option<Vec<Value>>> {
        self.atomic_raw(&Value::Array(program.iter().map(AtomicItem::to_wire).collect()))
            .await
    }

    /// Run an atomic program given in its wire form.
    pub async fn atomic_raw(&self, program: &Value) -> Result<Option<Vec<Value>>> {
        self.call(ATOMIC_ROUTES[0], program).await
    }

    async fn send(&self, method: Method, query: RpcQuery, body: Vec<u8>) -> Result<Option<Bytes>> {
        let uri = format!("{}/?{}", self.base_url, query.to_query_string());
        tracing::debug!("{} {}", method, uri);

        let mut builder = Request::builder().method(method.clone()).uri(&uri);
        if method != Method::GET {
            builder = builder.header(CONTENT_TYPE, MSGPACK_CONTENT_TYPE);
        }
        if let Some(authorization) = &self.authorization {
            builder = builder.header(AUTHORIZATION, authorization);
        }
        let request = builder.body(Full::new(Bytes::from(body)))?;

        let exchange = async {
            let response = self
                .http
                .request(request)
                .await
                .map_err(|e| ArpcError::Transport(format!("HTTP request failed: {}", e)))?;
            let status = response.status();
            let is_arpc = HttpTransport::is_arpc(response.headers());
            let bytes = response
                .into_body()
                .collect()
                .await
                .map_err(|e| ArpcError::Transport(format!("Failed to read response: {}", e)))?
                .to_bytes();
            Ok::<_, ArpcError>((status, is_arpc, bytes))
        };

        let (status, is_arpc, bytes) = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| ArpcError::Transport(format!("Request timed out after {:?}", self.timeout)))??;

        interpret(status, is_arpc, bytes)
    }
}

/// Turns a raw response into the success body or the remote error.
fn interpret(status: StatusCode, is_arpc: bool, bytes: Bytes) -> Result<Option<Bytes>> {
    if !is_arpc {
        return Err(ArpcError::NotArpc(status.as_u16()));
    }

    if status.is_success() {
        if status == StatusCode::NO_CONTENT || bytes.is_empty() {
            return Ok(None);
        }
        return Ok(Some(bytes));
    }

    Err(ArpcError::Remote {
        status: status.as_u16(),
        envelopes: decode_envelopes(&bytes)?,
    })
}

/// Decodes an error body: one envelope, or an array of them.
fn decode_envelopes(bytes: &[u8]) -> Result<Vec<ErrorEnvelope>> {
    match MsgpackCodec::decode_value(bytes)? {
        Value::Array(items) => items
            .into_iter()
            .map(|item| serde_json::from_value(item).map_err(ArpcError::from))
            .collect(),
        single => Ok(vec![serde_json::from_value(single)?]),
    }
}

fn decode_optional<O: DeserializeOwned>(bytes: Option<Bytes>) -> Result<Option<O>> {
    match bytes {
        Some(bytes) => Ok(Some(MsgpackCodec::decode(&bytes)?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arpc_common::{codes, RpcError};
    use serde_json::json;

    #[test]
    fn test_validate_http_url() {
        assert!(validate_http_url("http://127.0.0.1:8080", "server URL").is_ok());
        assert!(validate_http_url("https://example.com", "server URL").is_ok());

        let err = validate_http_url("127.0.0.1:8080", "server URL").unwrap_err();
        assert!(err.to_string().contains("must start with http:// or https://"));
    }

    #[tokio::test]
    async fn test_client_creation() {
        let client = ArpcClient::new("http://127.0.0.1:8080/", "v1").unwrap();
        assert_eq!(client.base_url(), "http://127.0.0.1:8080");
        assert_eq!(client.version(), "v1");
        assert!(ArpcClient::new("localhost:8080", "v1").is_err());
    }

    #[tokio::test]
    async fn test_with_auth_builds_header() {
        let client = ArpcClient::new("http://127.0.0.1:8080", "v1")
            .unwrap()
            .with_auth("ApiKey", "secret");
        assert_eq!(client.authorization.as_deref(), Some("ApiKey secret"));
    }

    #[test]
    fn test_interpret_requires_marker() {
        let err = interpret(StatusCode::OK, false, Bytes::new()).unwrap_err();
        assert!(matches!(err, ArpcError::NotArpc(200)));
    }

    #[test]
    fn test_interpret_no_content() {
        assert!(interpret(StatusCode::NO_CONTENT, true, Bytes::new()).unwrap().is_none());
    }

    #[test]
    fn test_interpret_single_envelope() {
        let envelope = RpcError::bad_request(codes::ROUTE_NOT_FOUND, "Route 'x' not found").to_envelope();
        let bytes = Bytes::from(MsgpackCodec::encode(&envelope).unwrap());
        match interpret(StatusCode::BAD_REQUEST, true, bytes).unwrap_err() {
            ArpcError::Remote { status, envelopes } => {
                assert_eq!(status, 400);
                assert_eq!(envelopes, vec![envelope]);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_interpret_envelope_array() {
        let envelopes = vec![
            RpcError::internal().to_envelope(),
            ErrorEnvelope::custom("SoldOut", "gone", Some(json!({"id": 1}))),
        ];
        let bytes = Bytes::from(MsgpackCodec::encode(&envelopes).unwrap());
        match interpret(StatusCode::INTERNAL_SERVER_ERROR, true, bytes).unwrap_err() {
            ArpcError::Remote { status, envelopes: decoded } => {
                assert_eq!(status, 500);
                assert_eq!(decoded, envelopes);
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}
