//! Single entry point for outbound HTTP calls.
//!
//! [`HttpClient`] assembles requests, injects credentials and SDK headers,
//! retries transient failures, honours cancellation and turns unsuccessful
//! responses into crate [`Error`]s through a per-service error parser.

mod retry;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::credential::TokenSource;
use crate::{Error, ErrorKind, HttpResponse, Result};

pub(crate) use retry::RetryConfig;
use retry::Outcome;

/// Default timeout applied to every individual attempt.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Turns an unsuccessful response into an error.
pub(crate) type ErrorParser = fn(&Response) -> Error;

/// Decides whether a response counts as a success.
pub(crate) type SuccessFn = fn(&Response) -> bool;

/// Any 2xx status.
pub(crate) fn has_success_status(resp: &Response) -> bool {
    resp.status.is_success()
}

/// Exactly `200 OK`.
pub(crate) fn has_status_ok(resp: &Response) -> bool {
    resp.status == StatusCode::OK
}

/// Request body.
#[derive(Clone, Debug)]
pub(crate) enum Body {
    Json(Value),
    Raw {
        content_type: String,
        bytes: Vec<u8>,
    },
}

/// Per-request modifiers.
#[derive(Clone, Debug)]
pub(crate) enum HttpOption {
    Header(&'static str, String),
    Query(String, String),
}

/// An outbound request.
#[derive(Clone, Debug)]
pub(crate) struct Request {
    pub(crate) method: Method,
    pub(crate) url: String,
    pub(crate) body: Option<Body>,
    pub(crate) opts: Vec<HttpOption>,
    pub(crate) success: Option<SuccessFn>,
}

impl Request {
    pub(crate) fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            body: None,
            opts: Vec::new(),
            success: None,
        }
    }

    pub(crate) fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub(crate) fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub(crate) fn json(mut self, body: impl serde::Serialize) -> Result<Self> {
        self.body = Some(Body::Json(serde_json::to_value(body)?));
        Ok(self)
    }

    pub(crate) fn raw(mut self, content_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.body = Some(Body::Raw {
            content_type: content_type.into(),
            bytes,
        });
        self
    }

    pub(crate) fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.opts.push(HttpOption::Header(name, value.into()));
        self
    }

    pub(crate) fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.opts.push(HttpOption::Query(name.into(), value.into()));
        self
    }

    pub(crate) fn success_fn(mut self, success: SuccessFn) -> Self {
        self.success = Some(success);
        self
    }
}

/// A fully buffered response.
#[derive(Clone, Debug)]
pub(crate) struct Response {
    pub(crate) status: StatusCode,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Vec<u8>,
}

impl Response {
    pub(crate) fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|err| {
            Error::new(
                ErrorKind::Unknown,
                format!("error while parsing response: {err}"),
            )
            .with_response(self.to_http_response())
            .with_source(err)
        })
    }

    pub(crate) fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub(crate) fn to_http_response(&self) -> HttpResponse {
        HttpResponse {
            status: self.status,
            headers: self.headers.clone(),
            body: self.body.clone(),
        }
    }
}

#[derive(Deserialize)]
struct PlatformErrorEnvelope {
    error: PlatformError,
}

#[derive(Deserialize)]
struct PlatformError {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    details: Vec<Value>,
}

/// Default error parser: maps the HTTP status, then lets a GCP error envelope
/// (`{"error": {"status", "message", "details"}}`) override kind and message.
pub(crate) fn platform_error(resp: &Response) -> Error {
    let mut kind = ErrorKind::from_http_status(resp.status);
    let mut message = format!(
        "unexpected http response with status: {}; body: {}",
        resp.status.as_u16(),
        resp.text()
    );
    let mut details = Vec::new();

    if let Ok(envelope) = serde_json::from_slice::<PlatformErrorEnvelope>(&resp.body) {
        if let Some(platform_kind) = ErrorKind::from_platform_status(&envelope.error.status) {
            kind = platform_kind;
        }
        if !envelope.error.message.is_empty() {
            message = envelope.error.message;
        }
        details = envelope.error.details;
    }

    Error::new(kind, message)
        .with_response(resp.to_http_response())
        .with_details(details)
}

fn transport_error(err: reqwest::Error) -> Error {
    let kind = if err.is_timeout() {
        ErrorKind::DeadlineExceeded
    } else {
        ErrorKind::NetworkError
    };
    Error::new(kind, format!("failed to establish a connection: {err}")).with_source(err)
}

fn cancelled() -> Error {
    Error::new(ErrorKind::Cancelled, "operation was cancelled")
}

/// HTTP client shared by all services.
///
/// Cloning is cheap; the connection pool and token cache are shared. Retry
/// settings and headers are read-only once the client is built.
#[derive(Clone)]
pub(crate) struct HttpClient {
    http: reqwest::Client,
    tokens: Option<Arc<dyn TokenSource>>,
    headers: HeaderMap,
    retry: RetryConfig,
    error_parser: ErrorParser,
    success: SuccessFn,
    timeout: Duration,
    cancel: Option<CancellationToken>,
}

impl HttpClient {
    pub(crate) fn new(http: reqwest::Client, tokens: Option<Arc<dyn TokenSource>>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("x-goog-api-client"),
            header_value(&format!("gl-rust fire-admin/{}", crate::SDK_VERSION)),
        );
        headers.insert(
            HeaderName::from_static("x-client-version"),
            header_value(&format!("Rust/Admin/{}", crate::SDK_VERSION)),
        );

        Self {
            http,
            tokens,
            headers,
            retry: RetryConfig::default(),
            error_parser: platform_error,
            success: has_success_status,
            timeout: DEFAULT_TIMEOUT,
            cancel: None,
        }
    }

    #[must_use]
    pub(crate) fn with_header(mut self, name: &'static str, value: &str) -> Self {
        self.headers
            .insert(HeaderName::from_static(name), header_value(value));
        self
    }

    #[must_use]
    pub(crate) fn with_error_parser(mut self, parser: ErrorParser) -> Self {
        self.error_parser = parser;
        self
    }

    #[must_use]
    pub(crate) fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub(crate) fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub(crate) fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub(crate) fn cancellation(&self) -> Option<&CancellationToken> {
        self.cancel.as_ref()
    }

    /// Runs `fut` unless the client's cancellation token fires first.
    pub(crate) async fn guard<F: Future>(&self, fut: F) -> Result<F::Output> {
        match &self.cancel {
            None => Ok(fut.await),
            Some(token) => {
                if token.is_cancelled() {
                    return Err(cancelled());
                }
                tokio::select! {
                    biased;
                    () = token.cancelled() => Err(cancelled()),
                    output = fut => Ok(output),
                }
            }
        }
    }

    async fn attempt(&self, req: &Request) -> Result<Response> {
        let mut builder = self
            .http
            .request(req.method.clone(), &req.url)
            .headers(self.headers.clone())
            .timeout(self.timeout);

        if let Some(tokens) = &self.tokens {
            let token = tokens.token().await?;
            builder = builder.bearer_auth(token.token());
        }

        match &req.body {
            Some(Body::Json(value)) => builder = builder.json(value),
            Some(Body::Raw {
                content_type,
                bytes,
            }) => {
                builder = builder
                    .header(CONTENT_TYPE, content_type.as_str())
                    .body(bytes.clone());
            }
            None => {}
        }

        for opt in &req.opts {
            builder = match opt {
                HttpOption::Header(name, value) => builder.header(*name, value.as_str()),
                HttpOption::Query(name, value) => builder.query(&[(name, value)]),
            };
        }

        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(transport_error)?.to_vec();

        Ok(Response {
            status,
            headers,
            body,
        })
    }

    /// Sends the request, retrying per the retry policy, and returns the
    /// response if it passes the success predicate.
    pub(crate) async fn send(&self, req: &Request) -> Result<Response> {
        let mut attempt = 0;
        let result = loop {
            let result = self.guard(self.attempt(req)).await?;

            let delay = match &result {
                Ok(resp) => self.retry.next_delay(
                    attempt,
                    &req.method,
                    &Outcome::Status(resp.status, &resp.headers),
                ),
                Err(err)
                    if matches!(
                        err.kind(),
                        ErrorKind::NetworkError | ErrorKind::DeadlineExceeded
                    ) =>
                {
                    self.retry
                        .next_delay(attempt, &req.method, &Outcome::TransportError)
                }
                Err(_) => None,
            };

            match delay {
                Some(delay) => {
                    debug!(attempt, ?delay, url = %req.url, "Retrying request");
                    self.guard(tokio::time::sleep(delay)).await?;
                    attempt += 1;
                }
                None => break result,
            }
        };

        if attempt > 0 {
            if let Err(err) = &result {
                warn!(attempts = attempt + 1, url = %req.url, "Request failed after retries: {err}");
            }
        }

        let response = result?;
        let success = req.success.unwrap_or(self.success);
        if success(&response) {
            Ok(response)
        } else {
            Err((self.error_parser)(&response))
        }
    }

    /// Sends the request and decodes a successful JSON response.
    pub(crate) async fn send_json<T: DeserializeOwned>(&self, req: &Request) -> Result<T> {
        self.send(req).await?.json()
    }
}

fn header_value(value: &str) -> HeaderValue {
    HeaderValue::from_str(value).unwrap_or_else(|_| HeaderValue::from_static(""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::StaticTokenSource;
    use httpmock::Method::{GET, POST};
    use httpmock::MockServer;
    use serde_json::json;

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            base_delay: Duration::from_millis(1),
            ..RetryConfig::default()
        }
    }

    fn client() -> HttpClient {
        HttpClient::new(
            reqwest::Client::new(),
            Some(Arc::new(StaticTokenSource::new("test-token"))),
        )
        .with_retry(fast_retry())
    }

    #[actix_rt::test]
    async fn sends_auth_and_version_headers() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/resource")
                    .header("Authorization", "Bearer test-token")
                    .header(
                        "X-Client-Version",
                        format!("Rust/Admin/{}", crate::SDK_VERSION),
                    )
                    .header_exists("X-Goog-Api-Client")
                    .query_param("key", "value")
                    .json_body(json!({"hello": "world"}));
                then.status(200).json_body(json!({"ok": true}));
            })
            .await;

        let req = Request::post(server.url("/resource"))
            .json(json!({"hello": "world"}))
            .unwrap()
            .query("key", "value");
        let value: Value = client().send_json(&req).await.unwrap();
        assert_eq!(value, json!({"ok": true}));
        mock.assert_async().await;
    }

    #[actix_rt::test]
    async fn classifies_platform_error_envelope() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/missing");
                then.status(404).json_body(json!({
                    "error": {
                        "status": "FAILED_PRECONDITION",
                        "message": "precondition failed",
                        "details": [{"@type": "type.googleapis.com/Example"}],
                    }
                }));
            })
            .await;

        let err = client()
            .send(&Request::get(server.url("/missing")))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FailedPrecondition);
        assert_eq!(err.message(), "precondition failed");
        assert_eq!(err.details().len(), 1);
        assert_eq!(err.response().unwrap().status, StatusCode::NOT_FOUND);
        assert!(err.to_string().starts_with("http error status: 404;"));
    }

    #[actix_rt::test]
    async fn falls_back_to_http_status_mapping() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/plain");
                then.status(401).body("not json");
            })
            .await;

        let err = client()
            .send(&Request::get(server.url("/plain")))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthenticated);
        assert!(err.message().contains("not json"));
    }

    #[actix_rt::test]
    async fn retries_at_most_eight_attempts() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/unavailable");
                then.status(503).body("{}");
            })
            .await;

        let err = client()
            .send(&Request::post(server.url("/unavailable")))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
        assert_eq!(mock.hits_async().await, 8);
    }

    #[actix_rt::test]
    async fn does_not_retry_client_errors() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/bad");
                then.status(400).body("{}");
            })
            .await;

        let err = client()
            .send(&Request::post(server.url("/bad")))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(mock.hits_async().await, 1);
    }

    #[actix_rt::test]
    async fn retries_network_errors() {
        // Nothing listens on port 9; every attempt fails to connect.
        let http = client().with_retry(RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            ..RetryConfig::default()
        });
        let err = http
            .send(&Request::get("http://127.0.0.1:9/"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NetworkError);
    }

    #[actix_rt::test]
    async fn success_predicate_can_be_overridden() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/accepted");
                then.status(202).body("{}");
            })
            .await;

        let default = client()
            .send(&Request::get(server.url("/accepted")))
            .await;
        assert!(default.is_ok());

        let strict = client()
            .send(&Request::get(server.url("/accepted")).success_fn(has_status_ok))
            .await;
        assert!(strict.is_err());
    }

    #[actix_rt::test]
    async fn cancelled_token_aborts_before_sending() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/never");
                then.status(200).body("{}");
            })
            .await;

        let token = CancellationToken::new();
        token.cancel();
        let err = client()
            .with_cancellation(token)
            .send(&Request::get(server.url("/never")))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(mock.hits_async().await, 0);
    }

    #[actix_rt::test]
    async fn cancellation_interrupts_backoff() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/slow");
                then.status(503).body("{}");
            })
            .await;

        let token = CancellationToken::new();
        let http = client()
            .with_retry(RetryConfig {
                base_delay: Duration::from_secs(30),
                ..RetryConfig::default()
            })
            .with_cancellation(token.clone());

        let canceller = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            token.cancel();
        };
        let req = Request::post(server.url("/slow"));
        let (result, ()) = tokio::join!(http.send(&req), canceller);

        assert_eq!(result.unwrap_err().kind(), ErrorKind::Cancelled);
        assert_eq!(mock.hits_async().await, 1);
    }
}
