//! Test harness that drives the router in-process.
//!
//! Each harness owns fresh in-memory stores, so tests never share state. The
//! router is called with `tower::ServiceExt::oneshot`; no socket is bound.

use axum::body::{to_bytes, Body, Bytes};
use axum::http::{HeaderMap, Method, Request, StatusCode};
use axum::Router;
use chassis::aggregate::WidgetSpec;
use chassis::clock::system_clock;
use chassis::inbound::InboundOutcome;
use chassis::transport::EventTransport;
use fleet_server::kernel::{InMemoryStores, ServerDeps};
use fleet_server::server::build_app;
use fleet_server::Config;
use serde_json::Value;
use test_context::AsyncTestContext;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

/// Test harness over a fully wired server.
///
/// # Example using test-context
///
/// ```ignore
/// use test_context::test_context;
///
/// #[test_context(TestHarness)]
/// #[tokio::test]
/// async fn my_test(ctx: &TestHarness) {
///     let response = ctx.send(Call::get("/v1/dashboard").as_actor("c1", "creator")).await;
///     assert_eq!(response.status, StatusCode::OK);
/// }
/// ```
pub struct TestHarness {
    pub deps: ServerDeps,
    /// The concrete stores behind `deps`, for assertions.
    pub stores: InMemoryStores,
    pub shutdown: CancellationToken,
    router: Router,
}

impl AsyncTestContext for TestHarness {
    async fn setup() -> Self {
        Self::new()
    }

    async fn teardown(self) {
        self.shutdown.cancel();
    }
}

impl TestHarness {
    /// Harness with the default creator dashboard.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Harness whose dashboard is composed from `widgets`.
    pub fn with_widgets(widgets: Vec<WidgetSpec>) -> Self {
        Self::build(Some(widgets))
    }

    fn build(widgets: Option<Vec<WidgetSpec>>) -> Self {
        // Respect RUST_LOG; try_init since every test builds a harness.
        // Run tests with: RUST_LOG=debug cargo test -- --nocapture
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let stores = InMemoryStores::new();
        let deps = ServerDeps::assemble(Config::default(), system_clock(), &stores, widgets);
        let shutdown = CancellationToken::new();
        let router = build_app(deps.clone(), shutdown.clone());
        Self {
            deps,
            stores,
            shutdown,
            router,
        }
    }

    pub async fn send(&self, call: Call) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(call.into_request())
            .await
            .expect("router is infallible");

        let status = response.status();
        let headers = response.headers().clone();
        let raw = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("Failed to read response body");
        let body = if raw.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&raw).expect("Response body is not JSON")
        };
        TestResponse {
            status,
            headers,
            body,
            raw,
        }
    }

    /// Relay pending outbox rows, then run everything on the inbound
    /// transport through the pipeline. Returns the inbound outcomes in order.
    pub async fn settle(&self) -> Vec<InboundOutcome> {
        let cancel = CancellationToken::new();
        self.deps
            .outbox_relay()
            .flush_once(&cancel)
            .await
            .expect("Failed to flush outbox");

        let mut outcomes = Vec::new();
        while let Ok(raw) = self.deps.transport.poll(&cancel).await {
            outcomes.push(
                self.deps
                    .inbound
                    .process(raw, &cancel)
                    .await
                    .expect("Failed to process inbound event"),
            );
        }
        outcomes
    }
}

/// A request under construction.
pub struct Call {
    method: Method,
    uri: String,
    headers: Vec<(&'static str, String)>,
    body: Option<Value>,
}

impl Call {
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(uri: impl Into<String>) -> Self {
        Self::new(Method::GET, uri)
    }

    pub fn post(uri: impl Into<String>) -> Self {
        Self::new(Method::POST, uri)
    }

    pub fn put(uri: impl Into<String>) -> Self {
        Self::new(Method::PUT, uri)
    }

    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    pub fn as_actor(self, subject: &str, role: &str) -> Self {
        self.header("authorization", format!("Bearer {subject}"))
            .header("x-actor-role", role)
    }

    pub fn key(self, key: &str) -> Self {
        self.header("idempotency-key", key)
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    fn into_request(self) -> Request<Body> {
        let mut builder = Request::builder().method(self.method).uri(self.uri);
        for (name, value) in self.headers {
            builder = builder.header(name, value);
        }
        let body = match self.body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        builder.body(body).expect("Failed to build request")
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
    /// Body bytes exactly as sent.
    pub raw: Bytes,
}

impl TestResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn error_code(&self) -> &str {
        self.body["error"]["code"].as_str().unwrap_or_default()
    }

    pub fn data(&self) -> &Value {
        &self.body["data"]
    }
}
