//! Forwarding engine.
//!
//! # Request Lifecycle
//! ```text
//! Received ─▶ PreFilterCheck ─▶ HeaderRewriteIn ─▶ Forwarding ─▶ HeaderRewriteOut ─▶ Writing ─▶ PostFilterRun ─▶ Done
//!    │              │                                   │
//!    └──────────────┴───────────────────────────────────┴──▶ RejectedOrFailed (error response)
//! ```
//!
//! # Design Decisions
//! - The engine is immutable and shared via `Arc` by every connection
//! - The upstream outcome is a `Result`; the response is only touched on `Ok`
//! - One deadline is fixed on receipt; time spent in pre-call filters counts
//!   against the upstream call
//! - The body is streamed through `ExchangeBody`; post-call filters run when
//!   it is released, so they can never affect what the caller received
//! - No retries

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{uri::Scheme, Request, Response, Uri};
use axum::response::IntoResponse;
use tokio::time::Instant;

use crate::error::ProxyError;
use crate::filters::{Exchange, FilterChain, RequestContext};
use crate::http::body::{CompletionHook, ExchangeBody};
use crate::http::request::request_id;
use crate::http::upstream::Upstream;
use crate::identity::ProxyIdentity;
use crate::observability::metrics;
use crate::security::headers::{
    append_forwarding_hop, append_via, forwarding_token, strip_hop_headers,
};

/// Forwards requests to the origin named by their target URI.
pub struct ForwardingEngine {
    identity: ProxyIdentity,
    filters: Arc<FilterChain>,
    upstream: Arc<dyn Upstream>,
    upstream_timeout: Duration,
}

impl ForwardingEngine {
    pub fn new(
        identity: ProxyIdentity,
        filters: FilterChain,
        upstream: Arc<dyn Upstream>,
        upstream_timeout: Duration,
    ) -> Self {
        Self {
            identity,
            filters: Arc::new(filters),
            upstream,
            upstream_timeout,
        }
    }

    pub fn identity(&self) -> &ProxyIdentity {
        &self.identity
    }

    pub fn filters(&self) -> &FilterChain {
        &self.filters
    }

    /// Forward `request`, turning any failure into an error response.
    pub async fn handle(&self, request: Request<Body>, peer: SocketAddr) -> Response<Body> {
        let received_at = Instant::now();
        let request_id = request_id(request.headers()).to_string();
        let method = request.method().clone();
        let uri = request.uri().clone();

        match self.forward(request, peer).await {
            Ok(response) => response,
            Err(err) => {
                let status = err.status();
                if status.is_server_error() {
                    tracing::error!(
                        request_id = %request_id,
                        method = %method,
                        uri = %uri,
                        peer = %peer,
                        status = status.as_u16(),
                        kind = err.kind(),
                        error = %err,
                        "Request failed"
                    );
                } else {
                    tracing::warn!(
                        request_id = %request_id,
                        method = %method,
                        uri = %uri,
                        peer = %peer,
                        status = status.as_u16(),
                        kind = err.kind(),
                        error = %err,
                        "Request rejected"
                    );
                }
                metrics::record_rejection(err.kind());
                metrics::record_request(method.as_str(), status.as_u16(), err.kind(), received_at);
                err.into_response()
            }
        }
    }

    /// Run the full lifecycle for one request.
    pub async fn forward(
        &self,
        request: Request<Body>,
        peer: SocketAddr,
    ) -> Result<Response<Body>, ProxyError> {
        let received_at = Instant::now();
        let deadline = received_at + self.upstream_timeout;
        let (mut parts, body) = request.into_parts();
        let request_id = request_id(&parts.headers).to_string();

        // Received
        validate_target(&parts.uri)?;

        // PreFilterCheck
        let ctx = RequestContext {
            request_id: &request_id,
            method: &parts.method,
            uri: &parts.uri,
            headers: &parts.headers,
            peer,
            received_at,
            deadline,
        };
        self.filters.run_pre_call(&ctx).await?;

        // HeaderRewriteIn
        strip_hop_headers(&mut parts.headers);
        append_forwarding_hop(&mut parts.headers, &forwarding_token(peer));
        append_via(&mut parts.headers, &self.identity, parts.version);

        let inbound_version = parts.version;
        let method = parts.method.clone();
        let uri = parts.uri.clone();

        tracing::debug!(
            request_id = %request_id,
            method = %method,
            uri = %uri,
            peer = %peer,
            "Forwarding request"
        );

        // Forwarding
        let outbound = Request::from_parts(parts, body);
        let response =
            match tokio::time::timeout_at(deadline, self.upstream.forward(outbound)).await {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => return Err(ProxyError::Upstream(e)),
                Err(_) => return Err(ProxyError::UpstreamTimeout(self.upstream_timeout)),
            };

        // HeaderRewriteOut
        let (mut response_parts, response_body) = response.into_parts();
        strip_hop_headers(&mut response_parts.headers);
        append_via(&mut response_parts.headers, &self.identity, response_parts.version);
        response_parts.version = inbound_version;

        tracing::debug!(
            request_id = %request_id,
            status = response_parts.status.as_u16(),
            "Upstream responded"
        );

        // Writing; PostFilterRun happens when the body is released.
        let hook = self.filters.has_post_call().then(|| {
            CompletionHook::new(
                Arc::clone(&self.filters),
                Exchange {
                    request_id,
                    method,
                    uri,
                    peer,
                    status: response_parts.status,
                    received_at,
                    bytes_sent: 0,
                    completed: false,
                },
            )
        });
        let body = Body::new(ExchangeBody::new(response_body, hook));

        Ok(Response::from_parts(response_parts, body))
    }
}

/// The target must be absolute with an `http` or `https` scheme and a host.
pub fn validate_target(uri: &Uri) -> Result<(), ProxyError> {
    match uri.scheme() {
        Some(scheme) if *scheme == Scheme::HTTP || *scheme == Scheme::HTTPS => {}
        Some(scheme) => {
            return Err(ProxyError::BadRequest(format!(
                "unsupported scheme '{}'",
                scheme
            )))
        }
        None => {
            return Err(ProxyError::BadRequest(
                "request target must be an absolute http or https URI".to_string(),
            ))
        }
    }

    match uri.host() {
        Some(host) if !host.is_empty() => Ok(()),
        _ => Err(ProxyError::BadRequest(
            "request target has no host".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::{CancellationCheck, Filter, FilterError, HeaderGuard, PostCallFilter, PreCallFilter};
    use crate::http::upstream::UpstreamError;
    use crate::security::headers::{HOP_HEADERS, X_FORWARDED_FOR};
    use async_trait::async_trait;
    use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    /// What the mock origin saw.
    #[derive(Debug, Clone)]
    struct Seen {
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        body: Vec<u8>,
    }

    enum Reply {
        Ok {
            status: StatusCode,
            headers: Vec<(&'static str, &'static str)>,
            body: &'static str,
        },
        ConnectError,
        Slow(Duration),
        Hang,
    }

    struct MockUpstream {
        calls: AtomicUsize,
        seen: Mutex<Vec<Seen>>,
        reply: Reply,
    }

    impl MockUpstream {
        fn new(reply: Reply) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
                reply,
            })
        }

        fn ok(body: &'static str) -> Arc<Self> {
            Self::new(Reply::Ok {
                status: StatusCode::OK,
                headers: vec![
                    ("connection", "keep-alive"),
                    ("keep-alive", "timeout=5"),
                    ("content-type", "text/plain"),
                ],
                body,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn last(&self) -> Seen {
            self.seen.lock().unwrap().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl Upstream for MockUpstream {
        async fn forward(&self, request: Request<Body>) -> Result<Response<Body>, UpstreamError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let (parts, body) = request.into_parts();
            let body = axum::body::to_bytes(body, usize::MAX)
                .await
                .map_err(UpstreamError::transport)?;
            self.seen.lock().unwrap().push(Seen {
                method: parts.method,
                uri: parts.uri,
                headers: parts.headers,
                body: body.to_vec(),
            });

            match &self.reply {
                Reply::Ok { status, headers, body } => {
                    let mut builder = Response::builder().status(*status);
                    for (name, value) in headers {
                        builder = builder.header(*name, *value);
                    }
                    Ok(builder.body(Body::from(*body)).unwrap())
                }
                Reply::ConnectError => Err(UpstreamError::connect("connection refused")),
                Reply::Slow(delay) => {
                    tokio::time::sleep(*delay).await;
                    Ok(Response::new(Body::from("late")))
                }
                Reply::Hang => {
                    std::future::pending::<()>().await;
                    unreachable!()
                }
            }
        }
    }

    fn engine(upstream: Arc<MockUpstream>, filters: FilterChain) -> ForwardingEngine {
        ForwardingEngine::new(
            ProxyIdentity::new("test-proxy"),
            filters,
            upstream,
            Duration::from_secs(5),
        )
    }

    fn peer() -> SocketAddr {
        "203.0.113.5:54321".parse().unwrap()
    }

    async fn body_string(response: Response<Body>) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn forwards_and_rewrites_both_legs() {
        let upstream = MockUpstream::ok("ok");
        let engine = engine(upstream.clone(), FilterChain::empty());

        let request = Request::builder()
            .method(Method::POST)
            .uri("http://origin.test/path?q=1")
            .header("Connection", "keep-alive")
            .header("X-App", "1")
            .body(Body::from("payload"))
            .unwrap();

        let response = engine.handle(request, peer()).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert!(!response.headers().contains_key(header::CONNECTION));
        assert!(!response.headers().contains_key("keep-alive"));
        assert_eq!(response.headers()[header::VIA], "1.1 test-proxy");
        assert_eq!(body_string(response).await, "ok");

        let seen = upstream.last();
        assert_eq!(upstream.calls(), 1);
        assert_eq!(seen.method, Method::POST);
        assert_eq!(seen.uri, "http://origin.test/path?q=1");
        assert_eq!(seen.body, b"payload");
        assert_eq!(seen.headers[&X_FORWARDED_FOR], "203.0.113.5");
        assert_eq!(seen.headers["x-app"], "1");
        assert!(!seen.headers.contains_key(header::CONNECTION));
    }

    #[tokio::test]
    async fn hop_headers_never_cross_in_any_casing() {
        let upstream = MockUpstream::new(Reply::Ok {
            status: StatusCode::OK,
            headers: vec![
                ("Transfer-Encoding", "gzip"),
                ("PROXY-AUTHENTICATE", "Basic"),
                ("Trailers", "Expires"),
                ("Upgrade", "h2c"),
            ],
            body: "",
        });
        let engine = engine(upstream.clone(), FilterChain::empty());

        let request = Request::builder()
            .uri("https://origin.test/")
            .header("CONNECTION", "close")
            .header("Keep-Alive", "1")
            .header("proxy-AUTHORIZATION", "Basic Zm9v")
            .header("te", "trailers")
            .header("TRAILERS", "x")
            .header("Upgrade", "websocket")
            .body(Body::empty())
            .unwrap();

        let response = engine.handle(request, peer()).await;
        let seen = upstream.last();
        for name in &HOP_HEADERS {
            assert!(!seen.headers.contains_key(name), "{name} reached upstream");
            assert!(!response.headers().contains_key(name), "{name} reached caller");
        }
    }

    #[tokio::test]
    async fn forwarding_chain_gains_exactly_one_token() {
        let upstream = MockUpstream::ok("ok");
        let engine = engine(upstream.clone(), FilterChain::empty());

        let request = Request::builder()
            .uri("http://origin.test/")
            .header("X-Forwarded-For", "198.51.100.7, 198.51.100.8")
            .body(Body::empty())
            .unwrap();
        engine.handle(request, peer()).await;

        let values: Vec<_> = upstream.last().headers.get_all(&X_FORWARDED_FOR).iter().cloned().collect();
        assert_eq!(values, vec![HeaderValue::from_static("198.51.100.7, 198.51.100.8, 203.0.113.5")]);
    }

    #[tokio::test]
    async fn rejects_unsupported_scheme_without_calling_upstream() {
        let upstream = MockUpstream::ok("ok");
        let engine = engine(upstream.clone(), FilterChain::empty());

        for target in ["ftp://origin.test/file", "/relative/path"] {
            let request = Request::builder().uri(target).body(Body::empty()).unwrap();
            let response = engine.handle(request, peer()).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{target}");
        }
        assert_eq!(upstream.calls(), 0);
    }

    #[tokio::test]
    async fn forbidden_header_rejected_before_upstream() {
        let upstream = MockUpstream::ok("ok");
        let filters = FilterChain::builder()
            .pre_call(HeaderGuard::new(["X-Internal"]))
            .build();
        let engine = engine(upstream.clone(), filters);

        let request = Request::builder()
            .uri("http://origin.test/")
            .header("x-internal", "secret")
            .body(Body::empty())
            .unwrap();
        let response = engine.handle(request, peer()).await;

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_string(response).await, "request rejected by filter 'header-guard'");
        assert_eq!(upstream.calls(), 0);
    }

    #[tokio::test]
    async fn connect_error_becomes_bad_gateway() {
        let upstream = MockUpstream::new(Reply::ConnectError);
        let engine = engine(upstream.clone(), FilterChain::empty());

        let request = Request::builder()
            .uri("http://origin.test/")
            .body(Body::empty())
            .unwrap();
        let response = engine.handle(request, peer()).await;

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(upstream.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_upstream_times_out() {
        let upstream = MockUpstream::new(Reply::Hang);
        let engine = engine(upstream, FilterChain::empty());

        let request = Request::builder()
            .uri("http://origin.test/")
            .body(Body::empty())
            .unwrap();
        let Err(err) = engine.forward(request, peer()).await else {
            panic!("expected the upstream deadline to elapse");
        };

        assert!(matches!(err, ProxyError::UpstreamTimeout(_)));
        assert_eq!(err.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    struct Failing(mpsc::UnboundedSender<Exchange>);

    impl Filter for Failing {
        fn name(&self) -> &str {
            "failing"
        }
    }

    #[async_trait]
    impl PostCallFilter for Failing {
        async fn after(&self, exchange: &Exchange) -> Result<(), FilterError> {
            let _ = self.0.send(exchange.clone());
            Err(FilterError::new("sink unavailable"))
        }
    }

    #[tokio::test]
    async fn post_call_failure_does_not_affect_response() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let upstream = MockUpstream::ok("ok");
        let filters = FilterChain::builder().post_call(Failing(tx)).build();
        let engine = engine(upstream, filters);

        let request = Request::builder()
            .uri("http://origin.test/")
            .header("x-request-id", "req-42")
            .body(Body::empty())
            .unwrap();
        let response = engine.handle(request, peer()).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "ok");

        let exchange = rx.recv().await.unwrap();
        assert_eq!(exchange.request_id, "req-42");
        assert_eq!(exchange.status, StatusCode::OK);
        assert_eq!(exchange.bytes_sent, 2);
        assert!(exchange.completed);
    }

    /// Pre-call filter that takes a while, like a remote policy lookup.
    struct Sleepy(Duration);

    impl Filter for Sleepy {
        fn name(&self) -> &str {
            "sleepy"
        }
    }

    #[async_trait]
    impl PreCallFilter for Sleepy {
        async fn before(&self, _ctx: &RequestContext<'_>) -> Result<(), FilterError> {
            tokio::time::sleep(self.0).await;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn pre_call_time_counts_against_upstream_deadline() {
        let upstream = MockUpstream::new(Reply::Slow(Duration::from_secs(3)));
        let filters = FilterChain::builder()
            .pre_call(Sleepy(Duration::from_secs(4)))
            .pre_call(CancellationCheck)
            .build();
        let engine = engine(upstream.clone(), filters);

        let start = Instant::now();
        let request = Request::builder()
            .uri("http://origin.test/")
            .body(Body::empty())
            .unwrap();
        let response = engine.handle(request, peer()).await;

        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(upstream.calls(), 1);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(5) && elapsed < Duration::from_secs(6), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn expired_deadline_skips_upstream() {
        let upstream = MockUpstream::ok("ok");
        let filters = FilterChain::builder()
            .pre_call(Sleepy(Duration::from_secs(6)))
            .pre_call(CancellationCheck)
            .build();
        let engine = engine(upstream.clone(), filters);

        let request = Request::builder()
            .uri("http://origin.test/")
            .body(Body::empty())
            .unwrap();
        let response = engine.handle(request, peer()).await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body_string(response).await.contains("cancellation-check"));
        assert_eq!(upstream.calls(), 0);
    }

    #[test]
    fn target_validation() {
        assert!(validate_target(&Uri::from_static("http://origin.test/")).is_ok());
        assert!(validate_target(&Uri::from_static("https://origin.test:8443/a?b")).is_ok());
        assert!(validate_target(&Uri::from_static("ws://origin.test/")).is_err());
        assert!(validate_target(&Uri::from_static("/only/path")).is_err());
        assert!(validate_target(&Uri::from_static("origin.test:443")).is_err());
    }
}
