//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum Router around the forwarding engine
//! - Wire up middleware (request ID, tracing, timeouts)
//! - Serve every configured listener, plain or TLS, until shutdown
//! - Drain in-flight exchanges for at most `timeouts.drain_secs`

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, Response},
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinSet;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::{ResponseBodyTimeoutLayer, TimeoutLayer},
    trace::TraceLayer,
};

use crate::config::{ListenerConfig, ProxyConfig};
use crate::filters::{builtin::chain_from_config, FilterChain};
use crate::http::engine::ForwardingEngine;
use crate::http::request::UuidRequestId;
use crate::http::upstream::{HyperUpstream, Upstream};
use crate::identity::ProxyIdentity;
use crate::lifecycle::Shutdown;
use crate::net::{listener, tls, ListenerError};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ForwardingEngine>,
}

/// HTTP server for the forwarding proxy.
pub struct HttpServer {
    router: Router,
    config: ProxyConfig,
}

impl HttpServer {
    /// Create a server with the built-in filters and the network upstream.
    pub fn new(config: ProxyConfig) -> Result<Self, std::io::Error> {
        let upstream = Arc::new(HyperUpstream::new(&config.timeouts)?);
        let filters = chain_from_config(&config.filters);
        Ok(Self::with_parts(config, filters, upstream))
    }

    /// Create a server with an explicit filter chain and upstream.
    pub fn with_parts(config: ProxyConfig, filters: FilterChain, upstream: Arc<dyn Upstream>) -> Self {
        let engine = ForwardingEngine::new(
            ProxyIdentity::from(&config.identity),
            filters,
            upstream,
            Duration::from_secs(config.timeouts.upstream_secs),
        );

        tracing::info!(
            identity = %engine.identity(),
            pre_call = ?engine.filters().pre_call_names(),
            post_call = ?engine.filters().post_call_names(),
            "Forwarding engine ready"
        );

        let state = AppState {
            engine: Arc::new(engine),
        };
        let router = Self::build_router(&config, state);
        Self { router, config }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &ProxyConfig, state: AppState) -> Router {
        let request_timeout = Duration::from_secs(config.timeouts.request_secs);
        Router::new()
            .fallback(proxy_handler)
            .with_state(state)
            .layer(TimeoutLayer::new(request_timeout))
            .layer(ResponseBodyTimeoutLayer::new(request_timeout))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Bind and serve every configured listener until shutdown.
    ///
    /// The first listener to fail, whether at startup or while serving,
    /// triggers shutdown for the others.
    pub async fn run(self, shutdown: &Shutdown) -> Result<(), ListenerError> {
        let drain = self.drain_timeout();
        let mut tasks = JoinSet::new();

        for listener_config in &self.config.listeners {
            let started = start_listener(
                &mut tasks,
                listener_config,
                self.router.clone(),
                shutdown.subscribe(),
                drain,
            )
            .await;

            if let Err(e) = started {
                tracing::error!(
                    address = %listener_config.bind_address,
                    error = %e,
                    "Failed to start listener"
                );
                shutdown.trigger();
                while tasks.join_next().await.is_some() {}
                return Err(e);
            }
        }

        while let Some(joined) = tasks.join_next().await {
            let result = joined.unwrap_or_else(|e| Err(ListenerError::Serve(std::io::Error::other(e))));
            if let Err(e) = result {
                tracing::error!(error = %e, "Listener stopped");
                shutdown.trigger();
                while tasks.join_next().await.is_some() {}
                return Err(e);
            }
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Serve a single already-bound plain listener.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ListenerError> {
        let drain = self.drain_timeout();
        serve_plain(listener, self.router, shutdown, drain).await
    }

    fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeouts.drain_secs)
    }
}

async fn start_listener(
    tasks: &mut JoinSet<Result<(), ListenerError>>,
    listener_config: &ListenerConfig,
    router: Router,
    shutdown: broadcast::Receiver<()>,
    drain: Duration,
) -> Result<(), ListenerError> {
    match &listener_config.tls {
        None => {
            let tcp = listener::bind(&listener_config.bind_address).await?;
            tasks.spawn(serve_plain(tcp, router, shutdown, drain));
        }
        Some(tls_config) => {
            let addr = listener::parse_addr(&listener_config.bind_address)?;
            let rustls = tls::load_tls_config(
                Path::new(&tls_config.cert_path),
                Path::new(&tls_config.key_path),
            )
            .await?;
            tasks.spawn(serve_tls(addr, rustls, router, shutdown, drain));
        }
    }
    Ok(())
}

async fn serve_plain(
    listener: TcpListener,
    router: Router,
    mut shutdown: broadcast::Receiver<()>,
    drain: Duration,
) -> Result<(), ListenerError> {
    let addr = listener.local_addr().map_err(ListenerError::Serve)?;
    tracing::info!(address = %addr, tls = false, "Listening for connections");

    let (draining_tx, draining_rx) = oneshot::channel();
    let server = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = shutdown.recv().await;
        let _ = draining_tx.send(());
    })
    .into_future();

    // Resolves only once draining has started and run out of time.
    let drain_expired = async move {
        match draining_rx.await {
            Ok(()) => tokio::time::sleep(drain).await,
            Err(_) => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        result = server => result.map_err(ListenerError::Serve),
        _ = drain_expired => {
            tracing::warn!(address = %addr, "Drain timeout elapsed, closing remaining connections");
            Ok(())
        }
    }
}

async fn serve_tls(
    addr: SocketAddr,
    config: RustlsConfig,
    router: Router,
    mut shutdown: broadcast::Receiver<()>,
    drain: Duration,
) -> Result<(), ListenerError> {
    let handle = axum_server::Handle::new();
    let signal = handle.clone();
    tokio::spawn(async move {
        let _ = shutdown.recv().await;
        signal.graceful_shutdown(Some(drain));
    });

    tracing::info!(address = %addr, tls = true, "Listening for connections");

    axum_server::bind_rustls(addr, config)
        .handle(handle)
        .serve(router.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .map_err(ListenerError::Serve)
}

/// Every inbound request, whatever its path, goes to the engine.
async fn proxy_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response<Body> {
    state.engine.handle(request, peer).await
}
