//! HTTP server setup and pipeline assembly.
//!
//! # Responsibilities
//! - Compose the cross-cutting middleware around the domain routes
//! - Put the shared-secret guard in front of the protected routes only
//! - Bind the router to a listener with graceful shutdown
//!
//! # Pipeline (outermost first)
//! ```text
//! SetRequestId → correlate → trace → normalize_errors → timeout
//!     → isolate_faults → [access guard] → handler
//! ```

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, oneshot};
use tower_http::{
    request_id::SetRequestIdLayer,
    timeout::TimeoutLayer,
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::config::GatewayConfig;
use crate::http::handlers::{health, stream_text, AppState};
use crate::http::middleware::access_control::{
    access_control_middleware, AccessGuard, ApiKey, ApiKeyError,
};
use crate::http::middleware::fault_isolation::{install_panic_hook, isolate_faults};
use crate::http::request::{correlate, MakeCorrelationId, RequestSpan, X_REQUEST_ID};
use crate::http::response::normalize_errors;
use crate::http::streaming::ChunkWriter;
use crate::lifecycle::signals::wait_for_shutdown;

/// The middleware chain, built once from configuration.
#[derive(Debug, Clone)]
pub struct Pipeline {
    guard: AccessGuard,
    request_timeout: Duration,
    max_body_bytes: usize,
}

impl Pipeline {
    pub fn new(config: &GatewayConfig) -> Result<Self, ApiKeyError> {
        let key = ApiKey::new(&config.auth.api_key)?;
        Ok(Self {
            guard: AccessGuard::new(key, &config.auth.header)?,
            request_timeout: config.timeouts.request(),
            max_body_bytes: config.limits.max_body_bytes,
        })
    }

    /// Require the shared secret on every route of `router`.
    pub fn protect<S>(&self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        router.route_layer(middleware::from_fn_with_state(
            self.guard.clone(),
            access_control_middleware,
        ))
    }

    /// Wrap `router` in the full chain.
    #[allow(deprecated)]
    pub fn assemble(&self, router: Router) -> Router {
        install_panic_hook();

        router
            .layer(middleware::from_fn(isolate_faults))
            .layer(TimeoutLayer::new(self.request_timeout))
            .layer(middleware::from_fn(normalize_errors))
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(RequestSpan)
                    .on_response(DefaultOnResponse::new().level(Level::INFO))
                    .on_failure(()),
            )
            .layer(middleware::from_fn(correlate))
            .layer(SetRequestIdLayer::new(X_REQUEST_ID.clone(), MakeCorrelationId))
            .layer(DefaultBodyLimit::max(self.max_body_bytes))
    }
}

/// HTTP server for the gateway.
pub struct GatewayServer {
    router: Router,
    config: GatewayConfig,
}

impl GatewayServer {
    /// Server with the built-in routes.
    pub fn new(config: GatewayConfig) -> Result<Self, ApiKeyError> {
        let state = AppState {
            writer: ChunkWriter::new(config.streaming.pacing()),
        };
        let public = Router::new()
            .route("/", get(health))
            .route("/health", get(health));
        let protected = Router::new()
            .route("/api/stream", post(stream_text))
            .with_state(state);

        Self::with_routes(config, public, protected)
    }

    /// Server with caller-supplied domain routes. `protected` sits behind the
    /// access guard and must hold at least one route; both share the rest
    /// of the pipeline.
    pub fn with_routes(
        config: GatewayConfig,
        public: Router,
        protected: Router,
    ) -> Result<Self, ApiKeyError> {
        let pipeline = Pipeline::new(&config)?;
        let router = pipeline.assemble(public.merge(pipeline.protect(protected)));
        Ok(Self { router, config })
    }

    /// The assembled router, for in-process use.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Serve until a shutdown signal, then drain for at most
    /// `timeouts.shutdown_secs`.
    pub async fn run(
        self,
        listener: TcpListener,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let drain_limit = self.config.timeouts.shutdown();
        let (draining_tx, draining_rx) = oneshot::channel::<()>();
        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        let server = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                wait_for_shutdown(shutdown).await;
                let _ = draining_tx.send(());
            })
            .into_future();

        let drain_deadline = async move {
            match draining_rx.await {
                Ok(()) => tokio::time::sleep(drain_limit).await,
                Err(_) => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            result = server => result?,
            _ = drain_deadline => {
                tracing::warn!(
                    drain_secs = drain_limit.as_secs(),
                    "In-flight requests did not finish in time, closing"
                );
            }
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
