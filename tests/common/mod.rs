//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use axum::{extract::Path, routing::get, Router};
use service_gateway::http::{handlers, ApiError};
use service_gateway::{GatewayConfig, GatewayServer, Shutdown};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub const API_KEY: &str = "integration-secret";

/// A gateway running on an ephemeral port.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<std::io::Result<()>>,
}

impl TestGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Trigger shutdown and wait for the server task to finish.
    pub async fn stop(self) -> std::io::Result<()> {
        self.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("server did not stop in time")
            .expect("server task panicked")
    }
}

pub fn test_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.auth.api_key = API_KEY.into();
    config.streaming.pacing_ms = 20;
    config.timeouts.shutdown_secs = 2;
    config
}

pub async fn start(server: GatewayServer) -> TestGateway {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let handle = tokio::spawn(server.run(listener, shutdown.subscribe()));
    TestGateway { addr, shutdown, handle }
}

/// The built-in routes.
pub async fn start_default(config: GatewayConfig) -> TestGateway {
    start(GatewayServer::new(config).unwrap()).await
}

async fn explode() -> &'static str {
    panic!("index out of range")
}

async fn delayed() -> &'static str {
    tokio::time::sleep(Duration::from_millis(300)).await;
    "done"
}

async fn slow() -> &'static str {
    tokio::time::sleep(Duration::from_secs(30)).await;
    "late"
}

/// Built-in public routes plus a few protected test routes.
pub async fn start_with_test_routes(config: GatewayConfig) -> TestGateway {
    let public = Router::new()
        .route("/health", get(handlers::health))
        .route("/items/{id}", get(|Path(id): Path<u32>| async move { id.to_string() }));
    let protected = Router::new()
        .route("/api/users", get(|| async { r#"[{"id":1}]"# }))
        .route("/api/panic", get(explode))
        .route("/api/slow", get(slow))
        .route("/api/delayed", get(delayed))
        .route(
            "/api/forbidden",
            get(|| async { Err::<(), _>(ApiError::forbidden()) }),
        );
    start(GatewayServer::with_routes(config, public, protected).unwrap()).await
}
