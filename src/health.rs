//! Liveness endpoint.
//!
//! Served from a dedicated OS thread with its own single-threaded runtime,
//! so it keeps answering while the probe loops are saturated.

use std::io;
use std::net::{SocketAddr, TcpListener};
use std::thread::JoinHandle;

use axum::{http::StatusCode, routing::get, Json, Router};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

/// Build the router: `GET /health` and a 404 for everything else.
pub fn router() -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .fallback(handle_not_found)
        .layer(TraceLayer::new_for_http())
}

async fn handle_health() -> Json<Value> {
    Json(json!({"status": "healthy"}))
}

async fn handle_not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// A bound but not yet serving health endpoint.
pub struct HealthServer {
    listener: TcpListener,
}

impl HealthServer {
    /// Bind on all interfaces. Port 0 picks a free port.
    pub fn bind(port: u16) -> io::Result<Self> {
        let listener = TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port)))?;
        listener.set_nonblocking(true)?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve on a background thread for the rest of the process lifetime.
    pub fn spawn(self) -> io::Result<JoinHandle<()>> {
        let addr = self.local_addr()?;
        std::thread::Builder::new()
            .name("health".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        tracing::error!("Failed to start health runtime: {}", e);
                        return;
                    }
                };

                tracing::info!("Health check server listening on {}", addr);
                if let Err(e) = runtime.block_on(self.serve()) {
                    tracing::error!("Health check server failed: {}", e);
                }
            })
    }

    async fn serve(self) -> io::Result<()> {
        let listener = tokio::net::TcpListener::from_std(self.listener)?;
        axum::serve(listener, router()).await
    }
}
