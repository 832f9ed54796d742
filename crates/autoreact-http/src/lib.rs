//! HTTP server for the autoreact control API.
//!
//! Exposes the [`ReactorService`](autoreact_core::ReactorService) operations as
//! plain `GET` routes.

mod routes;
mod state;

use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;
use tower_http::cors::{Any, CorsLayer};

pub use state::SharedState;

/// Build the control router.
pub fn router(state: Arc<SharedState>) -> Router {
    Router::new()
        .route("/", get(routes::home))
        .route(
            "/login/start/{api_id}/{api_hash}/{phone}",
            get(routes::login_start),
        )
        .route("/login/otp/{phone}/{otp}", get(routes::login_otp))
        .route(
            "/login/password/{phone}/{password}",
            get(routes::login_password),
        )
        .route(
            "/react/start/{phone}/{group_id}/{emoji}",
            get(routes::react_start),
        )
        .route("/react/stop/{phone}", get(routes::react_stop))
        .route("/react/status/{phone}", get(routes::react_status))
        .fallback(routes::not_found)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Handle to a running HTTP server.
#[derive(Debug, Default)]
pub struct HttpServerHandle {
    addr: Option<SocketAddr>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<std::thread::JoinHandle<()>>,
}

impl HttpServerHandle {
    /// Check if the server is running.
    pub fn is_running(&self) -> bool {
        self.shutdown_tx.is_some()
    }

    /// Address the server is bound to.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.addr
    }

    /// Stop the server gracefully and wait for in-flight requests.
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.join();
        }
    }
}

/// Start the HTTP server on the given host and port.
///
/// The listener is bound before this returns, so address errors are reported
/// here. The server then runs in a separate thread with its own tokio runtime.
pub fn start(state: Arc<SharedState>, host: &str, port: u16) -> Result<HttpServerHandle, String> {
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .map_err(|e| format!("Invalid address: {}", e))?;

    let listener = std::net::TcpListener::bind(addr)
        .map_err(|e| format!("Failed to bind HTTP server to {}: {}", addr, e))?;
    listener
        .set_nonblocking(true)
        .map_err(|e| format!("Failed to configure listener: {}", e))?;
    let local_addr = listener
        .local_addr()
        .map_err(|e| format!("Failed to read listener address: {}", e))?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("Failed to create tokio runtime: {}", e))?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let task = std::thread::Builder::new()
        .name("autoreact-http".to_string())
        .spawn(move || {
            rt.block_on(async move {
                let listener = match tokio::net::TcpListener::from_std(listener) {
                    Ok(l) => l,
                    Err(e) => {
                        log::error!("Failed to register listener on {}: {}", local_addr, e);
                        return;
                    }
                };

                log::info!("HTTP server listening on http://{}", local_addr);

                if let Err(e) = axum::serve(listener, router(state))
                    .with_graceful_shutdown(async {
                        shutdown_rx.await.ok();
                        log::info!("HTTP server shutting down");
                    })
                    .await
                {
                    log::error!("HTTP server failed: {}", e);
                }
            });
        })
        .map_err(|e| format!("Failed to spawn HTTP server thread: {}", e))?;

    Ok(HttpServerHandle {
        addr: Some(local_addr),
        shutdown_tx: Some(shutdown_tx),
        task: Some(task),
    })
}

// ============================================================================
// TESTS
// ============================================================================
