//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Networking API surface for external integrations."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! HTTP query interface for the monitor.
//!
//! `GET /` and `GET /api/status` answer with the current battery status as
//! JSON, `GET /metrics` exposes the Prometheus registry and `/data/` serves
//! the recorded datafiles.

use std::fmt;
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use r_bms_codec::StatusSnapshot;
use r_bms_core::BrokerHandle;
use r_bms_metrics::{metrics_response, SharedRegistry};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Broker query source label for HTTP requests.
pub const HTTP_SOURCE: &str = "http";

/// Shared API state exposed to handlers.
pub struct ApiState {
    broker: BrokerHandle,
    metrics: Option<SharedRegistry>,
}

impl ApiState {
    pub fn new(broker: BrokerHandle, metrics: Option<SharedRegistry>) -> Self {
        Self { broker, metrics }
    }
}

impl fmt::Debug for ApiState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiState")
            .field("metrics", &self.metrics.is_some())
            .finish_non_exhaustive()
    }
}

/// Handle to the running API server.
#[derive(Debug)]
pub struct ApiServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl ApiServer {
    /// Address the listener is bound to.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(result) => result,
            Err(err) => Err(err.into()),
        }
    }
}

/// Build the router. `data_dir` is served under `/data/` when present.
pub fn router(state: Arc<ApiState>, data_dir: Option<PathBuf>) -> Router {
    let routes = Router::new()
        .route("/", get(get_status))
        .route("/api/status", get(get_status))
        .route("/metrics", get(get_metrics))
        .with_state(state);

    let routes = match data_dir {
        Some(dir) => routes.nest_service("/data", ServeDir::new(dir)),
        None => routes,
    };
    routes.layer(TraceLayer::new_for_http())
}

/// Bind the API listener without serving yet.
pub fn bind_api_listener(addr: SocketAddr) -> Result<StdTcpListener> {
    let listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind API listener {addr}"))?;
    listener
        .set_nonblocking(true)
        .context("failed to configure API listener as non-blocking")?;
    Ok(listener)
}

/// Bind `addr` and serve the API until [`ApiServer::shutdown`] is called.
///
/// Binding happens before this returns, so an unavailable port is reported
/// to the caller.
pub fn spawn_api_server(
    state: Arc<ApiState>,
    addr: SocketAddr,
    data_dir: Option<PathBuf>,
) -> Result<ApiServer> {
    serve_api(state, bind_api_listener(addr)?, data_dir)
}

/// Serve the API on a listener obtained from [`bind_api_listener`].
pub fn serve_api(
    state: Arc<ApiState>,
    listener: StdTcpListener,
    data_dir: Option<PathBuf>,
) -> Result<ApiServer> {
    let router = router(state, data_dir);
    let addr = listener
        .local_addr()
        .context("failed to read API listener address")?;
    let tcp_listener =
        TcpListener::from_std(listener).context("failed to create tokio listener")?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        info!(address = %addr, "api server listening");
        if let Err(err) = axum::serve(tcp_listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
        {
            error!(address = %addr, error = %err, "api server exited with error");
            return Err(err.into());
        }
        info!(address = %addr, "api server stopped");
        Ok(())
    });

    Ok(ApiServer {
        addr,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    message: String,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            message: self.message,
        });
        (self.status, body).into_response()
    }
}

async fn get_status(State(state): State<Arc<ApiState>>) -> Result<Json<StatusSnapshot>, ApiError> {
    state.broker.query(HTTP_SOURCE).await.map(Json).map_err(|err| {
        warn!(error = %err, "status query failed");
        ApiError::new(StatusCode::SERVICE_UNAVAILABLE, err.to_string())
    })
}

async fn get_metrics(State(state): State<Arc<ApiState>>) -> Result<Response, ApiError> {
    match &state.metrics {
        Some(registry) => Ok(metrics_response(registry)),
        None => Err(ApiError::new(StatusCode::NOT_FOUND, "metrics are disabled")),
    }
}
