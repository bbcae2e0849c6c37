use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::extract::{Query, Request, State};
use axum::http::{header, StatusCode, Uri};
use axum::middleware::{self, Next};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Json;
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use minijinja::context;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;

use crate::logging::{self, LOG_FILE};
use crate::server::pages::{self, Pages};
use crate::server::ApiError;
use crate::{version, MessageBackend};

/// Upper bound on a single request, store write included.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// How long in-flight requests may take to drain after a shutdown signal.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

const LOG_TAIL_LINES: usize = 100;

/// Shared, read-only context handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn MessageBackend>,
    pub pages: Pages,
    pub data_path: PathBuf,
    pub started: Instant,
}

impl AppState {
    pub fn new<P: Into<PathBuf>>(
        store: Arc<dyn MessageBackend>,
        pages: Pages,
        data_path: P,
    ) -> Self {
        Self {
            store,
            pages,
            data_path: data_path.into(),
            started: Instant::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: version::Info,
    /// Seconds since the service started.
    pub uptime: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct HelloParams {
    name: Option<String>,
}

/// Builds the full route table with its middleware stack.
pub fn app(state: AppState) -> axum::Router {
    axum::Router::new()
        .route("/health", get(health))
        .route("/hello", get(hello))
        .route("/message", get(get_message).post(set_message))
        .route("/ui", get(ui))
        .route("/logs", get(logs))
        .route("/swagger", get(swagger_ui))
        .route("/swagger/", get(swagger_ui))
        .route("/swagger/openapi.yaml", get(openapi_spec))
        .route("/docs", get(redoc))
        .fallback(not_found)
        .with_state(state)
        .layer(middleware::from_fn(log_requests))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(CorsLayer::permissive())
        .layer(CatchPanicLayer::new())
}

/// HTTP front end bound to one address.
pub struct Server {
    addr: String,
    app: axum::Router,
}

impl Server {
    pub fn new(addr: impl Into<String>, state: AppState) -> Self {
        Self {
            addr: addr.into(),
            app: app(state),
        }
    }

    pub async fn bind(&self) -> io::Result<TcpListener> {
        let listener = TcpListener::bind(&self.addr).await?;
        info!("Starting server on {}", listener.local_addr()?);
        Ok(listener)
    }

    /// Serves on `listener` until `signal` resolves, then lets in-flight
    /// requests finish for at most [`SHUTDOWN_GRACE`].
    pub async fn run<F>(self, listener: TcpListener, signal: F) -> io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let mut serving = tokio::spawn(async move {
            axum::serve(listener, self.app)
                .with_graceful_shutdown(async move {
                    let _ = stop_rx.await;
                })
                .await
        });

        tokio::select! {
            res = &mut serving => return flatten(res),
            _ = signal => {}
        }

        info!("Shutting down server...");
        let _ = stop_tx.send(());
        match tokio::time::timeout(SHUTDOWN_GRACE, &mut serving).await {
            Ok(res) => flatten(res),
            Err(_) => {
                warn!("Server did not drain within {:?}; aborting", SHUTDOWN_GRACE);
                serving.abort();
                Ok(())
            }
        }
    }
}

fn flatten(res: Result<io::Result<()>, tokio::task::JoinError>) -> io::Result<()> {
    res.map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
}

async fn log_requests(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let start = Instant::now();

    let res = next.run(req).await;

    info!(
        "HTTP request method={} uri={} status={} latency={:?}",
        method,
        uri,
        res.status().as_u16(),
        start.elapsed()
    );
    res
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: version::get(),
        uptime: state.started.elapsed().as_secs_f64(),
        timestamp: Utc::now(),
    })
}

async fn hello(Query(params): Query<HelloParams>) -> Json<MessagePayload> {
    let name = params
        .name
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "World".to_string());
    Json(MessagePayload {
        message: format!("Hello, {name}!"),
    })
}

async fn get_message(State(state): State<AppState>) -> Json<MessagePayload> {
    Json(MessagePayload {
        message: state.store.get_message().await,
    })
}

async fn set_message(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<MessagePayload>, ApiError> {
    let req: MessagePayload = serde_json::from_slice(&body).map_err(|_| ApiError::InvalidJson)?;
    if req.message.trim().is_empty() {
        return Err(ApiError::EmptyMessage);
    }

    state.store.set_message(&req.message).await.map_err(|e| {
        error!("Failed to save message: {}", e);
        ApiError::PersistFailure
    })?;

    Ok(Json(req))
}

fn render(state: &AppState, name: &str, ctx: minijinja::Value) -> Result<Html<String>, ApiError> {
    state.pages.render(name, ctx).map(Html).map_err(|e| {
        error!("{}", e);
        ApiError::Template
    })
}

async fn ui(State(state): State<AppState>) -> Result<Html<String>, ApiError> {
    let message = state.store.get_message().await;
    render(&state, pages::UI_TEMPLATE, context! { message })
}

async fn logs(State(state): State<AppState>) -> Result<Html<String>, ApiError> {
    let path = state.data_path.join(LOG_FILE);
    let lines = tokio::task::spawn_blocking(move || logging::tail(&path, LOG_TAIL_LINES))
        .await
        .ok()
        .and_then(Result::ok)
        .unwrap_or_else(|| vec!["No logs available".to_string()]);
    render(&state, pages::LOGS_TEMPLATE, context! { logs => lines })
}

async fn swagger_ui(State(state): State<AppState>) -> Result<Html<String>, ApiError> {
    render(&state, pages::SWAGGER_TEMPLATE, context! { title => pages::api_title() })
}

async fn redoc(State(state): State<AppState>) -> Result<Html<String>, ApiError> {
    render(&state, pages::REDOC_TEMPLATE, context! { title => pages::api_title() })
}

async fn openapi_spec() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "application/yaml")], pages::OPENAPI_SPEC)
}

async fn not_found(State(state): State<AppState>, uri: Uri) -> Response {
    match render(&state, pages::NOT_FOUND_TEMPLATE, context! { path => uri.path() }) {
        Ok(html) => (StatusCode::NOT_FOUND, html).into_response(),
        Err(e) => e.into_response(),
    }
}
