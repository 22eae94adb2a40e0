use std::sync::Arc;

use analytics::context::EngineContext;
use analytics::session::{SessionHandle, ViewportSession};
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use runtime::metrics::MetricsSnapshot;
use serde::Serialize;
use spatial::index::SpatialIndex;
use streaming::source::{FileRowGroupSource, HttpRowGroupSource, RowGroupSource};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod settings;
mod ws;

#[derive(Clone)]
struct AppState {
    ctx: Arc<EngineContext>,
    session: SessionHandle,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    generation: u64,
    index_entries: usize,
    cached_partitions: usize,
    cached_bytes: usize,
    broadcast_sinks: usize,
    metrics: MetricsSnapshot,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let settings = match settings::load() {
        Ok(s) => s,
        Err(err) => {
            error!("invalid configuration: {err}");
            std::process::exit(1);
        }
    };
    let config = settings.engine;

    let source: Arc<dyn RowGroupSource> = if config.metadata_url.starts_with("http://")
        || config.metadata_url.starts_with("https://")
    {
        Arc::new(HttpRowGroupSource::new())
    } else {
        match settings.data_root {
            Some(root) => Arc::new(FileRowGroupSource::with_root(root)),
            None => Arc::new(FileRowGroupSource::new()),
        }
    };
    info!(source = source.name(), store = %config.store_path, "row-group source selected");

    let index_path = config.index_path.clone();
    let index = match tokio::task::spawn_blocking(move || SpatialIndex::load(index_path)).await {
        Ok(Ok(index)) => index,
        Ok(Err(err)) => {
            error!(path = %config.index_path, "failed to load spatial index: {err}");
            std::process::exit(1);
        }
        Err(err) => {
            error!("index loader panicked: {err}");
            std::process::exit(1);
        }
    };
    info!(
        entries = index.len(),
        cells = index.cell_count(),
        "spatial index loaded"
    );

    let ctx = match EngineContext::new(config, index, source) {
        Ok(ctx) => Arc::new(ctx),
        Err(err) => {
            error!("failed to build engine: {err}");
            std::process::exit(1);
        }
    };
    let (session, session_task) = ViewportSession::spawn(ctx.clone());

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_headers(Any)
        .allow_methods([Method::GET, Method::OPTIONS]);

    let state = AppState {
        ctx,
        session: session.clone(),
    };
    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/status", get(get_status))
        .route("/ws", get(ws_upgrade))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = match tokio::net::TcpListener::bind(settings.addr).await {
        Ok(l) => l,
        Err(err) => {
            error!(addr = %settings.addr, "failed to bind: {err}");
            std::process::exit(1);
        }
    };
    info!("hexview listening on http://{}", settings.addr);
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await;
    if let Err(err) = served {
        error!("server error: {err}");
    }

    let _ = session.shutdown();
    let _ = session_task.await;
}

async fn healthz() -> Response {
    (StatusCode::OK, "ok").into_response()
}

async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let ctx = &state.ctx;
    Json(StatusResponse {
        generation: ctx.clock.current().0,
        index_entries: ctx.index.len(),
        cached_partitions: ctx.cache.len(),
        cached_bytes: ctx.cache.total_bytes(),
        broadcast_sinks: ctx.broadcaster.sink_count(),
        metrics: ctx.metrics.snapshot(),
    })
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| ws::handle_ws_connection(socket, state.ctx, state.session))
}
