// tandem-relay: room-scoped websocket relay for collaborative text documents.

pub mod config;
pub mod error;
pub mod rooms;
pub mod ws;

use std::{sync::Arc, time::Instant};

use anyhow::Context;
use axum::{
    body::Body,
    extract::{DefaultBodyLimit, State},
    http::Request,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::config::RoomSettings;
use crate::error::{attach_request_id_header, request_id_from_headers_or_generate, with_request_id_scope, RelayError};
use crate::rooms::RoomRegistry;
use crate::ws::RelayState;

const MAX_REQUEST_BODY_BYTES: usize = 64 * 1024;

pub fn build_router(registry: Arc<RoomRegistry>) -> Router {
    apply_middleware(
        Router::new()
            .route("/healthz", get(healthz))
            .with_state(Arc::clone(&registry))
            .merge(ws::router(RelayState::new(registry))),
    )
}

pub fn apply_middleware(router: Router) -> Router {
    router
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(middleware::from_fn(request_context_middleware))
        .layer(middleware::from_fn(panic_handler))
}

/// Serve the relay on an already-bound listener until `shutdown` resolves.
pub async fn serve_with_shutdown<F>(
    listener: TcpListener,
    settings: RoomSettings,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let app = build_router(RoomRegistry::new(settings));
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("relay server exited unexpectedly")
}

/// Serve the relay on an already-bound listener until the process is stopped.
pub async fn serve(listener: TcpListener, settings: RoomSettings) -> anyhow::Result<()> {
    serve_with_shutdown(listener, settings, std::future::pending()).await
}

/// Liveness plus a count of rooms currently held in memory.
async fn healthz(State(registry): State<Arc<RoomRegistry>>) -> Json<Value> {
    Json(json!({ "status": "ok", "rooms": registry.room_count().await }))
}

async fn panic_handler(request: Request<Body>, next: Next) -> Response {
    match tokio::spawn(async move { next.run(request).await }).await {
        Ok(response) => response,
        Err(join_error) => {
            error!(?join_error, "request handling panicked");
            RelayError::internal().into_response()
        }
    }
}

async fn request_context_middleware(request: Request<Body>, next: Next) -> Response {
    let request_id = request_id_from_headers_or_generate(request.headers());
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started_at = Instant::now();

    let mut response = with_request_id_scope(request_id.clone(), next.run(request)).await;
    attach_request_id_header(&mut response, &request_id);

    info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms = started_at.elapsed().as_millis() as u64,
        "request completed"
    );

    response
}
