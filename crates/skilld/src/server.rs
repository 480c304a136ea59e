//! HTTP endpoint for the message bus.
//!
//! Peers deliver bus messages as `POST /bus/{service}`. Only the daemon's
//! own service key is served; a declined message is answered with
//! `204 No Content` so the sender can try another handler.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::Value;
use skill_core::protocol::BusResponse;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::gateway::{Gateway, GatewayReply};

/// Create the HTTP router.
pub fn create_router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/bus/{service}", post(handle_bus))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(gateway)
}

/// Bind the bus endpoint on localhost.
pub async fn bind(port: u16) -> std::io::Result<TcpListener> {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = TcpListener::bind(addr).await?;
    info!("bus endpoint listening on http://{}", listener.local_addr()?);
    Ok(listener)
}

/// Serve `router` until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// POST /bus/{service}
async fn handle_bus(
    State(gateway): State<Arc<Gateway>>,
    Path(service): Path<String>,
    Json(message): Json<Value>,
) -> Response {
    if service != gateway.service_key() {
        debug!(%service, "message for unknown service");
        return (
            StatusCode::NOT_FOUND,
            Json(BusResponse::err(format!("no responder for {service}"))),
        )
            .into_response();
    }

    match gateway.handle(message).await {
        GatewayReply::Respond(response) => Json(response).into_response(),
        GatewayReply::Declined => StatusCode::NO_CONTENT.into_response(),
    }
}
