use crate::rsu_logic::config::Settings;
use crate::rsu_logic::model::{AppError, LogsQuery, ServerMessage, StatusReport, UpdateResponse};
use crate::rsu_logic::state::AppState;
use anyhow::anyhow;
use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use axum_server::tls_rustls::RustlsConfig;
use futures_util::{SinkExt, StreamExt};
use lib_rsu::core::{AuditRecord, InboundMessage};
use lib_rsu::geometry::NetworkGeometry;
use lib_rsu::model::ControlDecision;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;

pub fn router(app_state: AppState, public_dir: Option<&Path>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    let mut app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/api/ev_priority", post(priority_handler))
        .route("/update", post(update_handler))
        .route("/api/logs", get(logs_handler))
        .route("/api/network", get(network_handler));

    if let Some(dir) = public_dir {
        app = app.fallback_service(ServeDir::new(dir));
    }

    app.layer(cors).with_state(app_state)
}

pub async fn run(
    settings: Settings,
    app_state: AppState,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let app = router(app_state, settings.public_dir.as_deref());
    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));

    if let Some((cert_path, key_path)) = settings.tls {
        let tls_config = RustlsConfig::from_pem_file(&cert_path, &key_path)
            .await
            .map_err(|e| anyhow!("TLS Configuration Error: {}", e))?;

        let handle = axum_server::Handle::new();
        let signal_handle = handle.clone();
        tokio::spawn(async move {
            shutdown.recv().await.ok();
            log::info!("Relay server shutting down.");
            signal_handle.graceful_shutdown(Some(Duration::from_secs(10)));
        });

        log::info!("RSU relay listening on https://{}", addr);
        axum_server::bind_rustls(addr, tls_config)
            .handle(handle)
            .serve(app.into_make_service())
            .await?;
    } else {
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        log::info!("RSU relay listening on http://{}", addr);
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.recv().await.ok();
                log::info!("Relay server shutting down.");
            })
            .await?;
    }
    Ok(())
}

async fn health_handler() -> &'static str {
    "OK"
}

async fn status_handler(State(state): State<AppState>) -> Json<StatusReport> {
    Json(state.status())
}

async fn priority_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<ControlDecision>, AppError> {
    let decision = state.relay.submit_json(&body).await?;
    Ok(Json(decision))
}

async fn update_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<UpdateResponse>, AppError> {
    let mut raw = state.relay.parse_body(&body).await?;
    state.derive_distance(&mut raw).await;
    let decision = state.relay.handle(InboundMessage::EvUpdate(raw)).await?;
    Ok(Json(UpdateResponse { decision }))
}

async fn logs_handler(
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> Json<Vec<AuditRecord>> {
    Json(state.relay.audit().recent(query.limit.unwrap_or(usize::MAX)))
}

async fn network_handler(State(state): State<AppState>) -> Result<Json<Arc<NetworkGeometry>>, AppError> {
    Ok(Json(state.geometry.load().await?))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Turns one text frame into a relay call and the direct reply.
async fn respond(state: &AppState, text: &str) -> ServerMessage {
    let raw = match state.relay.parse_body(text.as_bytes()).await {
        Ok(raw) => raw,
        Err(e) => return ServerMessage::error("invalid_ev_message", e),
    };
    let message = match serde_json::from_value::<InboundMessage>(raw) {
        Ok(message) => message,
        Err(e) => return ServerMessage::error("unknown_event", e),
    };
    match state.relay.handle(message).await {
        Ok(decision) => ServerMessage::RsuResponse(decision),
        Err(e) => ServerMessage::error("invalid_ev_message", e),
    }
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let registry = Arc::clone(state.relay.registry());
    let mut subscription = registry.register("ws");
    let client_id = subscription.id();
    log::info!("Client {} connected", client_id);

    loop {
        tokio::select! {
            inbound = socket.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        let reply = respond(&state, text.as_str()).await;
                        if socket.send(Message::Text(reply.to_text().into())).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
            frame = subscription.recv() => {
                match frame {
                    Some(frame) => {
                        if socket.send(Message::Text(frame.wire.clone().into())).await.is_err() {
                            break;
                        }
                    }
                    // Dropped by the registry for falling behind.
                    None => break,
                }
            }
        }
    }

    registry.unregister(client_id);
    log::info!("Client {} disconnected", client_id);
}
