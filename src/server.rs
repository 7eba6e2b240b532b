use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::{header, StatusCode},
    response::{Html, IntoResponse, Json},
    routing::get,
    Router,
};
use chrono::Local;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::history;
use crate::persist::day_file_name;
use crate::registry::SubscriberRegistry;

/// Outstanding frames buffered per observer before sends start timing out.
const SINK_CAPACITY: usize = 64;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SubscriberRegistry>,
    pub log_dir: PathBuf,
}

pub async fn start_server(state: AppState, port: u16) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/", get(index_handler))
        .route("/ws/vehicle/:vehicle_id", get(ws_handler))
        .route("/history/:vehicle_id", get(history_handler))
        .route("/download/:vehicle_id", get(download_handler))
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(state);

    let addr = format!("0.0.0.0:{}", port);
    log::info!("[HTTP] listening on http://{}", addr);
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn index_handler() -> Html<&'static str> {
    Html(include_str!("index.html"))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(vehicle_id): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, vehicle_id))
}

/// One observer connection: register a channel sink, pump pushed events
/// to the socket, and stay parked on the read side (client frames are
/// ignored) until disconnect.
async fn handle_socket(socket: WebSocket, state: AppState, vehicle_id: String) {
    let (tx, mut rx) = mpsc::channel::<String>(SINK_CAPACITY);
    let handle = state.registry.subscribe(&vehicle_id, tx);

    let (mut ws_tx, mut ws_rx) = socket.split();
    let forward = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if ws_tx.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = ws_rx.next().await {
        if frame.is_err() {
            break;
        }
        // Clients may send keepalive pings; nothing to do with them.
    }

    state.registry.unsubscribe(&handle);
    forward.abort();
    log::info!("[WS] observer of {} disconnected", vehicle_id);
}

async fn history_handler(
    Path(vehicle_id): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    Json(history::reconstruct(&state.log_dir, &vehicle_id))
}

async fn download_handler(
    Path(vehicle_id): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let file_name = day_file_name(Local::now().date_naive(), &vehicle_id);
    match tokio::fs::read(state.log_dir.join(&file_name)).await {
        Ok(contents) => (
            [
                (header::CONTENT_TYPE, "text/csv".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", file_name),
                ),
            ],
            contents,
        )
            .into_response(),
        Err(_) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("no log for vehicle {} today", vehicle_id) })),
        )
            .into_response(),
    }
}
