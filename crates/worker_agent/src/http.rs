//! The agent-local HTTP surface (`SPEC_FULL.md` §4.2, §6): addressed directly by the control
//! plane's Matchmaker and Lifecycle Monitor, and by the locally-supervised game-server processes
//! for `update_players`/`track_save`.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use control_plane_common::ServerSnapshot;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::agent::Agent;

pub fn router(agent: Agent) -> Router {
    Router::new()
        .route("/spawn_server", post(spawn_server))
        .route("/shutdown", post(shutdown_host))
        .route("/shutdown/:uid", post(shutdown_server))
        .route("/status", get(status))
        .route("/update_players", post(update_players))
        .route("/track_save", post(track_save))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(agent))
}

#[derive(Debug, Deserialize)]
struct SpawnServerBody {
    uid: Option<String>,
    port: Option<u16>,
    owner: Option<u64>,
    #[serde(default)]
    private: bool,
}

#[derive(Debug, Serialize)]
struct SpawnServerReply {
    success: bool,
    server_uid: String,
    port: u16,
}

async fn spawn_server(
    State(agent): State<Arc<Agent>>,
    Json(body): Json<SpawnServerBody>,
) -> impl IntoResponse {
    match agent
        .spawn_server(body.uid, body.port, body.owner, body.private)
        .await
    {
        Ok((uid, port)) => (
            StatusCode::OK,
            Json(SpawnServerReply { success: true, server_uid: uid.to_string(), port }),
        )
            .into_response(),
        Err(err) => (StatusCode::CONFLICT, Json(ErrorReply { error: err })).into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct ShutdownBody {
    #[serde(default = "default_graceful")]
    graceful: bool,
}

fn default_graceful() -> bool {
    true
}

async fn shutdown_host(
    State(agent): State<Arc<Agent>>,
    body: Option<Json<ShutdownBody>>,
) -> impl IntoResponse {
    let graceful = body.map(|b| b.graceful).unwrap_or(true);
    let agent = agent.as_ref().clone();
    tokio::spawn(async move { agent.shutdown_host(graceful).await });
    StatusCode::ACCEPTED
}

async fn shutdown_server(
    State(agent): State<Arc<Agent>>,
    Path(uid): Path<String>,
    body: Option<Json<ShutdownBody>>,
) -> impl IntoResponse {
    let graceful = body.map(|b| b.graceful).unwrap_or(true);
    match agent.shutdown_server(&uid.into(), graceful).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => (StatusCode::NOT_FOUND, Json(ErrorReply { error: err })).into_response(),
    }
}

#[derive(Debug, Serialize)]
pub struct AgentStatusPayload {
    pub host_id: String,
    pub servers: Vec<ServerSnapshot>,
    pub cpu_percent: f32,
    pub memory_used_mb: u64,
    pub pending_saves: usize,
}

async fn status(State(agent): State<Arc<Agent>>) -> impl IntoResponse {
    Json(agent.status().await)
}

#[derive(Debug, Deserialize)]
struct UpdatePlayersBody {
    server_uid: String,
    players: Vec<serde_json::Value>,
}

async fn update_players(
    State(agent): State<Arc<Agent>>,
    Json(body): Json<UpdatePlayersBody>,
) -> impl IntoResponse {
    match agent
        .update_players(&body.server_uid.into(), body.players.len() as u32)
        .await
    {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => (StatusCode::NOT_FOUND, Json(ErrorReply { error: err })).into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct TrackSaveBody {
    save_id: Option<String>,
    user_id: Option<u64>,
    operation: Option<String>,
    status: String,
}

#[derive(Debug, Serialize)]
struct TrackSaveReply {
    save_id: String,
}

async fn track_save(
    State(agent): State<Arc<Agent>>,
    Json(body): Json<TrackSaveBody>,
) -> impl IntoResponse {
    match body.status.as_str() {
        "start" => {
            let save_id = agent
                .save_barrier
                .start(body.user_id.unwrap_or(0), body.operation.as_deref().unwrap_or("update"))
                .await;
            (StatusCode::OK, Json(TrackSaveReply { save_id })).into_response()
        }
        "complete" | "failed" => {
            if let Some(save_id) = body.save_id {
                agent.save_barrier.complete(&save_id, body.status == "complete").await;
            }
            StatusCode::OK.into_response()
        }
        other => (
            StatusCode::BAD_REQUEST,
            Json(ErrorReply { error: format!("unknown save status: {other}") }),
        )
            .into_response(),
    }
}

#[derive(Debug, Serialize)]
struct ErrorReply {
    error: String,
}
