//! The HTTP front adapter (`SPEC_FULL.md` §6): request-dispatch, heartbeat ingestion,
//! private-server subscribe/cancel, binary download, health/liveness/readiness, and the
//! maintenance-mode admin surface. Every error response is the fixed
//! `{success:false, error:{code, message}}` shape from `SPEC_FULL.md` §7.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use control_plane_common::{ControlPlaneError, ErrorBody, ErrorCode, HeartbeatRequest, HeartbeatResponse};
use control_plane_core::broadcast::{push_to_servers, ServerPushTarget};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::app::AppState;
use crate::token_store::TokenStore;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/request_server", post(request_server))
        .route("/heartbeat", post(heartbeat))
        .route("/private_server/subscribe", post(subscribe_private_server))
        .route("/private_server/cancel", post(cancel_private_server))
        .route("/download_binary", post(download_binary))
        .route("/broadcast", post(broadcast_message))
        .route("/maintenance", post(set_maintenance_mode))
        .route("/healthz", get(liveness))
        .route("/readyz", get(readiness))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn status_code_for(err: &ControlPlaneError) -> StatusCode {
    match err.code() {
        ErrorCode::InvalidJson | ErrorCode::MissingRequiredFields | ErrorCode::InvalidData | ErrorCode::InvalidAmount => {
            StatusCode::BAD_REQUEST
        }
        ErrorCode::InvalidToken | ErrorCode::InvalidAccessKey => StatusCode::UNAUTHORIZED,
        ErrorCode::UnauthorizedIp => StatusCode::FORBIDDEN,
        ErrorCode::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
        ErrorCode::UserNotFound | ErrorCode::ServerNotFound | ErrorCode::ItemNotFound => StatusCode::NOT_FOUND,
        ErrorCode::ServerFull | ErrorCode::AlreadyOwned | ErrorCode::MaxServersReached => StatusCode::CONFLICT,
        ErrorCode::InsufficientFunds => StatusCode::PAYMENT_REQUIRED,
        ErrorCode::MaintenanceMode => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCode::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorCode::FailedToCreateHost => StatusCode::BAD_GATEWAY,
        ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: ControlPlaneError) -> axum::response::Response {
    if matches!(err, ControlPlaneError::Internal(_)) {
        error!(error = %err, "internal error serving request");
    }
    (status_code_for(&err), Json(ErrorBody::from(&err))).into_response()
}

/// True for loopback clients and for the control plane's own advertised public address -- both
/// trusted collaborators (the co-located agent, health probes) rather than external clients.
fn bypasses_security(ip: std::net::IpAddr, state: &AppState) -> bool {
    if ip.is_loopback() {
        return true;
    }
    state
        .config
        .server
        .public_address
        .parse::<SocketAddr>()
        .map(|addr| addr.ip() == ip)
        .unwrap_or(false)
}

fn map_security_error(err: control_plane_core::security::SecurityError) -> ControlPlaneError {
    use control_plane_core::security::SecurityError;
    match err {
        SecurityError::BannedIp(ip) => ControlPlaneError::UnauthorizedIp(ip),
        SecurityError::MessageTooLarge(len) => {
            ControlPlaneError::InvalidData(format!("request body too large: {len} bytes"))
        }
        SecurityError::RateLimitExceeded(_) => ControlPlaneError::RateLimitExceeded,
    }
}

async fn guard(
    state: &AppState,
    addr: SocketAddr,
    body_len: usize,
) -> Result<(), ControlPlaneError> {
    if bypasses_security(addr.ip(), state) {
        return Ok(());
    }
    state.security.validate_ip(addr.ip()).map_err(map_security_error)?;
    state
        .security
        .validate_request(addr.ip(), body_len)
        .await
        .map_err(map_security_error)
}

async fn resolve_token(state: &AppState, token: &str) -> Result<u64, ControlPlaneError> {
    state
        .token_store
        .resolve(token)
        .await
        .ok_or(ControlPlaneError::InvalidToken)
}

#[derive(Debug, Deserialize)]
struct RequestServerBody {
    token: String,
}

async fn request_server(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(body): Json<RequestServerBody>,
) -> impl IntoResponse {
    if let Err(err) = guard(&state, addr, body.token.len()).await {
        return error_response(err);
    }
    let user_id = match resolve_token(&state, &body.token).await {
        Ok(id) => id,
        Err(err) => return error_response(err),
    };
    match state.matchmaker.request_server(user_id).await {
        Ok(result) => Json(result).into_response(),
        Err(err) => error_response(err),
    }
}

async fn heartbeat(
    State(state): State<Arc<AppState>>,
    Json(body): Json<HeartbeatRequest>,
) -> impl IntoResponse {
    let diff = state.registry.apply_heartbeat(&body.host_id, body.servers).await;
    if let Some(diff) = diff {
        for uid in diff.removed {
            let save_id = state.save_barrier.start(0, "clear_bindings_to").await;
            state.player_data.clear_bindings_to(&uid).await;
            state.save_barrier.complete(&save_id, true).await;
        }
    } else {
        warn!(host_id = %body.host_id, "heartbeat from unregistered host");
    }
    Json(HeartbeatResponse::ok())
}

#[derive(Debug, Deserialize)]
struct SubscribeBody {
    token: String,
    price: i64,
}

async fn subscribe_private_server(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(body): Json<SubscribeBody>,
) -> impl IntoResponse {
    if let Err(err) = guard(&state, addr, body.token.len()).await {
        return error_response(err);
    }
    let user_id = match resolve_token(&state, &body.token).await {
        Ok(id) => id,
        Err(err) => return error_response(err),
    };
    match state.matchmaker.subscribe_private_server(user_id, body.price).await {
        Ok(result) => Json(result).into_response(),
        Err(err) => error_response(err),
    }
}

#[derive(Debug, Deserialize)]
struct CancelBody {
    token: String,
}

#[derive(Debug, Serialize)]
struct SuccessBody {
    success: bool,
}

async fn cancel_private_server(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(body): Json<CancelBody>,
) -> impl IntoResponse {
    if let Err(err) = guard(&state, addr, body.token.len()).await {
        return error_response(err);
    }
    let user_id = match resolve_token(&state, &body.token).await {
        Ok(id) => id,
        Err(err) => return error_response(err),
    };
    match state.matchmaker.cancel_private_server(user_id).await {
        Ok(()) => Json(SuccessBody { success: true }).into_response(),
        Err(err) => error_response(err),
    }
}

#[derive(Debug, Deserialize)]
struct DownloadBinaryBody {
    access_key: String,
}

async fn download_binary(
    State(state): State<Arc<AppState>>,
    Json(body): Json<DownloadBinaryBody>,
) -> impl IntoResponse {
    if body.access_key != state.config.cloud.shared_access_key || state.config.cloud.shared_access_key.is_empty() {
        return error_response(ControlPlaneError::InvalidAccessKey);
    }
    let path = std::path::Path::new(&state.config.server.binary_dir).join("game_server");
    match tokio::fs::read(&path).await {
        Ok(bytes) => (
            StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "application/octet-stream")],
            bytes,
        )
            .into_response(),
        Err(err) => {
            error!(path = %path.display(), error = %err, "binary download failed");
            error_response(ControlPlaneError::Internal(err.into()))
        }
    }
}

#[derive(Debug, Deserialize)]
struct BroadcastBody {
    access_key: String,
    message_type: String,
    #[serde(default)]
    properties: serde_json::Value,
}

async fn broadcast_message(
    State(state): State<Arc<AppState>>,
    Json(body): Json<BroadcastBody>,
) -> impl IntoResponse {
    if body.access_key != state.config.cloud.shared_access_key || state.config.cloud.shared_access_key.is_empty() {
        return error_response(ControlPlaneError::InvalidAccessKey);
    }
    let message = state.broadcast.add(body.message_type, body.properties).await;

    let targets: Vec<ServerPushTarget> = state
        .registry
        .all_hosts()
        .await
        .into_iter()
        .flat_map(|host| {
            let address = host.address;
            host.servers
                .into_values()
                .map(move |s| ServerPushTarget { address: address.clone(), port: s.port })
        })
        .collect();
    push_to_servers(&state.http_client, targets, &message).await;

    Json(message).into_response()
}

#[derive(Debug, Deserialize)]
struct MaintenanceBody {
    access_key: String,
    enabled: bool,
    #[serde(default)]
    message: Option<String>,
}

async fn set_maintenance_mode(
    State(state): State<Arc<AppState>>,
    Json(body): Json<MaintenanceBody>,
) -> impl IntoResponse {
    if body.access_key != state.config.cloud.shared_access_key || state.config.cloud.shared_access_key.is_empty() {
        return error_response(ControlPlaneError::InvalidAccessKey);
    }
    let announcement = state.broadcast.set_maintenance_mode(body.enabled, body.message).await;
    if body.enabled {
        state.shutdown_scheduler.clone().schedule_maintenance_shutdown();
    }
    Json(announcement).into_response()
}

async fn liveness(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.health.liveness_check().await {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn readiness(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.health.readiness_check().await {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let result = state
        .health
        .perform_health_check(&state.registry, &state.save_barrier, &state.broadcast)
        .await;
    Json(result)
}
