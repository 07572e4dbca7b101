use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tracing::{error, info};

use crate::session::{
    OverlayReceiver, SessionCommand, SessionHandle, SessionStatus, SnapshotReceiver,
    StatusReceiver,
};

pub struct ControlState {
    pub camera_id: String,
    pub trigger: &'static str,
    pub handle: SessionHandle,
    pub status: StatusReceiver,
    pub snapshot: SnapshotReceiver,
    pub overlay: OverlayReceiver,
}

#[derive(Debug, Serialize)]
struct SnapshotInfo {
    seq: u64,
    captured_at_ms: i64,
    trigger: &'static str,
    object_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct StatusBody {
    camera_id: String,
    trigger: &'static str,
    status: SessionStatus,
    active: bool,
    snapshot: Option<SnapshotInfo>,
    overlay: bool,
}

fn jpeg(bytes: Vec<u8>) -> Response {
    ([(header::CONTENT_TYPE, "image/jpeg")], bytes).into_response()
}

/// GET /status
async fn status(State(state): State<Arc<ControlState>>) -> impl IntoResponse {
    let snapshot = state.snapshot.borrow().as_ref().map(|s| SnapshotInfo {
        seq: s.seq,
        captured_at_ms: s.captured_at_ms,
        trigger: s.reason.as_str(),
        object_key: s.object_key.clone(),
    });
    Json(StatusBody {
        camera_id: state.camera_id.clone(),
        trigger: state.trigger,
        status: *state.status.borrow(),
        active: state.handle.is_active(),
        snapshot,
        overlay: state.overlay.borrow().is_some(),
    })
}

async fn send(state: &ControlState, command: SessionCommand) -> StatusCode {
    if state.handle.send(command).await {
        info!(?command, "control command accepted");
        StatusCode::ACCEPTED
    } else {
        error!(?command, "session is gone, command dropped");
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// POST /capture
async fn capture(State(state): State<Arc<ControlState>>) -> StatusCode {
    send(&state, SessionCommand::Capture).await
}

/// POST /clear
async fn clear(State(state): State<Arc<ControlState>>) -> StatusCode {
    send(&state, SessionCommand::Clear).await
}

/// POST /stop
async fn stop(State(state): State<Arc<ControlState>>) -> StatusCode {
    if state.handle.stop().await {
        info!("stop requested over control surface");
        StatusCode::ACCEPTED
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// GET /snapshot.jpg
async fn snapshot(State(state): State<Arc<ControlState>>) -> Response {
    let latest = state.snapshot.borrow().clone();
    match latest {
        Some(s) => jpeg(s.jpeg.clone()),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// GET /overlay.jpg
async fn overlay(State(state): State<Arc<ControlState>>) -> Response {
    let latest = state.overlay.borrow().clone();
    match latest {
        Some(bytes) => jpeg(bytes.as_ref().clone()),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

pub fn router(state: Arc<ControlState>) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/capture", post(capture))
        .route("/clear", post(clear))
        .route("/stop", post(stop))
        .route("/snapshot.jpg", get(snapshot))
        .route("/overlay.jpg", get(overlay))
        .with_state(state)
}

/// Bind the control surface and serve it in a background task.
pub async fn spawn(
    port: u16,
    state: Arc<ControlState>,
) -> std::io::Result<tokio::task::JoinHandle<()>> {
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr, "control server listening");

    let app = router(state);
    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "control server failed");
        }
    }))
}
