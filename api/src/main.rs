use std::path::{Path, PathBuf};
use std::sync::Arc;

use aws_credential_types::Credentials;
use aws_types::region::Region;
use axum::extract::{Path as AxumPath, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{TimeZone, Utc};
use pose_capture_common::config::{CaptureBackend, Config, RustfsConfig};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

enum ImageStore {
    /// Capture files under a local directory, served directly.
    Local { root: PathBuf },
    /// Objects in RustFS: reads redirect to the public URL, deletes go through S3.
    Rustfs {
        client: aws_sdk_s3::Client,
        bucket: String,
        public_url: String,
    },
}

struct AppState {
    db_dir: PathBuf,
    images: ImageStore,
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct Capture {
    id: i64,
    camera_id: String,
    trigger: String,
    side: Option<String>,
    angle_deg: Option<f64>,
    captured_at_ms: i64,
    captured_at: String,
    frame_seq: i64,
    object_key: String,
    size_bytes: i64,
}

#[derive(Debug, Default, Deserialize)]
struct CaptureQuery {
    start_ms: Option<i64>,
    end_ms: Option<i64>,
    trigger: Option<String>,
    limit: Option<i64>,
}

// ---------------------------------------------------------------------------
// DB helpers (sync, wrapped in spawn_blocking)
// ---------------------------------------------------------------------------

const CAPTURE_COLUMNS: &str =
    "id, camera_id, trigger_kind, side, angle_deg, captured_at_ms, frame_seq, object_key, size_bytes";

/// Camera ids name database files; anything that could leave `db_dir` is rejected.
fn valid_camera_id(camera_id: &str) -> bool {
    !camera_id.is_empty()
        && camera_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !camera_id.starts_with('.')
}

fn open_camera_db(db_dir: &Path, camera_id: &str) -> rusqlite::Result<Connection> {
    let path = db_dir.join(format!("{camera_id}.db"));
    if !path.exists() {
        return Err(rusqlite::Error::QueryReturnedNoRows);
    }
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
    Ok(conn)
}

fn iso_time(ms: i64) -> String {
    Utc.timestamp_millis_opt(ms)
        .single()
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default()
}

fn row_to_capture(row: &rusqlite::Row<'_>) -> rusqlite::Result<Capture> {
    let captured_at_ms: i64 = row.get(5)?;
    Ok(Capture {
        id: row.get(0)?,
        camera_id: row.get(1)?,
        trigger: row.get(2)?,
        side: row.get(3)?,
        angle_deg: row.get(4)?,
        captured_at_ms,
        captured_at: iso_time(captured_at_ms),
        frame_seq: row.get(6)?,
        object_key: row.get(7)?,
        size_bytes: row.get(8)?,
    })
}

fn list_camera_ids(db_dir: &Path) -> Vec<String> {
    let mut cameras = Vec::new();
    let Ok(entries) = std::fs::read_dir(db_dir) else {
        return cameras;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("db") {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                cameras.push(stem.to_string());
            }
        }
    }
    cameras.sort();
    cameras
}

fn query_captures(
    conn: &Connection,
    camera_id: &str,
    q: &CaptureQuery,
) -> rusqlite::Result<Vec<Capture>> {
    let mut wheres = vec!["camera_id = ?"];
    let mut values = vec![Value::from(camera_id.to_string())];
    if let Some(start) = q.start_ms {
        wheres.push("captured_at_ms >= ?");
        values.push(Value::from(start));
    }
    if let Some(end) = q.end_ms {
        wheres.push("captured_at_ms <= ?");
        values.push(Value::from(end));
    }
    if let Some(trigger) = &q.trigger {
        wheres.push("trigger_kind = ?");
        values.push(Value::from(trigger.clone()));
    }
    let limit = q.limit.unwrap_or(100).clamp(1, 1000);
    let sql = format!(
        "SELECT {CAPTURE_COLUMNS}
         FROM captures
         WHERE {}
         ORDER BY captured_at_ms ASC, id ASC
         LIMIT {limit}",
        wheres.join(" AND "),
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(values), row_to_capture)?;
    rows.collect()
}

fn find_capture(conn: &Connection, camera_id: &str, id: i64) -> rusqlite::Result<Option<Capture>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CAPTURE_COLUMNS} FROM captures WHERE id = ?1 AND camera_id = ?2"
    ))?;
    let mut rows = stmt.query_map(params![id, camera_id], row_to_capture)?;
    Ok(rows.next().transpose()?)
}

fn delete_capture_row(conn: &Connection, camera_id: &str, id: i64) -> rusqlite::Result<usize> {
    conn.execute(
        "DELETE FROM captures WHERE id = ?1 AND camera_id = ?2",
        params![id, camera_id],
    )
}

/// Look up one capture on the blocking pool. `Ok(None)` covers both an
/// unknown camera and an unknown id.
async fn lookup(
    state: &AppState,
    camera_id: String,
    id: i64,
) -> Result<Option<Capture>, Response> {
    if !valid_camera_id(&camera_id) {
        return Err(StatusCode::BAD_REQUEST.into_response());
    }
    let db_dir = state.db_dir.clone();
    let result = tokio::task::spawn_blocking(move || {
        let conn = open_camera_db(&db_dir, &camera_id)?;
        find_capture(&conn, &camera_id, id)
    })
    .await;

    match result {
        Ok(Ok(found)) => Ok(found),
        Ok(Err(rusqlite::Error::QueryReturnedNoRows)) => Ok(None),
        Ok(Err(e)) => {
            error!(error = %e, "SQLite query failed");
            Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response())
        }
        Err(e) => {
            error!(error = %e, "spawn_blocking failed");
            Err(StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
    }
}

/// Resolve an object key under the local capture root, refusing keys that
/// climb out of it.
fn local_path(root: &Path, key: &str) -> Option<PathBuf> {
    let rel = Path::new(key);
    if rel.is_absolute()
        || rel
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        return None;
    }
    Some(root.join(rel))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /cameras: list all cameras that have a .db file in db_dir
async fn list_cameras(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let db_dir = state.db_dir.clone();
    match tokio::task::spawn_blocking(move || list_camera_ids(&db_dir)).await {
        Ok(cameras) => Json(cameras).into_response(),
        Err(e) => {
            error!(error = %e, "spawn_blocking failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// GET /cameras/:camera_id/captures?start_ms=&end_ms=&trigger=&limit=
async fn list_captures(
    State(state): State<Arc<AppState>>,
    AxumPath(camera_id): AxumPath<String>,
    Query(q): Query<CaptureQuery>,
) -> impl IntoResponse {
    if !valid_camera_id(&camera_id) {
        return StatusCode::BAD_REQUEST.into_response();
    }
    let db_dir = state.db_dir.clone();
    let result = tokio::task::spawn_blocking(move || -> rusqlite::Result<Vec<Capture>> {
        let conn = open_camera_db(&db_dir, &camera_id)?;
        query_captures(&conn, &camera_id, &q)
    })
    .await;

    match result {
        Ok(Ok(captures)) => Json(captures).into_response(),
        Ok(Err(rusqlite::Error::QueryReturnedNoRows)) => StatusCode::NOT_FOUND.into_response(),
        Ok(Err(e)) => {
            error!(error = %e, "SQLite query failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
        Err(e) => {
            error!(error = %e, "spawn_blocking failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// GET /cameras/:camera_id/captures/:id
async fn get_capture(
    State(state): State<Arc<AppState>>,
    AxumPath((camera_id, id)): AxumPath<(String, i64)>,
) -> Response {
    match lookup(&state, camera_id, id).await {
        Ok(Some(capture)) => Json(capture).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(resp) => resp,
    }
}

/// GET /cameras/:camera_id/captures/:id/image: file bytes, or 302 to RustFS
async fn capture_image(
    State(state): State<Arc<AppState>>,
    AxumPath((camera_id, id)): AxumPath<(String, i64)>,
) -> Response {
    let capture = match lookup(&state, camera_id, id).await {
        Ok(Some(c)) => c,
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(resp) => return resp,
    };

    match &state.images {
        ImageStore::Local { root } => {
            let Some(path) = local_path(root, &capture.object_key) else {
                warn!(key = capture.object_key, "refusing to serve key outside capture root");
                return StatusCode::NOT_FOUND.into_response();
            };
            match tokio::fs::read(&path).await {
                Ok(bytes) => ([(header::CONTENT_TYPE, "image/jpeg")], bytes).into_response(),
                Err(e) => {
                    warn!(error = %e, path = path.display().to_string(), "capture file missing");
                    StatusCode::NOT_FOUND.into_response()
                }
            }
        }
        ImageStore::Rustfs {
            bucket, public_url, ..
        } => {
            let url = object_url(public_url, bucket, &capture.object_key);
            info!(url, "redirecting to RustFS object");
            found(url)
        }
    }
}

fn object_url(public_url: &str, bucket: &str, key: &str) -> String {
    format!(
        "{}/{}/{}",
        public_url.trim_end_matches('/'),
        bucket,
        key.trim_start_matches('/')
    )
}

/// 302 Found to `url`.
fn found(url: String) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, url)]).into_response()
}

/// DELETE /cameras/:camera_id/captures/:id: removes the row and the image
async fn delete_capture(
    State(state): State<Arc<AppState>>,
    AxumPath((camera_id, id)): AxumPath<(String, i64)>,
) -> Response {
    let capture = match lookup(&state, camera_id.clone(), id).await {
        Ok(Some(c)) => c,
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(resp) => return resp,
    };

    match &state.images {
        ImageStore::Local { root } => {
            if let Some(path) = local_path(root, &capture.object_key) {
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    warn!(error = %e, path = path.display().to_string(), "failed to remove capture file");
                }
            }
        }
        ImageStore::Rustfs { client, bucket, .. } => {
            if let Err(e) = client
                .delete_object()
                .bucket(bucket)
                .key(&capture.object_key)
                .send()
                .await
            {
                error!(error = %e, key = capture.object_key, "failed to delete RustFS object");
                return StatusCode::BAD_GATEWAY.into_response();
            }
        }
    }

    let db_dir = state.db_dir.clone();
    let result = tokio::task::spawn_blocking(move || -> rusqlite::Result<usize> {
        let conn = open_camera_db(&db_dir, &camera_id)?;
        delete_capture_row(&conn, &camera_id, id)
    })
    .await;

    match result {
        Ok(Ok(0)) => StatusCode::NOT_FOUND.into_response(),
        Ok(Ok(_)) => {
            info!(id, key = capture.object_key, "capture deleted");
            StatusCode::NO_CONTENT.into_response()
        }
        Ok(Err(e)) => {
            error!(error = %e, "SQLite delete failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
        Err(e) => {
            error!(error = %e, "spawn_blocking failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

async fn rustfs_client(config: &RustfsConfig) -> aws_sdk_s3::Client {
    let creds = Credentials::new(
        &config.access_key,
        &config.secret_key,
        None,
        None,
        "static",
    );
    let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .endpoint_url(&config.endpoint)
        .credentials_provider(creds)
        .region(Region::new("us-east-1"))
        .load()
        .await;
    let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
        .force_path_style(true)
        .build();
    aws_sdk_s3::Client::from_conf(s3_config)
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/cameras", get(list_cameras))
        .route("/cameras/:camera_id/captures", get(list_captures))
        .route(
            "/cameras/:camera_id/captures/:id",
            get(get_capture).delete(delete_capture),
        )
        .route("/cameras/:camera_id/captures/:id/image", get(capture_image))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    let images = match (config.capture.backend, &config.rustfs) {
        (CaptureBackend::Rustfs, Some(rustfs)) => ImageStore::Rustfs {
            client: rustfs_client(rustfs).await,
            bucket: config.rustfs_bucket(),
            public_url: config.api.rustfs_public_url.clone(),
        },
        _ => ImageStore::Local {
            root: config.capture.dir.clone(),
        },
    };

    let state = Arc::new(AppState {
        db_dir: PathBuf::from(&config.database.path),
        images,
    });

    let addr = format!("0.0.0.0:{}", config.api.port);
    info!(addr, backend = ?config.capture.backend, "pose-capture API server starting");

    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap_or_else(|e| {
        eprintln!("Failed to bind to {addr}: {e}");
        std::process::exit(1);
    });
    if let Err(e) = axum::serve(listener, router(state)).await {
        error!(error = %e, "API server failed");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rustfs_image_redirect_is_302() {
        let url = object_url("http://rustfs:9000/", "captures", "/cam-1/a.jpg");
        assert_eq!(url, "http://rustfs:9000/captures/cam-1/a.jpg");

        let resp = found(url.clone());
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(resp.headers()[header::LOCATION], url.as_str());
    }

    fn seeded_db(dir: &Path) -> Connection {
        let conn = Connection::open(dir.join("cam-1.db")).unwrap();
        conn.execute_batch(
            "CREATE TABLE captures (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                camera_id TEXT NOT NULL,
                trigger_kind TEXT NOT NULL,
                side TEXT,
                angle_deg REAL,
                captured_at_ms INTEGER NOT NULL,
                frame_seq INTEGER NOT NULL,
                object_key TEXT NOT NULL,
                size_bytes INTEGER NOT NULL
            );
            INSERT INTO captures VALUES (NULL, 'cam-1', 'arm_angle', 'left', 61.5, 1000, 1, 'a.jpg', 10);
            INSERT INTO captures VALUES (NULL, 'cam-1', 'manual', NULL, NULL, 2000, 2, 'b.jpg', 20);
            INSERT INTO captures VALUES (NULL, 'cam-1', 'full_body', NULL, NULL, 3000, 3, 'c.jpg', 30);",
        )
        .unwrap();
        conn
    }

    #[test]
    fn filters_combine() {
        let dir = tempfile::tempdir().unwrap();
        let conn = seeded_db(dir.path());

        let all = query_captures(&conn, "cam-1", &CaptureQuery::default()).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].captured_at, "1970-01-01T00:00:01+00:00");

        let q = CaptureQuery {
            start_ms: Some(1500),
            ..Default::default()
        };
        let later = query_captures(&conn, "cam-1", &q).unwrap();
        assert_eq!(later.iter().map(|c| c.frame_seq).collect::<Vec<_>>(), vec![2, 3]);

        let q = CaptureQuery {
            end_ms: Some(2500),
            trigger: Some("arm_angle".into()),
            limit: Some(5),
            ..Default::default()
        };
        let arm = query_captures(&conn, "cam-1", &q).unwrap();
        assert_eq!(arm.len(), 1);
        assert_eq!(arm[0].side.as_deref(), Some("left"));
        assert_eq!(arm[0].angle_deg, Some(61.5));
    }

    #[test]
    fn find_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let conn = seeded_db(dir.path());

        let found = find_capture(&conn, "cam-1", 2).unwrap().unwrap();
        assert_eq!(found.trigger, "manual");
        assert!(find_capture(&conn, "other", 2).unwrap().is_none());

        assert_eq!(delete_capture_row(&conn, "cam-1", 2).unwrap(), 1);
        assert_eq!(delete_capture_row(&conn, "cam-1", 2).unwrap(), 0);
    }

    #[test]
    fn lists_cameras_from_db_files() {
        let dir = tempfile::tempdir().unwrap();
        seeded_db(dir.path());
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        assert_eq!(list_camera_ids(dir.path()), vec!["cam-1".to_string()]);
    }

    #[test]
    fn unknown_camera_db_is_not_created() {
        let dir = tempfile::tempdir().unwrap();
        assert!(open_camera_db(dir.path(), "ghost").is_err());
        assert!(!dir.path().join("ghost.db").exists());
    }

    #[test]
    fn rejects_path_escapes() {
        assert!(valid_camera_id("webcam-0"));
        assert!(!valid_camera_id("../etc"));
        assert!(!valid_camera_id("a/b"));
        assert!(!valid_camera_id(""));

        let root = Path::new("/srv/captures");
        assert_eq!(
            local_path(root, "p/cam/x.jpg"),
            Some(PathBuf::from("/srv/captures/p/cam/x.jpg"))
        );
        assert!(local_path(root, "../secret.jpg").is_none());
        assert!(local_path(root, "/etc/passwd").is_none());
    }

    #[test]
    fn capture_serializes_trigger_fields() {
        let dir = tempfile::tempdir().unwrap();
        let conn = seeded_db(dir.path());
        let found = find_capture(&conn, "cam-1", 1).unwrap().unwrap();
        let json = serde_json::to_value(&found).unwrap();
        assert_eq!(json["trigger"], "arm_angle");
        assert_eq!(json["side"], "left");
        assert_eq!(json["object_key"], "a.jpg");
    }
}
