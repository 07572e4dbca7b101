mod control;
mod db;
mod estimator;
mod keys;
mod render;
mod session;
mod storage;
mod trigger;

use control::ControlState;
use pose_capture_common::config::Config;
use session::{CaptureDebounce, CaptureSink, Session, SessionCommand, SessionHandle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

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

    info!(
        camera_id = config.camera.id,
        source = ?config.source.mode,
        estimator = ?config.estimator.kind,
        model = config.estimator.model,
        trigger = config.trigger.mode.as_str(),
        min_confidence = config.trigger.min_confidence,
        debounce_ms = config.trigger.debounce_ms,
        capture_backend = ?config.capture.backend,
        "starting pose-capture detector"
    );

    let storage = match storage::CaptureStorage::from_config(&config).await {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!(error = %e, "failed to set up capture storage");
            std::process::exit(1);
        }
    };
    if let Err(e) = storage.ensure_ready().await {
        error!(error = %e, backend = storage.backend_name(), "capture storage is not reachable");
        std::process::exit(1);
    }

    // Open per-camera SQLite database for capture metadata.
    let camera_id = config.camera.id.clone();
    let capture_db = match db::CaptureDb::open(Path::new(&config.database.path), &camera_id) {
        Ok(d) => {
            if let (Ok(count), Ok(last)) = (d.count(), d.latest()) {
                info!(
                    count,
                    last_capture_ms = last.map(|r| r.captured_at_ms),
                    "existing capture history"
                );
            }
            Some(Arc::new(d))
        }
        Err(e) => {
            error!(error = %e, "failed to open SQLite capture DB; metadata will not be persisted");
            None
        }
    };

    let (frames, source_task) = pose_capture_source::spawn_source(config.source.clone());

    let sink = CaptureSink::new(
        frames.clone(),
        storage,
        capture_db,
        camera_id.clone(),
        config.capture.prefix.clone(),
        config.capture.retain,
    );
    let render = config.render.enabled.then(|| config.render.clone());
    let (mut session, handle) = Session::new(
        trigger::from_config(&config.trigger),
        CaptureDebounce::from_millis(config.trigger.debounce_ms),
        sink,
        render,
    );

    let control_state = Arc::new(ControlState {
        camera_id,
        trigger: config.trigger.mode.as_str(),
        handle: handle.clone(),
        status: session.subscribe_status(),
        snapshot: session.subscribe_snapshot(),
        overlay: session.subscribe_overlay(),
    });
    if let Err(e) = control::spawn(config.control.port, control_state).await {
        error!(error = %e, port = config.control.port, "failed to bind control server");
        std::process::exit(1);
    }

    // Status stays Loading until the model is ready.
    let estimator = match estimator::load_estimator(&config.estimator).await {
        Ok(e) => e,
        Err(e) => {
            error!(error = %e, "failed to load pose estimator");
            std::process::exit(1);
        }
    };
    session.start(estimator);

    tokio::spawn(shutdown_on_ctrl_c(handle));

    let final_status = session.run(frames).await;
    info!(status = ?final_status, "session ended");

    if source_task.is_finished() {
        match source_task.await {
            Ok(Ok(())) => info!("frame source finished"),
            Ok(Err(e)) => {
                error!(error = %e, "frame source failed");
                std::process::exit(1);
            }
            Err(e) => error!(error = %e, "frame source task panicked"),
        }
    } else {
        source_task.abort();
    }
}

async fn shutdown_on_ctrl_c(handle: SessionHandle) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        return;
    }
    info!("ctrl-c received, stopping detection");
    handle.stop().await;
    handle.send(SessionCommand::Shutdown).await;
}
