use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::{FramePublisher, SourceError};

/// JPEG files in `dir`, sorted by file name.
pub fn list_frames(dir: &Path) -> Result<Vec<PathBuf>, SourceError> {
    let entries =
        std::fs::read_dir(dir).map_err(|e| SourceError::ReadDir(dir.display().to_string(), e))?;

    let mut frames: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case("jpg") || e.eq_ignore_ascii_case("jpeg"))
                .unwrap_or(false)
        })
        .collect();
    frames.sort();
    Ok(frames)
}

/// Replay a directory of JPEG files once, one file per tick.
pub async fn run_directory_source(
    dir: &Path,
    mut publisher: FramePublisher,
    interval: Duration,
) -> Result<(), SourceError> {
    let frames = list_frames(dir)?;
    if frames.is_empty() {
        return Err(SourceError::EmptyDirectory(dir.display().to_string()));
    }

    info!(dir = dir.display().to_string(), count = frames.len(), "replaying frame directory");

    let mut ticker = tokio::time::interval(interval);
    for path in frames {
        ticker.tick().await;
        let jpeg = tokio::fs::read(&path)
            .await
            .map_err(|e| SourceError::ReadFile(path.display().to_string(), e))?;
        debug!(path = path.display().to_string(), bytes = jpeg.len(), "replaying frame");
        if !publisher.publish(jpeg) {
            break;
        }
    }

    info!(published = publisher.published(), "frame directory exhausted");
    Ok(())
}
