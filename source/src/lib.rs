//! Frame sources.
//!
//! Each source runs as a background task and publishes the newest frame into
//! a `watch` channel. Consumers always see the latest frame; frames that
//! arrive while a consumer is busy are overwritten, not queued. When a
//! source finishes (directory exhausted) its sender is dropped and
//! `Receiver::changed` starts returning errors.

mod directory;
mod mjpeg;

pub use mjpeg::MjpegParser;

use chrono::Utc;
use pose_capture_common::config::{SourceConfig, SourceMode};
use pose_capture_common::frame::TimestampedFrame;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

pub type FrameReceiver = watch::Receiver<Option<TimestampedFrame>>;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("HTTP connection failed: {0}")]
    HttpConnect(reqwest::Error),
    #[error("HTTP stream error: {0}")]
    HttpStream(reqwest::Error),
    #[error("HTTP status {0}")]
    HttpStatus(u16),
    #[error("failed to read frame directory {0}: {1}")]
    ReadDir(String, std::io::Error),
    #[error("failed to read frame file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("no JPEG files found in {0}")]
    EmptyDirectory(String),
    #[error("source misconfigured: {0}")]
    Config(String),
}

/// Stamps raw JPEG payloads and pushes them into the watch channel.
pub struct FramePublisher {
    tx: watch::Sender<Option<TimestampedFrame>>,
    seq: u64,
}

impl FramePublisher {
    pub fn new(tx: watch::Sender<Option<TimestampedFrame>>) -> Self {
        Self { tx, seq: 0 }
    }

    /// Returns `false` once every receiver is gone, so the caller can stop.
    pub fn publish(&mut self, jpeg: Vec<u8>) -> bool {
        let frame = TimestampedFrame::new(jpeg, Utc::now().timestamp_millis(), self.seq);
        self.seq += 1;
        self.tx.send(Some(frame)).is_ok()
    }

    pub fn published(&self) -> u64 {
        self.seq
    }
}

/// Start the configured source in the background.
pub fn spawn_source(config: SourceConfig) -> (FrameReceiver, JoinHandle<Result<(), SourceError>>) {
    let (tx, rx) = watch::channel(None);
    let handle = tokio::spawn(async move {
        let result = run_source(&config, FramePublisher::new(tx)).await;
        if let Err(e) = &result {
            error!(error = %e, "frame source stopped");
        }
        result
    });
    (rx, handle)
}

async fn run_source(config: &SourceConfig, publisher: FramePublisher) -> Result<(), SourceError> {
    info!(mode = ?config.mode, fps = config.fps, "starting frame source");
    let interval = Duration::from_secs_f64(1.0 / config.fps);

    match config.mode {
        SourceMode::Mjpeg => {
            let url = format!(
                "{}?quality={}&fps={}",
                config.url, config.quality, config.fps
            );
            mjpeg::run_mjpeg_source(&url, publisher).await
        }
        SourceMode::Polling => {
            let url = format!(
                "{}?quality={}",
                config.url.replace("/stream", "/frame"),
                config.quality
            );
            mjpeg::run_polling_source(&url, publisher, interval).await
        }
        SourceMode::Directory => {
            let dir = config
                .directory
                .as_deref()
                .ok_or_else(|| SourceError::Config("directory mode without a directory".into()))?;
            directory::run_directory_source(dir, publisher, interval).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publisher_numbers_frames() {
        let (tx, rx) = watch::channel(None);
        let mut publisher = FramePublisher::new(tx);
        assert!(publisher.publish(vec![1]));
        assert!(publisher.publish(vec![2]));

        let latest = rx.borrow().clone().unwrap();
        assert_eq!(latest.seq, 1);
        assert_eq!(latest.jpeg, vec![2]);
        assert_eq!(publisher.published(), 2);
    }

    #[test]
    fn publisher_reports_closed_channel() {
        let (tx, rx) = watch::channel(None);
        let mut publisher = FramePublisher::new(tx);
        drop(rx);
        assert!(!publisher.publish(vec![1]));
    }
}
