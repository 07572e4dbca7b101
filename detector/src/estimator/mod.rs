//! Pose estimators.
//!
//! The model is a black box behind [`PoseEstimator`]: a JPEG frame goes in,
//! zero or more poses of named keypoints come out.

pub mod http;
pub mod replay;

use async_trait::async_trait;
use pose_capture_common::config::{EstimatorConfig, EstimatorKind};
use pose_capture_common::frame::TimestampedFrame;
use pose_capture_common::pose::Pose;
use tracing::info;

#[async_trait]
pub trait PoseEstimator: Send {
    /// Estimate the poses visible in one frame.
    async fn estimate(&mut self, frame: &TimestampedFrame) -> Result<Vec<Pose>, EstimatorError>;

    /// Release model resources. Later `estimate` calls return
    /// [`EstimatorError::Disposed`].
    fn dispose(&mut self) {}

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EstimatorError {
    #[error("estimator was disposed")]
    Disposed,
    #[error("inference request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("inference server returned HTTP {0}")]
    Status(u16),
    #[error("failed to read {0}: {1}")]
    Io(String, std::io::Error),
    #[error("invalid pose record on line {line}: {message}")]
    Parse { line: usize, message: String },
}

/// Build the estimator named by the config. This is the model-loading step.
pub async fn load_estimator(
    config: &EstimatorConfig,
) -> Result<Box<dyn PoseEstimator>, EstimatorError> {
    let estimator: Box<dyn PoseEstimator> = match config.kind {
        EstimatorKind::Http => Box::new(http::HttpEstimator::new(config)?),
        EstimatorKind::Replay => {
            let path = config.replay_path.as_deref().ok_or_else(|| {
                EstimatorError::Io(
                    "estimator.replay_path".into(),
                    std::io::Error::new(std::io::ErrorKind::NotFound, "not configured"),
                )
            })?;
            Box::new(replay::ReplayEstimator::load(path).await?)
        }
    };
    info!(estimator = estimator.name(), model = config.model, "pose estimator loaded");
    Ok(estimator)
}
