use async_trait::async_trait;
use pose_capture_common::config::EstimatorConfig;
use pose_capture_common::frame::TimestampedFrame;
use pose_capture_common::pose::Pose;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{EstimatorError, PoseEstimator};

/// Remote inference server.
///
/// Each frame is POSTed as `image/jpeg` to `{url}?model={model}`; the server
/// answers with either a bare JSON array of poses or `{"poses": [...]}`.
pub struct HttpEstimator {
    client: Option<reqwest::Client>,
    url: String,
    model: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum EstimateResponse {
    Bare(Vec<Pose>),
    Wrapped { poses: Vec<Pose> },
}

impl EstimateResponse {
    fn into_poses(self) -> Vec<Pose> {
        match self {
            EstimateResponse::Bare(poses) => poses,
            EstimateResponse::Wrapped { poses } => poses,
        }
    }
}

impl HttpEstimator {
    pub fn new(config: &EstimatorConfig) -> Result<Self, EstimatorError> {
        let mut builder = reqwest::Client::builder().connect_timeout(Duration::from_secs(10));
        if let Some(secs) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        Ok(Self {
            client: Some(builder.build()?),
            url: config.url.clone(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl PoseEstimator for HttpEstimator {
    async fn estimate(&mut self, frame: &TimestampedFrame) -> Result<Vec<Pose>, EstimatorError> {
        let client = self.client.as_ref().ok_or(EstimatorError::Disposed)?;

        let response = client
            .post(&self.url)
            .query(&[("model", self.model.as_str())])
            .header(reqwest::header::CONTENT_TYPE, "image/jpeg")
            .body(frame.jpeg.clone())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(EstimatorError::Status(response.status().as_u16()));
        }

        let poses = response.json::<EstimateResponse>().await?.into_poses();
        debug!(seq = frame.seq, poses = poses.len(), "inference server answered");
        Ok(poses)
    }

    fn dispose(&mut self) {
        self.client = None;
    }

    fn name(&self) -> &str {
        "http"
    }
}
