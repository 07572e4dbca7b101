use async_trait::async_trait;
use pose_capture_common::frame::TimestampedFrame;
use pose_capture_common::pose::Pose;
use std::collections::VecDeque;
use std::path::Path;
use tracing::{debug, info};

use super::{EstimatorError, PoseEstimator};

/// Plays back poses recorded earlier, one JSON-lines record per frame.
///
/// Each non-empty line is a JSON array of poses. Once the recording is
/// exhausted every further frame yields no poses.
#[derive(Debug)]
pub struct ReplayEstimator {
    records: VecDeque<Vec<Pose>>,
    disposed: bool,
}

impl ReplayEstimator {
    pub async fn load(path: &Path) -> Result<Self, EstimatorError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| EstimatorError::Io(path.display().to_string(), e))?;
        let estimator = Self::parse(&content)?;
        info!(
            path = path.display().to_string(),
            records = estimator.remaining(),
            "pose recording loaded"
        );
        Ok(estimator)
    }

    pub fn parse(content: &str) -> Result<Self, EstimatorError> {
        let mut records = VecDeque::new();
        for (idx, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let poses: Vec<Pose> =
                serde_json::from_str(line).map_err(|e| EstimatorError::Parse {
                    line: idx + 1,
                    message: e.to_string(),
                })?;
            records.push_back(poses);
        }
        Ok(Self {
            records,
            disposed: false,
        })
    }

    pub fn remaining(&self) -> usize {
        self.records.len()
    }
}

#[async_trait]
impl PoseEstimator for ReplayEstimator {
    async fn estimate(&mut self, frame: &TimestampedFrame) -> Result<Vec<Pose>, EstimatorError> {
        if self.disposed {
            return Err(EstimatorError::Disposed);
        }
        let poses = self.records.pop_front().unwrap_or_default();
        debug!(seq = frame.seq, poses = poses.len(), remaining = self.records.len(), "replayed poses");
        Ok(poses)
    }

    fn dispose(&mut self) {
        self.disposed = true;
        self.records.clear();
    }

    fn name(&self) -> &str {
        "replay"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECORDING: &str = r#"
[{"keypoints":[{"name":"nose","x":10,"y":10,"score":0.9}]}]

[]
"#;

    #[tokio::test]
    async fn replays_records_in_order() {
        let mut estimator = ReplayEstimator::parse(RECORDING).unwrap();
        assert_eq!(estimator.remaining(), 2);

        let frame = TimestampedFrame::new(vec![], 0, 0);
        assert_eq!(estimator.estimate(&frame).await.unwrap().len(), 1);
        assert!(estimator.estimate(&frame).await.unwrap().is_empty());
        // Exhausted: no poses, no error.
        assert!(estimator.estimate(&frame).await.unwrap().is_empty());
    }

    #[test]
    fn reports_bad_line_number() {
        let err = ReplayEstimator::parse("[]\nnot json\n").unwrap_err();
        assert!(matches!(err, EstimatorError::Parse { line: 2, .. }));
    }

    #[tokio::test]
    async fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("poses.jsonl");
        std::fs::write(&path, RECORDING).unwrap();
        let estimator = ReplayEstimator::load(&path).await.unwrap();
        assert_eq!(estimator.remaining(), 2);
    }
}
