use pose_capture_common::pose::{Pose, BODY_PARTS};
use tracing::debug;

use super::traits::{CaptureTrigger, TriggerReason};

/// True when every one of the 17 body parts is present with
/// `score >= min_confidence` and non-zero coordinates.
///
/// A coordinate of exactly zero is what estimators report for an unset
/// point, so it counts as not visible.
pub fn is_fully_visible(pose: &Pose, min_confidence: f32) -> bool {
    BODY_PARTS
        .iter()
        .all(|part| part_visible(pose, part, min_confidence))
}

fn part_visible(pose: &Pose, part: &str, min_confidence: f32) -> bool {
    pose.keypoints
        .iter()
        .any(|k| k.name == part && k.score >= min_confidence && k.x != 0.0 && k.y != 0.0)
}

/// Fires once the best pose of a frame shows the whole body. Terminal.
pub struct FullBodyTrigger {
    min_confidence: f32,
}

impl FullBodyTrigger {
    pub fn new(min_confidence: f32) -> Self {
        Self { min_confidence }
    }
}

impl CaptureTrigger for FullBodyTrigger {
    fn should_capture(&mut self, poses: &[Pose]) -> Option<TriggerReason> {
        let pose = Pose::best(poses)?;
        if is_fully_visible(pose, self.min_confidence) {
            return Some(TriggerReason::FullBody);
        }
        if tracing::enabled!(tracing::Level::DEBUG) {
            let missing: Vec<&str> = BODY_PARTS
                .iter()
                .copied()
                .filter(|part| !part_visible(pose, part, self.min_confidence))
                .collect();
            debug!(?missing, "body not fully visible");
        }
        None
    }

    fn is_terminal(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "full_body"
    }
}
