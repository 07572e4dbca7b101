use pose_capture_common::pose::{Pose, Side};

/// Why a capture fired.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TriggerReason {
    /// An elbow was bent inside the configured window.
    ArmAngle { side: Side, angle_deg: f64 },
    /// Every body part was visible.
    FullBody,
    /// Requested through the control surface.
    Manual,
}

impl TriggerReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerReason::ArmAngle { .. } => "arm_angle",
            TriggerReason::FullBody => "full_body",
            TriggerReason::Manual => "manual",
        }
    }
}

/// Geometric capture condition evaluated once per frame.
///
/// Implementations receive every pose the estimator found in the frame and
/// decide whether the capture sink should fire.
pub trait CaptureTrigger: Send + Sync {
    /// Returns `Some` when this frame should be captured.
    fn should_capture(&mut self, poses: &[Pose]) -> Option<TriggerReason>;

    /// Whether a capture ends detection for the session.
    fn is_terminal(&self) -> bool {
        false
    }

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}
