use pose_capture_common::pose::{Pose, Side};
use tracing::debug;

use super::geometry::elbow_angle;
use super::traits::{CaptureTrigger, TriggerReason};

/// Fires when either elbow is bent inside an open angle window.
///
/// A side is only measured when its shoulder, elbow and wrist are all
/// present with a score strictly above `min_confidence`; a missing or weak
/// keypoint skips that side without affecting the other one.
pub struct ArmAngleTrigger {
    min_confidence: f32,
    min_rad: f64,
    max_rad: f64,
}

impl ArmAngleTrigger {
    pub fn new(min_confidence: f32, min_deg: f64, max_deg: f64) -> Self {
        Self {
            min_confidence,
            min_rad: min_deg.to_radians(),
            max_rad: max_deg.to_radians(),
        }
    }

    /// Elbow angle for one side, if all three keypoints are confident.
    pub fn side_angle(&self, pose: &Pose, side: Side) -> Option<f64> {
        let shoulder = pose.confident(side.shoulder(), self.min_confidence)?;
        let elbow = pose.confident(side.elbow(), self.min_confidence)?;
        let wrist = pose.confident(side.wrist(), self.min_confidence)?;
        elbow_angle(shoulder.into(), elbow.into(), wrist.into())
    }

    /// Open interval: both bounds are excluded.
    pub fn in_window(&self, angle: f64) -> bool {
        angle > self.min_rad && angle < self.max_rad
    }
}

impl CaptureTrigger for ArmAngleTrigger {
    fn should_capture(&mut self, poses: &[Pose]) -> Option<TriggerReason> {
        for pose in poses {
            for side in Side::BOTH {
                let Some(angle) = self.side_angle(pose, side) else {
                    debug!(side = side.as_str(), "arm not measurable");
                    continue;
                };
                let angle_deg = angle.to_degrees();
                if self.in_window(angle) {
                    debug!(side = side.as_str(), angle_deg, "arm angle inside capture window");
                    return Some(TriggerReason::ArmAngle { side, angle_deg });
                }
                debug!(side = side.as_str(), angle_deg, "arm angle outside capture window");
            }
        }
        None
    }

    fn name(&self) -> &str {
        "arm_angle"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pose_capture_common::pose::Keypoint;

    fn trigger() -> ArmAngleTrigger {
        ArmAngleTrigger::new(0.6, 45.0, 90.0)
    }

    /// Elbow at `(100, 100)`, upper arm pointing right, forearm rotated by `deg`.
    fn arm(side: Side, deg: f64, score: f32) -> Vec<Keypoint> {
        let (ex, ey) = (100.0_f64, 100.0_f64);
        let rad = deg.to_radians();
        vec![
            Keypoint::new(side.shoulder(), (ex + 50.0) as f32, ey as f32, score),
            Keypoint::new(side.elbow(), ex as f32, ey as f32, score),
            Keypoint::new(
                side.wrist(),
                (ex + 40.0 * rad.cos()) as f32,
                (ey + 40.0 * rad.sin()) as f32,
                score,
            ),
        ]
    }

    fn pose(parts: Vec<Vec<Keypoint>>) -> Pose {
        Pose::new(parts.into_iter().flatten().collect())
    }

    #[test]
    fn sixty_degree_elbow_triggers() {
        let poses = vec![pose(vec![arm(Side::Left, 60.0, 0.9)])];
        match trigger().should_capture(&poses) {
            Some(TriggerReason::ArmAngle { side, angle_deg }) => {
                assert_eq!(side, Side::Left);
                assert!((angle_deg - 60.0).abs() < 1e-3, "{angle_deg}");
            }
            other => panic!("expected arm-angle capture, got {other:?}"),
        }
    }

    #[test]
    fn straight_arm_does_not_trigger() {
        let poses = vec![pose(vec![arm(Side::Left, 180.0, 0.9), arm(Side::Right, 180.0, 0.9)])];
        assert!(trigger().should_capture(&poses).is_none());
    }

    #[test]
    fn window_bounds_are_exclusive() {
        let t = trigger();
        assert!(!t.in_window(std::f64::consts::FRAC_PI_4));
        assert!(!t.in_window(std::f64::consts::FRAC_PI_2));
        assert!(t.in_window(std::f64::consts::FRAC_PI_3));
        assert!(!t.in_window(f64::NAN));
    }

    #[test]
    fn confidence_must_be_strictly_above_threshold() {
        let poses = vec![pose(vec![arm(Side::Right, 60.0, 0.6)])];
        assert!(trigger().should_capture(&poses).is_none());
    }

    #[test]
    fn missing_wrist_skips_only_that_side() {
        let mut left = arm(Side::Left, 60.0, 0.9);
        left.retain(|k| k.name != "left_wrist");
        let poses = vec![pose(vec![left, arm(Side::Right, 70.0, 0.9)])];

        let t = trigger();
        assert!(t.side_angle(&poses[0], Side::Left).is_none());

        match trigger().should_capture(&poses) {
            Some(TriggerReason::ArmAngle { side, .. }) => assert_eq!(side, Side::Right),
            other => panic!("expected right arm capture, got {other:?}"),
        }
    }

    #[test]
    fn missing_wrist_alone_never_triggers() {
        let mut left = arm(Side::Left, 60.0, 0.9);
        left.retain(|k| k.name != "left_wrist");
        let poses = vec![pose(vec![left, arm(Side::Right, 170.0, 0.9)])];
        assert!(trigger().should_capture(&poses).is_none());
        assert!(trigger().should_capture(&[Pose::default()]).is_none());
        assert!(trigger().should_capture(&[]).is_none());
    }

    #[test]
    fn any_pose_in_the_frame_can_trigger() {
        let poses = vec![
            pose(vec![arm(Side::Left, 175.0, 0.9)]),
            pose(vec![arm(Side::Left, 80.0, 0.9)]),
        ];
        assert!(trigger().should_capture(&poses).is_some());
    }
}
