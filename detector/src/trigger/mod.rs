pub mod angle;
pub mod geometry;
pub mod traits;
pub mod visibility;

use pose_capture_common::config::{TriggerConfig, TriggerMode};

pub use traits::{CaptureTrigger, TriggerReason};

/// Build the trigger selected by `trigger.mode`.
pub fn from_config(config: &TriggerConfig) -> Box<dyn CaptureTrigger> {
    match config.mode {
        TriggerMode::ArmAngle => Box::new(angle::ArmAngleTrigger::new(
            config.min_confidence,
            config.angle_min_deg,
            config.angle_max_deg,
        )),
        TriggerMode::FullBody => Box::new(visibility::FullBodyTrigger::new(config.min_confidence)),
    }
}
