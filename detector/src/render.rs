use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_line_segment_mut};
use pose_capture_common::config::RenderConfig;
use pose_capture_common::frame::TimestampedFrame;
use pose_capture_common::pose::{Pose, SKELETON_EDGES};

const KEYPOINT_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
const SKELETON_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("failed to decode frame: {0}")]
    Decode(image::ImageError),
    #[error("failed to encode overlay: {0}")]
    Encode(image::ImageError),
}

/// Draw keypoints and skeleton lines for one pose.
///
/// Keypoints need a score strictly above `min_confidence`; an edge is drawn
/// only when both of its endpoints pass.
pub fn draw_pose(img: &mut RgbImage, pose: &Pose, min_confidence: f32, radius: i32) {
    for kp in pose.keypoints.iter().filter(|k| k.score > min_confidence) {
        draw_filled_circle_mut(
            img,
            (kp.x.round() as i32, kp.y.round() as i32),
            radius,
            KEYPOINT_COLOR,
        );
    }

    for (a, b) in SKELETON_EDGES {
        let (Some(p1), Some(p2)) = (
            pose.confident(a, min_confidence),
            pose.confident(b, min_confidence),
        ) else {
            continue;
        };
        // Two parallel 1px segments make a 2px line.
        draw_line_segment_mut(img, (p1.x, p1.y), (p2.x, p2.y), SKELETON_COLOR);
        draw_line_segment_mut(img, (p1.x + 1.0, p1.y), (p2.x + 1.0, p2.y), SKELETON_COLOR);
    }
}

/// Decode the frame, draw every pose on it and re-encode as JPEG.
pub fn render_overlay(
    frame: &TimestampedFrame,
    poses: &[Pose],
    config: &RenderConfig,
) -> Result<Vec<u8>, RenderError> {
    let mut img = image::load_from_memory(&frame.jpeg)
        .map_err(RenderError::Decode)?
        .to_rgb8();

    for pose in poses {
        draw_pose(&mut img, pose, config.min_confidence, config.keypoint_radius);
    }

    let mut out = Vec::with_capacity(frame.jpeg.len());
    JpegEncoder::new_with_quality(&mut out, config.jpeg_quality)
        .encode_image(&img)
        .map_err(RenderError::Encode)?;
    Ok(out)
}
