use pose_capture_common::pose::Keypoint;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

impl From<&Keypoint> for Point {
    fn from(k: &Keypoint) -> Self {
        Self::new(k.x as f64, k.y as f64)
    }
}

/// Interior angle at the elbow, in radians, by the law of cosines.
///
/// `AB` is shoulder↔elbow, `BC` elbow↔wrist, `AC` shoulder↔wrist. Returns
/// `None` when either arm segment has zero length.
pub fn elbow_angle(shoulder: Point, elbow: Point, wrist: Point) -> Option<f64> {
    let ab = shoulder.distance(&elbow);
    let bc = elbow.distance(&wrist);
    let ac = shoulder.distance(&wrist);

    if ab == 0.0 || bc == 0.0 {
        return None;
    }

    let cos = (ab * ab + bc * bc - ac * ac) / (2.0 * ab * bc);
    Some(cos.clamp(-1.0, 1.0).acos())
}
