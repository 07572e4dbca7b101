use serde::{Deserialize, Serialize};

/// The 17 body parts a MoveNet/COCO model reports, in model output order.
pub const BODY_PARTS: [&str; 17] = [
    "nose",
    "left_eye",
    "right_eye",
    "left_ear",
    "right_ear",
    "left_shoulder",
    "right_shoulder",
    "left_elbow",
    "right_elbow",
    "left_wrist",
    "right_wrist",
    "left_hip",
    "right_hip",
    "left_knee",
    "right_knee",
    "left_ankle",
    "right_ankle",
];

/// Anatomically adjacent keypoints, as drawn by the MoveNet skeleton.
pub const SKELETON_EDGES: [(&str, &str); 16] = [
    ("nose", "left_eye"),
    ("nose", "right_eye"),
    ("left_eye", "left_ear"),
    ("right_eye", "right_ear"),
    ("left_shoulder", "right_shoulder"),
    ("left_shoulder", "left_elbow"),
    ("left_shoulder", "left_hip"),
    ("right_shoulder", "right_elbow"),
    ("right_shoulder", "right_hip"),
    ("left_elbow", "left_wrist"),
    ("right_elbow", "right_wrist"),
    ("left_hip", "right_hip"),
    ("left_hip", "left_knee"),
    ("right_hip", "right_knee"),
    ("left_knee", "left_ankle"),
    ("right_knee", "right_ankle"),
];

/// One named, scored 2D point reported by the estimator (pixel coordinates).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub name: String,
    pub x: f32,
    pub y: f32,
    pub score: f32,
}

impl Keypoint {
    pub fn new(name: impl Into<String>, x: f32, y: f32, score: f32) -> Self {
        Self {
            name: name.into(),
            x,
            y,
            score,
        }
    }
}

/// All keypoints detected for one person in one frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub keypoints: Vec<Keypoint>,
    /// Whole-pose confidence, when the model reports one.
    #[serde(default)]
    pub score: Option<f32>,
}

impl Pose {
    pub fn new(keypoints: Vec<Keypoint>) -> Self {
        Self {
            keypoints,
            score: None,
        }
    }

    /// Looks a keypoint up by name. Missing parts are `None`, never a panic.
    pub fn keypoint(&self, name: &str) -> Option<&Keypoint> {
        self.keypoints.iter().find(|k| k.name == name)
    }

    /// Like [`Pose::keypoint`], but only if its score is strictly above `threshold`.
    pub fn confident(&self, name: &str, threshold: f32) -> Option<&Keypoint> {
        self.keypoint(name).filter(|k| k.score > threshold)
    }

    /// Pose score if reported, otherwise the mean keypoint score.
    pub fn confidence(&self) -> f32 {
        if let Some(score) = self.score {
            return score;
        }
        if self.keypoints.is_empty() {
            return 0.0;
        }
        self.keypoints.iter().map(|k| k.score).sum::<f32>() / self.keypoints.len() as f32
    }

    /// The most confident pose of a frame.
    pub fn best(poses: &[Pose]) -> Option<&Pose> {
        poses
            .iter()
            .max_by(|a, b| a.confidence().total_cmp(&b.confidence()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::Left, Side::Right];

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }

    pub fn shoulder(&self) -> &'static str {
        match self {
            Side::Left => "left_shoulder",
            Side::Right => "right_shoulder",
        }
    }

    pub fn elbow(&self) -> &'static str {
        match self {
            Side::Left => "left_elbow",
            Side::Right => "right_elbow",
        }
    }

    pub fn wrist(&self) -> &'static str {
        match self {
            Side::Left => "left_wrist",
            Side::Right => "right_wrist",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_name() {
        let pose = Pose::new(vec![
            Keypoint::new("nose", 10.0, 20.0, 0.9),
            Keypoint::new("left_wrist", 5.0, 5.0, 0.3),
        ]);
        assert_eq!(pose.keypoint("nose").unwrap().x, 10.0);
        assert!(pose.keypoint("right_ankle").is_none());
        assert!(pose.confident("nose", 0.6).is_some());
        assert!(pose.confident("left_wrist", 0.6).is_none());
        // Strictly above: a score equal to the threshold does not pass.
        assert!(pose.confident("left_wrist", 0.3).is_none());
    }

    #[test]
    fn best_prefers_pose_score_then_mean() {
        let weak = Pose::new(vec![Keypoint::new("nose", 1.0, 1.0, 0.2)]);
        let strong = Pose::new(vec![Keypoint::new("nose", 1.0, 1.0, 0.8)]);
        let scored = Pose {
            keypoints: vec![Keypoint::new("nose", 1.0, 1.0, 0.1)],
            score: Some(0.95),
        };

        let poses = vec![weak.clone(), strong.clone()];
        assert_eq!(Pose::best(&poses), Some(&strong));

        let poses = vec![weak, strong, scored.clone()];
        assert_eq!(Pose::best(&poses), Some(&scored));
        assert!(Pose::best(&[]).is_none());
    }

    #[test]
    fn deserializes_estimator_json() {
        let json = r#"{"keypoints":[{"name":"nose","x":1.5,"y":2.5,"score":0.75}]}"#;
        let pose: Pose = serde_json::from_str(json).unwrap();
        assert_eq!(pose.keypoints.len(), 1);
        assert!(pose.score.is_none());
    }

    #[test]
    fn skeleton_edges_reference_known_parts() {
        for (a, b) in SKELETON_EDGES {
            assert!(BODY_PARTS.contains(&a), "{a}");
            assert!(BODY_PARTS.contains(&b), "{b}");
        }
    }
}
