//! Pose keypoints in COCO joint order.

use std::collections::BTreeMap;
use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A 2D point in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct Point2 {
    pub x: f64,
    pub y: f64,
}

impl Point2 {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point2) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Body joints in COCO keypoint order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum JointId {
    Nose,
    LeftEye,
    RightEye,
    LeftEar,
    RightEar,
    LeftShoulder,
    RightShoulder,
    LeftElbow,
    RightElbow,
    LeftWrist,
    RightWrist,
    LeftHip,
    RightHip,
    LeftKnee,
    RightKnee,
    LeftAnkle,
    RightAnkle,
}

impl JointId {
    pub const ALL: [JointId; 17] = [
        JointId::Nose,
        JointId::LeftEye,
        JointId::RightEye,
        JointId::LeftEar,
        JointId::RightEar,
        JointId::LeftShoulder,
        JointId::RightShoulder,
        JointId::LeftElbow,
        JointId::RightElbow,
        JointId::LeftWrist,
        JointId::RightWrist,
        JointId::LeftHip,
        JointId::RightHip,
        JointId::LeftKnee,
        JointId::RightKnee,
        JointId::LeftAnkle,
        JointId::RightAnkle,
    ];

    /// Joints tracked for ground contact.
    pub const ANKLES: [JointId; 2] = [JointId::LeftAnkle, JointId::RightAnkle];

    pub fn coco_index(&self) -> usize {
        *self as usize
    }

    pub fn from_coco_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JointId::Nose => "nose",
            JointId::LeftEye => "left_eye",
            JointId::RightEye => "right_eye",
            JointId::LeftEar => "left_ear",
            JointId::RightEar => "right_ear",
            JointId::LeftShoulder => "left_shoulder",
            JointId::RightShoulder => "right_shoulder",
            JointId::LeftElbow => "left_elbow",
            JointId::RightElbow => "right_elbow",
            JointId::LeftWrist => "left_wrist",
            JointId::RightWrist => "right_wrist",
            JointId::LeftHip => "left_hip",
            JointId::RightHip => "right_hip",
            JointId::LeftKnee => "left_knee",
            JointId::RightKnee => "right_knee",
            JointId::LeftAnkle => "left_ankle",
            JointId::RightAnkle => "right_ankle",
        }
    }
}

impl fmt::Display for JointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Limb connections used when rendering a pose skeleton.
pub const SKELETON_CONNECTIONS: &[(JointId, JointId)] = &[
    (JointId::Nose, JointId::LeftEye),
    (JointId::Nose, JointId::RightEye),
    (JointId::LeftEye, JointId::LeftEar),
    (JointId::RightEye, JointId::RightEar),
    (JointId::LeftShoulder, JointId::RightShoulder),
    (JointId::LeftShoulder, JointId::LeftElbow),
    (JointId::LeftElbow, JointId::LeftWrist),
    (JointId::RightShoulder, JointId::RightElbow),
    (JointId::RightElbow, JointId::RightWrist),
    (JointId::LeftShoulder, JointId::LeftHip),
    (JointId::RightShoulder, JointId::RightHip),
    (JointId::LeftHip, JointId::RightHip),
    (JointId::LeftHip, JointId::LeftKnee),
    (JointId::LeftKnee, JointId::LeftAnkle),
    (JointId::RightHip, JointId::RightKnee),
    (JointId::RightKnee, JointId::RightAnkle),
];

/// A single detected joint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Keypoint {
    pub x: f64,
    pub y: f64,
    /// Detector confidence in `[0, 1]`
    pub confidence: f64,
}

impl Keypoint {
    pub const fn new(x: f64, y: f64, confidence: f64) -> Self {
        Self { x, y, confidence }
    }

    pub fn position(&self) -> Point2 {
        Point2::new(self.x, self.y)
    }
}

/// Keypoints of one person in one frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct PoseKeypoints {
    pub joints: BTreeMap<JointId, Keypoint>,
}

impl PoseKeypoints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a COCO-ordered array of `(x, y, confidence)` triples.
    pub fn from_coco(values: &[[f64; 3]]) -> Self {
        let joints = values
            .iter()
            .enumerate()
            .filter_map(|(i, [x, y, c])| {
                JointId::from_coco_index(i).map(|j| (j, Keypoint::new(*x, *y, *c)))
            })
            .collect();
        Self { joints }
    }

    pub fn with_joint(mut self, joint: JointId, keypoint: Keypoint) -> Self {
        self.joints.insert(joint, keypoint);
        self
    }

    pub fn insert(&mut self, joint: JointId, keypoint: Keypoint) {
        self.joints.insert(joint, keypoint);
    }

    pub fn get(&self, joint: JointId) -> Option<&Keypoint> {
        self.joints.get(&joint)
    }

    /// Position of a joint if it was detected with at least `min_confidence`.
    pub fn confident(&self, joint: JointId, min_confidence: f64) -> Option<Point2> {
        self.get(joint)
            .filter(|k| k.confidence >= min_confidence && k.x.is_finite() && k.y.is_finite())
            .map(Keypoint::position)
    }

    pub fn is_empty(&self) -> bool {
        self.joints.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coco_indices() {
        assert_eq!(JointId::LeftAnkle.coco_index(), 15);
        assert_eq!(JointId::RightAnkle.coco_index(), 16);
        assert_eq!(JointId::from_coco_index(0), Some(JointId::Nose));
        assert_eq!(JointId::from_coco_index(17), None);
    }

    #[test]
    fn test_confident_filters_low_scores() {
        let pose = PoseKeypoints::new()
            .with_joint(JointId::LeftAnkle, Keypoint::new(10.0, 20.0, 0.9))
            .with_joint(JointId::RightAnkle, Keypoint::new(30.0, 20.0, 0.1));
        assert_eq!(
            pose.confident(JointId::LeftAnkle, 0.3),
            Some(Point2::new(10.0, 20.0))
        );
        assert_eq!(pose.confident(JointId::RightAnkle, 0.3), None);
        assert_eq!(pose.confident(JointId::Nose, 0.3), None);
    }

    #[test]
    fn test_keypoints_serialize_by_joint_name() {
        let pose =
            PoseKeypoints::new().with_joint(JointId::LeftAnkle, Keypoint::new(1.0, 2.0, 0.5));
        let json = serde_json::to_value(&pose).unwrap();
        assert_eq!(json["left_ankle"]["confidence"], 0.5);
        let back: PoseKeypoints = serde_json::from_value(json).unwrap();
        assert_eq!(back, pose);
    }

    #[test]
    fn test_from_coco() {
        let mut values = vec![[0.0, 0.0, 0.0]; 17];
        values[15] = [5.0, 6.0, 0.8];
        let pose = PoseKeypoints::from_coco(&values);
        assert_eq!(pose.joints.len(), 17);
        assert_eq!(pose.get(JointId::LeftAnkle).unwrap().x, 5.0);
    }
}
