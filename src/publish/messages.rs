use std::f64::consts::PI;

use anyhow::Result;
use nalgebra::UnitQuaternion;
use serde::{Deserialize, Serialize};

use crate::motion::PositionSample;
use crate::wire::Header;

pub const MARKER_TYPE_CYLINDER: i32 = 3;
pub const MARKER_ACTION_ADD: i32 = 0;
pub const MARKER_NAMESPACE: &str = "basic_shapes";

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn from_sample(sample: &PositionSample) -> Self {
        Self::new(f64::from(sample.x), f64::from(sample.y), f64::from(sample.z))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Quaternion {
    pub fn identity() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            w: 1.0,
        }
    }

    /// Fixed-axis roll, pitch, yaw (radians), applied in that order.
    pub fn from_rpy(roll: f64, pitch: f64, yaw: f64) -> Self {
        let q = UnitQuaternion::from_euler_angles(roll, pitch, yaw);
        Self {
            x: q.i,
            y: q.j,
            z: q.k,
            w: q.w,
        }
    }
}

/// Constant orientation of the detected-human frame relative to the camera:
/// roll -90°, pitch 90°, yaw 180°.
pub fn human_frame_rotation() -> Quaternion {
    Quaternion::from_rpy(-PI / 2.0, PI / 2.0, PI)
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransformStamped {
    pub header: Header,
    pub child_frame_id: String,
    pub translation: Vector3,
    pub rotation: Quaternion,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: Vector3,
    pub orientation: Quaternion,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PoseStamped {
    pub header: Header,
    pub pose: Pose,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColorRgba {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    pub header: Header,
    pub ns: String,
    pub id: i32,
    #[serde(rename = "type")]
    pub marker_type: i32,
    pub action: i32,
    pub pose: Pose,
    pub scale: Vector3,
    pub color: ColorRgba,
    /// Seconds; 0 keeps the marker until it is replaced.
    pub lifetime: f64,
}

impl Marker {
    /// Flat translucent-purple disc on the ground plane at (x, y).
    pub fn ground_cylinder(header: Header, x: f64, y: f64) -> Self {
        Self {
            header,
            ns: MARKER_NAMESPACE.to_string(),
            id: 0,
            marker_type: MARKER_TYPE_CYLINDER,
            action: MARKER_ACTION_ADD,
            pose: Pose {
                position: Vector3::new(x, y, 0.0),
                orientation: Quaternion::identity(),
            },
            scale: Vector3::new(1.0, 1.0, 0.01),
            color: ColorRgba {
                r: 0.5,
                g: 0.0,
                b: 0.7,
                a: 1.0,
            },
            lifetime: 0.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VelocityStamped {
    pub header: Header,
    /// Meters per second.
    pub speed: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub enum OutputMessage {
    Transform(TransformStamped),
    Pose(PoseStamped),
    Marker(Marker),
    Velocity(VelocityStamped),
}

impl OutputMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transform(_) => "transform",
            Self::Pose(_) => "pose",
            Self::Marker(_) => "marker",
            Self::Velocity(_) => "velocity",
        }
    }

    /// JSON wire payload of the wrapped message.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        let payload = match self {
            Self::Transform(m) => serde_json::to_vec(m)?,
            Self::Pose(m) => serde_json::to_vec(m)?,
            Self::Marker(m) => serde_json::to_vec(m)?,
            Self::Velocity(m) => serde_json::to_vec(m)?,
        };
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn human_frame_rotation_matches_fixed_rpy() {
        let q = human_frame_rotation();
        assert!(close(q.x, -0.5), "x={}", q.x);
        assert!(close(q.y, -0.5), "y={}", q.y);
        assert!(close(q.z, 0.5), "z={}", q.z);
        assert!(close(q.w, -0.5), "w={}", q.w);
        let norm = (q.x * q.x + q.y * q.y + q.z * q.z + q.w * q.w).sqrt();
        assert!(close(norm, 1.0));
    }

    #[test]
    fn marker_serializes_with_type_key() {
        let marker = Marker::ground_cylinder(Header::new(4.0, "human_detected"), 1.0, 2.0);
        let json: serde_json::Value =
            serde_json::from_slice(&OutputMessage::Marker(marker).to_json().unwrap()).unwrap();
        assert_eq!(json["type"], 3);
        assert_eq!(json["ns"], "basic_shapes");
        assert_eq!(json["scale"]["z"], 0.01);
        assert_eq!(json["pose"]["position"]["z"], 0.0);
        assert_eq!(json["color"]["b"].as_f64().unwrap() as f32, 0.7);
        assert_eq!(json["header"]["frame_id"], "human_detected");
    }
}
