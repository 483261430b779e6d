//! Value: typed transform payloads exchanged between the editor core and hosts.
//! All numeric types use f32; quaternions are stored (w, x, y, z) to match the
//! convention of the DNA container.

use serde::{Deserialize, Serialize};

/// Lightweight kind enum for pattern-matching and quick dispatch.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ValueKind {
    Float,
    Vec3,
    Quat,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum Value {
    /// Scalar float
    Float(f32),

    /// 3D vector (location, euler rotation, or scale triple)
    Vec3([f32; 3]),

    /// Quaternion (w, x, y, z)
    Quat([f32; 4]),
}

impl Value {
    /// Return the coarse kind of this value.
    #[inline]
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Float(_) => ValueKind::Float,
            Value::Vec3(_) => ValueKind::Vec3,
            Value::Quat(_) => ValueKind::Quat,
        }
    }

    /// Convenience constructors
    pub fn f(v: f32) -> Self {
        Value::Float(v)
    }

    pub fn vec3(x: f32, y: f32, z: f32) -> Self {
        Value::Vec3([x, y, z])
    }

    pub fn quat(w: f32, x: f32, y: f32, z: f32) -> Self {
        Value::Quat([w, x, y, z])
    }
}

/// A bone's local pose relative to its rest pose. This is the quantity the
/// DNA container stores per driven bone, and the quantity a host armature
/// reports back when sampling: location/scale are deltas from rest, rotation
/// is the local rotation in both Euler XYZ and quaternion form.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct TransformDelta {
    pub location: [f32; 3],
    pub euler_rotation: [f32; 3],
    pub quaternion_rotation: [f32; 4],
    pub scale: [f32; 3],
}

impl Default for TransformDelta {
    fn default() -> Self {
        Self {
            location: [0.0; 3],
            euler_rotation: [0.0; 3],
            quaternion_rotation: QUAT_IDENTITY,
            scale: [0.0; 3],
        }
    }
}

impl TransformDelta {
    /// The rest pose itself: zero deltas, identity rotation.
    pub fn identity() -> Self {
        Self::default()
    }

    pub fn from_euler(location: [f32; 3], euler_rotation: [f32; 3], scale: [f32; 3]) -> Self {
        Self {
            location,
            euler_rotation,
            quaternion_rotation: euler_to_quat(euler_rotation),
            scale,
        }
    }
}

/// Identity quaternion (w, x, y, z).
pub const QUAT_IDENTITY: [f32; 4] = [1.0, 0.0, 0.0, 0.0];

#[inline]
pub fn vec3_sub(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

#[inline]
pub fn vec3_length(v: [f32; 3]) -> f32 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

/// Euclidean distance between two float triples.
#[inline]
pub fn vec3_distance(a: [f32; 3], b: [f32; 3]) -> f32 {
    vec3_length(vec3_sub(a, b))
}

#[inline]
fn dot4(a: [f32; 4], b: [f32; 4]) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2] + a[3] * b[3]
}

/// Normalize a quaternion; falls back to identity for degenerate input.
pub fn quat_normalize(q: [f32; 4]) -> [f32; 4] {
    let len = dot4(q, q).sqrt();
    if len <= f32::EPSILON {
        return QUAT_IDENTITY;
    }
    [q[0] / len, q[1] / len, q[2] / len, q[3] / len]
}

/// Angle (radians) of the rotation taking normalized `a` to normalized `b`.
/// Equivalent to `a.rotation_difference(b).angle` in host math libraries.
pub fn quat_angle_between(a: [f32; 4], b: [f32; 4]) -> f32 {
    let an = quat_normalize(a);
    let bn = quat_normalize(b);
    let d = dot4(an, bn).abs().min(1.0);
    2.0 * d.acos()
}

/// Euler XYZ (x applied first) to quaternion (w, x, y, z).
pub fn euler_to_quat(e: [f32; 3]) -> [f32; 4] {
    let (sx, cx) = (e[0] * 0.5).sin_cos();
    let (sy, cy) = (e[1] * 0.5).sin_cos();
    let (sz, cz) = (e[2] * 0.5).sin_cos();
    [
        cx * cy * cz + sx * sy * sz,
        sx * cy * cz - cx * sy * sz,
        cx * sy * cz + sx * cy * sz,
        cx * cy * sz - sx * sy * cz,
    ]
}

/// Quaternion (w, x, y, z) to Euler XYZ (x applied first).
pub fn quat_to_euler(q: [f32; 4]) -> [f32; 3] {
    let [w, x, y, z] = quat_normalize(q);
    let m00 = 1.0 - 2.0 * (y * y + z * z);
    let m10 = 2.0 * (x * y + w * z);
    let m20 = 2.0 * (x * z - w * y);
    let m21 = 2.0 * (y * z + w * x);
    let m22 = 1.0 - 2.0 * (x * x + y * y);
    [
        m21.atan2(m22),
        (-m20).clamp(-1.0, 1.0).asin(),
        m10.atan2(m00),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) {
        assert!((a - b).abs() <= 1e-5, "left={a} right={b}");
    }

    #[test]
    fn euler_quat_round_trip() {
        let e = [0.4, -0.25, 1.1];
        let q = euler_to_quat(e);
        let back = quat_to_euler(q);
        for i in 0..3 {
            approx(back[i], e[i]);
        }
    }

    #[test]
    fn angle_between_is_zero_for_same_rotation() {
        let q = euler_to_quat([0.3, 0.0, -0.2]);
        approx(quat_angle_between(q, q), 0.0);
        // Double-cover: q and -q encode the same rotation.
        let neg = [-q[0], -q[1], -q[2], -q[3]];
        approx(quat_angle_between(q, neg), 0.0);
    }

    #[test]
    fn angle_between_single_axis() {
        let a = euler_to_quat([0.0, 0.0, 0.0]);
        let b = euler_to_quat([0.5, 0.0, 0.0]);
        approx(quat_angle_between(a, b), 0.5);
    }

    #[test]
    fn degenerate_quat_normalizes_to_identity() {
        assert_eq!(quat_normalize([0.0; 4]), QUAT_IDENTITY);
    }
}
