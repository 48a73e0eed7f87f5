//! Rotation parameterizations: unit quaternions and body-fixed 1-2-3 angles.
//!
//! Quaternion convention: q = [w; x; y; z] where w is scalar, (x,y,z) is vector part.
//! All matrices returned here are active rotations R_AB (columns are B's axes in A).

use crate::{Mat3, Vec3};

/// Rotation by `angle` about the X axis.
pub fn rot_x(angle: f64) -> Mat3 {
    let (s, c) = angle.sin_cos();
    Mat3::new(1.0, 0.0, 0.0, 0.0, c, -s, 0.0, s, c)
}

/// Rotation by `angle` about the Y axis.
pub fn rot_y(angle: f64) -> Mat3 {
    let (s, c) = angle.sin_cos();
    Mat3::new(c, 0.0, s, 0.0, 1.0, 0.0, -s, 0.0, c)
}

/// Rotation by `angle` about the Z axis.
pub fn rot_z(angle: f64) -> Mat3 {
    let (s, c) = angle.sin_cos();
    Mat3::new(c, -s, 0.0, s, c, 0.0, 0.0, 0.0, 1.0)
}

/// Body-fixed X-Y-Z sequence: R = Rx(a) · Ry(b) · Rz(c).
pub fn body_fixed_123_to_matrix(angles: &Vec3) -> Mat3 {
    rot_x(angles.x) * rot_y(angles.y) * rot_z(angles.z)
}

/// Inverse of [`body_fixed_123_to_matrix`]; the middle angle lies in [-π/2, π/2].
pub fn matrix_to_body_fixed_123(m: &Mat3) -> Vec3 {
    let b = m[(0, 2)].clamp(-1.0, 1.0).asin();
    let a = (-m[(1, 2)]).atan2(m[(2, 2)]);
    let c = (-m[(0, 1)]).atan2(m[(0, 0)]);
    Vec3::new(a, b, c)
}

/// Angle rates for body-fixed 1-2-3 angles given the angular velocity
/// expressed in the rotated (body) frame.
///
/// Singular when the middle angle reaches ±π/2 (gimbal lock): there the
/// first and third rates are unbounded and come back non-finite or huge.
/// Callers that may pass through that attitude should use quaternions, or
/// check [`is_gimbal_locked`] first.
pub fn body_fixed_123_rates(angles: &Vec3, w_body: &Vec3) -> Vec3 {
    let (sb, cb) = angles.y.sin_cos();
    let (sc, cc) = angles.z.sin_cos();
    let a_dot = (cc * w_body.x - sc * w_body.y) / cb;
    let b_dot = sc * w_body.x + cc * w_body.y;
    let c_dot = w_body.z - sb * a_dot;
    Vec3::new(a_dot, b_dot, c_dot)
}

/// Whether body-fixed 1-2-3 `angles` are within `tol` of gimbal lock
/// (|cos b| ≤ tol), where [`body_fixed_123_rates`] is undefined.
pub fn is_gimbal_locked(angles: &Vec3, tol: f64) -> bool {
    angles.y.cos().abs() <= tol
}

/// A unit quaternion representing a 3D rotation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quat {
    /// Scalar part (w).
    pub w: f64,
    /// Vector part (x, y, z).
    pub v: Vec3,
}

impl Quat {
    /// Create a new quaternion from scalar and vector parts.
    pub fn new(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self {
            w,
            v: Vec3::new(x, y, z),
        }
    }

    /// Identity quaternion (no rotation).
    pub fn identity() -> Self {
        Self {
            w: 1.0,
            v: Vec3::zeros(),
        }
    }

    /// Read `[w, x, y, z]` from a slice of at least four elements.
    pub fn from_slice(q: &[f64]) -> Self {
        Self::new(q[0], q[1], q[2], q[3])
    }

    /// Components as `[w, x, y, z]`.
    pub fn to_array(&self) -> [f64; 4] {
        [self.w, self.v.x, self.v.y, self.v.z]
    }

    /// Create quaternion from a unit axis and an angle in radians.
    pub fn from_axis_angle(axis: &Vec3, angle: f64) -> Self {
        let (s, c) = (angle * 0.5).sin_cos();
        Self { w: c, v: axis * s }
    }

    /// Euclidean length of the four components.
    pub fn norm(&self) -> f64 {
        (self.w * self.w + self.v.norm_squared()).sqrt()
    }

    /// Normalize to unit length; degenerate input maps to the identity.
    pub fn normalize(&self) -> Self {
        let norm = self.norm();
        if norm < 1e-12 {
            return Self::identity();
        }
        Self {
            w: self.w / norm,
            v: self.v / norm,
        }
    }

    /// Hamilton product: self ⊗ other.
    pub fn mul(&self, other: &Quat) -> Quat {
        Quat {
            w: self.w * other.w - self.v.dot(&other.v),
            v: self.v.cross(&other.v) + other.v * self.w + self.v * other.w,
        }
    }

    /// Time derivative for an angular velocity expressed in the rotated frame:
    /// q̇ = ½ q ⊗ (0, ω).
    pub fn derivative(&self, w_body: &Vec3) -> Quat {
        let omega = Quat { w: 0.0, v: *w_body };
        let d = self.mul(&omega);
        Quat {
            w: 0.5 * d.w,
            v: d.v * 0.5,
        }
    }

    /// Convert to a 3x3 rotation matrix.
    pub fn to_matrix(&self) -> Mat3 {
        let w = self.w;
        let (x, y, z) = (self.v.x, self.v.y, self.v.z);

        let (x2, y2, z2) = (x * x, y * y, z * z);
        let (xy, xz, yz) = (x * y, x * z, y * z);
        let (wx, wy, wz) = (w * x, w * y, w * z);

        Mat3::new(
            1.0 - 2.0 * (y2 + z2),
            2.0 * (xy - wz),
            2.0 * (xz + wy),
            2.0 * (xy + wz),
            1.0 - 2.0 * (x2 + z2),
            2.0 * (yz - wx),
            2.0 * (xz - wy),
            2.0 * (yz + wx),
            1.0 - 2.0 * (x2 + y2),
        )
    }

    /// Convert a rotation matrix to a quaternion (Shepperd's method).
    pub fn from_matrix(m: &Mat3) -> Quat {
        let trace = m[(0, 0)] + m[(1, 1)] + m[(2, 2)];

        let q = if trace > 0.0 {
            let s = (trace + 1.0).sqrt() * 2.0;
            Quat::new(
                0.25 * s,
                (m[(2, 1)] - m[(1, 2)]) / s,
                (m[(0, 2)] - m[(2, 0)]) / s,
                (m[(1, 0)] - m[(0, 1)]) / s,
            )
        } else if m[(0, 0)] > m[(1, 1)] && m[(0, 0)] > m[(2, 2)] {
            let s = (1.0 + m[(0, 0)] - m[(1, 1)] - m[(2, 2)]).sqrt() * 2.0;
            Quat::new(
                (m[(2, 1)] - m[(1, 2)]) / s,
                0.25 * s,
                (m[(0, 1)] + m[(1, 0)]) / s,
                (m[(0, 2)] + m[(2, 0)]) / s,
            )
        } else if m[(1, 1)] > m[(2, 2)] {
            let s = (1.0 + m[(1, 1)] - m[(0, 0)] - m[(2, 2)]).sqrt() * 2.0;
            Quat::new(
                (m[(0, 2)] - m[(2, 0)]) / s,
                (m[(0, 1)] + m[(1, 0)]) / s,
                0.25 * s,
                (m[(1, 2)] + m[(2, 1)]) / s,
            )
        } else {
            let s = (1.0 + m[(2, 2)] - m[(0, 0)] - m[(1, 1)]).sqrt() * 2.0;
            Quat::new(
                (m[(1, 0)] - m[(0, 1)]) / s,
                (m[(0, 2)] + m[(2, 0)]) / s,
                (m[(1, 2)] + m[(2, 1)]) / s,
                0.25 * s,
            )
        };
        // Keep w non-negative so equal rotations map to equal coordinates.
        if q.w < 0.0 {
            Quat { w: -q.w, v: -q.v }
        } else {
            q
        }
    }
}

impl Default for Quat {
    fn default() -> Self {
        Self::identity()
    }
}
