//! Rigid frame poses.

use crate::rotation::{body_fixed_123_to_matrix, rot_z};
use crate::{Mat3, SpatialTransform, Vec3};

/// Pose X_AB of frame B measured in frame A.
///
/// `rot` is R_AB (its columns are B's axes expressed in A) and `pos` is the
/// position of B's origin expressed in A.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    /// Orientation R_AB.
    pub rot: Mat3,
    /// Origin of B in A.
    pub pos: Vec3,
}

impl Transform {
    /// Create from rotation matrix and translation.
    pub fn new(rot: Mat3, pos: Vec3) -> Self {
        Self { rot, pos }
    }

    /// Identity pose.
    pub fn identity() -> Self {
        Self {
            rot: Mat3::identity(),
            pos: Vec3::zeros(),
        }
    }

    /// Pure translation.
    pub fn from_translation(pos: Vec3) -> Self {
        Self {
            rot: Mat3::identity(),
            pos,
        }
    }

    /// Pure rotation.
    pub fn from_rotation(rot: Mat3) -> Self {
        Self {
            rot,
            pos: Vec3::zeros(),
        }
    }

    /// Rotation from body-fixed 1-2-3 angles plus a translation.
    pub fn from_body_fixed_123(angles: Vec3, pos: Vec3) -> Self {
        Self {
            rot: body_fixed_123_to_matrix(&angles),
            pos,
        }
    }

    /// Rotation about Z followed by nothing else; convenient for planar setups.
    pub fn rot_z(angle: f64) -> Self {
        Self::from_rotation(rot_z(angle))
    }

    /// X_AC = X_AB ∘ X_BC.
    pub fn compose(&self, other: &Transform) -> Transform {
        Transform {
            rot: self.rot * other.rot,
            pos: self.pos + self.rot * other.pos,
        }
    }

    /// X_BA.
    pub fn inverse(&self) -> Transform {
        let rt = self.rot.transpose();
        Transform {
            rot: rt,
            pos: -(rt * self.pos),
        }
    }

    /// Re-express a B-frame station (point) in A.
    pub fn transform_point(&self, station_b: &Vec3) -> Vec3 {
        self.pos + self.rot * station_b
    }

    /// Re-express a B-frame free vector in A (rotation only).
    pub fn transform_vector(&self, vec_b: &Vec3) -> Vec3 {
        self.rot * vec_b
    }

    /// Plücker coordinate transform from A to B for spatial vectors.
    pub fn to_plucker(&self) -> SpatialTransform {
        SpatialTransform::new(self.rot.transpose(), self.pos)
    }

    /// Whether the rotation part is orthonormal with determinant +1.
    pub fn is_proper(&self, tol: f64) -> bool {
        let orth = (self.rot * self.rot.transpose() - Mat3::identity()).norm();
        orth <= tol && (self.rot.determinant() - 1.0).abs() <= tol && self.pos.iter().all(|p| p.is_finite())
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

impl std::ops::Mul for Transform {
    type Output = Transform;
    fn mul(self, rhs: Transform) -> Transform {
        self.compose(&rhs)
    }
}

impl std::fmt::Display for Transform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let r = &self.rot;
        writeln!(f, "[{:+.6} {:+.6} {:+.6} | {:+.6}]", r[(0, 0)], r[(0, 1)], r[(0, 2)], self.pos.x)?;
        writeln!(f, "[{:+.6} {:+.6} {:+.6} | {:+.6}]", r[(1, 0)], r[(1, 1)], r[(1, 2)], self.pos.y)?;
        writeln!(f, "[{:+.6} {:+.6} {:+.6} | {:+.6}]", r[(2, 0)], r[(2, 1)], r[(2, 2)], self.pos.z)
    }
}
