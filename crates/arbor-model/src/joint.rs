//! Joint taxonomy.
//!
//! A joint places a child body relative to its parent through two fixed frames:
//! F on the parent and M on the child. The joint coordinates q give the pose
//! X_FM; the joint speeds u give the velocity of M relative to F expressed in
//! M, so every motion subspace here is constant.

use arbor_math::rotation::{body_fixed_123_rates, body_fixed_123_to_matrix, is_gimbal_locked};
use arbor_math::{Mat3, Mat6x, Quat, Transform, Vec3};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// How the rotational part of Ball and Free joints is parameterized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationRepresentation {
    /// Three body-fixed 1-2-3 angles.
    EulerAngles,
    /// Four normalized quaternion components `[w, x, y, z]`.
    #[default]
    Quaternion,
}

impl RotationRepresentation {
    /// Number of coordinates used for one rotation.
    pub fn nq(self) -> usize {
        match self {
            RotationRepresentation::EulerAngles => 3,
            RotationRepresentation::Quaternion => 4,
        }
    }
}

/// Joint variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JointKind {
    /// Rotation about the common z axis of F and M.
    Pin,
    /// Translation along the common x axis of F and M.
    Sliding,
    /// Translation along x, y and z of F.
    Cartesian,
    /// Free rotation about the common origin.
    Ball,
    /// Ball plus Cartesian.
    Free,
}

impl JointKind {
    /// Number of generalized speeds.
    pub fn nu(self) -> usize {
        match self {
            JointKind::Pin | JointKind::Sliding => 1,
            JointKind::Cartesian | JointKind::Ball => 3,
            JointKind::Free => 6,
        }
    }

    /// Number of generalized coordinates under the given representation.
    pub fn nq(self, rep: RotationRepresentation) -> usize {
        match self {
            JointKind::Pin | JointKind::Sliding => 1,
            JointKind::Cartesian => 3,
            JointKind::Ball => rep.nq(),
            JointKind::Free => rep.nq() + 3,
        }
    }

    /// Whether the coordinates depend on the rotation representation.
    pub fn is_rotational(self) -> bool {
        matches!(self, JointKind::Ball | JointKind::Free)
    }
}

/// Connection of a body to its parent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Joint {
    /// Joint variant.
    pub kind: JointKind,
    /// Frame F fixed on the parent, X_PF.
    pub frame_on_parent: Transform,
    /// Frame M fixed on the child, X_BM.
    pub frame_on_child: Transform,
}

impl Joint {
    /// Create a joint between the two given frames.
    pub fn new(kind: JointKind, frame_on_parent: Transform, frame_on_child: Transform) -> Self {
        Self {
            kind,
            frame_on_parent,
            frame_on_child,
        }
    }

    /// Number of generalized speeds.
    pub fn nu(&self) -> usize {
        self.kind.nu()
    }

    /// Number of generalized coordinates.
    pub fn nq(&self, rep: RotationRepresentation) -> usize {
        self.kind.nq(rep)
    }

    /// Coordinates that put M on F: zeros, with an identity quaternion when used.
    pub fn default_q(&self, rep: RotationRepresentation) -> Vec<f64> {
        let mut q = vec![0.0; self.nq(rep)];
        if self.kind.is_rotational() && rep == RotationRepresentation::Quaternion {
            q[0] = 1.0;
        }
        q
    }

    /// Mobilizer pose X_FM for the given coordinates.
    pub fn mobilizer_pose(&self, q: &[f64], rep: RotationRepresentation) -> Transform {
        match self.kind {
            JointKind::Pin => Transform::rot_z(q[0]),
            JointKind::Sliding => Transform::from_translation(Vec3::new(q[0], 0.0, 0.0)),
            JointKind::Cartesian => Transform::from_translation(Vec3::new(q[0], q[1], q[2])),
            JointKind::Ball => Transform::from_rotation(rotation(q, rep)),
            JointKind::Free => {
                let n = rep.nq();
                Transform::new(rotation(q, rep), Vec3::new(q[n], q[n + 1], q[n + 2]))
            }
        }
    }

    /// Pose of the child body in its parent, X_PB = X_PF · X_FM · X_MB.
    pub fn body_pose(&self, q: &[f64], rep: RotationRepresentation) -> Transform {
        self.frame_on_parent
            .compose(&self.mobilizer_pose(q, rep))
            .compose(&self.frame_on_child.inverse())
    }

    /// Motion subspace in M coordinates (6 x nu).
    pub fn motion_subspace(&self) -> Mat6x {
        let mut s = Mat6x::zeros(self.nu());
        match self.kind {
            JointKind::Pin => s[(2, 0)] = 1.0,
            JointKind::Sliding => s[(3, 0)] = 1.0,
            JointKind::Cartesian => {
                for k in 0..3 {
                    s[(3 + k, k)] = 1.0;
                }
            }
            JointKind::Ball => {
                for k in 0..3 {
                    s[(k, k)] = 1.0;
                }
            }
            JointKind::Free => {
                for k in 0..6 {
                    s[(k, k)] = 1.0;
                }
            }
        }
        s
    }

    /// Motion subspace for the child body origin, in body coordinates.
    pub fn body_motion_subspace(&self) -> Mat6x {
        self.frame_on_child
            .inverse()
            .to_plucker()
            .apply_motion_columns(&self.motion_subspace())
    }

    /// Coordinate rates for the given speeds, written into `qdot`.
    ///
    /// The map is linear in `u`, so it also carries speed corrections over to
    /// coordinate corrections.
    pub fn q_dot(&self, q: &[f64], u: &[f64], rep: RotationRepresentation, qdot: &mut [f64]) {
        match self.kind {
            JointKind::Pin | JointKind::Sliding | JointKind::Cartesian => {
                qdot[..u.len()].copy_from_slice(u);
            }
            JointKind::Ball => {
                rotation_rate(q, &Vec3::new(u[0], u[1], u[2]), rep, qdot);
            }
            JointKind::Free => {
                let n = rep.nq();
                rotation_rate(q, &Vec3::new(u[0], u[1], u[2]), rep, qdot);
                // Translation is measured in F, speed in M.
                let pdot = rotation(q, rep) * Vec3::new(u[3], u[4], u[5]);
                qdot[n..n + 3].copy_from_slice(pdot.as_slice());
            }
        }
    }

    /// Renormalize quaternion coordinates in place. Returns whether anything changed.
    pub fn normalize_q(&self, q: &mut [f64], rep: RotationRepresentation) -> bool {
        if !self.kind.is_rotational() || rep != RotationRepresentation::Quaternion {
            return false;
        }
        let quat = Quat::from_slice(q);
        if (quat.norm() - 1.0).abs() <= UNIT_NORM_TOLERANCE {
            return false;
        }
        q[..4].copy_from_slice(&quat.normalize().to_array());
        true
    }
}

/// Quaternions this close to unit length are left as they are.
const UNIT_NORM_TOLERANCE: f64 = 1e-14;

/// |cos b| below which angle rates are reported as singular.
const GIMBAL_LOCK_TOLERANCE: f64 = 1e-9;

fn rotation(q: &[f64], rep: RotationRepresentation) -> Mat3 {
    match rep {
        RotationRepresentation::EulerAngles => body_fixed_123_to_matrix(&Vec3::new(q[0], q[1], q[2])),
        RotationRepresentation::Quaternion => Quat::from_slice(q).normalize().to_matrix(),
    }
}

fn rotation_rate(q: &[f64], w: &Vec3, rep: RotationRepresentation, qdot: &mut [f64]) {
    match rep {
        RotationRepresentation::EulerAngles => {
            let angles = Vec3::new(q[0], q[1], q[2]);
            if is_gimbal_locked(&angles, GIMBAL_LOCK_TOLERANCE) {
                warn!(middle_angle = angles.y, "euler angle rates at gimbal lock");
            }
            let rates = body_fixed_123_rates(&angles, w);
            qdot[..3].copy_from_slice(rates.as_slice());
        }
        RotationRepresentation::Quaternion => {
            let d = Quat::from_slice(q).derivative(w);
            qdot[..4].copy_from_slice(&d.to_array());
        }
    }
}
