//! Spatial algebra primitives for the arbor multibody engine.
//!
//! Implements 6D spatial vectors, frame poses, Plücker transforms, rotation
//! parameterizations and rigid-body mass properties following Featherstone's
//! conventions.

pub mod mass;
pub mod rotation;
pub mod spatial;
pub mod transform;

pub use mass::MassProperties;
pub use rotation::Quat;
pub use spatial::{SpatialTransform, SpatialVec};
pub use transform::Transform;

use nalgebra as na;

/// 3D vector alias.
pub type Vec3 = na::Vector3<f64>;
/// 3x3 matrix alias.
pub type Mat3 = na::Matrix3<f64>;
/// 6D vector alias.
pub type Vec6 = na::Vector6<f64>;
/// 6x6 matrix alias.
pub type Mat6 = na::Matrix6<f64>;
/// Dynamic vector.
pub type DVec = na::DVector<f64>;
/// Dynamic matrix.
pub type DMat = na::DMatrix<f64>;
/// 6 x n matrix whose columns are spatial vectors (motion subspaces, Jacobian blocks).
pub type Mat6x = na::OMatrix<f64, na::U6, na::Dyn>;

/// Cross-product matrix: [v]× such that [v]× w = v × w.
#[inline]
pub fn skew(v: &Vec3) -> Mat3 {
    Mat3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

/// Standard gravity (m/s²).
pub const GRAVITY: f64 = 9.80665;
