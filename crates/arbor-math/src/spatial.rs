//! 6D spatial algebra following Featherstone's "Rigid Body Dynamics Algorithms".
//!
//! Convention: spatial vectors are [angular; linear].
//! A spatial motion vector (twist): [ω; v]
//! A spatial force vector (wrench): [τ; f]

use crate::{Mat3, Mat6, Mat6x, Vec3, Vec6, skew};

/// 6D spatial vector, either a motion vector (twist) or a force vector (wrench).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpatialVec {
    /// The underlying 6D vector [angular(3); linear(3)].
    pub data: Vec6,
}

impl SpatialVec {
    /// Create from angular and linear parts.
    #[inline]
    pub fn new(angular: Vec3, linear: Vec3) -> Self {
        Self {
            data: Vec6::new(
                angular.x, angular.y, angular.z, linear.x, linear.y, linear.z,
            ),
        }
    }

    /// Zero spatial vector.
    #[inline]
    pub fn zero() -> Self {
        Self {
            data: Vec6::zeros(),
        }
    }

    /// Angular (top 3) component.
    #[inline]
    pub fn angular(&self) -> Vec3 {
        Vec3::new(self.data[0], self.data[1], self.data[2])
    }

    /// Linear (bottom 3) component.
    #[inline]
    pub fn linear(&self) -> Vec3 {
        Vec3::new(self.data[3], self.data[4], self.data[5])
    }

    /// Spatial cross product for motion vectors: v ×ₘ w.
    pub fn cross_motion(&self, other: &SpatialVec) -> SpatialVec {
        let w = self.angular();
        let v = self.linear();
        let w2 = other.angular();
        let v2 = other.linear();
        SpatialVec::new(w.cross(&w2), w.cross(&v2) + v.cross(&w2))
    }

    /// Spatial cross product for force vectors: v ×f f.
    pub fn cross_force(&self, other: &SpatialVec) -> SpatialVec {
        let w = self.angular();
        let v = self.linear();
        let t = other.angular();
        let f = other.linear();
        SpatialVec::new(w.cross(&t) + v.cross(&f), w.cross(&f))
    }

    /// Dot product of two spatial vectors (power when pairing motion with force).
    #[inline]
    pub fn dot(&self, other: &SpatialVec) -> f64 {
        self.data.dot(&other.data)
    }

    /// Re-express both halves in another basis: [R a; R l].
    ///
    /// No reference point shift happens here, so this is only a change of
    /// coordinates between frames sharing an origin.
    #[inline]
    pub fn rotate(&self, rot: &Mat3) -> SpatialVec {
        SpatialVec::new(rot * self.angular(), rot * self.linear())
    }

    /// Move a force vector's moment reference point by `offset`
    /// (new point = old point + offset).
    #[inline]
    pub fn shift_force(&self, offset: &Vec3) -> SpatialVec {
        let f = self.linear();
        SpatialVec::new(self.angular() - offset.cross(&f), f)
    }

    /// Euclidean norm of the 6 components.
    #[inline]
    pub fn norm(&self) -> f64 {
        self.data.norm()
    }
}

impl From<Vec6> for SpatialVec {
    fn from(data: Vec6) -> Self {
        Self { data }
    }
}

impl Default for SpatialVec {
    fn default() -> Self {
        Self::zero()
    }
}

impl std::ops::Add for SpatialVec {
    type Output = SpatialVec;
    #[inline]
    fn add(self, rhs: SpatialVec) -> SpatialVec {
        SpatialVec {
            data: self.data + rhs.data,
        }
    }
}

impl std::ops::AddAssign for SpatialVec {
    #[inline]
    fn add_assign(&mut self, rhs: SpatialVec) {
        self.data += rhs.data;
    }
}

impl std::ops::Sub for SpatialVec {
    type Output = SpatialVec;
    #[inline]
    fn sub(self, rhs: SpatialVec) -> SpatialVec {
        SpatialVec {
            data: self.data - rhs.data,
        }
    }
}

impl std::ops::SubAssign for SpatialVec {
    #[inline]
    fn sub_assign(&mut self, rhs: SpatialVec) {
        self.data -= rhs.data;
    }
}

impl std::ops::Mul<f64> for SpatialVec {
    type Output = SpatialVec;
    #[inline]
    fn mul(self, rhs: f64) -> SpatialVec {
        SpatialVec {
            data: self.data * rhs,
        }
    }
}

impl std::ops::Neg for SpatialVec {
    type Output = SpatialVec;
    #[inline]
    fn neg(self) -> SpatialVec {
        SpatialVec { data: -self.data }
    }
}

/// Plücker transform: coordinate change for spatial vectors from frame A to frame B.
///
/// Stored as rotation E (A coordinates to B coordinates) and translation r
/// (position of B's origin expressed in A). A frame pose X_AB converts to this
/// form with E = R_ABᵀ and r = p_AB, see [`crate::Transform::to_plucker`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpatialTransform {
    /// Rotation from A coordinates to B coordinates.
    pub rot: Mat3,
    /// Position of frame B's origin expressed in A.
    pub pos: Vec3,
}

impl SpatialTransform {
    /// Create from rotation matrix and translation.
    pub fn new(rot: Mat3, pos: Vec3) -> Self {
        Self { rot, pos }
    }

    /// Identity transform.
    pub fn identity() -> Self {
        Self {
            rot: Mat3::identity(),
            pos: Vec3::zeros(),
        }
    }

    /// 6x6 matrix acting on motion vectors.
    ///
    /// X = |  E      0 |
    ///     | -E[r]×  E |
    pub fn to_motion_matrix(&self) -> Mat6 {
        let e = self.rot;
        let neg_erx = -e * skew(&self.pos);

        let mut m = Mat6::zeros();
        m.fixed_view_mut::<3, 3>(0, 0).copy_from(&e);
        m.fixed_view_mut::<3, 3>(3, 0).copy_from(&neg_erx);
        m.fixed_view_mut::<3, 3>(3, 3).copy_from(&e);
        m
    }

    /// 6x6 matrix acting on force vectors (transpose-inverse of the motion matrix).
    ///
    /// X* = | E  -E[r]× |
    ///      | 0    E    |
    pub fn to_force_matrix(&self) -> Mat6 {
        let e = self.rot;
        let neg_erx = -e * skew(&self.pos);

        let mut m = Mat6::zeros();
        m.fixed_view_mut::<3, 3>(0, 0).copy_from(&e);
        m.fixed_view_mut::<3, 3>(0, 3).copy_from(&neg_erx);
        m.fixed_view_mut::<3, 3>(3, 3).copy_from(&e);
        m
    }

    /// Transform a motion vector from A to B coordinates.
    pub fn apply_motion(&self, v: &SpatialVec) -> SpatialVec {
        let w = v.angular();
        let vel = v.linear();
        SpatialVec::new(self.rot * w, self.rot * (vel - self.pos.cross(&w)))
    }

    /// Transform a force vector from A to B coordinates.
    pub fn apply_force(&self, f: &SpatialVec) -> SpatialVec {
        let tau = f.angular();
        let force = f.linear();
        SpatialVec::new(self.rot * (tau - self.pos.cross(&force)), self.rot * force)
    }

    /// Transform a motion vector from B back to A coordinates.
    pub fn inv_apply_motion(&self, v: &SpatialVec) -> SpatialVec {
        let rt = self.rot.transpose();
        let w = rt * v.angular();
        SpatialVec::new(w, rt * v.linear() + self.pos.cross(&w))
    }

    /// Transform a force vector from B back to A coordinates.
    pub fn inv_apply_force(&self, f: &SpatialVec) -> SpatialVec {
        let rt = self.rot.transpose();
        let force = rt * f.linear();
        SpatialVec::new(rt * f.angular() + self.pos.cross(&force), force)
    }

    /// Transform every column of a motion subspace from A to B coordinates.
    pub fn apply_motion_columns(&self, s: &Mat6x) -> Mat6x {
        let mut out = Mat6x::zeros(s.ncols());
        for (k, col) in s.column_iter().enumerate() {
            let v = SpatialVec::from(Vec6::from_iterator(col.iter().copied()));
            out.set_column(k, &self.apply_motion(&v).data);
        }
        out
    }

    /// Carry a B-coordinate articulated inertia back to A: Xᵀ I X.
    pub fn congruence(&self, inertia_b: &Mat6) -> Mat6 {
        let x = self.to_motion_matrix();
        x.transpose() * inertia_b * x
    }

    /// Compose two transforms: self ∘ other, where `other` is A→B and `self` is B→C.
    pub fn compose(&self, other: &SpatialTransform) -> SpatialTransform {
        SpatialTransform {
            rot: self.rot * other.rot,
            pos: other.pos + other.rot.transpose() * self.pos,
        }
    }

    /// Inverse of this transform (B→A).
    pub fn inverse(&self) -> SpatialTransform {
        SpatialTransform {
            rot: self.rot.transpose(),
            pos: -(self.rot * self.pos),
        }
    }
}

impl Default for SpatialTransform {
    fn default() -> Self {
        Self::identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rotation::rot_z;
    use approx::assert_relative_eq;

    #[test]
    fn test_spatial_vec_cross_motion() {
        let v1 = SpatialVec::new(Vec3::new(0.0, 0.0, 1.0), Vec3::zeros());
        let v2 = SpatialVec::new(Vec3::new(1.0, 0.0, 0.0), Vec3::zeros());
        let result = v1.cross_motion(&v2);
        assert_relative_eq!(result.angular().y, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_cross_force_is_negative_transpose_of_cross_motion() {
        // (v ×f)ᵀ = -(v ×m) means  w · (v ×f f) = -(v ×m w) · f
        let v = SpatialVec::new(Vec3::new(0.3, -1.0, 2.0), Vec3::new(1.0, 0.5, -0.2));
        let w = SpatialVec::new(Vec3::new(-0.7, 0.1, 0.4), Vec3::new(2.0, -1.0, 0.0));
        let f = SpatialVec::new(Vec3::new(1.5, 0.2, -0.3), Vec3::new(0.0, 4.0, 1.0));
        assert_relative_eq!(
            w.dot(&v.cross_force(&f)),
            -v.cross_motion(&w).dot(&f),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_transform_identity() {
        let xf = SpatialTransform::identity();
        let v = SpatialVec::new(Vec3::new(1.0, 2.0, 3.0), Vec3::new(4.0, 5.0, 6.0));
        assert_relative_eq!(xf.apply_motion(&v).data, v.data, epsilon = 1e-12);
    }

    #[test]
    fn test_inverse_roundtrip() {
        let xf = SpatialTransform::new(rot_z(0.5), Vec3::new(1.0, 2.0, 3.0));
        let v = SpatialVec::new(Vec3::new(1.0, 0.0, 0.0), Vec3::new(0.0, 1.0, 0.0));
        let back = xf.inv_apply_motion(&xf.apply_motion(&v));
        assert_relative_eq!(back.data, v.data, epsilon = 1e-12);
    }

    #[test]
    fn test_compose_translations() {
        let xf1 = SpatialTransform::new(Mat3::identity(), Vec3::new(1.0, 0.0, 0.0));
        let xf2 = SpatialTransform::new(Mat3::identity(), Vec3::new(0.0, 2.0, 0.0));
        let composed = xf1.compose(&xf2);
        assert_relative_eq!(composed.pos, Vec3::new(1.0, 2.0, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn test_power_is_invariant() {
        // v · f must not depend on the coordinate frame.
        let xf = SpatialTransform::new(rot_z(-1.1), Vec3::new(0.4, -2.0, 1.0));
        let v = SpatialVec::new(Vec3::new(0.2, 0.1, -0.5), Vec3::new(1.0, 2.0, 0.3));
        let f = SpatialVec::new(Vec3::new(-1.0, 0.0, 2.0), Vec3::new(0.5, 0.5, -3.0));
        let p_a = v.dot(&f);
        let p_b = xf.apply_motion(&v).dot(&xf.apply_force(&f));
        assert_relative_eq!(p_a, p_b, epsilon = 1e-12);
    }

    #[test]
    fn test_shift_force_moment() {
        // Pure force along y applied at the origin, moment taken about (1,0,0).
        let f = SpatialVec::new(Vec3::zeros(), Vec3::new(0.0, 2.0, 0.0));
        let shifted = f.shift_force(&Vec3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(shifted.angular(), Vec3::new(0.0, 0.0, -2.0), epsilon = 1e-12);
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use nalgebra as na;
    use proptest::prelude::*;

    const EPS: f64 = 1e-9;

    fn arb_vec3() -> impl Strategy<Value = Vec3> {
        (-10.0..10.0_f64, -10.0..10.0_f64, -10.0..10.0_f64)
            .prop_map(|(x, y, z)| Vec3::new(x, y, z))
    }

    fn arb_transform() -> impl Strategy<Value = SpatialTransform> {
        (
            (-1.0..1.0_f64, -1.0..1.0_f64, -1.0..1.0_f64)
                .prop_filter("non-zero axis", |(x, y, z)| x * x + y * y + z * z > 0.01),
            -std::f64::consts::PI..std::f64::consts::PI,
            arb_vec3(),
        )
            .prop_map(|((x, y, z), angle, pos)| {
                let axis = na::Unit::new_normalize(Vec3::new(x, y, z));
                let rot = na::Rotation3::from_axis_angle(&axis, angle);
                SpatialTransform::new(*rot.matrix(), pos)
            })
    }

    fn arb_spatial_vec() -> impl Strategy<Value = SpatialVec> {
        (arb_vec3(), arb_vec3()).prop_map(|(a, l)| SpatialVec::new(a, l))
    }

    proptest! {
        #[test]
        fn compose_with_inverse_is_identity(xf in arb_transform()) {
            let result = xf.compose(&xf.inverse());
            prop_assert!((result.rot - Mat3::identity()).norm() < EPS);
            prop_assert!(result.pos.norm() < EPS);
        }

        #[test]
        fn compose_is_associative(
            a in arb_transform(),
            b in arb_transform(),
            c in arb_transform(),
        ) {
            let ab_c = a.compose(&b).compose(&c);
            let a_bc = a.compose(&b.compose(&c));
            prop_assert!((ab_c.rot - a_bc.rot).norm() < EPS);
            prop_assert!((ab_c.pos - a_bc.pos).norm() < EPS);
        }

        #[test]
        fn apply_force_matches_matrix(xf in arb_transform(), f in arb_spatial_vec()) {
            let applied = xf.apply_force(&f);
            let mat_result = xf.to_force_matrix() * f.data;
            prop_assert!((applied.data - mat_result).norm() < EPS);
        }

        #[test]
        fn apply_motion_matches_matrix(xf in arb_transform(), v in arb_spatial_vec()) {
            let applied = xf.apply_motion(&v);
            let mat_result = xf.to_motion_matrix() * v.data;
            prop_assert!((applied.data - mat_result).norm() < EPS);
        }

        #[test]
        fn inv_apply_force_is_motion_transpose(xf in arb_transform(), f in arb_spatial_vec()) {
            let applied = xf.inv_apply_force(&f);
            let mat_result = xf.to_motion_matrix().transpose() * f.data;
            prop_assert!((applied.data - mat_result).norm() < EPS);
        }
    }
}
