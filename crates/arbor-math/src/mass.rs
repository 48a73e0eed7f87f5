//! Rigid-body mass properties.

use crate::{Mat3, Mat6, Transform, Vec3, skew};

/// Mass, center of mass and rotational inertia of a rigid body.
///
/// `com` is measured from the body frame origin and `inertia` is taken about the
/// center of mass, both expressed in the body frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MassProperties {
    /// Mass of the body.
    pub mass: f64,
    /// Center of mass position in body frame.
    pub com: Vec3,
    /// Rotational inertia about the center of mass (3x3 symmetric).
    pub inertia: Mat3,
}

impl MassProperties {
    /// Create mass properties with the given mass, CoM offset and central inertia.
    pub fn new(mass: f64, com: Vec3, inertia: Mat3) -> Self {
        Self { mass, com, inertia }
    }

    /// Massless body.
    pub fn zero() -> Self {
        Self {
            mass: 0.0,
            com: Vec3::zeros(),
            inertia: Mat3::zeros(),
        }
    }

    /// Point mass at a given position.
    pub fn point_mass(mass: f64, pos: Vec3) -> Self {
        Self {
            mass,
            com: pos,
            inertia: Mat3::zeros(),
        }
    }

    /// Uniform rod of given mass and length along the body X axis, centered at `com`.
    pub fn rod(mass: f64, length: f64, com: Vec3) -> Self {
        let i = mass * length * length / 12.0;
        Self {
            mass,
            com,
            inertia: Mat3::from_diagonal(&Vec3::new(0.0, i, i)),
        }
    }

    /// Uniform solid sphere centered at the body origin.
    pub fn sphere(mass: f64, radius: f64) -> Self {
        let i = 2.0 / 5.0 * mass * radius * radius;
        Self {
            mass,
            com: Vec3::zeros(),
            inertia: Mat3::from_diagonal(&Vec3::new(i, i, i)),
        }
    }

    /// Rotational inertia about the body frame origin (parallel-axis theorem).
    pub fn inertia_about_origin(&self) -> Mat3 {
        let cx = skew(&self.com);
        self.inertia - cx * cx * self.mass
    }

    /// Mass non-negative, inertia symmetric positive semi-definite, everything finite.
    pub fn is_valid(&self) -> bool {
        if !(self.mass.is_finite() && self.mass >= 0.0) {
            return false;
        }
        if !self.com.iter().chain(self.inertia.iter()).all(|x| x.is_finite()) {
            return false;
        }
        let scale = self.inertia.norm().max(1.0);
        if (self.inertia - self.inertia.transpose()).norm() > 1e-9 * scale {
            return false;
        }
        self.inertia
            .symmetric_eigenvalues()
            .iter()
            .all(|&ev| ev >= -1e-12 * scale)
    }

    /// 6x6 spatial inertia about the body frame origin.
    ///
    /// I = | I_c + m[c]×[c]×ᵀ   m[c]× |
    ///     | m[c]×ᵀ              m·1   |
    pub fn to_matrix(&self) -> Mat6 {
        let cx = skew(&self.com);
        let m = self.mass;
        let mcx = cx * m;

        let mut mat = Mat6::zeros();
        mat.fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&(self.inertia + cx * cx.transpose() * m));
        mat.fixed_view_mut::<3, 3>(0, 3).copy_from(&mcx);
        mat.fixed_view_mut::<3, 3>(3, 0).copy_from(&mcx.transpose());
        mat.fixed_view_mut::<3, 3>(3, 3)
            .copy_from(&(Mat3::identity() * m));
        mat
    }

    /// Center of mass location in the frame that `x` is measured from.
    pub fn com_in(&self, x: &Transform) -> Vec3 {
        x.transform_point(&self.com)
    }
}

impl Default for MassProperties {
    fn default() -> Self {
        Self::zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_point_mass_matrix() {
        let mp = MassProperties::point_mass(2.0, Vec3::new(0.0, 1.0, 0.0));
        let mat = mp.to_matrix();
        for k in 3..6 {
            assert_relative_eq!(mat[(k, k)], 2.0, epsilon = 1e-12);
        }
        // Rotation about x through the origin sees m·d².
        assert_relative_eq!(mat[(0, 0)], 2.0, epsilon = 1e-12);
        assert_relative_eq!(mat[(1, 1)], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_matrix_is_symmetric() {
        let mp = MassProperties::new(
            3.0,
            Vec3::new(0.5, -0.2, 1.0),
            Mat3::new(2.0, 0.1, 0.0, 0.1, 1.5, 0.2, 0.0, 0.2, 1.0),
        );
        let m = mp.to_matrix();
        assert_relative_eq!(m, m.transpose(), epsilon = 1e-12);
    }

    #[test]
    fn test_origin_inertia_parallel_axis() {
        let mp = MassProperties::point_mass(3.0, Vec3::new(2.5, 0.0, 0.0));
        let io = mp.inertia_about_origin();
        assert_relative_eq!(io[(0, 0)], 0.0, epsilon = 1e-12);
        assert_relative_eq!(io[(1, 1)], 3.0 * 6.25, epsilon = 1e-12);
        assert_relative_eq!(io[(2, 2)], 3.0 * 6.25, epsilon = 1e-12);
        assert_relative_eq!(io, mp.to_matrix().fixed_view::<3, 3>(0, 0).into_owned(), epsilon = 1e-12);
    }

    #[test]
    fn test_validation() {
        assert!(MassProperties::sphere(5.0, 0.1).is_valid());
        assert!(MassProperties::zero().is_valid());
        assert!(!MassProperties::point_mass(-1.0, Vec3::zeros()).is_valid());
        let skewed = MassProperties::new(1.0, Vec3::zeros(), Mat3::new(1.0, 0.5, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0));
        assert!(!skewed.is_valid());
        let indefinite = MassProperties::new(1.0, Vec3::zeros(), Mat3::from_diagonal(&Vec3::new(1.0, -1.0, 1.0)));
        assert!(!indefinite.is_valid());
    }
}
