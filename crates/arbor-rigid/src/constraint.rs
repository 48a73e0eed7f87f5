//! Constraint residuals, their Jacobian and mass-weighted corrections.
//!
//! All quantities are measured in ground. Residual rows follow the order in
//! which constraints were added:
//!
//! - coincident stations: `p_A − p_B`
//! - constant distance: `|p_A − p_B| − d`
//! - weld: `[½·Σ aᵢ × bᵢ; p_A − p_B]`, where aᵢ and bᵢ are the axes of the
//!   two welded frames, so the first block is the small rotation taking
//!   frame A onto frame B.

use arbor_math::{DMat, DVec, SpatialVec, Transform, Vec3};
use arbor_model::{Constraint, GROUND, MultibodyTree};
use arbor_state::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::kinematics::apply_subspace;
use crate::{PositionCache, TreeLayout, VelocityCache, calc_m_inverse_f};

/// Singular values of G·M⁻¹·Gᵀ below this fraction of the largest count as zero.
const RANK_TOLERANCE: f64 = 1e-12;

/// Newton projection controls.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectionSettings {
    /// Largest acceptable residual norm of any single constraint.
    pub tolerance: f64,
    /// Newton iterations before giving up.
    pub max_iterations: usize,
}

impl Default for ProjectionSettings {
    fn default() -> Self {
        Self {
            tolerance: 1e-10,
            max_iterations: 50,
        }
    }
}

/// Position residuals of every constraint, stacked.
pub fn constraint_residuals(tree: &MultibodyTree, pos: &PositionCache) -> DVec {
    let mut err = DVec::zeros(tree.n_constraint_equations());
    let mut row = 0;
    for c in tree.constraints() {
        match *c {
            Constraint::CoincidentStations {
                body_a,
                station_a,
                body_b,
                station_b,
            } => {
                let r = separation(pos, body_a, &station_a, body_b, &station_b);
                err.fixed_rows_mut::<3>(row).copy_from(&r);
            }
            Constraint::ConstantDistance {
                body_a,
                station_a,
                body_b,
                station_b,
                distance,
            } => {
                let r = separation(pos, body_a, &station_a, body_b, &station_b);
                err[row] = r.norm() - distance;
            }
            Constraint::Weld {
                body_a,
                frame_a,
                body_b,
                frame_b,
            } => {
                let xa = pos.x_gb[body_a].compose(&frame_a);
                let xb = pos.x_gb[body_b].compose(&frame_b);
                let mut rot = Vec3::zeros();
                for k in 0..3 {
                    rot += xa.rot.column(k).cross(&xb.rot.column(k));
                }
                err.fixed_rows_mut::<3>(row).copy_from(&(rot * 0.5));
                err.fixed_rows_mut::<3>(row + 3).copy_from(&(xa.pos - xb.pos));
            }
        }
        row += c.n_equations();
    }
    err
}

/// Time derivatives of the residuals for the current speeds, G·u.
pub fn constraint_velocity_errors(tree: &MultibodyTree, pos: &PositionCache, vel: &VelocityCache) -> DVec {
    velocity_errors(tree, pos, &vel.v)
}

/// Constraint Jacobian G (rows per equation, columns indexed like U).
///
/// Column k is the velocity error produced by a unit speed in slot k with
/// every other speed zero.
pub fn constraint_jacobian(tree: &MultibodyTree, layout: &TreeLayout, pos: &PositionCache) -> DMat {
    let m = tree.n_constraint_equations();
    let mut g = DMat::zeros(m, layout.u_len());
    if m == 0 {
        return g;
    }
    let mut u = DVec::zeros(layout.u_len());
    for k in layout.u_start..layout.u_len() {
        u[k] = 1.0;
        let v = body_velocities(tree, layout, pos, &u);
        g.set_column(k, &velocity_errors(tree, pos, &v));
        u[k] = 0.0;
    }
    g
}

/// Largest residual norm over the individual constraints.
pub fn max_constraint_error(tree: &MultibodyTree, err: &DVec) -> f64 {
    let mut row = 0;
    let mut worst = 0.0_f64;
    for c in tree.constraints() {
        let n = c.n_equations();
        worst = worst.max(err.rows(row, n).norm());
        row += n;
    }
    worst
}

/// Smallest speed change in the mass metric that cancels `err` to first order.
///
/// δu = −M⁻¹·Gᵀ·(G·M⁻¹·Gᵀ)⁻¹·err, with M⁻¹ applied through the articulated
/// body recursion. A rank deficient G·M⁻¹·Gᵀ is reported as
/// [`Error::SingularJacobian`].
pub fn mass_weighted_correction(
    tree: &MultibodyTree,
    layout: &TreeLayout,
    pos: &PositionCache,
    g: &DMat,
    err: &DVec,
) -> Result<DVec> {
    let m = g.nrows();
    if m == 0 {
        return Ok(DVec::zeros(layout.u_len()));
    }
    if err.len() != m {
        return Err(Error::dimension("constraint error", m, err.len()));
    }

    // Y = M⁻¹·Gᵀ, one row of G at a time.
    let mut y = DMat::zeros(layout.u_len(), m);
    for r in 0..m {
        let f = g.row(r).transpose();
        y.set_column(r, &calc_m_inverse_f(tree, layout, pos, &f)?);
    }
    let a = g * &y;

    let svd = a.svd(true, true);
    let sigma_max = svd.singular_values.max();
    let eps = RANK_TOLERANCE * sigma_max;
    let rank = svd.rank(eps);
    if rank < m {
        return Err(Error::SingularJacobian(format!(
            "{m} constraint equations but rank {rank} (largest singular value {sigma_max:.3e})"
        )));
    }
    let lambda = svd.solve(err, eps).map_err(|e| Error::SingularJacobian(e.to_string()))?;
    Ok(-(y * lambda))
}

/// Coordinate change N(q)·δu for a speed change, indexed like Q.
pub fn coordinate_correction(tree: &MultibodyTree, layout: &TreeLayout, q: &DVec, du: &DVec) -> DVec {
    let mut dq = DVec::zeros(layout.q_len());
    for (i, _, joint) in tree.mobilized() {
        let qr = layout.q_range(i);
        joint.q_dot(
            &q.as_slice()[qr.clone()],
            &du.as_slice()[layout.u_range(i)],
            layout.rep,
            &mut dq.as_mut_slice()[qr],
        );
    }
    dq
}

/// p_A − p_B in ground.
fn separation(pos: &PositionCache, body_a: usize, station_a: &Vec3, body_b: usize, station_b: &Vec3) -> Vec3 {
    pos.x_gb[body_a].transform_point(station_a) - pos.x_gb[body_b].transform_point(station_b)
}

/// Spatial velocities only, for speeds indexed like U.
fn body_velocities(tree: &MultibodyTree, layout: &TreeLayout, pos: &PositionCache, u: &DVec) -> Vec<SpatialVec> {
    let mut v = vec![SpatialVec::zero(); tree.nbodies()];
    for (i, body, _) in tree.mobilized() {
        let v_joint = apply_subspace(&pos.s_body[i], &u.as_slice()[layout.u_range(i)]);
        v[i] = if body.parent == GROUND {
            v_joint
        } else {
            pos.x_tree[i].apply_motion(&v[body.parent]) + v_joint
        };
    }
    v
}

/// Angular velocity and velocity of a body-fixed station, both in ground.
fn station_motion(pos: &PositionCache, v: &[SpatialVec], body: usize, station: &Vec3) -> (Vec3, Vec3) {
    let x = &pos.x_gb[body];
    let w = x.rot * v[body].angular();
    let lin = x.rot * v[body].linear() + w.cross(&x.transform_vector(station));
    (w, lin)
}

fn velocity_errors(tree: &MultibodyTree, pos: &PositionCache, v: &[SpatialVec]) -> DVec {
    let mut verr = DVec::zeros(tree.n_constraint_equations());
    let mut row = 0;
    for c in tree.constraints() {
        match *c {
            Constraint::CoincidentStations {
                body_a,
                station_a,
                body_b,
                station_b,
            } => {
                let (_, va) = station_motion(pos, v, body_a, &station_a);
                let (_, vb) = station_motion(pos, v, body_b, &station_b);
                verr.fixed_rows_mut::<3>(row).copy_from(&(va - vb));
            }
            Constraint::ConstantDistance {
                body_a,
                station_a,
                body_b,
                station_b,
                ..
            } => {
                let r = separation(pos, body_a, &station_a, body_b, &station_b);
                let (_, va) = station_motion(pos, v, body_a, &station_a);
                let (_, vb) = station_motion(pos, v, body_b, &station_b);
                let n = r.norm();
                if n > 0.0 {
                    verr[row] = r.dot(&(va - vb)) / n;
                }
            }
            Constraint::Weld {
                body_a,
                frame_a,
                body_b,
                frame_b,
            } => {
                let (wa, va) = frame_motion(pos, v, body_a, &frame_a);
                let (wb, vb) = frame_motion(pos, v, body_b, &frame_b);
                let ra = pos.x_gb[body_a].rot * frame_a.rot;
                let rb = pos.x_gb[body_b].rot * frame_b.rot;
                // d/dt of ½·Σ aₖ × bₖ with ȧₖ = ωa × aₖ and ḃₖ = ωb × bₖ.
                let mut rot = Vec3::zeros();
                for k in 0..3 {
                    let (a, b) = (ra.column(k).into_owned(), rb.column(k).into_owned());
                    rot += wa.cross(&a).cross(&b) + a.cross(&wb.cross(&b));
                }
                verr.fixed_rows_mut::<3>(row).copy_from(&(rot * 0.5));
                verr.fixed_rows_mut::<3>(row + 3).copy_from(&(va - vb));
            }
        }
        row += c.n_equations();
    }
    verr
}

fn frame_motion(pos: &PositionCache, v: &[SpatialVec], body: usize, frame: &Transform) -> (Vec3, Vec3) {
    station_motion(pos, v, body, &frame.pos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{calc_positions, calc_velocities};
    use approx::assert_relative_eq;
    use arbor_math::{MassProperties, Mat3, rotation::rot_x};
    use arbor_model::{JointKind, RotationRepresentation};

    fn link() -> MassProperties {
        MassProperties::new(1.0, Vec3::new(0.5, 0.0, 0.0), Mat3::from_diagonal(&Vec3::new(0.01, 0.08, 0.08)))
    }

    /// Free body carrying a pinned link whose tip is tied to ground.
    fn closed_chain() -> MultibodyTree {
        let mut tree = MultibodyTree::new();
        let b1 = tree.add_body(link(), Transform::identity(), GROUND, Transform::identity(), JointKind::Free).unwrap();
        let tip = Transform::from_translation(Vec3::x());
        let b2 = tree.add_body(link(), Transform::identity(), b1, tip, JointKind::Pin).unwrap();
        tree.add_coincident_stations_constraint(b2, Vec3::x(), GROUND, Vec3::new(1.5, 0.5, 0.0)).unwrap();
        tree.add_constant_distance_constraint(b1, Vec3::zeros(), GROUND, Vec3::new(0.0, 0.0, 1.0), 1.2).unwrap();
        tree
    }

    fn project(tree: &MultibodyTree, layout: &TreeLayout, q: &mut DVec) -> usize {
        let settings = ProjectionSettings::default();
        for it in 0..settings.max_iterations {
            let pos = calc_positions(tree, layout, q);
            let err = constraint_residuals(tree, &pos);
            if max_constraint_error(tree, &err) < settings.tolerance {
                return it;
            }
            let g = constraint_jacobian(tree, layout, &pos);
            let du = mass_weighted_correction(tree, layout, &pos, &g, &err).unwrap();
            let dq = coordinate_correction(tree, layout, q, &du);
            *q += dq;
            for (i, _, joint) in tree.mobilized() {
                joint.normalize_q(&mut q.as_mut_slice()[layout.q_range(i)], layout.rep);
            }
        }
        panic!("projection did not converge");
    }

    #[test]
    fn test_residuals() {
        let tree = closed_chain();
        let layout = TreeLayout::new(&tree, RotationRepresentation::EulerAngles, 0, 0);
        let q = DVec::from_vec(vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        let pos = calc_positions(&tree, &layout, &q);
        let err = constraint_residuals(&tree, &pos);
        assert_eq!(err.len(), 4);
        // Tip at (2,0,0) against (1.5,0.5,0); body origin at distance 1 from (0,0,1).
        assert_relative_eq!(err.fixed_rows::<3>(0).into_owned(), Vec3::new(0.5, -0.5, 0.0), epsilon = 1e-12);
        assert_relative_eq!(err[3], 1.0 - 1.2, epsilon = 1e-12);
        assert_relative_eq!(max_constraint_error(&tree, &err), 0.5_f64.sqrt(), epsilon = 1e-12);
    }

    /// Compare every column of G with a central difference of the residuals
    /// along the coordinate direction N(q)·eₖ.
    fn assert_jacobian_matches_finite_differences(tree: &MultibodyTree, layout: &TreeLayout, q: &DVec) {
        let pos = calc_positions(tree, layout, q);
        let g = constraint_jacobian(tree, layout, &pos);
        let h = 1e-6;
        for k in 0..layout.u_len() {
            let mut du = DVec::zeros(layout.u_len());
            du[k] = h;
            let dq = coordinate_correction(tree, layout, q, &du);
            let plus = constraint_residuals(tree, &calc_positions(tree, layout, &(q + &dq)));
            let minus = constraint_residuals(tree, &calc_positions(tree, layout, &(q - &dq)));
            let fd = (plus - minus) / (2.0 * h);
            assert_relative_eq!(g.column(k).into_owned(), fd, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_jacobian_matches_finite_differences() {
        let tree = closed_chain();
        let layout = TreeLayout::new(&tree, RotationRepresentation::EulerAngles, 0, 0);
        let q = DVec::from_vec(vec![0.2, -0.3, 0.4, 0.1, 0.2, -0.1, 0.6]);
        assert_jacobian_matches_finite_differences(&tree, &layout, &q);
    }

    #[test]
    fn test_misaligned_weld_jacobian_matches_finite_differences() {
        let mut tree = MultibodyTree::new();
        let b = tree.add_body(link(), Transform::identity(), GROUND, Transform::identity(), JointKind::Free).unwrap();
        let on_body = Transform::new(rot_x(-0.2), Vec3::new(0.1, 0.0, 0.2));
        tree.add_weld_constraint(GROUND, Transform::new(rot_x(0.3), Vec3::zeros()), b, on_body).unwrap();
        let layout = TreeLayout::new(&tree, RotationRepresentation::EulerAngles, 0, 0);
        let q = DVec::from_vec(vec![0.4, -0.5, 0.6, 0.1, 0.9, 0.4]);
        assert_jacobian_matches_finite_differences(&tree, &layout, &q);
    }

    #[test]
    fn test_large_weld_misalignment_converges() {
        let mut tree = MultibodyTree::new();
        let b = tree.add_body(link(), Transform::identity(), GROUND, Transform::identity(), JointKind::Free).unwrap();
        let target = Transform::new(rot_x(0.3), Vec3::new(0.0, 1.0, 0.5));
        tree.add_weld_constraint(GROUND, target, b, Transform::identity()).unwrap();
        let layout = TreeLayout::new(&tree, RotationRepresentation::EulerAngles, 0, 0);

        let mut q = DVec::from_vec(vec![0.4, -0.5, 0.6, 0.1, 0.9, 0.4]);
        let iterations = project(&tree, &layout, &mut q);
        assert!(iterations < 20, "{iterations} iterations");
        let pos = calc_positions(&tree, &layout, &q);
        assert_relative_eq!(pos.x_gb[b].rot, target.rot, epsilon = 1e-9);
    }

    #[test]
    fn test_velocity_errors_are_jacobian_times_speeds() {
        let tree = closed_chain();
        let layout = TreeLayout::new(&tree, RotationRepresentation::Quaternion, 0, 0);
        let q = DVec::from_vec(vec![0.9, 0.1, 0.2, -0.3, 0.1, 0.2, -0.1, 0.6]);
        let u = DVec::from_vec(vec![0.3, -1.0, 0.5, 2.0, 0.1, -0.4, 1.5]);
        let pos = calc_positions(&tree, &layout, &q);
        let vel = calc_velocities(&tree, &layout, &pos, &q, &u);
        let g = constraint_jacobian(&tree, &layout, &pos);
        assert_relative_eq!(constraint_velocity_errors(&tree, &pos, &vel), g * u, epsilon = 1e-12);
    }

    #[test]
    fn test_correction_cancels_linearized_error() {
        let tree = closed_chain();
        let layout = TreeLayout::new(&tree, RotationRepresentation::Quaternion, 0, 0);
        let q = DVec::from_vec(vec![0.9, 0.1, 0.2, -0.3, 0.1, 0.2, -0.1, 0.6]);
        let pos = calc_positions(&tree, &layout, &q);
        let err = constraint_residuals(&tree, &pos);
        let g = constraint_jacobian(&tree, &layout, &pos);
        let du = mass_weighted_correction(&tree, &layout, &pos, &g, &err).unwrap();
        assert_relative_eq!(&g * du + err, DVec::zeros(4), epsilon = 1e-10);
    }

    #[test]
    fn test_newton_projection_converges() {
        let tree = closed_chain();
        let layout = TreeLayout::new(&tree, RotationRepresentation::Quaternion, 0, 0);
        let mut q = DVec::from_vec(vec![1.0, 0.0, 0.0, 0.0, 0.1, 0.2, -0.1, 0.6]);
        let iterations = project(&tree, &layout, &mut q);
        assert!(iterations > 0);
        let pos = calc_positions(&tree, &layout, &q);
        assert!(max_constraint_error(&tree, &constraint_residuals(&tree, &pos)) < 1e-10);
    }

    #[test]
    fn test_weld_projection() {
        let mut tree = MultibodyTree::new();
        let b = tree.add_body(link(), Transform::identity(), GROUND, Transform::identity(), JointKind::Free).unwrap();
        let target = Transform::new(rot_x(0.3), Vec3::new(0.0, 1.0, 0.5));
        tree.add_weld_constraint(GROUND, target, b, Transform::identity()).unwrap();
        let layout = TreeLayout::new(&tree, RotationRepresentation::Quaternion, 0, 0);

        let mut q = DVec::from_vec(vec![1.0, 0.05, -0.02, 0.01, 0.1, 0.9, 0.4]);
        project(&tree, &layout, &mut q);
        let pos = calc_positions(&tree, &layout, &q);
        assert_relative_eq!(pos.x_gb[b].rot, target.rot, epsilon = 1e-9);
        assert_relative_eq!(pos.x_gb[b].pos, target.pos, epsilon = 1e-9);
    }

    #[test]
    fn test_duplicate_constraints_are_singular() {
        let mut tree = MultibodyTree::new();
        let b = tree.add_body(link(), Transform::identity(), GROUND, Transform::identity(), JointKind::Free).unwrap();
        tree.add_coincident_stations_constraint(b, Vec3::x(), GROUND, Vec3::y()).unwrap();
        tree.add_coincident_stations_constraint(b, Vec3::x(), GROUND, Vec3::y()).unwrap();
        let layout = TreeLayout::new(&tree, RotationRepresentation::Quaternion, 0, 0);
        let q = DVec::from_vec(layout.default_q(&tree));
        let pos = calc_positions(&tree, &layout, &q);
        let err = constraint_residuals(&tree, &pos);
        let g = constraint_jacobian(&tree, &layout, &pos);
        let result = mass_weighted_correction(&tree, &layout, &pos, &g, &err);
        assert!(matches!(result, Err(Error::SingularJacobian(_))));
    }

    #[test]
    fn test_settings_deserialize_with_defaults() {
        let s: ProjectionSettings = serde_json::from_str(r#"{"max_iterations": 8}"#).unwrap();
        assert_eq!(s.max_iterations, 8);
        assert_eq!(s.tolerance, 1e-10);
    }
}
