//! Articulated Body Algorithm (ABA) -- O(n) forward dynamics.
//!
//! Given poses, velocities, joint forces and body forces, compute udot
//! without forming the mass matrix. Velocities and velocity-product terms
//! come from the Moving-stage cache, so only two passes remain here:
//! 1. Inward pass ([`articulate`]): articulated inertias and bias forces
//! 2. Outward pass ([`accelerate`]): accelerations
//!
//! Body forces are in body coordinates, see
//! [`body_forces_in_body_frames`](crate::kinematics::body_forces_in_body_frames).

use arbor_math::{DVec, SpatialVec};
use arbor_model::{GROUND, MultibodyTree};
use arbor_state::{Error, Result};

use crate::kinematics::apply_subspace;
use crate::{ArticulatedBody, DynamicsCache, PositionCache, ReactionCache, TreeLayout, VelocityCache};

/// Inward pass: articulated inertias, bias forces and the per-joint
/// factorization used by [`accelerate`].
///
/// `joint_forces` is indexed like U (offsets from `layout`), `body_forces`
/// has one entry per body.
pub fn articulate(
    tree: &MultibodyTree,
    layout: &TreeLayout,
    pos: &PositionCache,
    vel: &VelocityCache,
    joint_forces: &DVec,
    body_forces: &[SpatialVec],
) -> Result<DynamicsCache> {
    let n = tree.nbodies();
    let mut bodies = vec![ArticulatedBody::default(); n];

    for (i, body, _) in tree.mobilized() {
        let inertia = body.mass.to_matrix();
        let v = &vel.v[i];
        bodies[i].inertia = inertia;
        bodies[i].bias = v.cross_force(&SpatialVec::from(inertia * v.data)) - body_forces[i];
    }

    // ── Inward pass ──
    for (i, body, _) in tree.mobilized().rev() {
        let s = &pos.s_body[i];
        let ia = bodies[i].inertia;
        let pa = bodies[i].bias;

        let u_mat = ia * s;
        let d = s.tr_mul(&u_mat);
        let d_inv = d.try_inverse().ok_or(Error::SingularMassMatrix { body: i })?;
        let tau = DVec::from_column_slice(&joint_forces.as_slice()[layout.u_range(i)]);
        let u_vec = tau - s.tr_mul(&pa.data);

        if body.parent != GROUND {
            let ia_art = ia - &u_mat * &d_inv * u_mat.transpose();
            let pa_art = pa
                + SpatialVec::from(ia_art * vel.bias[i].data)
                + SpatialVec::from(&u_mat * (&d_inv * &u_vec));
            let x = &pos.x_tree[i];
            bodies[body.parent].inertia += x.congruence(&ia_art);
            bodies[body.parent].bias += x.inv_apply_force(&pa_art);
        }

        let entry = &mut bodies[i];
        entry.u_mat = u_mat;
        entry.d_inv = d_inv;
        entry.u_vec = u_vec;
    }

    Ok(DynamicsCache { bodies })
}

/// Outward pass: generalized accelerations and body spatial accelerations.
pub fn accelerate(
    tree: &MultibodyTree,
    layout: &TreeLayout,
    pos: &PositionCache,
    vel: &VelocityCache,
    dynamics: &DynamicsCache,
) -> ReactionCache {
    let mut udot = DVec::zeros(layout.u_len());
    let mut a = vec![SpatialVec::zero(); tree.nbodies()];

    for (i, body, _) in tree.mobilized() {
        let ab = &dynamics.bodies[i];
        let a_parent = if body.parent == GROUND {
            SpatialVec::zero()
        } else {
            pos.x_tree[i].apply_motion(&a[body.parent])
        };
        let a_prime = a_parent + vel.bias[i];
        let udot_i = &ab.d_inv * (&ab.u_vec - ab.u_mat.tr_mul(&a_prime.data));
        a[i] = a_prime + apply_subspace(&pos.s_body[i], udot_i.as_slice());

        udot.rows_mut(layout.u_offset[i], udot_i.len()).copy_from(&udot_i);
    }

    ReactionCache { udot, a }
}

/// Both passes in one call.
pub fn forward_dynamics(
    tree: &MultibodyTree,
    layout: &TreeLayout,
    pos: &PositionCache,
    vel: &VelocityCache,
    joint_forces: &DVec,
    body_forces: &[SpatialVec],
) -> Result<ReactionCache> {
    let dynamics = articulate(tree, layout, pos, vel, joint_forces, body_forces)?;
    Ok(accelerate(tree, layout, pos, vel, &dynamics))
}

/// M⁻¹·f: the accelerations produced by generalized forces `f` (indexed
/// like U) on a tree at rest with no other loads.
pub fn calc_m_inverse_f(
    tree: &MultibodyTree,
    layout: &TreeLayout,
    pos: &PositionCache,
    f: &DVec,
) -> Result<DVec> {
    let rest = VelocityCache::at_rest(tree.nbodies(), layout.q_len());
    let no_loads = vec![SpatialVec::zero(); tree.nbodies()];
    Ok(forward_dynamics(tree, layout, pos, &rest, f, &no_loads)?.udot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{calc_mass_matrix, calc_positions, calc_velocities, kinematics::body_forces_in_body_frames};
    use approx::assert_relative_eq;
    use arbor_math::{MassProperties, Mat3, Transform, Vec3};
    use arbor_model::{JointKind, RotationRepresentation};

    const G: f64 = 9.8;

    fn gravity_forces(tree: &MultibodyTree, pos: &PositionCache) -> Vec<SpatialVec> {
        let g = Vec3::new(0.0, -G, 0.0);
        tree.bodies()
            .iter()
            .zip(&pos.x_gb)
            .map(|(b, x)| {
                let f = g * b.mass.mass;
                SpatialVec::new(x.transform_vector(&b.mass.com).cross(&f), f)
            })
            .collect()
    }

    fn solve(tree: &MultibodyTree, rep: RotationRepresentation, q: &[f64], u: &[f64], tau: &[f64]) -> DVec {
        let layout = TreeLayout::new(tree, rep, 0, 0);
        let q = DVec::from_column_slice(q);
        let u = DVec::from_column_slice(u);
        let pos = calc_positions(tree, &layout, &q);
        let vel = calc_velocities(tree, &layout, &pos, &q, &u);
        let f = body_forces_in_body_frames(&pos, &gravity_forces(tree, &pos));
        forward_dynamics(tree, &layout, &pos, &vel, &DVec::from_column_slice(tau), &f)
            .unwrap()
            .udot
    }

    #[test]
    fn test_pendulum_hanging_equilibrium() {
        let mut tree = MultibodyTree::new();
        let mass = MassProperties::point_mass(3.0, Vec3::new(2.5, 0.0, 0.0));
        tree.add_body(mass, Transform::identity(), GROUND, Transform::identity(), JointKind::Pin)
            .unwrap();
        let down = -std::f64::consts::FRAC_PI_2;
        let udot = solve(&tree, RotationRepresentation::Quaternion, &[down], &[0.0], &[0.0]);
        assert!(udot[0].abs() < 1e-12, "udot = {}", udot[0]);
    }

    #[test]
    fn test_pendulum_horizontal() {
        // Point mass m at distance l: θ̈ = -g/l when horizontal.
        let mut tree = MultibodyTree::new();
        let mass = MassProperties::point_mass(3.0, Vec3::new(2.5, 0.0, 0.0));
        tree.add_body(mass, Transform::identity(), GROUND, Transform::identity(), JointKind::Pin)
            .unwrap();
        let udot = solve(&tree, RotationRepresentation::Quaternion, &[0.0], &[0.0], &[0.0]);
        assert_relative_eq!(udot[0], -G / 2.5, epsilon = 1e-12);

        // Joint torque m g l balances it.
        let udot = solve(&tree, RotationRepresentation::Quaternion, &[0.0], &[0.0], &[3.0 * G * 2.5]);
        assert!(udot[0].abs() < 1e-12);
    }

    #[test]
    fn test_free_fall() {
        let mut tree = MultibodyTree::new();
        let mass = MassProperties::new(
            2.0,
            Vec3::new(0.3, -0.1, 0.2),
            Mat3::from_diagonal(&Vec3::new(0.1, 0.2, 0.3)),
        );
        tree.add_body(mass, Transform::identity(), GROUND, Transform::identity(), JointKind::Free)
            .unwrap();
        let q = [0.9, 0.1, -0.3, 0.3, 1.0, 2.0, 3.0];
        let udot = solve(&tree, RotationRepresentation::Quaternion, &q, &[0.0; 6], &[0.0; 6]);
        // No rotation; the body origin accelerates with g, seen in body coordinates.
        let layout = TreeLayout::new(&tree, RotationRepresentation::Quaternion, 0, 0);
        let pos = calc_positions(&tree, &layout, &DVec::from_column_slice(&q));
        let g_body = pos.x_gb[1].rot.transpose() * Vec3::new(0.0, -G, 0.0);
        for k in 0..3 {
            assert!(udot[k].abs() < 1e-10);
            assert_relative_eq!(udot[3 + k], g_body[k], epsilon = 1e-10);
        }
    }

    #[test]
    fn test_m_inverse_matches_mass_matrix() {
        let mut tree = MultibodyTree::new();
        let link = MassProperties::new(
            1.5,
            Vec3::new(0.5, 0.1, 0.0),
            Mat3::from_diagonal(&Vec3::new(0.01, 0.1, 0.1)),
        );
        let tip = Transform::from_translation(Vec3::x());
        let b1 = tree.add_body(link, Transform::identity(), GROUND, Transform::identity(), JointKind::Pin)
            .unwrap();
        let b2 = tree.add_body(link, Transform::identity(), b1, tip, JointKind::Ball).unwrap();
        tree.add_body(link, Transform::identity(), b2, tip, JointKind::Sliding).unwrap();

        let layout = TreeLayout::new(&tree, RotationRepresentation::EulerAngles, 0, 0);
        let q = DVec::from_vec(vec![0.3, 0.2, -0.4, 0.5, 0.7]);
        let pos = calc_positions(&tree, &layout, &q);
        let f = DVec::from_vec(vec![1.0, -2.0, 0.5, 0.3, 4.0]);
        let minv_f = calc_m_inverse_f(&tree, &layout, &pos, &f).unwrap();
        let m = calc_mass_matrix(&tree, &layout, &pos);
        assert_relative_eq!(m * minv_f, f, epsilon = 1e-10);
    }

    #[test]
    fn test_massless_leaf_is_singular() {
        let mut tree = MultibodyTree::new();
        tree.add_body(MassProperties::zero(), Transform::identity(), GROUND, Transform::identity(), JointKind::Pin)
            .unwrap();
        let layout = TreeLayout::new(&tree, RotationRepresentation::Quaternion, 0, 0);
        let q = DVec::zeros(1);
        let pos = calc_positions(&tree, &layout, &q);
        let err = calc_m_inverse_f(&tree, &layout, &pos, &DVec::zeros(1)).unwrap_err();
        assert_eq!(err, Error::SingularMassMatrix { body: 1 });
    }
}
