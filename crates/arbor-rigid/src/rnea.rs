//! Recursive Newton-Euler Algorithm (RNEA) -- inverse dynamics.
//!
//! Also hosts the force half of RNEA on its own: mapping spatial body forces
//! onto the joints in a single inward pass.

use arbor_math::{DVec, SpatialVec};
use arbor_model::{GROUND, MultibodyTree};

use crate::kinematics::apply_subspace;
use crate::{PositionCache, TreeLayout, VelocityCache};

/// Generalized forces equivalent to spatial body forces, Jᵀ·F.
///
/// `body_forces` are in body coordinates, one per body. No Jacobian is
/// formed: each body's force is shifted onto its parent after its own joint
/// has taken its share.
pub fn calc_internal_gradient(
    tree: &MultibodyTree,
    layout: &TreeLayout,
    pos: &PositionCache,
    body_forces: &[SpatialVec],
) -> DVec {
    let mut f = body_forces.to_vec();
    let mut tau = DVec::zeros(layout.u_len());
    inward(tree, layout, pos, &mut f, &mut tau);
    tau
}

/// Residual of the equations of motion, M·udot + c(q,u) − τ − Jᵀ·F.
///
/// Zero when `udot` is the forward-dynamics solution for the given loads.
pub fn calc_residual_forces(
    tree: &MultibodyTree,
    layout: &TreeLayout,
    pos: &PositionCache,
    vel: &VelocityCache,
    udot: &DVec,
    joint_forces: &DVec,
    body_forces: &[SpatialVec],
) -> DVec {
    let n = tree.nbodies();
    let mut acc = vec![SpatialVec::zero(); n];
    let mut f = vec![SpatialVec::zero(); n];

    // ── Outward pass: accelerations and body forces ──
    for (i, body, _) in tree.mobilized() {
        let a_parent = if body.parent == GROUND {
            SpatialVec::zero()
        } else {
            pos.x_tree[i].apply_motion(&acc[body.parent])
        };
        let a_joint = apply_subspace(&pos.s_body[i], &udot.as_slice()[layout.u_range(i)]);
        acc[i] = a_parent + vel.bias[i] + a_joint;

        let inertia = body.mass.to_matrix();
        let v = &vel.v[i];
        f[i] = SpatialVec::from(inertia * acc[i].data) + v.cross_force(&SpatialVec::from(inertia * v.data))
            - body_forces[i];
    }

    // ── Inward pass: joint forces ──
    let mut tau = DVec::zeros(layout.u_len());
    inward(tree, layout, pos, &mut f, &mut tau);
    tau - joint_forces
}

/// τ_i = Sᵢᵀ·Fᵢ leaf to root, accumulating each body's force into its parent.
fn inward(tree: &MultibodyTree, layout: &TreeLayout, pos: &PositionCache, f: &mut [SpatialVec], tau: &mut DVec) {
    for (i, body, _) in tree.mobilized().rev() {
        let tau_i = pos.s_body[i].tr_mul(&f[i].data);
        tau.rows_mut(layout.u_offset[i], tau_i.len()).copy_from(&tau_i);
        if body.parent != GROUND {
            let to_parent = pos.x_tree[i].inv_apply_force(&f[i]);
            f[body.parent] += to_parent;
        }
    }
}
