//! Mechanical energy of the tree.

use arbor_math::{SpatialVec, Vec3};
use arbor_model::MultibodyTree;

use crate::{PositionCache, VelocityCache};

/// Kinetic energy, Σ ½·vᵀ·I·v over all bodies.
pub fn calc_kinetic_energy(tree: &MultibodyTree, vel: &VelocityCache) -> f64 {
    tree.mobilized()
        .map(|(i, body, _)| {
            let v = &vel.v[i];
            let momentum = SpatialVec::from(body.mass.to_matrix() * v.data);
            0.5 * v.dot(&momentum)
        })
        .sum()
}

/// Gravitational potential energy relative to the ground origin.
pub fn calc_potential_energy(tree: &MultibodyTree, pos: &PositionCache, gravity: &Vec3) -> f64 {
    tree.mobilized()
        .map(|(i, body, _)| {
            let com = body.mass.com_in(&pos.x_gb[i]);
            -body.mass.mass * gravity.dot(&com)
        })
        .sum()
}
