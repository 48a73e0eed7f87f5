//! Forward kinematics: body poses, velocities and coordinate rates.

use arbor_math::{DVec, Mat6x, SpatialTransform, SpatialVec, Transform, Vec3, Vec6};
use arbor_model::{GROUND, MultibodyTree};

use crate::{PositionCache, TreeLayout, VelocityCache};

/// Column `k` of a motion subspace as a spatial vector.
#[inline]
pub(crate) fn column(s: &Mat6x, k: usize) -> SpatialVec {
    SpatialVec::from(s.fixed_view::<6, 1>(0, k).into_owned())
}

/// S·u for a joint's speeds.
pub(crate) fn apply_subspace(s: &Mat6x, u: &[f64]) -> SpatialVec {
    let mut v = Vec6::zeros();
    for (k, uk) in u.iter().enumerate() {
        v += s.column(k) * *uk;
    }
    SpatialVec::from(v)
}

/// Poses and motion subspaces, root to leaf.
pub fn calc_positions(tree: &MultibodyTree, layout: &TreeLayout, q: &DVec) -> PositionCache {
    let n = tree.nbodies();
    let mut cache = PositionCache {
        x_pb: vec![Transform::identity(); n],
        x_gb: vec![Transform::identity(); n],
        x_tree: vec![SpatialTransform::identity(); n],
        s_body: vec![Mat6x::zeros(0); n],
    };
    for (i, body, joint) in tree.mobilized() {
        let x_pb = joint.body_pose(&q.as_slice()[layout.q_range(i)], layout.rep);
        cache.x_gb[i] = cache.x_gb[body.parent].compose(&x_pb);
        cache.x_tree[i] = x_pb.to_plucker();
        cache.x_pb[i] = x_pb;
        cache.s_body[i] = joint.body_motion_subspace();
    }
    cache
}

/// Velocities, velocity-product terms and qdot, root to leaf.
pub fn calc_velocities(
    tree: &MultibodyTree,
    layout: &TreeLayout,
    pos: &PositionCache,
    q: &DVec,
    u: &DVec,
) -> VelocityCache {
    let mut cache = VelocityCache::at_rest(tree.nbodies(), q.len());
    for (i, body, joint) in tree.mobilized() {
        let u_i = &u.as_slice()[layout.u_range(i)];
        let v_joint = apply_subspace(&pos.s_body[i], u_i);
        let v = if body.parent == GROUND {
            v_joint
        } else {
            pos.x_tree[i].apply_motion(&cache.v[body.parent]) + v_joint
        };
        cache.bias[i] = v.cross_motion(&v_joint);
        cache.v[i] = v;
        cache.v_joint[i] = v_joint;

        let qr = layout.q_range(i);
        joint.q_dot(
            &q.as_slice()[qr.clone()],
            u_i,
            layout.rep,
            &mut cache.qdot.as_mut_slice()[qr],
        );
    }
    cache
}

/// Body-frame spatial forces `[moment about body origin; force]` given in
/// ground coordinates, re-expressed in each body's own coordinates.
pub fn body_forces_in_body_frames(pos: &PositionCache, forces_in_ground: &[SpatialVec]) -> Vec<SpatialVec> {
    pos.x_gb
        .iter()
        .zip(forces_in_ground)
        .map(|(x, f)| f.rotate(&x.rot.transpose()))
        .collect()
}

/// Velocity of the body origin, `[ω; v]` in ground coordinates.
pub fn velocity_in_ground(pos: &PositionCache, vel: &VelocityCache, body: usize) -> SpatialVec {
    vel.v[body].rotate(&pos.x_gb[body].rot)
}

/// Classical acceleration of the body origin, `[α; a]` in ground coordinates.
pub fn acceleration_in_ground(pos: &PositionCache, vel: &VelocityCache, a: &SpatialVec, body: usize) -> SpatialVec {
    let v = &vel.v[body];
    let classical = SpatialVec::new(a.angular(), a.linear() + v.angular().cross(&v.linear()));
    classical.rotate(&pos.x_gb[body].rot)
}

/// Location in ground of a station fixed on `body`.
pub fn station_location(pos: &PositionCache, body: usize, station: &Vec3) -> Vec3 {
    pos.x_gb[body].transform_point(station)
}

/// Velocity in ground of a station fixed on `body`.
pub fn station_velocity(pos: &PositionCache, vel: &VelocityCache, body: usize, station: &Vec3) -> Vec3 {
    let v = velocity_in_ground(pos, vel, body);
    let r = pos.x_gb[body].transform_vector(station);
    v.linear() + v.angular().cross(&r)
}
