//! Stage-tagged quantities stored in the state cache.

use std::ops::Range;

use arbor_math::{DMat, DVec, Mat6, Mat6x, SpatialTransform, SpatialVec, Transform};
use arbor_model::{MultibodyTree, RotationRepresentation};
use arbor_state::{Cached, Stage};

/// Where each body's coordinates and speeds live in Q and U.
///
/// The tree's blocks are the last ones in the state, so vectors indexed like
/// Q or U have lengths [`TreeLayout::q_len`] and [`TreeLayout::u_len`].
#[derive(Debug, Clone, PartialEq)]
pub struct TreeLayout {
    /// Rotation representation the layout was built for.
    pub rep: RotationRepresentation,
    /// First coordinate owned by the tree.
    pub q_start: usize,
    /// First speed owned by the tree.
    pub u_start: usize,
    /// Offset of each body's coordinates in Q (ground has none).
    pub q_offset: Vec<usize>,
    /// Number of coordinates per body.
    pub nq: Vec<usize>,
    /// Offset of each body's speeds in U.
    pub u_offset: Vec<usize>,
    /// Number of speeds per body.
    pub nu: Vec<usize>,
    /// Coordinates owned by the tree.
    pub total_nq: usize,
    /// Speeds owned by the tree.
    pub total_nu: usize,
}

impl TreeLayout {
    /// Lay out coordinates and speeds body by body starting at the given offsets.
    pub fn new(tree: &MultibodyTree, rep: RotationRepresentation, q_start: usize, u_start: usize) -> Self {
        let n = tree.nbodies();
        let mut layout = Self {
            rep,
            q_start,
            u_start,
            q_offset: vec![q_start; n],
            nq: vec![0; n],
            u_offset: vec![u_start; n],
            nu: vec![0; n],
            total_nq: 0,
            total_nu: 0,
        };
        for (i, _, joint) in tree.mobilized() {
            layout.q_offset[i] = q_start + layout.total_nq;
            layout.u_offset[i] = u_start + layout.total_nu;
            layout.nq[i] = joint.nq(rep);
            layout.nu[i] = joint.nu();
            layout.total_nq += layout.nq[i];
            layout.total_nu += layout.nu[i];
        }
        layout
    }

    /// Length of vectors indexed like Q.
    pub fn q_len(&self) -> usize {
        self.q_start + self.total_nq
    }

    /// Length of vectors indexed like U.
    pub fn u_len(&self) -> usize {
        self.u_start + self.total_nu
    }

    /// Range of `body`'s coordinates in Q.
    pub fn q_range(&self, body: usize) -> Range<usize> {
        self.q_offset[body]..self.q_offset[body] + self.nq[body]
    }

    /// Range of `body`'s speeds in U.
    pub fn u_range(&self, body: usize) -> Range<usize> {
        self.u_offset[body]..self.u_offset[body] + self.nu[body]
    }

    /// Default coordinates for the whole tree.
    pub fn default_q(&self, tree: &MultibodyTree) -> Vec<f64> {
        tree.mobilized().flat_map(|(_, _, j)| j.default_q(self.rep)).collect()
    }
}

impl Cached for TreeLayout {
    const STAGE: Stage = Stage::Modeled;
}

/// Body poses and joint geometry.
#[derive(Debug, Clone)]
pub struct PositionCache {
    /// Pose of each body in its parent, X_PB.
    pub x_pb: Vec<Transform>,
    /// Pose of each body in ground, X_GB.
    pub x_gb: Vec<Transform>,
    /// Plücker transform from parent to body coordinates.
    pub x_tree: Vec<SpatialTransform>,
    /// Joint motion subspace in body coordinates (6 x nu).
    pub s_body: Vec<Mat6x>,
}

impl Cached for PositionCache {
    const STAGE: Stage = Stage::Configured;
}

/// Body velocities in body coordinates.
#[derive(Debug, Clone)]
pub struct VelocityCache {
    /// Spatial velocity of each body origin, body coordinates.
    pub v: Vec<SpatialVec>,
    /// Velocity across each joint, S·u, body coordinates.
    pub v_joint: Vec<SpatialVec>,
    /// Velocity-product acceleration v ×ₘ (S·u).
    pub bias: Vec<SpatialVec>,
    /// Coordinate rates.
    pub qdot: DVec,
}

impl VelocityCache {
    /// Everything at rest.
    pub fn at_rest(nbodies: usize, nq: usize) -> Self {
        Self {
            v: vec![SpatialVec::zero(); nbodies],
            v_joint: vec![SpatialVec::zero(); nbodies],
            bias: vec![SpatialVec::zero(); nbodies],
            qdot: DVec::zeros(nq),
        }
    }
}

impl Cached for VelocityCache {
    const STAGE: Stage = Stage::Moving;
}

/// Per-body quantities of the articulated-body inward pass.
#[derive(Debug, Clone)]
pub struct ArticulatedBody {
    /// Articulated inertia I_A.
    pub inertia: Mat6,
    /// Articulated bias force p_A.
    pub bias: SpatialVec,
    /// U = I_A·S.
    pub u_mat: Mat6x,
    /// D⁻¹ = (Sᵀ·U)⁻¹.
    pub d_inv: DMat,
    /// u = τ − Sᵀ·p_A.
    pub u_vec: DVec,
}

impl Default for ArticulatedBody {
    fn default() -> Self {
        Self {
            inertia: Mat6::zeros(),
            bias: SpatialVec::zero(),
            u_mat: Mat6x::zeros(0),
            d_inv: DMat::zeros(0, 0),
            u_vec: DVec::zeros(0),
        }
    }
}

/// Articulated inertias for the applied forces.
#[derive(Debug, Clone, Default)]
pub struct DynamicsCache {
    /// One entry per body; ground's entry is unused.
    pub bodies: Vec<ArticulatedBody>,
}

impl Cached for DynamicsCache {
    const STAGE: Stage = Stage::Dynamics;
}

/// Accelerations.
#[derive(Debug, Clone)]
pub struct ReactionCache {
    /// Generalized accelerations.
    pub udot: DVec,
    /// Spatial acceleration of each body, body coordinates.
    pub a: Vec<SpatialVec>,
}

impl Cached for ReactionCache {
    const STAGE: Stage = Stage::Reacting;
}
