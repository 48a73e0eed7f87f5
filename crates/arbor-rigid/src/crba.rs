//! Composite Rigid Body Algorithm (CRBA) -- mass matrix computation.

use arbor_math::{DMat, Mat6};
use arbor_model::{GROUND, MultibodyTree};

use crate::{PositionCache, TreeLayout};

/// Joint-space mass matrix M(q), indexed like U.
///
/// Rows and columns outside the tree's speeds are zero.
pub fn calc_mass_matrix(tree: &MultibodyTree, layout: &TreeLayout, pos: &PositionCache) -> DMat {
    let n = tree.nbodies();
    let mut mass_matrix = DMat::zeros(layout.u_len(), layout.u_len());

    // Composite inertias (initialized from body inertias)
    let mut i_c: Vec<Mat6> = tree.bodies().iter().map(|b| b.mass.to_matrix()).collect();
    for (i, body, _) in tree.mobilized().rev() {
        if body.parent != GROUND {
            let ic_in_parent = pos.x_tree[i].congruence(&i_c[i]);
            i_c[body.parent] += ic_in_parent;
        }
    }
    debug_assert_eq!(i_c.len(), n);

    for (i, body, _) in tree.mobilized() {
        let s_i = &pos.s_body[i];
        let ui = layout.u_offset[i];
        let mut f = i_c[i] * s_i;

        let diag = s_i.tr_mul(&f);
        mass_matrix.view_mut((ui, ui), (diag.nrows(), diag.ncols())).copy_from(&diag);

        // Off-diagonal blocks: carry F up to each ancestor.
        let (mut child, mut j) = (i, body.parent);
        while j != GROUND {
            f = pos.x_tree[child].to_motion_matrix().transpose() * f;
            let uj = layout.u_offset[j];
            let block = pos.s_body[j].tr_mul(&f);
            mass_matrix.view_mut((uj, ui), (block.nrows(), block.ncols())).copy_from(&block);
            mass_matrix
                .view_mut((ui, uj), (block.ncols(), block.nrows()))
                .copy_from(&block.transpose());
            child = j;
            j = tree.bodies()[j].parent;
        }
    }

    mass_matrix
}
