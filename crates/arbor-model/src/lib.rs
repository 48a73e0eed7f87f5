//! Kinematic tree and joint taxonomy for the arbor multibody engine.
//!
//! The tree is a flat arena of bodies indexed densely from ground (0); every
//! body names a parent with a smaller index. Bodies and constraints can only
//! be added until the tree is locked.

pub mod body;
pub mod constraint;
pub mod joint;
pub mod tree;

pub use body::{Body, GROUND};
pub use constraint::Constraint;
pub use joint::{Joint, JointKind, RotationRepresentation};
pub use tree::{MultibodyTree, Topology};
