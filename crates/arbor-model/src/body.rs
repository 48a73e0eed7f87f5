//! Rigid body definition.

use crate::Joint;
use arbor_math::MassProperties;

/// Index of the immovable ground body.
pub const GROUND: usize = 0;

/// A rigid body in the kinematic tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Body {
    /// Mass properties in the body frame.
    pub mass: MassProperties,
    /// Index of the parent body; ground is its own parent.
    pub parent: usize,
    /// Joint to the parent; `None` only for ground.
    pub joint: Option<Joint>,
}

impl Body {
    /// The ground body.
    pub fn ground() -> Self {
        Self {
            mass: MassProperties::zero(),
            parent: GROUND,
            joint: None,
        }
    }

    /// Number of generalized speeds contributed by this body's joint.
    pub fn nu(&self) -> usize {
        self.joint.map_or(0, |j| j.nu())
    }
}
