//! Force elements applied by the integrator on every step.

use arbor_math::Vec3;
use arbor_state::{Result, State};

use crate::MultibodySystem;

/// Something that adds loads to a state's applied forces.
///
/// Called with the state realized through Moving, after the applied forces
/// were cleared for the step.
pub trait ForceField: Send + Sync {
    /// Add this element's contribution.
    fn apply(&self, system: &MultibodySystem, state: &mut State) -> Result<()>;
}

/// Constant gravitational field acting on every body's center of mass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UniformGravity {
    /// Gravitational acceleration in ground.
    pub gravity: Vec3,
}

impl UniformGravity {
    /// Field with acceleration `gravity` in ground.
    pub fn new(gravity: Vec3) -> Self {
        Self { gravity }
    }
}

impl ForceField for UniformGravity {
    fn apply(&self, system: &MultibodySystem, state: &mut State) -> Result<()> {
        system.apply_gravity(state, &self.gravity)
    }
}

/// Linear spring from a station on a body to a point fixed in ground, with
/// optional viscous damping on one joint speed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointSpring {
    /// Body carrying the spring's moving end.
    pub body: usize,
    /// Attachment point on the body, body frame.
    pub station: Vec3,
    /// Attachment point in ground.
    pub anchor: Vec3,
    /// Force per unit stretch.
    pub stiffness: f64,
    /// `(body, speed index, coefficient)` of the damped joint speed.
    pub damping: Option<(usize, usize, f64)>,
}

impl PointSpring {
    /// Undamped spring of zero rest length.
    pub fn new(body: usize, station: Vec3, anchor: Vec3, stiffness: f64) -> Self {
        Self {
            body,
            station,
            anchor,
            stiffness,
            damping: None,
        }
    }

    /// Damp speed `index` of `body`'s joint with coefficient `c`.
    pub fn with_joint_damping(mut self, body: usize, index: usize, c: f64) -> Self {
        self.damping = Some((body, index, c));
        self
    }
}

impl ForceField for PointSpring {
    fn apply(&self, system: &MultibodySystem, state: &mut State) -> Result<()> {
        let x = system.body_configuration(state, self.body)?;
        let stretch = x.transform_point(&self.station) - self.anchor;
        system.apply_point_force(state, self.body, &self.station, &(-self.stiffness * stretch))?;

        if let Some((body, index, c)) = self.damping {
            let speed = system.joint_u(state, body)?.get(index).copied().unwrap_or(0.0);
            system.apply_joint_force(state, body, index, -c * speed)?;
        }
        Ok(())
    }
}
