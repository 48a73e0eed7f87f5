//! Rigid-body recursions for the arbor multibody engine.
//!
//! Every algorithm here works on a [`MultibodyTree`](arbor_model::MultibodyTree)
//! together with the stage caches it reads, and runs in time linear in the
//! number of bodies:
//!
//! - [`kinematics`]: body poses, velocities and coordinate rates
//! - [`aba`]: articulated-body forward dynamics
//! - [`rnea`]: inverse dynamics and the spatial-to-generalized force map
//! - [`crba`]: joint-space mass matrix
//! - [`constraint`]: constraint residuals, Jacobian and mass-weighted projection

pub mod aba;
pub mod cache;
pub mod constraint;
pub mod crba;
pub mod energy;
pub mod kinematics;
pub mod rnea;

pub use aba::{accelerate, articulate, calc_m_inverse_f, forward_dynamics};
pub use cache::{ArticulatedBody, DynamicsCache, PositionCache, ReactionCache, TreeLayout, VelocityCache};
pub use constraint::{
    ProjectionSettings, constraint_jacobian, constraint_residuals, constraint_velocity_errors,
    coordinate_correction, mass_weighted_correction, max_constraint_error,
};
pub use crba::calc_mass_matrix;
pub use energy::{calc_kinetic_energy, calc_potential_energy};
pub use kinematics::{calc_positions, calc_velocities};
pub use rnea::{calc_internal_gradient, calc_residual_forces};
