//! arbor: multibody dynamics on a stage-ordered state.
//!
//! This is the umbrella crate. It provides [`MultibodySystem`], which realizes
//! a kinematic tree into a [`State`] stage by stage, the fixed-step
//! [`ExplicitEuler`] integrator and run configuration, and re-exports the
//! core types from the sub-crates.

pub mod about;
pub mod config;
pub mod force;
pub mod integrator;
pub mod system;

pub use arbor_math::{self, MassProperties, SpatialVec, Transform, Vec3};
pub use arbor_model::{self, GROUND, JointKind, MultibodyTree, RotationRepresentation};
pub use arbor_rigid::{self, ProjectionSettings};
pub use arbor_state::{self, Error, Result, Stage, State};

pub use about::{about, version};
pub use config::{ConfigError, SimulationConfig};
pub use force::{ForceField, PointSpring, UniformGravity};
pub use integrator::{ExplicitEuler, Integrator};
pub use system::{AppliedForces, ModelingOptions, MultibodySystem};
