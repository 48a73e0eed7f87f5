//! [`MultibodySystem`]: the tree, its stage hooks and the runtime API.
//!
//! The system owns the topology and nothing else; every number it computes
//! lives in a [`State`]. Each stage hook reads what lower stages cached and
//! stores its own results, so any query below is just a guarded cache read.

use arbor_math::{DMat, DVec, MassProperties, SpatialVec, Transform, Vec3};
use arbor_model::{GROUND, JointKind, MultibodyTree, RotationRepresentation};
use arbor_rigid::kinematics::{acceleration_in_ground, body_forces_in_body_frames, velocity_in_ground};
use arbor_rigid::{
    DynamicsCache, PositionCache, ProjectionSettings, ReactionCache, TreeLayout, VelocityCache, accelerate, articulate,
    calc_positions, calc_velocities, constraint_jacobian, coordinate_correction, forward_dynamics,
    mass_weighted_correction, max_constraint_error,
};
use arbor_state::{Cached, DiscreteVariableIndex, Error, Realizer, Result, Stage, State};
use tracing::{debug, warn};

/// Choices that shape the state layout. Changing them returns the state to
/// [`Stage::Built`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModelingOptions {
    /// How Ball and Free joints parameterize rotation.
    pub rotation: RotationRepresentation,
}

/// Loads accumulated for the next dynamics realization.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedForces {
    /// Per-body `[moment about body origin; force]` in ground, ground included.
    pub body: Vec<SpatialVec>,
    /// Generalized forces, indexed like U.
    pub joint: DVec,
}

impl AppliedForces {
    fn zero(nbodies: usize, nu: usize) -> Self {
        Self {
            body: vec![SpatialVec::zero(); nbodies],
            joint: DVec::zeros(nu),
        }
    }

    fn clear(&mut self) {
        self.body.iter_mut().for_each(|f| *f = SpatialVec::zero());
        self.joint.fill(0.0);
    }
}

#[derive(Debug, Clone, Copy)]
struct BuiltHandles {
    options: DiscreteVariableIndex,
}

impl Cached for BuiltHandles {
    const STAGE: Stage = Stage::Built;
}

#[derive(Debug, Clone, Copy)]
struct ModelHandles {
    forces: DiscreteVariableIndex,
}

impl Cached for ModelHandles {
    const STAGE: Stage = Stage::Modeled;
}

/// A multibody tree plus constraints, realized into [`State`]s.
#[derive(Debug, Clone, Default)]
pub struct MultibodySystem {
    tree: MultibodyTree,
}

impl MultibodySystem {
    /// A system containing only ground.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing tree.
    pub fn from_tree(tree: MultibodyTree) -> Self {
        Self { tree }
    }

    /// The underlying tree.
    pub fn tree(&self) -> &MultibodyTree {
        &self.tree
    }

    /// Number of bodies including ground.
    pub fn nbodies(&self) -> usize {
        self.tree.nbodies()
    }

    /// Realize `state` up to `stage`.
    pub fn realize(&self, state: &mut State, stage: Stage) -> Result<()> {
        state.advance_to_stage(stage, self)
    }

    // ── Construction ──

    /// Append a body; fails once any state has been realized to Built.
    pub fn add_body(
        &mut self,
        mass: MassProperties,
        frame_on_child: Transform,
        parent: usize,
        frame_on_parent: Transform,
        kind: JointKind,
    ) -> Result<usize> {
        self.tree.add_body(mass, frame_on_child, parent, frame_on_parent, kind)
    }

    /// See [`MultibodyTree::add_coincident_stations_constraint`].
    pub fn add_coincident_stations_constraint(
        &mut self,
        body_a: usize,
        station_a: Vec3,
        body_b: usize,
        station_b: Vec3,
    ) -> Result<usize> {
        self.tree.add_coincident_stations_constraint(body_a, station_a, body_b, station_b)
    }

    /// See [`MultibodyTree::add_constant_distance_constraint`].
    pub fn add_constant_distance_constraint(
        &mut self,
        body_a: usize,
        station_a: Vec3,
        body_b: usize,
        station_b: Vec3,
        distance: f64,
    ) -> Result<usize> {
        self.tree
            .add_constant_distance_constraint(body_a, station_a, body_b, station_b, distance)
    }

    /// See [`MultibodyTree::add_weld_constraint`].
    pub fn add_weld_constraint(
        &mut self,
        body_a: usize,
        frame_a: Transform,
        body_b: usize,
        frame_b: Transform,
    ) -> Result<usize> {
        self.tree.add_weld_constraint(body_a, frame_a, body_b, frame_b)
    }

    // ── Modeling ──

    /// Current modeling options; requires Built.
    pub fn modeling_options<'s>(&self, state: &'s State) -> Result<&'s ModelingOptions> {
        let handles = state.cache_entry::<BuiltHandles>()?;
        state.discrete_variable(handles.options)
    }

    /// Parameterize rotations with body-fixed 1-2-3 angles instead of
    /// quaternions. Requires Built; the state drops back to Built.
    pub fn set_use_euler_angles(&self, state: &mut State, use_angles: bool) -> Result<()> {
        let index = state.cache_entry::<BuiltHandles>()?.options;
        state.upd_discrete_variable::<ModelingOptions>(index)?.rotation = if use_angles {
            RotationRepresentation::EulerAngles
        } else {
            RotationRepresentation::Quaternion
        };
        Ok(())
    }

    /// Where the tree's coordinates and speeds sit in the state; requires Modeled.
    pub fn layout<'s>(&self, state: &'s State) -> Result<&'s TreeLayout> {
        state.cache_entry::<TreeLayout>()
    }

    // ── Coordinates and speeds ──

    /// Coordinates of one body's joint.
    pub fn joint_q<'s>(&self, state: &'s State, body: usize) -> Result<&'s [f64]> {
        let range = self.layout(state)?.q_range(self.mobilized(body)?);
        Ok(&state.q().as_slice()[range])
    }

    /// Set coordinate `index` of one body's joint; invalidates Configured.
    pub fn set_joint_q(&self, state: &mut State, body: usize, index: usize, value: f64) -> Result<()> {
        let range = self.layout(state)?.q_range(self.mobilized(body)?);
        if index >= range.len() {
            return Err(Error::dimension(format!("joint q of body {body}"), range.len(), index + 1));
        }
        state.upd_q()[range.start + index] = value;
        Ok(())
    }

    /// Speeds of one body's joint.
    pub fn joint_u<'s>(&self, state: &'s State, body: usize) -> Result<&'s [f64]> {
        let range = self.layout(state)?.u_range(self.mobilized(body)?);
        Ok(&state.u().as_slice()[range])
    }

    /// Set speed `index` of one body's joint; invalidates Moving.
    pub fn set_joint_u(&self, state: &mut State, body: usize, index: usize, value: f64) -> Result<()> {
        let range = self.layout(state)?.u_range(self.mobilized(body)?);
        if index >= range.len() {
            return Err(Error::dimension(format!("joint u of body {body}"), range.len(), index + 1));
        }
        state.upd_u()[range.start + index] = value;
        Ok(())
    }

    /// All generalized coordinates; requires Modeled.
    pub fn q<'s>(&self, state: &'s State) -> Result<&'s DVec> {
        state.require_stage(Stage::Modeled, "q")?;
        Ok(state.q())
    }

    /// All generalized speeds; requires Modeled.
    pub fn u<'s>(&self, state: &'s State) -> Result<&'s DVec> {
        state.require_stage(Stage::Modeled, "u")?;
        Ok(state.u())
    }

    /// Coordinate rates; requires Moving.
    pub fn q_dot<'s>(&self, state: &'s State) -> Result<&'s DVec> {
        Ok(&state.cache_entry::<VelocityCache>()?.qdot)
    }

    /// Generalized accelerations; requires Reacting.
    pub fn u_dot<'s>(&self, state: &'s State) -> Result<&'s DVec> {
        Ok(&state.cache_entry::<ReactionCache>()?.udot)
    }

    // ── Applied forces ──

    /// Zero every applied force; invalidates Dynamics.
    pub fn clear_applied_forces(&self, state: &mut State) -> Result<()> {
        self.upd_applied_forces(state)?.clear();
        Ok(())
    }

    /// Add the weight of every body, acting at its center of mass. Requires
    /// Configured.
    pub fn apply_gravity(&self, state: &mut State, gravity: &Vec3) -> Result<()> {
        let weights: Vec<(usize, SpatialVec)> = {
            let pos = state.cache_entry::<PositionCache>()?;
            self.tree
                .mobilized()
                .map(|(i, body, _)| {
                    let f = gravity * body.mass.mass;
                    let r = pos.x_gb[i].transform_vector(&body.mass.com);
                    (i, SpatialVec::new(r.cross(&f), f))
                })
                .collect()
        };
        let forces = self.upd_applied_forces(state)?;
        for (i, w) in weights {
            forces.body[i] += w;
        }
        Ok(())
    }

    /// Add a generalized force to speed `index` of one body's joint.
    pub fn apply_joint_force(&self, state: &mut State, body: usize, index: usize, value: f64) -> Result<()> {
        let range = self.layout(state)?.u_range(self.mobilized(body)?);
        if index >= range.len() {
            return Err(Error::dimension(format!("joint force of body {body}"), range.len(), index + 1));
        }
        self.upd_applied_forces(state)?.joint[range.start + index] += value;
        Ok(())
    }

    /// Add a force (in ground) acting at a station fixed on `body`. Requires
    /// Configured.
    pub fn apply_point_force(&self, state: &mut State, body: usize, station: &Vec3, force: &Vec3) -> Result<()> {
        let body = self.mobilized(body)?;
        let r = state.cache_entry::<PositionCache>()?.x_gb[body].transform_vector(station);
        self.upd_applied_forces(state)?.body[body] += SpatialVec::new(r.cross(force), *force);
        Ok(())
    }

    /// Add a spatial force `[moment about body origin; force]` in ground.
    pub fn apply_body_force(&self, state: &mut State, body: usize, force: &SpatialVec) -> Result<()> {
        let body = self.mobilized(body)?;
        self.upd_applied_forces(state)?.body[body] += *force;
        Ok(())
    }

    /// Accumulated body forces; requires Modeled.
    pub fn applied_body_forces<'s>(&self, state: &'s State) -> Result<&'s [SpatialVec]> {
        Ok(&self.applied_forces(state)?.body)
    }

    /// Accumulated joint forces; requires Modeled.
    pub fn applied_joint_forces<'s>(&self, state: &'s State) -> Result<&'s DVec> {
        Ok(&self.applied_forces(state)?.joint)
    }

    fn applied_forces<'s>(&self, state: &'s State) -> Result<&'s AppliedForces> {
        let index = state.cache_entry::<ModelHandles>()?.forces;
        state.discrete_variable(index)
    }

    fn upd_applied_forces<'s>(&self, state: &'s mut State) -> Result<&'s mut AppliedForces> {
        let index = state.cache_entry::<ModelHandles>()?.forces;
        state.upd_discrete_variable(index)
    }

    // ── Body kinematics ──

    /// X_GB; requires Configured.
    pub fn body_configuration(&self, state: &State, body: usize) -> Result<Transform> {
        let pos = state.cache_entry::<PositionCache>()?;
        self.body_index(body)?;
        Ok(pos.x_gb[body])
    }

    /// `[ω; v]` of the body origin in ground; requires Moving.
    pub fn body_velocity(&self, state: &State, body: usize) -> Result<SpatialVec> {
        let vel = state.cache_entry::<VelocityCache>()?;
        let pos = state.cache_entry::<PositionCache>()?;
        self.body_index(body)?;
        Ok(velocity_in_ground(pos, vel, body))
    }

    /// `[α; a]` of the body origin in ground; requires Reacting.
    pub fn body_acceleration(&self, state: &State, body: usize) -> Result<SpatialVec> {
        let reaction = state.cache_entry::<ReactionCache>()?;
        let vel = state.cache_entry::<VelocityCache>()?;
        let pos = state.cache_entry::<PositionCache>()?;
        self.body_index(body)?;
        Ok(acceleration_in_ground(pos, vel, &reaction.a[body], body))
    }

    // ── Dynamics ──

    /// Generalized forces equivalent to per-body spatial forces in ground,
    /// one inward pass. Requires Configured.
    pub fn calc_internal_gradient_from_spatial(&self, state: &State, body_forces: &[SpatialVec]) -> Result<DVec> {
        self.check_body_forces(body_forces)?;
        let layout = self.layout(state)?;
        let pos = state.cache_entry::<PositionCache>()?;
        let local = body_forces_in_body_frames(pos, body_forces);
        Ok(arbor_rigid::calc_internal_gradient(&self.tree, layout, pos, &local))
    }

    /// The same map applied once the loads are in place. Requires Dynamics.
    pub fn calc_tree_equivalent_joint_forces(&self, state: &State, body_forces: &[SpatialVec]) -> Result<DVec> {
        state.require_stage(Stage::Dynamics, "calc_tree_equivalent_joint_forces")?;
        self.calc_internal_gradient_from_spatial(state, body_forces)
    }

    /// Forward dynamics for the given loads without touching the state's own
    /// applied forces. Requires Moving.
    pub fn calc_tree_udot(&self, state: &State, joint_forces: &DVec, body_forces: &[SpatialVec]) -> Result<DVec> {
        self.check_body_forces(body_forces)?;
        let layout = self.layout(state)?;
        self.check_joint_forces(layout, joint_forces)?;
        let vel = state.cache_entry::<VelocityCache>()?;
        let pos = state.cache_entry::<PositionCache>()?;
        let local = body_forces_in_body_frames(pos, body_forces);
        Ok(forward_dynamics(&self.tree, layout, pos, vel, joint_forces, &local)?.udot)
    }

    /// M·udot + c(q,u) − τ − Jᵀ·F for the given accelerations and loads.
    /// Requires Moving.
    pub fn calc_tree_residual_forces(
        &self,
        state: &State,
        udot: &DVec,
        joint_forces: &DVec,
        body_forces: &[SpatialVec],
    ) -> Result<DVec> {
        self.check_body_forces(body_forces)?;
        let layout = self.layout(state)?;
        self.check_joint_forces(layout, joint_forces)?;
        if udot.len() != layout.u_len() {
            return Err(Error::dimension("udot", layout.u_len(), udot.len()));
        }
        let vel = state.cache_entry::<VelocityCache>()?;
        let pos = state.cache_entry::<PositionCache>()?;
        let local = body_forces_in_body_frames(pos, body_forces);
        Ok(arbor_rigid::calc_residual_forces(&self.tree, layout, pos, vel, udot, joint_forces, &local))
    }

    /// Joint-space mass matrix; requires Configured.
    pub fn calc_mass_matrix(&self, state: &State) -> Result<DMat> {
        let layout = self.layout(state)?;
        let pos = state.cache_entry::<PositionCache>()?;
        Ok(arbor_rigid::calc_mass_matrix(&self.tree, layout, pos))
    }

    /// M⁻¹·f through the articulated-body recursion; requires Configured.
    pub fn calc_m_inverse_f(&self, state: &State, f: &DVec) -> Result<DVec> {
        let layout = self.layout(state)?;
        self.check_joint_forces(layout, f)?;
        let pos = state.cache_entry::<PositionCache>()?;
        arbor_rigid::calc_m_inverse_f(&self.tree, layout, pos, f)
    }

    /// Requires Moving.
    pub fn calc_kinetic_energy(&self, state: &State) -> Result<f64> {
        let vel = state.cache_entry::<VelocityCache>()?;
        Ok(arbor_rigid::calc_kinetic_energy(&self.tree, vel))
    }

    /// Requires Configured.
    pub fn calc_potential_energy(&self, state: &State, gravity: &Vec3) -> Result<f64> {
        let pos = state.cache_entry::<PositionCache>()?;
        Ok(arbor_rigid::calc_potential_energy(&self.tree, pos, gravity))
    }

    // ── Constraints ──

    /// Stacked position residuals; requires Configured.
    pub fn constraint_residuals(&self, state: &State) -> Result<DVec> {
        let pos = state.cache_entry::<PositionCache>()?;
        Ok(arbor_rigid::constraint_residuals(&self.tree, pos))
    }

    /// Stacked velocity residuals; requires Moving.
    pub fn constraint_velocity_errors(&self, state: &State) -> Result<DVec> {
        let vel = state.cache_entry::<VelocityCache>()?;
        let pos = state.cache_entry::<PositionCache>()?;
        Ok(arbor_rigid::constraint_velocity_errors(&self.tree, pos, vel))
    }

    /// Constraint Jacobian G; requires Configured.
    pub fn constraint_jacobian(&self, state: &State) -> Result<DMat> {
        let layout = self.layout(state)?;
        let pos = state.cache_entry::<PositionCache>()?;
        Ok(constraint_jacobian(&self.tree, layout, pos))
    }

    /// Newton-project Q onto the constraint manifold.
    ///
    /// Quaternions are renormalized before and after every correction.
    /// Returns the number of corrections applied; zero leaves Q untouched
    /// unless a quaternion had drifted. Requires Modeled.
    pub fn enforce_configuration_constraints(&self, state: &mut State, settings: &ProjectionSettings) -> Result<usize> {
        let layout = self.layout(state)?.clone();
        self.normalize_rotations(state, &layout);
        if self.tree.constraints().is_empty() {
            return Ok(0);
        }

        let mut iteration = 0;
        loop {
            let pos = calc_positions(&self.tree, &layout, state.q());
            let err = arbor_rigid::constraint_residuals(&self.tree, &pos);
            let residual = max_constraint_error(&self.tree, &err);
            debug!(iteration, residual, "configuration projection");
            if residual <= settings.tolerance {
                return Ok(iteration);
            }
            if iteration >= settings.max_iterations {
                warn!(iterations = iteration, residual, "configuration projection did not converge");
                return Err(Error::ConstraintNotSatisfied {
                    iterations: iteration,
                    residual,
                });
            }
            let g = constraint_jacobian(&self.tree, &layout, &pos);
            let du = mass_weighted_correction(&self.tree, &layout, &pos, &g, &err)?;
            let dq = coordinate_correction(&self.tree, &layout, state.q(), &du);
            *state.upd_q() += dq;
            self.normalize_rotations(state, &layout);
            iteration += 1;
        }
    }

    /// Remove the constraint-violating part of U in the mass metric, so that
    /// G·U = 0. Assumes the configuration constraints hold. Requires Configured.
    pub fn enforce_motion_constraints(&self, state: &mut State, settings: &ProjectionSettings) -> Result<()> {
        if self.tree.constraints().is_empty() {
            return Ok(());
        }
        let du = {
            let layout = self.layout(state)?;
            let pos = state.cache_entry::<PositionCache>()?;
            let g = constraint_jacobian(&self.tree, layout, pos);
            let verr = &g * state.u();
            let residual = max_constraint_error(&self.tree, &verr);
            debug!(residual, "motion projection");
            if residual <= settings.tolerance {
                return Ok(());
            }
            mass_weighted_correction(&self.tree, layout, pos, &g, &verr)?
        };
        *state.upd_u() += du;
        Ok(())
    }

    // ── Helpers ──

    fn body_index(&self, body: usize) -> Result<usize> {
        if body >= self.tree.nbodies() {
            return Err(Error::topology(format!(
                "no body {body} ({} bodies)",
                self.tree.nbodies()
            )));
        }
        Ok(body)
    }

    fn mobilized(&self, body: usize) -> Result<usize> {
        if self.body_index(body)? == GROUND {
            return Err(Error::topology("ground has no joint"));
        }
        Ok(body)
    }

    fn check_body_forces(&self, body_forces: &[SpatialVec]) -> Result<()> {
        if body_forces.len() != self.tree.nbodies() {
            return Err(Error::dimension("body forces", self.tree.nbodies(), body_forces.len()));
        }
        Ok(())
    }

    fn check_joint_forces(&self, layout: &TreeLayout, joint_forces: &DVec) -> Result<()> {
        if joint_forces.len() != layout.u_len() {
            return Err(Error::dimension("joint forces", layout.u_len(), joint_forces.len()));
        }
        Ok(())
    }

    fn normalize_rotations(&self, state: &mut State, layout: &TreeLayout) {
        let mut q = state.q().clone();
        let mut changed = false;
        for (i, _, joint) in self.tree.mobilized() {
            changed |= joint.normalize_q(&mut q.as_mut_slice()[layout.q_range(i)], layout.rep);
        }
        if changed {
            state.upd_q().copy_from(&q);
        }
    }

    // ── Stage hooks ──

    fn realize_built(&self, state: &mut State) -> Result<()> {
        self.tree.lock();
        let options = state.allocate_discrete_variable_invalidating(
            Stage::Built,
            Stage::Modeled,
            ModelingOptions::default(),
        )?;
        state.set_cache_entry(BuiltHandles { options });
        Ok(())
    }

    fn realize_modeled(&self, state: &mut State) -> Result<()> {
        let options = *self.modeling_options(state)?;
        let layout = TreeLayout::new(&self.tree, options.rotation, state.nq(), state.nu());
        state.allocate_q(&layout.default_q(&self.tree))?;
        state.allocate_u(&vec![0.0; layout.total_nu])?;
        let forces = state.allocate_discrete_variable_invalidating(
            Stage::Modeled,
            Stage::Dynamics,
            AppliedForces::zero(self.tree.nbodies(), layout.u_len()),
        )?;
        debug!(
            nq = layout.total_nq,
            nu = layout.total_nu,
            rotation = ?options.rotation,
            "modeled multibody tree"
        );
        state.set_cache_entry(layout);
        state.set_cache_entry(ModelHandles { forces });
        Ok(())
    }

    fn realize_configured(&self, state: &mut State) -> Result<()> {
        let pos = {
            let layout = state.cache_entry::<TreeLayout>()?;
            calc_positions(&self.tree, layout, state.q())
        };
        state.set_cache_entry(pos);
        Ok(())
    }

    fn realize_moving(&self, state: &mut State) -> Result<()> {
        let vel = {
            let layout = state.cache_entry::<TreeLayout>()?;
            let pos = state.cache_entry::<PositionCache>()?;
            calc_velocities(&self.tree, layout, pos, state.q(), state.u())
        };
        state.set_cache_entry(vel);
        Ok(())
    }

    fn realize_dynamics(&self, state: &mut State) -> Result<()> {
        let dynamics = {
            let forces = self.applied_forces(state)?;
            let layout = state.cache_entry::<TreeLayout>()?;
            let pos = state.cache_entry::<PositionCache>()?;
            let vel = state.cache_entry::<VelocityCache>()?;
            let local = body_forces_in_body_frames(pos, &forces.body);
            articulate(&self.tree, layout, pos, vel, &forces.joint, &local)?
        };
        state.set_cache_entry(dynamics);
        Ok(())
    }

    fn realize_reacting(&self, state: &mut State) -> Result<()> {
        let reaction = {
            let layout = state.cache_entry::<TreeLayout>()?;
            let pos = state.cache_entry::<PositionCache>()?;
            let vel = state.cache_entry::<VelocityCache>()?;
            let dynamics = state.cache_entry::<DynamicsCache>()?;
            accelerate(&self.tree, layout, pos, vel, dynamics)
        };
        state.set_cache_entry(reaction);
        Ok(())
    }
}

impl Realizer for MultibodySystem {
    fn realize(&self, state: &mut State, stage: Stage) -> Result<()> {
        match stage {
            Stage::Empty => Ok(()),
            Stage::Built => self.realize_built(state),
            Stage::Modeled => self.realize_modeled(state),
            Stage::Configured => self.realize_configured(state),
            Stage::Moving => self.realize_moving(state),
            Stage::Dynamics => self.realize_dynamics(state),
            Stage::Reacting => self.realize_reacting(state),
        }
    }
}
