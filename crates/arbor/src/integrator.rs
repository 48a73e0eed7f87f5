//! Fixed-step time integration with constraint projection.

use arbor_math::{DVec, Vec3};
use arbor_rigid::ProjectionSettings;
use arbor_state::{Result, Stage, State};
use tracing::info;

use crate::force::{ForceField, UniformGravity};
use crate::MultibodySystem;

/// Advances a state through time.
pub trait Integrator {
    /// Fixed step size.
    fn step_size(&self) -> f64;

    /// Realize the state through Reacting for the current Q and U and
    /// return `(qdot, udot)`.
    fn evaluate(&self, system: &MultibodySystem, state: &mut State) -> Result<(DVec, DVec)>;

    /// Advance one step.
    fn step(&self, system: &MultibodySystem, state: &mut State) -> Result<()>;

    /// Advance `n` steps.
    fn simulate(&self, system: &MultibodySystem, state: &mut State, n: usize) -> Result<()> {
        for _ in 0..n {
            self.step(system, state)?;
        }
        Ok(())
    }
}

/// Explicit Euler: Q ← Q + h·qdot, U ← U + h·udot.
pub struct ExplicitEuler {
    /// Fixed step h.
    pub step_size: f64,
    /// Settings for both constraint projections on each step.
    pub projection: ProjectionSettings,
    forces: Vec<Box<dyn ForceField>>,
}

impl ExplicitEuler {
    /// Step size `step_size`, default projection, no forces.
    pub fn new(step_size: f64) -> Self {
        Self {
            step_size,
            projection: ProjectionSettings::default(),
            forces: Vec::new(),
        }
    }

    /// Apply a uniform gravitational field on every step.
    pub fn with_gravity(self, gravity: Vec3) -> Self {
        self.with_force(UniformGravity::new(gravity))
    }

    /// Apply `force` on every step, after the ones already added.
    pub fn with_force(mut self, force: impl ForceField + 'static) -> Self {
        self.forces.push(Box::new(force));
        self
    }

    /// Replace the projection settings.
    pub fn with_projection(mut self, projection: ProjectionSettings) -> Self {
        self.projection = projection;
        self
    }

    /// Step until the state's time passes `end_time`.
    ///
    /// `report` sees the state realized through Reacting every `report_every`
    /// steps (0 disables it), before the step is taken. Returns the number
    /// of steps.
    pub fn run<F>(
        &self,
        system: &MultibodySystem,
        state: &mut State,
        end_time: f64,
        report_every: usize,
        mut report: F,
    ) -> Result<usize>
    where
        F: FnMut(usize, &MultibodySystem, &State) -> Result<()>,
    {
        let h = self.step_size;
        let start = state.time();
        info!(start, end_time, step_size = h, "integration started");

        let mut step = 0;
        loop {
            let t = start + step as f64 * h;
            if t > end_time {
                break;
            }
            state.set_time(t);
            let (qdot, udot) = self.evaluate(system, state)?;
            if report_every > 0 && step % report_every == 0 {
                report(step, system, state)?;
            }
            advance(state, h, &qdot, &udot);
            step += 1;
        }

        info!(steps = step, time = state.time(), "integration finished");
        Ok(step)
    }
}

impl Integrator for ExplicitEuler {
    fn step_size(&self) -> f64 {
        self.step_size
    }

    fn evaluate(&self, system: &MultibodySystem, state: &mut State) -> Result<(DVec, DVec)> {
        system.realize(state, Stage::Modeled)?;
        system.enforce_configuration_constraints(state, &self.projection)?;
        system.realize(state, Stage::Configured)?;

        system.enforce_motion_constraints(state, &self.projection)?;
        system.realize(state, Stage::Moving)?;
        let qdot = system.q_dot(state)?.clone();

        system.clear_applied_forces(state)?;
        for force in &self.forces {
            force.apply(system, state)?;
        }

        system.realize(state, Stage::Reacting)?;
        let udot = system.u_dot(state)?.clone();
        Ok((qdot, udot))
    }

    fn step(&self, system: &MultibodySystem, state: &mut State) -> Result<()> {
        let (qdot, udot) = self.evaluate(system, state)?;
        advance(state, self.step_size, &qdot, &udot);
        Ok(())
    }
}

fn advance(state: &mut State, h: f64, qdot: &DVec, udot: &DVec) {
    state.upd_q().axpy(h, qdot, 1.0);
    state.upd_u().axpy(h, udot, 1.0);
    state.set_time(state.time() + h);
}
