//! Simulation settings loaded from JSON.

use std::path::Path;

use arbor_math::{GRAVITY, Vec3};
use arbor_model::RotationRepresentation;
use arbor_rigid::ProjectionSettings;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ExplicitEuler;

/// Failure to load or validate a [`SimulationConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Malformed JSON or a field of the wrong type.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// The config file could not be read.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A value outside its allowed range.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Step size, duration, environment and solver settings for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Fixed integrator step h.
    pub step_size: f64,
    /// Time at which the run stops.
    pub end_time: f64,
    /// Gravitational acceleration in ground.
    pub gravity: [f64; 3],
    /// Rotation coordinates for Ball and Free joints.
    pub rotation: RotationRepresentation,
    /// Constraint projection tolerance and iteration cap.
    pub projection: ProjectionSettings,
    /// Steps between progress reports; 0 disables them.
    pub report_interval: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            step_size: 1e-3,
            end_time: 1.0,
            gravity: [0.0, -GRAVITY, 0.0],
            rotation: RotationRepresentation::Quaternion,
            projection: ProjectionSettings::default(),
            report_interval: 0,
        }
    }
}

impl SimulationConfig {
    /// The classic constrained pendulum run: 10 s at h = 1e-4, g = 9.8 along
    /// −y, rotations as angles, a report every 100 steps.
    pub fn pendulum() -> Self {
        Self {
            step_size: 1e-4,
            end_time: 10.0,
            gravity: [0.0, -9.8, 0.0],
            rotation: RotationRepresentation::EulerAngles,
            projection: ProjectionSettings::default(),
            report_interval: 100,
        }
    }

    /// No gravity, quaternions, default step.
    pub fn zero_gravity() -> Self {
        Self {
            gravity: [0.0; 3],
            ..Self::default()
        }
    }

    /// Parse and validate; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON config file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Pretty-printed JSON.
    pub fn to_json_string(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check that every value is finite and in range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.step_size.is_finite() && self.step_size > 0.0) {
            return Err(ConfigError::InvalidParameter(format!(
                "step_size must be positive, got {}",
                self.step_size
            )));
        }
        if !(self.end_time.is_finite() && self.end_time >= 0.0) {
            return Err(ConfigError::InvalidParameter(format!(
                "end_time must be non-negative, got {}",
                self.end_time
            )));
        }
        if !self.gravity.iter().all(|g| g.is_finite()) {
            return Err(ConfigError::InvalidParameter(format!("gravity must be finite, got {:?}", self.gravity)));
        }
        if !(self.projection.tolerance.is_finite() && self.projection.tolerance > 0.0) {
            return Err(ConfigError::InvalidParameter(format!(
                "projection tolerance must be positive, got {}",
                self.projection.tolerance
            )));
        }
        if self.projection.max_iterations == 0 {
            return Err(ConfigError::InvalidParameter(
                "projection needs at least one iteration".into(),
            ));
        }
        Ok(())
    }

    /// Replace the step size.
    pub fn with_step_size(mut self, step_size: f64) -> Self {
        self.step_size = step_size;
        self
    }

    /// Replace the end time.
    pub fn with_end_time(mut self, end_time: f64) -> Self {
        self.end_time = end_time;
        self
    }

    /// Replace the gravitational acceleration.
    pub fn with_gravity(mut self, gravity: Vec3) -> Self {
        self.gravity = [gravity.x, gravity.y, gravity.z];
        self
    }

    /// Replace the rotation representation.
    pub fn with_rotation(mut self, rotation: RotationRepresentation) -> Self {
        self.rotation = rotation;
        self
    }

    /// Replace the projection settings.
    pub fn with_projection(mut self, projection: ProjectionSettings) -> Self {
        self.projection = projection;
        self
    }

    /// Report every `steps` steps.
    pub fn with_report_interval(mut self, steps: usize) -> Self {
        self.report_interval = steps;
        self
    }

    /// [`SimulationConfig::gravity`] as a vector.
    pub fn gravity_vector(&self) -> Vec3 {
        Vec3::from(self.gravity)
    }

    /// Explicit Euler integrator with this step, projection and gravity.
    pub fn integrator(&self) -> ExplicitEuler {
        ExplicitEuler::new(self.step_size)
            .with_projection(self.projection)
            .with_gravity(self.gravity_vector())
    }
}
