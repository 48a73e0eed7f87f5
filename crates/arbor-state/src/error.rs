//! Error types shared by every arbor crate.

use crate::Stage;
use thiserror::Error;

/// Errors raised by the multibody engine.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    /// A quantity was read, written or allocated at the wrong stage.
    #[error("stage violation: {what} requires stage {required}, state is at {current}")]
    StageViolation {
        /// What was attempted.
        what: String,
        /// Stage the operation needs.
        required: Stage,
        /// Stage the state was at.
        current: Stage,
    },

    /// Structural change after the topology was locked, or an invalid structure.
    #[error("topology error: {0}")]
    Topology(String),

    /// A discrete variable was accessed as a different type than it holds.
    #[error("type mismatch: variable holds {stored}, accessed as {requested}")]
    TypeMismatch {
        /// Type stored at allocation.
        stored: &'static str,
        /// Type requested by the caller.
        requested: &'static str,
    },

    /// A vector's length does not match body, joint or constraint counts.
    #[error("dimension mismatch: {what} has length {found}, expected {expected}")]
    DimensionMismatch {
        /// Which argument.
        what: String,
        /// Expected length.
        expected: usize,
        /// Actual length.
        found: usize,
    },

    /// Constraint projection did not converge.
    #[error("constraints not satisfied after {iterations} iterations (residual {residual:.3e})")]
    ConstraintNotSatisfied {
        /// Iterations performed.
        iterations: usize,
        /// Largest remaining residual norm.
        residual: f64,
    },

    /// The constraint Jacobian is rank deficient.
    #[error("singular constraint jacobian: {0}")]
    SingularJacobian(String),

    /// A joint's articulated inertia cannot be inverted (massless subtree).
    #[error("singular articulated inertia at body {body}")]
    SingularMassMatrix {
        /// Body whose joint block is singular.
        body: usize,
    },
}

impl Error {
    /// Create a stage violation error.
    #[must_use]
    pub fn stage(what: impl Into<String>, required: Stage, current: Stage) -> Self {
        Self::StageViolation {
            what: what.into(),
            required,
            current,
        }
    }

    /// Create a topology error.
    #[must_use]
    pub fn topology(reason: impl Into<String>) -> Self {
        Self::Topology(reason.into())
    }

    /// Create a dimension mismatch error.
    #[must_use]
    pub fn dimension(what: impl Into<String>, expected: usize, found: usize) -> Self {
        Self::DimensionMismatch {
            what: what.into(),
            expected,
            found,
        }
    }

    /// Check if this is a stage violation.
    #[must_use]
    pub fn is_stage_violation(&self) -> bool {
        matches!(self, Self::StageViolation { .. })
    }

    /// Check if this is a topology error.
    #[must_use]
    pub fn is_topology(&self) -> bool {
        matches!(self, Self::Topology(_))
    }

    /// Check if constraint projection failed for either reason.
    #[must_use]
    pub fn is_constraint_failure(&self) -> bool {
        matches!(
            self,
            Self::ConstraintNotSatisfied { .. } | Self::SingularJacobian(_)
        )
    }
}

/// Result alias used throughout arbor.
pub type Result<T> = std::result::Result<T, Error>;
