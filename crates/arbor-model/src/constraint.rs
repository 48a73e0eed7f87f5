//! Algebraic constraints between body-fixed stations and frames.

use arbor_math::{Transform, Vec3};

/// An equality constraint between two bodies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Constraint {
    /// Station A on body A coincides with station B on body B (3 equations).
    CoincidentStations {
        /// First body.
        body_a: usize,
        /// Station on the first body, in its frame.
        station_a: Vec3,
        /// Second body.
        body_b: usize,
        /// Station on the second body, in its frame.
        station_b: Vec3,
    },
    /// Two stations stay a fixed distance apart (1 equation).
    ConstantDistance {
        /// First body.
        body_a: usize,
        /// Station on the first body, in its frame.
        station_a: Vec3,
        /// Second body.
        body_b: usize,
        /// Station on the second body, in its frame.
        station_b: Vec3,
        /// Required separation, positive.
        distance: f64,
    },
    /// Frame A on body A coincides with frame B on body B (6 equations).
    Weld {
        /// First body.
        body_a: usize,
        /// Frame on the first body, X_A F.
        frame_a: Transform,
        /// Second body.
        body_b: usize,
        /// Frame on the second body, X_B F.
        frame_b: Transform,
    },
}

impl Constraint {
    /// Number of scalar equations.
    pub fn n_equations(&self) -> usize {
        match self {
            Constraint::CoincidentStations { .. } => 3,
            Constraint::ConstantDistance { .. } => 1,
            Constraint::Weld { .. } => 6,
        }
    }

    /// The two constrained bodies.
    pub fn bodies(&self) -> (usize, usize) {
        match *self {
            Constraint::CoincidentStations { body_a, body_b, .. }
            | Constraint::ConstantDistance { body_a, body_b, .. }
            | Constraint::Weld { body_a, body_b, .. } => (body_a, body_b),
        }
    }

    /// Short name for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Constraint::CoincidentStations { .. } => "coincident stations",
            Constraint::ConstantDistance { .. } => "constant distance",
            Constraint::Weld { .. } => "weld",
        }
    }
}
