//! Computation stages.

use std::fmt;

/// Ordered validity levels of a [`crate::State`].
///
/// Realizing a stage makes every quantity tagged with that stage (and all
/// lower stages) readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Stage {
    /// Nothing has been realized.
    #[default]
    Empty,
    /// Topology is locked.
    Built,
    /// Modeling choices are fixed and Q/U are allocated.
    Modeled,
    /// Body poses are known.
    Configured,
    /// Body velocities are known.
    Moving,
    /// Forces and articulated inertias are known.
    Dynamics,
    /// Accelerations are known.
    Reacting,
}

impl Stage {
    /// Number of stages.
    pub const COUNT: usize = 7;

    /// All stages in ascending order.
    pub const ALL: [Stage; Self::COUNT] = [
        Stage::Empty,
        Stage::Built,
        Stage::Modeled,
        Stage::Configured,
        Stage::Moving,
        Stage::Dynamics,
        Stage::Reacting,
    ];

    /// Highest stage.
    pub const HIGHEST: Stage = Stage::Reacting;

    /// Position in [`Stage::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }

    /// The stage after this one, if any.
    pub fn next(self) -> Option<Stage> {
        Self::ALL.get(self.index() + 1).copied()
    }

    /// The stage before this one; `Empty` stays `Empty`.
    pub fn prev(self) -> Stage {
        match self.index() {
            0 => Stage::Empty,
            i => Self::ALL[i - 1],
        }
    }

    /// Lower-case name.
    pub fn name(self) -> &'static str {
        match self {
            Stage::Empty => "empty",
            Stage::Built => "built",
            Stage::Modeled => "modeled",
            Stage::Configured => "configured",
            Stage::Moving => "moving",
            Stage::Dynamics => "dynamics",
            Stage::Reacting => "reacting",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering() {
        for pair in Stage::ALL.windows(2) {
            assert!(pair[0] < pair[1]);
            assert_eq!(pair[0].next(), Some(pair[1]));
            assert_eq!(pair[1].prev(), pair[0]);
        }
        assert_eq!(Stage::Reacting.next(), None);
        assert_eq!(Stage::Empty.prev(), Stage::Empty);
    }

    #[test]
    fn test_display() {
        assert_eq!(Stage::Configured.to_string(), "configured");
    }
}
