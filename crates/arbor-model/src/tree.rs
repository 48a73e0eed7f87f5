//! Body arena, constraint list and the topology lock.

use std::sync::OnceLock;

use arbor_math::{MassProperties, Transform, Vec3};
use arbor_state::{Error, Result};
use tracing::debug;

use crate::{Body, Constraint, GROUND, Joint, JointKind};

const FRAME_TOLERANCE: f64 = 1e-9;

/// Structural summary fixed when the tree is locked.
#[derive(Debug, Clone, PartialEq)]
pub struct Topology {
    /// Children of every body, in index order.
    pub children: Vec<Vec<usize>>,
    /// Total number of generalized speeds.
    pub nu: usize,
    /// Total number of constraint equations.
    pub n_constraint_equations: usize,
}

/// Bodies connected by joints plus the constraints between them.
#[derive(Debug, Clone)]
pub struct MultibodyTree {
    bodies: Vec<Body>,
    constraints: Vec<Constraint>,
    topology: OnceLock<Topology>,
}

impl Default for MultibodyTree {
    fn default() -> Self {
        Self::new()
    }
}

impl MultibodyTree {
    /// A tree containing only ground.
    pub fn new() -> Self {
        Self {
            bodies: vec![Body::ground()],
            constraints: Vec::new(),
            topology: OnceLock::new(),
        }
    }

    // ── Construction ──

    /// Append a body attached to `parent` and return its index.
    ///
    /// `frame_on_child` is the joint frame M in the new body, `frame_on_parent`
    /// the joint frame F in the parent.
    pub fn add_body(
        &mut self,
        mass: MassProperties,
        frame_on_child: Transform,
        parent: usize,
        frame_on_parent: Transform,
        kind: JointKind,
    ) -> Result<usize> {
        self.check_unlocked("add body")?;
        if parent >= self.bodies.len() {
            return Err(Error::topology(format!(
                "parent body {parent} does not exist ({} bodies)",
                self.bodies.len()
            )));
        }
        if !mass.is_valid() {
            return Err(Error::topology(format!("invalid mass properties {mass:?}")));
        }
        check_frame(&frame_on_child, "joint frame on child")?;
        check_frame(&frame_on_parent, "joint frame on parent")?;
        self.bodies.push(Body {
            mass,
            parent,
            joint: Some(Joint::new(kind, frame_on_parent, frame_on_child)),
        });
        Ok(self.bodies.len() - 1)
    }

    /// Require two body-fixed stations to coincide.
    pub fn add_coincident_stations_constraint(
        &mut self,
        body_a: usize,
        station_a: Vec3,
        body_b: usize,
        station_b: Vec3,
    ) -> Result<usize> {
        self.add_constraint(Constraint::CoincidentStations {
            body_a,
            station_a,
            body_b,
            station_b,
        })
    }

    /// Require two body-fixed stations to stay `distance` apart.
    pub fn add_constant_distance_constraint(
        &mut self,
        body_a: usize,
        station_a: Vec3,
        body_b: usize,
        station_b: Vec3,
        distance: f64,
    ) -> Result<usize> {
        if !(distance.is_finite() && distance > 0.0) {
            return Err(Error::topology(format!("constraint distance must be positive, got {distance}")));
        }
        self.add_constraint(Constraint::ConstantDistance {
            body_a,
            station_a,
            body_b,
            station_b,
            distance,
        })
    }

    /// Require two body-fixed frames to coincide.
    pub fn add_weld_constraint(
        &mut self,
        body_a: usize,
        frame_a: Transform,
        body_b: usize,
        frame_b: Transform,
    ) -> Result<usize> {
        check_frame(&frame_a, "weld frame A")?;
        check_frame(&frame_b, "weld frame B")?;
        self.add_constraint(Constraint::Weld {
            body_a,
            frame_a,
            body_b,
            frame_b,
        })
    }

    fn add_constraint(&mut self, constraint: Constraint) -> Result<usize> {
        self.check_unlocked("add constraint")?;
        let (a, b) = constraint.bodies();
        let n = self.bodies.len();
        if a >= n || b >= n {
            return Err(Error::topology(format!(
                "{} constraint between bodies {a} and {b}, only {n} bodies exist",
                constraint.name()
            )));
        }
        if a == b {
            return Err(Error::topology(format!(
                "{} constraint connects body {a} to itself",
                constraint.name()
            )));
        }
        let m = constraint.n_equations();
        let mobility = self.mobility_between(a, b)?;
        if m > mobility {
            return Err(Error::topology(format!(
                "{} constraint imposes {m} equations on bodies {a} and {b} with only {mobility} relative dofs",
                constraint.name()
            )));
        }
        self.constraints.push(constraint);
        Ok(self.constraints.len() - 1)
    }

    fn check_unlocked(&self, what: &str) -> Result<()> {
        if self.is_locked() {
            return Err(Error::topology(format!("cannot {what}: topology is locked")));
        }
        Ok(())
    }

    // ── Lock ──

    /// Freeze the structure; later calls return the same summary.
    pub fn lock(&self) -> &Topology {
        self.topology.get_or_init(|| {
            let mut children = vec![Vec::new(); self.bodies.len()];
            for (i, body) in self.bodies.iter().enumerate().skip(1) {
                children[body.parent].push(i);
            }
            let topology = Topology {
                children,
                nu: self.bodies.iter().map(Body::nu).sum(),
                n_constraint_equations: self.constraints.iter().map(Constraint::n_equations).sum(),
            };
            debug!(
                bodies = self.bodies.len(),
                nu = topology.nu,
                constraints = self.constraints.len(),
                "topology locked"
            );
            topology
        })
    }

    /// Whether [`MultibodyTree::lock`] has been called.
    pub fn is_locked(&self) -> bool {
        self.topology.get().is_some()
    }

    /// Locked structure, if any.
    pub fn topology(&self) -> Option<&Topology> {
        self.topology.get()
    }

    // ── Queries ──

    /// Number of bodies including ground.
    pub fn nbodies(&self) -> usize {
        self.bodies.len()
    }

    /// All bodies, ground first.
    pub fn bodies(&self) -> &[Body] {
        &self.bodies
    }

    /// One body.
    pub fn body(&self, index: usize) -> Option<&Body> {
        self.bodies.get(index)
    }

    /// Every body except ground together with its joint, in index order.
    pub fn mobilized(&self) -> impl DoubleEndedIterator<Item = (usize, &Body, &Joint)> + '_ {
        self.bodies
            .iter()
            .enumerate()
            .filter_map(|(i, b)| b.joint.as_ref().map(|j| (i, b, j)))
    }

    /// All constraints in insertion order.
    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    /// Total number of generalized speeds.
    pub fn nu(&self) -> usize {
        self.bodies.iter().map(Body::nu).sum()
    }

    /// Total number of constraint equations.
    pub fn n_constraint_equations(&self) -> usize {
        self.constraints.iter().map(Constraint::n_equations).sum()
    }

    /// Whether `ancestor` lies on the path from `body` to ground (inclusive).
    pub fn is_ancestor(&self, ancestor: usize, body: usize) -> Result<bool> {
        self.check_body(ancestor, "ancestry query")?;
        let mut b = self.check_body(body, "ancestry query")?;
        loop {
            if b == ancestor {
                return Ok(true);
            }
            if b == GROUND {
                return Ok(false);
            }
            b = self.bodies[b].parent;
        }
    }

    /// Deepest body that is an ancestor of both `a` and `b`.
    pub fn common_ancestor(&self, a: usize, b: usize) -> Result<usize> {
        let mut a = self.check_body(a, "common ancestor")?;
        let mut b = self.check_body(b, "common ancestor")?;
        // Parents always have smaller indices.
        while a != b {
            if a > b {
                a = self.bodies[a].parent;
            } else {
                b = self.bodies[b].parent;
            }
        }
        Ok(a)
    }

    /// Generalized speeds on the paths from `a` and `b` to their common ancestor.
    pub fn mobility_between(&self, a: usize, b: usize) -> Result<usize> {
        let mut a = self.check_body(a, "mobility query")?;
        let mut b = self.check_body(b, "mobility query")?;
        let mut nu = 0;
        while a != b {
            if a > b {
                nu += self.bodies[a].nu();
                a = self.bodies[a].parent;
            } else {
                nu += self.bodies[b].nu();
                b = self.bodies[b].parent;
            }
        }
        Ok(nu)
    }

    fn check_body(&self, body: usize, what: &str) -> Result<usize> {
        if body >= self.bodies.len() {
            return Err(Error::topology(format!(
                "{what}: body {body} does not exist ({} bodies)",
                self.bodies.len()
            )));
        }
        Ok(body)
    }
}

fn check_frame(frame: &Transform, what: &str) -> Result<()> {
    if !frame.is_proper(FRAME_TOLERANCE) {
        return Err(Error::topology(format!("{what} is not a proper rigid transform")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rod() -> MassProperties {
        MassProperties::point_mass(3.0, Vec3::new(2.5, 0.0, 0.0))
    }

    fn chain() -> MultibodyTree {
        let mut tree = MultibodyTree::new();
        let hinge = Transform::from_translation(Vec3::new(-2.5, 0.0, 0.0));
        let tip = Transform::from_translation(Vec3::new(2.5, 0.0, 0.0));
        let b1 = tree.add_body(rod(), hinge, GROUND, Transform::identity(), JointKind::Pin).unwrap();
        let b2 = tree.add_body(rod(), hinge, b1, tip, JointKind::Ball).unwrap();
        tree.add_body(rod(), hinge, b1, tip, JointKind::Sliding).unwrap();
        tree.add_body(rod(), hinge, b2, tip, JointKind::Free).unwrap();
        tree
    }

    #[test]
    fn test_add_body_indices() {
        let tree = chain();
        assert_eq!(tree.nbodies(), 5);
        assert_eq!(tree.nu(), 1 + 3 + 1 + 6);
        assert_eq!(tree.mobilized().count(), 4);
        assert_eq!(tree.body(4).map(|b| b.parent), Some(2));
    }

    #[test]
    fn test_missing_parent() {
        let mut tree = MultibodyTree::new();
        let err = tree
            .add_body(rod(), Transform::identity(), 3, Transform::identity(), JointKind::Pin)
            .unwrap_err();
        assert!(err.is_topology());
    }

    #[test]
    fn test_bad_mass_and_frames() {
        let mut tree = MultibodyTree::new();
        let neg = MassProperties::point_mass(-1.0, Vec3::zeros());
        assert!(tree
            .add_body(neg, Transform::identity(), GROUND, Transform::identity(), JointKind::Pin)
            .is_err());
        let scaled = Transform::from_rotation(arbor_math::Mat3::identity() * 2.0);
        assert!(tree
            .add_body(rod(), scaled, GROUND, Transform::identity(), JointKind::Pin)
            .is_err());
        assert_eq!(tree.nbodies(), 1);
    }

    #[test]
    fn test_ancestry() {
        let tree = chain();
        assert!(tree.is_ancestor(1, 4).unwrap());
        assert!(tree.is_ancestor(GROUND, 3).unwrap());
        assert!(!tree.is_ancestor(3, 4).unwrap());
        assert_eq!(tree.common_ancestor(3, 4).unwrap(), 1);
        assert_eq!(tree.mobility_between(3, 4).unwrap(), 1 + 3 + 6);
        assert_eq!(tree.mobility_between(GROUND, 1).unwrap(), 1);
    }

    #[test]
    fn test_ancestry_of_missing_body() {
        let tree = chain();
        let n = tree.nbodies();
        assert!(tree.is_ancestor(n, 1).unwrap_err().is_topology());
        assert!(tree.is_ancestor(1, n).unwrap_err().is_topology());
        assert!(tree.common_ancestor(2, n + 3).unwrap_err().is_topology());
        assert!(tree.mobility_between(n, GROUND).unwrap_err().is_topology());
    }

    #[test]
    fn test_constraint_validation() {
        let mut tree = chain();
        // Pin has one dof; three equations cannot be satisfied generically.
        let err = tree
            .add_coincident_stations_constraint(GROUND, Vec3::zeros(), 1, Vec3::zeros())
            .unwrap_err();
        assert!(err.is_topology());
        assert!(tree.add_coincident_stations_constraint(2, Vec3::zeros(), 2, Vec3::zeros()).is_err());
        assert!(tree.add_coincident_stations_constraint(GROUND, Vec3::zeros(), 9, Vec3::zeros()).is_err());
        assert!(tree.add_constant_distance_constraint(GROUND, Vec3::zeros(), 4, Vec3::zeros(), 0.0).is_err());

        assert_eq!(tree.add_constant_distance_constraint(GROUND, Vec3::zeros(), 1, Vec3::zeros(), 1.0).unwrap(), 0);
        assert_eq!(tree.add_weld_constraint(GROUND, Transform::identity(), 4, Transform::identity()).unwrap(), 1);
        assert_eq!(tree.n_constraint_equations(), 7);
    }

    #[test]
    fn test_lock_rejects_changes() {
        let mut tree = chain();
        tree.add_coincident_stations_constraint(GROUND, Vec3::zeros(), 4, Vec3::zeros()).unwrap();
        let topology = tree.lock().clone();
        assert_eq!(topology.children[1], vec![2, 3]);
        assert_eq!(topology.nu, 11);
        assert_eq!(topology.n_constraint_equations, 3);
        assert!(tree.is_locked());

        let err = tree
            .add_body(rod(), Transform::identity(), GROUND, Transform::identity(), JointKind::Pin)
            .unwrap_err();
        assert!(err.is_topology());
        let err = tree
            .add_coincident_stations_constraint(GROUND, Vec3::zeros(), 2, Vec3::zeros())
            .unwrap_err();
        assert!(err.is_topology());
        assert_eq!(tree.lock(), &topology);
    }
}
