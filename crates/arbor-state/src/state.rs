//! The [`State`] container and the realization driver.

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::fmt::Debug;

use arbor_math::DVec;
use tracing::{trace, warn};

use crate::{Error, Result, Stage, Value};

/// Handle to a block of generalized coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QIndex(pub usize);

/// Handle to a block of generalized speeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UIndex(pub usize);

/// Handle to a discrete variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiscreteVariableIndex(pub usize);

/// Something that knows how to compute one stage's results into a [`State`].
pub trait Realizer {
    /// Compute everything that becomes valid at `stage`.
    ///
    /// Called with the state sitting at `stage.prev()`. Allocations made here
    /// belong to `stage` and are released when it is invalidated.
    fn realize(&self, state: &mut State, stage: Stage) -> Result<()>;
}

/// A derived quantity stored in the state cache, keyed by its type.
pub trait Cached: Any + Clone + Debug + Send + Sync {
    /// Stage at which the entry becomes readable.
    const STAGE: Stage;
}

#[derive(Debug, Clone, Copy)]
struct Block {
    owner: Stage,
    start: usize,
    len: usize,
}

#[derive(Debug, Clone)]
struct DiscreteVariable {
    min_stage: Stage,
    invalidates: Stage,
    owner: Stage,
    value: Option<Value>,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    stage: Stage,
    value: Value,
}

/// Continuous state, discrete variables and stage-tagged cache.
#[derive(Debug, Clone)]
pub struct State {
    stage: Stage,
    realizing: Option<Stage>,
    time: f64,
    q: DVec,
    u: DVec,
    q_blocks: Vec<Option<Block>>,
    u_blocks: Vec<Option<Block>>,
    discrete: Vec<DiscreteVariable>,
    cache: HashMap<TypeId, CacheEntry>,
    realize_counts: [usize; Stage::COUNT],
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

impl State {
    /// Fresh state at [`Stage::Empty`] with no variables.
    pub fn new() -> Self {
        Self {
            stage: Stage::Empty,
            realizing: None,
            time: 0.0,
            q: DVec::zeros(0),
            u: DVec::zeros(0),
            q_blocks: Vec::new(),
            u_blocks: Vec::new(),
            discrete: Vec::new(),
            cache: HashMap::new(),
            realize_counts: [0; Stage::COUNT],
        }
    }

    /// Highest stage currently valid.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Stage being realized right now, if any.
    pub fn realizing(&self) -> Option<Stage> {
        self.realizing
    }

    /// How many times `stage` has been realized into this state.
    pub fn realization_count(&self, stage: Stage) -> usize {
        self.realize_counts[stage.index()]
    }

    /// Fail unless the state has reached `required`.
    pub fn require_stage(&self, required: Stage, what: &str) -> Result<()> {
        if self.stage < required {
            return Err(Error::stage(what, required, self.stage));
        }
        Ok(())
    }

    // ── Realization ──

    /// Realize every stage above the current one up to and including `target`.
    ///
    /// Does nothing when the state is already at or above `target`. If a hook
    /// fails, everything produced during this call is released and the stage
    /// returns to where it was.
    pub fn advance_to_stage(&mut self, target: Stage, realizer: &dyn Realizer) -> Result<()> {
        if let Some(active) = self.realizing {
            return Err(Error::stage(
                format!("advance_to_stage({target}) while realizing {active}"),
                active.prev(),
                self.stage,
            ));
        }
        let start = self.stage;
        while self.stage < target {
            let Some(next) = self.stage.next() else { break };
            self.realizing = Some(next);
            let result = realizer.realize(self, next);
            self.realizing = None;
            if let Err(err) = result {
                warn!(stage = %next, error = %err, "realization failed, rolling back to {start}");
                self.release_from(start.next().unwrap_or(Stage::HIGHEST));
                self.stage = start;
                return Err(err);
            }
            self.stage = next;
            self.realize_counts[next.index()] += 1;
            trace!(stage = %next, "realized stage");
        }
        Ok(())
    }

    /// Drop validity of `stage` and everything above it.
    ///
    /// Cache entries, variables and Q/U blocks produced while realizing those
    /// stages are released. No-op if the state is below `stage`.
    pub fn invalidate(&mut self, stage: Stage) {
        if stage == Stage::Empty || self.stage < stage {
            return;
        }
        trace!(stage = %stage, "invalidating");
        self.stage = stage.prev();
        self.release_from(stage);
    }

    fn owner(&self) -> Stage {
        self.realizing.unwrap_or(Stage::Empty)
    }

    fn release_from(&mut self, stage: Stage) {
        self.cache.retain(|_, entry| entry.stage < stage);
        for var in &mut self.discrete {
            if var.owner >= stage {
                var.value = None;
            }
        }
        self.q = compact(&self.q, &mut self.q_blocks, stage);
        self.u = compact(&self.u, &mut self.u_blocks, stage);
    }

    // ── Time ──

    /// Current time.
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Set the current time.
    pub fn set_time(&mut self, t: f64) {
        self.time = t;
    }

    // ── Continuous variables ──

    /// Append a block of generalized coordinates.
    ///
    /// Only allowed while the state is below [`Stage::Modeled`], which
    /// includes realizing Modeled itself.
    pub fn allocate_q(&mut self, initial: &[f64]) -> Result<QIndex> {
        self.check_continuous_allocation("allocate_q")?;
        let owner = self.owner();
        self.q = append(&self.q, initial);
        self.q_blocks.push(Some(Block {
            owner,
            start: self.q.len() - initial.len(),
            len: initial.len(),
        }));
        Ok(QIndex(self.q_blocks.len() - 1))
    }

    /// Append a block of generalized speeds.
    pub fn allocate_u(&mut self, initial: &[f64]) -> Result<UIndex> {
        self.check_continuous_allocation("allocate_u")?;
        let owner = self.owner();
        self.u = append(&self.u, initial);
        self.u_blocks.push(Some(Block {
            owner,
            start: self.u.len() - initial.len(),
            len: initial.len(),
        }));
        Ok(UIndex(self.u_blocks.len() - 1))
    }

    fn check_continuous_allocation(&self, what: &str) -> Result<()> {
        if self.stage >= Stage::Modeled {
            return Err(Error::stage(what, Stage::Built, self.stage));
        }
        Ok(())
    }

    /// All generalized coordinates.
    pub fn q(&self) -> &DVec {
        &self.q
    }

    /// All generalized speeds.
    pub fn u(&self) -> &DVec {
        &self.u
    }

    /// Number of generalized coordinates.
    pub fn nq(&self) -> usize {
        self.q.len()
    }

    /// Number of generalized speeds.
    pub fn nu(&self) -> usize {
        self.u.len()
    }

    /// Mutable coordinates; invalidates [`Stage::Configured`].
    pub fn upd_q(&mut self) -> &mut DVec {
        self.invalidate(Stage::Configured);
        &mut self.q
    }

    /// Mutable speeds; invalidates [`Stage::Moving`].
    pub fn upd_u(&mut self) -> &mut DVec {
        self.invalidate(Stage::Moving);
        &mut self.u
    }

    /// Overwrite all coordinates.
    pub fn set_q(&mut self, q: &DVec) -> Result<()> {
        if q.len() != self.q.len() {
            return Err(Error::dimension("q", self.q.len(), q.len()));
        }
        self.upd_q().copy_from(q);
        Ok(())
    }

    /// Overwrite all speeds.
    pub fn set_u(&mut self, u: &DVec) -> Result<()> {
        if u.len() != self.u.len() {
            return Err(Error::dimension("u", self.u.len(), u.len()));
        }
        self.upd_u().copy_from(u);
        Ok(())
    }

    /// Offset of a coordinate block within [`State::q`].
    pub fn q_start(&self, index: QIndex) -> Result<usize> {
        Ok(self.q_block(index)?.start)
    }

    /// Offset of a speed block within [`State::u`].
    pub fn u_start(&self, index: UIndex) -> Result<usize> {
        Ok(self.u_block(index)?.start)
    }

    /// Coordinates of one block.
    pub fn q_slice(&self, index: QIndex) -> Result<&[f64]> {
        let b = self.q_block(index)?;
        Ok(&self.q.as_slice()[b.start..b.start + b.len])
    }

    /// Speeds of one block.
    pub fn u_slice(&self, index: UIndex) -> Result<&[f64]> {
        let b = self.u_block(index)?;
        Ok(&self.u.as_slice()[b.start..b.start + b.len])
    }

    /// Mutable coordinates of one block; invalidates [`Stage::Configured`].
    pub fn upd_q_slice(&mut self, index: QIndex) -> Result<&mut [f64]> {
        let b = self.q_block(index)?;
        Ok(&mut self.upd_q().as_mut_slice()[b.start..b.start + b.len])
    }

    /// Mutable speeds of one block; invalidates [`Stage::Moving`].
    pub fn upd_u_slice(&mut self, index: UIndex) -> Result<&mut [f64]> {
        let b = self.u_block(index)?;
        Ok(&mut self.upd_u().as_mut_slice()[b.start..b.start + b.len])
    }

    fn q_block(&self, index: QIndex) -> Result<Block> {
        self.q_blocks
            .get(index.0)
            .copied()
            .flatten()
            .ok_or_else(|| Error::stage(format!("released Q block {}", index.0), Stage::Modeled, self.stage))
    }

    fn u_block(&self, index: UIndex) -> Result<Block> {
        self.u_blocks
            .get(index.0)
            .copied()
            .flatten()
            .ok_or_else(|| Error::stage(format!("released U block {}", index.0), Stage::Modeled, self.stage))
    }

    // ── Discrete variables ──

    /// Allocate a discrete variable readable from `min_stage` whose update
    /// invalidates `min_stage`.
    pub fn allocate_discrete_variable<T>(&mut self, min_stage: Stage, value: T) -> Result<DiscreteVariableIndex>
    where
        T: Any + Clone + Debug + Send + Sync,
    {
        self.allocate_discrete_variable_invalidating(min_stage, min_stage, value)
    }

    /// Allocate a discrete variable readable from `min_stage` whose update
    /// invalidates `invalidates` (and everything above it).
    pub fn allocate_discrete_variable_invalidating<T>(
        &mut self,
        min_stage: Stage,
        invalidates: Stage,
        value: T,
    ) -> Result<DiscreteVariableIndex>
    where
        T: Any + Clone + Debug + Send + Sync,
    {
        let owner = self.owner();
        if invalidates <= owner {
            // Updating it would release the variable itself.
            return Err(Error::stage(
                format!("discrete variable {} invalidating {invalidates}", type_name::<T>()),
                owner.next().unwrap_or(Stage::HIGHEST),
                invalidates,
            ));
        }
        self.discrete.push(DiscreteVariable {
            min_stage,
            invalidates,
            owner,
            value: Some(Value::new(value)),
        });
        Ok(DiscreteVariableIndex(self.discrete.len() - 1))
    }

    /// Read a discrete variable; requires the state at or above its minimum stage.
    pub fn discrete_variable<T: Any>(&self, index: DiscreteVariableIndex) -> Result<&T> {
        let var = self.discrete_slot(index)?;
        self.require_stage(var.min_stage, type_name::<T>())?;
        match &var.value {
            Some(value) => value.get::<T>(),
            None => Err(self.released(index, var.owner)),
        }
    }

    /// Mutable access to a discrete variable; invalidates the variable's stage.
    pub fn upd_discrete_variable<T: Any>(&mut self, index: DiscreteVariableIndex) -> Result<&mut T> {
        let var = self.discrete_slot(index)?;
        let (min_stage, invalidates, owner) = (var.min_stage, var.invalidates, var.owner);
        self.require_stage(min_stage, type_name::<T>())?;
        match &var.value {
            Some(value) if !value.is::<T>() => {
                return Err(Error::TypeMismatch {
                    stored: value.type_name(),
                    requested: type_name::<T>(),
                });
            }
            Some(_) => {}
            None => return Err(self.released(index, owner)),
        }
        self.invalidate(invalidates);
        match self.discrete[index.0].value.as_mut() {
            Some(value) => value.get_mut::<T>(),
            None => Err(Error::stage("released discrete variable", owner, self.stage)),
        }
    }

    fn discrete_slot(&self, index: DiscreteVariableIndex) -> Result<&DiscreteVariable> {
        self.discrete.get(index.0).ok_or_else(|| {
            Error::stage(format!("unknown discrete variable {}", index.0), Stage::HIGHEST, self.stage)
        })
    }

    fn released(&self, index: DiscreteVariableIndex, owner: Stage) -> Error {
        Error::stage(format!("released discrete variable {}", index.0), owner, self.stage)
    }

    // ── Cache ──

    /// Store a cache entry, replacing any previous value of the same type.
    pub fn set_cache_entry<T: Cached>(&mut self, value: T) {
        self.cache.insert(
            TypeId::of::<T>(),
            CacheEntry {
                stage: T::STAGE,
                value: Value::new(value),
            },
        );
    }

    /// Read a cache entry; requires the state at or above `T::STAGE`.
    pub fn cache_entry<T: Cached>(&self) -> Result<&T> {
        self.require_stage(T::STAGE, type_name::<T>())?;
        self.cache
            .get(&TypeId::of::<T>())
            .ok_or_else(|| Error::stage(type_name::<T>(), T::STAGE, self.stage))?
            .value
            .get::<T>()
    }

    /// Whether an entry of type `T` is currently stored, valid or not.
    pub fn has_cache_entry<T: Cached>(&self) -> bool {
        self.cache.contains_key(&TypeId::of::<T>())
    }
}

fn append(v: &DVec, tail: &[f64]) -> DVec {
    DVec::from_iterator(v.len() + tail.len(), v.iter().chain(tail.iter()).copied())
}

/// Drop blocks owned at or above `stage` and repack the survivors.
fn compact(values: &DVec, blocks: &mut [Option<Block>], stage: Stage) -> DVec {
    let mut kept = Vec::with_capacity(values.len());
    for slot in blocks.iter_mut() {
        let Some(b) = slot.as_mut() else { continue };
        if b.owner >= stage {
            *slot = None;
            continue;
        }
        let start = kept.len();
        kept.extend_from_slice(&values.as_slice()[b.start..b.start + b.len]);
        b.start = start;
    }
    DVec::from_vec(kept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[derive(Debug, Clone, PartialEq)]
    struct Positions(Vec<f64>);

    impl Cached for Positions {
        const STAGE: Stage = Stage::Configured;
    }

    /// Allocates two coordinates while Modeled and caches doubled q at Configured.
    struct Doubler {
        fail_at: Option<Stage>,
        calls: Cell<usize>,
    }

    impl Doubler {
        fn new() -> Self {
            Self {
                fail_at: None,
                calls: Cell::new(0),
            }
        }
    }

    impl Realizer for Doubler {
        fn realize(&self, state: &mut State, stage: Stage) -> Result<()> {
            self.calls.set(self.calls.get() + 1);
            if self.fail_at == Some(stage) {
                return Err(Error::topology("refused"));
            }
            match stage {
                Stage::Modeled => {
                    state.allocate_q(&[1.0, 2.0])?;
                    state.allocate_u(&[0.0, 0.0])?;
                    state.allocate_discrete_variable_invalidating(Stage::Modeled, Stage::Dynamics, 0.5_f64)?;
                }
                Stage::Configured => {
                    let doubled = state.q().iter().map(|x| 2.0 * x).collect();
                    state.set_cache_entry(Positions(doubled));
                }
                _ => {}
            }
            Ok(())
        }
    }

    struct Nested;

    impl Realizer for Nested {
        fn realize(&self, state: &mut State, stage: Stage) -> Result<()> {
            if stage == Stage::Built {
                state.advance_to_stage(Stage::Built, self)?;
            }
            Ok(())
        }
    }

    #[test]
    fn test_advance_realizes_in_order() {
        let mut state = State::new();
        let sys = Doubler::new();
        state.advance_to_stage(Stage::Configured, &sys).unwrap();
        assert_eq!(state.stage(), Stage::Configured);
        assert_eq!(sys.calls.get(), 3);
        assert_eq!(state.nq(), 2);
        assert_eq!(state.cache_entry::<Positions>().unwrap().0, vec![2.0, 4.0]);
    }

    #[test]
    fn test_advance_is_idempotent() {
        let mut state = State::new();
        let sys = Doubler::new();
        state.advance_to_stage(Stage::Reacting, &sys).unwrap();
        let before = state.cache_entry::<Positions>().unwrap().clone();
        state.advance_to_stage(Stage::Reacting, &sys).unwrap();
        state.advance_to_stage(Stage::Moving, &sys).unwrap();
        assert_eq!(sys.calls.get(), 6);
        assert_eq!(state.realization_count(Stage::Configured), 1);
        assert_eq!(state.cache_entry::<Positions>().unwrap(), &before);
    }

    #[test]
    fn test_cache_guarded_by_stage() {
        let mut state = State::new();
        let sys = Doubler::new();
        state.advance_to_stage(Stage::Configured, &sys).unwrap();
        state.upd_q()[0] = 5.0;
        assert_eq!(state.stage(), Stage::Modeled);
        let err = state.cache_entry::<Positions>().unwrap_err();
        assert!(err.is_stage_violation());
        state.advance_to_stage(Stage::Configured, &sys).unwrap();
        assert_eq!(state.cache_entry::<Positions>().unwrap().0, vec![10.0, 4.0]);
        assert_eq!(state.realization_count(Stage::Configured), 2);
    }

    #[test]
    fn test_u_invalidates_moving_only() {
        let mut state = State::new();
        let sys = Doubler::new();
        state.advance_to_stage(Stage::Reacting, &sys).unwrap();
        state.upd_u()[1] = 1.0;
        assert_eq!(state.stage(), Stage::Configured);
        assert!(state.cache_entry::<Positions>().is_ok());
    }

    #[test]
    fn test_discrete_variable_access() {
        let mut state = State::new();
        let idx = state.allocate_discrete_variable(Stage::Built, 7_i32).unwrap();
        let err = state.discrete_variable::<i32>(idx).unwrap_err();
        assert!(err.is_stage_violation());

        let sys = Doubler::new();
        state.advance_to_stage(Stage::Moving, &sys).unwrap();
        assert_eq!(*state.discrete_variable::<i32>(idx).unwrap(), 7);
        assert!(matches!(
            state.discrete_variable::<f64>(idx),
            Err(Error::TypeMismatch { .. })
        ));

        *state.upd_discrete_variable::<i32>(idx).unwrap() = 9;
        assert_eq!(state.stage(), Stage::Empty);
        // The user-owned variable survives its own invalidation.
        state.advance_to_stage(Stage::Built, &sys).unwrap();
        assert_eq!(*state.discrete_variable::<i32>(idx).unwrap(), 9);
    }

    #[test]
    fn test_wrong_type_update_keeps_stage() {
        let mut state = State::new();
        let idx = state.allocate_discrete_variable(Stage::Built, 7_i32).unwrap();
        state.advance_to_stage(Stage::Configured, &Doubler::new()).unwrap();
        assert!(state.upd_discrete_variable::<u8>(idx).is_err());
        assert_eq!(state.stage(), Stage::Configured);
    }

    #[test]
    fn test_modeled_invalidation_releases_allocations() {
        let mut state = State::new();
        let user_q = state.allocate_q(&[9.0]).unwrap();
        let sys = Doubler::new();
        state.advance_to_stage(Stage::Dynamics, &sys).unwrap();
        assert_eq!(state.nq(), 3);
        let modeled_var = DiscreteVariableIndex(0);
        assert_eq!(*state.discrete_variable::<f64>(modeled_var).unwrap(), 0.5);

        state.invalidate(Stage::Modeled);
        assert_eq!(state.stage(), Stage::Built);
        assert_eq!(state.nq(), 1);
        assert_eq!(state.nu(), 0);
        assert_eq!(state.q_slice(user_q).unwrap(), &[9.0]);
        assert!(state.discrete_variable::<f64>(modeled_var).is_err());
        assert!(!state.has_cache_entry::<Positions>());

        state.advance_to_stage(Stage::Modeled, &sys).unwrap();
        assert_eq!(state.nq(), 3);
    }

    #[test]
    fn test_allocation_after_modeled_rejected() {
        let mut state = State::new();
        state.advance_to_stage(Stage::Modeled, &Doubler::new()).unwrap();
        assert!(state.allocate_q(&[0.0]).unwrap_err().is_stage_violation());
        assert!(state.allocate_u(&[0.0]).unwrap_err().is_stage_violation());
    }

    #[test]
    fn test_failed_realize_rolls_back() {
        let mut state = State::new();
        let sys = Doubler {
            fail_at: Some(Stage::Moving),
            calls: Cell::new(0),
        };
        state.advance_to_stage(Stage::Built, &sys).unwrap();
        let err = state.advance_to_stage(Stage::Reacting, &sys).unwrap_err();
        assert!(err.is_topology());
        assert_eq!(state.stage(), Stage::Built);
        assert_eq!(state.nq(), 0);
        assert!(!state.has_cache_entry::<Positions>());
        assert_eq!(state.realizing(), None);
    }

    #[test]
    fn test_reentrant_advance_rejected() {
        let mut state = State::new();
        let err = state.advance_to_stage(Stage::Modeled, &Nested).unwrap_err();
        assert!(err.is_stage_violation());
        assert_eq!(state.stage(), Stage::Empty);
    }

    #[test]
    fn test_set_q_dimension() {
        let mut state = State::new();
        state.advance_to_stage(Stage::Modeled, &Doubler::new()).unwrap();
        let err = state.set_q(&DVec::zeros(5)).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 2, found: 5, .. }));
    }

    #[test]
    fn test_block_slices() {
        let mut state = State::new();
        let a = state.allocate_u(&[1.0, 2.0]).unwrap();
        let b = state.allocate_u(&[3.0]).unwrap();
        assert_eq!(state.u_start(b).unwrap(), 2);
        state.upd_u_slice(a).unwrap()[1] = 5.0;
        assert_eq!(state.u().as_slice(), &[1.0, 5.0, 3.0]);
    }
}
