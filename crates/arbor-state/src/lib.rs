//! Stage-ordered state container for arbor.
//!
//! A [`State`] owns the generalized coordinates Q and speeds U, a table of
//! type-tagged discrete variables and a cache of derived quantities. Every
//! item is tagged with the [`Stage`] at which it becomes valid; reading it
//! earlier fails with [`Error::StageViolation`].

pub mod error;
pub mod stage;
pub mod state;
pub mod value;

pub use error::{Error, Result};
pub use stage::Stage;
pub use state::{Cached, DiscreteVariableIndex, QIndex, Realizer, State, UIndex};
pub use value::Value;
