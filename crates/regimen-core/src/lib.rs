//! Core engine for coaching plans: plan storage, per-client expansion,
//! retraction and the execution ledger.

pub mod enrollment;
pub mod error;
pub mod expansion;
pub mod ledger;
pub mod mutator;
pub mod plan;

pub use error::{EngineError, with_deadline};
pub use mutator::OrphanPolicy;
