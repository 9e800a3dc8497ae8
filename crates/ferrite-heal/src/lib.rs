//! Healing and the most-recently-failed (MRF) retry queue.

pub mod heal;
pub mod mrf;
pub mod sequence;
pub mod tracker;

pub use heal::{HealEngine, HealResult, HealResultItem, HealShardState};
pub use mrf::{MrfQueue, PartialOperation, PartialOperationKind};
pub use sequence::{HealSequence, HealSequenceState, HealSequenceStatus};
pub use tracker::{HealingTracker, HealingTrackerSnapshot};
