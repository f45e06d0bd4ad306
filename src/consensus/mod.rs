//! Consensus engine seam and the dev-mode sealer.

mod dev;
mod traits;

pub use dev::{DevEngine, DIFF_IN_TURN, DIFF_NO_TURN};
pub use traits::{seal_hash, Engine, EngineError, RESULT_QUEUE_SIZE};
