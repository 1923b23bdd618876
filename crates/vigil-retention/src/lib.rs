//! # vigil-retention
//!
//! Decides, per activity record, whether to keep, archive, or delete it under
//! a set of overlapping, prioritized retention policies, and runs the
//! decision over record batches with bounded concurrency.

pub mod evaluator;
pub mod sweep;

pub use evaluator::{evaluate_record, select_policy, DecidedAction, Decision};
pub use sweep::{PolicyTally, RetentionSweeper, SweepOptions, SweepReport};
