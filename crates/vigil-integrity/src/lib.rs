//! # vigil-integrity
//!
//! Tamper evidence for activity records: a deterministic canonical encoding
//! and a keyed-MAC sealer/verifier over it.

pub mod canonical;
pub mod sealer;

pub use canonical::canonical_bytes;
pub use sealer::{BatchVerification, IntegrityError, IntegritySealer, Verification};
