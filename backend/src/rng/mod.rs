//! Deterministic random number generation
//!
//! All randomness in the scheduler (arrival variance) goes through this
//! module so that a run is reproducible from its seed.

mod xorshift;

pub use xorshift::RngManager;
