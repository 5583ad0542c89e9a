//! Orchestrator - the phase scheduler run loop
//!
//! See `scheduler.rs` for the tick loop and `checkpoint.rs` for snapshots.

pub mod checkpoint;
pub mod scheduler;

pub use checkpoint::{PhaseSnapshot, RunSnapshot};
pub use scheduler::{RunStatus, Scheduler, SchedulerConfig, SchedulerError, TickResult};
