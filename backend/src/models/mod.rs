//! Domain models for the phase scheduler

pub mod benchmark;
pub mod event;
pub mod phase;

// Re-exports
pub use benchmark::{Benchmark, BenchmarkConfig, BenchmarkDefinitionError};
pub use event::{Event, EventLog};
pub use phase::{PhaseConfig, PhaseDefinition, PhaseId, PhaseKind, ScenarioRef};
