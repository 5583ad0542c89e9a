//! Phase Scheduler Core - load generation run engine
//!
//! Drives the phases of a benchmark (each an arrival model bound to a
//! scenario) through their lifecycle on a single logical clock, deciding
//! when each phase starts, how many sessions to start per agent and tick,
//! and when it terminates.
//!
//! # Architecture
//!
//! - **core**: Run clock
//! - **models**: Benchmark and phase definitions, scheduler events
//! - **graph**: Phase dependency relations and cycle detection
//! - **arrivals**: Arrival models (closed and open) and per-agent apportioning
//! - **runtime**: Per-phase state machine and session counters
//! - **resources**: Shared session pools
//! - **engine**: Execution engine boundary and the in-process simulated engine
//! - **orchestrator**: Main scheduler loop and snapshots
//! - **rng**: Deterministic random number generation
//!
//! # Critical Invariants
//!
//! 1. Every configuration error is reported before any session starts
//! 2. All state transitions happen inside `Scheduler::tick`
//! 3. Session counters never go negative
//! 4. All randomness is deterministic (seeded RNG)

// Module declarations
pub mod arrivals;
pub mod core;
pub mod engine;
pub mod graph;
pub mod models;
pub mod orchestrator;
pub mod resources;
pub mod rng;
pub mod runtime;

// Re-exports for convenience
pub use arrivals::{ArrivalContext, ArrivalDecision, ArrivalModel, ArrivalSampler};
pub use core::time::RunClock;
pub use engine::{EngineError, EngineEvent, EventSender, ExecutionEngine, SimulatedEngine};
pub use graph::DependencyGraph;
pub use models::{
    Benchmark, BenchmarkConfig, BenchmarkDefinitionError, Event, EventLog, PhaseConfig,
    PhaseDefinition, PhaseId, PhaseKind, ScenarioRef,
};
pub use orchestrator::{
    PhaseSnapshot, RunSnapshot, RunStatus, Scheduler, SchedulerConfig, SchedulerError, TickResult,
};
pub use rng::RngManager;
pub use runtime::{DrainMode, PhaseRuntime, PhaseStatus};
