//! Run snapshots for status polling and reporting
//!
//! A `RunSnapshot` is a serializable, point-in-time copy of the run status
//! and every phase's counters. It carries the SHA-256 fingerprint of the
//! benchmark configuration so a reader can check which benchmark a status
//! belongs to.

use crate::arrivals;
use crate::models::{BenchmarkConfig, PhaseDefinition};
use crate::orchestrator::scheduler::RunStatus;
use crate::runtime::{PhaseRuntime, PhaseStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Snapshot Structures
// ============================================================================

/// Status of a whole run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub run_id: Uuid,
    pub benchmark: String,
    pub status: RunStatus,
    /// Reason the run failed, if it did
    pub failure: Option<String>,
    pub tick: u64,
    pub elapsed_ms: u64,
    pub phases: Vec<PhaseSnapshot>,
    /// SHA-256 of the benchmark configuration (empty if built without one)
    pub config_fingerprint: String,
}

/// Status and counters of one phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseSnapshot {
    pub name: String,
    pub kind: String,
    pub description: String,
    pub status: PhaseStatus,
    pub absolute_start_ms: Option<u64>,
    /// Time since the phase started
    pub elapsed_ms: u64,
    pub active_sessions: u64,
    pub started: u64,
    pub finished: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub backlogged: u64,
    /// Current arrival rate across all agents (open phases while running)
    pub rate_per_sec: Option<f64>,
    pub failure: Option<String>,
}

impl PhaseSnapshot {
    pub fn capture(
        definition: &PhaseDefinition,
        runtime: &PhaseRuntime,
        agents: usize,
        now_ms: u64,
    ) -> Self {
        Self {
            name: definition.name().to_string(),
            kind: definition.kind().name().to_string(),
            description: definition.description(agents),
            status: runtime.status(),
            absolute_start_ms: runtime.absolute_start_ms(),
            elapsed_ms: runtime.elapsed_ms(now_ms),
            active_sessions: runtime.active_sessions(),
            started: runtime.total_started(),
            finished: runtime.total_finished(),
            failed: runtime.total_failed(),
            cancelled: runtime.total_cancelled(),
            backlogged: runtime.total_backlogged(),
            rate_per_sec: (definition.kind().is_open() && runtime.status() == PhaseStatus::Running)
                .then(|| {
                    arrivals::rate_at(
                        definition.kind(),
                        definition.duration_ms(),
                        runtime.elapsed_ms(now_ms),
                    ) * agents as f64
                }),
            failure: runtime.failure().map(str::to_string),
        }
    }
}

impl RunSnapshot {
    pub fn phase(&self, name: &str) -> Option<&PhaseSnapshot> {
        self.phases.iter().find(|p| p.name == name)
    }

    /// Whether this snapshot was taken for a run of `config`
    pub fn matches_config(&self, config: &BenchmarkConfig) -> bool {
        !self.config_fingerprint.is_empty()
            && config
                .fingerprint()
                .is_ok_and(|fingerprint| fingerprint == self.config_fingerprint)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
