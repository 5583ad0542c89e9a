//! Benchmark model
//!
//! A benchmark is the validated set of phase definitions plus the ordered list
//! of agents that generate load. It is built once from configuration and is
//! read-only for the rest of the run.

use super::phase::{PhaseConfig, PhaseDefinition, PhaseId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use thiserror::Error;

/// Configuration errors, detected before any session is started
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BenchmarkDefinitionError {
    #[error("Invalid benchmark JSON: {0}")]
    Parse(String),

    #[error("{0}")]
    Serialization(String),

    #[error("Benchmark '{0}' has no agents")]
    NoAgents(String),

    #[error("Duplicate agent name: {0}")]
    DuplicateAgent(String),

    #[error("Duplicate phase name: {0}")]
    DuplicatePhase(String),

    #[error("Phase '{phase}': {reason}")]
    InvalidPhase { phase: String, reason: String },

    #[error("Phase '{phase}' references unknown phase '{dependency}' in {relation}")]
    UnknownDependency {
        phase: String,
        relation: &'static str,
        dependency: String,
    },

    #[error("Phases can never start or terminate because of a dependency cycle: {}", phases.join(", "))]
    DependencyCycle { phases: Vec<String> },

    #[error("Phase '{phase}' shares resources '{tag}' but has no bounded session count (set maxSessions)")]
    AmbiguousSharedResources { tag: String, phase: String },

    #[error("Phase '{phase}' shares resources '{tag}' with '{waits_for}' but must wait for it before terminating")]
    SharedResourceDeadlock {
        tag: String,
        phase: String,
        waits_for: String,
    },

    #[error("Invalid scheduler config: {0}")]
    InvalidSchedulerConfig(String),
}

/// Benchmark file contents before validation
///
/// # Example
///
/// ```rust
/// use phase_scheduler_core::models::BenchmarkConfig;
///
/// let config = BenchmarkConfig::from_json_str(r#"{
///     "name": "smoke",
///     "agents": ["agent-1"],
///     "phases": [
///         { "name": "warmup", "scenario": "browse", "type": "atOnce", "users": 10 }
///     ]
/// }"#).unwrap();
///
/// let benchmark = config.build().unwrap();
/// assert_eq!(benchmark.phases().len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkConfig {
    pub name: String,
    pub agents: Vec<String>,
    pub phases: Vec<PhaseConfig>,
}

impl BenchmarkConfig {
    /// Parse a benchmark from JSON text
    ///
    /// # Errors
    ///
    /// `BenchmarkDefinitionError::Parse` when the text is not a valid benchmark document.
    pub fn from_json_str(json: &str) -> Result<Self, BenchmarkDefinitionError> {
        serde_json::from_str(json).map_err(|e| BenchmarkDefinitionError::Parse(e.to_string()))
    }

    /// SHA-256 of the canonical JSON form, hex encoded
    pub fn fingerprint(&self) -> Result<String, BenchmarkDefinitionError> {
        let bytes = serde_json::to_vec(self).map_err(|e| {
            BenchmarkDefinitionError::Serialization(format!("Benchmark serialization failed: {}", e))
        })?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(format!("{:x}", hasher.finalize()))
    }

    /// Validate into a `Benchmark`
    pub fn build(&self) -> Result<Benchmark, BenchmarkDefinitionError> {
        let benchmark = Benchmark::new(self.name.clone(), self.agents.clone(), &self.phases)?;
        Ok(benchmark.with_fingerprint(self.fingerprint()?))
    }
}

/// Validated benchmark: phases indexed by `PhaseId` and the ordered agent list
#[derive(Debug, Clone)]
pub struct Benchmark {
    name: String,
    agents: Vec<String>,
    phases: Vec<PhaseDefinition>,
    fingerprint: String,
}

impl Benchmark {
    /// Validate agents and phases
    ///
    /// Phase ids are assigned by position. Cross-phase rules (dependency
    /// names, cycles, shared pools) are checked when the dependency graph is
    /// built.
    pub fn new(
        name: String,
        agents: Vec<String>,
        phase_configs: &[PhaseConfig],
    ) -> Result<Self, BenchmarkDefinitionError> {
        if agents.is_empty() {
            return Err(BenchmarkDefinitionError::NoAgents(name));
        }

        let mut agent_names = HashSet::new();
        for agent in &agents {
            if !agent_names.insert(agent.as_str()) {
                return Err(BenchmarkDefinitionError::DuplicateAgent(agent.clone()));
            }
        }

        let mut phase_names = HashSet::new();
        let mut phases = Vec::with_capacity(phase_configs.len());
        for (idx, config) in phase_configs.iter().enumerate() {
            if !phase_names.insert(config.name.as_str()) {
                return Err(BenchmarkDefinitionError::DuplicatePhase(config.name.clone()));
            }
            phases.push(PhaseDefinition::from_config(PhaseId(idx), config)?);
        }

        Ok(Self {
            name,
            agents,
            phases,
            fingerprint: String::new(),
        })
    }

    fn with_fingerprint(mut self, fingerprint: String) -> Self {
        self.fingerprint = fingerprint;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn agents(&self) -> &[String] {
        &self.agents
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    pub fn phases(&self) -> &[PhaseDefinition] {
        &self.phases
    }

    pub fn phase(&self, id: PhaseId) -> Option<&PhaseDefinition> {
        self.phases.get(id.0)
    }

    pub fn phase_by_name(&self, name: &str) -> Option<&PhaseDefinition> {
        self.phases.iter().find(|p| p.name() == name)
    }

    /// Fingerprint of the source configuration (empty when built directly)
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}
