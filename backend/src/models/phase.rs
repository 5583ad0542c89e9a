//! Phase definitions
//!
//! A phase is a named, time-bounded segment of a benchmark run with its own
//! session-arrival rule and a scenario to execute. Definitions are validated
//! once, when the benchmark is built, and never change afterwards.
//!
//! # Example
//!
//! ```rust
//! use phase_scheduler_core::models::{PhaseConfig, PhaseDefinition, PhaseId, PhaseKind};
//!
//! let config = PhaseConfig::new(
//!     "steady",
//!     PhaseKind::ConstantPerSec {
//!         users_per_sec: 5.0,
//!         variance: false,
//!         max_sessions: None,
//!     },
//! )
//! .with_duration(2000);
//!
//! let phase = PhaseDefinition::from_config(PhaseId(0), &config).unwrap();
//! assert_eq!(phase.duration_ms(), 2000);
//! assert_eq!(phase.description(2), "10.00 users per second");
//! ```

use super::benchmark::BenchmarkDefinitionError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sentinel used in configuration for "not set" times.
const UNSET: i64 = -1;

fn unset() -> i64 {
    UNSET
}

/// Dense phase index, stable within a run (position in the benchmark)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PhaseId(pub usize);

impl fmt::Display for PhaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque handle to the scenario a phase executes
///
/// The scheduler never looks inside; it only passes the handle along.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScenarioRef(pub String);

/// Kind-specific session arrival parameters
///
/// Counts are signed so that configuration mistakes surface as
/// `BenchmarkDefinitionError` rather than as deserialization failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum PhaseKind {
    /// `users` sessions per agent start together at phase start
    AtOnce { users: i64 },

    /// `users` sessions per agent are kept alive for the whole duration
    Always { users: i64 },

    /// Per-agent arrival rate ramps linearly over the duration
    RampPerSec {
        initial_users_per_sec: f64,
        target_users_per_sec: f64,
        #[serde(default)]
        variance: bool,
        #[serde(default)]
        max_sessions: Option<i64>,
    },

    /// Constant per-agent arrival rate
    ConstantPerSec {
        users_per_sec: f64,
        #[serde(default)]
        variance: bool,
        #[serde(default)]
        max_sessions: Option<i64>,
    },

    /// A single user runs the scenario `repeats` times back to back
    Sequentially { repeats: i64 },

    /// Placeholder used as a dependency anchor
    Noop,
}

impl PhaseKind {
    /// Short kind name used in logs and snapshots
    pub fn name(&self) -> &'static str {
        match self {
            PhaseKind::AtOnce { .. } => "atOnce",
            PhaseKind::Always { .. } => "always",
            PhaseKind::RampPerSec { .. } => "rampPerSec",
            PhaseKind::ConstantPerSec { .. } => "constantPerSec",
            PhaseKind::Sequentially { .. } => "sequentially",
            PhaseKind::Noop => "noop",
        }
    }

    /// Open models start sessions at a rate independent of active sessions
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            PhaseKind::RampPerSec { .. } | PhaseKind::ConstantPerSec { .. }
        )
    }

    /// Whether arrivals are sampled with variance instead of rounded
    pub fn variance(&self) -> bool {
        match self {
            PhaseKind::RampPerSec { variance, .. } | PhaseKind::ConstantPerSec { variance, .. } => {
                *variance
            }
            _ => false,
        }
    }

    /// Cap on concurrently active sessions, if configured
    pub fn max_sessions(&self) -> Option<u64> {
        match self {
            PhaseKind::RampPerSec { max_sessions, .. }
            | PhaseKind::ConstantPerSec { max_sessions, .. } => {
                max_sessions.and_then(|v| u64::try_from(v).ok())
            }
            _ => None,
        }
    }
}

/// Raw phase configuration as written in a benchmark file
///
/// Values are unchecked; `PhaseDefinition::from_config` validates them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseConfig {
    pub name: String,

    /// Scenario handle; absence is a configuration error
    #[serde(default)]
    pub scenario: Option<String>,

    /// Milliseconds after run start; negative = as soon as dependencies allow
    #[serde(default = "unset")]
    pub start_time: i64,

    /// Milliseconds over which new sessions may start
    #[serde(default = "unset")]
    pub duration: i64,

    /// Milliseconds after which running sessions are cancelled; negative = unbounded
    #[serde(default = "unset")]
    pub max_duration: i64,

    #[serde(default)]
    pub start_after: Vec<String>,

    #[serde(default)]
    pub start_after_strict: Vec<String>,

    #[serde(default)]
    pub terminate_after_strict: Vec<String>,

    #[serde(default)]
    pub shared_resources: Option<String>,

    #[serde(flatten)]
    pub kind: PhaseKind,
}

impl PhaseConfig {
    /// Config with the given kind, a scenario named after the phase and
    /// everything else unset
    pub fn new(name: impl Into<String>, kind: PhaseKind) -> Self {
        let name = name.into();
        Self {
            scenario: Some(name.clone()),
            name,
            start_time: UNSET,
            duration: UNSET,
            max_duration: UNSET,
            start_after: Vec::new(),
            start_after_strict: Vec::new(),
            terminate_after_strict: Vec::new(),
            shared_resources: None,
            kind,
        }
    }

    pub fn with_duration(mut self, duration_ms: i64) -> Self {
        self.duration = duration_ms;
        self
    }

    pub fn with_max_duration(mut self, max_duration_ms: i64) -> Self {
        self.max_duration = max_duration_ms;
        self
    }

    pub fn with_start_time(mut self, start_time_ms: i64) -> Self {
        self.start_time = start_time_ms;
        self
    }

    pub fn with_scenario(mut self, scenario: Option<&str>) -> Self {
        self.scenario = scenario.map(str::to_string);
        self
    }

    pub fn start_after(mut self, phase: impl Into<String>) -> Self {
        self.start_after.push(phase.into());
        self
    }

    pub fn start_after_strict(mut self, phase: impl Into<String>) -> Self {
        self.start_after_strict.push(phase.into());
        self
    }

    pub fn terminate_after_strict(mut self, phase: impl Into<String>) -> Self {
        self.terminate_after_strict.push(phase.into());
        self
    }

    pub fn with_shared_resources(mut self, tag: impl Into<String>) -> Self {
        self.shared_resources = Some(tag.into());
        self
    }
}

/// Validated, immutable phase definition
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseDefinition {
    id: PhaseId,
    name: String,
    scenario: ScenarioRef,
    start_time_ms: Option<u64>,
    duration_ms: u64,
    max_duration_ms: Option<u64>,
    start_after: Vec<String>,
    start_after_strict: Vec<String>,
    terminate_after_strict: Vec<String>,
    shared_resources: Option<String>,
    kind: PhaseKind,
}

impl PhaseDefinition {
    /// Validate `config` and build the definition
    ///
    /// # Errors
    ///
    /// Returns `BenchmarkDefinitionError::InvalidPhase` naming the phase when
    /// the scenario is missing, the duration is unset or negative, a rate is
    /// negative or not finite, a count is not positive, or a finite
    /// `max_duration` is shorter than `duration`.
    pub fn from_config(id: PhaseId, config: &PhaseConfig) -> Result<Self, BenchmarkDefinitionError> {
        let name = config.name.as_str();
        let invalid = |reason: String| BenchmarkDefinitionError::InvalidPhase {
            phase: name.to_string(),
            reason,
        };

        if name.is_empty() {
            return Err(invalid("phase name must not be empty".to_string()));
        }

        let scenario = config
            .scenario
            .as_ref()
            .map(|s| ScenarioRef(s.clone()))
            .ok_or_else(|| invalid("scenario was not set".to_string()))?;

        // Noop and AtOnce pin their timing regardless of what was configured
        let (start_time, duration, max_duration, shared_resources) = match &config.kind {
            PhaseKind::Noop => (UNSET, 0, UNSET, None),
            PhaseKind::AtOnce { .. } => {
                if config.duration > 0 {
                    tracing::warn!(
                        phase = name,
                        duration_ms = config.duration,
                        "duration is ignored for atOnce phases"
                    );
                }
                (
                    config.start_time,
                    0,
                    config.max_duration,
                    config.shared_resources.clone(),
                )
            }
            _ => (
                config.start_time,
                config.duration,
                config.max_duration,
                config.shared_resources.clone(),
            ),
        };

        if duration < 0 {
            return Err(invalid("duration was not set".to_string()));
        }
        let duration_ms = duration.unsigned_abs();
        let max_duration_ms = u64::try_from(max_duration).ok();
        if let Some(max) = max_duration_ms {
            if max < duration_ms {
                return Err(invalid(format!(
                    "maxDuration {max}ms is shorter than duration {duration_ms}ms"
                )));
            }
        }

        Self::validate_kind(&config.kind).map_err(invalid)?;

        Ok(Self {
            id,
            name: name.to_string(),
            scenario,
            start_time_ms: u64::try_from(start_time).ok(),
            duration_ms,
            max_duration_ms,
            start_after: config.start_after.clone(),
            start_after_strict: config.start_after_strict.clone(),
            terminate_after_strict: config.terminate_after_strict.clone(),
            shared_resources,
            kind: config.kind.clone(),
        })
    }

    fn validate_kind(kind: &PhaseKind) -> Result<(), String> {
        fn require_positive(value: i64, what: &str) -> Result<(), String> {
            if value <= 0 {
                return Err(format!("requires positive number of {what}"));
            }
            Ok(())
        }

        fn require_non_negative(value: f64, what: &str) -> Result<(), String> {
            if !value.is_finite() || value < 0.0 {
                return Err(format!("requires non-negative number of {what}"));
            }
            Ok(())
        }

        fn require_cap(cap: Option<i64>) -> Result<(), String> {
            match cap {
                Some(v) if v <= 0 => Err("maxSessions must be positive when set".to_string()),
                _ => Ok(()),
            }
        }

        match kind {
            PhaseKind::AtOnce { users } | PhaseKind::Always { users } => {
                require_positive(*users, "users")
            }
            PhaseKind::RampPerSec {
                initial_users_per_sec,
                target_users_per_sec,
                max_sessions,
                ..
            } => {
                require_non_negative(*initial_users_per_sec, "initial users per second")?;
                require_non_negative(*target_users_per_sec, "target users per second")?;
                require_cap(*max_sessions)
            }
            PhaseKind::ConstantPerSec {
                users_per_sec,
                max_sessions,
                ..
            } => {
                require_non_negative(*users_per_sec, "users per second")?;
                require_cap(*max_sessions)
            }
            PhaseKind::Sequentially { repeats } => require_positive(*repeats, "repeats"),
            PhaseKind::Noop => Ok(()),
        }
    }

    pub fn id(&self) -> PhaseId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scenario(&self) -> &ScenarioRef {
        &self.scenario
    }

    /// Start offset from run start; `None` = as soon as dependencies allow
    pub fn start_time_ms(&self) -> Option<u64> {
        self.start_time_ms
    }

    /// Window during which new sessions may start
    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    /// Hard limit after which sessions are cancelled; `None` = unbounded
    pub fn max_duration_ms(&self) -> Option<u64> {
        self.max_duration_ms
    }

    /// Phases that must stop admitting sessions before this one starts
    pub fn start_after(&self) -> &[String] {
        &self.start_after
    }

    /// Phases that must have no running sessions before this one starts
    pub fn start_after_strict(&self) -> &[String] {
        &self.start_after_strict
    }

    /// Phases that must terminate before this one may terminate
    pub fn terminate_after_strict(&self) -> &[String] {
        &self.terminate_after_strict
    }

    pub fn shared_resources(&self) -> Option<&str> {
        self.shared_resources.as_deref()
    }

    pub fn kind(&self) -> &PhaseKind {
        &self.kind
    }

    /// Largest number of sessions this phase can hold at once across all agents
    ///
    /// `None` for open phases without a session cap.
    pub fn peak_concurrency(&self, agents: usize) -> Option<u64> {
        let agents = agents as u64;
        match &self.kind {
            PhaseKind::AtOnce { users } | PhaseKind::Always { users } => {
                Some(users.unsigned_abs().saturating_mul(agents))
            }
            PhaseKind::Sequentially { .. } => Some(1),
            PhaseKind::Noop => Some(0),
            PhaseKind::RampPerSec { .. } | PhaseKind::ConstantPerSec { .. } => {
                self.kind.max_sessions()
            }
        }
    }

    /// Human-readable summary of the load model, scaled by `agents`
    ///
    /// Used only for reporting.
    pub fn description(&self, agents: usize) -> String {
        let scale = agents as f64;
        match &self.kind {
            PhaseKind::AtOnce { users } => {
                format!("{} users at once", users.saturating_mul(agents as i64))
            }
            PhaseKind::Always { users } => {
                format!("{} users always", users.saturating_mul(agents as i64))
            }
            PhaseKind::RampPerSec {
                initial_users_per_sec,
                target_users_per_sec,
                ..
            } => format!(
                "{:.2} - {:.2} users per second",
                initial_users_per_sec * scale,
                target_users_per_sec * scale
            ),
            PhaseKind::ConstantPerSec { users_per_sec, .. } => {
                format!("{:.2} users per second", users_per_sec * scale)
            }
            PhaseKind::Sequentially { repeats } => format!("{repeats} times"),
            PhaseKind::Noop => String::new(),
        }
    }
}
