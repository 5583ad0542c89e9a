//! Session arrival models.
//!
//! Evaluated once per scheduler tick for every Running phase, this module
//! decides how many new sessions each agent should start.
//!
//! # Key Principles
//!
//! 1. **Closed models** (atOnce, always, sequentially) hold concurrency at a
//!    target: the request is `target - active`, never negative.
//! 2. **Open models** (rampPerSec, constantPerSec) follow a rate. The
//!    cumulative expectation `E(t) = agents * ∫ r(s) ds` is computed in closed
//!    form, and each tick converts `E(t) - E(t_prev)` into a whole count with
//!    a pluggable `ArrivalSampler`.
//! 3. **Apportioning** splits a global count across agents so that every
//!    agent gets `⌊N/k⌋` or `⌈N/k⌉` and the parts sum to exactly `N`.
//! 4. **Determinism**: the variance sampler draws from a seeded stream, so the
//!    same seed and tick schedule reproduce the same arrivals.
//!
//! # Example
//!
//! ```
//! use phase_scheduler_core::arrivals::{apportion, cumulative_arrivals};
//! use phase_scheduler_core::models::PhaseKind;
//!
//! let ramp = PhaseKind::RampPerSec {
//!     initial_users_per_sec: 0.0,
//!     target_users_per_sec: 10.0,
//!     variance: false,
//!     max_sessions: None,
//! };
//! // Area under the ramp over 4s with one agent: (0 + 10) / 2 * 4
//! assert!((cumulative_arrivals(&ramp, 4000, 4000, 1) - 20.0).abs() < 1e-9);
//!
//! assert_eq!(apportion(7, 3, 0), vec![3, 2, 2]);
//! ```

use crate::models::{PhaseDefinition, PhaseKind};
use crate::rng::RngManager;
use crate::runtime::PhaseRuntime;

/// Guards floor() against values like 2.9999999999 that should be 3
const ROUNDING_EPSILON: f64 = 1e-9;

// ============================================================================
// Samplers
// ============================================================================

/// Converts a per-tick arrival expectation into a whole number of sessions
pub trait ArrivalSampler: Send {
    fn sample(&mut self, expected: f64) -> u64;
}

/// Rounds deterministically, carrying the fractional part to the next tick
///
/// Cumulative output equals `floor` of the cumulative expectation, so there is
/// no systematic under- or over-generation.
#[derive(Debug, Clone, Default)]
pub struct DeterministicSampler {
    carry: f64,
}

impl DeterministicSampler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ArrivalSampler for DeterministicSampler {
    fn sample(&mut self, expected: f64) -> u64 {
        if !expected.is_finite() || expected <= 0.0 {
            return 0;
        }
        let total = self.carry + expected;
        let whole = (total + ROUNDING_EPSILON).floor();
        self.carry = (total - whole).max(0.0);
        whole as u64
    }
}

/// Draws Poisson counts whose mean is the tick expectation
#[derive(Debug, Clone)]
pub struct PoissonSampler {
    rng: RngManager,
}

impl PoissonSampler {
    pub fn new(rng: RngManager) -> Self {
        Self { rng }
    }
}

impl ArrivalSampler for PoissonSampler {
    fn sample(&mut self, expected: f64) -> u64 {
        self.rng.poisson(expected)
    }
}

// ============================================================================
// Pure functions
// ============================================================================

/// Cumulative expected arrivals across `agents` after `elapsed_ms`
///
/// Time is clamped to the admission window. Closed kinds return zero.
pub fn cumulative_arrivals(kind: &PhaseKind, duration_ms: u64, elapsed_ms: u64, agents: usize) -> f64 {
    let t = elapsed_ms.min(duration_ms) as f64;
    let agents = agents as f64;
    match kind {
        PhaseKind::ConstantPerSec { users_per_sec, .. } => agents * users_per_sec * t / 1000.0,
        PhaseKind::RampPerSec {
            initial_users_per_sec,
            target_users_per_sec,
            ..
        } => {
            if duration_ms == 0 {
                return 0.0;
            }
            let d = duration_ms as f64;
            let slope = (target_users_per_sec - initial_users_per_sec) / d;
            agents * (initial_users_per_sec * t + slope * t * t / 2.0) / 1000.0
        }
        _ => 0.0,
    }
}

/// Instantaneous per-agent rate (users/s) at `elapsed_ms`
pub fn rate_at(kind: &PhaseKind, duration_ms: u64, elapsed_ms: u64) -> f64 {
    match kind {
        PhaseKind::ConstantPerSec { users_per_sec, .. } => *users_per_sec,
        PhaseKind::RampPerSec {
            initial_users_per_sec,
            target_users_per_sec,
            ..
        } => {
            if duration_ms == 0 {
                return *target_users_per_sec;
            }
            let fraction = elapsed_ms.min(duration_ms) as f64 / duration_ms as f64;
            initial_users_per_sec + (target_users_per_sec - initial_users_per_sec) * fraction
        }
        _ => 0.0,
    }
}

/// Split `total` across `agents`
///
/// Each agent receives `⌊total/agents⌋`; the remainder goes one unit each to
/// consecutive agents starting at `cursor` (wrapping).
///
/// # Example
/// ```
/// use phase_scheduler_core::arrivals::apportion;
///
/// assert_eq!(apportion(5, 4, 3), vec![1, 1, 1, 2]);
/// assert_eq!(apportion(6, 4, 3), vec![2, 1, 1, 2]);
/// assert!(apportion(3, 0, 0).is_empty());
/// ```
pub fn apportion(total: u64, agents: usize, cursor: usize) -> Vec<u64> {
    if agents == 0 {
        return Vec::new();
    }
    let k = agents as u64;
    let base = total / k;
    let remainder = (total % k) as usize;
    (0..agents)
        .map(|i| {
            let offset = (i + agents - cursor % agents) % agents;
            if offset < remainder {
                base + 1
            } else {
                base
            }
        })
        .collect()
}

/// Per-agent requests of a closed model
///
/// Open kinds and Noop request nothing here.
pub fn closed_deltas(kind: &PhaseKind, runtime: &PhaseRuntime) -> Vec<u64> {
    let active = runtime.active_per_agent();
    let started = runtime.started_per_agent();
    match kind {
        PhaseKind::AtOnce { users } => {
            let users = users.unsigned_abs();
            started.iter().map(|s| users.saturating_sub(*s)).collect()
        }
        PhaseKind::Always { users } => {
            let users = users.unsigned_abs();
            active.iter().map(|a| users.saturating_sub(*a)).collect()
        }
        PhaseKind::Sequentially { repeats } => {
            let mut deltas = vec![0; active.len()];
            if let Some(first) = deltas.first_mut() {
                if runtime.total_started() < repeats.unsigned_abs() && active[0] == 0 {
                    *first = 1;
                }
            }
            deltas
        }
        _ => vec![0; active.len()],
    }
}

/// Whether `phase` has stopped admitting new sessions
///
/// Every kind closes once `elapsed >= duration`. Count-bounded kinds also
/// close once their count is used up.
pub fn admission_closed(phase: &PhaseDefinition, runtime: &PhaseRuntime, elapsed_ms: u64) -> bool {
    let window_over = elapsed_ms >= phase.duration_ms();
    match phase.kind() {
        PhaseKind::Noop => true,
        PhaseKind::AtOnce { users } => {
            window_over
                || runtime
                    .started_per_agent()
                    .iter()
                    .all(|s| *s >= users.unsigned_abs())
        }
        PhaseKind::Sequentially { repeats } => {
            runtime.total_started() >= repeats.unsigned_abs()
                || (phase.duration_ms() > 0 && window_over)
        }
        _ => window_over,
    }
}

/// Trim `deltas` from the last agent backwards until they sum to at most `limit`
fn clamp_total(deltas: &mut [u64], limit: u64) -> u64 {
    let mut excess = deltas.iter().sum::<u64>().saturating_sub(limit);
    let trimmed = excess;
    for d in deltas.iter_mut().rev() {
        if excess == 0 {
            break;
        }
        let cut = (*d).min(excess);
        *d -= cut;
        excess -= cut;
    }
    trimmed
}

// ============================================================================
// Stateful per-phase model
// ============================================================================

/// Outcome of one arrival evaluation
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ArrivalDecision {
    /// Sessions to start, indexed by agent
    pub per_agent: Vec<u64>,
    /// Arrivals suppressed by the session cap or a full shared pool
    pub backlogged: u64,
}

impl ArrivalDecision {
    pub fn total(&self) -> u64 {
        self.per_agent.iter().sum()
    }
}

/// Read-only context shared by all arrival evaluations of a run
#[derive(Debug, Clone, Copy)]
pub struct ArrivalContext {
    pub agents: usize,
}

/// Arrival state of one phase: its sampler, last evaluated time and
/// apportioning cursor
pub struct ArrivalModel {
    sampler: Box<dyn ArrivalSampler>,
    last_elapsed_ms: u64,
    cursor: usize,
}

impl ArrivalModel {
    /// Model for `phase`, choosing the sampler from its `variance` flag
    ///
    /// The variance stream is derived from `seed` and the phase id.
    pub fn for_phase(phase: &PhaseDefinition, seed: u64) -> Self {
        let sampler: Box<dyn ArrivalSampler> = if phase.kind().variance() {
            Box::new(PoissonSampler::new(RngManager::for_stream(
                seed,
                phase.id().0 as u64,
            )))
        } else {
            Box::new(DeterministicSampler::new())
        };
        Self::with_sampler(sampler)
    }

    pub fn with_sampler(sampler: Box<dyn ArrivalSampler>) -> Self {
        Self {
            sampler,
            last_elapsed_ms: 0,
            cursor: 0,
        }
    }

    /// Sessions to start now
    ///
    /// # Arguments
    ///
    /// * `elapsed_ms` - Time since the phase started
    /// * `slot_limit` - Free slots of the phase's shared pool, if it has one
    pub fn evaluate(
        &mut self,
        phase: &PhaseDefinition,
        runtime: &PhaseRuntime,
        ctx: ArrivalContext,
        elapsed_ms: u64,
        slot_limit: Option<u64>,
    ) -> ArrivalDecision {
        let kind = phase.kind();
        if !kind.is_open() {
            let mut per_agent = closed_deltas(kind, runtime);
            if let Some(limit) = slot_limit {
                clamp_total(&mut per_agent, limit);
            }
            return ArrivalDecision {
                per_agent,
                backlogged: 0,
            };
        }

        let now = elapsed_ms.min(phase.duration_ms());
        let expected = cumulative_arrivals(kind, phase.duration_ms(), now, ctx.agents)
            - cumulative_arrivals(kind, phase.duration_ms(), self.last_elapsed_ms, ctx.agents);
        self.last_elapsed_ms = self.last_elapsed_ms.max(now);

        let mut wanted = self.sampler.sample(expected);
        let mut backlogged = 0;

        let cap_room = kind
            .max_sessions()
            .map(|cap| cap.saturating_sub(runtime.active_sessions()));
        let room = match (cap_room, slot_limit) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        if let Some(room) = room {
            if wanted > room {
                backlogged = wanted - room;
                wanted = room;
            }
        }

        let per_agent = apportion(wanted, ctx.agents, self.cursor);
        if ctx.agents > 0 {
            self.cursor = (self.cursor + (wanted % ctx.agents as u64) as usize) % ctx.agents;
        }
        ArrivalDecision {
            per_agent,
            backlogged,
        }
    }
}
