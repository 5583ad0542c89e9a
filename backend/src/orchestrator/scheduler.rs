//! Scheduler - main run loop
//!
//! Drives every phase of a benchmark through its lifecycle on one logical
//! clock. All state transitions happen inside `tick()`; engine events that
//! arrive between ticks are queued and applied at the start of the next one.
//!
//! # Architecture
//!
//! ```text
//! For each tick t:
//! 0. Poll the engine, apply queued engine events, Terminated → Finished
//! 1. Promote NotStarted phases whose start time, gates and pool allow it
//! 2. Running phases: maxDuration check, arrivals, dispatch, admission close
//! 3. Terminating phases: drain completion, drain timeout, terminate gate
//! 4. Run completion / early failure
//! 5. Advance time
//! ```
//!
//! # Example
//!
//! ```rust
//! use phase_scheduler_core::engine::SimulatedEngine;
//! use phase_scheduler_core::models::{Benchmark, PhaseConfig, PhaseKind};
//! use phase_scheduler_core::orchestrator::{RunStatus, Scheduler, SchedulerConfig};
//!
//! let phases = vec![
//!     PhaseConfig::new("warmup", PhaseKind::AtOnce { users: 2 }),
//!     PhaseConfig::new(
//!         "steady",
//!         PhaseKind::ConstantPerSec {
//!             users_per_sec: 20.0,
//!             variance: false,
//!             max_sessions: None,
//!         },
//!     )
//!     .with_duration(500)
//!     .start_after_strict("warmup"),
//! ];
//! let benchmark = Benchmark::new("demo".into(), vec!["agent-1".into()], &phases).unwrap();
//!
//! let mut scheduler = Scheduler::new(benchmark, SchedulerConfig::default(), |events| {
//!     SimulatedEngine::new(events, 50)
//! })
//! .unwrap();
//! scheduler.start().unwrap();
//!
//! assert_eq!(scheduler.run_to_completion(1_000).unwrap(), RunStatus::Completed);
//! assert_eq!(scheduler.runtime_by_name("steady").unwrap().total_started(), 10);
//! ```

use crate::arrivals::{self, ArrivalContext, ArrivalModel, ArrivalSampler};
use crate::core::time::RunClock;
use crate::engine::{event_channel, EngineEvent, ExecutionEngine, EventInbox, EventSender};
use crate::graph::DependencyGraph;
use crate::models::{Benchmark, BenchmarkDefinitionError, Event, EventLog, PhaseId};
use crate::orchestrator::checkpoint::{PhaseSnapshot, RunSnapshot};
use crate::resources::ResourcePools;
use crate::runtime::{DrainMode, PhaseRuntime, PhaseStatus, TransitionError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

// ============================================================================
// Configuration Types
// ============================================================================

/// Run-level settings, independent of the benchmark itself
///
/// # Fields
///
/// * `tick_interval_ms` - Milliseconds of run time per tick (must be > 0)
/// * `rng_seed` - Seed for the Poisson streams of `variance` phases
/// * `drain_timeout_ms` - How long a stopped phase may take to drain
/// * `non_critical_phases` - Phases whose failure does not fail the run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SchedulerConfig {
    pub tick_interval_ms: u64,
    pub rng_seed: u64,
    pub drain_timeout_ms: u64,
    pub non_critical_phases: Vec<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 10,
            rng_seed: 0,
            drain_timeout_ms: 5_000,
            non_critical_phases: Vec::new(),
        }
    }
}

impl SchedulerConfig {
    /// Check the settings against `benchmark`
    pub fn validate(&self, benchmark: &Benchmark) -> Result<(), BenchmarkDefinitionError> {
        if self.tick_interval_ms == 0 {
            return Err(BenchmarkDefinitionError::InvalidSchedulerConfig(
                "tick_interval_ms must be positive".to_string(),
            ));
        }
        if let Some(unknown) = self
            .non_critical_phases
            .iter()
            .find(|name| benchmark.phase_by_name(name).is_none())
        {
            return Err(BenchmarkDefinitionError::InvalidSchedulerConfig(format!(
                "non-critical phase '{}' does not exist",
                unknown
            )));
        }
        Ok(())
    }
}

/// Overall status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// Built, `start()` not called yet
    Pending,
    Running,
    /// `stop()` called, live phases draining
    Stopping,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_over(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

/// Result of a single tick execution
#[derive(Debug, Clone, PartialEq)]
pub struct TickResult {
    /// Tick number
    pub tick: u64,

    /// Run time at which the tick was evaluated
    pub elapsed_ms: u64,

    /// Sessions requested from the engine this tick
    pub sessions_started: u64,

    /// Arrivals suppressed by session caps or full pools this tick
    pub sessions_backlogged: u64,

    /// Engine events applied this tick
    pub engine_events: usize,

    /// Run status after the tick
    pub run_status: RunStatus,
}

/// Run-level misuse of the scheduler
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SchedulerError {
    #[error(transparent)]
    Definition(#[from] BenchmarkDefinitionError),

    #[error("Run has not been started")]
    NotStarted,

    #[error("Run is already over ({0:?})")]
    RunOver(RunStatus),

    #[error("Unknown phase: {0}")]
    UnknownPhase(String),

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

// ============================================================================
// Scheduler
// ============================================================================

/// Phase scheduler for one run of one benchmark
pub struct Scheduler<E: ExecutionEngine> {
    run_id: Uuid,
    benchmark: Benchmark,
    config: SchedulerConfig,
    graph: DependencyGraph,
    pools: ResourcePools,
    /// Indexed by phase id
    critical: Vec<bool>,
    runtimes: Vec<PhaseRuntime>,
    models: Vec<ArrivalModel>,
    clock: RunClock,
    engine: E,
    sender: EventSender,
    inbox: EventInbox,
    event_log: EventLog,
    status: RunStatus,
    failure: Option<String>,
}

impl<E: ExecutionEngine> Scheduler<E> {
    /// Build a scheduler; every configuration error surfaces here
    ///
    /// `engine` receives the sender half of the event channel so it can
    /// report session completions back to this scheduler.
    ///
    /// # Errors
    ///
    /// `SchedulerError::Definition` for unknown dependencies, cycles,
    /// ambiguous shared pools or invalid scheduler settings.
    pub fn new(
        benchmark: Benchmark,
        config: SchedulerConfig,
        engine: impl FnOnce(EventSender) -> E,
    ) -> Result<Self, SchedulerError> {
        config.validate(&benchmark)?;
        let graph = DependencyGraph::build(&benchmark)?;
        let pools = ResourcePools::reserve(&benchmark)?;

        let agents = benchmark.agent_count();
        let runtimes = benchmark
            .phases()
            .iter()
            .map(|p| PhaseRuntime::new(p.id(), agents))
            .collect();
        let models = benchmark
            .phases()
            .iter()
            .map(|p| ArrivalModel::for_phase(p, config.rng_seed))
            .collect();
        let critical = benchmark
            .phases()
            .iter()
            .map(|p| !config.non_critical_phases.iter().any(|n| n == p.name()))
            .collect();

        let (sender, inbox) = event_channel();
        let engine = engine(sender.clone());

        Ok(Self {
            run_id: Uuid::new_v4(),
            clock: RunClock::new(config.tick_interval_ms),
            benchmark,
            config,
            graph,
            pools,
            critical,
            runtimes,
            models,
            engine,
            sender,
            inbox,
            event_log: EventLog::new(),
            status: RunStatus::Pending,
            failure: None,
        })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn benchmark(&self) -> &Benchmark {
        &self.benchmark
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    /// Why the run failed, if it did
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn current_tick(&self) -> u64 {
        self.clock.current_tick()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.clock.elapsed_ms()
    }

    pub fn runtimes(&self) -> &[PhaseRuntime] {
        &self.runtimes
    }

    pub fn runtime(&self, phase: PhaseId) -> Option<&PhaseRuntime> {
        self.runtimes.get(phase.0)
    }

    pub fn runtime_by_name(&self, name: &str) -> Result<&PhaseRuntime, SchedulerError> {
        self.benchmark
            .phase_by_name(name)
            .and_then(|p| self.runtimes.get(p.id().0))
            .ok_or_else(|| SchedulerError::UnknownPhase(name.to_string()))
    }

    pub fn event_log(&self) -> &EventLog {
        &self.event_log
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    /// Another handle for reporting engine events (e.g. one per agent thread)
    pub fn event_sender(&self) -> EventSender {
        self.sender.clone()
    }

    /// Replace the arrival sampler of a phase before the run starts
    pub fn set_sampler(
        &mut self,
        phase: &str,
        sampler: Box<dyn ArrivalSampler>,
    ) -> Result<(), SchedulerError> {
        let id = self
            .benchmark
            .phase_by_name(phase)
            .map(|p| p.id())
            .ok_or_else(|| SchedulerError::UnknownPhase(phase.to_string()))?;
        self.models[id.0] = ArrivalModel::with_sampler(sampler);
        Ok(())
    }

    // ========================================================================
    // Control surface
    // ========================================================================

    /// Mark the run as running; the first phases start on the next `tick()`
    pub fn start(&mut self) -> Result<Uuid, SchedulerError> {
        if self.status != RunStatus::Pending {
            return Err(SchedulerError::RunOver(self.status));
        }
        self.status = RunStatus::Running;
        info!(
            run_id = %self.run_id,
            benchmark = self.benchmark.name(),
            phases = self.runtimes.len(),
            agents = self.benchmark.agent_count(),
            "Run started"
        );
        Ok(self.run_id)
    }

    /// Stop every live phase and let them drain cooperatively
    ///
    /// Phases that never started stay NotStarted. Phases that do not drain
    /// within `drain_timeout_ms` fail. The run ends `Cancelled`.
    pub fn stop(&mut self) -> Result<(), SchedulerError> {
        match self.status {
            RunStatus::Running => {}
            RunStatus::Pending => return Err(SchedulerError::NotStarted),
            other => return Err(SchedulerError::RunOver(other)),
        }
        let tick = self.clock.current_tick();
        let now = self.clock.elapsed_ms();
        let mode = DrainMode::Cancelled {
            requested_at_ms: now,
        };

        for idx in 0..self.runtimes.len() {
            match self.runtimes[idx].status() {
                PhaseStatus::Running => {
                    self.runtimes[idx].begin_termination(mode)?;
                    self.event_log.log(Event::PhaseTerminating {
                        tick,
                        phase: PhaseId(idx),
                        forced: true,
                    });
                }
                PhaseStatus::Terminating => self.runtimes[idx].escalate_drain(mode),
                _ => continue,
            }
            self.stop_on_all_agents(PhaseId(idx));
        }

        self.status = RunStatus::Stopping;
        info!(run_id = %self.run_id, elapsed_ms = now, "Run stop requested");
        Ok(())
    }

    /// Point-in-time status of the run and every phase
    pub fn snapshot(&self) -> RunSnapshot {
        let agents = self.benchmark.agent_count();
        let phases = self
            .benchmark
            .phases()
            .iter()
            .zip(&self.runtimes)
            .map(|(def, rt)| PhaseSnapshot::capture(def, rt, agents, self.clock.elapsed_ms()))
            .collect();
        RunSnapshot {
            run_id: self.run_id,
            benchmark: self.benchmark.name().to_string(),
            status: self.status,
            failure: self.failure.clone(),
            tick: self.clock.current_tick(),
            elapsed_ms: self.clock.elapsed_ms(),
            phases,
            config_fingerprint: self.benchmark.fingerprint().to_string(),
        }
    }

    /// Tick until the run is over or `max_ticks` more ticks have run
    pub fn run_to_completion(&mut self, max_ticks: u64) -> Result<RunStatus, SchedulerError> {
        for _ in 0..max_ticks {
            if self.tick()?.run_status.is_over() {
                break;
            }
        }
        Ok(self.status)
    }

    // ========================================================================
    // Main Tick Loop
    // ========================================================================

    /// Execute one tick
    pub fn tick(&mut self) -> Result<TickResult, SchedulerError> {
        match self.status {
            RunStatus::Running | RunStatus::Stopping => {}
            RunStatus::Pending => return Err(SchedulerError::NotStarted),
            other => return Err(SchedulerError::RunOver(other)),
        }

        let tick = self.clock.current_tick();
        let now = self.clock.elapsed_ms();

        // STEP 0: ENGINE EVENTS
        self.engine.poll(now);
        let engine_events = self.apply_engine_events(tick);
        self.finish_terminated(tick)?;

        // STEP 1: PROMOTION
        if self.status == RunStatus::Running {
            self.promote_ready(tick, now)?;
        }

        // STEP 2: ARRIVALS AND DISPATCH
        let (sessions_started, sessions_backlogged) = self.advance_running(tick, now)?;

        // STEP 3: DRAIN
        self.advance_terminating(tick, now)?;

        // STEP 4: RUN OUTCOME
        self.check_run_outcome(tick);

        // STEP 5: ADVANCE TIME
        self.clock.advance_tick();

        Ok(TickResult {
            tick,
            elapsed_ms: now,
            sessions_started,
            sessions_backlogged,
            engine_events,
            run_status: self.status,
        })
    }

    fn apply_engine_events(&mut self, tick: u64) -> usize {
        let events = self.inbox.drain();
        let count = events.len();

        for event in events {
            let phase = event.phase();
            let Some(rt) = self.runtimes.get_mut(phase.0) else {
                warn!(phase = %phase, ?event, "Engine event for unknown phase ignored");
                continue;
            };
            match event {
                EngineEvent::SessionFinished { agent, .. } => {
                    if !rt.record_finished(agent) {
                        debug!(phase = %phase, agent, "Ignoring late session acknowledgment");
                    }
                }
                EngineEvent::SessionFailed { agent, cause, .. } => {
                    if rt.record_failed(agent) {
                        warn!(phase = %phase, agent, cause = %cause, "Session failed");
                        self.event_log.log(Event::SessionFailed {
                            tick,
                            phase,
                            agent,
                            cause,
                        });
                    } else {
                        debug!(phase = %phase, agent, "Ignoring late session failure");
                    }
                }
                EngineEvent::AgentUnreachable { agent, cause, .. } => {
                    let agent_name = self
                        .benchmark
                        .agents()
                        .get(agent)
                        .cloned()
                        .unwrap_or_else(|| agent.to_string());
                    self.fail_phase(
                        tick,
                        phase,
                        format!("agent '{}' unreachable: {}", agent_name, cause),
                    );
                }
            }
        }

        for idx in 0..self.runtimes.len() {
            self.sync_pool(PhaseId(idx));
        }
        count
    }

    fn finish_terminated(&mut self, tick: u64) -> Result<(), SchedulerError> {
        for rt in &mut self.runtimes {
            if rt.status() != PhaseStatus::Terminated {
                continue;
            }
            rt.finish()?;
            let phase = rt.phase();
            info!(
                phase = %phase,
                started = rt.total_started(),
                finished = rt.total_finished(),
                failed = rt.total_failed(),
                "Phase finished"
            );
            self.event_log.log(Event::PhaseFinished {
                tick,
                phase,
                started: rt.total_started(),
                finished: rt.total_finished(),
                failed: rt.total_failed(),
            });
        }
        Ok(())
    }

    fn promote_ready(&mut self, tick: u64, now: u64) -> Result<(), SchedulerError> {
        for idx in 0..self.runtimes.len() {
            if self.runtimes[idx].status() != PhaseStatus::NotStarted {
                continue;
            }
            let phase = PhaseId(idx);
            let def = &self.benchmark.phases()[idx];

            if def.start_time_ms().is_some_and(|at| now < at) {
                continue;
            }
            if !self.graph.can_start(phase, &self.runtimes) {
                continue;
            }
            if let Some(tag) = def.shared_resources() {
                if !self.pools.try_acquire(tag, phase) {
                    debug!(phase = def.name(), tag, "Waiting for shared pool");
                    continue;
                }
            }

            self.runtimes[idx].start(now)?;
            info!(
                phase = def.name(),
                kind = def.kind().name(),
                start_ms = now,
                "Phase started: {}",
                def.description(self.benchmark.agent_count())
            );
            self.event_log.log(Event::PhaseStarted {
                tick,
                phase,
                name: def.name().to_string(),
                start_ms: now,
            });
        }
        Ok(())
    }

    /// Returns (sessions started, arrivals backlogged)
    fn advance_running(&mut self, tick: u64, now: u64) -> Result<(u64, u64), SchedulerError> {
        let ctx = ArrivalContext {
            agents: self.benchmark.agent_count(),
        };
        let mut started = 0;
        let mut backlogged = 0;

        for idx in 0..self.runtimes.len() {
            if self.runtimes[idx].status() != PhaseStatus::Running {
                continue;
            }
            let phase = PhaseId(idx);
            let elapsed = self.runtimes[idx].elapsed_ms(now);

            // At exactly `duration` the last arrival window is still owed; the
            // drain step below force-terminates in this same tick.
            if self.max_duration_reached(phase, elapsed)
                && elapsed > self.benchmark.phases()[idx].duration_ms()
            {
                self.force_terminate(tick, phase)?;
                continue;
            }

            let def = &self.benchmark.phases()[idx];
            let slot_limit = def
                .shared_resources()
                .map(|tag| self.pools.available(tag, phase));
            let decision =
                self.models[idx].evaluate(def, &self.runtimes[idx], ctx, elapsed, slot_limit);

            let mut dispatch_error = None;
            for (agent, &count) in decision.per_agent.iter().enumerate() {
                if count == 0 {
                    continue;
                }
                if let Err(e) = self.engine.start_sessions(phase, agent, count) {
                    dispatch_error = Some(e.to_string());
                    break;
                }
                self.runtimes[idx].record_started(agent, count);
                started += count;
                debug!(phase = def.name(), agent, count, "Sessions dispatched");
                self.event_log.log(Event::SessionsDispatched {
                    tick,
                    phase,
                    agent,
                    count,
                });
            }

            if decision.backlogged > 0 {
                let rt = &mut self.runtimes[idx];
                rt.record_backlogged(decision.backlogged);
                backlogged += decision.backlogged;
                let max_sessions = def
                    .kind()
                    .max_sessions()
                    .or_else(|| def.shared_resources().and_then(|t| self.pools.capacity(t)))
                    .unwrap_or(0);
                warn!(
                    phase = def.name(),
                    suppressed = decision.backlogged,
                    active = rt.active_sessions(),
                    max_sessions,
                    "Session limit reached, arrivals backlogged"
                );
                self.event_log.log(Event::SessionsBacklogged {
                    tick,
                    phase,
                    suppressed: decision.backlogged,
                    active: rt.active_sessions(),
                    max_sessions,
                });
            }

            if let Some(reason) = dispatch_error {
                self.fail_phase(tick, phase, reason);
                continue;
            }
            self.sync_pool(phase);

            let def = &self.benchmark.phases()[idx];
            if arrivals::admission_closed(def, &self.runtimes[idx], elapsed) {
                self.runtimes[idx].begin_termination(DrainMode::Natural)?;
                info!(
                    phase = def.name(),
                    active = self.runtimes[idx].active_sessions(),
                    "Phase terminating"
                );
                self.event_log.log(Event::PhaseTerminating {
                    tick,
                    phase,
                    forced: false,
                });
            }
        }

        Ok((started, backlogged))
    }

    fn advance_terminating(&mut self, tick: u64, now: u64) -> Result<(), SchedulerError> {
        for idx in 0..self.runtimes.len() {
            if self.runtimes[idx].status() != PhaseStatus::Terminating {
                continue;
            }
            let phase = PhaseId(idx);
            let rt = &self.runtimes[idx];
            let elapsed = rt.elapsed_ms(now);

            if self.max_duration_reached(phase, elapsed) {
                self.force_terminate(tick, phase)?;
                continue;
            }

            let cancelled_at = match rt.drain_mode() {
                Some(DrainMode::Cancelled { requested_at_ms }) => Some(requested_at_ms),
                _ => None,
            };
            let gate_open = if cancelled_at.is_some() {
                self.graph.can_terminate_on_stop(phase, &self.runtimes)
            } else {
                self.graph.can_terminate(phase, &self.runtimes)
            };
            let drained = rt.active_sessions() == 0 && gate_open;

            if let Some(requested_at_ms) = cancelled_at {
                if !drained && now.saturating_sub(requested_at_ms) >= self.config.drain_timeout_ms
                {
                    let reason = if rt.active_sessions() > 0 {
                        format!(
                            "{} sessions still active {}ms after stop",
                            rt.active_sessions(),
                            self.config.drain_timeout_ms
                        )
                    } else {
                        format!(
                            "terminateAfterStrict phases still running {}ms after stop",
                            self.config.drain_timeout_ms
                        )
                    };
                    self.fail_phase(tick, phase, reason);
                    continue;
                }
            }

            if drained {
                self.runtimes[idx].terminate()?;
                self.release_pool(phase);
                info!(phase = self.benchmark.phases()[idx].name(), "Phase terminated");
                self.event_log.log(Event::PhaseTerminated {
                    tick,
                    phase,
                    cancelled: 0,
                });
            }
        }
        Ok(())
    }

    fn check_run_outcome(&mut self, tick: u64) {
        if self.status.is_over() {
            return;
        }

        let critical_failure = self
            .runtimes
            .iter()
            .zip(&self.critical)
            .find(|(rt, critical)| **critical && rt.status() == PhaseStatus::Failed)
            .map(|(rt, _)| {
                format!(
                    "phase '{}' failed: {}",
                    self.benchmark.phases()[rt.phase().0].name(),
                    rt.failure().unwrap_or("unknown cause")
                )
            });
        if let Some(reason) = critical_failure {
            self.abort(tick, reason);
            return;
        }

        match self.status {
            RunStatus::Running if self.runtimes.iter().all(|rt| rt.status().is_terminal()) => {
                self.status = RunStatus::Completed;
                info!(run_id = %self.run_id, tick, elapsed_ms = self.clock.elapsed_ms(), "Run completed");
                self.event_log.log(Event::RunCompleted { tick });
            }
            RunStatus::Stopping
                if self.runtimes.iter().all(|rt| {
                    rt.status().is_terminal() || rt.status() == PhaseStatus::NotStarted
                }) =>
            {
                self.status = RunStatus::Cancelled;
                info!(run_id = %self.run_id, tick, "Run cancelled");
                self.event_log.log(Event::RunCancelled { tick });
            }
            _ => {}
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn max_duration_reached(&self, phase: PhaseId, elapsed: u64) -> bool {
        self.benchmark.phases()[phase.0]
            .max_duration_ms()
            .is_some_and(|max| elapsed >= max)
    }

    /// maxDuration elapsed: cancel everything and go straight to Terminated
    ///
    /// The terminate gate is not consulted; maxDuration is a hard bound.
    fn force_terminate(&mut self, tick: u64, phase: PhaseId) -> Result<(), SchedulerError> {
        let rt = &mut self.runtimes[phase.0];
        if rt.status() == PhaseStatus::Running {
            rt.begin_termination(DrainMode::Forced)?;
            self.event_log.log(Event::PhaseTerminating {
                tick,
                phase,
                forced: true,
            });
        } else {
            rt.escalate_drain(DrainMode::Forced);
        }

        self.stop_on_all_agents(phase);
        let cancelled = self.runtimes[phase.0].cancel_all();
        self.runtimes[phase.0].terminate()?;
        self.release_pool(phase);

        warn!(
            phase = self.benchmark.phases()[phase.0].name(),
            cancelled, "Max duration reached, phase force-terminated"
        );
        self.event_log.log(Event::PhaseTerminated {
            tick,
            phase,
            cancelled,
        });
        Ok(())
    }

    /// Move `phase` to Failed from any live state
    fn fail_phase(&mut self, tick: u64, phase: PhaseId, reason: String) {
        let status = self.runtimes[phase.0].status();
        if status.is_terminal() {
            return;
        }
        if matches!(status, PhaseStatus::Running | PhaseStatus::Terminating) {
            self.stop_on_all_agents(phase);
        }
        let rt = &mut self.runtimes[phase.0];
        rt.cancel_all();
        if rt.fail(reason.clone()).is_err() {
            return;
        }
        self.release_pool(phase);

        error!(
            phase = self.benchmark.phases()[phase.0].name(),
            reason = %reason,
            "Phase failed"
        );
        self.event_log.log(Event::PhaseFailed {
            tick,
            phase,
            reason,
        });
    }

    /// Fail the run: every live phase is stopped and failed
    fn abort(&mut self, tick: u64, reason: String) {
        for idx in 0..self.runtimes.len() {
            if matches!(
                self.runtimes[idx].status(),
                PhaseStatus::Running | PhaseStatus::Terminating
            ) {
                self.fail_phase(tick, PhaseId(idx), format!("run aborted: {}", reason));
            }
        }
        self.status = RunStatus::Failed;
        error!(run_id = %self.run_id, tick, reason = %reason, "Run failed");
        self.event_log.log(Event::RunFailed {
            tick,
            reason: reason.clone(),
        });
        self.failure = Some(reason);
    }

    /// Fire-and-forget stop on every agent
    fn stop_on_all_agents(&mut self, phase: PhaseId) {
        for agent in 0..self.benchmark.agent_count() {
            if let Err(e) = self.engine.stop_phase(phase, agent) {
                warn!(phase = %phase, agent, error = %e, "Stop request failed");
            }
        }
    }

    fn sync_pool(&mut self, phase: PhaseId) {
        let rt = &self.runtimes[phase.0];
        if let Some(tag) = self.benchmark.phases()[phase.0].shared_resources() {
            self.pools.sync_usage(tag, phase, rt.active_sessions());
        }
    }

    fn release_pool(&mut self, phase: PhaseId) {
        if let Some(tag) = self.benchmark.phases()[phase.0].shared_resources() {
            self.pools.release(tag, phase);
        }
    }
}
