//! Phase runtime state machine
//!
//! One `PhaseRuntime` exists per phase per run. It holds the phase status,
//! the resolved start time and the session counters. Only the scheduler loop
//! mutates it; the dependency graph and reporting read it.
//!
//! # Transitions
//!
//! ```text
//! NotStarted ──► Running ──► Terminating ──► Terminated ──► Finished
//!      │            │             │               │
//!      └────────────┴─────────────┴───────────────┴──► Failed
//! ```
//!
//! Every transition method checks the source state and returns
//! `TransitionError` instead of silently moving from an unexpected state.

use crate::models::PhaseId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle status of a phase instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhaseStatus {
    NotStarted,
    Running,
    Terminating,
    Terminated,
    /// Success terminal
    Finished,
    /// Error terminal
    Failed,
}

impl PhaseStatus {
    /// The phase no longer admits new sessions
    pub fn is_admission_closed(self) -> bool {
        matches!(
            self,
            PhaseStatus::Terminating
                | PhaseStatus::Terminated
                | PhaseStatus::Finished
                | PhaseStatus::Failed
        )
    }

    /// The phase has no more running sessions (FAILED included)
    pub fn is_terminated(self) -> bool {
        matches!(
            self,
            PhaseStatus::Terminated | PhaseStatus::Finished | PhaseStatus::Failed
        )
    }

    /// No further transitions are possible
    pub fn is_terminal(self) -> bool {
        matches!(self, PhaseStatus::Finished | PhaseStatus::Failed)
    }
}

/// Attempted transition from a state that does not allow it
#[derive(Debug, Clone, Error, PartialEq)]
#[error("Phase {phase}: cannot move from {from:?} to {to:?}")]
pub struct TransitionError {
    pub phase: PhaseId,
    pub from: PhaseStatus,
    pub to: PhaseStatus,
}

/// Why a phase stopped admitting sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DrainMode {
    /// Admission window closed, sessions finish naturally
    Natural,
    /// `maxDuration` elapsed, sessions are cancelled
    Forced,
    /// Run stop requested, engine told to stop and drain is polled
    Cancelled { requested_at_ms: u64 },
}

/// Mutable state of one phase during a run
#[derive(Debug, Clone)]
pub struct PhaseRuntime {
    phase: PhaseId,
    status: PhaseStatus,
    absolute_start_ms: Option<u64>,
    drain: Option<DrainMode>,
    /// Active sessions per agent index
    active: Vec<u64>,
    /// Sessions started per agent index
    started_per_agent: Vec<u64>,
    total_started: u64,
    total_finished: u64,
    total_failed: u64,
    total_cancelled: u64,
    total_backlogged: u64,
    /// Acknowledgments received for sessions that were no longer counted
    ignored_acks: u64,
    failure: Option<String>,
}

impl PhaseRuntime {
    pub fn new(phase: PhaseId, agents: usize) -> Self {
        Self {
            phase,
            status: PhaseStatus::NotStarted,
            absolute_start_ms: None,
            drain: None,
            active: vec![0; agents],
            started_per_agent: vec![0; agents],
            total_started: 0,
            total_finished: 0,
            total_failed: 0,
            total_cancelled: 0,
            total_backlogged: 0,
            ignored_acks: 0,
            failure: None,
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn phase(&self) -> PhaseId {
        self.phase
    }

    pub fn status(&self) -> PhaseStatus {
        self.status
    }

    pub fn absolute_start_ms(&self) -> Option<u64> {
        self.absolute_start_ms
    }

    pub fn drain_mode(&self) -> Option<DrainMode> {
        self.drain
    }

    /// Milliseconds since this phase started (zero before it starts)
    pub fn elapsed_ms(&self, now_ms: u64) -> u64 {
        self.absolute_start_ms
            .map(|start| now_ms.saturating_sub(start))
            .unwrap_or(0)
    }

    /// Active sessions per agent
    pub fn active_per_agent(&self) -> &[u64] {
        &self.active
    }

    /// Sessions started per agent
    pub fn started_per_agent(&self) -> &[u64] {
        &self.started_per_agent
    }

    pub fn active_sessions(&self) -> u64 {
        self.active.iter().sum()
    }

    pub fn total_started(&self) -> u64 {
        self.total_started
    }

    pub fn total_finished(&self) -> u64 {
        self.total_finished
    }

    pub fn total_failed(&self) -> u64 {
        self.total_failed
    }

    pub fn total_cancelled(&self) -> u64 {
        self.total_cancelled
    }

    pub fn total_backlogged(&self) -> u64 {
        self.total_backlogged
    }

    pub fn ignored_acks(&self) -> u64 {
        self.ignored_acks
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    // ========================================================================
    // Session accounting
    // ========================================================================

    /// Record `count` sessions dispatched to `agent`
    pub fn record_started(&mut self, agent: usize, count: u64) {
        if let Some(active) = self.active.get_mut(agent) {
            *active += count;
            self.started_per_agent[agent] += count;
            self.total_started += count;
        }
    }

    pub fn record_backlogged(&mut self, count: u64) {
        self.total_backlogged += count;
    }

    /// Apply a session completion; returns false if there was nothing to decrement
    ///
    /// Late acknowledgments (after cancellation) never drive counts negative.
    pub fn record_finished(&mut self, agent: usize) -> bool {
        match self.active.get_mut(agent) {
            Some(active) if *active > 0 => {
                *active -= 1;
                self.total_finished += 1;
                true
            }
            _ => {
                self.ignored_acks += 1;
                false
            }
        }
    }

    /// Apply a session failure; the session no longer counts as active
    pub fn record_failed(&mut self, agent: usize) -> bool {
        match self.active.get_mut(agent) {
            Some(active) if *active > 0 => {
                *active -= 1;
                self.total_failed += 1;
                true
            }
            _ => {
                self.ignored_acks += 1;
                false
            }
        }
    }

    /// Drop all outstanding sessions as cancelled; returns how many were cancelled
    pub fn cancel_all(&mut self) -> u64 {
        let cancelled: u64 = self.active.iter().sum();
        self.active.iter_mut().for_each(|a| *a = 0);
        self.total_cancelled += cancelled;
        cancelled
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    fn transition(
        &mut self,
        allowed: &[PhaseStatus],
        to: PhaseStatus,
    ) -> Result<(), TransitionError> {
        if !allowed.contains(&self.status) {
            return Err(TransitionError {
                phase: self.phase,
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// NotStarted → Running at `now_ms`
    pub fn start(&mut self, now_ms: u64) -> Result<(), TransitionError> {
        self.transition(&[PhaseStatus::NotStarted], PhaseStatus::Running)?;
        self.absolute_start_ms = Some(now_ms);
        Ok(())
    }

    /// Running → Terminating
    pub fn begin_termination(&mut self, mode: DrainMode) -> Result<(), TransitionError> {
        self.transition(&[PhaseStatus::Running], PhaseStatus::Terminating)?;
        self.drain = Some(mode);
        Ok(())
    }

    /// Switch the drain mode of a phase that is already Terminating
    pub fn escalate_drain(&mut self, mode: DrainMode) {
        if self.status == PhaseStatus::Terminating {
            self.drain = Some(mode);
        }
    }

    /// Terminating → Terminated
    pub fn terminate(&mut self) -> Result<(), TransitionError> {
        self.transition(&[PhaseStatus::Terminating], PhaseStatus::Terminated)
    }

    /// Terminated → Finished
    pub fn finish(&mut self) -> Result<(), TransitionError> {
        self.transition(&[PhaseStatus::Terminated], PhaseStatus::Finished)
    }

    /// Any non-terminal state → Failed
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(
            &[
                PhaseStatus::NotStarted,
                PhaseStatus::Running,
                PhaseStatus::Terminating,
                PhaseStatus::Terminated,
            ],
            PhaseStatus::Failed,
        )?;
        self.failure = Some(reason.into());
        Ok(())
    }
}
