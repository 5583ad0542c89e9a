//! Scheduler events for reporting and auditing.
//!
//! Every phase transition and every dispatch decision made by the scheduler
//! is recorded as an `Event`. Reporting collaborators read the log; the
//! scheduler itself never reads it back.
//!
//! # Example
//!
//! ```rust
//! use phase_scheduler_core::models::{Event, EventLog, PhaseId};
//!
//! let mut log = EventLog::new();
//! log.log(Event::SessionsDispatched {
//!     tick: 3,
//!     phase: PhaseId(0),
//!     agent: 1,
//!     count: 5,
//! });
//!
//! assert_eq!(log.events_for_phase(PhaseId(0)).len(), 1);
//! assert_eq!(log.events()[0].event_type(), "SessionsDispatched");
//! ```

use super::phase::PhaseId;
use serde::{Deserialize, Serialize};

/// Scheduler event capturing a decision or a state change.
///
/// Events are logged in the order they happen within a tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum Event {
    /// Phase moved from NotStarted to Running
    PhaseStarted {
        tick: u64,
        phase: PhaseId,
        name: String,
        start_ms: u64,
    },

    /// `count` new sessions requested from the engine on `agent`
    SessionsDispatched {
        tick: u64,
        phase: PhaseId,
        agent: usize,
        count: u64,
    },

    /// Arrivals suppressed because the session cap was reached
    SessionsBacklogged {
        tick: u64,
        phase: PhaseId,
        suppressed: u64,
        active: u64,
        max_sessions: u64,
    },

    /// Engine reported a failed session
    SessionFailed {
        tick: u64,
        phase: PhaseId,
        agent: usize,
        cause: String,
    },

    /// Phase stopped admitting new sessions
    PhaseTerminating {
        tick: u64,
        phase: PhaseId,
        forced: bool,
    },

    /// Phase has no more running sessions
    PhaseTerminated {
        tick: u64,
        phase: PhaseId,
        cancelled: u64,
    },

    /// Bookkeeping done, success terminal
    PhaseFinished {
        tick: u64,
        phase: PhaseId,
        started: u64,
        finished: u64,
        failed: u64,
    },

    /// Error terminal
    PhaseFailed {
        tick: u64,
        phase: PhaseId,
        reason: String,
    },

    RunCompleted {
        tick: u64,
    },

    RunFailed {
        tick: u64,
        reason: String,
    },

    RunCancelled {
        tick: u64,
    },
}

impl Event {
    /// Tick at which this event happened
    pub fn tick(&self) -> u64 {
        match self {
            Event::PhaseStarted { tick, .. }
            | Event::SessionsDispatched { tick, .. }
            | Event::SessionsBacklogged { tick, .. }
            | Event::SessionFailed { tick, .. }
            | Event::PhaseTerminating { tick, .. }
            | Event::PhaseTerminated { tick, .. }
            | Event::PhaseFinished { tick, .. }
            | Event::PhaseFailed { tick, .. }
            | Event::RunCompleted { tick }
            | Event::RunFailed { tick, .. }
            | Event::RunCancelled { tick } => *tick,
        }
    }

    /// Event type name
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::PhaseStarted { .. } => "PhaseStarted",
            Event::SessionsDispatched { .. } => "SessionsDispatched",
            Event::SessionsBacklogged { .. } => "SessionsBacklogged",
            Event::SessionFailed { .. } => "SessionFailed",
            Event::PhaseTerminating { .. } => "PhaseTerminating",
            Event::PhaseTerminated { .. } => "PhaseTerminated",
            Event::PhaseFinished { .. } => "PhaseFinished",
            Event::PhaseFailed { .. } => "PhaseFailed",
            Event::RunCompleted { .. } => "RunCompleted",
            Event::RunFailed { .. } => "RunFailed",
            Event::RunCancelled { .. } => "RunCancelled",
        }
    }

    /// Phase this event concerns (`None` for run-level events)
    pub fn phase(&self) -> Option<PhaseId> {
        match self {
            Event::PhaseStarted { phase, .. }
            | Event::SessionsDispatched { phase, .. }
            | Event::SessionsBacklogged { phase, .. }
            | Event::SessionFailed { phase, .. }
            | Event::PhaseTerminating { phase, .. }
            | Event::PhaseTerminated { phase, .. }
            | Event::PhaseFinished { phase, .. }
            | Event::PhaseFailed { phase, .. } => Some(*phase),
            Event::RunCompleted { .. } | Event::RunFailed { .. } | Event::RunCancelled { .. } => {
                None
            }
        }
    }
}

/// Append-only log of scheduler events
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Vec<Event>,
}

impl EventLog {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn log(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn events_at_tick(&self, tick: u64) -> Vec<&Event> {
        self.events.iter().filter(|e| e.tick() == tick).collect()
    }

    pub fn events_of_type(&self, event_type: &str) -> Vec<&Event> {
        self.events
            .iter()
            .filter(|e| e.event_type() == event_type)
            .collect()
    }

    pub fn events_for_phase(&self, phase: PhaseId) -> Vec<&Event> {
        self.events
            .iter()
            .filter(|e| e.phase() == Some(phase))
            .collect()
    }

    /// Total sessions dispatched for `phase` across all agents
    pub fn dispatched_for_phase(&self, phase: PhaseId) -> u64 {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::SessionsDispatched {
                    phase: p, count, ..
                } if *p == phase => Some(*count),
                _ => None,
            })
            .sum()
    }
}
