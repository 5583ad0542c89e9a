//! Execution engine boundary
//!
//! The scheduler never runs sessions itself. It issues fire-and-forget
//! commands through `ExecutionEngine` and learns about session outcomes from
//! `EngineEvent`s that agents send back, possibly from other threads, in any
//! order and with any delay.
//!
//! # Example
//!
//! ```rust
//! use phase_scheduler_core::engine::{event_channel, EngineEvent};
//! use phase_scheduler_core::models::PhaseId;
//!
//! let (sender, inbox) = event_channel();
//! let agent_side = sender.clone();
//! std::thread::spawn(move || {
//!     agent_side.session_finished(PhaseId(0), 1);
//! })
//! .join()
//! .unwrap();
//!
//! assert_eq!(
//!     inbox.drain(),
//!     vec![EngineEvent::SessionFinished { phase: PhaseId(0), agent: 1 }]
//! );
//! ```

pub mod simulated;

use crate::models::PhaseId;
use std::sync::mpsc;
use thiserror::Error;

pub use simulated::SimulatedEngine;

/// Command delivery failures
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    /// The agent cannot be reached; the phase cannot continue on it
    #[error("Agent {agent} unreachable: {cause}")]
    AgentUnreachable { agent: usize, cause: String },
}

/// Commands the scheduler sends to agents
pub trait ExecutionEngine {
    /// Start `count` more sessions of `phase` on `agent`
    fn start_sessions(&mut self, phase: PhaseId, agent: usize, count: u64) -> Result<(), EngineError>;

    /// Stop every session of `phase` on `agent`
    fn stop_phase(&mut self, phase: PhaseId, agent: usize) -> Result<(), EngineError>;

    /// Called at the start of every tick with the run clock
    ///
    /// In-process engines use it to advance their own work; remote engines
    /// can ignore it.
    fn poll(&mut self, _now_ms: u64) {}
}

/// Lifecycle signals reported by agents
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    SessionFinished {
        phase: PhaseId,
        agent: usize,
    },
    SessionFailed {
        phase: PhaseId,
        agent: usize,
        cause: String,
    },
    /// Non-recoverable communication failure for `phase` on `agent`
    AgentUnreachable {
        phase: PhaseId,
        agent: usize,
        cause: String,
    },
}

impl EngineEvent {
    pub fn phase(&self) -> PhaseId {
        match self {
            EngineEvent::SessionFinished { phase, .. }
            | EngineEvent::SessionFailed { phase, .. }
            | EngineEvent::AgentUnreachable { phase, .. } => *phase,
        }
    }
}

/// Cloneable handle agents use to report back to the scheduler
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<EngineEvent>,
}

impl EventSender {
    /// Queue an event; false if the scheduler is gone
    pub fn send(&self, event: EngineEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn session_finished(&self, phase: PhaseId, agent: usize) -> bool {
        self.send(EngineEvent::SessionFinished { phase, agent })
    }

    pub fn session_failed(&self, phase: PhaseId, agent: usize, cause: impl Into<String>) -> bool {
        self.send(EngineEvent::SessionFailed {
            phase,
            agent,
            cause: cause.into(),
        })
    }

    pub fn agent_unreachable(&self, phase: PhaseId, agent: usize, cause: impl Into<String>) -> bool {
        self.send(EngineEvent::AgentUnreachable {
            phase,
            agent,
            cause: cause.into(),
        })
    }
}

/// Receiving end, owned by the scheduler
#[derive(Debug)]
pub struct EventInbox {
    rx: mpsc::Receiver<EngineEvent>,
}

impl EventInbox {
    /// Everything queued so far, in arrival order
    pub fn drain(&self) -> Vec<EngineEvent> {
        self.rx.try_iter().collect()
    }
}

/// Create a connected sender/inbox pair
pub fn event_channel() -> (EventSender, EventInbox) {
    let (tx, rx) = mpsc::channel();
    (EventSender { tx }, EventInbox { rx })
}
