//! In-process engine for dry runs and tests
//!
//! Every session "runs" for a fixed number of milliseconds of run time and
//! then reports itself finished through the scheduler's event channel.
//! Stopped sessions report finished immediately. No scenario logic runs.

use super::{EngineError, ExecutionEngine, EventSender};
use crate::models::PhaseId;
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap};

/// Engine that completes sessions after `session_ms`
#[derive(Debug)]
pub struct SimulatedEngine {
    events: EventSender,
    session_ms: u64,
    now_ms: u64,
    /// (finish time, phase, agent), earliest first
    pending: BinaryHeap<Reverse<(u64, PhaseId, usize)>>,
    /// Every n-th started session reports failure instead of success
    fail_every: Option<u64>,
    started: u64,
    unreachable: BTreeSet<usize>,
}

impl SimulatedEngine {
    pub fn new(events: EventSender, session_ms: u64) -> Self {
        Self {
            events,
            session_ms,
            now_ms: 0,
            pending: BinaryHeap::new(),
            fail_every: None,
            started: 0,
            unreachable: BTreeSet::new(),
        }
    }

    /// Make every `n`-th session fail (n = 0 disables)
    pub fn with_failure_every(mut self, n: u64) -> Self {
        self.fail_every = (n > 0).then_some(n);
        self
    }

    /// Commands to `agent` fail as unreachable
    pub fn with_unreachable_agent(mut self, agent: usize) -> Self {
        self.unreachable.insert(agent);
        self
    }

    /// Sessions started but not yet completed or stopped
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    fn check_reachable(&self, agent: usize) -> Result<(), EngineError> {
        if self.unreachable.contains(&agent) {
            return Err(EngineError::AgentUnreachable {
                agent,
                cause: "simulated network partition".to_string(),
            });
        }
        Ok(())
    }
}

impl ExecutionEngine for SimulatedEngine {
    fn start_sessions(&mut self, phase: PhaseId, agent: usize, count: u64) -> Result<(), EngineError> {
        self.check_reachable(agent)?;
        let finish_at = self.now_ms + self.session_ms;
        for _ in 0..count {
            self.pending.push(Reverse((finish_at, phase, agent)));
        }
        Ok(())
    }

    /// Stopped sessions report back as finished right away
    fn stop_phase(&mut self, phase: PhaseId, agent: usize) -> Result<(), EngineError> {
        self.check_reachable(agent)?;
        let before = self.pending.len();
        self.pending
            .retain(|Reverse((_, p, a))| !(*p == phase && *a == agent));
        for _ in self.pending.len()..before {
            self.events.session_finished(phase, agent);
        }
        Ok(())
    }

    fn poll(&mut self, now_ms: u64) {
        self.now_ms = now_ms;
        while let Some(Reverse((finish_at, phase, agent))) = self.pending.peek().copied() {
            if finish_at > now_ms {
                break;
            }
            self.pending.pop();
            self.started += 1;
            match self.fail_every {
                Some(n) if self.started % n == 0 => {
                    self.events.session_failed(phase, agent, "simulated failure");
                }
                _ => {
                    self.events.session_finished(phase, agent);
                }
            }
        }
    }
}
