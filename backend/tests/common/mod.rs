//! Shared helpers for scheduler integration tests

#![allow(dead_code)]

use phase_scheduler_core::engine::{EngineError, EventSender, ExecutionEngine};
use phase_scheduler_core::models::{Benchmark, PhaseConfig, PhaseId};
use phase_scheduler_core::orchestrator::{Scheduler, SchedulerConfig};

/// Command received by the recording engine
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start {
        phase: PhaseId,
        agent: usize,
        count: u64,
    },
    Stop {
        phase: PhaseId,
        agent: usize,
    },
}

/// Engine that records every command and never reports back on its own
///
/// Tests acknowledge sessions through `events` when they need to.
pub struct RecordingEngine {
    pub events: EventSender,
    pub commands: Vec<Command>,
    /// Agents whose commands fail
    pub unreachable: Vec<usize>,
}

impl RecordingEngine {
    pub fn new(events: EventSender) -> Self {
        Self {
            events,
            commands: Vec::new(),
            unreachable: Vec::new(),
        }
    }

    pub fn started_for(&self, phase: PhaseId) -> u64 {
        self.commands
            .iter()
            .map(|c| match c {
                Command::Start { phase: p, count, .. } if *p == phase => *count,
                _ => 0,
            })
            .sum()
    }

    pub fn started_for_agent(&self, phase: PhaseId, agent: usize) -> u64 {
        self.commands
            .iter()
            .map(|c| match c {
                Command::Start {
                    phase: p,
                    agent: a,
                    count,
                } if *p == phase && *a == agent => *count,
                _ => 0,
            })
            .sum()
    }

    pub fn stops_for(&self, phase: PhaseId) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, Command::Stop { phase: p, .. } if *p == phase))
            .count()
    }

    /// Acknowledge `count` finished sessions of `phase` on `agent`
    pub fn finish(&self, phase: PhaseId, agent: usize, count: u64) {
        for _ in 0..count {
            self.events.session_finished(phase, agent);
        }
    }

    fn check(&self, agent: usize) -> Result<(), EngineError> {
        if self.unreachable.contains(&agent) {
            return Err(EngineError::AgentUnreachable {
                agent,
                cause: "connection refused".into(),
            });
        }
        Ok(())
    }
}

impl ExecutionEngine for RecordingEngine {
    fn start_sessions(&mut self, phase: PhaseId, agent: usize, count: u64) -> Result<(), EngineError> {
        self.check(agent)?;
        self.commands.push(Command::Start {
            phase,
            agent,
            count,
        });
        Ok(())
    }

    fn stop_phase(&mut self, phase: PhaseId, agent: usize) -> Result<(), EngineError> {
        self.check(agent)?;
        self.commands.push(Command::Stop { phase, agent });
        Ok(())
    }
}

pub fn agents(n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("agent-{i}")).collect()
}

pub fn benchmark(agent_count: usize, phases: Vec<PhaseConfig>) -> Benchmark {
    Benchmark::new("test".into(), agents(agent_count), &phases).unwrap()
}

pub fn recording_scheduler(
    agent_count: usize,
    phases: Vec<PhaseConfig>,
    config: SchedulerConfig,
) -> Scheduler<RecordingEngine> {
    let mut scheduler =
        Scheduler::new(benchmark(agent_count, phases), config, RecordingEngine::new).unwrap();
    scheduler.start().unwrap();
    scheduler
}

pub fn id(scheduler: &Scheduler<RecordingEngine>, name: &str) -> PhaseId {
    scheduler.benchmark().phase_by_name(name).unwrap().id()
}
