//! Integration tests for the scheduler tick loop
//!
//! These drive complete benchmarks through `Scheduler::tick` against a
//! recording engine (sessions finish only when a test acknowledges them) or
//! the in-process simulated engine.

mod common;

use common::{id, recording_scheduler, Command, RecordingEngine};
use phase_scheduler_core::engine::SimulatedEngine;
use phase_scheduler_core::models::{
    Benchmark, BenchmarkDefinitionError, Event, PhaseConfig, PhaseId, PhaseKind,
};
use phase_scheduler_core::orchestrator::{RunStatus, Scheduler, SchedulerConfig, SchedulerError};
use phase_scheduler_core::runtime::PhaseStatus;

fn constant(rate: f64, max_sessions: Option<i64>) -> PhaseKind {
    PhaseKind::ConstantPerSec {
        users_per_sec: rate,
        variance: false,
        max_sessions,
    }
}

fn simulated_scheduler(
    agent_count: usize,
    phases: Vec<PhaseConfig>,
    session_ms: u64,
) -> Scheduler<SimulatedEngine> {
    let benchmark = common::benchmark(agent_count, phases);
    let mut scheduler = Scheduler::new(benchmark, SchedulerConfig::default(), |tx| {
        SimulatedEngine::new(tx, session_ms)
    })
    .unwrap();
    scheduler.start().unwrap();
    scheduler
}

/// Tick of the first event matching `pred`
fn tick_of<E: phase_scheduler_core::engine::ExecutionEngine>(
    scheduler: &Scheduler<E>,
    pred: impl Fn(&Event) -> bool,
) -> Option<u64> {
    scheduler
        .event_log()
        .events()
        .iter()
        .find(|e| pred(e))
        .map(Event::tick)
}

fn started_tick<E: phase_scheduler_core::engine::ExecutionEngine>(
    scheduler: &Scheduler<E>,
    phase: PhaseId,
) -> Option<u64> {
    tick_of(scheduler, |e| {
        matches!(e, Event::PhaseStarted { phase: p, .. } if *p == phase)
    })
}

fn terminated_tick<E: phase_scheduler_core::engine::ExecutionEngine>(
    scheduler: &Scheduler<E>,
    phase: PhaseId,
) -> Option<u64> {
    tick_of(scheduler, |e| {
        matches!(e, Event::PhaseTerminated { phase: p, .. } if *p == phase)
    })
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_at_once_then_constant_rate() {
    let mut s = recording_scheduler(
        1,
        vec![
            PhaseConfig::new("a", PhaseKind::AtOnce { users: 10 }),
            PhaseConfig::new("b", constant(5.0, None))
                .with_duration(2000)
                .start_after("a"),
        ],
        SchedulerConfig::default(),
    );
    let (a, b) = (id(&s, "a"), id(&s, "b"));

    s.run_to_completion(300).unwrap();

    // b starts only after all of a's sessions were requested
    let events = s.event_log().events();
    let b_start = events
        .iter()
        .position(|e| matches!(e, Event::PhaseStarted { phase, .. } if *phase == b))
        .unwrap();
    let last_a_dispatch = events
        .iter()
        .rposition(|e| matches!(e, Event::SessionsDispatched { phase, .. } if *phase == a))
        .unwrap();
    assert!(last_a_dispatch < b_start);
    assert_eq!(s.event_log().dispatched_for_phase(a), 10);

    assert_eq!(s.engine().started_for(b), 10);
    assert_eq!(s.runtime(b).unwrap().status(), PhaseStatus::Terminating);

    // Acknowledge everything and the run completes
    s.engine().finish(a, 0, 10);
    s.engine().finish(b, 0, 10);
    assert_eq!(s.run_to_completion(5).unwrap(), RunStatus::Completed);
}

#[test]
fn test_max_sessions_reports_backlog() {
    // 75/s over 2s would start 150 sessions
    let mut s = recording_scheduler(
        1,
        vec![PhaseConfig::new("capped", constant(75.0, Some(100))).with_duration(2000)],
        SchedulerConfig::default(),
    );
    let p = id(&s, "capped");

    let mut peak = 0;
    for _ in 0..250 {
        s.tick().unwrap();
        peak = peak.max(s.runtime(p).unwrap().active_sessions());
    }

    let rt = s.runtime(p).unwrap();
    assert!(peak <= 100);
    assert_eq!(rt.total_started(), 100);
    assert_eq!(rt.total_backlogged(), 50);
    assert!(!s.event_log().events_of_type("SessionsBacklogged").is_empty());
    match s.event_log().events_of_type("SessionsBacklogged")[0] {
        Event::SessionsBacklogged { max_sessions, active, .. } => {
            assert_eq!(*max_sessions, 100);
            assert_eq!(*active, 100);
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[test]
fn test_backlogged_phase_resumes_when_sessions_finish() {
    let mut s = recording_scheduler(
        1,
        vec![PhaseConfig::new("capped", constant(100.0, Some(5))).with_duration(1000)],
        SchedulerConfig::default(),
    );
    let p = id(&s, "capped");

    for _ in 0..10 {
        s.tick().unwrap();
    }
    assert_eq!(s.runtime(p).unwrap().active_sessions(), 5);

    // One arrival per tick; suppressed arrivals are not replayed
    s.engine().finish(p, 0, 3);
    s.tick().unwrap();
    let rt = s.runtime(p).unwrap();
    assert_eq!(rt.active_sessions(), 3);
    assert_eq!(rt.total_started(), 6);
    assert_eq!(rt.total_backlogged(), 4);
}

#[test]
fn test_strict_start_waits_for_zero_active_sessions() {
    let mut s = simulated_scheduler(
        2,
        vec![
            PhaseConfig::new("a", PhaseKind::Always { users: 3 }).with_duration(100),
            PhaseConfig::new("b", constant(20.0, None))
                .with_duration(200)
                .start_after_strict("a"),
        ],
        25,
    );
    let (a, b) = (id_sim(&s, "a"), id_sim(&s, "b"));

    for _ in 0..100 {
        let result = s.tick().unwrap();
        if s.runtime(b).unwrap().status() != PhaseStatus::NotStarted {
            assert_eq!(s.runtime(a).unwrap().active_sessions(), 0);
            assert!(s.runtime(a).unwrap().status().is_terminated());
        }
        if result.run_status.is_over() {
            break;
        }
    }

    assert_eq!(s.status(), RunStatus::Completed);
    assert!(started_tick(&s, b).unwrap() >= terminated_tick(&s, a).unwrap());
    assert_eq!(s.runtime(b).unwrap().total_started(), 8);
}

fn id_sim(scheduler: &Scheduler<SimulatedEngine>, name: &str) -> PhaseId {
    scheduler.benchmark().phase_by_name(name).unwrap().id()
}

#[test]
fn test_max_duration_terminates_within_one_tick() {
    let mut s = recording_scheduler(
        2,
        vec![PhaseConfig::new("stuck", PhaseKind::Always { users: 5 })
            .with_duration(200)
            .with_max_duration(500)],
        SchedulerConfig::default(),
    );
    let p = id(&s, "stuck");

    while s.runtime(p).unwrap().status() != PhaseStatus::Terminated {
        s.tick().unwrap();
        assert!(s.current_tick() <= 60, "phase never terminated");
    }

    let start = s.runtime(p).unwrap().absolute_start_ms().unwrap();
    let terminated_at = terminated_tick(&s, p).unwrap() * s.config().tick_interval_ms;
    assert!(terminated_at <= start + 500 + s.config().tick_interval_ms);

    let rt = s.runtime(p).unwrap();
    assert_eq!(rt.total_cancelled(), 10);
    assert_eq!(rt.active_sessions(), 0);
    assert_eq!(s.engine().stops_for(p), 2);
    assert!(s
        .event_log()
        .events()
        .iter()
        .any(|e| matches!(e, Event::PhaseTerminated { cancelled: 10, .. })));

    // Acknowledgments for cancelled sessions arrive late and are ignored
    s.engine().finish(p, 0, 5);
    assert_eq!(s.run_to_completion(5).unwrap(), RunStatus::Completed);
    assert_eq!(s.runtime(p).unwrap().ignored_acks(), 5);
    assert_eq!(s.runtime(p).unwrap().status(), PhaseStatus::Finished);
}

#[test]
fn test_max_duration_equal_to_duration_keeps_final_window() {
    let config = SchedulerConfig {
        tick_interval_ms: 1000,
        ..SchedulerConfig::default()
    };
    let mut s = recording_scheduler(
        1,
        vec![PhaseConfig::new("steady", constant(5.0, None))
            .with_duration(2000)
            .with_max_duration(2000)],
        config,
    );
    let p = id(&s, "steady");

    assert_eq!(s.run_to_completion(10).unwrap(), RunStatus::Completed);
    assert_eq!(s.engine().started_for(p), 10);
    let rt = s.runtime(p).unwrap();
    assert_eq!(rt.total_started(), 10);
    assert_eq!(rt.total_cancelled(), 10);
    assert_eq!(terminated_tick(&s, p), Some(2));
}

#[test]
fn test_terminate_after_strict_holds_termination() {
    let mut s = simulated_scheduler(
        1,
        vec![
            PhaseConfig::new("long", PhaseKind::Always { users: 1 }).with_duration(100),
            PhaseConfig::new("short", PhaseKind::Always { users: 1 })
                .with_duration(30)
                .terminate_after_strict("long"),
        ],
        10,
    );
    assert_eq!(s.run_to_completion(100).unwrap(), RunStatus::Completed);

    let long = id_sim(&s, "long");
    let short = id_sim(&s, "short");
    assert!(terminated_tick(&s, short).unwrap() >= terminated_tick(&s, long).unwrap());
}

#[test]
fn test_start_time_delays_phase() {
    let mut s = simulated_scheduler(
        1,
        vec![PhaseConfig::new("late", PhaseKind::AtOnce { users: 1 }).with_start_time(250)],
        10,
    );
    assert_eq!(s.run_to_completion(100).unwrap(), RunStatus::Completed);

    let started = s.event_log().events_of_type("PhaseStarted");
    assert!(matches!(started[0], Event::PhaseStarted { start_ms: 250, .. }));
}

#[test]
fn test_shared_pool_runs_members_one_at_a_time() {
    let mut s = simulated_scheduler(
        1,
        vec![
            PhaseConfig::new("first", PhaseKind::Always { users: 2 })
                .with_duration(100)
                .with_shared_resources("pool"),
            PhaseConfig::new("second", PhaseKind::Always { users: 3 })
                .with_duration(100)
                .with_shared_resources("pool"),
        ],
        30,
    );
    let (first, second) = (id_sim(&s, "first"), id_sim(&s, "second"));

    for _ in 0..100 {
        let result = s.tick().unwrap();
        let running = s
            .runtimes()
            .iter()
            .filter(|rt| matches!(rt.status(), PhaseStatus::Running | PhaseStatus::Terminating))
            .count();
        assert!(running <= 1);
        if result.run_status.is_over() {
            break;
        }
    }

    assert_eq!(s.status(), RunStatus::Completed);
    assert!(started_tick(&s, second).unwrap() > started_tick(&s, first).unwrap());
    assert!(started_tick(&s, second).unwrap() >= terminated_tick(&s, first).unwrap());
}

#[test]
fn test_rate_is_apportioned_evenly_across_agents() {
    let mut s = recording_scheduler(
        3,
        vec![PhaseConfig::new("spread", constant(10.0, None)).with_duration(1000)],
        SchedulerConfig::default(),
    );
    let p = id(&s, "spread");
    s.run_to_completion(120).unwrap();

    for agent in 0..3 {
        assert_eq!(s.engine().started_for_agent(p, agent), 10);
    }
}

#[test]
fn test_sequentially_runs_one_session_at_a_time() {
    let mut s = simulated_scheduler(
        2,
        vec![PhaseConfig::new("serial", PhaseKind::Sequentially { repeats: 4 }).with_duration(0)],
        20,
    );
    let p = id_sim(&s, "serial");

    for _ in 0..200 {
        let result = s.tick().unwrap();
        assert!(s.runtime(p).unwrap().active_sessions() <= 1);
        if result.run_status.is_over() {
            break;
        }
    }
    assert_eq!(s.status(), RunStatus::Completed);
    assert_eq!(s.runtime(p).unwrap().total_started(), 4);
    assert_eq!(s.runtime(p).unwrap().started_per_agent(), &[4, 0]);
}

// ============================================================================
// Runtime errors
// ============================================================================

#[test]
fn test_session_failures_do_not_fail_phase() {
    let benchmark = common::benchmark(
        1,
        vec![PhaseConfig::new("burst", PhaseKind::AtOnce { users: 4 })],
    );
    let mut s = Scheduler::new(benchmark, SchedulerConfig::default(), |tx| {
        SimulatedEngine::new(tx, 20).with_failure_every(2)
    })
    .unwrap();
    s.start().unwrap();

    assert_eq!(s.run_to_completion(20).unwrap(), RunStatus::Completed);
    let rt = s.runtimes()[0].clone();
    assert_eq!(rt.status(), PhaseStatus::Finished);
    assert_eq!(rt.total_failed(), 2);
    assert_eq!(rt.total_finished(), 2);
    assert_eq!(s.event_log().events_of_type("SessionFailed").len(), 2);
}

#[test]
fn test_unreachable_agent_fails_phase_and_run() {
    let benchmark = common::benchmark(
        2,
        vec![
            PhaseConfig::new("load", PhaseKind::Always { users: 1 }).with_duration(100),
            PhaseConfig::new("later", PhaseKind::Noop).with_start_time(1000),
        ],
    );
    let mut s = Scheduler::new(benchmark, SchedulerConfig::default(), RecordingEngine::new).unwrap();
    s.engine_mut().unreachable.push(1);
    s.start().unwrap();

    let result = s.tick().unwrap();
    assert_eq!(result.run_status, RunStatus::Failed);

    let rt = s.runtime_by_name("load").unwrap();
    assert_eq!(rt.status(), PhaseStatus::Failed);
    assert!(rt.failure().unwrap().contains("unreachable"));
    assert!(s.failure().unwrap().contains("load"));
    assert_eq!(
        s.runtime_by_name("later").unwrap().status(),
        PhaseStatus::NotStarted
    );
    assert_eq!(s.tick().unwrap_err(), SchedulerError::RunOver(RunStatus::Failed));
}

#[test]
fn test_non_critical_failure_lets_dependents_proceed() {
    let config = SchedulerConfig {
        non_critical_phases: vec!["flaky".into()],
        ..Default::default()
    };
    let mut s = recording_scheduler(
        2,
        vec![
            PhaseConfig::new("flaky", PhaseKind::Always { users: 1 }).with_duration(1000),
            PhaseConfig::new("after", PhaseKind::AtOnce { users: 1 }).start_after_strict("flaky"),
        ],
        config,
    );
    let (flaky, after) = (id(&s, "flaky"), id(&s, "after"));

    s.tick().unwrap();
    s.event_sender().agent_unreachable(flaky, 1, "connection reset");
    s.tick().unwrap();

    assert_eq!(s.runtime(flaky).unwrap().status(), PhaseStatus::Failed);
    assert_eq!(s.runtime(flaky).unwrap().total_cancelled(), 2);
    assert_eq!(s.runtime(after).unwrap().status(), PhaseStatus::Terminating);
    assert!(s
        .engine()
        .commands
        .contains(&Command::Stop { phase: flaky, agent: 0 }));

    s.engine().finish(after, 0, 1);
    s.engine().finish(after, 1, 1);
    assert_eq!(s.run_to_completion(5).unwrap(), RunStatus::Completed);
}

// ============================================================================
// Control surface
// ============================================================================

#[test]
fn test_stop_cancels_live_phases() {
    let mut s = recording_scheduler(
        1,
        vec![
            PhaseConfig::new("load", PhaseKind::Always { users: 2 }).with_duration(10_000),
            PhaseConfig::new("never", PhaseKind::Noop).start_after_strict("load"),
        ],
        SchedulerConfig::default(),
    );
    let (load, never) = (id(&s, "load"), id(&s, "never"));
    s.tick().unwrap();

    s.stop().unwrap();
    assert_eq!(s.status(), RunStatus::Stopping);
    assert_eq!(s.engine().stops_for(load), 1);
    assert_eq!(s.stop().unwrap_err(), SchedulerError::RunOver(RunStatus::Stopping));

    s.engine().finish(load, 0, 2);
    assert_eq!(s.run_to_completion(5).unwrap(), RunStatus::Cancelled);
    assert_eq!(s.runtime(load).unwrap().status(), PhaseStatus::Finished);
    assert_eq!(s.runtime(never).unwrap().status(), PhaseStatus::NotStarted);
    assert_eq!(s.event_log().events_of_type("RunCancelled").len(), 1);
}

#[test]
fn test_stop_finishes_phase_waiting_on_unstarted_dependency() {
    let mut s = simulated_scheduler(
        1,
        vec![
            PhaseConfig::new("load", PhaseKind::Always { users: 2 })
                .with_duration(10_000)
                .terminate_after_strict("cooldown"),
            PhaseConfig::new("cooldown", PhaseKind::AtOnce { users: 1 }).start_after("load"),
        ],
        100,
    );
    let (load, cooldown) = (id_sim(&s, "load"), id_sim(&s, "cooldown"));
    s.tick().unwrap();

    s.stop().unwrap();
    assert_eq!(s.run_to_completion(20).unwrap(), RunStatus::Cancelled);
    assert_eq!(s.runtime(load).unwrap().status(), PhaseStatus::Finished);
    assert_eq!(s.runtime(load).unwrap().active_sessions(), 0);
    assert_eq!(s.runtime(cooldown).unwrap().status(), PhaseStatus::NotStarted);
}

#[test]
fn test_stop_fails_phase_held_at_terminate_gate_after_drain_timeout() {
    let config = SchedulerConfig {
        drain_timeout_ms: 100,
        non_critical_phases: vec!["held".into(), "stuck".into()],
        ..SchedulerConfig::default()
    };
    let mut s = recording_scheduler(
        1,
        vec![
            PhaseConfig::new("held", PhaseKind::Always { users: 1 })
                .with_duration(10_000)
                .terminate_after_strict("stuck"),
            PhaseConfig::new("stuck", PhaseKind::Always { users: 1 }).with_duration(10_000),
        ],
        config,
    );
    let (held, stuck) = (id(&s, "held"), id(&s, "stuck"));
    s.tick().unwrap();

    s.stop().unwrap();
    s.engine().finish(held, 0, 1);
    assert_eq!(s.run_to_completion(50).unwrap(), RunStatus::Cancelled);

    let rt = s.runtime(held).unwrap();
    assert_eq!(rt.status(), PhaseStatus::Failed);
    assert_eq!(rt.active_sessions(), 0);
    assert!(rt.failure().unwrap().contains("terminateAfterStrict"));
    assert_eq!(s.runtime(stuck).unwrap().status(), PhaseStatus::Failed);
}

#[test]
fn test_control_calls_require_started_run() {
    let benchmark = common::benchmark(1, vec![PhaseConfig::new("p", PhaseKind::Noop)]);
    let mut s = Scheduler::new(benchmark, SchedulerConfig::default(), RecordingEngine::new).unwrap();
    assert_eq!(s.stop().unwrap_err(), SchedulerError::NotStarted);
    assert_eq!(s.snapshot().status, RunStatus::Pending);
    s.start().unwrap();
    assert!(s.start().is_err());
}

#[test]
fn test_configuration_errors_surface_before_any_traffic() {
    let phases = vec![
        PhaseConfig::new("a", PhaseKind::Noop).start_after("b"),
        PhaseConfig::new("b", PhaseKind::Noop).start_after("a"),
    ];
    let benchmark = Benchmark::new("cyclic".into(), vec!["x".into()], &phases).unwrap();
    let mut commands = 0;
    let result = Scheduler::new(benchmark, SchedulerConfig::default(), |tx| {
        commands += 1;
        RecordingEngine::new(tx)
    });
    assert!(matches!(result, Err(SchedulerError::Definition(_))));
    assert_eq!(commands, 0);
}

#[test]
fn test_pool_member_that_could_hold_the_lease_forever_is_rejected() {
    let pooled = |name: &str| {
        PhaseConfig::new(name, PhaseKind::Always { users: 1 })
            .with_duration(100)
            .with_shared_resources("pool")
    };
    let phases = vec![pooled("a").terminate_after_strict("b"), pooled("b")];
    let benchmark = Benchmark::new("pooled".into(), vec!["x".into()], &phases).unwrap();
    let result = Scheduler::new(benchmark, SchedulerConfig::default(), RecordingEngine::new);
    assert!(matches!(
        result,
        Err(SchedulerError::Definition(
            BenchmarkDefinitionError::SharedResourceDeadlock { .. }
        ))
    ));
}

#[test]
fn test_variance_runs_are_reproducible_from_seed() {
    let run = || {
        let phases = vec![PhaseConfig::new(
            "noisy",
            PhaseKind::ConstantPerSec {
                users_per_sec: 50.0,
                variance: true,
                max_sessions: None,
            },
        )
        .with_duration(1000)];
        let config = SchedulerConfig {
            rng_seed: 7,
            ..Default::default()
        };
        let mut s = Scheduler::new(common::benchmark(2, phases), config, |tx| {
            SimulatedEngine::new(tx, 15)
        })
        .unwrap();
        s.start().unwrap();
        s.run_to_completion(200).unwrap();
        s.event_log().events().to_vec()
    };

    let first = run();
    assert_eq!(first, run());
    assert!(first
        .iter()
        .any(|e| matches!(e, Event::RunCompleted { .. })));
}
