//! Dependency graph between phases
//!
//! Resolves the three ordering relations (`startAfter`, `startAfterStrict`,
//! `terminateAfterStrict`) from phase names to `PhaseId` index tables once,
//! at run start, and answers the gate questions the scheduler asks on every
//! tick.
//!
//! # Unsatisfiable configurations
//!
//! Each phase contributes two events, *start* and *end*. Edges point from an
//! event to the event it waits for:
//!
//! ```text
//! end(P)   waits for start(P)
//! start(P) waits for start(D)   D in startAfter(P)         (D admits, then closes)
//! start(P) waits for end(D)     D in startAfterStrict(P)
//! end(P)   waits for end(D)     D in terminateAfterStrict(P)
//! ```
//!
//! A strongly connected component with more than one event, or an event
//! waiting for itself, can never make progress. Tarjan's algorithm finds
//! them in O(V+E) with deterministic ordering.

use crate::models::{Benchmark, BenchmarkDefinitionError, PhaseId};
use crate::runtime::{PhaseRuntime, PhaseStatus};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Resolved, immutable dependency tables for one run
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    start_after: Vec<Vec<PhaseId>>,
    start_after_strict: Vec<Vec<PhaseId>>,
    terminate_after_strict: Vec<Vec<PhaseId>>,
}

impl DependencyGraph {
    /// Resolve names and reject unknown references and cycles
    ///
    /// # Errors
    ///
    /// * `UnknownDependency` - a relation names a phase that does not exist
    /// * `DependencyCycle` - the relations can never all be satisfied
    /// * `SharedResourceDeadlock` - a pool member must wait for another member
    ///   of its pool before it can terminate, but may take the lease first
    pub fn build(benchmark: &Benchmark) -> Result<Self, BenchmarkDefinitionError> {
        let index: HashMap<&str, PhaseId> = benchmark
            .phases()
            .iter()
            .map(|p| (p.name(), p.id()))
            .collect();

        let resolve = |phase: &str,
                       relation: &'static str,
                       names: &[String]|
         -> Result<Vec<PhaseId>, BenchmarkDefinitionError> {
            let mut ids = BTreeSet::new();
            for name in names {
                let id = index.get(name.as_str()).copied().ok_or_else(|| {
                    BenchmarkDefinitionError::UnknownDependency {
                        phase: phase.to_string(),
                        relation,
                        dependency: name.clone(),
                    }
                })?;
                ids.insert(id);
            }
            Ok(ids.into_iter().collect())
        };

        let mut graph = Self {
            start_after: Vec::with_capacity(benchmark.phases().len()),
            start_after_strict: Vec::with_capacity(benchmark.phases().len()),
            terminate_after_strict: Vec::with_capacity(benchmark.phases().len()),
        };

        for phase in benchmark.phases() {
            graph
                .start_after
                .push(resolve(phase.name(), "startAfter", phase.start_after())?);
            graph.start_after_strict.push(resolve(
                phase.name(),
                "startAfterStrict",
                phase.start_after_strict(),
            )?);
            graph.terminate_after_strict.push(resolve(
                phase.name(),
                "terminateAfterStrict",
                phase.terminate_after_strict(),
            )?);
        }

        if let Some(cycle) = graph.find_cycle() {
            let phases = cycle
                .into_iter()
                .filter_map(|id| benchmark.phase(id).map(|p| p.name().to_string()))
                .collect();
            return Err(BenchmarkDefinitionError::DependencyCycle { phases });
        }
        graph.check_shared_resources(benchmark)?;

        Ok(graph)
    }

    pub fn phase_count(&self) -> usize {
        self.start_after.len()
    }

    pub fn start_after(&self, phase: PhaseId) -> &[PhaseId] {
        self.start_after.get(phase.0).map_or(&[], Vec::as_slice)
    }

    pub fn start_after_strict(&self, phase: PhaseId) -> &[PhaseId] {
        self.start_after_strict.get(phase.0).map_or(&[], Vec::as_slice)
    }

    pub fn terminate_after_strict(&self, phase: PhaseId) -> &[PhaseId] {
        self.terminate_after_strict
            .get(phase.0)
            .map_or(&[], Vec::as_slice)
    }

    /// Start gate: `startAfter` phases closed admission, `startAfterStrict`
    /// phases terminated with zero active sessions
    pub fn can_start(&self, phase: PhaseId, runtimes: &[PhaseRuntime]) -> bool {
        let closed = |id: &PhaseId| {
            runtimes
                .get(id.0)
                .is_some_and(|rt| rt.status().is_admission_closed())
        };
        let drained = |id: &PhaseId| {
            runtimes
                .get(id.0)
                .is_some_and(|rt| rt.status().is_terminated() && rt.active_sessions() == 0)
        };
        self.start_after(phase).iter().all(closed)
            && self.start_after_strict(phase).iter().all(drained)
    }

    /// Termination gate: every `terminateAfterStrict` phase is terminated
    pub fn can_terminate(&self, phase: PhaseId, runtimes: &[PhaseRuntime]) -> bool {
        self.terminate_after_strict(phase).iter().all(|id| {
            runtimes
                .get(id.0)
                .is_some_and(|rt| rt.status().is_terminated())
        })
    }

    /// Termination gate while the run is stopping
    ///
    /// A `terminateAfterStrict` phase that never started will not start
    /// anymore, so it no longer holds anything back.
    pub fn can_terminate_on_stop(&self, phase: PhaseId, runtimes: &[PhaseRuntime]) -> bool {
        self.terminate_after_strict(phase).iter().all(|id| {
            runtimes.get(id.0).is_some_and(|rt| {
                rt.status().is_terminated() || rt.status() == PhaseStatus::NotStarted
            })
        })
    }

    /// Phases currently holding back the start of `phase`
    pub fn start_blockers(&self, phase: PhaseId, runtimes: &[PhaseRuntime]) -> Vec<PhaseId> {
        let mut blockers: Vec<PhaseId> = self
            .start_after(phase)
            .iter()
            .filter(|id| {
                !runtimes
                    .get(id.0)
                    .is_some_and(|rt| rt.status().is_admission_closed())
            })
            .copied()
            .collect();
        blockers.extend(self.start_after_strict(phase).iter().filter(|id| {
            !runtimes
                .get(id.0)
                .is_some_and(|rt| rt.status().is_terminated() && rt.active_sessions() == 0)
        }));
        blockers
    }

    // ========================================================================
    // Cycle detection (Tarjan SCC over start/end events)
    // ========================================================================

    fn start_event(phase: PhaseId) -> usize {
        phase.0 * 2
    }

    fn end_event(phase: PhaseId) -> usize {
        phase.0 * 2 + 1
    }

    /// Events each event waits for, sorted for deterministic traversal
    fn wait_edges(&self) -> Vec<Vec<usize>> {
        let n = self.phase_count();
        let mut edges = vec![Vec::new(); n * 2];
        for p in 0..n {
            let phase = PhaseId(p);
            let start = Self::start_event(phase);
            let end = Self::end_event(phase);
            edges[end].push(start);
            edges[start].extend(self.start_after[p].iter().map(|d| Self::start_event(*d)));
            edges[start].extend(self.start_after_strict[p].iter().map(|d| Self::end_event(*d)));
            edges[end].extend(
                self.terminate_after_strict[p]
                    .iter()
                    .map(|d| Self::end_event(*d)),
            );
        }
        for list in &mut edges {
            list.sort_unstable();
            list.dedup();
        }
        edges
    }

    /// Members of a pool hold its lease one at a time, from start to end
    ///
    /// If the end of `x` waits for an event of another member `y`, `y` has to
    /// run first. That is only guaranteed when the start of `x` already waits
    /// for `y`; otherwise `x` can take the lease and hold it forever.
    fn check_shared_resources(
        &self,
        benchmark: &Benchmark,
    ) -> Result<(), BenchmarkDefinitionError> {
        let mut pools: BTreeMap<&str, Vec<PhaseId>> = BTreeMap::new();
        for phase in benchmark.phases() {
            if let Some(tag) = phase.shared_resources() {
                pools.entry(tag).or_default().push(phase.id());
            }
        }

        let edges = self.wait_edges();
        for (tag, members) in pools.iter().filter(|(_, m)| m.len() > 1) {
            for &x in members {
                let after_start = Self::reachable(&edges, Self::start_event(x));
                let after_end = Self::reachable(&edges, Self::end_event(x));
                for &y in members.iter().filter(|&&y| y != x) {
                    let (start_y, end_y) = (Self::start_event(y), Self::end_event(y));
                    let end_waits = after_end[start_y] || after_end[end_y];
                    let ordered = after_start[start_y] || after_start[end_y];
                    if end_waits && !ordered {
                        let name = |id: PhaseId| {
                            benchmark
                                .phase(id)
                                .map(|p| p.name().to_string())
                                .unwrap_or_default()
                        };
                        return Err(BenchmarkDefinitionError::SharedResourceDeadlock {
                            tag: tag.to_string(),
                            phase: name(x),
                            waits_for: name(y),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Events transitively waited for by `from`
    fn reachable(edges: &[Vec<usize>], from: usize) -> Vec<bool> {
        let mut seen = vec![false; edges.len()];
        let mut stack = vec![from];
        while let Some(v) = stack.pop() {
            for &w in &edges[v] {
                if !seen[w] {
                    seen[w] = true;
                    stack.push(w);
                }
            }
        }
        seen
    }

    /// Phases of the first unsatisfiable component, if any
    fn find_cycle(&self) -> Option<Vec<PhaseId>> {
        let edges = self.wait_edges();
        let n = edges.len();
        let mut state = TarjanState {
            index: 0,
            indices: vec![None; n],
            lowlinks: vec![0; n],
            on_stack: vec![false; n],
            stack: Vec::new(),
            sccs: Vec::new(),
        };

        for v in 0..n {
            if state.indices[v].is_none() {
                Self::strongconnect(&edges, v, &mut state);
            }
        }

        state
            .sccs
            .into_iter()
            .find(|scc| scc.len() > 1 || scc.iter().any(|&v| edges[v].contains(&v)))
            .map(|scc| {
                let phases: BTreeSet<PhaseId> = scc.into_iter().map(|v| PhaseId(v / 2)).collect();
                phases.into_iter().collect()
            })
    }

    fn strongconnect(edges: &[Vec<usize>], v: usize, state: &mut TarjanState) {
        state.indices[v] = Some(state.index);
        state.lowlinks[v] = state.index;
        state.index += 1;
        state.stack.push(v);
        state.on_stack[v] = true;

        for &w in &edges[v] {
            match state.indices[w] {
                None => {
                    Self::strongconnect(edges, w, state);
                    state.lowlinks[v] = state.lowlinks[v].min(state.lowlinks[w]);
                }
                Some(w_index) if state.on_stack[w] => {
                    state.lowlinks[v] = state.lowlinks[v].min(w_index);
                }
                Some(_) => {}
            }
        }

        // Root of an SCC: pop it off the stack
        if Some(state.lowlinks[v]) == state.indices[v] {
            let mut scc = Vec::new();
            while let Some(w) = state.stack.pop() {
                state.on_stack[w] = false;
                scc.push(w);
                if w == v {
                    break;
                }
            }
            scc.sort_unstable();
            state.sccs.push(scc);
        }
    }
}

/// Internal state for Tarjan's algorithm
struct TarjanState {
    index: usize,
    indices: Vec<Option<usize>>,
    lowlinks: Vec<usize>,
    on_stack: Vec<bool>,
    stack: Vec<usize>,
    sccs: Vec<Vec<usize>>,
}
