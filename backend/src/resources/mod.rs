//! Shared session pools
//!
//! Phases that carry the same `sharedResources` tag share one session pool.
//! Capacity is reserved once, at graph-build time, as the largest concurrency
//! any member phase can require. At run time a single phase holds the lease
//! on a tag; other members wait in NotStarted until it is released.
//!
//! # Example
//!
//! ```rust
//! use phase_scheduler_core::models::{Benchmark, PhaseConfig, PhaseId, PhaseKind};
//! use phase_scheduler_core::resources::ResourcePools;
//!
//! let phases = vec![
//!     PhaseConfig::new("iter-1", PhaseKind::Always { users: 4 })
//!         .with_duration(1000)
//!         .with_shared_resources("users"),
//!     PhaseConfig::new("iter-2", PhaseKind::Always { users: 8 })
//!         .with_duration(1000)
//!         .with_shared_resources("users")
//!         .start_after("iter-1"),
//! ];
//! let benchmark = Benchmark::new("b".into(), vec!["a1".into()], &phases).unwrap();
//! let mut pools = ResourcePools::reserve(&benchmark).unwrap();
//!
//! assert_eq!(pools.capacity("users"), Some(8));
//! assert!(pools.try_acquire("users", PhaseId(0)));
//! assert!(!pools.try_acquire("users", PhaseId(1)));
//! ```

use crate::models::{Benchmark, BenchmarkDefinitionError, PhaseId};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
struct Pool {
    capacity: u64,
    in_use: u64,
    holder: Option<PhaseId>,
}

/// All shared pools of a run, keyed by tag
#[derive(Debug, Clone, Default)]
pub struct ResourcePools {
    pools: BTreeMap<String, Pool>,
}

impl ResourcePools {
    /// Reserve capacity for every tag used in `benchmark`
    ///
    /// # Errors
    ///
    /// `AmbiguousSharedResources` when an open phase without `maxSessions`
    /// shares a tag: its concurrency has no upper bound to reserve.
    pub fn reserve(benchmark: &Benchmark) -> Result<Self, BenchmarkDefinitionError> {
        let mut pools: BTreeMap<String, Pool> = BTreeMap::new();
        for phase in benchmark.phases() {
            let Some(tag) = phase.shared_resources() else {
                continue;
            };
            let peak = phase.peak_concurrency(benchmark.agent_count()).ok_or_else(|| {
                BenchmarkDefinitionError::AmbiguousSharedResources {
                    tag: tag.to_string(),
                    phase: phase.name().to_string(),
                }
            })?;
            let pool = pools.entry(tag.to_string()).or_insert(Pool {
                capacity: 0,
                in_use: 0,
                holder: None,
            });
            pool.capacity = pool.capacity.max(peak);
        }
        Ok(Self { pools })
    }

    pub fn capacity(&self, tag: &str) -> Option<u64> {
        self.pools.get(tag).map(|p| p.capacity)
    }

    pub fn holder(&self, tag: &str) -> Option<PhaseId> {
        self.pools.get(tag).and_then(|p| p.holder)
    }

    /// Take the lease on `tag` for `phase`; true if held afterwards
    pub fn try_acquire(&mut self, tag: &str, phase: PhaseId) -> bool {
        match self.pools.get_mut(tag) {
            Some(pool) => match pool.holder {
                None => {
                    pool.holder = Some(phase);
                    pool.in_use = 0;
                    true
                }
                Some(holder) => holder == phase,
            },
            None => false,
        }
    }

    /// Free slots for the lease holder (zero for anyone else)
    pub fn available(&self, tag: &str, phase: PhaseId) -> u64 {
        match self.pools.get(tag) {
            Some(pool) if pool.holder == Some(phase) => pool.capacity.saturating_sub(pool.in_use),
            _ => 0,
        }
    }

    /// Set the number of occupied slots to the holder's active session count
    pub fn sync_usage(&mut self, tag: &str, phase: PhaseId, active: u64) {
        if let Some(pool) = self.pools.get_mut(tag) {
            if pool.holder == Some(phase) {
                pool.in_use = active;
            }
        }
    }

    /// Release the lease if `phase` holds it
    pub fn release(&mut self, tag: &str, phase: PhaseId) {
        if let Some(pool) = self.pools.get_mut(tag) {
            if pool.holder == Some(phase) {
                pool.holder = None;
                pool.in_use = 0;
            }
        }
    }
}
