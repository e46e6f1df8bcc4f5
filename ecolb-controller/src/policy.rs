//! Host selection policies.
//!
//! A policy turns a registry snapshot into a ranked list of at most `n`
//! hosts. Policies are pure: the same snapshot and configuration always give
//! the same ranking. Equal sort keys are broken by host id ascending.

use crate::models::{HostSample, RankedHost, RankedList};
use crate::state::StatsRegistry;
use serde::Deserialize;
use std::cmp::Ordering;

pub const DEFAULT_BUSY_THRESHOLD: f64 = 90.0;

pub trait SelectionPolicy: Send {
    fn rank(&self, snapshot: &StatsRegistry, n: usize) -> RankedList;
    fn name(&self) -> &'static str;
}

/// Which policy the controller runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyKind {
    #[default]
    Tiered,
    PerformanceOnly,
}

impl PolicyKind {
    pub fn build(self, busy_threshold: f64) -> Box<dyn SelectionPolicy> {
        match self {
            PolicyKind::Tiered => Box::new(TieredPolicy::new(busy_threshold)),
            PolicyKind::PerformanceOnly => Box::new(PerformanceOnlyPolicy),
        }
    }
}

/// Available hosts (utilization below the threshold) first, then busy
/// hosts; each tier sorted by efficiency score, best first.
#[derive(Debug, Clone)]
pub struct TieredPolicy {
    busy_threshold: f64,
}

impl TieredPolicy {
    pub fn new(busy_threshold: f64) -> Self {
        Self { busy_threshold }
    }
}

impl Default for TieredPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_BUSY_THRESHOLD)
    }
}

fn by_score_desc(a: &&HostSample, b: &&HostSample) -> Ordering {
    b.score.total_cmp(&a.score).then_with(|| a.host_id.cmp(&b.host_id))
}

impl SelectionPolicy for TieredPolicy {
    fn rank(&self, snapshot: &StatsRegistry, n: usize) -> RankedList {
        let (mut available, mut busy): (Vec<&HostSample>, Vec<&HostSample>) = snapshot
            .iter()
            .partition(|s| s.utilization < self.busy_threshold);

        available.sort_by(by_score_desc);
        busy.sort_by(by_score_desc);

        available
            .into_iter()
            .chain(busy)
            .take(n)
            .map(RankedHost::from)
            .collect()
    }

    fn name(&self) -> &'static str {
        "tiered"
    }
}

/// Least loaded first; ignores the efficiency score.
#[derive(Debug, Clone, Default)]
pub struct PerformanceOnlyPolicy;

impl SelectionPolicy for PerformanceOnlyPolicy {
    fn rank(&self, snapshot: &StatsRegistry, n: usize) -> RankedList {
        let mut hosts: Vec<&HostSample> = snapshot.iter().collect();
        hosts.sort_by(|a, b| {
            a.utilization
                .total_cmp(&b.utilization)
                .then_with(|| a.host_id.cmp(&b.host_id))
        });
        hosts.into_iter().take(n).map(RankedHost::from).collect()
    }

    fn name(&self) -> &'static str {
        "performance-only"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Report;
    use time::OffsetDateTime;

    fn registry(hosts: &[(&str, f64, f64)]) -> StatsRegistry {
        let mut reg = StatsRegistry::new();
        for (id, util, score) in hosts {
            reg.ingest(Report::new(*id, *score, *util), OffsetDateTime::UNIX_EPOCH);
        }
        reg
    }

    fn ids(list: &RankedList) -> Vec<&str> {
        list.iter().map(|h| h.host_id.as_str()).collect()
    }

    #[test]
    fn tiered_worked_example() {
        // (id, utilization, score)
        let reg = registry(&[("h2", 20.0, 80.0), ("h3", 95.0, 200.0), ("h4", 10.0, 50.0)]);
        let policy = TieredPolicy::new(90.0);

        assert_eq!(ids(&policy.rank(&reg, 3)), vec!["h2", "h4", "h3"]);
        assert_eq!(ids(&policy.rank(&reg, 2)), vec!["h2", "h4"]);
    }

    #[test]
    fn tiered_threshold_is_inclusive_for_busy() {
        let reg = registry(&[("a", 90.0, 1000.0), ("b", 89.99, 1.0)]);
        assert_eq!(ids(&TieredPolicy::default().rank(&reg, 2)), vec!["b", "a"]);
    }

    #[test]
    fn tiered_available_always_ahead_of_busy() {
        let mut hosts = Vec::new();
        for i in 0..40u32 {
            let util = f64::from((i * 37) % 101);
            let score = f64::from((i * 53) % 17);
            hosts.push((format!("h{i}"), util, score));
        }
        let mut reg = StatsRegistry::new();
        for (id, util, score) in &hosts {
            reg.ingest(Report::new(id.clone(), *score, *util), OffsetDateTime::UNIX_EPOCH);
        }

        let ranked = TieredPolicy::new(60.0).rank(&reg, usize::MAX);
        assert_eq!(ranked.len(), hosts.len());
        let first_busy = ranked.iter().position(|h| h.utilization >= 60.0).unwrap();
        assert!(ranked[first_busy..].iter().all(|h| h.utilization >= 60.0));
        assert!(ranked[..first_busy].iter().all(|h| h.utilization < 60.0));
    }

    #[test]
    fn ties_break_by_host_id() {
        let reg = registry(&[("h9", 10.0, 5.0), ("h1", 10.0, 5.0), ("h5", 10.0, 5.0)]);
        assert_eq!(ids(&TieredPolicy::default().rank(&reg, 3)), vec!["h1", "h5", "h9"]);
        assert_eq!(ids(&PerformanceOnlyPolicy.rank(&reg, 3)), vec!["h1", "h5", "h9"]);
    }

    #[test]
    fn ranking_is_deterministic() {
        let reg = registry(&[("x", 50.0, 3.0), ("y", 50.0, 3.0), ("z", 95.0, 9.0), ("w", 1.0, 3.0)]);
        let policy = TieredPolicy::default();
        let first = policy.rank(&reg, 4);
        for _ in 0..20 {
            assert_eq!(policy.rank(&reg.clone(), 4), first);
        }
    }

    #[test]
    fn performance_only_sorts_by_load() {
        let reg = registry(&[("h2", 20.0, 80.0), ("h3", 95.0, 200.0), ("h4", 10.0, 50.0)]);
        assert_eq!(ids(&PerformanceOnlyPolicy.rank(&reg, 2)), vec!["h4", "h2"]);
    }

    #[test]
    fn empty_registry_and_zero_fan_out() {
        let reg = StatsRegistry::new();
        assert!(TieredPolicy::default().rank(&reg, 2).is_empty());
        let reg = registry(&[("h2", 20.0, 80.0)]);
        assert!(TieredPolicy::default().rank(&reg, 0).is_empty());
    }

    #[test]
    fn kind_builds_named_policy() {
        assert_eq!(PolicyKind::Tiered.build(90.0).name(), "tiered");
        assert_eq!(PolicyKind::PerformanceOnly.build(90.0).name(), "performance-only");
    }
}
