//! Latest sample per host, owned by the receive loop.
//!
//! There is no expiry: a host that stops reporting keeps its last sample
//! and keeps taking part in ranking until it reports again or the process
//! restarts.

use crate::models::{HostSample, Report};
use std::collections::HashMap;
use time::OffsetDateTime;

#[derive(Debug, Clone, Default)]
pub struct StatsRegistry {
    samples: HashMap<String, HostSample>,
}

impl StatsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the sample for `report.host_id`. Returns true when the host
    /// was not known before.
    pub fn ingest(&mut self, report: Report, observed_at: OffsetDateTime) -> bool {
        let sample = HostSample {
            host_id: report.host_id.clone(),
            score: report.score,
            utilization: report.utilization,
            observed_at,
        };
        self.samples.insert(report.host_id, sample).is_none()
    }

    pub fn get(&self, host_id: &str) -> Option<&HostSample> {
        self.samples.get(host_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &HostSample> {
        self.samples.values()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn last_write_wins() {
        let mut reg = StatsRegistry::new();
        assert!(reg.ingest(Report::new("h2", 80.0, 20.0), datetime!(2024-01-01 0:00 UTC)));
        assert!(!reg.ingest(Report::new("h2", 10.0, 95.0), datetime!(2024-01-01 0:01 UTC)));

        let s = reg.get("h2").unwrap();
        assert_eq!(s.score, 10.0);
        assert_eq!(s.utilization, 95.0);
        assert_eq!(s.observed_at, datetime!(2024-01-01 0:01 UTC));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn silent_hosts_are_never_evicted() {
        let mut reg = StatsRegistry::new();
        reg.ingest(Report::new("h3", 50.0, 10.0), datetime!(2024-01-01 0:00 UTC));
        for minute in 1..30u8 {
            let at = datetime!(2024-01-01 0:00 UTC) + time::Duration::minutes(minute.into());
            reg.ingest(Report::new("h4", 1.0, 1.0), at);
        }
        let stale = reg.get("h3").unwrap();
        assert_eq!(stale.score, 50.0);
        assert_eq!(stale.observed_at, datetime!(2024-01-01 0:00 UTC));
        assert_eq!(reg.len(), 2);
    }
}
