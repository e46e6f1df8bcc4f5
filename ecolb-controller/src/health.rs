use crate::reconciler::ReconcileReport;
use std::time::Instant;
use tracing::info;

/// Running counters for the control loop, logged as a periodic summary.
#[derive(Debug, Clone)]
pub struct ControllerHealth {
    start_time: Instant,
    pub datagrams: u64,
    pub parse_errors: u64,
    pub receive_errors: u64,
    pub cycles: u64,
    pub slot_failures: u64,
    pub unresolved_hosts: u64,
    pub verify_warnings: u64,
    pub ranking_changes: u64,
}

impl Default for ControllerHealth {
    fn default() -> Self {
        Self::new()
    }
}

impl ControllerHealth {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            datagrams: 0,
            parse_errors: 0,
            receive_errors: 0,
            cycles: 0,
            slot_failures: 0,
            unresolved_hosts: 0,
            verify_warnings: 0,
            ranking_changes: 0,
        }
    }

    pub fn record_cycle(&mut self, report: &ReconcileReport) {
        self.cycles += 1;
        self.slot_failures += report.failures() as u64;
        self.unresolved_hosts += report.unresolved() as u64;
        if report.verification.as_ref().is_some_and(|v| v.is_suspicious()) {
            self.verify_warnings += 1;
        }
    }

    /// Log a summary every `every` cycles (0 disables).
    pub fn maybe_log(&self, every: u64, hosts_tracked: usize) {
        if every == 0 || self.cycles == 0 || self.cycles % every != 0 {
            return;
        }
        info!(
            uptime_s = self.start_time.elapsed().as_secs(),
            hosts_tracked,
            datagrams = self.datagrams,
            parse_errors = self.parse_errors,
            receive_errors = self.receive_errors,
            cycles = self.cycles,
            slot_failures = self.slot_failures,
            unresolved_hosts = self.unresolved_hosts,
            verify_warnings = self.verify_warnings,
            ranking_changes = self.ranking_changes,
            "controller health"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciler::{SlotReport, SlotResult, UpsertOutcome, Verification};

    #[test]
    fn counts_failures_and_warnings() {
        let mut h = ControllerHealth::new();
        let report = ReconcileReport {
            slots: vec![
                SlotReport { slot: 0, host_id: "h2".into(), result: SlotResult::Upsert(UpsertOutcome::Inserted) },
                SlotReport { slot: 1, host_id: "h3".into(), result: SlotResult::Upsert(UpsertOutcome::Failed("x".into())) },
                SlotReport { slot: 2, host_id: "hx".into(), result: SlotResult::Unresolved },
            ],
            verification: Some(Verification { installed: Some(0), expected_nonempty: true }),
        };
        h.record_cycle(&report);
        h.record_cycle(&ReconcileReport::default());

        assert_eq!(h.cycles, 2);
        assert_eq!(h.slot_failures, 1);
        assert_eq!(h.unresolved_hosts, 1);
        assert_eq!(h.verify_warnings, 1);
    }
}
