/*!
 * TABLE RECONCILER - maps ranked hosts onto fixed forwarding table slots.
 *
 * ROLE: rank position i is written to the rule keyed by slot i. Each slot is
 * upserted independently: INSERT first, and on any INSERT error a MODIFY on
 * the same key. A slot whose MODIFY also fails keeps its previous occupant
 * and the remaining slots are still written. Nothing is rolled back.
 *
 * CONTRACT: slots at or beyond the ranked list length are never touched or
 * deleted. When the ranking shrinks, higher slots keep forwarding to their
 * last host until a later ranking reuses that index.
 */

use crate::device::{ForwardingDevice, Session, TableEntry, WriteMode};
use crate::models::{Binding, Bindings, RankedHost};
use serde::Deserialize;
use tracing::{debug, info, warn};

pub const PARAM_DMAC: &str = "nhop_dmac";
pub const PARAM_IPV4: &str = "nhop_ipv4";
pub const PARAM_PORT: &str = "port";

/// Target table description.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TableSpec {
    pub name: String,
    pub action: String,
    pub match_field: String,
    /// Number of slots the table holds.
    pub capacity: usize,
}

impl Default for TableSpec {
    fn default() -> Self {
        Self {
            name: "MyIngress.ecmp_nhop".into(),
            action: "MyIngress.set_nhop".into(),
            match_field: "meta.ecmp_select".into(),
            capacity: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotResult {
    Upsert(UpsertOutcome),
    /// Host has no binding; slot left as it was.
    Unresolved,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotReport {
    pub slot: usize,
    pub host_id: String,
    pub result: SlotResult,
}

/// Read-back of the table after a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    pub installed: Option<usize>,
    pub expected_nonempty: bool,
}

impl Verification {
    pub fn is_suspicious(&self) -> bool {
        self.expected_nonempty && self.installed == Some(0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub slots: Vec<SlotReport>,
    pub verification: Option<Verification>,
}

impl ReconcileReport {
    pub fn failures(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| matches!(s.result, SlotResult::Upsert(UpsertOutcome::Failed(_))))
            .count()
    }

    pub fn unresolved(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.result == SlotResult::Unresolved)
            .count()
    }
}

pub struct TableReconciler {
    spec: TableSpec,
    verify: bool,
    /// Host we believe each slot holds. Informational only: writes are never
    /// skipped because of it.
    shadow: Vec<Option<String>>,
}

impl TableReconciler {
    pub fn new(spec: TableSpec, verify: bool) -> Self {
        let shadow = vec![None; spec.capacity];
        Self { spec, verify, shadow }
    }

    pub fn spec(&self) -> &TableSpec {
        &self.spec
    }

    pub fn shadow(&self) -> &[Option<String>] {
        &self.shadow
    }

    pub fn entry_for(&self, slot: usize, binding: &Binding) -> TableEntry {
        TableEntry {
            table: self.spec.name.clone(),
            match_field: self.spec.match_field.clone(),
            match_value: slot as u32,
            action: self.spec.action.clone(),
            params: vec![
                (PARAM_DMAC.into(), binding.mac.to_string()),
                (PARAM_IPV4.into(), binding.ip.to_string()),
                (PARAM_PORT.into(), binding.port.to_string()),
            ],
        }
    }

    /// INSERT, then MODIFY on any INSERT error.
    pub fn upsert<D: ForwardingDevice + ?Sized>(
        device: &mut D,
        session: &Session,
        entry: &TableEntry,
    ) -> UpsertOutcome {
        let insert_err = match device.write_rule(session, entry, WriteMode::Insert) {
            Ok(()) => return UpsertOutcome::Inserted,
            Err(e) => e,
        };
        debug!(slot = entry.match_value, error = %insert_err, "insert refused, modifying");

        match device.write_rule(session, entry, WriteMode::Modify) {
            Ok(()) => UpsertOutcome::Updated,
            Err(e) => UpsertOutcome::Failed(format!("insert: {insert_err}; modify: {e}")),
        }
    }

    pub fn reconcile<D: ForwardingDevice + ?Sized>(
        &mut self,
        device: &mut D,
        session: &Session,
        ranked: &[RankedHost],
        bindings: &Bindings,
    ) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        if ranked.len() > self.spec.capacity {
            warn!(
                ranked = ranked.len(),
                capacity = self.spec.capacity,
                "ranking longer than table, extra hosts get no slot"
            );
        }

        for (slot, host) in ranked.iter().enumerate().take(self.spec.capacity) {
            let Some(binding) = bindings.get(&host.host_id) else {
                warn!(slot, host = %host.host_id, "skipping unknown host");
                report.slots.push(SlotReport {
                    slot,
                    host_id: host.host_id.clone(),
                    result: SlotResult::Unresolved,
                });
                continue;
            };

            let entry = self.entry_for(slot, binding);
            let outcome = Self::upsert(device, session, &entry);
            match &outcome {
                UpsertOutcome::Inserted | UpsertOutcome::Updated => {
                    let previous = self.shadow[slot].replace(host.host_id.clone());
                    if previous.as_deref() != Some(host.host_id.as_str()) {
                        info!(
                            slot,
                            host = %host.host_id,
                            previous = previous.as_deref().unwrap_or("-"),
                            score = format_args!("{:.2}", host.score),
                            ?outcome,
                            "slot now points at host"
                        );
                    } else {
                        debug!(slot, host = %host.host_id, ?outcome, "slot unchanged");
                    }
                }
                UpsertOutcome::Failed(reason) => {
                    warn!(slot, host = %host.host_id, reason = %reason, "slot write failed, keeping previous occupant");
                }
            }
            report.slots.push(SlotReport {
                slot,
                host_id: host.host_id.clone(),
                result: SlotResult::Upsert(outcome),
            });
        }

        if self.verify {
            report.verification = Some(self.verify_table(device, session));
        }
        report
    }

    /// Read back the installed-entry count; a table we believe populated that
    /// reads as empty is flagged. Never retried.
    pub fn verify_table<D: ForwardingDevice + ?Sized>(
        &self,
        device: &mut D,
        session: &Session,
    ) -> Verification {
        let expected_nonempty = self.shadow.iter().any(Option::is_some);
        let installed = match device.read_rule_count(session, &self.spec.name) {
            Ok(n) => Some(n),
            Err(e) => {
                warn!(table = %self.spec.name, error = %e, "could not read back table");
                None
            }
        };
        let v = Verification { installed, expected_nonempty };
        if v.is_suspicious() {
            warn!(table = %self.spec.name, "table expected to hold rules reads as empty");
        }
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{PipelineProgram, SimSwitch};

    fn bindings() -> Bindings {
        let mut b = Bindings::new();
        for (id, n) in [("h2", 2u8), ("h3", 3), ("h4", 4)] {
            b.insert(
                id.to_string(),
                Binding {
                    ip: format!("10.0.{n}.{n}").parse().unwrap(),
                    mac: format!("08:00:00:00:0{n}:0{n}").parse().unwrap(),
                    port: u16::from(n),
                },
            );
        }
        b
    }

    fn ranked(ids: &[&str]) -> Vec<RankedHost> {
        ids.iter()
            .map(|id| RankedHost { host_id: id.to_string(), score: 1.0, utilization: 1.0 })
            .collect()
    }

    fn ready_switch(capacity: usize) -> (SimSwitch, Session) {
        let mut sw = SimSwitch::new(capacity);
        let s = sw.connect("sim", 0).unwrap();
        sw.install_pipeline(&s, &PipelineProgram { p4info: "p".into(), device_config: "j".into() })
            .unwrap();
        (sw, s)
    }

    fn ip_at(sw: &SimSwitch, slot: u32) -> Option<String> {
        sw.occupant("MyIngress.ecmp_nhop", slot)
            .and_then(|r| r.param(PARAM_IPV4).map(str::to_string))
    }

    #[test]
    fn insert_then_modify() {
        let (mut sw, s) = ready_switch(8);
        let mut rec = TableReconciler::new(TableSpec::default(), true);

        let first = rec.reconcile(&mut sw, &s, &ranked(&["h2", "h4"]), &bindings());
        assert!(first
            .slots
            .iter()
            .all(|r| r.result == SlotResult::Upsert(UpsertOutcome::Inserted)));

        let second = rec.reconcile(&mut sw, &s, &ranked(&["h4", "h2"]), &bindings());
        assert!(second
            .slots
            .iter()
            .all(|r| r.result == SlotResult::Upsert(UpsertOutcome::Updated)));
        assert_eq!(ip_at(&sw, 0).as_deref(), Some("10.0.4.4"));
        assert_eq!(ip_at(&sw, 1).as_deref(), Some("10.0.2.2"));
        assert_eq!(second.verification.unwrap().installed, Some(2));
    }

    #[test]
    fn converged_table_stays_converged() {
        let (mut sw, s) = ready_switch(8);
        let mut rec = TableReconciler::new(TableSpec::default(), true);
        let list = ranked(&["h2", "h4"]);

        rec.reconcile(&mut sw, &s, &list, &bindings());
        let before = sw.entries("MyIngress.ecmp_nhop");
        let again = rec.reconcile(&mut sw, &s, &list, &bindings());

        assert_eq!(again.failures(), 0);
        assert_eq!(sw.entries("MyIngress.ecmp_nhop"), before);
        assert!(!again.verification.unwrap().is_suspicious());
    }

    #[test]
    fn unknown_host_skips_only_its_slot() {
        let (mut sw, s) = ready_switch(8);
        let mut rec = TableReconciler::new(TableSpec::default(), false);
        let report = rec.reconcile(&mut sw, &s, &ranked(&["ghost", "h3"]), &bindings());

        assert_eq!(report.unresolved(), 1);
        assert_eq!(ip_at(&sw, 0), None);
        assert_eq!(ip_at(&sw, 1).as_deref(), Some("10.0.3.3"));
        assert!(report.verification.is_none());
    }

    #[test]
    fn failed_slot_is_isolated_and_keeps_occupant() {
        let (mut sw, s) = ready_switch(8);
        let mut rec = TableReconciler::new(TableSpec::default(), false);
        rec.reconcile(&mut sw, &s, &ranked(&["h2", "h3"]), &bindings());

        sw.break_slot(0);
        let report = rec.reconcile(&mut sw, &s, &ranked(&["h4", "h2"]), &bindings());

        assert_eq!(report.failures(), 1);
        assert!(matches!(
            report.slots[0].result,
            SlotResult::Upsert(UpsertOutcome::Failed(_))
        ));
        assert_eq!(ip_at(&sw, 0).as_deref(), Some("10.0.2.2"));
        assert_eq!(ip_at(&sw, 1).as_deref(), Some("10.0.2.2"));
        assert_eq!(rec.shadow()[0].as_deref(), Some("h2"));
    }

    #[test]
    fn shrinking_ranking_leaves_higher_slots_alone() {
        let (mut sw, s) = ready_switch(8);
        let mut rec = TableReconciler::new(TableSpec::default(), false);
        rec.reconcile(&mut sw, &s, &ranked(&["h2", "h3", "h4"]), &bindings());
        let writes_before = sw.writes().len();

        rec.reconcile(&mut sw, &s, &ranked(&["h4"]), &bindings());

        assert_eq!(ip_at(&sw, 0).as_deref(), Some("10.0.4.4"));
        assert_eq!(ip_at(&sw, 1).as_deref(), Some("10.0.3.3"));
        assert_eq!(ip_at(&sw, 2).as_deref(), Some("10.0.4.4"));
        assert!(sw.writes()[writes_before..].iter().all(|w| w.slot == 0));
    }

    #[test]
    fn preexisting_rule_is_overwritten() {
        let (mut sw, s) = ready_switch(8);
        let rec_spec = TableSpec::default();
        sw.preload(
            &rec_spec.name,
            1,
            crate::device::sim::InstalledRule {
                action: rec_spec.action.clone(),
                params: vec![(PARAM_IPV4.into(), "10.0.9.9".into())],
            },
        );
        let mut rec = TableReconciler::new(rec_spec, false);
        let report = rec.reconcile(&mut sw, &s, &ranked(&["h2", "h4"]), &bindings());

        assert_eq!(report.slots[1].result, SlotResult::Upsert(UpsertOutcome::Updated));
        assert_eq!(ip_at(&sw, 1).as_deref(), Some("10.0.4.4"));
    }

    #[test]
    fn verification_flags_empty_table() {
        let (mut sw, s) = ready_switch(8);
        let mut rec = TableReconciler::new(TableSpec::default(), true);
        rec.reconcile(&mut sw, &s, &ranked(&["h2"]), &bindings());

        // a fresh pipeline swap wipes the dataplane behind our back
        let mut wiped = SimSwitch::new(8);
        let ws = wiped.connect("sim", 0).unwrap();
        wiped
            .install_pipeline(&ws, &PipelineProgram { p4info: "p".into(), device_config: "j".into() })
            .unwrap();
        let v = rec.verify_table(&mut wiped, &ws);
        assert!(v.is_suspicious());
    }
}
