//! Blocking telemetry receive loop.
//!
//! Every datagram is handled to completion (ingest, rank, reconcile, verify)
//! before the next `recv_from`. Nothing here is fatal: receive and parse
//! errors are logged and the loop moves on.

use crate::connection::ConnectionManager;
use crate::device::ForwardingDevice;
use crate::error::ControllerResult;
use crate::health::ControllerHealth;
use crate::models::{Bindings, RankedHost, RankedList, Report};
use crate::policy::SelectionPolicy;
use crate::reconciler::{ReconcileReport, TableReconciler};
use crate::state::StatsRegistry;
use std::net::{SocketAddr, UdpSocket};
use time::OffsetDateTime;
use tracing::{debug, error, info, warn};

pub const MAX_DATAGRAM: usize = 1024;

/// Host order only; score and utilization move on every report.
fn order_changed(prev: &[RankedHost], next: &[RankedHost]) -> bool {
    prev.len() != next.len() || prev.iter().zip(next).any(|(a, b)| a.host_id != b.host_id)
}

pub struct ControlLoop<D> {
    registry: StatsRegistry,
    policy: Box<dyn SelectionPolicy>,
    fan_out: usize,
    reconciler: TableReconciler,
    bindings: Bindings,
    connection: ConnectionManager<D>,
    health: ControllerHealth,
    health_every: u64,
    last_ranking: RankedList,
}

impl<D: ForwardingDevice> ControlLoop<D> {
    pub fn new(
        connection: ConnectionManager<D>,
        policy: Box<dyn SelectionPolicy>,
        fan_out: usize,
        reconciler: TableReconciler,
        bindings: Bindings,
    ) -> Self {
        Self {
            registry: StatsRegistry::new(),
            policy,
            fan_out,
            reconciler,
            bindings,
            connection,
            health: ControllerHealth::new(),
            health_every: 0,
            last_ranking: RankedList::new(),
        }
    }

    pub fn with_health_log_every(mut self, every: u64) -> Self {
        self.health_every = every;
        self
    }

    pub fn registry(&self) -> &StatsRegistry {
        &self.registry
    }

    pub fn health(&self) -> &ControllerHealth {
        &self.health
    }

    pub fn last_ranking(&self) -> &RankedList {
        &self.last_ranking
    }

    pub fn reconciler(&self) -> &TableReconciler {
        &self.reconciler
    }

    pub fn connection(&self) -> &ConnectionManager<D> {
        &self.connection
    }

    /// One full cycle for one datagram. `None` when the datagram was
    /// discarded or no cycle could run.
    pub fn handle_datagram(&mut self, payload: &[u8], peer: SocketAddr) -> Option<ReconcileReport> {
        self.health.datagrams += 1;

        let report = match Report::decode(payload) {
            Ok(r) => r,
            Err(e) => {
                self.health.parse_errors += 1;
                warn!(%peer, error = %e, "discarding malformed telemetry");
                return None;
            }
        };
        debug!(
            %peer,
            host = %report.host_id,
            score = report.score,
            util = report.utilization,
            "telemetry"
        );

        let host = report.host_id.clone();
        if self.registry.ingest(report, OffsetDateTime::now_utc()) {
            info!(host = %host, tracked = self.registry.len(), "new host reporting");
        }

        let ranked = self.policy.rank(&self.registry, self.fan_out);
        if order_changed(&self.last_ranking, &ranked) {
            self.health.ranking_changes += 1;
            let order: Vec<&str> = ranked.iter().map(|h| h.host_id.as_str()).collect();
            info!(policy = self.policy.name(), ranking = ?order, "ranking changed");
        }

        let (device, session) = match self.connection.ready() {
            Ok(ready) => ready,
            Err(e) => {
                error!(error = %e, "no device session, skipping reconcile");
                self.last_ranking = ranked;
                return None;
            }
        };
        let report = self.reconciler.reconcile(device, session, &ranked, &self.bindings);
        self.last_ranking = ranked;

        self.health.record_cycle(&report);
        self.health.maybe_log(self.health_every, self.registry.len());
        Some(report)
    }

    /// Receive and handle datagrams. `limit` bounds the number of datagrams
    /// received (tests); `None` runs until the process is terminated.
    pub fn serve(&mut self, socket: &UdpSocket, limit: Option<usize>) -> ControllerResult<()> {
        let mut buf = [0u8; MAX_DATAGRAM];
        let mut received = 0usize;

        info!(addr = ?socket.local_addr().ok(), "listening for telemetry");
        while limit.map_or(true, |l| received < l) {
            match socket.recv_from(&mut buf) {
                Ok((len, peer)) => {
                    received += 1;
                    self.handle_datagram(&buf[..len], peer);
                }
                Err(e) => {
                    self.health.receive_errors += 1;
                    warn!(error = %e, "telemetry receive failed");
                }
            }
        }
        Ok(())
    }

    pub fn run(&mut self, socket: &UdpSocket) -> ControllerResult<()> {
        self.serve(socket, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::RetryPolicy;
    use crate::device::{PipelineProgram, SimSwitch};
    use crate::policy::PolicyKind;
    use crate::reconciler::TableSpec;
    use std::time::Duration;

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    fn ready_loop(sw: &SimSwitch) -> ControlLoop<SimSwitch> {
        let mut conn = ConnectionManager::new(
            sw.clone(),
            RetryPolicy { attempts: 1, backoff: Duration::ZERO },
            1,
        );
        let program = PipelineProgram { p4info: "p.txtpb".into(), device_config: "p.json".into() };
        conn.establish("sim:0", 0, &program).unwrap();

        let mut bindings = Bindings::new();
        bindings.insert(
            "h2".into(),
            crate::models::Binding {
                ip: "10.0.2.2".parse().unwrap(),
                mac: "08:00:00:00:02:02".parse().unwrap(),
                port: 2,
            },
        );
        ControlLoop::new(
            conn,
            PolicyKind::Tiered.build(90.0),
            2,
            TableReconciler::new(TableSpec::default(), true),
            bindings,
        )
    }

    #[test]
    fn malformed_datagram_is_counted_and_dropped() {
        let sw = SimSwitch::new(8);
        let mut lp = ready_loop(&sw);

        assert!(lp.handle_datagram(b"garbage", peer()).is_none());
        assert!(lp.handle_datagram(&[0xff, 0xfe], peer()).is_none());
        assert_eq!(lp.health().parse_errors, 2);
        assert!(lp.registry().is_empty());
        assert!(sw.writes().is_empty());
    }

    #[test]
    fn every_datagram_runs_a_cycle() {
        let sw = SimSwitch::new(8);
        let mut lp = ready_loop(&sw);

        let first = lp.handle_datagram(b"h2,80.0000,20.00", peer()).unwrap();
        assert_eq!(first.slots.len(), 1);
        let again = lp.handle_datagram(b"h2,81.0000,21.00", peer()).unwrap();
        assert_eq!(again.failures(), 0);

        assert_eq!(lp.health().cycles, 2);
        assert_eq!(lp.last_ranking()[0].host_id, "h2");
        assert_eq!(sw.occupant(&TableSpec::default().name, 0).unwrap().param("port"), Some("2"));
    }

    #[test]
    fn score_updates_alone_are_not_a_ranking_change() {
        let sw = SimSwitch::new(8);
        let mut lp = ready_loop(&sw);

        lp.handle_datagram(b"h2,80.0000,20.00", peer()).unwrap();
        lp.handle_datagram(b"h2,81.5000,22.00", peer()).unwrap();
        lp.handle_datagram(b"h2,79.0000,18.00", peer()).unwrap();
        assert_eq!(lp.health().ranking_changes, 1);

        // h3 has no binding but still ranks, ahead of h2
        lp.handle_datagram(b"h3,200.0000,10.00", peer()).unwrap();
        lp.handle_datagram(b"h3,201.0000,11.00", peer()).unwrap();
        assert_eq!(lp.health().ranking_changes, 2);
        assert_eq!(lp.last_ranking()[0].host_id, "h3");
    }

    #[test]
    fn skips_reconcile_without_session() {
        let sw = SimSwitch::new(8);
        let conn = ConnectionManager::new(sw.clone(), RetryPolicy::default(), 1);
        let mut lp = ControlLoop::new(
            conn,
            PolicyKind::Tiered.build(90.0),
            2,
            TableReconciler::new(TableSpec::default(), false),
            Bindings::new(),
        );

        assert!(lp.handle_datagram(b"h2,1.0,1.0", peer()).is_none());
        assert_eq!(lp.registry().len(), 1);
        assert!(sw.writes().is_empty());
    }
}
