use ecolb_controller::config::ControllerConfig;
use ecolb_controller::device::{PipelineProgram, SimSwitch};
use ecolb_controller::models::{Binding, Bindings};
use ecolb_controller::policy::PolicyKind;
use ecolb_controller::reconciler::{SlotResult, TableReconciler, TableSpec, UpsertOutcome};
use ecolb_controller::{ConnectionManager, ConnectionState, ControlLoop, ControllerError, RetryPolicy};
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

fn bindings() -> Bindings {
    let mut b = Bindings::new();
    for n in 2u8..=5 {
        b.insert(
            format!("h{n}"),
            Binding {
                ip: format!("10.0.{n}.{n}").parse().unwrap(),
                mac: format!("08:00:00:00:0{n}:0{n}").parse().unwrap(),
                port: u16::from(n),
            },
        );
    }
    b
}

fn program() -> PipelineProgram {
    PipelineProgram { p4info: "build/lb.p4info.txtpb".into(), device_config: "build/lb.json".into() }
}

fn no_wait() -> RetryPolicy {
    RetryPolicy { attempts: 5, backoff: Duration::ZERO }
}

fn control_loop(sw: &SimSwitch, policy: PolicyKind, fan_out: usize) -> ControlLoop<SimSwitch> {
    ecolb_devkit::init_test_logging();
    let mut conn = ConnectionManager::new(sw.clone(), no_wait(), 1);
    conn.establish("127.0.0.1:9559", 0, &program()).unwrap();
    ControlLoop::new(
        conn,
        policy.build(90.0),
        fan_out,
        TableReconciler::new(TableSpec::default(), true),
        bindings(),
    )
}

fn peer() -> SocketAddr {
    "10.0.2.2:50000".parse().unwrap()
}

fn port_at(sw: &SimSwitch, slot: u32) -> Option<String> {
    sw.occupant(&TableSpec::default().name, slot)
        .and_then(|r| r.param("port").map(str::to_string))
}

#[test]
fn worked_example_fills_two_slots() {
    let sw = SimSwitch::new(8);
    let mut lp = control_loop(&sw, PolicyKind::Tiered, 2);

    lp.handle_datagram(b"h2,80.0000,20.00", peer());
    lp.handle_datagram(b"h3,200.0000,95.00", peer());
    let report = lp.handle_datagram(b"h4,50.0000,10.00", peer()).unwrap();

    let ranked: Vec<_> = lp.last_ranking().iter().map(|h| h.host_id.as_str()).collect();
    assert_eq!(ranked, ["h2", "h4"]);
    assert_eq!(report.failures(), 0);
    assert_eq!(port_at(&sw, 0).as_deref(), Some("2"));
    assert_eq!(port_at(&sw, 1).as_deref(), Some("4"));
    assert_eq!(sw.entries(&TableSpec::default().name).len(), 2);

    let verification = report.verification.unwrap();
    assert_eq!(verification.installed, Some(2));
    assert!(!verification.is_suspicious());
}

#[test]
fn ranking_change_overwrites_slot_in_place() {
    let sw = SimSwitch::new(8);
    let mut lp = control_loop(&sw, PolicyKind::Tiered, 2);

    lp.handle_datagram(b"h2,80.0000,20.00", peer());
    lp.handle_datagram(b"h4,50.0000,10.00", peer());
    assert_eq!(port_at(&sw, 1).as_deref(), Some("4"));

    // h5 overtakes h4 for slot 1
    let report = lp.handle_datagram(b"h5,60.0000,30.00", peer()).unwrap();
    assert_eq!(report.slots[1].host_id, "h5");
    assert_eq!(report.slots[1].result, SlotResult::Upsert(UpsertOutcome::Updated));
    assert_eq!(port_at(&sw, 1).as_deref(), Some("5"));
    assert_eq!(sw.entries(&TableSpec::default().name).len(), 2);
}

#[test]
fn performance_only_ignores_score() {
    let sw = SimSwitch::new(8);
    let mut lp = control_loop(&sw, PolicyKind::PerformanceOnly, 2);

    lp.handle_datagram(b"h2,900.0000,70.00", peer());
    lp.handle_datagram(b"h3,1.0000,5.00", peer());
    lp.handle_datagram(b"h4,2.0000,40.00", peer());

    let ranked: Vec<_> = lp.last_ranking().iter().map(|h| h.host_id.as_str()).collect();
    assert_eq!(ranked, ["h3", "h4"]);
}

#[test]
fn silent_host_keeps_competing() {
    let sw = SimSwitch::new(8);
    let mut lp = control_loop(&sw, PolicyKind::Tiered, 2);

    lp.handle_datagram(b"h2,80.0000,20.00", peer());
    // h2 goes quiet; h3 keeps reporting a worse score
    for _ in 0..10 {
        lp.handle_datagram(b"h3,10.0000,20.00", peer());
    }
    assert_eq!(lp.registry().len(), 2);
    assert_eq!(lp.last_ranking()[0].host_id, "h2");
    assert_eq!(port_at(&sw, 0).as_deref(), Some("2"));
}

#[test]
fn malformed_datagram_leaves_others_untouched() {
    let sw = SimSwitch::new(8);
    let mut lp = control_loop(&sw, PolicyKind::Tiered, 2);

    lp.handle_datagram(b"h2,80.0000,20.00", peer());
    let writes_before = sw.writes().len();
    assert!(lp.handle_datagram(b"h3,not-a-number,20.00", peer()).is_none());
    assert!(lp.handle_datagram(b"h3,1.0", peer()).is_none());

    assert_eq!(lp.registry().len(), 1);
    assert_eq!(lp.health().parse_errors, 2);
    assert_eq!(sw.writes().len(), writes_before);
}

#[test]
fn unreachable_device_never_reaches_the_loop() {
    let sw = SimSwitch::new(8).refuse_connects(5);
    let mut conn = ConnectionManager::new(sw.clone(), no_wait(), 1);

    let err = conn.establish("127.0.0.1:9559", 0, &program()).unwrap_err();
    assert!(matches!(err, ControllerError::ConnectionExhausted { attempts: 5, .. }));
    assert_eq!(conn.state(), ConnectionState::Failed);
    assert_eq!(sw.pipeline_installs(), 0);
    assert!(sw.writes().is_empty());
}

#[test]
fn serves_datagrams_over_loopback() {
    let sw = SimSwitch::new(8);
    let mut lp = control_loop(&sw, PolicyKind::Tiered, 2);

    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    socket.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let addr = socket.local_addr().unwrap();

    let agent = UdpSocket::bind("127.0.0.1:0").unwrap();
    for payload in ["h2,80.0000,20.00", "garbage", "h4,50.0000,10.00"] {
        agent.send_to(payload.as_bytes(), addr).unwrap();
    }

    lp.serve(&socket, Some(3)).unwrap();

    assert_eq!(lp.health().datagrams, 3);
    assert_eq!(lp.health().parse_errors, 1);
    assert_eq!(lp.health().cycles, 2);
    assert_eq!(port_at(&sw, 0).as_deref(), Some("2"));
    assert_eq!(port_at(&sw, 1).as_deref(), Some("4"));
}

#[test]
fn sample_config_is_valid() {
    let text = std::fs::read_to_string(concat!(env!("CARGO_MANIFEST_DIR"), "/controller.yaml")).unwrap();
    let cfg = ControllerConfig::from_yaml(&text).unwrap();
    cfg.validate().unwrap();
    assert_eq!(cfg.bindings["h2"].ip.to_string(), "10.0.2.2");
    assert_eq!(cfg.bindings["p4dev"], cfg.bindings["h2"]);
}
