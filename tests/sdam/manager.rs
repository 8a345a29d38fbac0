use mongodb_topology::error::Error;
use mongodb_topology::pool::StreamPoolFactory;
use mongodb_topology::topology::server::ServerType;
use mongodb_topology::topology::{TopologyManager, TopologyOptions, TopologyType};

use std::sync::Arc;

use super::framework::*;

fn options(seeds: &[&str]) -> TopologyOptions {
    let mut options = TopologyOptions::new("test");
    options.seeds = seeds.iter().map(|seed| host(seed)).collect();
    options
}

fn start(
    options: TopologyOptions,
    sink: &Arc<RecordingSink>,
    probe: &Arc<ScriptedProbe>,
) -> Result<TopologyManager, Error> {
    TopologyManager::start(
        options,
        sink.clone(),
        Arc::new(StreamPoolFactory),
        probe.clone(),
    )
}

#[test]
fn rejects_single_topology_with_multiple_seeds() {
    let sink = Arc::new(RecordingSink::new());
    let probe = Arc::new(ScriptedProbe::new());

    let mut opts = options(&["a:27017", "b:27017"]);
    opts.topology_type = TopologyType::Single;

    match start(opts, &sink, &probe) {
        Err(Error::ArgumentError(_)) => (),
        other => panic!("expected an argument error, got {:?}", other.map(|_| ())),
    }

    // Rejection happens before any resource exists or event fires.
    assert!(sink.events().is_empty());
}

#[test]
fn rejects_set_name_with_sharded_hint() {
    let sink = Arc::new(RecordingSink::new());
    let probe = Arc::new(ScriptedProbe::new());

    let mut opts = options(&["a:27017"]);
    opts.topology_type = TopologyType::Sharded;
    opts.set_name = "rs0".to_owned();

    assert!(matches!(
        start(opts, &sink, &probe),
        Err(Error::ArgumentError(_))
    ));
    assert!(sink.events().is_empty());
}

#[test]
fn rejects_missing_database() {
    let sink = Arc::new(RecordingSink::new());
    let probe = Arc::new(ScriptedProbe::new());

    let mut opts = options(&["a:27017"]);
    opts.database = None;

    assert!(matches!(
        start(opts, &sink, &probe),
        Err(Error::ArgumentError(_))
    ));
    assert!(sink.events().is_empty());
}

#[test]
fn standalone_discovery_emits_events_in_order() {
    let sink = Arc::new(RecordingSink::new());
    let probe = Arc::new(ScriptedProbe::new());
    probe.script("a:27017", standalone_reply());

    let manager = start(options(&["a:27017"]), &sink, &probe).unwrap();

    assert!(wait_until(
        || matches!(manager.topology(), Ok(ref topology) if topology.topology_type == TopologyType::Single),
        5000,
    ));

    let topology = manager.topology().unwrap();
    assert_eq!(topology.servers.len(), 1);
    assert_eq!(
        topology.servers[&host("a:27017")].server_type,
        ServerType::Standalone
    );

    assert_eq!(
        sink.labels()[..4],
        [
            "topology_opening".to_owned(),
            "server_opening a:27017".to_owned(),
            "server_description_changed a:27017".to_owned(),
            "topology_description_changed".to_owned(),
        ]
    );

    manager.stop().unwrap();

    let labels = sink.labels();
    assert_eq!(
        labels[labels.len() - 2..],
        [
            "server_closed a:27017".to_owned(),
            "topology_closed".to_owned(),
        ]
    );
}

#[test]
fn replica_set_discovery_starts_member_monitors() {
    let sink = Arc::new(RecordingSink::new());
    let probe = Arc::new(ScriptedProbe::new());
    probe.script(
        "a:27017",
        primary_reply("rs0", &["a:27017", "b:27017"], 1, election_id(1)),
    );
    probe.script(
        "b:27017",
        secondary_reply("b:27017", "rs0", &["a:27017", "b:27017"]),
    );

    let manager = start(options(&["a:27017"]), &sink, &probe).unwrap();

    assert!(wait_until(
        || match manager.topology() {
            Ok(topology) =>
                topology.topology_type == TopologyType::ReplicaSetWithPrimary
                    && topology.servers.len() == 2
                    && topology.servers[&host("b:27017")].server_type == ServerType::RSSecondary,
            Err(_) => false,
        },
        5000,
    ));

    // The new member was brought under management: it has a pool, and
    // its monitor produced the secondary description we waited for.
    assert!(manager.connection_for(&host("b:27017")).unwrap().is_some());
    assert!(manager.connection_for(&host("z:27017")).unwrap().is_none());
    assert!(sink
        .labels()
        .contains(&"server_opening b:27017".to_owned()));

    manager.stop().unwrap();
}

#[test]
fn pool_failure_drops_the_server() {
    let sink = Arc::new(RecordingSink::new());
    let probe = Arc::new(ScriptedProbe::new());
    probe.script(
        "a:27017",
        primary_reply("rs0", &["a:27017", "b:27017"], 1, election_id(1)),
    );

    let manager = TopologyManager::start(
        options(&["a:27017"]),
        sink.clone(),
        Arc::new(FailingPoolFactory::new("b:27017")),
        probe.clone(),
    )
    .unwrap();

    assert!(wait_until(
        || match manager.topology() {
            Ok(topology) =>
                topology.topology_type == TopologyType::ReplicaSetWithPrimary
                    && topology.servers.len() == 1,
            Err(_) => false,
        },
        5000,
    ));

    assert!(manager.connection_for(&host("b:27017")).unwrap().is_none());

    let labels = sink.labels();
    assert!(labels.contains(&"server_opening b:27017".to_owned()));
    assert!(labels.contains(&"server_closed b:27017".to_owned()));

    manager.stop().unwrap();
}

#[test]
fn force_checked_server_is_probed_again_promptly() {
    let sink = Arc::new(RecordingSink::new());
    let probe = Arc::new(ScriptedProbe::new());
    probe.script(
        "a:27017",
        primary_reply("rs0", &["a:27017", "b:27017"], 5, election_id(5)),
    );
    // b keeps claiming a stale election, so every one of its reports is
    // coerced to unknown and triggers a request for another check.
    probe.script(
        "b:27017",
        primary_reply("rs0", &["a:27017", "b:27017"], 4, election_id(4)),
    );

    let manager = start(options(&["a:27017"]), &sink, &probe).unwrap();

    // The heartbeat is 10 seconds, so repeated probes of b inside this
    // window can only come from the re-check requests.
    assert!(wait_until(|| probe.checks("b:27017") >= 3, 5000));

    let topology = manager.topology().unwrap();
    assert_eq!(topology.topology_type, TopologyType::ReplicaSetWithPrimary);
    assert_eq!(
        topology.servers[&host("b:27017")].server_type,
        ServerType::Unknown
    );

    manager.stop().unwrap();
}

#[test]
fn submissions_drive_the_topology() {
    let sink = Arc::new(RecordingSink::new());
    let probe = Arc::new(ScriptedProbe::new());
    probe.script("a:27017", standalone_reply());

    let manager = start(options(&["a:27017"]), &sink, &probe).unwrap();

    assert!(wait_until(
        || matches!(manager.topology(), Ok(ref topology) if topology.topology_type == TopologyType::Single),
        5000,
    ));

    // An externally submitted error observation is absorbed into state
    // without disturbing the single topology.
    manager.submit(observe_err("a:27017")).unwrap();

    assert!(wait_until(
        || matches!(
            manager.topology(),
            Ok(ref topology) if topology.servers[&host("a:27017")].err.is_some()
        ),
        5000,
    ));

    assert_eq!(
        manager.topology().unwrap().topology_type,
        TopologyType::Single
    );

    manager.stop().unwrap();
}

#[test]
fn calls_after_stop_report_shutdown() {
    let sink = Arc::new(RecordingSink::new());
    let probe = Arc::new(ScriptedProbe::new());
    probe.script("a:27017", standalone_reply());

    let manager = start(options(&["a:27017"]), &sink, &probe).unwrap();
    manager.stop().unwrap();

    assert!(matches!(manager.topology(), Err(Error::ShuttingDownError)));
    assert!(matches!(
        manager.submit(observe("a:27017", standalone_reply())),
        Err(Error::ShuttingDownError)
    ));
    assert!(matches!(
        manager.connection_for(&host("a:27017")),
        Err(Error::ShuttingDownError)
    ));
}
