use mongodb_topology::topology::server::ServerType;
use mongodb_topology::topology::{TopologyDescription, TopologyType, UpdateEvent};

use super::framework::*;

const MEMBERS: [&str; 3] = ["a:27017", "b:27017", "c:27017"];

fn discovered_set() -> TopologyDescription {
    let current = seeded(&["a:27017"]);
    let reply = primary_reply("rs0", &MEMBERS, 5, election_id(5));
    let (next, _) = current.update(observe("a:27017", reply), 1);
    next
}

fn request_updates(events: &[UpdateEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match *event {
            UpdateEvent::RequestUpdate { ref address } => Some(address.to_string()),
            _ => None,
        })
        .collect()
}

#[test]
fn primary_discovers_members_from_one_seed() {
    let current = seeded(&["a:27017"]);
    let reply = primary_reply("rs0", &MEMBERS, 1, election_id(1));
    let (next, events) = current.update(observe("a:27017", reply), 1);

    assert_eq!(next.topology_type, TopologyType::ReplicaSetWithPrimary);
    assert_eq!(next.set_name, "rs0");
    assert_eq!(next.servers.len(), 3);
    assert_eq!(
        next.servers[&host("a:27017")].server_type,
        ServerType::RSPrimary
    );
    assert_eq!(
        next.servers[&host("b:27017")].server_type,
        ServerType::Unknown
    );
    assert_eq!(next.max_set_version, Some(1));
    assert_eq!(next.max_election_id, Some(election_id(1)));

    // Only the seed's description changed semantically; the new members
    // are placeholders awaiting their own monitors.
    assert_eq!(events.len(), 1);
}

#[test]
fn secondary_discovers_set_without_primary() {
    let current = seeded(&["a:27017"]);
    let reply = secondary_reply("a:27017", "rs0", &["a:27017", "b:27017"]);
    let (next, _) = current.update(observe("a:27017", reply), 1);

    assert_eq!(next.topology_type, TopologyType::ReplicaSetNoPrimary);
    assert_eq!(next.set_name, "rs0");
    assert_eq!(next.servers.len(), 2);
}

#[test]
fn reported_primary_is_marked_possible() {
    let current = seeded(&["a:27017"]);
    let mut reply = secondary_reply("a:27017", "rs0", &["a:27017", "b:27017"]);
    reply.insert("primary", "b:27017");

    let (next, _) = current.update(observe("a:27017", reply), 1);

    assert_eq!(
        next.servers[&host("b:27017")].server_type,
        ServerType::PossiblePrimary
    );
    assert_eq!(next.topology_type, TopologyType::ReplicaSetNoPrimary);
}

#[test]
fn stale_primary_is_rejected() {
    let current = discovered_set();
    let reply = primary_reply("rs0", &MEMBERS, 4, election_id(4));
    let (next, events) = current.update(observe("b:27017", reply), 1);

    // The stale claimant is recorded as unknown and told to re-check;
    // the topology keeps its primary and watermarks.
    assert_eq!(
        next.servers[&host("b:27017")].server_type,
        ServerType::Unknown
    );
    assert_eq!(next.topology_type, TopologyType::ReplicaSetWithPrimary);
    assert_eq!(next.max_set_version, Some(5));
    assert_eq!(next.max_election_id, Some(election_id(5)));
    assert_eq!(request_updates(&events), vec!["b:27017".to_owned()]);
}

#[test]
fn newer_primary_takes_over() {
    let current = discovered_set();
    let reply = primary_reply("rs0", &MEMBERS, 6, election_id(6));
    let (next, events) = current.update(observe("b:27017", reply), 1);

    assert_eq!(next.topology_type, TopologyType::ReplicaSetWithPrimary);
    assert_eq!(
        next.servers[&host("b:27017")].server_type,
        ServerType::RSPrimary
    );
    assert_eq!(
        next.servers[&host("a:27017")].server_type,
        ServerType::Unknown
    );
    assert_eq!(next.max_set_version, Some(6));
    assert_eq!(next.max_election_id, Some(election_id(6)));

    // The deposed primary is probed again promptly.
    assert_eq!(request_updates(&events), vec!["a:27017".to_owned()]);
}

#[test]
fn equal_watermarks_let_latest_claimant_win() {
    let current = discovered_set();
    let reply = primary_reply("rs0", &MEMBERS, 5, election_id(5));
    let (next, _) = current.update(observe("b:27017", reply), 1);

    assert_eq!(
        next.servers[&host("b:27017")].server_type,
        ServerType::RSPrimary
    );
    assert_eq!(
        next.servers[&host("a:27017")].server_type,
        ServerType::Unknown
    );
    assert_eq!(next.max_set_version, Some(5));
}

#[test]
fn member_disowning_its_address_is_removed() {
    let current = discovered_set();
    let reply = secondary_reply("c-renamed:27017", "rs0", &MEMBERS);
    let (next, events) = current.update(observe("c:27017", reply), 1);

    assert!(!next.servers.contains_key(&host("c:27017")));
    assert_eq!(next.topology_type, TopologyType::ReplicaSetWithPrimary);
    assert!(events.is_empty());
}

#[test]
fn disowned_secondary_still_contributes_hosts() {
    let current = seeded(&["a:27017"]);
    let reply = secondary_reply("elsewhere:27017", "rs0", &["b:27017"]);
    let (next, _) = current.update(observe("a:27017", reply), 1);

    assert_eq!(next.topology_type, TopologyType::ReplicaSetNoPrimary);
    assert!(!next.servers.contains_key(&host("a:27017")));
    assert!(next.servers.contains_key(&host("b:27017")));
}

#[test]
fn member_with_wrong_set_name_is_removed() {
    let current = discovered_set();
    let reply = secondary_reply("b:27017", "other", &MEMBERS);
    let (next, _) = current.update(observe("b:27017", reply), 1);

    assert!(!next.servers.contains_key(&host("b:27017")));
    assert_eq!(next.topology_type, TopologyType::ReplicaSetWithPrimary);
}

#[test]
fn primary_with_wrong_set_name_is_removed() {
    let current = discovered_set();
    let reply = primary_reply("other", &MEMBERS, 6, election_id(6));
    let (next, _) = current.update(observe("b:27017", reply), 1);

    assert!(!next.servers.contains_key(&host("b:27017")));
    assert_eq!(next.topology_type, TopologyType::ReplicaSetWithPrimary);
    assert_eq!(next.max_set_version, Some(5));
}

#[test]
fn primary_prunes_members_it_no_longer_reports() {
    let current = discovered_set();
    let reply = primary_reply("rs0", &["a:27017", "b:27017"], 6, election_id(6));
    let (next, _) = current.update(observe("a:27017", reply), 1);

    assert_eq!(next.servers.len(), 2);
    assert!(!next.servers.contains_key(&host("c:27017")));
}

#[test]
fn primary_error_leaves_set_without_primary() {
    let current = discovered_set();
    let (next, events) = current.update(observe_err("a:27017"), 1);

    assert_eq!(next.topology_type, TopologyType::ReplicaSetNoPrimary);
    assert_eq!(
        next.servers[&host("a:27017")].server_type,
        ServerType::Unknown
    );
    assert!(next.servers[&host("a:27017")].err.is_some());
    assert_eq!(events.len(), 1);
}

#[test]
fn standalone_is_removed_from_replica_set() {
    let current = discovered_set();
    let (next, _) = current.update(observe("b:27017", standalone_reply()), 1);

    assert!(!next.servers.contains_key(&host("b:27017")));
    assert_eq!(next.topology_type, TopologyType::ReplicaSetWithPrimary);
}

#[test]
fn ghost_member_keeps_membership_intact() {
    let current = discovered_set();
    let (next, _) = current.update(observe("b:27017", ghost_reply()), 1);

    assert_eq!(next.servers.len(), 3);
    assert_eq!(
        next.servers[&host("b:27017")].server_type,
        ServerType::RSGhost
    );
    assert_eq!(next.topology_type, TopologyType::ReplicaSetWithPrimary);
}

#[test]
fn watermarks_never_regress() {
    let current = discovered_set();

    // A bare secondary report carries no watermarks and must not lower them.
    let reply = secondary_reply("b:27017", "rs0", &MEMBERS);
    let (next, _) = current.update(observe("b:27017", reply), 1);

    assert_eq!(next.max_set_version, Some(5));
    assert_eq!(next.max_election_id, Some(election_id(5)));
}
