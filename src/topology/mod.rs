pub mod manager;
pub mod monitor;
pub mod server;

pub use self::manager::{TopologyManager, TopologyOptions};

use crate::connstring::Host;
use crate::{MAX_WIRE_VERSION, MIN_WIRE_VERSION};

use bson::oid;

use std::collections::HashMap;

use self::server::{ServerDescription, ServerType};

pub const DEFAULT_HEARTBEAT_FREQUENCY_MS: u32 = 10000;
pub const DEFAULT_LOCAL_THRESHOLD_MS: i64 = 15;

/// Describes the type of topology for a server set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TopologyType {
    Single,
    ReplicaSetNoPrimary,
    ReplicaSetWithPrimary,
    Sharded,
    Unknown,
}

/// A directive produced while applying a server observation.
///
/// `ServerChanged` records the semantic replacement of a stored
/// description; `RequestUpdate` asks the manager to wake the monitor for
/// an address out of its sleep. Update requests are de-duplicated per
/// address within a single transition.
#[derive(Clone, Debug, PartialEq)]
pub enum UpdateEvent {
    ServerChanged {
        address: Host,
        previous: Box<ServerDescription>,
        new: Box<ServerDescription>,
    },
    RequestUpdate {
        address: Host,
    },
}

/// Topology information gathered from server set monitoring.
///
/// Descriptions are immutable snapshots; `update` derives a successor
/// from an observation without mutating the current value.
#[derive(Clone, Debug)]
pub struct TopologyDescription {
    /// The current topology type.
    pub topology_type: TopologyType,
    /// The expected or discovered replica set name.
    pub set_name: String,
    /// Known servers, keyed by canonical address.
    pub servers: HashMap<Host, ServerDescription>,
    /// The highest replica set version observed from a primary.
    pub max_set_version: Option<i64>,
    /// The highest election id observed from a primary.
    pub max_election_id: Option<oid::ObjectId>,
    /// Whether every known server speaks a wire version this driver supports.
    pub compatible: bool,
    /// The reason the topology is incompatible, when it is.
    pub compat_error: String,
    /// The acceptable latency window for the selection layer, carried through.
    pub local_threshold_ms: i64,
    /// How often monitors check their servers.
    pub heartbeat_frequency_ms: u32,
}

impl TopologyDescription {
    /// Returns a default, unknown topology description.
    pub fn new() -> TopologyDescription {
        TopologyDescription {
            topology_type: TopologyType::Unknown,
            set_name: String::new(),
            servers: HashMap::new(),
            max_set_version: None,
            max_election_id: None,
            compatible: true,
            compat_error: String::new(),
            local_threshold_ms: DEFAULT_LOCAL_THRESHOLD_MS,
            heartbeat_frequency_ms: DEFAULT_HEARTBEAT_FREQUENCY_MS,
        }
    }

    /// Reports whether any known server is currently an acknowledged primary.
    pub fn has_primary(&self) -> bool {
        self.servers
            .values()
            .any(|server| server.server_type == ServerType::RSPrimary)
    }

    /// Applies a server observation, producing the successor description
    /// and the directives the manager must act on.
    ///
    /// Observations for addresses no longer in the topology are stale
    /// references to removed servers and leave the description untouched.
    pub fn update(
        &self,
        description: ServerDescription,
        seed_count: usize,
    ) -> (TopologyDescription, Vec<UpdateEvent>) {
        if !self.servers.contains_key(&description.address) {
            return (self.clone(), Vec::new());
        }

        let mut next = self.clone();
        let mut events = Vec::new();
        let server_type = description.server_type;

        match next.topology_type {
            TopologyType::Unknown => match server_type {
                ServerType::Standalone => {
                    next.update_unknown_with_standalone(description, seed_count, &mut events)
                }
                ServerType::Mongos => {
                    next.store_server(description, &mut events);
                    next.topology_type = TopologyType::Sharded;
                }
                ServerType::RSPrimary => next.update_rs_from_primary(description, &mut events),
                ServerType::RSSecondary | ServerType::RSArbiter | ServerType::RSOther => {
                    next.update_rs_without_primary(description, &mut events)
                }
                ServerType::Unknown | ServerType::RSGhost | ServerType::PossiblePrimary => {
                    next.store_server(description, &mut events)
                }
            },
            TopologyType::Single => {
                // A single topology is pinned to its one server; every
                // observation for it is stored verbatim.
                next.store_server(description, &mut events);
            }
            TopologyType::Sharded => match server_type {
                ServerType::Unknown | ServerType::Mongos => {
                    next.store_server(description, &mut events)
                }
                _ => {
                    next.servers.remove(&description.address);
                }
            },
            TopologyType::ReplicaSetNoPrimary => match server_type {
                ServerType::Standalone | ServerType::Mongos => {
                    next.servers.remove(&description.address);
                }
                ServerType::RSPrimary => next.update_rs_from_primary(description, &mut events),
                ServerType::RSSecondary | ServerType::RSArbiter | ServerType::RSOther => {
                    next.update_rs_without_primary(description, &mut events)
                }
                ServerType::Unknown | ServerType::RSGhost | ServerType::PossiblePrimary => {
                    next.store_server(description, &mut events)
                }
            },
            TopologyType::ReplicaSetWithPrimary => match server_type {
                ServerType::Standalone | ServerType::Mongos => {
                    next.servers.remove(&description.address);
                    next.check_if_has_primary();
                }
                ServerType::RSPrimary => next.update_rs_from_primary(description, &mut events),
                ServerType::RSSecondary | ServerType::RSArbiter | ServerType::RSOther => {
                    next.update_rs_with_primary_from_member(description, &mut events)
                }
                ServerType::Unknown | ServerType::RSGhost | ServerType::PossiblePrimary => {
                    next.store_server(description, &mut events);
                    next.check_if_has_primary();
                }
            },
        }

        next.recompute_compatibility();
        (next, events)
    }

    // Sets the correct replica set topology type.
    fn check_if_has_primary(&mut self) {
        if self.has_primary() {
            self.topology_type = TopologyType::ReplicaSetWithPrimary;
        } else {
            self.topology_type = TopologyType::ReplicaSetNoPrimary;
        }
    }

    // Updates an unknown topology with a new standalone server description.
    fn update_unknown_with_standalone(
        &mut self,
        description: ServerDescription,
        seed_count: usize,
        events: &mut Vec<UpdateEvent>,
    ) {
        if seed_count == 1 {
            self.store_server(description, events);
            self.topology_type = TopologyType::Single;
        } else {
            // A standalone discovered among multiple seeds cannot be part
            // of the deployment being sought.
            self.servers.remove(&description.address);
        }
    }

    // Updates a replica set topology with a new primary server description.
    fn update_rs_from_primary(
        &mut self,
        description: ServerDescription,
        events: &mut Vec<UpdateEvent>,
    ) {
        if self.set_name.is_empty() {
            self.set_name = description.set_name.clone();
        } else if self.set_name != description.set_name {
            // Primary found, but it doesn't have the setName
            // provided by the user or previously discovered.
            self.servers.remove(&description.address);
            self.check_if_has_primary();
            return;
        }

        if let (Some(set_version), Some(election_id)) =
            (description.set_version, description.election_id)
        {
            if let (Some(max_set_version), Some(max_election_id)) =
                (self.max_set_version, self.max_election_id)
            {
                if max_set_version > set_version
                    || (max_set_version == set_version && max_election_id > election_id)
                {
                    // Stale primary; store it as unknown and have its
                    // monitor re-check promptly.
                    let address = description.address.clone();
                    self.store_server(description.with_type(ServerType::Unknown), events);
                    push_request_update(events, address);
                    self.check_if_has_primary();
                    return;
                }
            }

            self.max_election_id = description.election_id;
        }

        if let Some(set_version) = description.set_version {
            match self.max_set_version {
                Some(max) if set_version <= max => (),
                _ => self.max_set_version = Some(set_version),
            }
        }

        // Invalidate any old primaries
        let demoted: Vec<Host> = self
            .servers
            .iter()
            .filter(|&(host, server)| {
                *host != description.address && server.server_type == ServerType::RSPrimary
            })
            .map(|(host, _)| host.clone())
            .collect();

        for host in demoted {
            if let Some(server) = self.servers.get(&host) {
                let unknown = server.with_type(ServerType::Unknown);
                self.store_server(unknown, events);
            }

            push_request_update(events, host);
        }

        self.store_server(description.clone(), events);
        self.add_missing_hosts(&description);

        // Remove hosts that are not reported by the primary.
        let removed: Vec<Host> = self
            .servers
            .keys()
            .filter(|&host| {
                !description.hosts.contains(host)
                    && !description.passives.contains(host)
                    && !description.arbiters.contains(host)
            })
            .cloned()
            .collect();

        for host in removed {
            self.servers.remove(&host);
        }

        self.check_if_has_primary();
    }

    // Updates a replica set topology that has no confirmed primary with
    // an updated member description.
    fn update_rs_without_primary(
        &mut self,
        description: ServerDescription,
        events: &mut Vec<UpdateEvent>,
    ) {
        self.topology_type = TopologyType::ReplicaSetNoPrimary;

        if self.set_name.is_empty() {
            self.set_name = description.set_name.clone();
        } else if self.set_name != description.set_name {
            self.servers.remove(&description.address);
            return;
        }

        self.store_server(description.clone(), events);
        self.add_missing_hosts(&description);
        self.mark_possible_primary(&description.primary, events);

        if let Some(me) = description.me.as_ref() {
            if *me != description.address {
                // The server disowns the address we used to reach it.
                self.servers.remove(&description.address);
            }
        }
    }

    // Updates a replica set topology that has a primary with an updated
    // member description.
    fn update_rs_with_primary_from_member(
        &mut self,
        description: ServerDescription,
        events: &mut Vec<UpdateEvent>,
    ) {
        if self.set_name != description.set_name {
            self.servers.remove(&description.address);
            self.check_if_has_primary();
            return;
        }

        if let Some(me) = description.me.as_ref() {
            if *me != description.address {
                self.servers.remove(&description.address);
                self.check_if_has_primary();
                return;
            }
        }

        self.store_server(description.clone(), events);
        self.add_missing_hosts(&description);
        self.mark_possible_primary(&description.primary, events);
        self.check_if_has_primary();
    }

    // Tracks hosts reported by a member that are not yet being monitored.
    fn add_missing_hosts(&mut self, description: &ServerDescription) {
        let reported = description
            .hosts
            .iter()
            .chain(description.passives.iter())
            .chain(description.arbiters.iter());

        for host in reported {
            if !self.servers.contains_key(host) {
                self.servers
                    .insert(host.clone(), ServerDescription::new(host.clone()));
            }
        }
    }

    // Marks the member reported as primary as a possible primary, if we
    // have not heard from it yet ourselves.
    fn mark_possible_primary(&mut self, primary: &Option<Host>, events: &mut Vec<UpdateEvent>) {
        let marked = match primary.as_ref().and_then(|host| self.servers.get(host)) {
            Some(server) if server.server_type == ServerType::Unknown => {
                server.with_type(ServerType::PossiblePrimary)
            }
            _ => return,
        };

        self.store_server(marked, events);
    }

    // Replaces a stored server description, recording a change event when
    // the replacement is semantically different.
    fn store_server(&mut self, description: ServerDescription, events: &mut Vec<UpdateEvent>) {
        let address = description.address.clone();
        let previous = self.servers.insert(address.clone(), description.clone());

        if let Some(previous) = previous {
            if previous != description {
                events.push(UpdateEvent::ServerChanged {
                    address,
                    previous: Box::new(previous),
                    new: Box::new(description),
                });
            }
        }
    }

    // Flags the topology as incompatible when any reporting server's wire
    // version window is disjoint from the driver's.
    fn recompute_compatibility(&mut self) {
        self.compatible = true;
        self.compat_error = String::new();

        for (host, server) in &self.servers {
            match server.server_type {
                ServerType::Unknown | ServerType::PossiblePrimary => continue,
                _ => (),
            }

            if server.max_wire_version < MIN_WIRE_VERSION {
                self.compatible = false;
                self.compat_error = format!(
                    "Server at {} reports maximum wire version {}, but this version of the \
                     driver requires at least {}.",
                    host, server.max_wire_version, MIN_WIRE_VERSION
                );
            } else if server.min_wire_version > MAX_WIRE_VERSION {
                self.compatible = false;
                self.compat_error = format!(
                    "Server at {} requires minimum wire version {}, but this version of the \
                     driver only supports up to {}.",
                    host, server.min_wire_version, MAX_WIRE_VERSION
                );
            }
        }
    }
}

impl Default for TopologyDescription {
    fn default() -> TopologyDescription {
        TopologyDescription::new()
    }
}

// Structural equality over the semantic fields; the tuning knobs carried
// through for the selection layer are not compared.
impl PartialEq for TopologyDescription {
    fn eq(&self, other: &TopologyDescription) -> bool {
        self.topology_type == other.topology_type
            && self.set_name == other.set_name
            && self.servers == other.servers
            && self.max_set_version == other.max_set_version
            && self.max_election_id == other.max_election_id
            && self.compatible == other.compatible
            && self.compat_error == other.compat_error
    }
}

// Queues a request exactly once per address within a single update.
fn push_request_update(events: &mut Vec<UpdateEvent>, address: Host) {
    let duplicate = events.iter().any(|event| match *event {
        UpdateEvent::RequestUpdate { address: ref seen } => *seen == address,
        _ => false,
    });

    if !duplicate {
        events.push(UpdateEvent::RequestUpdate { address });
    }
}
