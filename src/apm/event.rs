use std::fmt::{Display, Error, Formatter};

use bson::oid::ObjectId;

use crate::connstring::Host;
use crate::topology::server::ServerDescription;
use crate::topology::TopologyDescription;

/// A topology or server lifecycle event.
///
/// Every event carries the id of the topology that produced it; change
/// events carry the previous and new descriptions by value.
#[derive(Clone, Debug)]
pub enum Event {
    TopologyOpening {
        topology_id: ObjectId,
    },
    TopologyClosed {
        topology_id: ObjectId,
    },
    TopologyDescriptionChanged {
        topology_id: ObjectId,
        previous: Box<TopologyDescription>,
        new: Box<TopologyDescription>,
    },
    ServerOpening {
        topology_id: ObjectId,
        address: Host,
    },
    ServerClosed {
        topology_id: ObjectId,
        address: Host,
    },
    ServerDescriptionChanged {
        topology_id: ObjectId,
        address: Host,
        previous: Box<ServerDescription>,
        new: Box<ServerDescription>,
    },
}

impl Event {
    /// Returns the event kind as a static label.
    pub fn name(&self) -> &'static str {
        match *self {
            Event::TopologyOpening { .. } => "topology_opening",
            Event::TopologyClosed { .. } => "topology_closed",
            Event::TopologyDescriptionChanged { .. } => "topology_description_changed",
            Event::ServerOpening { .. } => "server_opening",
            Event::ServerClosed { .. } => "server_closed",
            Event::ServerDescriptionChanged { .. } => "server_description_changed",
        }
    }

    /// Returns the server address an event concerns, if any.
    pub fn address(&self) -> Option<&Host> {
        match *self {
            Event::ServerOpening { ref address, .. }
            | Event::ServerClosed { ref address, .. }
            | Event::ServerDescriptionChanged { ref address, .. } => Some(address),
            _ => None,
        }
    }
}

impl Display for Event {
    fn fmt(&self, fmt: &mut Formatter) -> Result<(), Error> {
        match *self {
            Event::TopologyOpening { ref topology_id } => {
                fmt.write_fmt(format_args!("TOPOLOGY.{} OPENING", topology_id))
            }
            Event::TopologyClosed { ref topology_id } => {
                fmt.write_fmt(format_args!("TOPOLOGY.{} CLOSED", topology_id))
            }
            Event::TopologyDescriptionChanged {
                ref topology_id,
                ref previous,
                ref new,
            } => fmt.write_fmt(format_args!(
                "TOPOLOGY.{} CHANGED: {:?} -> {:?}",
                topology_id, previous.topology_type, new.topology_type
            )),
            Event::ServerOpening {
                ref topology_id,
                ref address,
            } => fmt.write_fmt(format_args!("SERVER.{} {} OPENING", topology_id, address)),
            Event::ServerClosed {
                ref topology_id,
                ref address,
            } => fmt.write_fmt(format_args!("SERVER.{} {} CLOSED", topology_id, address)),
            Event::ServerDescriptionChanged {
                ref topology_id,
                ref address,
                ref previous,
                ref new,
            } => fmt.write_fmt(format_args!(
                "SERVER.{} {} CHANGED: {:?} -> {:?}",
                topology_id, address, previous.server_type, new.server_type
            )),
        }
    }
}
