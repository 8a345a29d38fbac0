use crate::connstring::Host;
use crate::error::Error::{self, OperationError};
use crate::error::Result;

use bson::oid;
use bson::Bson;
use chrono::{DateTime, Utc};

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use super::monitor::IsMasterResult;

/// Server round trip time is calculated as an exponentially-weighted moving
/// averaging formula with a weighting factor. A factor of 0.2 places approximately
/// 85% of the RTT weight on the 9 most recent observations. Using a divisor instead
/// of a floating point provides the closest integer accuracy.
pub const ROUND_TRIP_DIVISOR: i64 = 5;

/// Describes the server role within a server set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServerType {
    /// Standalone server.
    Standalone,
    /// Shard router.
    Mongos,
    /// Replica set member believed to be primary by another member,
    /// but not yet confirmed by its own report.
    PossiblePrimary,
    /// Replica set primary.
    RSPrimary,
    /// Replica set secondary.
    RSSecondary,
    /// Replica set arbiter.
    RSArbiter,
    /// Replica set member of some other type.
    RSOther,
    /// Replica set ghost member.
    RSGhost,
    /// Server type is currently unknown.
    Unknown,
}

impl Default for ServerType {
    fn default() -> ServerType {
        ServerType::Unknown
    }
}

impl FromStr for ServerType {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "Standalone" => ServerType::Standalone,
            "Mongos" => ServerType::Mongos,
            "PossiblePrimary" => ServerType::PossiblePrimary,
            "RSPrimary" => ServerType::RSPrimary,
            "RSSecondary" => ServerType::RSSecondary,
            "RSArbiter" => ServerType::RSArbiter,
            "RSOther" => ServerType::RSOther,
            "RSGhost" => ServerType::RSGhost,
            _ => ServerType::Unknown,
        })
    }
}

/// Server information gathered from server monitoring.
///
/// A description is immutable once constructed; a server only "changes"
/// when its monitor submits a fresh description for the same address.
#[derive(Clone, Debug)]
pub struct ServerDescription {
    /// The canonical address this description was observed under.
    pub address: Host,
    /// The server type.
    pub server_type: ServerType,
    /// Any error encountered while monitoring this server.
    pub err: Arc<Option<Error>>,
    /// The smoothed round-trip time of recent monitoring checks.
    pub round_trip_time: Option<i64>,
    /// The time of the latest write visible to this server.
    pub last_write_date: Option<DateTime<Utc>>,
    /// The replication operation time, treated opaquely.
    pub op_time: Option<Bson>,
    /// The minimum wire version supported by this server.
    pub min_wire_version: i64,
    /// The maximum wire version supported by this server.
    pub max_wire_version: i64,
    /// The server's self-reported canonical address, if it is part of a replica set.
    pub me: Option<Host>,
    /// All hosts in the replica set known by this server.
    pub hosts: Vec<Host>,
    /// All passive members of the replica set known by this server.
    pub passives: Vec<Host>,
    /// All arbiters in the replica set known by this server.
    pub arbiters: Vec<Host>,
    /// Server tags for targeted read operations on specific replica set members.
    pub tags: BTreeMap<String, String>,
    /// The replica set name.
    pub set_name: String,
    /// The replica set version reported by a primary.
    pub set_version: Option<i64>,
    /// The server's current election id, if it believes it is a primary.
    pub election_id: Option<oid::ObjectId>,
    /// The server's opinion of who the primary is.
    pub primary: Option<Host>,
    /// When this description was produced.
    pub last_update_time: Option<Instant>,
}

impl ServerDescription {
    /// Returns a default description of an unknown server at the given address.
    pub fn new(address: Host) -> ServerDescription {
        ServerDescription {
            address,
            server_type: ServerType::Unknown,
            err: Arc::new(None),
            round_trip_time: None,
            last_write_date: None,
            op_time: None,
            min_wire_version: 0,
            max_wire_version: 0,
            me: None,
            hosts: Vec::new(),
            passives: Vec::new(),
            arbiters: Vec::new(),
            tags: BTreeMap::new(),
            set_name: String::new(),
            set_version: None,
            election_id: None,
            primary: None,
            last_update_time: None,
        }
    }

    /// Builds a description from a raw isMaster reply document.
    ///
    /// A reply that cannot be parsed produces an unknown description
    /// carrying the parse error.
    pub fn from_is_master_reply(
        address: Host,
        reply: bson::Document,
        round_trip_time: i64,
    ) -> ServerDescription {
        match IsMasterResult::new(reply) {
            Ok(ismaster) => ServerDescription::from_is_master(address, ismaster, round_trip_time),
            Err(err) => ServerDescription::from_error(address, err),
        }
    }

    /// Builds a description from a parsed isMaster result.
    pub fn from_is_master(
        address: Host,
        ismaster: IsMasterResult,
        round_trip_time: i64,
    ) -> ServerDescription {
        if !ismaster.ok {
            return ServerDescription::from_error(
                address,
                OperationError("isMaster returned a not-ok response.".to_owned()),
            );
        }

        let mut description = ServerDescription::new(address);
        description.round_trip_time = Some(round_trip_time);
        description.last_write_date = ismaster.last_write_date;
        description.op_time = ismaster.op_time;
        description.min_wire_version = ismaster.min_wire_version;
        description.max_wire_version = ismaster.max_wire_version;
        description.me = ismaster.me;
        description.hosts = ismaster.hosts;
        description.passives = ismaster.passives;
        description.arbiters = ismaster.arbiters;
        description.tags = ismaster.tags;
        description.set_name = ismaster.set_name;
        description.set_version = ismaster.set_version;
        description.election_id = ismaster.election_id;
        description.primary = ismaster.primary;
        description.last_update_time = Some(Instant::now());

        let set_name_empty = description.set_name.is_empty();

        description.server_type = if ismaster.msg.is_empty()
            && set_name_empty
            && !ismaster.is_replica_set
        {
            ServerType::Standalone
        } else if ismaster.msg == "isdbgrid" {
            ServerType::Mongos
        } else if ismaster.is_master && !set_name_empty {
            ServerType::RSPrimary
        } else if ismaster.is_secondary && !ismaster.hidden && !set_name_empty {
            ServerType::RSSecondary
        } else if ismaster.arbiter_only && !set_name_empty {
            ServerType::RSArbiter
        } else if !set_name_empty {
            ServerType::RSOther
        } else if ismaster.is_replica_set {
            ServerType::RSGhost
        } else {
            ServerType::Unknown
        };

        description
    }

    /// Returns an unknown description recording a failed probe.
    pub fn from_error(address: Host, err: Error) -> ServerDescription {
        let mut description = ServerDescription::new(address);
        description.err = Arc::new(Some(err));
        description.last_update_time = Some(Instant::now());
        description
    }

    // Returns a copy of this description with the type coerced.
    pub(crate) fn with_type(&self, server_type: ServerType) -> ServerDescription {
        let mut description = self.clone();
        description.server_type = server_type;
        description
    }
}

// Structural equality: round trip time and update time are cosmetic, and
// errors compare by presence and message. Change events fire on semantic
// differences only.
impl PartialEq for ServerDescription {
    fn eq(&self, other: &ServerDescription) -> bool {
        let err_eq = match (&*self.err, &*other.err) {
            (Some(lhs), Some(rhs)) => lhs.to_string() == rhs.to_string(),
            (None, None) => true,
            _ => false,
        };

        err_eq
            && self.address == other.address
            && self.server_type == other.server_type
            && self.last_write_date == other.last_write_date
            && self.op_time == other.op_time
            && self.min_wire_version == other.min_wire_version
            && self.max_wire_version == other.max_wire_version
            && self.me == other.me
            && self.hosts == other.hosts
            && self.passives == other.passives
            && self.arbiters == other.arbiters
            && self.tags == other.tags
            && self.set_name == other.set_name
            && self.set_version == other.set_version
            && self.election_id == other.election_id
            && self.primary == other.primary
    }
}
