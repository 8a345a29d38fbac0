//! Server discovery and monitoring for MongoDB deployments.
//!
//! This crate tracks a set of MongoDB servers — a standalone, a replica
//! set, or a sharded cluster — by running one background monitor per
//! server and folding each observation into an immutable
//! [`TopologyDescription`](topology::TopologyDescription). The
//! [`TopologyManager`](topology::TopologyManager) owns the live
//! description along with a connection pool per server, and publishes
//! lifecycle and change events to an embedder-supplied sink.
//!
//! The wire codec is not part of this crate: monitors issue their
//! isMaster checks through an injected [`Probe`](topology::monitor::Probe)
//! implementation.
pub mod apm;
pub mod connstring;
pub mod error;
pub mod pool;
pub mod stream;
pub mod topology;

pub use crate::error::{Error, Result};

/// The lowest server wire version this driver can communicate with.
pub const MIN_WIRE_VERSION: i64 = 2;

/// The highest server wire version this driver can communicate with.
pub const MAX_WIRE_VERSION: i64 = 6;
