use crate::connstring::{self, Host};
use crate::error::Error::ResponseError;
use crate::error::Result;

use bson::{self, oid, Bson};
use chrono::{DateTime, Utc};
use tracing::debug;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::manager::Reporter;
use super::server::{ServerDescription, ROUND_TRIP_DIVISOR};

/// The result of an isMaster command.
#[derive(Clone, Debug, PartialEq)]
pub struct IsMasterResult {
    pub ok: bool,
    pub is_master: bool,
    pub local_time: Option<DateTime<Utc>>,
    pub min_wire_version: i64,
    pub max_wire_version: i64,

    // Shards
    pub msg: String,

    // Replica Sets
    pub is_replica_set: bool,
    pub is_secondary: bool,
    pub me: Option<Host>,
    pub hosts: Vec<Host>,
    pub passives: Vec<Host>,
    pub arbiters: Vec<Host>,
    pub arbiter_only: bool,
    pub tags: BTreeMap<String, String>,
    pub set_name: String,
    pub set_version: Option<i64>,
    pub election_id: Option<oid::ObjectId>,
    pub primary: Option<Host>,
    pub hidden: bool,
    pub last_write_date: Option<DateTime<Utc>>,
    pub op_time: Option<Bson>,
}

impl IsMasterResult {
    /// Parses an isMaster response document from the server.
    pub fn new(doc: bson::Document) -> Result<IsMasterResult> {
        let ok = match doc.get("ok") {
            Some(&Bson::Double(v)) => v == 1.0,
            Some(&Bson::Int32(v)) => v == 1,
            Some(&Bson::Int64(v)) => v == 1,
            Some(&Bson::Boolean(b)) => b,
            _ => true,
        };

        let mut result = IsMasterResult {
            ok,
            is_master: false,
            local_time: None,
            min_wire_version: 0,
            max_wire_version: 0,
            msg: String::new(),
            is_secondary: false,
            is_replica_set: false,
            me: None,
            hosts: Vec::new(),
            passives: Vec::new(),
            arbiters: Vec::new(),
            arbiter_only: false,
            tags: BTreeMap::new(),
            set_name: String::new(),
            set_version: None,
            election_id: None,
            primary: None,
            hidden: false,
            last_write_date: None,
            op_time: None,
        };

        if !ok {
            return Ok(result);
        }

        match doc.get("ismaster") {
            Some(&Bson::Boolean(b)) => result.is_master = b,
            _ => {
                return Err(ResponseError(
                    "isMaster response does not contain 'ismaster'.".to_owned(),
                ))
            }
        }

        if let Some(&Bson::DateTime(datetime)) = doc.get("localTime") {
            result.local_time = Some(datetime.to_chrono());
        }

        match doc.get("minWireVersion") {
            Some(&Bson::Int32(v)) => result.min_wire_version = i64::from(v),
            Some(&Bson::Int64(v)) => result.min_wire_version = v,
            _ => (),
        }

        match doc.get("maxWireVersion") {
            Some(&Bson::Int32(v)) => result.max_wire_version = i64::from(v),
            Some(&Bson::Int64(v)) => result.max_wire_version = v,
            _ => (),
        }

        if let Some(Bson::String(s)) = doc.get("msg") {
            result.msg = s.to_owned();
        }

        if let Some(&Bson::Boolean(b)) = doc.get("secondary") {
            result.is_secondary = b;
        }

        if let Some(&Bson::Boolean(b)) = doc.get("isreplicaset") {
            result.is_replica_set = b;
        }

        if let Some(Bson::String(s)) = doc.get("setName") {
            result.set_name = s.to_owned();
        }

        match doc.get("setVersion") {
            Some(&Bson::Int32(v)) => result.set_version = Some(i64::from(v)),
            Some(&Bson::Int64(v)) => result.set_version = Some(v),
            _ => (),
        }

        if let Some(Bson::String(s)) = doc.get("me") {
            result.me = Some(connstring::parse_host(s)?);
        }

        if let Some(Bson::Array(arr)) = doc.get("hosts") {
            result.hosts = arr
                .iter()
                .filter_map(|bson| match *bson {
                    Bson::String(ref s) => connstring::parse_host(s).ok(),
                    _ => None,
                })
                .collect();
        }

        if let Some(Bson::Array(arr)) = doc.get("passives") {
            result.passives = arr
                .iter()
                .filter_map(|bson| match *bson {
                    Bson::String(ref s) => connstring::parse_host(s).ok(),
                    _ => None,
                })
                .collect();
        }

        if let Some(Bson::Array(arr)) = doc.get("arbiters") {
            result.arbiters = arr
                .iter()
                .filter_map(|bson| match *bson {
                    Bson::String(ref s) => connstring::parse_host(s).ok(),
                    _ => None,
                })
                .collect();
        }

        if let Some(Bson::String(s)) = doc.get("primary") {
            result.primary = Some(connstring::parse_host(s)?);
        }

        if let Some(&Bson::Boolean(b)) = doc.get("arbiterOnly") {
            result.arbiter_only = b;
        }

        if let Some(&Bson::Boolean(h)) = doc.get("hidden") {
            result.hidden = h;
        }

        if let Some(Bson::Document(doc)) = doc.get("tags") {
            for (k, v) in doc.into_iter() {
                if let Bson::String(tag) = v {
                    result.tags.insert(k.to_owned(), tag.to_owned());
                }
            }
        }

        if let Some(&Bson::ObjectId(id)) = doc.get("electionId") {
            result.election_id = Some(id);
        }

        if let Some(Bson::Document(last_write)) = doc.get("lastWrite") {
            if let Some(&Bson::DateTime(datetime)) = last_write.get("lastWriteDate") {
                result.last_write_date = Some(datetime.to_chrono());
            }

            result.op_time = last_write.get("opTime").cloned();
        }

        Ok(result)
    }
}

/// Issues isMaster commands against a single server.
///
/// Implementations own the wire codec and transport; each probe uses
/// short-lived monitor connections independent of the server's
/// application pool, and returns the reply document along with the
/// observed round trip time in milliseconds.
pub trait Probe: Send + Sync {
    fn is_master(&self, host: &Host) -> Result<(bson::Document, i64)>;
}

// Shared wake-up state between a monitor handle and its worker.
struct Wakeup {
    pending: Mutex<bool>,
    condvar: Condvar,
}

/// Monitors and reports the status of a single server.
pub struct Monitor {
    /// The monitored host.
    pub host: Host,
    running: Arc<AtomicBool>,
    wakeup: Arc<Wakeup>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Monitor {
    /// Spawns a monitor worker for the server described by `description`.
    ///
    /// The worker probes the server immediately and then once per
    /// heartbeat until stopped, submitting each outcome through the
    /// reporter. The initial description seeds the address and the
    /// round trip average.
    pub fn start(
        description: ServerDescription,
        probe: Arc<dyn Probe>,
        reporter: Reporter,
        heartbeat_frequency_ms: u32,
    ) -> Monitor {
        let running = Arc::new(AtomicBool::new(true));
        let wakeup = Arc::new(Wakeup {
            pending: Mutex::new(false),
            condvar: Condvar::new(),
        });

        let worker = MonitorWorker {
            host: description.address.clone(),
            round_trip_time: description.round_trip_time,
            probe,
            reporter,
            heartbeat_frequency_ms,
            running: running.clone(),
            wakeup: wakeup.clone(),
        };

        let handle = thread::Builder::new()
            .name("server-monitor".to_owned())
            .spawn(move || worker.run())
            .ok();

        Monitor {
            host: description.address,
            running,
            wakeup,
            worker: Mutex::new(handle),
        }
    }

    /// Requests an immediate check from the monitor.
    ///
    /// A sleeping monitor wakes at once; one that is mid-probe checks
    /// again as soon as the current probe completes.
    pub fn request_update(&self) {
        if let Ok(mut pending) = self.wakeup.pending.lock() {
            *pending = true;
        }

        self.wakeup.condvar.notify_all();
    }

    /// Stops the monitor and joins its worker.
    ///
    /// No further descriptions are submitted once this returns.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Ok(mut pending) = self.wakeup.pending.lock() {
            *pending = true;
        }

        self.wakeup.condvar.notify_all();

        if let Ok(mut guard) = self.worker.lock() {
            if let Some(handle) = guard.take() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.wakeup.condvar.notify_all();
    }
}

struct MonitorWorker {
    host: Host,
    round_trip_time: Option<i64>,
    probe: Arc<dyn Probe>,
    reporter: Reporter,
    heartbeat_frequency_ms: u32,
    running: Arc<AtomicBool>,
    wakeup: Arc<Wakeup>,
}

impl MonitorWorker {
    fn run(mut self) {
        while self.running.load(Ordering::SeqCst) {
            let description = self.check();

            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            self.reporter.submit(description);
            self.wait_for_next_check();
        }
    }

    // Probes the server once, producing a description of the outcome.
    fn check(&mut self) -> ServerDescription {
        match self.probe.is_master(&self.host) {
            Ok((reply, sample)) => {
                let smoothed = match self.round_trip_time {
                    // (sample / div) + (old_rtt * (div-1)/div)
                    Some(old_rtt) => {
                        sample / ROUND_TRIP_DIVISOR
                            + (old_rtt / ROUND_TRIP_DIVISOR) * (ROUND_TRIP_DIVISOR - 1)
                    }
                    None => sample,
                };

                self.round_trip_time = Some(smoothed);
                ServerDescription::from_is_master_reply(self.host.clone(), reply, smoothed)
            }
            Err(err) => {
                debug!(host = %self.host, error = %err, "server check failed");
                self.round_trip_time = None;
                ServerDescription::from_error(self.host.clone(), err)
            }
        }
    }

    // Sleeps until the next heartbeat, an update request, or shutdown.
    // A request that arrived while probing skips the sleep entirely, so
    // it is never lost to a full heartbeat.
    fn wait_for_next_check(&self) {
        let mut pending = match self.wakeup.pending.lock() {
            Ok(guard) => guard,
            Err(_) => return,
        };

        let deadline = Instant::now() + Duration::from_millis(u64::from(self.heartbeat_frequency_ms));

        while !*pending && self.running.load(Ordering::SeqCst) {
            let now = Instant::now();
            if now >= deadline {
                break;
            }

            match self.wakeup.condvar.wait_timeout(pending, deadline - now) {
                Ok((guard, _)) => pending = guard,
                Err(_) => return,
            }
        }

        // The check that follows consumes the request.
        *pending = false;
    }
}
