//! Single-owner coordination of the topology description, its server
//! monitors, and its connection pools.
//!
//! All state mutations happen on one manager thread; the public handle
//! posts messages to it and awaits replies, so external callers never
//! observe a half-applied transition.
use crate::apm::{Event, EventSink};
use crate::connstring::{self, Host};
use crate::error::Error::{ArgumentError, ShuttingDownError};
use crate::error::Result;
use crate::pool::{ConnectOptions, ConnectionPool, PoolFactory, DEFAULT_POOL_SIZE};

use bson::oid;
use tracing::{debug, info, warn};

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::monitor::{Monitor, Probe};
use super::server::ServerDescription;
use super::{
    TopologyDescription, TopologyType, UpdateEvent, DEFAULT_HEARTBEAT_FREQUENCY_MS,
    DEFAULT_LOCAL_THRESHOLD_MS,
};

/// Configuration for opening a topology.
#[derive(Clone, Debug)]
pub struct TopologyOptions {
    /// The database operations will be issued against. Required.
    pub database: Option<String>,
    /// The initial servers to monitor.
    pub seeds: Vec<Host>,
    /// An initial hint for the topology type.
    pub topology_type: TopologyType,
    /// The expected replica set name, if any.
    pub set_name: String,
    /// How often each monitor checks its server.
    pub heartbeat_frequency_ms: u32,
    /// The acceptable latency window handed to the selection layer.
    pub local_threshold_ms: i64,
    /// How long connection establishment may take, in milliseconds.
    pub connect_timeout_ms: Option<u64>,
    /// The maximum number of pooled connections per server.
    pub pool_size: usize,
}

impl Default for TopologyOptions {
    fn default() -> TopologyOptions {
        TopologyOptions {
            database: None,
            seeds: vec![Host::new("localhost", connstring::DEFAULT_PORT)],
            topology_type: TopologyType::Unknown,
            set_name: String::new(),
            heartbeat_frequency_ms: DEFAULT_HEARTBEAT_FREQUENCY_MS,
            local_threshold_ms: DEFAULT_LOCAL_THRESHOLD_MS,
            connect_timeout_ms: None,
            pool_size: DEFAULT_POOL_SIZE,
        }
    }
}

impl TopologyOptions {
    /// Returns default options targeting the given database.
    pub fn new(database: &str) -> TopologyOptions {
        TopologyOptions {
            database: Some(database.to_owned()),
            ..TopologyOptions::default()
        }
    }
}

// Requests handled by the manager thread.
pub(crate) enum ManagerMessage {
    Observe(Box<ServerDescription>),
    Describe(Sender<TopologyDescription>),
    ConnectionFor(Host, Sender<Option<ConnectionPool>>),
    Shutdown(Sender<()>),
}

/// The send-handle monitors use to report observations back to their manager.
#[derive(Clone)]
pub struct Reporter {
    sender: Sender<ManagerMessage>,
}

impl Reporter {
    /// Submits a fresh server description for processing.
    ///
    /// Submissions against a stopped manager are silently discarded.
    pub fn submit(&self, description: ServerDescription) {
        let _ = self
            .sender
            .send(ManagerMessage::Observe(Box::new(description)));
    }
}

/// Owns and coordinates the live topology: one description, one monitor
/// and one connection pool per known server.
pub struct TopologyManager {
    id: oid::ObjectId,
    sender: Sender<ManagerMessage>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TopologyManager {
    /// Validates the options, announces the topology, and spawns the
    /// manager thread with a monitor and pool per seed.
    pub fn start(
        options: TopologyOptions,
        sink: Arc<dyn EventSink>,
        pool_factory: Arc<dyn PoolFactory>,
        probe: Arc<dyn Probe>,
    ) -> Result<TopologyManager> {
        validate_options(&options)?;

        let id = oid::ObjectId::new();

        let mut description = TopologyDescription::new();
        description.topology_type = options.topology_type;
        description.set_name = options.set_name.clone();
        description.heartbeat_frequency_ms = options.heartbeat_frequency_ms;
        description.local_threshold_ms = options.local_threshold_ms;

        for seed in &options.seeds {
            description
                .servers
                .insert(seed.clone(), ServerDescription::new(seed.clone()));
        }

        info!(topology_id = %id, seeds = options.seeds.len(), "opening topology");
        sink.publish(Event::TopologyOpening { topology_id: id });

        let (sender, receiver) = mpsc::channel();

        let state = ManagerState {
            id,
            options,
            description,
            monitors: HashMap::new(),
            pools: HashMap::new(),
            sink,
            pool_factory,
            probe,
            sender: sender.clone(),
        };

        let worker = thread::Builder::new()
            .name("topology-manager".to_owned())
            .spawn(move || state.run(receiver))?;

        Ok(TopologyManager {
            id,
            sender,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// The identity carried by every event this topology emits.
    pub fn id(&self) -> oid::ObjectId {
        self.id
    }

    /// Returns a snapshot of the current topology description.
    pub fn topology(&self) -> Result<TopologyDescription> {
        let (reply, response) = mpsc::channel();
        self.sender
            .send(ManagerMessage::Describe(reply))
            .map_err(|_| ShuttingDownError)?;
        response.recv().map_err(|_| ShuttingDownError)
    }

    /// Looks up the connection pool for an address.
    ///
    /// Absent exactly when the address was never admitted to the topology
    /// or has since been removed from it.
    pub fn connection_for(&self, host: &Host) -> Result<Option<ConnectionPool>> {
        let (reply, response) = mpsc::channel();
        self.sender
            .send(ManagerMessage::ConnectionFor(host.clone(), reply))
            .map_err(|_| ShuttingDownError)?;
        response.recv().map_err(|_| ShuttingDownError)
    }

    /// Enqueues a server observation for processing.
    pub fn submit(&self, description: ServerDescription) -> Result<()> {
        self.sender
            .send(ManagerMessage::Observe(Box::new(description)))
            .map_err(|_| ShuttingDownError)
    }

    /// Stops every monitor, drains every pool, and joins the manager thread.
    pub fn stop(&self) -> Result<()> {
        let (reply, response) = mpsc::channel();
        self.sender
            .send(ManagerMessage::Shutdown(reply))
            .map_err(|_| ShuttingDownError)?;
        let _ = response.recv();

        if let Ok(mut guard) = self.worker.lock() {
            if let Some(worker) = guard.take() {
                let _ = worker.join();
            }
        }

        Ok(())
    }
}

impl Drop for TopologyManager {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

// The mutable half of the manager, confined to its worker thread.
struct ManagerState {
    id: oid::ObjectId,
    options: TopologyOptions,
    description: TopologyDescription,
    monitors: HashMap<Host, Monitor>,
    pools: HashMap<Host, ConnectionPool>,
    sink: Arc<dyn EventSink>,
    pool_factory: Arc<dyn PoolFactory>,
    probe: Arc<dyn Probe>,
    sender: Sender<ManagerMessage>,
}

impl ManagerState {
    fn run(mut self, receiver: Receiver<ManagerMessage>) {
        // Bring the seed servers under management before serving requests.
        let mut initial = self.description.clone();
        self.reconcile(&mut initial);
        self.description = initial;

        while let Ok(message) = receiver.recv() {
            match message {
                ManagerMessage::Observe(description) => self.apply(*description),
                ManagerMessage::Describe(reply) => {
                    let _ = reply.send(self.description.clone());
                }
                ManagerMessage::ConnectionFor(host, reply) => {
                    let _ = reply.send(self.pools.get(&host).cloned());
                }
                ManagerMessage::Shutdown(reply) => {
                    self.shutdown();
                    let _ = reply.send(());
                    return;
                }
            }
        }

        // Every handle is gone; tear down as if stopped.
        self.shutdown();
    }

    // Applies one observation: pure transition, membership reconciliation,
    // then event emission in their required order.
    fn apply(&mut self, observed: ServerDescription) {
        let seed_count = self.options.seeds.len();
        let (mut next, events) = self.description.update(observed, seed_count);

        self.reconcile(&mut next);

        for event in &events {
            if let UpdateEvent::ServerChanged {
                ref address,
                ref previous,
                ref new,
            } = *event
            {
                self.sink.publish(Event::ServerDescriptionChanged {
                    topology_id: self.id,
                    address: address.clone(),
                    previous: previous.clone(),
                    new: new.clone(),
                });
            }
        }

        for event in &events {
            if let UpdateEvent::RequestUpdate { ref address } = *event {
                // The monitor may already be gone if the address was
                // removed by the same transition.
                if let Some(monitor) = self.monitors.get(address) {
                    monitor.request_update();
                }
            }
        }

        if next != self.description {
            self.sink.publish(Event::TopologyDescriptionChanged {
                topology_id: self.id,
                previous: Box::new(self.description.clone()),
                new: Box::new(next.clone()),
            });
        }

        self.description = next;
    }

    // Aligns the monitor and pool sets with the given description's
    // membership. A server whose pool cannot be opened is dropped from
    // the description and reconciliation re-runs, so the result is
    // always internally consistent. Reconciling twice is a no-op.
    fn reconcile(&mut self, next: &mut TopologyDescription) {
        'retry: loop {
            let mut added: Vec<Host> = next
                .servers
                .keys()
                .filter(|host| !self.monitors.contains_key(*host))
                .cloned()
                .collect();
            added.sort();

            for host in added {
                self.sink.publish(Event::ServerOpening {
                    topology_id: self.id,
                    address: host.clone(),
                });

                match self.pool_factory.open(&self.connect_options(&host)) {
                    Ok(pool) => {
                        self.pools.insert(host.clone(), pool);
                    }
                    Err(err) => {
                        warn!(host = %host, error = %err, "unable to open connection pool; dropping server");
                        self.sink.publish(Event::ServerClosed {
                            topology_id: self.id,
                            address: host.clone(),
                        });
                        next.servers.remove(&host);
                        continue 'retry;
                    }
                }

                let description = match next.servers.get(&host) {
                    Some(description) => description.clone(),
                    None => ServerDescription::new(host.clone()),
                };

                let monitor = Monitor::start(
                    description,
                    self.probe.clone(),
                    Reporter {
                        sender: self.sender.clone(),
                    },
                    self.options.heartbeat_frequency_ms,
                );

                debug!(host = %host, "server monitor started");
                self.monitors.insert(host, monitor);
            }

            let mut removed: Vec<Host> = self
                .monitors
                .keys()
                .filter(|host| !next.servers.contains_key(*host))
                .cloned()
                .collect();
            removed.sort();

            for host in removed {
                self.close_server(&host);
            }

            return;
        }
    }

    // Stops the monitor and pool for an address and announces the closure.
    fn close_server(&mut self, host: &Host) {
        if let Some(monitor) = self.monitors.remove(host) {
            monitor.stop();
        }

        if let Some(pool) = self.pools.remove(host) {
            pool.shutdown();
        }

        self.sink.publish(Event::ServerClosed {
            topology_id: self.id,
            address: host.clone(),
        });
    }

    // Tears down every server and announces the topology's closure.
    fn shutdown(&mut self) {
        let mut hosts: Vec<Host> = self.monitors.keys().cloned().collect();
        hosts.sort();

        for host in hosts {
            self.close_server(&host);
        }

        info!(topology_id = %self.id, "topology closed");
        self.sink.publish(Event::TopologyClosed {
            topology_id: self.id,
        });
    }

    fn connect_options(&self, host: &Host) -> ConnectOptions {
        ConnectOptions {
            host: host.clone(),
            database: self.options.database.clone().unwrap_or_default(),
            pool_size: self.options.pool_size,
            connect_timeout: self.options.connect_timeout_ms.map(Duration::from_millis),
        }
    }
}

// Rejects configurations before any resource is allocated or event emitted.
fn validate_options(options: &TopologyOptions) -> Result<()> {
    match options.database {
        Some(ref database) if !database.is_empty() => (),
        _ => {
            return Err(ArgumentError(
                "A database name is required to open a topology.".to_owned(),
            ))
        }
    }

    if options.seeds.is_empty() {
        return Err(ArgumentError(
            "At least one seed is required to open a topology.".to_owned(),
        ));
    }

    if options.topology_type == TopologyType::Single && options.seeds.len() > 1 {
        return Err(ArgumentError(
            "TopologyType::Single cannot be used with multiple seeds.".to_owned(),
        ));
    }

    if !options.set_name.is_empty() {
        match options.topology_type {
            TopologyType::ReplicaSetNoPrimary | TopologyType::Single | TopologyType::Unknown => (),
            _ => {
                return Err(ArgumentError(
                    "TopologyType must be ReplicaSetNoPrimary, Single, or Unknown \
                     when a replica set name is provided."
                        .to_owned(),
                ))
            }
        }
    }

    Ok(())
}
