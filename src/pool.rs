//! Connection pooling for a single MongoDB server.
use crate::connstring::Host;
use crate::error::Error::{ArgumentError, ShuttingDownError};
use crate::error::Result;
use crate::stream::StreamConnector;

use bufstream::BufStream;
use tracing::debug;

use std::fmt;
use std::net::TcpStream;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

pub static DEFAULT_POOL_SIZE: usize = 5;

/// Connection parameters handed to a pool factory for one server.
#[derive(Clone, Debug)]
pub struct ConnectOptions {
    pub host: Host,
    pub database: String,
    pub pool_size: usize,
    pub connect_timeout: Option<Duration>,
}

/// Yields a connection pool handle per server address.
///
/// The topology manager treats pools opaquely; only `open` and the
/// pool's `shutdown` are invoked from the reconciler.
pub trait PoolFactory: Send + Sync {
    fn open(&self, options: &ConnectOptions) -> Result<ConnectionPool>;
}

/// The default factory, producing TCP-backed pools.
#[derive(Debug, Default)]
pub struct StreamPoolFactory;

impl PoolFactory for StreamPoolFactory {
    fn open(&self, options: &ConnectOptions) -> Result<ConnectionPool> {
        let connector = match options.connect_timeout {
            Some(timeout) => StreamConnector::with_timeout(timeout),
            None => StreamConnector::new(),
        };

        Ok(ConnectionPool::with_size(
            options.host.clone(),
            connector,
            options.pool_size,
        ))
    }
}

/// Handles threaded connections to a MongoDB server.
///
/// Sockets are opened lazily on checkout, up to the pool's size; callers
/// beyond that block until a socket is returned.
#[derive(Clone)]
pub struct ConnectionPool {
    /// The connection host.
    pub host: Host,
    // The socket pool.
    inner: Arc<Mutex<Pool>>,
    // A condition variable used for threads waiting for the pool
    // to be repopulated with available connections.
    wait_lock: Arc<Condvar>,
    stream_connector: StreamConnector,
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("host", &self.host)
            .finish()
    }
}

struct Pool {
    // The maximum number of concurrent connections allowed.
    size: usize,
    // The current number of open connections.
    len: usize,
    // The idle socket pool.
    sockets: Vec<BufStream<TcpStream>>,
    // The pool iteration. When a server monitor fails to execute isMaster,
    // the connection pool is cleared and the iteration is incremented.
    iteration: usize,
    // Set once the pool is shut down; all checkouts fail afterwards.
    shutting_down: bool,
}

/// Holds an available socket, with logic to return the socket
/// to the connection pool when dropped.
pub struct PooledStream {
    // This socket option will always be Some(stream) until it is
    // returned to the pool using take().
    socket: Option<BufStream<TcpStream>>,
    // A reference to the pool that the stream was taken from.
    pool: Arc<Mutex<Pool>>,
    // A reference to the waiting condvar associated with the pool.
    wait_lock: Arc<Condvar>,
    // The pool iteration at the moment of extraction.
    iteration: usize,
}

impl PooledStream {
    /// Returns a reference to the socket.
    pub fn get_socket(&mut self) -> Option<&mut BufStream<TcpStream>> {
        self.socket.as_mut()
    }
}

impl Drop for PooledStream {
    fn drop(&mut self) {
        // Attempt to lock and return the socket to the pool,
        // or give up if the pool lock has been poisoned.
        if let Ok(mut locked) = self.pool.lock() {
            if self.iteration == locked.iteration && !locked.shutting_down {
                if let Some(socket) = self.socket.take() {
                    locked.sockets.push(socket);
                    // Notify waiting threads that the pool has been repopulated.
                    self.wait_lock.notify_one();
                }
            }
        }
    }
}

impl ConnectionPool {
    /// Returns a connection pool with a default size.
    pub fn new(host: Host, connector: StreamConnector) -> ConnectionPool {
        ConnectionPool::with_size(host, connector, DEFAULT_POOL_SIZE)
    }

    /// Returns a connection pool with a specified capped size.
    pub fn with_size(host: Host, connector: StreamConnector, size: usize) -> ConnectionPool {
        ConnectionPool {
            host,
            wait_lock: Arc::new(Condvar::new()),
            inner: Arc::new(Mutex::new(Pool {
                len: 0,
                size,
                sockets: Vec::with_capacity(size),
                iteration: 0,
                shutting_down: false,
            })),
            stream_connector: connector,
        }
    }

    /// Sets the maximum number of open connections.
    pub fn set_size(&self, size: usize) -> Result<()> {
        if size < 1 {
            Err(ArgumentError(String::from(
                "The connection pool size must be greater than zero.",
            )))
        } else {
            let mut locked = self.inner.lock()?;
            locked.size = size;
            Ok(())
        }
    }

    /// Clears all open socket connections, invalidating checked-out streams.
    pub fn clear(&self) {
        if let Ok(mut locked) = self.inner.lock() {
            locked.iteration += 1;
            locked.sockets.clear();
            locked.len = 0;
        }
    }

    /// Shuts the pool down, cancelling outstanding checkouts.
    ///
    /// Waiters are woken with `ShuttingDownError`; streams returned after
    /// this point are discarded.
    pub fn shutdown(&self) {
        if let Ok(mut locked) = self.inner.lock() {
            locked.shutting_down = true;
            locked.sockets.clear();
            locked.len = 0;
            debug!(host = %self.host, "connection pool shut down");
        }

        self.wait_lock.notify_all();
    }

    /// Attempts to acquire a connected socket. If none are available and
    /// the pool has not reached its maximum size, a new socket will connect.
    /// Otherwise, the function will block until a socket is returned to the pool.
    pub fn acquire_stream(&self) -> Result<PooledStream> {
        let mut locked = self.inner.lock()?;

        loop {
            if locked.shutting_down {
                return Err(ShuttingDownError);
            }

            // Acquire available existing socket
            if let Some(stream) = locked.sockets.pop() {
                return Ok(PooledStream {
                    socket: Some(stream),
                    pool: self.inner.clone(),
                    wait_lock: self.wait_lock.clone(),
                    iteration: locked.iteration,
                });
            }

            // Attempt to make a new connection
            if locked.len < locked.size {
                let socket = self.connect()?;
                let stream = PooledStream {
                    socket: Some(socket),
                    pool: self.inner.clone(),
                    wait_lock: self.wait_lock.clone(),
                    iteration: locked.iteration,
                };

                locked.len += 1;
                return Ok(stream);
            }

            // Release lock and wait for pool to be repopulated
            locked = self.wait_lock.wait(locked)?;
        }
    }

    // Connects to the server backing this pool.
    fn connect(&self) -> Result<BufStream<TcpStream>> {
        let stream = self
            .stream_connector
            .connect(&self.host.host_name[..], self.host.port)?;
        Ok(BufStream::new(stream))
    }
}
