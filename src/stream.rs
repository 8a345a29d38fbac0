use crate::error::Error::{self, IoError, TimeoutError};
use crate::error::Result;

use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Encapsulates the functionality for how to connect to the server.
#[derive(Clone, Debug, Default)]
pub struct StreamConnector {
    connect_timeout: Option<Duration>,
}

impl StreamConnector {
    /// Creates a StreamConnector that waits indefinitely for connections.
    pub fn new() -> StreamConnector {
        StreamConnector::default()
    }

    /// Creates a StreamConnector that bounds connection establishment.
    pub fn with_timeout(connect_timeout: Duration) -> StreamConnector {
        StreamConnector {
            connect_timeout: Some(connect_timeout),
        }
    }

    /// Opens a TCP stream to the given server.
    pub fn connect(&self, host_name: &str, port: u16) -> Result<TcpStream> {
        match self.connect_timeout {
            None => TcpStream::connect((host_name, port)).map_err(Error::from),
            Some(timeout) => {
                let mut last_err = None;
                for address in (host_name, port).to_socket_addrs()? {
                    match TcpStream::connect_timeout(&address, timeout) {
                        Ok(stream) => return Ok(stream),
                        Err(err) => last_err = Some(err),
                    }
                }

                match last_err {
                    Some(ref err) if err.kind() == io::ErrorKind::TimedOut => Err(TimeoutError(
                        format!("Timed out connecting to {}:{}.", host_name, port),
                    )),
                    Some(err) => Err(IoError(err)),
                    None => Err(IoError(io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("Unable to resolve {}:{}.", host_name, port),
                    ))),
                }
            }
        }
    }
}
