use crate::error::Error::ArgumentError;
use crate::error::Result;

use std::fmt;

pub const DEFAULT_PORT: u16 = 27017;

/// Encapsulates the hostname and port of a server address.
///
/// Host names are canonicalized to lowercase on construction so that
/// equality and map lookups are case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Host {
    pub host_name: String,
    pub port: u16,
}

impl Host {
    /// Creates a new Host with a canonicalized host name.
    pub fn new(host_name: &str, port: u16) -> Host {
        Host {
            host_name: host_name.to_lowercase(),
            port,
        }
    }
}

impl fmt::Display for Host {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}:{}", self.host_name, self.port)
    }
}

/// Parses a `host` or `host:port` address into its canonical form.
pub fn parse_host(address: &str) -> Result<Host> {
    if address.is_empty() {
        return Err(ArgumentError("Server addresses cannot be empty.".to_owned()));
    }

    match address.rfind(':') {
        Some(idx) => {
            let host_name = &address[..idx];
            if host_name.is_empty() {
                return Err(ArgumentError(
                    format!("Server address '{}' is missing a host name.", address),
                ));
            }

            match address[idx + 1..].parse::<u16>() {
                Ok(port) => Ok(Host::new(host_name, port)),
                Err(_) => Err(ArgumentError(
                    format!("Server address '{}' has an invalid port.", address),
                )),
            }
        }
        None => Ok(Host::new(address, DEFAULT_PORT)),
    }
}
