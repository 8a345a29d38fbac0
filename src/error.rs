use std::{error, fmt, io, sync};

/// The result type for all operations in this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for topology configuration, monitoring, and pooling.
#[derive(Debug)]
pub enum Error {
    /// An invalid argument was provided to a topology operation.
    ArgumentError(String),
    /// An I/O failure occurred while communicating with a server.
    IoError(io::Error),
    /// A server did not respond within the allotted time.
    TimeoutError(String),
    /// A server sent a malformed or unexpected reply.
    ResponseError(String),
    /// A monitoring or pooling operation could not be completed.
    OperationError(String),
    /// A connection pool could not be opened for a server.
    PoolOpenError(String),
    /// The topology (or one of its pools) has been shut down.
    ShuttingDownError,
    /// A synchronization primitive was poisoned by a panicking thread.
    PoisonLockError,
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::IoError(err)
    }
}

impl<T> From<sync::PoisonError<T>> for Error {
    fn from(_: sync::PoisonError<T>) -> Error {
        Error::PoisonLockError
    }
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::ArgumentError(ref inner) => inner.fmt(fmt),
            Error::IoError(ref inner) => inner.fmt(fmt),
            Error::TimeoutError(ref inner) => inner.fmt(fmt),
            Error::ResponseError(ref inner) => inner.fmt(fmt),
            Error::OperationError(ref inner) => inner.fmt(fmt),
            Error::PoolOpenError(ref inner) => inner.fmt(fmt),
            Error::ShuttingDownError => write!(fmt, "The topology is shutting down."),
            Error::PoisonLockError => write!(fmt, "Lock poisoned."),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            Error::IoError(ref inner) => Some(inner),
            _ => None,
        }
    }
}
