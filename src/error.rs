/// Error handling module for KV Runner.
///
/// This module defines the error types used throughout the library.
/// Every failure that reaches a boundary (HTTP or CLI) is one of these
/// variants, and variants raised on behalf of an instance carry its id.
///
/// # Example
///
/// ```
/// use kv_runner::error::{Error, Result};
///
/// fn handle_error(result: Result<()>) {
///     match result {
///         Ok(_) => println!("Operation succeeded"),
///         Err(Error::NotFound(id)) => println!("Instance '{}' does not exist", id),
///         Err(Error::NoPortsAvailable { min, max }) => println!("No free port in {}-{}", min, max),
///         Err(e) => println!("Other error: {}", e),
///     }
/// }
/// ```
use thiserror::Error;

/// Errors that can occur in the kv-runner library.
///
/// Lower-level components (port allocation, process lookup) never return an
/// error for a normal "nothing found" outcome; only exhaustion and I/O
/// failures are reported.
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to parse configuration from a file or string.
    ///
    /// This error occurs when:
    /// - The configuration JSON is malformed
    /// - Field types are incorrect
    /// - An instance config file line has an unparseable value
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(String),

    /// Configuration parsed but contains invalid values.
    ///
    /// This error occurs when:
    /// - The server binary is empty
    /// - The port range is empty or inverted
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    /// No instance with the given id is known.
    #[error("Instance not found: {0}")]
    NotFound(String),

    /// An instance with the given id already exists, either as a record or
    /// as a directory under the base path.
    #[error("Instance already exists: {0}")]
    AlreadyExists(String),

    /// The port is already recorded for another instance or is bound by
    /// some other process.
    #[error("Port {0} is already in use")]
    PortConflict(u16),

    /// The instance id cannot be used as a directory name.
    #[error("Invalid instance id '{0}'")]
    InvalidId(String),

    /// A boundary request was malformed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Every port of the configured range is taken.
    #[error("No ports available in range {min}-{max}")]
    NoPortsAvailable {
        /// Lowest port of the range
        min: u16,
        /// Highest port of the range
        max: u16,
    },

    /// Instance files could not be created.
    ///
    /// This error occurs when:
    /// - The instance or data directory cannot be created
    /// - The config file cannot be written
    #[error("Failed to create instance '{id}': {message}")]
    Creation {
        /// Instance id
        id: String,
        /// Failure detail
        message: String,
    },

    /// The server process could not be started or did not pass the
    /// liveness probe.
    #[error("Failed to start instance '{id}': {message}")]
    StartFailed {
        /// Instance id
        id: String,
        /// Failure detail
        message: String,
    },

    /// The server process could not be signalled.
    #[error("Failed to stop instance '{id}': {message}")]
    StopFailed {
        /// Instance id
        id: String,
        /// Failure detail
        message: String,
    },

    /// The persistence layer failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A filesystem operation failed outside instance creation.
    #[error("I/O error: {0}")]
    Io(String),

    /// Any other error not covered by the above categories.
    #[error("Other error: {0}")]
    Other(String),
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

/// Result type for kv-runner operations.
///
/// This is a convenience type alias for `std::result::Result` with the `Error` type
/// from this module.
pub type Result<T> = std::result::Result<T, Error>;
