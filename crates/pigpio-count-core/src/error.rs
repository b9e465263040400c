//! Error types for edge counting.
//!
//! Errors are reported synchronously by the operation that detected them.
//! Nothing is retried internally; retry and backoff belong to the caller.
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::io;
use std::path::PathBuf;

use pigpio_wire::{CommandCode, PigpioError};
use thiserror::Error;

// ============================================================================
// Connection Errors
// ============================================================================

/// Failures of the shared daemon connection.
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// The daemon could not be reached.
    ///
    /// Common causes: `pigpiod` is not running, wrong `PIGPIO_ADDR` or
    /// `PIGPIO_PORT`, or the daemon only accepts local connections.
    #[error("pigpio daemon unreachable at {addr}: {source}")]
    Unreachable {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// Connecting or the session handshake did not finish in time.
    #[error("timed out opening a session with the pigpio daemon at {addr}")]
    Timeout { addr: String },

    /// The daemon answered the handshake with an error status.
    #[error("pigpio daemon at {addr} refused the session: {source}")]
    Rejected {
        addr: String,
        #[source]
        source: PigpioError,
    },

    /// The session was dropped by the daemon or the network.
    ///
    /// There is no automatic reconnection: every counter holding the lost
    /// session must be stopped before a new one can be opened.
    #[error("session with the pigpio daemon was lost")]
    SessionLost,

    /// `release()` was called more often than `acquire()`.
    #[error("daemon connection released without a matching acquire")]
    NotAcquired,

    /// I/O failure during the session handshake.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ============================================================================
// Request Errors
// ============================================================================

/// Failure of a single round trip on an open session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// The daemon executed the command and returned an error status.
    #[error("{command} failed: {source}")]
    Daemon {
        command: CommandCode,
        #[source]
        source: PigpioError,
    },

    /// No answer arrived within the configured request timeout.
    #[error("{command} timed out")]
    Timeout { command: CommandCode },

    /// The session is gone.
    #[error("session with the pigpio daemon was lost")]
    SessionLost,
}

// ============================================================================
// Counter Errors
// ============================================================================

/// Errors returned by [`PulseCounter`](crate::PulseCounter) operations.
#[derive(Error, Debug)]
pub enum CounterError {
    /// The pin is outside the daemon's user GPIO range.
    #[error("pin {pin} is out of range (expected 0-{max})", max = pigpio_wire::MAX_USER_GPIO)]
    InvalidPin { pin: u32 },

    /// `start()` was called on a running counter.
    #[error("counter on pin {pin} is already running")]
    AlreadyRunning { pin: u32 },

    /// The shared connection could not be acquired.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// The daemon rejected the callback registration.
    ///
    /// The connection reference taken by `start()` has been released and the
    /// counter is still stopped.
    #[error("failed to register edge callback on pin {pin}: {source}")]
    Registration {
        pin: u32,
        #[source]
        source: RequestError,
    },

    /// The daemon failed to drop the callback registration.
    ///
    /// The counter is stopped locally and no longer counts; this is reported
    /// so the caller can log or alert.
    #[error("failed to deregister edge callback on pin {pin}: {source}")]
    Deregistration {
        pin: u32,
        #[source]
        source: RequestError,
    },
}

// ============================================================================
// Configuration Errors
// ============================================================================

/// Errors loading counter configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid daemon port: {0:?}")]
    InvalidPort(String),

    #[error("invalid edge {0:?} (expected rising, falling or either)")]
    InvalidEdge(String),
}

// ============================================================================
// Result Type Alias
// ============================================================================

/// Convenience Result type alias for counter operations.
pub type Result<T> = std::result::Result<T, CounterError>;

// ============================================================================
// Tests
// ============================================================================
