//! pigpio-count core - Edge counting through the pigpio daemon
//!
//! This crate counts edge transitions on GPIO pins without touching
//! hardware registers, by subscribing to level reports from `pigpiod`:
//! - `connection` - reference-counted [`DaemonConnection`] and its [`Session`]
//! - `counter` - [`PulseCounter`], one pin with an atomic tick count
//! - `dispatch` - turns notification reports into tick increments
//! - `config` - daemon address, counter options, config file
//! - `error` - error taxonomy
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()` outside of tests.

pub mod config;
pub mod connection;
pub mod counter;
mod dispatch;
pub mod error;

// Re-exports for convenience
pub use config::{CountConfig, CounterEntry, CounterOptions, DaemonConfig, DaemonTable, Edge};
pub use connection::{DaemonConnection, Session};
pub use counter::{CounterState, PulseCounter, TickReader};
pub use dispatch::CallbackId;
pub use error::{ConfigError, ConnectionError, CounterError, RequestError, Result};
