//! Edge counter for a single GPIO pin.
//!
//! A [`PulseCounter`] is either stopped or running:
//!
//! ```text
//!            start()                stop() / drop
//!  Stopped ───────────▶ Running ─────────────────▶ Stopped
//!     ▲                                              │
//!     └──────────────────── start() ◀────────────────┘
//! ```
//!
//! The tick count survives `stop()`. Starting again resumes from the
//! retained value; only a new counter starts from zero.
//!
//! # Panic-Free Guarantees
//!
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::CounterOptions;
use crate::connection::{DaemonConnection, Session};
use crate::dispatch::CallbackId;
use crate::error::{CounterError, Result};

/// Lifecycle state of a counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterState {
    Stopped,
    Running,
}

/// Read-only view of a counter's ticks that can be moved to other threads.
#[derive(Debug, Clone)]
pub struct TickReader {
    ticks: Arc<AtomicU64>,
}

impl TickReader {
    /// Current tick count. Never blocks.
    pub fn get(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }
}

/// Counts qualifying edges on one GPIO pin.
///
/// # Example
///
/// ```no_run
/// use pigpio_count_core::{DaemonConnection, PulseCounter};
/// use std::time::Duration;
///
/// # async fn demo() -> pigpio_count_core::Result<()> {
/// let connection = DaemonConnection::new(Default::default());
/// let mut counter = PulseCounter::new(&connection, 21)?;
/// counter.start().await?;
///
/// for _ in 0..15 {
///     tokio::time::sleep(Duration::from_secs(1)).await;
///     println!("{}", counter.tick_count());
/// }
///
/// counter.stop().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct PulseCounter {
    connection: DaemonConnection,
    pin: u32,
    options: CounterOptions,
    ticks: Arc<AtomicU64>,
    /// Present exactly while running.
    registration: Option<Registration>,
}

impl PulseCounter {
    /// Creates a stopped counter for `pin` counting rising edges.
    ///
    /// # Errors
    ///
    /// `CounterError::InvalidPin` if `pin` is above 31.
    pub fn new(connection: &DaemonConnection, pin: u32) -> Result<Self> {
        Self::with_options(connection, pin, CounterOptions::default())
    }

    /// Creates a stopped counter with explicit edge and filter options.
    pub fn with_options(
        connection: &DaemonConnection,
        pin: u32,
        options: CounterOptions,
    ) -> Result<Self> {
        if pin > pigpio_wire::MAX_USER_GPIO {
            return Err(CounterError::InvalidPin { pin });
        }

        Ok(Self {
            connection: connection.clone(),
            pin,
            options,
            ticks: Arc::new(AtomicU64::new(0)),
            registration: None,
        })
    }

    pub fn pin(&self) -> u32 {
        self.pin
    }

    pub fn options(&self) -> &CounterOptions {
        &self.options
    }

    pub fn state(&self) -> CounterState {
        if self.registration.is_some() {
            CounterState::Running
        } else {
            CounterState::Stopped
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == CounterState::Running
    }

    /// Ticks counted so far. Safe from any thread, never blocks.
    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// A cloneable reader of this counter's ticks.
    pub fn reader(&self) -> TickReader {
        TickReader {
            ticks: Arc::clone(&self.ticks),
        }
    }

    /// Starts counting.
    ///
    /// # Errors
    ///
    /// - `CounterError::AlreadyRunning` if the counter is running
    /// - `CounterError::Connection` if the daemon cannot be reached
    /// - `CounterError::Registration` if the daemon rejects the callback;
    ///   the connection reference is released and the counter stays stopped
    pub async fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Err(CounterError::AlreadyRunning { pin: self.pin });
        }

        let session = self.connection.acquire().await?;
        let mut registration = Registration {
            connection: self.connection.clone(),
            session,
            callback: None,
        };

        let registered = registration
            .session
            .register(self.pin, &self.options, Arc::clone(&self.ticks))
            .await;

        match registered {
            Ok(callback) => {
                registration.callback = Some(callback);
                self.registration = Some(registration);
                info!(
                    pin = self.pin,
                    edge = %self.options.edge,
                    ticks = self.tick_count(),
                    "Pulse counter started"
                );
                Ok(())
            }
            Err(source) => {
                warn!(pin = self.pin, error = %source, "Edge callback registration failed");
                drop(registration);
                Err(CounterError::Registration {
                    pin: self.pin,
                    source,
                })
            }
        }
    }

    /// Stops counting. Does nothing if already stopped.
    ///
    /// The tick count is kept. The counter is stopped when this returns, even
    /// on error.
    ///
    /// # Errors
    ///
    /// `CounterError::Deregistration` if the daemon could not be told to stop
    /// reporting the pin.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(registration) = self.registration.take() else {
            return Ok(());
        };

        let result = registration.close().await;
        info!(pin = self.pin, ticks = self.tick_count(), "Pulse counter stopped");

        result.map_err(|source| {
            warn!(pin = self.pin, error = %source, "Edge callback deregistration failed");
            CounterError::Deregistration {
                pin: self.pin,
                source,
            }
        })
    }
}

// ============================================================================
// Registration
// ============================================================================

/// A held connection reference plus, once registered, the edge callback.
///
/// Dropping it without [`close`](Registration::close) removes the callback,
/// queues the mask update and releases the reference without waiting, which
/// covers early returns, cancelled futures and dropping a running counter.
#[derive(Debug)]
struct Registration {
    connection: DaemonConnection,
    session: Arc<Session>,
    callback: Option<CallbackId>,
}

impl Registration {
    async fn close(mut self) -> std::result::Result<(), crate::error::RequestError> {
        let Some(callback) = self.callback.take() else {
            return Ok(());
        };
        self.session.remove_callback(callback);
        // Drop releases the connection reference after the round trip.
        self.session.sync_notify_bits().await.map(|_| ())
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Some(callback) = self.callback.take() {
            debug!(callback = %callback, "Dropping running edge callback");
            self.session.remove_callback(callback);
            self.session.sync_notify_bits_detached();
        }
        if let Err(err) = self.connection.release() {
            warn!(error = %err, "Failed to release daemon connection");
        }
    }
}
