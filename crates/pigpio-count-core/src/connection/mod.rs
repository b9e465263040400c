//! Reference-counted connection to the pigpio daemon.
//!
//! A [`DaemonConnection`] is a cheap-to-clone slot that holds at most one
//! open [`Session`]. Counters acquire the session when they start and
//! release it when they stop; the session is opened on the first
//! acquisition and closed when the reference count drops back to zero.
//!
//! ```text
//!  PulseCounter(21) ──┐ acquire/release  ┌──────────────────┐
//!  PulseCounter(23) ──┼─────────────────▶│ DaemonConnection │
//!  PulseCounter(25) ──┘                  │  refs, Session   │
//!                                        └────────┬─────────┘
//!                                                 │
//!                            ┌────────────────────┴───────────────────┐
//!                            ▼                                        ▼
//!                   ┌─────────────────┐                     ┌──────────────────┐
//!                   │  CommandActor   │  command socket     │ notification task│
//!                   │ (mpsc requests) │◀──────▶ pigpiod ───▶│  (Dispatcher)    │
//!                   └─────────────────┘                     └──────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`.
//! A poisoned slot lock is recovered with `PoisonError::into_inner`.

mod commands;
mod session;

pub use session::Session;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, error, info};

use crate::config::DaemonConfig;
use crate::error::ConnectionError;

/// Shared handle to the daemon.
///
/// Clones share the same slot and reference count.
///
/// # Example
///
/// ```no_run
/// use pigpio_count_core::{DaemonConfig, DaemonConnection};
///
/// # async fn demo() -> Result<(), pigpio_count_core::ConnectionError> {
/// let connection = DaemonConnection::new(DaemonConfig::default());
///
/// let session = connection.acquire().await?;
/// println!("daemon version {}", session.daemon_version());
/// connection.release()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct DaemonConnection {
    inner: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    config: DaemonConfig,
    /// Reference count and session. Only held for short, non-async sections
    /// so `release()` can run from `Drop`.
    slot: Mutex<Slot>,
    /// Serializes acquisitions so concurrent first users open one session.
    open_gate: tokio::sync::Mutex<()>,
}

#[derive(Debug, Default)]
struct Slot {
    session: Option<Arc<Session>>,
    refs: usize,
    sessions_opened: u64,
}

impl DaemonConnection {
    /// Creates an unopened connection. No I/O happens until `acquire()`.
    pub fn new(config: DaemonConfig) -> Self {
        Self {
            inner: Arc::new(Shared {
                config,
                slot: Mutex::new(Slot::default()),
                open_gate: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Creates a connection configured from `PIGPIO_ADDR` / `PIGPIO_PORT`.
    pub fn from_env() -> Result<Self, crate::error::ConfigError> {
        Ok(Self::new(DaemonConfig::from_env()?))
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.inner.config
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.inner.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the shared session, opening it if nobody holds it yet.
    ///
    /// The reference count is only incremented on success.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::Unreachable` / `Timeout` / `Rejected` if a new
    ///   session cannot be opened
    /// - `ConnectionError::SessionLost` if the current session died and is
    ///   still held by other users
    pub async fn acquire(&self) -> Result<Arc<Session>, ConnectionError> {
        let _gate = self.inner.open_gate.lock().await;

        if let Some(session) = self.share_existing()? {
            return Ok(session);
        }

        let session = Arc::new(Session::open(&self.inner.config).await?);

        let mut slot = self.slot();
        slot.session = Some(Arc::clone(&session));
        slot.refs = 1;
        slot.sessions_opened += 1;
        debug!(refs = slot.refs, "Daemon connection acquired (new session)");

        Ok(session)
    }

    fn share_existing(&self) -> Result<Option<Arc<Session>>, ConnectionError> {
        let mut slot = self.slot();
        let session = match &slot.session {
            None => return Ok(None),
            Some(session) if !session.is_alive() => return Err(ConnectionError::SessionLost),
            Some(session) => Arc::clone(session),
        };
        slot.refs += 1;
        debug!(refs = slot.refs, "Daemon connection acquired (shared)");
        Ok(Some(session))
    }

    /// Drops one reference; the last one closes the session.
    ///
    /// # Errors
    ///
    /// `ConnectionError::NotAcquired` if the count is already zero.
    pub fn release(&self) -> Result<(), ConnectionError> {
        let closing = {
            let mut slot = self.slot();
            if slot.refs == 0 {
                error!("Daemon connection released without a matching acquire");
                return Err(ConnectionError::NotAcquired);
            }
            slot.refs -= 1;
            debug!(refs = slot.refs, "Daemon connection released");
            if slot.refs == 0 {
                slot.session.take()
            } else {
                None
            }
        };

        if let Some(session) = closing {
            info!(
                notify_handle = session.notify_handle(),
                "Last user released, closing pigpio session"
            );
            session.close();
        }
        Ok(())
    }

    /// Number of outstanding acquisitions.
    pub fn ref_count(&self) -> usize {
        self.slot().refs
    }

    /// Returns true while a live session is held.
    pub fn is_open(&self) -> bool {
        self.slot()
            .session
            .as_ref()
            .is_some_and(|session| session.is_alive())
    }

    /// Number of sessions opened over the lifetime of this connection.
    pub fn sessions_opened(&self) -> u64 {
        self.slot().sessions_opened
    }
}
