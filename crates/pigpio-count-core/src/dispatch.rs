//! Turns notification reports into tick increments.
//!
//! The dispatcher owns the callback table of one session. The notification
//! task calls [`Dispatcher::dispatch`] for every report while holding the
//! table's read lock; adding or removing a callback takes the write lock.
//! A report is therefore either applied to a callback in full or not at
//! all, and once [`Dispatcher::remove`] returns the callback's counter is
//! never touched again.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use pigpio_wire::NotificationReport;

use crate::config::Edge;

/// Identifier of a callback within one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackId(u32);

impl std::fmt::Display for CallbackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cb{}", self.0)
    }
}

#[derive(Debug)]
struct Callback {
    pin: u32,
    edge: Edge,
    ticks: Arc<AtomicU64>,
}

impl Callback {
    fn mask(&self) -> u32 {
        pin_mask(self.pin)
    }
}

/// Bit of `pin` in the level word; zero for pins outside GPIO 0-31.
fn pin_mask(pin: u32) -> u32 {
    1u32.checked_shl(pin).unwrap_or(0)
}

/// Callback table and level tracking for one notification stream.
#[derive(Debug, Default)]
pub(crate) struct Dispatcher {
    callbacks: RwLock<HashMap<CallbackId, Callback>>,
    /// Levels of GPIO 0-31 as of the last report.
    last_level: AtomicU32,
    next_id: AtomicU32,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<CallbackId, Callback>> {
        self.callbacks.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<CallbackId, Callback>> {
        self.callbacks.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a callback for `pin`.
    ///
    /// `levels` is a read of GPIO 0-31 taken before the call. If no other
    /// callback watches `pin`, the pin's bit of the tracked level is replaced
    /// with it, since reports for unmonitored pins may have left it stale.
    /// A watched pin's bit is already current and may be newer than `levels`.
    pub fn insert(&self, pin: u32, edge: Edge, ticks: Arc<AtomicU64>, levels: u32) -> CallbackId {
        let id = CallbackId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mask = pin_mask(pin);

        let mut callbacks = self.write();
        let watched = callbacks.values().any(|cb| cb.pin == pin);
        if !watched {
            if levels & mask != 0 {
                self.last_level.fetch_or(mask, Ordering::Relaxed);
            } else {
                self.last_level.fetch_and(!mask, Ordering::Relaxed);
            }
        }
        callbacks.insert(id, Callback { pin, edge, ticks });
        id
    }

    /// Removes a callback. Returns false if it was not registered.
    pub fn remove(&self, id: CallbackId) -> bool {
        self.write().remove(&id).is_some()
    }

    /// Bit mask of all pins with at least one callback.
    pub fn monitor_bits(&self) -> u32 {
        self.read().values().fold(0, |bits, cb| bits | cb.mask())
    }

    /// Number of registered callbacks.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Applies one report. Returns the number of ticks added.
    pub fn dispatch(&self, report: &NotificationReport) -> usize {
        if !report.flags.is_level_change() {
            return 0;
        }

        let callbacks = self.read();
        let previous = self.last_level.swap(report.level, Ordering::Relaxed);
        let changed = previous ^ report.level;
        if changed == 0 {
            return 0;
        }

        let mut delivered = 0;
        for cb in callbacks.values() {
            let mask = cb.mask();
            if changed & mask != 0 && cb.edge.matches(report.level & mask != 0) {
                cb.ticks.fetch_add(1, Ordering::Relaxed);
                delivered += 1;
            }
        }
        delivered
    }
}
