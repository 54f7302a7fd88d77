//! Per-key mutual exclusion.
//!
//! Every mutation of a `(table, key)` pair runs inside an exclusive section
//! handed out in ticket order, so same-key writers are applied in arrival
//! order. Waiters give up after the configured timeout; an abandoned ticket is
//! skipped when its turn comes. Unrelated keys never wait on each other.

use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::warn;

use crate::error::{Error, WriteError};
use crate::types::TableId;

type LockKey = (TableId, Vec<u8>);

#[derive(Default)]
struct Slot {
    next_ticket: u64,
    serving: u64,
    /// Tickets held or waited on by live callers.
    outstanding: usize,
    abandoned: BTreeSet<u64>,
}

pub struct KeyCoordinator {
    slots: Mutex<HashMap<LockKey, Slot>>,
    released: Condvar,
    timeout: Duration,
}

/// Holds the exclusive section for one key until dropped.
pub struct KeyGuard<'a> {
    coordinator: &'a KeyCoordinator,
    key: Option<LockKey>,
}

impl KeyCoordinator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            released: Condvar::new(),
            timeout,
        }
    }

    /// Wait for the exclusive section on `key` of table `table_id`.
    ///
    /// `table_name` only feeds the contention error.
    pub fn acquire(
        &self,
        table_id: TableId,
        table_name: &str,
        key: &[u8],
    ) -> Result<KeyGuard<'_>, Error> {
        let lock_key = (table_id, key.to_vec());
        let started = Instant::now();
        let deadline = started + self.timeout;

        let mut slots = self.slots.lock();
        let slot = slots.entry(lock_key.clone()).or_default();
        let ticket = slot.next_ticket;
        slot.next_ticket += 1;
        slot.outstanding += 1;

        loop {
            let serving = slots.get(&lock_key).map(|s| s.serving);
            if serving == Some(ticket) {
                return Ok(KeyGuard {
                    coordinator: self,
                    key: Some(lock_key),
                });
            }
            if self.released.wait_until(&mut slots, deadline).timed_out() {
                let Some(slot) = slots.get_mut(&lock_key) else {
                    return Err(Error::Internal("lock slot vanished".into()));
                };
                if slot.serving == ticket {
                    continue;
                }
                slot.abandoned.insert(ticket);
                slot.outstanding -= 1;
                let waited_ms = started.elapsed().as_millis() as u64;
                warn!(table = table_name, waited_ms, "per-key section wait timed out");
                return Err(WriteError::KeyContention {
                    table: table_name.to_string(),
                    waited_ms,
                }
                .into());
            }
        }
    }

    /// Wait until no writer holds `key`, then return immediately.
    ///
    /// Strongly consistent reads use this to observe fully applied writes.
    pub fn barrier(&self, table_id: TableId, table_name: &str, key: &[u8]) -> Result<(), Error> {
        drop(self.acquire(table_id, table_name, key)?);
        Ok(())
    }

    fn release(&self, key: &LockKey) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get_mut(key) {
            slot.outstanding -= 1;
            slot.serving += 1;
            while slot.abandoned.remove(&slot.serving) {
                slot.serving += 1;
            }
            if slot.outstanding == 0 {
                slots.remove(key);
            }
        }
        drop(slots);
        self.released.notify_all();
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.slots.lock().len()
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.coordinator.release(&key);
        }
    }
}
