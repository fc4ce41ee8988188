//! Waiter table mapping correlation ids to pending result slots.
//!
//! Each in-flight request owns exactly one slot: a `oneshot` sender kept in
//! the table while the caller awaits the receiver. Resolving a slot removes
//! it in the same critical section, so every sync is resolved at most once.
//!
//! Syncs are allocated from a `u64` counter starting at 1. On wraparound
//! the counter skips ids that are still pending.
//!
//! Failing the table closes it: registrations are refused with the failure
//! until the next session reopens it.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{IprotoError, Result};
use crate::protocol::Response;

/// What a caller receives for its slot.
pub(crate) type Outcome = Result<Resolution>;

/// A successful resolution.
#[derive(Debug)]
pub(crate) struct Resolution {
    pub response: Response,
    /// Fresh slot for the same sync when the response was not final.
    pub next: Option<oneshot::Receiver<Outcome>>,
}

struct Waiters {
    next_sync: u64,
    pending: HashMap<u64, oneshot::Sender<Outcome>>,
    closed: Option<IprotoError>,
}

/// Table of pending requests, owned by the connection.
pub(crate) struct WaiterTable {
    inner: Mutex<Waiters>,
}

impl WaiterTable {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    fn starting_at(next_sync: u64) -> Self {
        Self {
            inner: Mutex::new(Waiters {
                next_sync,
                pending: HashMap::new(),
                closed: None,
            }),
        }
    }

    /// Allocate a sync and register its slot.
    ///
    /// Fails with the closing error while the table is closed.
    pub fn register(&self) -> Result<(u64, oneshot::Receiver<Outcome>)> {
        let mut waiters = self.inner.lock();
        if let Some(error) = &waiters.closed {
            return Err(error.clone());
        }

        let sync = loop {
            let candidate = waiters.next_sync;
            waiters.next_sync = if candidate == u64::MAX { 1 } else { candidate + 1 };
            if !waiters.pending.contains_key(&candidate) {
                break candidate;
            }
        };

        let (tx, rx) = oneshot::channel();
        waiters.pending.insert(sync, tx);
        Ok((sync, rx))
    }

    /// Accept registrations again.
    pub fn reopen(&self) {
        self.inner.lock().closed = None;
    }

    /// Resolve the slot matching the response's sync.
    ///
    /// Returns `false` if no slot is registered for it.
    pub fn resolve(&self, response: Response) -> bool {
        let sync = response.sync();
        let mut waiters = self.inner.lock();

        let tx = match waiters.pending.remove(&sync) {
            Some(tx) => tx,
            None => return false,
        };

        let mut requeued = false;
        let outcome = if response.return_code() != 0 {
            Err(IprotoError::Database {
                code: response.return_code(),
                message: response.message().to_string(),
            })
        } else if response.is_final() {
            Ok(Resolution {
                response,
                next: None,
            })
        } else {
            let (next_tx, next_rx) = oneshot::channel();
            waiters.pending.insert(sync, next_tx);
            requeued = true;
            Ok(Resolution {
                response,
                next: Some(next_rx),
            })
        };

        if tx.send(outcome).is_err() {
            tracing::debug!("Caller for sync {} is gone, dropping response", sync);
            if requeued {
                waiters.pending.remove(&sync);
            }
        }

        true
    }

    /// Drop the slot for `sync` without resolving it.
    pub fn remove(&self, sync: u64) -> bool {
        self.inner.lock().pending.remove(&sync).is_some()
    }

    /// Resolve every pending slot with an error, empty the table and close it.
    pub fn fail_all(&self, error: &IprotoError) -> usize {
        let drained: Vec<_> = {
            let mut waiters = self.inner.lock();
            waiters.closed = Some(error.clone());
            waiters.pending.drain().collect()
        };

        let count = drained.len();
        for (_, tx) in drained {
            let _ = tx.send(Err(error.clone()));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Removes a caller's slot when the caller stops waiting, whether it got
/// its answer or its future was dropped.
pub(crate) struct SlotGuard<'a> {
    table: &'a WaiterTable,
    sync: u64,
}

impl<'a> SlotGuard<'a> {
    pub fn new(table: &'a WaiterTable, sync: u64) -> Self {
        Self { table, sync }
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.table.remove(self.sync);
    }
}
