use std::collections::HashMap;

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::error::{ProtocolError, Result};
use crate::run::CancelFlag;

/// Thread-safe map from block index to payload with a capacity limit and a
/// withdrawal counter.
///
/// # Sequencing
/// `withdrawals` counts successful removals. Consumers that follow the
/// sequencing protocol always ask for index `withdrawals` and nothing else, so
/// blocks leave the buffer in strict index order no matter how many consumers
/// race for them or in which order producers publish them. [`take_next`] reads
/// the counter, removes that index and bumps the counter inside one critical
/// section; the caller's real work happens after the lock is released.
///
/// # Backpressure
/// Producers claim capacity with [`reserve`] before producing a payload.
/// Occupied entries plus outstanding reservations never exceed `capacity`, so
/// the buffer holds at most `capacity` payloads regardless of how many
/// producers feed it. Every removal broadcasts to waiting producers.
///
/// [`take_next`]: IndexedBuffer::take_next
/// [`reserve`]: IndexedBuffer::reserve
#[derive(Debug)]
pub struct IndexedBuffer {
    capacity: usize,
    inner: Mutex<Inner>,
    /// Signalled when occupancy drops (producers wait here).
    space: Condvar,
    /// Signalled on insert and on removal (consumers wait here).
    filled: Condvar,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<u64, Vec<u8>>,
    withdrawals: u64,
    reserved: usize,
    peak: usize,
}

impl Inner {
    fn occupied(&self) -> usize {
        self.entries.len() + self.reserved
    }

    fn put(&mut self, index: u64, payload: Vec<u8>) -> Result<()> {
        if self.entries.contains_key(&index) {
            return Err(ProtocolError::DuplicateIndex(index).into());
        }
        self.entries.insert(index, payload);
        self.peak = self.peak.max(self.entries.len());
        Ok(())
    }

    fn remove(&mut self, index: u64) -> Option<Vec<u8>> {
        let payload = self.entries.remove(&index)?;
        self.withdrawals += 1;
        Some(payload)
    }
}

impl IndexedBuffer {
    /// Create an empty buffer holding at most `capacity` payloads (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner::default()),
            space: Condvar::new(),
            filled: Condvar::new(),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of payloads currently stored.
    pub fn size(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Total successful removals so far; the next index a consumer should ask for.
    pub fn withdrawals(&self) -> u64 {
        self.inner.lock().withdrawals
    }

    /// Highest occupancy ever observed.
    pub fn peak_size(&self) -> usize {
        self.inner.lock().peak
    }

    /// Store `payload` under `index` without waiting for capacity.
    ///
    /// Fails with [`ProtocolError::DuplicateIndex`] if `index` is already
    /// present; the existing entries are left untouched.
    pub fn insert(&self, index: u64, payload: Vec<u8>) -> Result<()> {
        self.inner.lock().put(index, payload)?;
        self.filled.notify_all();
        Ok(())
    }

    /// Remove and return the payload under `index` if it is present.
    ///
    /// An absent index is not an error; the caller retries later.
    pub fn try_take(&self, index: u64) -> Option<Vec<u8>> {
        let mut inner = self.inner.lock();
        let payload = inner.remove(index)?;
        self.after_removal(inner);
        Some(payload)
    }

    /// Claim the block at index `withdrawals`, waiting until it is published.
    ///
    /// Returns `None` once `limit` blocks have been withdrawn or the run is
    /// cancelled.
    pub fn take_next(&self, limit: u64, cancel: &CancelFlag) -> Option<(u64, Vec<u8>)> {
        let mut inner = self.inner.lock();
        loop {
            if cancel.is_cancelled() {
                return None;
            }
            let next = inner.withdrawals;
            if next >= limit {
                return None;
            }
            if let Some(payload) = inner.remove(next) {
                self.after_removal(inner);
                return Some((next, payload));
            }
            self.filled.wait(&mut inner);
        }
    }

    /// Block until occupancy is below capacity.
    ///
    /// Returns `false` if the run was cancelled while waiting.
    pub fn await_capacity(&self, cancel: &CancelFlag) -> bool {
        let mut inner = self.inner.lock();
        while inner.occupied() >= self.capacity {
            if cancel.is_cancelled() {
                return false;
            }
            self.space.wait(&mut inner);
        }
        !cancel.is_cancelled()
    }

    /// Claim one unit of capacity for a payload that is about to be produced.
    ///
    /// Returns `None` if the run was cancelled while waiting.
    pub fn reserve(&self, cancel: &CancelFlag) -> Option<Slot<'_>> {
        let mut inner = self.inner.lock();
        loop {
            if cancel.is_cancelled() {
                return None;
            }
            if inner.occupied() < self.capacity {
                inner.reserved += 1;
                return Some(Slot {
                    buffer: self,
                    armed: true,
                });
            }
            self.space.wait(&mut inner);
        }
    }

    /// Wake every waiter so it re-checks cancellation.
    pub fn wake_all(&self) {
        let _inner = self.inner.lock();
        self.space.notify_all();
        self.filled.notify_all();
    }

    fn after_removal(&self, inner: MutexGuard<'_, Inner>) {
        let has_space = inner.occupied() < self.capacity;
        drop(inner);
        if has_space {
            self.space.notify_all();
        }
        // Other consumers may be waiting for the index that is now next.
        self.filled.notify_all();
    }

    fn release_reservation(&self) {
        let mut inner = self.inner.lock();
        inner.reserved -= 1;
        drop(inner);
        self.space.notify_all();
    }
}

/// One unit of capacity reserved in an [`IndexedBuffer`].
///
/// Dropping an unfilled slot hands the capacity back.
#[must_use = "an unfilled slot only holds capacity until it is dropped"]
#[derive(Debug)]
pub struct Slot<'a> {
    buffer: &'a IndexedBuffer,
    armed: bool,
}

impl Slot<'_> {
    /// Publish `payload` under `index` into the reserved capacity.
    pub fn fill(mut self, index: u64, payload: Vec<u8>) -> Result<()> {
        self.armed = false;
        let mut inner = self.buffer.inner.lock();
        inner.reserved -= 1;
        let res = inner.put(index, payload);
        drop(inner);
        match res {
            Ok(()) => {
                self.buffer.filled.notify_all();
            }
            Err(_) => {
                self.buffer.space.notify_all();
            }
        }
        res
    }
}

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.buffer.release_reservation();
        }
    }
}
