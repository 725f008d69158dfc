//! Per-identity reader/writer locks.
//!
//! Every stored entity has a lock, created on first use and evicted once no
//! one holds or waits for it. Transactions lock their whole identity set at
//! once through [`LockManager::lock_all`], which acquires keys in the global
//! [`LockKey`] order. Two transactions with overlapping sets therefore wait
//! on the first shared key instead of each holding what the other needs.

use crate::entity::Ref;
use crate::error::{CoreError, CoreResult};
use crate::types::TypeTag;
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What a lock protects.
///
/// The derived order puts every entity before every type gate; entities are
/// ordered by [`Ref`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LockKey {
    /// One stored entity.
    Entity(Ref),
    /// Serializes writers of a type that carries unique fields.
    TypeGate(TypeTag),
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entity(r) => write!(f, "entity {r}"),
            Self::TypeGate(tag) => write!(f, "type gate {tag}"),
        }
    }
}

/// Shared or exclusive access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LockMode {
    /// Shared; any number of readers.
    Read,
    /// Exclusive.
    Write,
}

#[derive(Debug, Default)]
struct Holders {
    readers: usize,
    writer: bool,
}

impl Holders {
    fn admits(&self, mode: LockMode) -> bool {
        match mode {
            LockMode::Read => !self.writer,
            LockMode::Write => !self.writer && self.readers == 0,
        }
    }
}

#[derive(Debug, Default)]
struct IdentityLock {
    holders: Mutex<Holders>,
    released: Condvar,
}

impl IdentityLock {
    /// Blocks until the lock admits `mode`, or until `deadline`.
    fn acquire(&self, mode: LockMode, deadline: Option<Instant>) -> bool {
        let mut holders = self.holders.lock();
        while !holders.admits(mode) {
            match deadline {
                Some(deadline) => {
                    if self.released.wait_until(&mut holders, deadline).timed_out()
                        && !holders.admits(mode)
                    {
                        return false;
                    }
                }
                None => self.released.wait(&mut holders),
            }
        }
        match mode {
            LockMode::Read => holders.readers += 1,
            LockMode::Write => holders.writer = true,
        }
        true
    }

    fn release(&self, mode: LockMode) {
        let mut holders = self.holders.lock();
        match mode {
            LockMode::Read => holders.readers = holders.readers.saturating_sub(1),
            LockMode::Write => holders.writer = false,
        }
        drop(holders);
        self.released.notify_all();
    }
}

/// Counters exposed for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockStats {
    /// Locks currently registered (held, awaited, or idle but not yet swept).
    pub registered: usize,
    /// Successful acquisitions since the store was opened.
    pub acquisitions: u64,
    /// Acquisitions that gave up after the timeout.
    pub timeouts: u64,
    /// Idle locks evicted by sweeps.
    pub evicted: u64,
}

/// Registry of identity locks.
///
/// # Thread Safety
///
/// The registry map is only locked to look up or insert an entry; waiting
/// happens on the entry itself, outside the map lock.
pub struct LockManager {
    locks: Mutex<HashMap<LockKey, Arc<IdentityLock>>>,
    timeout: Option<Duration>,
    sweep_interval: u64,
    releases: AtomicU64,
    acquisitions: AtomicU64,
    timeouts: AtomicU64,
    evicted: AtomicU64,
}

impl fmt::Debug for LockManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockManager")
            .field("stats", &self.stats())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl LockManager {
    /// Creates a lock manager.
    ///
    /// `timeout = None` blocks without bound. Idle locks are swept every
    /// `sweep_interval` releases (0 disables automatic sweeps).
    #[must_use]
    pub fn new(timeout: Option<Duration>, sweep_interval: u64) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            timeout,
            sweep_interval,
            releases: AtomicU64::new(0),
            acquisitions: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        }
    }

    fn entry(&self, key: LockKey) -> Arc<IdentityLock> {
        Arc::clone(self.locks.lock().entry(key).or_default())
    }

    /// Takes a shared lock on one key.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LockTimeout`] if a timeout is configured and
    /// expires.
    pub fn lock_read(&self, key: LockKey) -> CoreResult<LockSet<'_>> {
        self.lock_all([(key, LockMode::Read)])
    }

    /// Takes an exclusive lock on one key.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LockTimeout`] if a timeout is configured and
    /// expires.
    pub fn lock_write(&self, key: LockKey) -> CoreResult<LockSet<'_>> {
        self.lock_all([(key, LockMode::Write)])
    }

    /// Locks a batch of keys in global key order.
    ///
    /// A key requested in both modes is locked for writing. On timeout every
    /// lock already taken by this call is released again.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LockTimeout`] if a timeout is configured and
    /// expires.
    pub fn lock_all(
        &self,
        keys: impl IntoIterator<Item = (LockKey, LockMode)>,
    ) -> CoreResult<LockSet<'_>> {
        let mut wanted: BTreeMap<LockKey, LockMode> = BTreeMap::new();
        for (key, mode) in keys {
            let slot = wanted.entry(key).or_insert(mode);
            *slot = (*slot).max(mode);
        }

        let deadline = self.timeout.map(|t| Instant::now() + t);
        let mut set = LockSet {
            manager: self,
            held: Vec::with_capacity(wanted.len()),
        };
        for (key, mode) in wanted {
            let lock = self.entry(key);
            if !lock.acquire(mode, deadline) {
                self.timeouts.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(%key, "lock timeout");
                // Dropping `set` releases what was taken so far.
                return Err(CoreError::LockTimeout {
                    key: key.to_string(),
                });
            }
            self.acquisitions.fetch_add(1, Ordering::Relaxed);
            set.held.push((key, mode, lock));
        }
        Ok(set)
    }

    /// Evicts locks nobody holds or waits for. Returns how many were evicted.
    pub fn sweep(&self) -> usize {
        let mut locks = self.locks.lock();
        let before = locks.len();
        // Holders and waiters each keep a clone of the entry.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        let evicted = before - locks.len();
        self.evicted.fetch_add(evicted as u64, Ordering::Relaxed);
        evicted
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> LockStats {
        LockStats {
            registered: self.locks.lock().len(),
            acquisitions: self.acquisitions.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
        }
    }

    fn released(&self, count: usize) {
        if self.sweep_interval == 0 || count == 0 {
            return;
        }
        let before = self.releases.fetch_add(count as u64, Ordering::Relaxed);
        if before / self.sweep_interval != (before + count as u64) / self.sweep_interval {
            self.sweep();
        }
    }
}

/// A group of held locks, released together on drop.
#[must_use = "locks are released as soon as the set is dropped"]
pub struct LockSet<'a> {
    manager: &'a LockManager,
    held: Vec<(LockKey, LockMode, Arc<IdentityLock>)>,
}

impl LockSet<'_> {
    /// Whether `key` is held in `mode` or stronger.
    #[must_use]
    pub fn covers(&self, key: LockKey, mode: LockMode) -> bool {
        self.held.iter().any(|(k, m, _)| *k == key && *m >= mode)
    }

    /// The held keys in acquisition order.
    pub fn keys(&self) -> impl Iterator<Item = (LockKey, LockMode)> + '_ {
        self.held.iter().map(|(k, m, _)| (*k, *m))
    }

    /// Number of held locks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.held.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }
}

impl fmt::Debug for LockSet<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.keys()).finish()
    }
}

impl Drop for LockSet<'_> {
    fn drop(&mut self) {
        let count = self.held.len();
        // Release in reverse acquisition order.
        for (_, mode, lock) in self.held.drain(..).rev() {
            lock.release(mode);
        }
        self.manager.released(count);
    }
}
