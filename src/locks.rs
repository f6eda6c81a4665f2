//! Per-node locking, ordered multi-node acquisition and the bulk-load gate.
//!
//! Every live node owns a read/write lock plus a version stamp. Writers
//! bump the stamp to an odd value while mutating, so optimistic readers
//! can validate a lock-free pass and fall back to the read lock when the
//! stamp moved. Multi-node operations acquire locks in ascending key
//! order; a request against the order while other node locks are held is
//! refused as a deadlock hazard.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};
use tracing::trace;

use crate::error::SpatialError;
use crate::key::SpatialKey;
use crate::types::LockingMode;

/// Wall-clock deadline honored by every blocking acquisition.
#[derive(Clone, Copy, Debug)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn after(timeout: Duration) -> Deadline {
        Deadline {
            at: Instant::now() + timeout,
        }
    }

    pub fn at(instant: Instant) -> Deadline {
        Deadline { at: instant }
    }

    pub fn instant(&self) -> Instant {
        self.at
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }
}

struct NodeLock {
    rw: RwLock<()>,
    stamp: AtomicU64,
}

impl NodeLock {
    fn new() -> NodeLock {
        NodeLock {
            rw: RwLock::new(()),
            stamp: AtomicU64::new(0),
        }
    }
}

thread_local! {
    // (manager id, key order token) of every node lock held by this thread.
    static HELD: RefCell<Vec<(u64, u128)>> = RefCell::new(Vec::new());
}

static NEXT_MANAGER_ID: AtomicU64 = AtomicU64::new(0);

/// Pops the held-token entry when the guard scope ends, panics included.
struct HeldToken {
    manager: u64,
    token: u128,
}

impl HeldToken {
    fn push(manager: u64, token: u128) -> HeldToken {
        HELD.with(|held| held.borrow_mut().push((manager, token)));
        HeldToken { manager, token }
    }
}

impl Drop for HeldToken {
    fn drop(&mut self) {
        HELD.with(|held| {
            let mut held = held.borrow_mut();
            if let Some(position) = held
                .iter()
                .rposition(|&(manager, token)| manager == self.manager && token == self.token)
            {
                held.remove(position);
            }
        });
    }
}

pub struct LockManager<K: SpatialKey> {
    id: u64,
    mode: LockingMode,
    locks: RwLock<HashMap<K, Arc<NodeLock>>>,
}

impl<K: SpatialKey> LockManager<K> {
    pub fn new(mode: LockingMode) -> Self {
        LockManager {
            id: NEXT_MANAGER_ID.fetch_add(1, Ordering::Relaxed),
            mode,
            locks: RwLock::new(HashMap::new()),
        }
    }

    fn handle(&self, key: &K) -> Arc<NodeLock> {
        if let Some(lock) = self.locks.read().get(key) {
            return Arc::clone(lock);
        }
        Arc::clone(
            self.locks
                .write()
                .entry(*key)
                .or_insert_with(|| Arc::new(NodeLock::new())),
        )
    }

    /// Drop the lock entry of a deleted node. Threads still holding the
    /// old handle keep it alive until they release it.
    pub fn discard(&self, key: &K) {
        self.locks.write().remove(key);
    }

    /// Largest token already held by this thread for this manager.
    fn held_ceiling(&self) -> Option<u128> {
        HELD.with(|held| {
            held.borrow()
                .iter()
                .filter(|(manager, _)| *manager == self.id)
                .map(|&(_, token)| token)
                .max()
        })
    }

    fn check_order(&self, key: &K) -> Result<(), SpatialError> {
        if let Some(ceiling) = self.held_ceiling() {
            if key.order_token() <= ceiling {
                return Err(SpatialError::DeadlockHazard {
                    requested: format!("{:?}", key),
                    held: format!("token {:#x}", ceiling),
                });
            }
        }
        Ok(())
    }

    fn timeout_error(key: &K) -> SpatialError {
        SpatialError::LockTimeout {
            key: format!("{:?}", key),
        }
    }

    /// Run `f` under the node's write lock.
    pub fn with_write<R>(
        &self,
        key: &K,
        deadline: Deadline,
        f: impl FnOnce() -> R,
    ) -> Result<R, SpatialError> {
        self.check_order(key)?;
        let lock = self.handle(key);
        let guard = lock
            .rw
            .try_write_for(deadline.remaining())
            .ok_or_else(|| Self::timeout_error(key))?;
        let _held = HeldToken::push(self.id, key.order_token());

        lock.stamp.fetch_add(1, Ordering::Release);
        let result = f();
        lock.stamp.fetch_add(1, Ordering::Release);

        drop(guard);
        Ok(result)
    }

    /// Run `f` under the read discipline of the configured mode.
    ///
    /// In optimistic mode `f` may run twice: once without the lock and,
    /// when the stamp moved underneath it, once more under the read lock.
    pub fn with_read<R>(
        &self,
        key: &K,
        deadline: Deadline,
        f: impl Fn() -> R,
    ) -> Result<R, SpatialError> {
        self.check_order(key)?;
        let lock = self.handle(key);

        if self.mode == LockingMode::Optimistic {
            let before = lock.stamp.load(Ordering::Acquire);
            if before % 2 == 0 {
                let result = f();
                if lock.stamp.load(Ordering::Acquire) == before {
                    return Ok(result);
                }
                trace!(key = ?key, "optimistic read invalidated, taking read lock");
            }
        }

        match self.mode {
            LockingMode::Conservative => {
                let guard = lock
                    .rw
                    .try_write_for(deadline.remaining())
                    .ok_or_else(|| Self::timeout_error(key))?;
                let _held = HeldToken::push(self.id, key.order_token());
                let result = f();
                drop(guard);
                Ok(result)
            }
            LockingMode::Adaptive | LockingMode::Optimistic => {
                let guard = lock
                    .rw
                    .try_read_for(deadline.remaining())
                    .ok_or_else(|| Self::timeout_error(key))?;
                let _held = HeldToken::push(self.id, key.order_token());
                let result = f();
                drop(guard);
                Ok(result)
            }
        }
    }

    /// Run `f` holding the write locks of all `keys` at once.
    ///
    /// Locks are acquired in ascending key order regardless of the order
    /// given; duplicates are collapsed.
    pub fn with_multi_write<R>(
        &self,
        keys: &[K],
        deadline: Deadline,
        f: impl FnOnce() -> R,
    ) -> Result<R, SpatialError> {
        let mut sorted: Vec<K> = keys.to_vec();
        sorted.sort();
        sorted.dedup();

        if let Some(first) = sorted.first() {
            self.check_order(first)?;
        }

        let handles: Vec<(K, Arc<NodeLock>)> = sorted
            .iter()
            .map(|key| (*key, self.handle(key)))
            .collect();

        let mut guards = Vec::with_capacity(handles.len());
        let mut held = Vec::with_capacity(handles.len());
        for (key, lock) in handles.iter() {
            let guard = lock
                .rw
                .try_write_for(deadline.remaining())
                .ok_or_else(|| Self::timeout_error(key))?;
            held.push(HeldToken::push(self.id, key.order_token()));
            guards.push(guard);
        }

        for (_, lock) in handles.iter() {
            lock.stamp.fetch_add(1, Ordering::Release);
        }
        let result = f();
        for (_, lock) in handles.iter() {
            lock.stamp.fetch_add(1, Ordering::Release);
        }

        drop(guards);
        drop(held);
        Ok(result)
    }
}

/// Index-wide single-writer gate for bulk loading.
///
/// While enabled, the enabling thread owns all writes; other writers
/// block until the gate is released or their deadline passes.
pub struct BulkGate {
    owner: Mutex<Option<ThreadId>>,
    released: Condvar,
}

impl BulkGate {
    pub fn new() -> BulkGate {
        BulkGate {
            owner: Mutex::new(None),
            released: Condvar::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.owner.lock().is_some()
    }

    pub fn is_owner(&self) -> bool {
        *self.owner.lock() == Some(thread::current().id())
    }

    pub fn enable(&self) -> Result<(), SpatialError> {
        let mut owner = self.owner.lock();
        if owner.is_some() {
            return Err(SpatialError::InvalidArgument(
                "bulk loading already enabled".to_string(),
            ));
        }
        *owner = Some(thread::current().id());
        Ok(())
    }

    pub fn disable(&self) -> Result<(), SpatialError> {
        let mut owner = self.owner.lock();
        if *owner != Some(thread::current().id()) {
            return Err(SpatialError::InvalidArgument(
                "bulk loading not enabled by this thread".to_string(),
            ));
        }
        *owner = None;
        self.released.notify_all();
        Ok(())
    }

    /// Block a non-owner writer while the gate is held.
    pub fn admit_writer(&self, deadline: Deadline) -> Result<(), SpatialError> {
        let mut owner = self.owner.lock();
        while let Some(holder) = *owner {
            if holder == thread::current().id() {
                return Ok(());
            }
            if self
                .released
                .wait_until(&mut owner, deadline.instant())
                .timed_out()
            {
                return Err(SpatialError::LockTimeout {
                    key: "bulk gate".to_string(),
                });
            }
        }
        Ok(())
    }
}
