//! Per-capsule serialization and in-flight bookkeeping.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use voidnet_state::{CapsuleId, DeploymentAction};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Keyed locks ────────────────────────────────────────────────────

/// One async mutex per capsule id, created on demand.
///
/// Slots are removed once nobody holds or waits on them, so the map only
/// grows with the number of capsules that are busy at the same time.
#[derive(Debug, Default)]
pub struct CapsuleLocks {
    slots: Mutex<HashMap<CapsuleId, Arc<AsyncMutex<()>>>>,
}

impl CapsuleLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to a capsule.
    pub async fn acquire(&self, capsule_id: CapsuleId) -> CapsuleGuard<'_> {
        let slot = Arc::clone(lock(&self.slots).entry(capsule_id).or_default());
        let guard = slot.lock_owned().await;
        CapsuleGuard {
            locks: self,
            capsule_id,
            guard: Some(guard),
        }
    }

    /// Number of capsules currently locked or waited on.
    pub fn active(&self) -> usize {
        lock(&self.slots).len()
    }
}

/// Exclusive access to one capsule. Released on drop.
#[derive(Debug)]
pub struct CapsuleGuard<'a> {
    locks: &'a CapsuleLocks,
    capsule_id: CapsuleId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for CapsuleGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut slots = lock(&self.locks.slots);
        // The map's own reference is the last one: no holder, no waiter.
        let idle = slots
            .get(&self.capsule_id)
            .is_some_and(|slot| Arc::strong_count(slot) == 1);
        if idle {
            slots.remove(&self.capsule_id);
        }
    }
}

// ── In-flight registry ─────────────────────────────────────────────

/// Which capsules have a deploy or stop in progress.
#[derive(Debug, Default)]
pub struct InFlight {
    ops: Mutex<HashMap<CapsuleId, DeploymentAction>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark an operation as started. The mark is cleared when the returned
    /// marker drops.
    pub fn begin(&self, capsule_id: CapsuleId, action: DeploymentAction) -> InFlightMarker<'_> {
        lock(&self.ops).insert(capsule_id, action);
        InFlightMarker {
            registry: self,
            capsule_id,
        }
    }

    /// The operation currently running for a capsule, if any.
    pub fn action(&self, capsule_id: CapsuleId) -> Option<DeploymentAction> {
        lock(&self.ops).get(&capsule_id).copied()
    }

    /// Snapshot of every running operation.
    pub fn snapshot(&self) -> HashMap<CapsuleId, DeploymentAction> {
        lock(&self.ops).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.ops).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
pub struct InFlightMarker<'a> {
    registry: &'a InFlight,
    capsule_id: CapsuleId,
}

impl Drop for InFlightMarker<'_> {
    fn drop(&mut self) {
        lock(&self.registry.ops).remove(&self.capsule_id);
    }
}
