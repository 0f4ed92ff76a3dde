//! In-flight reference counting
//!
//! While an asynchronous mutation is outstanding, the instance it refers to
//! is pinned in the [`ReferenceLedger`]. A pin is advisory bookkeeping, not
//! a lock: two operations may hold pins on the same instance at once.
//!
//! The ledger is also what finally evicts a destroyed instance from the
//! [`IdentityStore`]: a confirmed destroy evicts immediately when nothing is
//! pinned, otherwise the last released pin does.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::instance::{ClientId, Instance};
use crate::store::IdentityStore;

/// Per-instance count of outstanding references
#[derive(Clone)]
pub struct ReferenceLedger {
    store: IdentityStore,
    counts: Arc<Mutex<HashMap<ClientId, usize>>>,
}

impl ReferenceLedger {
    pub fn new(store: IdentityStore) -> Self {
        Self {
            store,
            counts: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Pin `instance` until the returned guard is dropped
    pub fn pin(&self, instance: &Instance) -> PinGuard {
        self.add_reference(instance);
        PinGuard {
            ledger: self.clone(),
            instance: instance.clone(),
        }
    }

    /// Increment the reference count, returning the new value
    pub fn add_reference(&self, instance: &Instance) -> usize {
        let mut counts = self.counts.lock();
        let count = counts.entry(instance.cid()).or_insert(0);
        *count += 1;
        *count
    }

    /// Decrement the reference count, returning the new value
    ///
    /// Reaching zero on a destroyed instance evicts it from the store.
    pub fn delete_reference(&self, instance: &Instance) -> usize {
        let remaining = {
            let mut counts = self.counts.lock();
            match counts.get_mut(&instance.cid()) {
                Some(count) if *count > 1 => {
                    *count -= 1;
                    *count
                }
                Some(_) => {
                    counts.remove(&instance.cid());
                    0
                }
                None => 0,
            }
        };

        if remaining == 0 {
            self.release_if_destroyed(instance);
        }
        remaining
    }

    /// Current reference count of `instance`
    pub fn count(&self, instance: &Instance) -> usize {
        self.counts
            .lock()
            .get(&instance.cid())
            .copied()
            .unwrap_or(0)
    }

    /// Evict `instance` if its destroy is confirmed and nothing pins it
    pub fn release_if_destroyed(&self, instance: &Instance) -> bool {
        if instance.is_destroyed() && self.count(instance) == 0 {
            self.store.evict(instance);
            true
        } else {
            false
        }
    }
}

/// Releases one reference when dropped
pub struct PinGuard {
    ledger: ReferenceLedger,
    instance: Instance,
}

impl PinGuard {
    pub fn instance(&self) -> &Instance {
        &self.instance
    }
}

impl Drop for PinGuard {
    fn drop(&mut self) {
        self.ledger.delete_reference(&self.instance);
    }
}
