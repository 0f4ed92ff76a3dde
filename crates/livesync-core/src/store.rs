//! Identity resolution
//!
//! The [`IdentityStore`] guarantees that at most one canonical [`Instance`]
//! is registered per record identity. It is a cheap, cloneable handle: every
//! clone refers to the same maps, so one store can be shared by the sync
//! engine and by application code within a single connection.
//!
//! ## Construction
//!
//! Code that builds records outside of the sync pipeline goes through the
//! [`Construct`] hook. The store's implementation redirects construction to
//! the already-registered instance when the declared identity is known, so
//! independent code paths end up holding the same object.
//!
//! ## Races
//!
//! Every lookup-then-register runs under one lock acquisition and never
//! spans an `.await`. Two hydrations separated by a suspension point can
//! still both observe "absent"; [`IdentityStore::register_identity`] keeps
//! the first registration and reports the conflict instead of merging.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::instance::{ClientId, IdProp, Instance, Props, RecordId};

/// Hook invoked whenever application code constructs a canonical object
pub trait Construct {
    /// Build (or resolve) the instance described by `props`
    fn construct(&self, props: Props) -> Instance;
}

/// Constructor that always allocates, with no identity resolution
#[derive(Debug, Clone, Default)]
pub struct PlainConstruct {
    id_prop: IdProp,
}

impl PlainConstruct {
    pub fn new(id_prop: IdProp) -> Self {
        Self { id_prop }
    }
}

impl Construct for PlainConstruct {
    fn construct(&self, props: Props) -> Instance {
        Instance::new(props, &self.id_prop)
    }
}

#[derive(Default)]
struct StoreMaps {
    by_id: HashMap<RecordId, Instance>,
    by_cid: HashMap<ClientId, Instance>,
}

/// Keyed maps from identity and pending client id to canonical instances
#[derive(Clone)]
pub struct IdentityStore {
    id_prop: IdProp,
    maps: Arc<Mutex<StoreMaps>>,
}

impl IdentityStore {
    /// Create an empty store keyed by `id_prop`
    pub fn new(id_prop: IdProp) -> Self {
        Self {
            id_prop,
            maps: Arc::new(Mutex::new(StoreMaps::default())),
        }
    }

    pub fn id_prop(&self) -> &IdProp {
        &self.id_prop
    }

    /// Identity declared by a property bag
    pub fn identity(&self, props: &Props) -> Option<RecordId> {
        self.id_prop.extract(props)
    }

    /// Get the instance registered for `id`
    pub fn get(&self, id: &RecordId) -> Option<Instance> {
        self.maps.lock().by_id.get(id).cloned()
    }

    /// Check whether an instance is registered for `id`
    pub fn has(&self, id: &RecordId) -> bool {
        self.maps.lock().by_id.contains_key(id)
    }

    /// Get a pending instance by the client id it was constructed with
    pub fn get_by_cid(&self, cid: &ClientId) -> Option<Instance> {
        self.maps.lock().by_cid.get(cid).cloned()
    }

    /// Resolve `props` to its canonical instance, registering a new one if needed
    ///
    /// An existing instance is returned untouched; its properties are never
    /// overwritten here. Without an identity no deduplication is possible,
    /// so a new instance is always allocated. It is not registered anywhere;
    /// only [`IdentityStore::track_pending`] adds client-id entries.
    pub fn hydrate(&self, props: Props) -> Instance {
        let mut maps = self.maps.lock();
        match self.id_prop.extract(&props) {
            Some(id) => {
                if let Some(existing) = maps.by_id.get(&id) {
                    return existing.clone();
                }
                let instance = Instance::new(props, &self.id_prop);
                debug!("Hydrated instance {}", id);
                maps.by_id.insert(id, instance.clone());
                instance
            }
            None => {
                let instance = Instance::new(props, &self.id_prop);
                debug!("Hydrated instance {} without identity", instance.cid());
                instance
            }
        }
    }

    /// Raw form of an instance, the inverse of [`IdentityStore::hydrate`]
    pub fn serialize_instance(&self, instance: &Instance) -> Props {
        instance.props()
    }

    /// Track a locally constructed instance until its create is confirmed
    pub fn track_pending(&self, instance: &Instance) {
        self.maps
            .lock()
            .by_cid
            .insert(instance.cid(), instance.clone());
    }

    /// Stop tracking a pending instance that will never be confirmed
    pub(crate) fn forget_pending(&self, instance: &Instance) {
        self.maps.lock().by_cid.remove(&instance.cid());
    }

    /// Register an instance under its newly assigned identity
    ///
    /// Returns `false` when the identity is missing or already held by a
    /// different instance; the existing registration wins.
    pub fn register_identity(&self, instance: &Instance) -> bool {
        let Some(id) = instance.id() else {
            return false;
        };

        let mut maps = self.maps.lock();
        maps.by_cid.remove(&instance.cid());
        match maps.by_id.get(&id) {
            Some(existing) if Instance::ptr_eq(existing, instance) => true,
            Some(_) => {
                warn!(
                    "Identity {} is already held by another instance; keeping the existing one",
                    id
                );
                false
            }
            None => {
                maps.by_id.insert(id, instance.clone());
                true
            }
        }
    }

    /// Drop every registration of `instance`
    pub(crate) fn evict(&self, instance: &Instance) {
        let mut maps = self.maps.lock();
        if let Some(id) = instance.id() {
            let registered = maps
                .by_id
                .get(&id)
                .is_some_and(|existing| Instance::ptr_eq(existing, instance));
            if registered {
                maps.by_id.remove(&id);
                debug!("Evicted instance {}", id);
            }
        }
        maps.by_cid.remove(&instance.cid());
    }

    /// Number of instances registered by identity
    pub fn len(&self) -> usize {
        self.maps.lock().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of instances waiting for an identity
    pub fn pending_len(&self) -> usize {
        self.maps.lock().by_cid.len()
    }
}

impl Default for IdentityStore {
    fn default() -> Self {
        Self::new(IdProp::default())
    }
}

impl Construct for IdentityStore {
    fn construct(&self, props: Props) -> Instance {
        if let Some(existing) = self.identity(&props).and_then(|id| self.get(&id)) {
            return existing;
        }
        Instance::new(props, &self.id_prop)
    }
}
