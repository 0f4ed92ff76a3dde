//! Live query views
//!
//! A [`ListView`] is the currently believed-correct result of one
//! [`QuerySet`]. Views are created lazily the first time their query runs
//! and live in the [`ViewRegistry`] under the query's canonical key until
//! something outside the core removes them.
//!
//! Every change the sync engine makes to a view is announced as a
//! [`ViewChange`] on the registry's event channel. The channel exists only
//! once [`ViewRegistry::take_events`] has been called, and is closed again
//! when its receiver is dropped, so changes nobody listens to are discarded.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

use crate::algebra::{index_of, CanonicalKey, QuerySet};
use crate::instance::{Instance, Props, RecordId};

/// What changed in a view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ViewDiff {
    /// An item was inserted at `index`
    Inserted { index: usize },
    /// The item at `index` was removed
    Removed { index: usize },
    /// One item moved from `from` to `to`
    Moved { from: usize, to: usize },
    /// The whole view was replaced by a fresh fetch
    Replaced { len: usize },
}

/// Notification emitted whenever a view changes
#[derive(Debug, Clone)]
pub struct ViewChange {
    pub key: CanonicalKey,
    pub query: QuerySet,
    pub view: ListView,
    pub diff: ViewDiff,
}

/// Ordered result of a query set
#[derive(Clone)]
pub struct ListView {
    query: QuerySet,
    key: CanonicalKey,
    items: Arc<RwLock<Vec<Instance>>>,
}

impl ListView {
    pub(crate) fn new(query: QuerySet, items: Vec<Instance>) -> Self {
        Self {
            key: query.key(),
            query,
            items: Arc::new(RwLock::new(items)),
        }
    }

    pub fn query(&self) -> &QuerySet {
        &self.query
    }

    pub fn key(&self) -> &CanonicalKey {
        &self.key
    }

    /// Snapshot of the items, in order
    pub fn items(&self) -> Vec<Instance> {
        self.items.read().clone()
    }

    /// Identities of the items, in order
    pub fn ids(&self) -> Vec<Option<RecordId>> {
        self.items.read().iter().map(Instance::id).collect()
    }

    /// Raw properties of the items, in order
    pub fn serialize(&self) -> Vec<Props> {
        self.items.read().iter().map(Instance::props).collect()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Position of `instance` in this view
    ///
    /// Items are matched by identity value; instances without one match
    /// only themselves.
    pub fn position(&self, instance: &Instance) -> Option<usize> {
        let items = self.items.read();
        instance
            .id()
            .and_then(|id| index_of(&items, &id))
            .or_else(|| items.iter().position(|item| Instance::ptr_eq(item, instance)))
    }

    /// Whether two handles refer to the same view
    pub fn ptr_eq(a: &ListView, b: &ListView) -> bool {
        Arc::ptr_eq(&a.items, &b.items)
    }

    pub(crate) fn insert(&self, index: usize, instance: Instance) {
        let mut items = self.items.write();
        let index = index.min(items.len());
        items.insert(index, instance);
    }

    pub(crate) fn remove(&self, index: usize) -> Option<Instance> {
        let mut items = self.items.write();
        (index < items.len()).then(|| items.remove(index))
    }

    pub(crate) fn relocate(&self, from: usize, to: usize) {
        let mut items = self.items.write();
        if from < items.len() {
            let item = items.remove(from);
            let to = to.min(items.len());
            items.insert(to, item);
        }
    }

    pub(crate) fn replace(&self, new_items: Vec<Instance>) {
        *self.items.write() = new_items;
    }
}

impl fmt::Debug for ListView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListView")
            .field("key", &self.key)
            .field("ids", &self.ids())
            .finish()
    }
}

#[derive(Default)]
struct EventSlot {
    tx: Option<mpsc::UnboundedSender<ViewChange>>,
    taken: bool,
}

/// Canonical query key → live view
#[derive(Clone)]
pub struct ViewRegistry {
    views: Arc<Mutex<BTreeMap<CanonicalKey, ListView>>>,
    events: Arc<Mutex<EventSlot>>,
}

impl ViewRegistry {
    pub fn new() -> Self {
        Self {
            views: Arc::new(Mutex::new(BTreeMap::new())),
            events: Arc::new(Mutex::new(EventSlot::default())),
        }
    }

    /// Take the change receiver (can only be called once)
    ///
    /// Only changes made after this call are delivered.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<ViewChange>> {
        let mut slot = self.events.lock();
        if slot.taken {
            return None;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        slot.tx = Some(tx);
        slot.taken = true;
        Some(rx)
    }

    /// Whether a live receiver is listening for changes
    pub fn has_subscriber(&self) -> bool {
        self.events.lock().tx.is_some()
    }

    pub fn get(&self, query: &QuerySet) -> Option<ListView> {
        self.get_by_key(&query.key())
    }

    pub fn get_by_key(&self, key: &CanonicalKey) -> Option<ListView> {
        self.views.lock().get(key).cloned()
    }

    /// Install the result of running `query`
    ///
    /// A first run creates the view. Later runs replace the items of the
    /// existing view, so handles held elsewhere stay live, and emit a
    /// [`ViewDiff::Replaced`] notification.
    pub fn install(&self, query: QuerySet, items: Vec<Instance>) -> ListView {
        let key = query.key();
        let existing = self.views.lock().get(&key).cloned();
        match existing {
            Some(view) => {
                let len = items.len();
                view.replace(items);
                self.notify(&view, ViewDiff::Replaced { len });
                view
            }
            None => {
                let view = ListView::new(query, items);
                self.views.lock().insert(key, view.clone());
                view
            }
        }
    }

    /// Stop tracking the view for `query`
    pub fn remove(&self, query: &QuerySet) -> Option<ListView> {
        self.views.lock().remove(&query.key())
    }

    /// All views, ordered by canonical key
    pub fn snapshot(&self) -> Vec<ListView> {
        self.views.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.views.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn notify(&self, view: &ListView, diff: ViewDiff) {
        let mut slot = self.events.lock();
        let Some(tx) = &slot.tx else {
            return;
        };
        let change = ViewChange {
            key: view.key().clone(),
            query: view.query().clone(),
            view: view.clone(),
            diff,
        };
        if tx.send(change).is_err() {
            debug!("View change receiver dropped, no longer sending changes");
            slot.tx = None;
        }
    }
}

impl Default for ViewRegistry {
    fn default() -> Self {
        Self::new()
    }
}
