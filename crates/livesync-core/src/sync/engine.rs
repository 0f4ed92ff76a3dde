//! Lifecycle orchestration
//!
//! The [`SyncEngine`] turns confirmed create/update/destroy data into
//! changes to canonical instances and live views. It has two kinds of entry
//! points:
//!
//! - `*_data` stages receive raw data after the transport (and any user
//!   hooks) resolved. They are the terminal stage of the connection's
//!   pipeline.
//! - `*_instance` entry points receive server-originated pushes that never
//!   went through the transport, and run the matching `*_data` stage.
//!
//! None of these methods suspend: all the awaiting happens in the
//! connection, once per transport call.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use super::list::{sync_lists, Mutation};
use crate::algebra::{Algebra, QuerySet};
use crate::error::{SyncError, SyncResult};
use crate::instance::{ClientId, Instance, Props};
use crate::ledger::ReferenceLedger;
use crate::store::IdentityStore;
use crate::views::{ListView, ViewChange, ViewRegistry};

/// Keeps canonical instances and live views consistent
#[derive(Clone)]
pub struct SyncEngine {
    store: IdentityStore,
    ledger: ReferenceLedger,
    views: ViewRegistry,
    algebra: Arc<dyn Algebra>,
}

impl SyncEngine {
    /// Create an engine over a shared store
    pub fn new(store: IdentityStore, algebra: Arc<dyn Algebra>) -> Self {
        Self {
            ledger: ReferenceLedger::new(store.clone()),
            store,
            views: ViewRegistry::new(),
            algebra,
        }
    }

    pub fn store(&self) -> &IdentityStore {
        &self.store
    }

    pub fn ledger(&self) -> &ReferenceLedger {
        &self.ledger
    }

    pub fn views(&self) -> &ViewRegistry {
        &self.views
    }

    pub fn algebra(&self) -> &dyn Algebra {
        self.algebra.as_ref()
    }

    /// Take the view change receiver (can only be called once)
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<ViewChange>> {
        self.views.take_events()
    }

    // ==================== Push Entry Points ====================

    /// A record was created elsewhere
    ///
    /// A create for an identity the store already holds is treated as an
    /// update.
    pub fn create_instance(&self, props: Props) -> SyncResult<Instance> {
        if let Some(id) = self.store.identity(&props) {
            if self.store.has(&id) {
                debug!("Create for known instance {}, updating instead", id);
                return self.update_instance(props);
            }
        }

        let instance = self.store.hydrate(props.clone());
        let _pin = self.ledger.pin(&instance);
        let pending = instance.id().is_none().then(|| {
            self.store.track_pending(&instance);
            instance.cid()
        });
        let serialized = self.store.serialize_instance(&instance);
        let created = self.created_data(Value::Object(props), &serialized, pending);
        // A pushed record without an identity never gets a confirmation.
        if pending.is_some() {
            self.store.forget_pending(&instance);
        }
        created.map(|_| instance)
    }

    /// A record was updated elsewhere
    pub fn update_instance(&self, props: Props) -> SyncResult<Instance> {
        let instance = self.store.hydrate(props.clone());
        let _pin = self.ledger.pin(&instance);
        let serialized = self.store.serialize_instance(&instance);
        self.updated_data(Value::Object(props), &serialized)?;
        Ok(instance)
    }

    /// A record was destroyed elsewhere
    pub fn destroy_instance(&self, props: Props) -> SyncResult<Instance> {
        let instance = self.store.hydrate(props.clone());
        let _pin = self.ledger.pin(&instance);
        let serialized = self.store.serialize_instance(&instance);
        self.destroyed_data(Value::Object(props), &serialized)?;
        Ok(instance)
    }

    // ==================== Lifecycle Stages ====================

    /// Apply a confirmed create
    ///
    /// `pending` names the locally constructed instance the create was for;
    /// without it the instance is resolved by identity.
    pub fn created_data(
        &self,
        raw: Value,
        original: &Props,
        pending: Option<ClientId>,
    ) -> SyncResult<Instance> {
        let confirmed = confirmed_props("create", raw, original)?;
        let instance = match pending {
            Some(cid) => self
                .store
                .get_by_cid(&cid)
                .ok_or(SyncError::UnknownClientId(cid))?,
            None => self.resolve(&confirmed, original),
        };

        let _pin = self.ledger.pin(&instance);
        instance.merge(&confirmed);
        self.store.register_identity(&instance);
        sync_lists(&self.views, self.algebra(), &instance, Mutation::Create)?;
        Ok(instance)
    }

    /// Apply a confirmed update
    ///
    /// A payload that assigns a different identity than the instance
    /// already has is rejected.
    pub fn updated_data(&self, raw: Value, original: &Props) -> SyncResult<Instance> {
        let confirmed = confirmed_props("update", raw, original)?;
        let instance = self.resolve(original, &confirmed);
        if let (Some(current), Some(assigned)) = (instance.id(), self.store.identity(&confirmed)) {
            if current != assigned {
                return Err(SyncError::malformed(
                    "update",
                    format!("identity changed from {} to {}", current, assigned),
                ));
            }
        }

        let _pin = self.ledger.pin(&instance);
        instance.replace(confirmed);
        sync_lists(&self.views, self.algebra(), &instance, Mutation::Update)?;
        Ok(instance)
    }

    /// Apply a confirmed destroy
    ///
    /// The instance leaves the store once nothing pins it.
    pub fn destroyed_data(&self, raw: Value, original: &Props) -> SyncResult<Instance> {
        let confirmed = confirmed_props("destroy", raw, original)?;
        let instance = self.resolve(original, &confirmed);

        let synced = sync_lists(&self.views, self.algebra(), &instance, Mutation::Destroy);
        instance.mark_destroyed();
        self.ledger.release_if_destroyed(&instance);
        synced.map(|_| instance)
    }

    /// Reject a query set the algebra cannot evaluate
    pub fn check_query(&self, query: &QuerySet) -> SyncResult<()> {
        let probe = Props::new();
        self.algebra.belongs_to(query, &probe)?;
        self.algebra.locate(query, &[], &probe)?;
        Ok(())
    }

    /// Install the result of a list fetch as the view for `query`
    pub fn got_list_data(&self, raw: Value, query: &QuerySet) -> SyncResult<ListView> {
        self.check_query(query)?;
        let items = list_items(raw)?
            .into_iter()
            .map(|props| self.store.hydrate(props))
            .collect::<Vec<_>>();
        debug!("Fetched {} item(s) for {}", items.len(), query.key());
        Ok(self.views.install(query.clone(), items))
    }

    /// Canonical instance for whichever of `primary`/`fallback` declares an identity
    fn resolve(&self, primary: &Props, fallback: &Props) -> Instance {
        let props = if self.store.identity(primary).is_some() {
            primary
        } else {
            fallback
        };
        self.store.hydrate(props.clone())
    }
}

fn confirmed_props(operation: &'static str, raw: Value, original: &Props) -> SyncResult<Props> {
    match raw {
        Value::Object(props) => Ok(props),
        Value::Null => Ok(original.clone()),
        other => Err(SyncError::malformed(
            operation,
            format!("expected an object, got {}", other),
        )),
    }
}

fn list_items(raw: Value) -> SyncResult<Vec<Props>> {
    let items = match raw {
        Value::Array(items) => items,
        Value::Object(mut envelope) => match envelope.remove("data") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(SyncError::malformed(
                    "list",
                    "object payload without a `data` array",
                ))
            }
        },
        other => {
            return Err(SyncError::malformed(
                "list",
                format!("expected an array, got {}", other),
            ))
        }
    };

    items
        .into_iter()
        .map(|item| match item {
            Value::Object(props) => Ok(props),
            other => Err(SyncError::malformed(
                "list",
                format!("item is not an object: {}", other),
            )),
        })
        .collect()
}
