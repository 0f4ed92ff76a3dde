//! Connection: the assembled data pipeline
//!
//! A [`Connection`] composes, once and for all, the stages every logical
//! operation flows through:
//!
//! ```text
//! Transport -> CallbackDispatcher -> SyncEngine -> ListViews
//! ```
//!
//! Each transport-backed operation pins the instance it concerns, awaits
//! exactly one transport call, and hands the raw result to the engine.
//!
//! ## Usage
//!
//! ```ignore
//! let conn = Connection::builder(MemoryTransport::default())
//!     .hooks(Hooks::new().on_got_list_data(unwrap_envelope))
//!     .build();
//!
//! let todos = conn.get_list(&QuerySet::new().with("done", false)).await?;
//! let draft = conn.construct(props);
//! conn.save(&draft).await?; // lands in `todos` if it matches
//! ```

use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::algebra::{Algebra, DefaultAlgebra, QuerySet};
use crate::config::Config;
use crate::data::{CallbackDispatcher, Hooks, Transport};
use crate::error::{SyncError, SyncResult};
use crate::instance::{Instance, Props};
use crate::ledger::ReferenceLedger;
use crate::store::{Construct, IdentityStore};
use crate::sync::SyncEngine;
use crate::views::{ListView, ViewChange, ViewRegistry};

/// A server-originated lifecycle event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum PushMessage {
    Created(Props),
    Updated(Props),
    Destroyed(Props),
}

/// Builder for [`Connection`]
pub struct ConnectionBuilder<T> {
    transport: T,
    hooks: Hooks,
    algebra: Option<Arc<dyn Algebra>>,
    config: Config,
}

impl<T: Transport> ConnectionBuilder<T> {
    /// User hooks applied to successful transport results
    pub fn hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Predicate language for membership and ordering
    ///
    /// Defaults to [`DefaultAlgebra`] configured from the connection's
    /// [`Config`].
    pub fn algebra(mut self, algebra: Arc<dyn Algebra>) -> Self {
        self.algebra = Some(algebra);
        self
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Connection<T> {
        let algebra = self
            .algebra
            .unwrap_or_else(|| Arc::new(DefaultAlgebra::from_config(&self.config)));
        let store = IdentityStore::new(self.config.id_prop());
        info!(
            "Connection ready, id_prop={} hooks={}",
            store.id_prop().name(),
            !self.hooks.is_empty()
        );

        Connection {
            pipeline: CallbackDispatcher::new(self.transport, self.hooks),
            engine: SyncEngine::new(store, algebra),
            config: self.config,
        }
    }
}

/// Transport, hooks, and sync engine bound together
pub struct Connection<T> {
    pipeline: CallbackDispatcher<T>,
    engine: SyncEngine,
    config: Config,
}

impl<T: Transport> Connection<T> {
    pub fn builder(transport: T) -> ConnectionBuilder<T> {
        ConnectionBuilder {
            transport,
            hooks: Hooks::new(),
            algebra: None,
            config: Config::default(),
        }
    }

    /// Connection with default hooks, algebra and configuration
    pub fn new(transport: T) -> Self {
        Self::builder(transport).build()
    }

    // ==================== Accessors ====================

    pub fn transport(&self) -> &T {
        self.pipeline.inner()
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    pub fn store(&self) -> &IdentityStore {
        self.engine.store()
    }

    pub fn ledger(&self) -> &ReferenceLedger {
        self.engine.ledger()
    }

    pub fn views(&self) -> &ViewRegistry {
        self.engine.views()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Take the view change receiver (can only be called once)
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<ViewChange>> {
        self.engine.take_events()
    }

    // ==================== Local Operations ====================

    /// Construct an instance on the application side
    ///
    /// A declared identity the store already holds yields that instance.
    pub fn construct(&self, props: Props) -> Instance {
        self.store().construct(props)
    }

    /// Fetch `query` and install the result as its live view
    pub async fn get_list(&self, query: &QuerySet) -> SyncResult<ListView> {
        self.engine.check_query(query)?;
        let raw = self
            .pipeline
            .get_list_data(query)
            .await
            .map_err(SyncError::from_pipeline)?;
        self.engine.got_list_data(raw, query)
    }

    /// Persist `instance`: update when it has an identity, create otherwise
    pub async fn save(&self, instance: &Instance) -> SyncResult<Instance> {
        let _pin = self.ledger().pin(instance);
        let props = self.store().serialize_instance(instance);

        match instance.id() {
            Some(id) => {
                if !self.store().has(&id) {
                    self.store().register_identity(instance);
                }
                debug!("Saving instance {}", id);
                let raw = self
                    .pipeline
                    .update_data(&props)
                    .await
                    .map_err(SyncError::from_pipeline)?;
                self.engine.updated_data(raw, &props)
            }
            None => {
                let cid = instance.cid();
                self.store().track_pending(instance);
                debug!("Creating instance {}", cid);
                let raw = self
                    .pipeline
                    .create_data(&props, cid)
                    .await
                    .map_err(SyncError::from_pipeline)?;
                self.engine.created_data(raw, &props, Some(cid))
            }
        }
    }

    /// Destroy `instance` in the backing store and every view
    pub async fn destroy(&self, instance: &Instance) -> SyncResult<Instance> {
        let _pin = self.ledger().pin(instance);
        let props = self.store().serialize_instance(instance);
        let raw = self
            .pipeline
            .destroy_data(&props)
            .await
            .map_err(SyncError::from_pipeline)?;
        self.engine.destroyed_data(raw, &props)
    }

    // ==================== Push Path ====================

    pub fn create_instance(&self, props: Props) -> SyncResult<Instance> {
        self.engine.create_instance(props)
    }

    pub fn update_instance(&self, props: Props) -> SyncResult<Instance> {
        self.engine.update_instance(props)
    }

    pub fn destroy_instance(&self, props: Props) -> SyncResult<Instance> {
        self.engine.destroy_instance(props)
    }

    /// Apply one server-originated event
    pub fn apply_push(&self, message: PushMessage) -> SyncResult<Instance> {
        match message {
            PushMessage::Created(props) => self.create_instance(props),
            PushMessage::Updated(props) => self.update_instance(props),
            PushMessage::Destroyed(props) => self.destroy_instance(props),
        }
    }

    /// Apply events from a channel until every sender is dropped
    ///
    /// Returns the number of events applied successfully.
    pub async fn run_push_feed(&self, rx: mpsc::Receiver<PushMessage>) -> usize {
        let feed = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|message| (message, rx))
        });
        self.run_push_stream(feed).await
    }

    /// Apply events from a stream, in arrival order
    ///
    /// A failing event is logged and skipped; later events still apply.
    pub async fn run_push_stream<S>(&self, stream: S) -> usize
    where
        S: Stream<Item = PushMessage>,
    {
        futures_util::pin_mut!(stream);

        let mut applied = 0;
        let mut failed = 0;
        while let Some(message) = stream.next().await {
            match self.apply_push(message) {
                Ok(_) => applied += 1,
                Err(e) => {
                    warn!("Push event failed: {}", e);
                    failed += 1;
                }
            }
        }

        info!("Push feed closed, applied={} failed={}", applied, failed);
        applied
    }
}
