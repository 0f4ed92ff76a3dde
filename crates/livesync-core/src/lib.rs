//! livesync Core Library
//!
//! This crate keeps an application's in-memory view of remote records
//! consistent as records are created, updated, and destroyed, whether the
//! change was made locally or pushed by the server.
//!
//! # Architecture
//!
//! - **Identity**: at most one canonical [`Instance`] per record identity
//! - **Live views**: every executed query keeps a [`ListView`] that is
//!   updated in place, never re-fetched
//! - **Pipeline**: transport → optional hooks → sync engine, composed once
//!   per [`Connection`]
//!
//! # Quick Start
//!
//! ```text
//! let conn = Connection::new(MemoryTransport::default());
//! let mut events = conn.take_events().unwrap();
//!
//! // Run a query; its view stays live
//! let red = conn.get_list(&QuerySet::new().with("color", "red")).await?;
//!
//! // Create a record; it appears in `red`
//! let draft = conn.construct(props);
//! conn.save(&draft).await?;
//! ```
//!
//! # Modules
//!
//! - `connection`: Assembled pipeline (main entry point)
//! - `store`: Identity store and construction hook
//! - `sync`: Lifecycle stages and list-sync
//! - `views`: Live query views and change notifications
//! - `algebra`: Query sets, membership and ordering
//! - `ledger`: In-flight reference counting
//! - `data`: Transport interface, hooks, in-memory transport
//! - `config`: Configuration

pub mod algebra;
pub mod config;
pub mod connection;
pub mod data;
pub mod error;
pub mod instance;
pub mod ledger;
pub mod store;
pub mod sync;
pub mod views;

pub use algebra::{Algebra, CanonicalKey, DefaultAlgebra, QuerySet};
pub use config::Config;
pub use connection::{Connection, ConnectionBuilder, PushMessage};
pub use data::{CallbackDispatcher, HookFailed, Hooks, MemoryTransport, Transport};
pub use error::{AlgebraError, SyncError, SyncResult, ViewFailure};
pub use instance::{ClientId, IdProp, Instance, Props, RecordId};
pub use ledger::{PinGuard, ReferenceLedger};
pub use store::{Construct, IdentityStore, PlainConstruct};
pub use sync::SyncEngine;
pub use views::{ListView, ViewChange, ViewDiff, ViewRegistry};
