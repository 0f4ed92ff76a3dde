//! Data interface
//!
//! The [`Transport`] trait is the fixed interface every stage of a
//! connection's data pipeline implements: the raw I/O collaborator at the
//! bottom, and decorators such as [`CallbackDispatcher`] wrapped around it.
//! Each operation resolves to raw JSON exactly as the backing store sent it.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::algebra::QuerySet;
use crate::instance::{ClientId, Props};

mod callbacks;
mod memory;

pub use callbacks::{CallbackDispatcher, HookFailed, Hooks};
pub use memory::MemoryTransport;

/// Raw create/read/update/destroy operations against a backing store
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch the records matching `query`
    async fn get_list_data(&self, query: &QuerySet) -> anyhow::Result<Value>;

    /// Create a record; `cid` identifies the local instance awaiting it
    async fn create_data(&self, props: &Props, cid: ClientId) -> anyhow::Result<Value>;

    /// Update an existing record
    async fn update_data(&self, props: &Props) -> anyhow::Result<Value>;

    /// Destroy an existing record
    async fn destroy_data(&self, props: &Props) -> anyhow::Result<Value>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn get_list_data(&self, query: &QuerySet) -> anyhow::Result<Value> {
        (**self).get_list_data(query).await
    }

    async fn create_data(&self, props: &Props, cid: ClientId) -> anyhow::Result<Value> {
        (**self).create_data(props, cid).await
    }

    async fn update_data(&self, props: &Props) -> anyhow::Result<Value> {
        (**self).update_data(props).await
    }

    async fn destroy_data(&self, props: &Props) -> anyhow::Result<Value> {
        (**self).destroy_data(props).await
    }
}
