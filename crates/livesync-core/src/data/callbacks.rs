//! Optional user hooks over raw transport results
//!
//! [`CallbackDispatcher`] wraps another [`Transport`]. When an operation
//! succeeds and a hook with the matching name is registered, the raw data is
//! passed through it and the hook's return value is what the next stage
//! sees. Hooks never run for failed operations.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use super::Transport;
use crate::algebra::QuerySet;
use crate::instance::{ClientId, Props};

type ListHook = Box<dyn Fn(Value, &QuerySet) -> anyhow::Result<Value> + Send + Sync>;
type RecordHook = Box<dyn Fn(Value, &Props) -> anyhow::Result<Value> + Send + Sync>;

/// A hook rejected the data it was given
///
/// Carried inside the `anyhow::Error` returned by the dispatcher so later
/// stages can tell hook failures from transport failures.
#[derive(Debug, Error)]
#[error("{hook} hook failed: {source}")]
pub struct HookFailed {
    pub hook: &'static str,
    #[source]
    pub source: anyhow::Error,
}

/// User hooks, one optional slot per operation
#[derive(Default)]
pub struct Hooks {
    got_list_data: Option<ListHook>,
    created_data: Option<RecordHook>,
    updated_data: Option<RecordHook>,
    destroyed_data: Option<RecordHook>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Post-process list fetch results
    pub fn on_got_list_data<F>(mut self, hook: F) -> Self
    where
        F: Fn(Value, &QuerySet) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.got_list_data = Some(Box::new(hook));
        self
    }

    /// Post-process create results
    pub fn on_created_data<F>(mut self, hook: F) -> Self
    where
        F: Fn(Value, &Props) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.created_data = Some(Box::new(hook));
        self
    }

    /// Post-process update results
    pub fn on_updated_data<F>(mut self, hook: F) -> Self
    where
        F: Fn(Value, &Props) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.updated_data = Some(Box::new(hook));
        self
    }

    /// Post-process destroy results
    pub fn on_destroyed_data<F>(mut self, hook: F) -> Self
    where
        F: Fn(Value, &Props) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.destroyed_data = Some(Box::new(hook));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.got_list_data.is_none()
            && self.created_data.is_none()
            && self.updated_data.is_none()
            && self.destroyed_data.is_none()
    }
}

fn run_hook<A: ?Sized>(
    name: &'static str,
    hook: Option<&(dyn Fn(Value, &A) -> anyhow::Result<Value> + Send + Sync)>,
    data: Value,
    params: &A,
) -> anyhow::Result<Value> {
    match hook {
        Some(hook) => {
            debug!("Running {} hook", name);
            hook(data, params).map_err(|source| HookFailed { hook: name, source }.into())
        }
        None => Ok(data),
    }
}

/// Transport decorator applying [`Hooks`] to successful results
pub struct CallbackDispatcher<T> {
    inner: T,
    hooks: Hooks,
}

impl<T: Transport> CallbackDispatcher<T> {
    pub fn new(inner: T, hooks: Hooks) -> Self {
        Self { inner, hooks }
    }

    /// The wrapped transport
    pub fn inner(&self) -> &T {
        &self.inner
    }
}

#[async_trait]
impl<T: Transport> Transport for CallbackDispatcher<T> {
    async fn get_list_data(&self, query: &QuerySet) -> anyhow::Result<Value> {
        let data = self.inner.get_list_data(query).await?;
        run_hook(
            "got_list_data",
            self.hooks.got_list_data.as_deref(),
            data,
            query,
        )
    }

    async fn create_data(&self, props: &Props, cid: ClientId) -> anyhow::Result<Value> {
        let data = self.inner.create_data(props, cid).await?;
        run_hook("created_data", self.hooks.created_data.as_deref(), data, props)
    }

    async fn update_data(&self, props: &Props) -> anyhow::Result<Value> {
        let data = self.inner.update_data(props).await?;
        run_hook("updated_data", self.hooks.updated_data.as_deref(), data, props)
    }

    async fn destroy_data(&self, props: &Props) -> anyhow::Result<Value> {
        let data = self.inner.destroy_data(props).await?;
        run_hook(
            "destroyed_data",
            self.hooks.destroyed_data.as_deref(),
            data,
            props,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use serde_json::json;

    /// Transport that echoes its input, or fails every call
    struct Echo {
        fail: bool,
    }

    #[async_trait]
    impl Transport for Echo {
        async fn get_list_data(&self, query: &QuerySet) -> anyhow::Result<Value> {
            if self.fail {
                anyhow::bail!("list unavailable");
            }
            Ok(json!([query.params().clone()]))
        }

        async fn create_data(&self, props: &Props, _cid: ClientId) -> anyhow::Result<Value> {
            if self.fail {
                anyhow::bail!("create unavailable");
            }
            Ok(Value::Object(props.clone()))
        }

        async fn update_data(&self, props: &Props) -> anyhow::Result<Value> {
            if self.fail {
                anyhow::bail!("update unavailable");
            }
            Ok(Value::Object(props.clone()))
        }

        async fn destroy_data(&self, props: &Props) -> anyhow::Result<Value> {
            if self.fail {
                anyhow::bail!("destroy unavailable");
            }
            Ok(Value::Object(props.clone()))
        }
    }

    fn props(value: Value) -> Props {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    #[tokio::test]
    async fn test_passthrough_without_hooks() {
        let dispatcher = CallbackDispatcher::new(Echo { fail: false }, Hooks::new());
        let sent = props(json!({"id": 1}));

        let data = dispatcher.update_data(&sent).await.unwrap();
        assert_eq!(data, json!({"id": 1}));
        assert!(dispatcher.hooks.is_empty());
    }

    #[tokio::test]
    async fn test_hook_transforms_result() {
        let hooks = Hooks::new()
            .on_created_data(|mut data, _params| {
                data["stamped"] = json!(true);
                Ok(data)
            })
            .on_got_list_data(|data, _query| Ok(json!({ "data": data })));
        let dispatcher = CallbackDispatcher::new(Echo { fail: false }, hooks);

        let created = dispatcher
            .create_data(&props(json!({"id": 2})), ClientId::new())
            .await
            .unwrap();
        assert_eq!(created, json!({"id": 2, "stamped": true}));

        let listed = dispatcher
            .get_list_data(&QuerySet::new().with("a", 1))
            .await
            .unwrap();
        assert_eq!(listed, json!({"data": [{"a": 1}]}));
    }

    #[tokio::test]
    async fn test_hook_receives_original_params() {
        let hooks = Hooks::new().on_destroyed_data(|_data, params| {
            Ok(json!({ "was": params.get("id").cloned() }))
        });
        let dispatcher = CallbackDispatcher::new(Echo { fail: false }, hooks);

        let data = dispatcher
            .destroy_data(&props(json!({"id": 3})))
            .await
            .unwrap();
        assert_eq!(data, json!({"was": 3}));
    }

    #[tokio::test]
    async fn test_hook_skipped_on_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let hooks = Hooks::new().on_updated_data(move |data, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(data)
        });
        let dispatcher = CallbackDispatcher::new(Echo { fail: true }, hooks);

        let err = dispatcher
            .update_data(&props(json!({"id": 1})))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "update unavailable");
        assert!(err.downcast_ref::<HookFailed>().is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_hook_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let hooks = Hooks::new().on_updated_data(move |data, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(data)
        });
        let dispatcher = CallbackDispatcher::new(Echo { fail: false }, hooks);

        dispatcher
            .update_data(&props(json!({"id": 1})))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_hook_failure_is_marked() {
        let hooks = Hooks::new().on_created_data(|_, _| anyhow::bail!("rejected by hook"));
        let dispatcher = CallbackDispatcher::new(Echo { fail: false }, hooks);

        let err = dispatcher
            .create_data(&props(json!({"id": 1})), ClientId::new())
            .await
            .unwrap_err();
        let failed = err.downcast::<HookFailed>().unwrap();
        assert_eq!(failed.hook, "created_data");
        assert_eq!(failed.source.to_string(), "rejected by hook");
    }
}
