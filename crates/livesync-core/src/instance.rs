//! Canonical record model
//!
//! An [`Instance`] is the single in-memory object standing for one record.
//! Cloning an `Instance` clones a handle, never the record: every clone sees
//! the same properties, and [`Instance::ptr_eq`] tells whether two handles
//! point at the same object.
//!
//! Records are identified by a [`RecordId`] taken from a configurable
//! property of their [`Props`]. Until the backing store assigns one, an
//! instance is known only by its [`ClientId`].

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Ordered property bag of a record
pub type Props = serde_json::Map<String, Value>;

/// Persistent identity value of a record
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Int(i64),
    /// Integers above `i64::MAX`
    UInt(u64),
    Str(String),
}

impl RecordId {
    /// Interpret a JSON value as an identity
    ///
    /// Integers and strings qualify. `null`, floats and composite values do
    /// not, and are treated as "no identity yet".
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n
                .as_i64()
                .map(RecordId::Int)
                .or_else(|| n.as_u64().map(RecordId::UInt)),
            Value::String(s) => Some(RecordId::Str(s.clone())),
            _ => None,
        }
    }

    /// The JSON form of this identity
    pub fn to_value(&self) -> Value {
        match self {
            RecordId::Int(n) => Value::from(*n),
            RecordId::UInt(n) => Value::from(*n),
            RecordId::Str(s) => Value::from(s.as_str()),
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Int(n) => write!(f, "{}", n),
            RecordId::UInt(n) => write!(f, "{}", n),
            RecordId::Str(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for RecordId {
    fn from(n: i64) -> Self {
        RecordId::Int(n)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        RecordId::Str(s.to_string())
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        RecordId::Str(s)
    }
}

/// Name of the property carrying a record's identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdProp(Arc<str>);

impl IdProp {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    /// Extract the identity of a property bag
    pub fn extract(&self, props: &Props) -> Option<RecordId> {
        props.get(self.name()).and_then(RecordId::from_value)
    }
}

impl Default for IdProp {
    fn default() -> Self {
        Self::new("id")
    }
}

/// Temporary key for an instance that has no persistent identity yet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(Uuid);

impl ClientId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct InstanceState {
    id: Option<RecordId>,
    props: Props,
    destroyed: bool,
}

struct InstanceCell {
    cid: ClientId,
    id_prop: IdProp,
    state: RwLock<InstanceState>,
}

/// Canonical in-memory representation of one record
#[derive(Clone)]
pub struct Instance {
    inner: Arc<InstanceCell>,
}

impl Instance {
    /// Allocate a new instance
    ///
    /// This bypasses identity resolution; application code goes through a
    /// [`Construct`](crate::store::Construct) implementation instead.
    pub(crate) fn new(props: Props, id_prop: &IdProp) -> Self {
        let id = id_prop.extract(&props);
        Self {
            inner: Arc::new(InstanceCell {
                cid: ClientId::new(),
                id_prop: id_prop.clone(),
                state: RwLock::new(InstanceState {
                    id,
                    props,
                    destroyed: false,
                }),
            }),
        }
    }

    /// Client id assigned at construction
    pub fn cid(&self) -> ClientId {
        self.inner.cid
    }

    /// Persistent identity, once the backing store has assigned one
    pub fn id(&self) -> Option<RecordId> {
        self.inner.state.read().id.clone()
    }

    /// Snapshot of the current properties
    pub fn props(&self) -> Props {
        self.inner.state.read().props.clone()
    }

    /// Current value of a single property
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.state.read().props.get(key).cloned()
    }

    /// Set a property locally
    ///
    /// The identity property is managed by the sync engine; setting it here
    /// does not re-key the instance.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.inner
            .state
            .write()
            .props
            .insert(key.into(), value.into());
    }

    /// Whether a destroy has been confirmed for this instance
    pub fn is_destroyed(&self) -> bool {
        self.inner.state.read().destroyed
    }

    /// Whether two handles refer to the same canonical object
    pub fn ptr_eq(a: &Instance, b: &Instance) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// Deserialize the current properties into a typed record
    pub fn decode<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_value(Value::Object(self.props()))
    }

    /// Assign confirmed properties on top of the current ones
    pub(crate) fn merge(&self, props: &Props) {
        let mut state = self.inner.state.write();
        for (key, value) in props {
            state.props.insert(key.clone(), value.clone());
        }
        if let Some(id) = self.inner.id_prop.extract(&state.props) {
            state.id = Some(id);
        }
    }

    /// Replace all properties with confirmed ones
    ///
    /// A known identity survives a payload that omits it.
    pub(crate) fn replace(&self, mut props: Props) {
        let mut state = self.inner.state.write();
        match self.inner.id_prop.extract(&props) {
            Some(id) => state.id = Some(id),
            None => {
                if let Some(id) = &state.id {
                    props.insert(self.inner.id_prop.name().to_string(), id.to_value());
                }
            }
        }
        state.props = props;
    }

    pub(crate) fn mark_destroyed(&self) {
        self.inner.state.write().destroyed = true;
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.read();
        f.debug_struct("Instance")
            .field("cid", &self.inner.cid)
            .field("id", &state.id)
            .field("props", &state.props)
            .field("destroyed", &state.destroyed)
            .finish()
    }
}
