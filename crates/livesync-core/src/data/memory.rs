//! In-process transport
//!
//! Holds records in memory and answers list fetches by filtering them with
//! an [`Algebra`]. Used by the CLI's replay command and by tests, which can
//! also make the next operation fail.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use super::Transport;
use crate::algebra::{Algebra, DefaultAlgebra, QuerySet};
use crate::instance::{ClientId, IdProp, Props, RecordId};

#[derive(Default)]
struct MemoryState {
    records: BTreeMap<RecordId, Props>,
    next_id: i64,
    fail_next: Option<String>,
    calls: usize,
}

impl MemoryState {
    fn begin(&mut self) -> Result<()> {
        self.calls += 1;
        match self.fail_next.take() {
            Some(message) => Err(anyhow!(message)),
            None => Ok(()),
        }
    }

    fn bump_next_id(&mut self, id: &RecordId) {
        if let RecordId::Int(n) = id {
            self.next_id = self.next_id.max(n.saturating_add(1));
        }
    }
}

/// Transport backed by an in-memory record table
pub struct MemoryTransport {
    id_prop: IdProp,
    algebra: Arc<dyn Algebra>,
    state: Mutex<MemoryState>,
}

impl MemoryTransport {
    pub fn new(id_prop: IdProp, algebra: Arc<dyn Algebra>) -> Self {
        Self {
            id_prop,
            algebra,
            state: Mutex::new(MemoryState {
                next_id: 1,
                ..Default::default()
            }),
        }
    }

    /// Seed the table; records without an identity are skipped
    pub fn with_records(self, records: impl IntoIterator<Item = Props>) -> Self {
        {
            let mut state = self.state.lock();
            for record in records {
                match self.id_prop.extract(&record) {
                    Some(id) => {
                        state.bump_next_id(&id);
                        state.records.insert(id, record);
                    }
                    None => debug!("Skipping seed record without identity"),
                }
            }
        }
        self
    }

    /// Make the next operation fail with `message`
    pub fn fail_next(&self, message: impl Into<String>) {
        self.state.lock().fail_next = Some(message.into());
    }

    /// Stored records, ordered by identity
    pub fn records(&self) -> Vec<Props> {
        self.state.lock().records.values().cloned().collect()
    }

    pub fn get(&self, id: &RecordId) -> Option<Props> {
        self.state.lock().records.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of operations attempted, failed ones included
    pub fn calls(&self) -> usize {
        self.state.lock().calls
    }

    fn require_id(&self, props: &Props) -> Result<RecordId> {
        self.id_prop
            .extract(props)
            .ok_or_else(|| anyhow!("record has no '{}'", self.id_prop.name()))
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new(IdProp::default(), Arc::new(DefaultAlgebra::default()))
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn get_list_data(&self, query: &QuerySet) -> Result<Value> {
        tokio::task::yield_now().await;

        let records = {
            let mut state = self.state.lock();
            state.begin()?;
            state.records.values().cloned().collect::<Vec<_>>()
        };

        let mut matched: Vec<Props> = Vec::new();
        for record in records {
            if !self.algebra.belongs_to(query, &record)? {
                continue;
            }
            let index = self
                .algebra
                .locate(query, &matched, &record)?
                .unwrap_or(matched.len());
            matched.insert(index, record);
        }

        debug!("Memory list {} -> {} record(s)", query.key(), matched.len());
        Ok(Value::Array(matched.into_iter().map(Value::Object).collect()))
    }

    async fn create_data(&self, props: &Props, cid: ClientId) -> Result<Value> {
        tokio::task::yield_now().await;

        let mut state = self.state.lock();
        state.begin()?;

        let mut record = props.clone();
        let id = match self.id_prop.extract(&record) {
            Some(id) if state.records.contains_key(&id) => {
                bail!("record {} already exists", id)
            }
            Some(id) => id,
            None => {
                let id = RecordId::Int(state.next_id);
                if state.records.contains_key(&id) {
                    bail!("no integer identities left after {}", id);
                }
                record.insert(self.id_prop.name().to_string(), id.to_value());
                id
            }
        };

        debug!("Memory create {} for {}", id, cid);
        state.bump_next_id(&id);
        state.records.insert(id, record.clone());
        Ok(Value::Object(record))
    }

    async fn update_data(&self, props: &Props) -> Result<Value> {
        tokio::task::yield_now().await;

        let id = self.require_id(props)?;
        let mut state = self.state.lock();
        state.begin()?;

        match state.records.get_mut(&id) {
            Some(record) => {
                *record = props.clone();
                Ok(Value::Object(props.clone()))
            }
            None => bail!("record {} not found", id),
        }
    }

    async fn destroy_data(&self, props: &Props) -> Result<Value> {
        tokio::task::yield_now().await;

        let id = self.require_id(props)?;
        let mut state = self.state.lock();
        state.begin()?;

        match state.records.remove(&id) {
            Some(record) => Ok(Value::Object(record)),
            None => bail!("record {} not found", id),
        }
    }
}
