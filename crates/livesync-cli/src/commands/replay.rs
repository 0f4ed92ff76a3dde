//! Replay command handler
//!
//! Runs a JSON script against an in-memory backing store:
//!
//! ```json
//! {
//!   "records": [{"id": 1, "color": "red"}],
//!   "queries": [{"color": "red", "sort": "name"}],
//!   "steps": [
//!     {"op": "create", "record": {"color": "red", "name": "b"}},
//!     {"op": "update", "record": {"id": 1, "color": "blue"}},
//!     {"op": "push-destroy", "record": {"id": 2}}
//!   ]
//! }
//! ```
//!
//! `create`/`update`/`destroy` go through the transport; `push-*` steps are
//! applied as server-originated events.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use livesync_core::{
    Algebra, Config, Connection, DefaultAlgebra, MemoryTransport, Props, PushMessage, QuerySet,
    ViewDiff,
};

use crate::output::Output;

/// A replay script
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Script {
    /// Records the backing store starts with
    #[serde(default)]
    pub records: Vec<Props>,
    /// Queries whose views are opened before any step runs
    #[serde(default)]
    pub queries: Vec<Props>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// One scripted lifecycle event
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum Step {
    Create { record: Props },
    Update { record: Props },
    Destroy { record: Props },
    PushCreate { record: Props },
    PushUpdate { record: Props },
    PushDestroy { record: Props },
}

impl Step {
    fn name(&self) -> &'static str {
        match self {
            Step::Create { .. } => "create",
            Step::Update { .. } => "update",
            Step::Destroy { .. } => "destroy",
            Step::PushCreate { .. } => "push-create",
            Step::PushUpdate { .. } => "push-update",
            Step::PushDestroy { .. } => "push-destroy",
        }
    }
}

/// Final state of one view
#[derive(Debug, Serialize)]
pub struct ViewReport {
    pub key: String,
    pub ids: Vec<Option<Value>>,
    pub items: Vec<Props>,
}

/// A change observed on a view while the steps ran
#[derive(Debug, Serialize)]
pub struct ChangeReport {
    pub key: String,
    #[serde(flatten)]
    pub diff: ViewDiff,
}

/// A step that failed; later steps still ran
#[derive(Debug, Serialize)]
pub struct StepError {
    pub step: usize,
    pub op: &'static str,
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct ReplayReport {
    pub views: Vec<ViewReport>,
    pub changes: Vec<ChangeReport>,
    pub errors: Vec<StepError>,
}

/// Replay the script at `path` and print the outcome
pub async fn replay(path: &Path, config: &Config, output: &Output) -> Result<()> {
    let script = load_script(path)?;
    let report = run(script, config).await?;
    output.print_replay(&report)
}

/// Read and parse a replay script
pub fn load_script(path: &Path) -> Result<Script> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read script: {:?}", path))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid replay script: {:?}", path))
}

/// Execute a script and collect the resulting views and changes
pub async fn run(script: Script, config: &Config) -> Result<ReplayReport> {
    let algebra: Arc<dyn Algebra> = Arc::new(DefaultAlgebra::from_config(config));
    let transport = MemoryTransport::new(config.id_prop(), algebra.clone())
        .with_records(script.records);
    let conn = Connection::builder(transport)
        .algebra(algebra)
        .config(config.clone())
        .build();
    let mut events = conn
        .take_events()
        .context("View change receiver already taken")?;

    let mut views = Vec::new();
    for params in script.queries {
        let query = QuerySet::from_props(params);
        let view = conn
            .get_list(&query)
            .await
            .with_context(|| format!("Failed to open view {}", query.key()))?;
        views.push(view);
    }

    let mut errors = Vec::new();
    for (index, step) in script.steps.into_iter().enumerate() {
        let op = step.name();
        if let Err(e) = apply_step(&conn, step).await {
            warn!("Step {} ({}) failed: {:#}", index, op, e);
            errors.push(StepError {
                step: index,
                op,
                error: format!("{:#}", e),
            });
        }
    }
    info!(
        "Replayed script: {} view(s), {} error(s)",
        views.len(),
        errors.len()
    );

    let mut changes = Vec::new();
    while let Ok(change) = events.try_recv() {
        changes.push(ChangeReport {
            key: change.key.to_string(),
            diff: change.diff,
        });
    }

    let views = views
        .iter()
        .map(|view| ViewReport {
            key: view.key().to_string(),
            ids: view
                .ids()
                .into_iter()
                .map(|id| id.map(|id| id.to_value()))
                .collect(),
            items: view.serialize(),
        })
        .collect();

    Ok(ReplayReport {
        views,
        changes,
        errors,
    })
}

async fn apply_step(conn: &Connection<MemoryTransport>, step: Step) -> Result<()> {
    let id_prop = conn.store().id_prop().clone();
    match step {
        Step::Create { record } => {
            if id_prop.extract(&record).is_some() {
                bail!("create records must not carry '{}'", id_prop.name());
            }
            let draft = conn.construct(record);
            conn.save(&draft).await?;
        }
        Step::Update { record } => {
            if id_prop.extract(&record).is_none() {
                bail!("update records need '{}'", id_prop.name());
            }
            let instance = conn.construct(record.clone());
            for (key, value) in record {
                instance.set(key, value);
            }
            conn.save(&instance).await?;
        }
        Step::Destroy { record } => {
            let instance = conn.construct(record);
            conn.destroy(&instance).await?;
        }
        Step::PushCreate { record } => {
            conn.apply_push(PushMessage::Created(record))?;
        }
        Step::PushUpdate { record } => {
            conn.apply_push(PushMessage::Updated(record))?;
        }
        Step::PushDestroy { record } => {
            conn.apply_push(PushMessage::Destroyed(record))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn script(value: Value) -> Script {
        serde_json::from_value(value).unwrap()
    }

    fn ids(report: &ReplayReport, view: usize) -> Vec<Value> {
        report.views[view]
            .ids
            .iter()
            .map(|id| id.clone().unwrap_or(Value::Null))
            .collect()
    }

    #[tokio::test]
    async fn test_replay_transport_steps() {
        let report = run(
            script(json!({
                "records": [
                    {"id": 1, "color": "red", "name": "a"},
                    {"id": 2, "color": "red", "name": "c"}
                ],
                "queries": [{"color": "red", "sort": "name"}],
                "steps": [
                    {"op": "create", "record": {"color": "red", "name": "b"}},
                    {"op": "update", "record": {"id": 2, "color": "blue"}},
                    {"op": "destroy", "record": {"id": 1}}
                ]
            })),
            &Config::default(),
        )
        .await
        .unwrap();

        assert!(report.errors.is_empty());
        assert_eq!(ids(&report, 0), vec![json!(3)]);
        let diffs: Vec<ViewDiff> = report.changes.iter().map(|c| c.diff).collect();
        assert_eq!(
            diffs,
            vec![
                ViewDiff::Inserted { index: 1 },
                ViewDiff::Removed { index: 2 },
                ViewDiff::Removed { index: 0 },
            ]
        );
    }

    #[tokio::test]
    async fn test_replay_push_steps() {
        let report = run(
            script(json!({
                "queries": [{}, {"done": false}],
                "steps": [
                    {"op": "push-create", "record": {"id": 7, "done": false}},
                    {"op": "push-update", "record": {"id": 7, "done": true}},
                    {"op": "push-create", "record": {"id": 8, "done": false}},
                    {"op": "push-destroy", "record": {"id": 8}}
                ]
            })),
            &Config::default(),
        )
        .await
        .unwrap();

        assert!(report.errors.is_empty());
        assert_eq!(ids(&report, 0), vec![json!(7)]);
        assert!(report.views[1].ids.is_empty());
        assert_eq!(report.views[0].items[0].get("done"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn test_replay_collects_step_errors() {
        let report = run(
            script(json!({
                "steps": [
                    {"op": "create", "record": {"id": 1}},
                    {"op": "update", "record": {"id": 5, "n": 1}},
                    {"op": "create", "record": {"n": 2}}
                ]
            })),
            &Config::default(),
        )
        .await
        .unwrap();

        let failed: Vec<(usize, &str)> = report.errors.iter().map(|e| (e.step, e.op)).collect();
        assert_eq!(failed, vec![(0, "create"), (1, "update")]);
        assert!(report.errors[1].error.contains("record 5 not found"));
    }

    #[test]
    fn test_load_script_rejects_unknown_fields() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("script.json");
        std::fs::write(&path, r#"{"records": [], "step": []}"#).unwrap();

        assert!(load_script(&path).is_err());

        std::fs::write(
            &path,
            r#"{"steps": [{"op": "push-update", "record": {"id": 1}}]}"#,
        )
        .unwrap();
        let script = load_script(&path).unwrap();
        assert_eq!(script.steps.len(), 1);
        assert_eq!(script.steps[0].name(), "push-update");
    }
}
