//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;

use livesync_core::ViewDiff;

use crate::commands::replay::ReplayReport;

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Print any serializable value as pretty JSON
    pub fn print_json<T: Serialize>(&self, value: &T) -> Result<()> {
        let text = serde_json::to_string_pretty(value).context("Failed to encode output")?;
        println!("{}", text);
        Ok(())
    }

    /// Print the final views and the changes observed during a replay
    pub fn print_replay(&self, report: &ReplayReport) -> Result<()> {
        match self.format {
            OutputFormat::Human => {
                for view in &report.views {
                    println!("View {} ({} item(s))", view.key, view.items.len());
                    for item in &view.items {
                        println!("  {}", Value::Object(item.clone()));
                    }
                    println!();
                }

                if report.changes.is_empty() {
                    println!("No view changes.");
                } else {
                    println!("── Changes ({}) ──", report.changes.len());
                    for change in &report.changes {
                        println!("{}: {}", change.key, describe(&change.diff));
                    }
                }

                if !report.errors.is_empty() {
                    println!();
                    println!("── Errors ({}) ──", report.errors.len());
                    for error in &report.errors {
                        println!("step {} ({}): {}", error.step, error.op, error.error);
                    }
                }
            }
            OutputFormat::Json => self.print_json(report)?,
            OutputFormat::Quiet => {
                for view in &report.views {
                    println!("{} {}", view.key, id_list(&view.ids));
                }
            }
        }
        Ok(())
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }
}

/// One-line description of a view change
pub fn describe(diff: &ViewDiff) -> String {
    match diff {
        ViewDiff::Inserted { index } => format!("inserted at {}", index),
        ViewDiff::Removed { index } => format!("removed from {}", index),
        ViewDiff::Moved { from, to } => format!("moved {} -> {}", from, to),
        ViewDiff::Replaced { len } => format!("replaced ({} item(s))", len),
    }
}

/// Comma-separated identities, `-` for items without one
fn id_list(ids: &[Option<Value>]) -> String {
    ids.iter()
        .map(|id| match id {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => "-".to_string(),
        })
        .collect::<Vec<_>>()
        .join(",")
}
