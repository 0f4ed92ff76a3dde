//! Live view synchronization
//!
//! Applies confirmed lifecycle events to canonical instances and keeps every
//! registered view consistent without re-fetching.
//!
//! ## List-sync
//!
//! For each view, after a create or update:
//! 1. Evaluate membership of the mutated record
//! 2. Insert new members at their sorted position (or append)
//! 3. Relocate updated members whose sort position changed
//! 4. Remove records that no longer match
//!
//! A destroy removes the record from every view that holds it.

mod engine;
mod list;

pub use engine::SyncEngine;
