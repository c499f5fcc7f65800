//! The audit pipeline.
//!
//! Inventory is fetched first, then cost, orphan and activity analysis run
//! concurrently over it, then the cleanup engine joins their outputs into
//! ranked recommendations. Every stage is usable on its own as well.

pub mod activity;
pub mod cleanup;
pub mod cost;
pub mod inventory;
pub mod orchestrator;
pub mod orphans;
pub mod script;
pub mod summary;
pub mod types;

pub use activity::{ActivityOutcome, ActivityTracker};
pub use cleanup::{CleanupEngine, CleanupInputs, CleanupOptions, CleanupOutcome, CleanupState};
pub use cost::{CostAnalyzer, CostOutcome, TimePeriod};
pub use inventory::{InventoryRequest, ResourceFetcher};
pub use orchestrator::{AuditOptions, Orchestrator};
pub use orphans::{Detector, OrphanDetector, OrphanOutcome};
pub use summary::{ModuleName, ModuleReport, ModuleStatus, RunSummary};

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Run id embedded in every output file name (`YYYYMMDD-HHMMSS`, UTC).
pub fn new_run_id(now: DateTime<Utc>) -> String {
    now.format("%Y%m%d-%H%M%S").to_string()
}

/// Value of the longest key that prefixes `value`, ignoring case.
pub(crate) fn lookup_by_prefix<'a, V>(table: &'a BTreeMap<String, V>, value: &str) -> Option<&'a V> {
    let value = value.to_ascii_lowercase();
    table
        .iter()
        .filter(|(prefix, _)| value.starts_with(&prefix.to_ascii_lowercase()))
        .max_by_key(|(prefix, _)| prefix.len())
        .map(|(_, v)| v)
}
