use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::audit::types::CostImpact;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub audit: AuditSettings,
    pub retry: RetryConfig,
    pub cost: CostPolicy,
    pub orphans: OrphanPolicy,
    pub activity: ActivityPolicy,
    pub cleanup: CleanupPolicy,
}

/// Pipeline-wide settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditSettings {
    pub output_dir: PathBuf,
    pub format: ReportFormat,
    pub parallel_jobs: usize,
    /// Upper bound on a single analysis module's runtime
    pub module_timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Csv,
    Json,
}

impl ReportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ReportFormat::Csv => "csv",
            ReportFormat::Json => "json",
        }
    }
}

/// Retry behaviour applied to every Azure call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub delay_ms: u64,
    pub backoff: BackoffKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Fixed,
    Incremental,
    Exponential,
}

/// Cost thresholds and the fallback estimate tables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CostPolicy {
    /// Aggregate cost above which a resource is flagged High
    pub high_threshold: f64,
    /// Aggregate cost above which a resource is flagged Medium
    pub medium_threshold: f64,
    pub currency: String,
    /// Monthly estimate keyed by VM size prefix (e.g. "Standard_D")
    pub vm_monthly_estimates: BTreeMap<String, f64>,
    pub vm_default_estimate: f64,
    /// Monthly estimate keyed by storage account SKU
    pub storage_monthly_estimates: BTreeMap<String, f64>,
    pub storage_default_estimate: f64,
}

/// Orphan detector thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrphanPolicy {
    pub disk_high_gb: u64,
    pub disk_medium_gb: u64,
    pub snapshot_medium_gb: u64,
    /// Cost impact keyed by VM size family prefix (e.g. "Standard_D")
    pub vm_family_impact: BTreeMap<String, CostImpact>,
}

/// Activity log window settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityPolicy {
    pub default_days: u32,
    /// Provider retention ceiling
    pub max_days: u32,
    pub max_events: u32,
}

/// Recommendation engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupPolicy {
    pub aged_resource_days: i64,
    /// Disks at or above this size get a snapshot step before deletion
    pub snapshot_before_delete_min_gb: u64,
    /// Master switch for safety tagging; the CLI flag must also be set
    pub tagging_enabled: bool,
    pub candidate_tag_key: String,
    pub date_tag_key: String,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./audit-reports"),
            format: ReportFormat::Csv,
            parallel_jobs: 3,
            module_timeout_secs: 900,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 2000,
            backoff: BackoffKind::Fixed,
        }
    }
}

impl Default for CostPolicy {
    fn default() -> Self {
        Self {
            high_threshold: 1000.0,
            medium_threshold: 100.0,
            currency: "USD".to_string(),
            vm_monthly_estimates: BTreeMap::from([
                ("Standard_B".to_string(), 30.0),
                ("Standard_D".to_string(), 140.0),
                ("Standard_E".to_string(), 180.0),
                ("Standard_F".to_string(), 120.0),
                ("Standard_M".to_string(), 900.0),
                ("Standard_N".to_string(), 650.0),
            ]),
            vm_default_estimate: 100.0,
            storage_monthly_estimates: BTreeMap::from([
                ("Standard_LRS".to_string(), 20.0),
                ("Standard_GRS".to_string(), 40.0),
                ("Standard_RAGRS".to_string(), 50.0),
                ("Standard_ZRS".to_string(), 25.0),
                ("Premium_LRS".to_string(), 60.0),
            ]),
            storage_default_estimate: 25.0,
        }
    }
}

impl Default for OrphanPolicy {
    fn default() -> Self {
        Self {
            disk_high_gb: 512,
            disk_medium_gb: 128,
            snapshot_medium_gb: 100,
            vm_family_impact: BTreeMap::from([
                ("Standard_D".to_string(), CostImpact::High),
                ("Standard_B".to_string(), CostImpact::Medium),
            ]),
        }
    }
}

impl Default for ActivityPolicy {
    fn default() -> Self {
        Self {
            default_days: 90,
            max_days: 90,
            max_events: 5000,
        }
    }
}

impl Default for CleanupPolicy {
    fn default() -> Self {
        Self {
            aged_resource_days: 365,
            snapshot_before_delete_min_gb: 128,
            tagging_enabled: true,
            candidate_tag_key: "audit-candidate".to_string(),
            date_tag_key: "audit-date".to_string(),
        }
    }
}
