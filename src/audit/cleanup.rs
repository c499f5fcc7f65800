//! Cleanup recommendation engine.
//!
//! Runs as a fixed sequence of states:
//! `Idle -> CollectingInputs -> Scoring -> Sorted -> [SafetyTagging] -> ScriptEmitted -> Done`.
//! Missing inputs are treated as empty. The engine never deletes anything;
//! its only side effect on Azure is optional safety tagging, which skips
//! high-risk recommendations.

use super::cost::flag_for;
use super::script;
use super::types::{
    ArmId, CostImpact, Identified, OrphanCategory, OrphanFinding, Priority, Recommendation,
    RecommendationCategory, ResourceCost, ResourceHistory, ResourceKey, ResourceRecord, RiskLevel,
    SavingsRange, Tags,
};
use crate::azure::AzureApi;
use crate::common::report::{self, OutputFile, Report, ReportWriter};
use crate::config::{CleanupPolicy, CostPolicy, ReportFormat};
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CleanupState {
    Idle,
    CollectingInputs,
    Scoring,
    Sorted,
    SafetyTagging,
    ScriptEmitted,
    Done,
}

/// Upstream outputs the engine joins. Any of them may be empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleanupInputs {
    /// `None` when no inventory was available; every recommendation is then unverified
    pub inventory: Option<Vec<ResourceRecord>>,
    pub orphans: Vec<OrphanFinding>,
    pub costs: Vec<ResourceCost>,
    pub histories: Vec<ResourceHistory>,
}

impl CleanupInputs {
    /// Load a previous run's reports from `dir`. Absent or unreadable files
    /// are logged and treated as empty.
    pub fn load(dir: &Path, run_id: &str) -> Self {
        Self {
            inventory: load_report(dir, run_id),
            orphans: load_report(dir, run_id).unwrap_or_default(),
            costs: load_report(dir, run_id).unwrap_or_default(),
            histories: load_report(dir, run_id).unwrap_or_default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inventory.as_ref().is_none_or(Vec::is_empty)
            && self.orphans.is_empty()
            && self.costs.is_empty()
            && self.histories.is_empty()
    }
}

fn load_report<T: Report>(dir: &Path, run_id: &str) -> Option<Vec<T>> {
    let candidates = [ReportFormat::Csv, ReportFormat::Json]
        .map(|format| report::report_path(dir, T::NAME, run_id, format));
    let Some(path) = candidates.iter().find(|p| p.exists()) else {
        log::warn!("No {} report for run {} in {}", T::NAME, run_id, dir.display());
        return None;
    };
    match report::read_report::<T>(path) {
        Ok(records) => {
            log::debug!("Loaded {} {} records", records.len(), T::NAME);
            Some(records)
        }
        Err(err) => {
            log::warn!("Ignoring unreadable report {}: {}", path.display(), err);
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupOptions {
    /// Explicit opt-in for safety tagging
    pub auto_tag: bool,
    pub dry_run: bool,
    pub now: DateTime<Utc>,
}

/// Where the engine writes its outputs.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanupTargets {
    pub recommendations: PathBuf,
    pub format: ReportFormat,
    pub script: PathBuf,
    pub run_id: String,
}

impl CleanupTargets {
    pub fn for_writer(writer: &ReportWriter) -> Self {
        Self {
            recommendations: writer.path_for::<Recommendation>(),
            format: writer.format(),
            script: writer.artifact_path("cleanup-script", "sh"),
            run_id: writer.run_id().to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TaggingReport {
    pub tagged: Vec<String>,
    pub skipped_high_risk: usize,
    /// Resource id and error for each failed tag update
    pub failures: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CleanupOutcome {
    pub recommendations: Vec<Recommendation>,
    /// `None` when tagging was not requested or not allowed
    pub tagging: Option<TaggingReport>,
    pub report: OutputFile,
    pub script: PathBuf,
}

impl CleanupOutcome {
    pub fn degraded(&self) -> Option<String> {
        self.tagging
            .as_ref()
            .filter(|t| !t.failures.is_empty())
            .map(|t| format!("{} tag update(s) failed", t.failures.len()))
    }
}

pub struct CleanupEngine<'a> {
    policy: &'a CleanupPolicy,
    cost_policy: &'a CostPolicy,
    state: CleanupState,
}

impl<'a> CleanupEngine<'a> {
    pub fn new(policy: &'a CleanupPolicy, cost_policy: &'a CostPolicy) -> Self {
        Self {
            policy,
            cost_policy,
            state: CleanupState::Idle,
        }
    }

    pub fn state(&self) -> CleanupState {
        self.state
    }

    fn advance(&mut self, next: CleanupState) {
        log::debug!("Cleanup engine: {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Whether this run may tag resources.
    pub fn tagging_allowed(&self, options: &CleanupOptions) -> bool {
        self.policy.tagging_enabled && options.auto_tag && !options.dry_run
    }

    pub async fn run(
        &mut self,
        api: Option<&dyn AzureApi>,
        inputs: CleanupInputs,
        options: &CleanupOptions,
        targets: &CleanupTargets,
    ) -> Result<CleanupOutcome> {
        self.advance(CleanupState::CollectingInputs);
        if inputs.is_empty() {
            log::warn!("Cleanup engine has no inputs; recommendations will be empty");
        }

        self.advance(CleanupState::Scoring);
        let mut recommendations = score(&inputs, self.policy, self.cost_policy, options.now);

        self.advance(CleanupState::Sorted);
        sort_recommendations(&mut recommendations);
        let report =
            report::write_report_to(&targets.recommendations, targets.format, &recommendations)?;

        let tagging = match api {
            Some(api) if self.tagging_allowed(options) => {
                self.advance(CleanupState::SafetyTagging);
                Some(self.apply_safety_tags(api, &recommendations, options.now).await)
            }
            _ => {
                if options.auto_tag {
                    log::info!("Safety tagging skipped (dry run or disabled in configuration)");
                }
                None
            }
        };

        script::write_script(&targets.script, &recommendations, &targets.run_id)?;
        self.advance(CleanupState::ScriptEmitted);

        self.advance(CleanupState::Done);
        log::info!("Cleanup engine: {} recommendations", recommendations.len());
        Ok(CleanupOutcome {
            recommendations,
            tagging,
            report,
            script: targets.script.clone(),
        })
    }

    async fn apply_safety_tags(
        &self,
        api: &dyn AzureApi,
        recommendations: &[Recommendation],
        now: DateTime<Utc>,
    ) -> TaggingReport {
        let mut tags = Tags::new();
        tags.insert(self.policy.candidate_tag_key.as_str(), "true");
        tags.insert(
            self.policy.date_tag_key.as_str(),
            now.format("%Y-%m-%d").to_string(),
        );

        let mut report = TaggingReport {
            skipped_high_risk: high_risk_resources(recommendations).len(),
            ..TaggingReport::default()
        };
        for rec in tagging_candidates(recommendations) {
            match api.merge_tags(&rec.resource_id, &tags).await {
                Ok(()) => {
                    log::info!("Tagged {} for review", rec.resource_id);
                    report.tagged.push(rec.resource_id.clone());
                }
                Err(err) => {
                    log::warn!("Could not tag {}: {}", rec.resource_id, err);
                    report.failures.push((rec.resource_id.clone(), err.to_string()));
                }
            }
        }
        report
    }
}

/// Resources with at least one High-risk recommendation.
fn high_risk_resources(recommendations: &[Recommendation]) -> HashSet<ResourceKey> {
    recommendations
        .iter()
        .filter(|r| r.risk == RiskLevel::High)
        .map(|r| r.key())
        .collect()
}

/// Resources eligible for safety tagging, each once. A resource is excluded
/// entirely when any of its recommendations is High risk.
pub fn tagging_candidates(recommendations: &[Recommendation]) -> Vec<&Recommendation> {
    let high_risk = high_risk_resources(recommendations);
    let mut seen = HashSet::new();
    recommendations
        .iter()
        .filter(|r| r.verified && !high_risk.contains(&r.key()))
        .filter(|r| seen.insert(r.key()))
        .collect()
}

/// Score every input into recommendations, deduplicated by resource and category.
pub fn score(
    inputs: &CleanupInputs,
    policy: &CleanupPolicy,
    cost_policy: &CostPolicy,
    now: DateTime<Utc>,
) -> Vec<Recommendation> {
    let inventory: Option<HashMap<ResourceKey, &ResourceRecord>> = inputs
        .inventory
        .as_ref()
        .map(|resources| resources.iter().map(|r| (r.key(), r)).collect());
    let costs: HashMap<ResourceKey, &ResourceCost> =
        inputs.costs.iter().map(|c| (c.key(), c)).collect();
    let histories: HashMap<ResourceKey, &ResourceHistory> =
        inputs.histories.iter().map(|h| (h.key(), h)).collect();

    let verified = |finding: &OrphanFinding| -> bool {
        let Some(inventory) = &inventory else {
            return false;
        };
        if finding.category == OrphanCategory::EmptyResourceGroup {
            return !inventory
                .values()
                .any(|r| r.resource_group.eq_ignore_ascii_case(&finding.resource_group));
        }
        inventory.contains_key(&finding.key())
    };

    let mut recommendations: Vec<Recommendation> = inputs
        .orphans
        .iter()
        .map(|f| score_finding(f, costs.get(&f.key()).copied(), verified(f), policy))
        .collect();

    recommendations.extend(
        inputs
            .costs
            .iter()
            .map(|c| (c, flag_for(c.total_cost, cost_policy)))
            .filter(|(_, flag)| *flag >= CostImpact::Medium)
            .map(|(c, flag)| {
                let resource = inventory.as_ref().and_then(|inv| inv.get(&c.key()).copied());
                score_cost(c, flag, resource)
            }),
    );

    if let Some(resources) = &inputs.inventory {
        recommendations.extend(resources.iter().filter_map(|r| {
            let age = r.age_days(now)?;
            (age > policy.aged_resource_days).then(|| {
                score_aged(r, age, costs.get(&r.key()).copied(), histories.get(&r.key()).copied())
            })
        }));
    }

    for rec in &mut recommendations {
        if rec.kind().is_stateful_service() {
            rec.risk = rec.risk.max(RiskLevel::Medium);
        }
    }

    dedup_recommendations(recommendations)
}

fn savings_for(cost: Option<&ResourceCost>, fallback: SavingsRange) -> SavingsRange {
    match cost {
        Some(c) if c.total_cost > 0.0 => SavingsRange::from_monthly(c.total_cost),
        _ => fallback,
    }
}

fn score_finding(
    finding: &OrphanFinding,
    cost: Option<&ResourceCost>,
    verified: bool,
    policy: &CleanupPolicy,
) -> Recommendation {
    let strs = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();

    let (risk, action, safety_checks) = match finding.category {
        OrphanCategory::UnattachedDisk
            if finding.size_gb.unwrap_or(0) >= policy.snapshot_before_delete_min_gb =>
        {
            (
                RiskLevel::Medium,
                "Create snapshot then delete disk",
                strs(&[
                    "Confirm no workload still needs the disk",
                    "Create a snapshot before deletion",
                    "Verify the snapshot completed",
                ]),
            )
        }
        OrphanCategory::UnattachedDisk => (
            RiskLevel::Low,
            "Delete disk",
            strs(&["Confirm no workload still needs the disk"]),
        ),
        OrphanCategory::UnassociatedPublicIp => (
            RiskLevel::Low,
            "Delete public IP",
            strs(&[
                "Confirm the address is not referenced in DNS",
                "Confirm the address is not allow-listed by partners",
            ]),
        ),
        OrphanCategory::UnusedNsg => (
            RiskLevel::Low,
            "Delete network security group",
            strs(&["Confirm the NSG is not referenced by deployment templates"]),
        ),
        OrphanCategory::OrphanedNic => (
            RiskLevel::Low,
            "Delete network interface",
            strs(&["Confirm the NIC is not reserved for a pending VM"]),
        ),
        OrphanCategory::UnusedLoadBalancer => (
            RiskLevel::Medium,
            "Delete load balancer",
            strs(&[
                "Confirm no backend members are planned",
                "Check frontend IP dependencies",
            ]),
        ),
        OrphanCategory::EmptyResourceGroup => (
            RiskLevel::Low,
            "Delete empty resource group",
            strs(&[
                "Confirm no deployments target this group",
                "Check for resource locks",
            ]),
        ),
        OrphanCategory::OrphanedSnapshot => (
            RiskLevel::Low,
            "Delete snapshot",
            strs(&[
                "Confirm the snapshot is not a required backup",
                "Check retention policies",
            ]),
        ),
        OrphanCategory::StoppedVm => (
            RiskLevel::High,
            "Review with owner, then delete or deallocate VM",
            strs(&[
                "Confirm with the resource owner",
                "Back up OS and data disks",
                "Check reserved instance coverage",
            ]),
        ),
    };

    let (priority, estimated_savings) = match finding.category {
        OrphanCategory::EmptyResourceGroup => (Priority::Low, SavingsRange::None),
        _ => (
            Priority::from_impact(finding.cost_impact),
            savings_for(cost, SavingsRange::from_impact(finding.cost_impact)),
        ),
    };

    Recommendation {
        priority,
        resource_id: finding.resource_id.clone(),
        subscription_id: finding.subscription_id.clone(),
        resource_group: finding.resource_group.clone(),
        name: finding.name.clone(),
        resource_type: finding.resource_type.clone(),
        category: finding.category.into(),
        estimated_savings,
        risk,
        safety_checks,
        action: action.to_string(),
        verified,
        details: finding.details.clone(),
        tags: finding.tags.clone(),
    }
}

/// Cost flags are recomputed against the current thresholds, so reports
/// from an earlier run are scored consistently.
fn score_cost(
    cost: &ResourceCost,
    flag: CostImpact,
    resource: Option<&ResourceRecord>,
) -> Recommendation {
    let priority = match flag {
        CostImpact::High => Priority::Moderate,
        _ => Priority::Low,
    };
    let subscription_id = resource
        .map(|r| r.subscription_id.clone())
        .or_else(|| ArmId::parse(&cost.resource_id).map(|p| p.subscription_id))
        .unwrap_or_default();

    Recommendation {
        priority,
        resource_id: cost.resource_id.clone(),
        subscription_id,
        resource_group: cost.resource_group.clone(),
        name: cost.name.clone(),
        resource_type: cost.resource_type.clone(),
        category: RecommendationCategory::HighCost,
        estimated_savings: SavingsRange::from_monthly(cost.total_cost),
        risk: RiskLevel::Low,
        safety_checks: vec![
            "Review utilisation metrics".to_string(),
            "Confirm the business owner".to_string(),
        ],
        action: "Review sizing, rightsize or reserve capacity".to_string(),
        verified: resource.is_some(),
        details: format!(
            "{:.2} {} over the reporting window ({:?})",
            cost.total_cost, cost.currency, cost.source
        ),
        tags: resource.map(|r| r.tags.clone()).unwrap_or_default(),
    }
}

fn score_aged(
    resource: &ResourceRecord,
    age_days: i64,
    cost: Option<&ResourceCost>,
    history: Option<&ResourceHistory>,
) -> Recommendation {
    let mut details = format!("Created {} days ago", age_days);
    if let Some(history) = history {
        details.push_str(&format!(" by {}", history.created_by));
    }

    Recommendation {
        priority: Priority::Low,
        resource_id: resource.resource_id.clone(),
        subscription_id: resource.subscription_id.clone(),
        resource_group: resource.resource_group.clone(),
        name: resource.name.clone(),
        resource_type: resource.resource_type.clone(),
        category: RecommendationCategory::AgedResource,
        estimated_savings: savings_for(cost, SavingsRange::None),
        risk: RiskLevel::Low,
        safety_checks: vec!["Confirm with the resource owner that it is still needed".to_string()],
        action: "Review whether the resource is still required".to_string(),
        verified: true,
        details,
        tags: resource.tags.clone(),
    }
}

/// Keep one recommendation per (resource, category): the most urgent, then
/// the largest savings, then the first seen. Order of first appearance is kept.
pub fn dedup_recommendations(recommendations: Vec<Recommendation>) -> Vec<Recommendation> {
    let mut index: HashMap<(ResourceKey, RecommendationCategory), usize> = HashMap::new();
    let mut out: Vec<Recommendation> = Vec::with_capacity(recommendations.len());
    for rec in recommendations {
        let key = (rec.key(), rec.category);
        match index.get(&key) {
            Some(&i) => {
                let kept = &out[i];
                if (rec.priority, std::cmp::Reverse(rec.estimated_savings))
                    < (kept.priority, std::cmp::Reverse(kept.estimated_savings))
                {
                    out[i] = rec;
                }
            }
            None => {
                index.insert(key, out.len());
                out.push(rec);
            }
        }
    }
    out
}

/// Stable sort: priority ascending, then estimated savings descending.
pub fn sort_recommendations(recommendations: &mut [Recommendation]) {
    recommendations.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then_with(|| b.estimated_savings.cmp(&a.estimated_savings))
    });
}
