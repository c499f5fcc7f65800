//! Orphan detection.
//!
//! Each detector is a pure function over a resource snapshot, so running it
//! twice over the same snapshot yields the same findings. A resource that
//! matches several detectors produces one finding per detector.

use super::inventory::ResourceFetcher;
use super::lookup_by_prefix;
use super::types::{
    CostImpact, Identified, OrphanCategory, OrphanFinding, ResourceGroupInfo, ResourceKey,
    ResourceKind, ResourceRecord,
};
use crate::azure::AzureApi;
use crate::config::OrphanPolicy;
use crate::error::Result;
use std::collections::HashSet;

/// Resources and groups a detector pass runs over.
#[derive(Debug, Clone, Copy)]
pub struct ResourceSnapshot<'a> {
    pub subscription: &'a str,
    pub resources: &'a [ResourceRecord],
    pub groups: &'a [ResourceGroupInfo],
    /// Resources outside `resources` known to exist in the subscription
    pub known_elsewhere: &'a HashSet<ResourceKey>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Detector {
    UnattachedDisk,
    UnassociatedPublicIp,
    UnusedNsg,
    OrphanedNic,
    UnusedLoadBalancer,
    EmptyResourceGroup,
    StoppedVm,
    OrphanedSnapshot,
}

impl Detector {
    pub const ALL: [Detector; 8] = [
        Detector::UnattachedDisk,
        Detector::UnassociatedPublicIp,
        Detector::UnusedNsg,
        Detector::OrphanedNic,
        Detector::UnusedLoadBalancer,
        Detector::EmptyResourceGroup,
        Detector::StoppedVm,
        Detector::OrphanedSnapshot,
    ];

    pub fn category(&self) -> OrphanCategory {
        match self {
            Detector::UnattachedDisk => OrphanCategory::UnattachedDisk,
            Detector::UnassociatedPublicIp => OrphanCategory::UnassociatedPublicIp,
            Detector::UnusedNsg => OrphanCategory::UnusedNsg,
            Detector::OrphanedNic => OrphanCategory::OrphanedNic,
            Detector::UnusedLoadBalancer => OrphanCategory::UnusedLoadBalancer,
            Detector::EmptyResourceGroup => OrphanCategory::EmptyResourceGroup,
            Detector::StoppedVm => OrphanCategory::StoppedVm,
            Detector::OrphanedSnapshot => OrphanCategory::OrphanedSnapshot,
        }
    }

    /// Kinds a standalone run must fetch for this detector. Empty means all.
    pub fn query_kinds(&self) -> &'static [ResourceKind] {
        match self {
            Detector::UnattachedDisk => &[ResourceKind::Disk],
            Detector::UnassociatedPublicIp => &[ResourceKind::PublicIp],
            Detector::UnusedNsg => &[ResourceKind::NetworkSecurityGroup],
            Detector::OrphanedNic => &[ResourceKind::NetworkInterface],
            Detector::UnusedLoadBalancer => &[ResourceKind::LoadBalancer],
            Detector::EmptyResourceGroup => &[],
            Detector::StoppedVm => &[ResourceKind::VirtualMachine],
            Detector::OrphanedSnapshot => &[
                ResourceKind::Snapshot,
                ResourceKind::Disk,
                ResourceKind::VirtualMachine,
            ],
        }
    }

    pub fn detect(&self, snapshot: &ResourceSnapshot<'_>, policy: &OrphanPolicy) -> Vec<OrphanFinding> {
        match self {
            Detector::UnattachedDisk => of_kind(snapshot, ResourceKind::Disk)
                .filter(|disk| disk.attached_to.is_none())
                .map(|disk| {
                    let size = disk.disk_size_gb.unwrap_or(0);
                    finding(
                        disk,
                        OrphanCategory::UnattachedDisk,
                        disk_impact(size, policy),
                        format!(
                            "{} GB {} disk is not attached to any VM",
                            size,
                            disk.sku.as_deref().unwrap_or("unknown SKU")
                        ),
                    )
                })
                .collect(),

            Detector::UnassociatedPublicIp => of_kind(snapshot, ResourceKind::PublicIp)
                .filter(|ip| ip.attached_to.is_none())
                .map(|ip| {
                    let standard = ip
                        .sku
                        .as_deref()
                        .is_some_and(|sku| sku.eq_ignore_ascii_case("standard"));
                    let impact = if standard { CostImpact::Medium } else { CostImpact::Low };
                    finding(
                        ip,
                        OrphanCategory::UnassociatedPublicIp,
                        impact,
                        format!(
                            "{} public IP has no IP configuration",
                            ip.sku.as_deref().unwrap_or("Basic")
                        ),
                    )
                })
                .collect(),

            Detector::UnusedNsg => of_kind(snapshot, ResourceKind::NetworkSecurityGroup)
                .filter(|nsg| nsg.consumer_count.unwrap_or(0) == 0)
                .map(|nsg| {
                    finding(
                        nsg,
                        OrphanCategory::UnusedNsg,
                        CostImpact::Low,
                        "Not associated with any subnet or network interface".to_string(),
                    )
                })
                .collect(),

            Detector::OrphanedNic => of_kind(snapshot, ResourceKind::NetworkInterface)
                .filter(|nic| nic.attached_to.is_none())
                .map(|nic| {
                    finding(
                        nic,
                        OrphanCategory::OrphanedNic,
                        CostImpact::Low,
                        "Not attached to a virtual machine".to_string(),
                    )
                })
                .collect(),

            Detector::UnusedLoadBalancer => of_kind(snapshot, ResourceKind::LoadBalancer)
                .filter(|lb| lb.consumer_count.unwrap_or(0) == 0)
                .map(|lb| {
                    finding(
                        lb,
                        OrphanCategory::UnusedLoadBalancer,
                        CostImpact::High,
                        "Backend pools have no members".to_string(),
                    )
                })
                .collect(),

            Detector::EmptyResourceGroup => {
                let occupied: HashSet<String> = snapshot
                    .resources
                    .iter()
                    .map(|r| r.resource_group.to_ascii_lowercase())
                    .collect();
                snapshot
                    .groups
                    .iter()
                    .filter(|g| !occupied.contains(&g.name.to_ascii_lowercase()))
                    .map(|g| empty_group_finding(snapshot.subscription, g))
                    .collect()
            }

            Detector::StoppedVm => of_kind(snapshot, ResourceKind::VirtualMachine)
                .filter(|vm| vm.is_stopped())
                .map(|vm| {
                    let size = vm.size.as_deref().unwrap_or_default();
                    let impact = lookup_by_prefix(&policy.vm_family_impact, size)
                        .copied()
                        .unwrap_or(CostImpact::Low);
                    finding(
                        vm,
                        OrphanCategory::StoppedVm,
                        impact,
                        format!(
                            "VM ({}) is {}",
                            if size.is_empty() { "unknown size" } else { size },
                            vm.power_state.as_deref().unwrap_or("stopped")
                        ),
                    )
                })
                .collect(),

            Detector::OrphanedSnapshot => {
                let known: HashSet<ResourceKey> =
                    snapshot.resources.iter().map(Identified::key).collect();
                of_kind(snapshot, ResourceKind::Snapshot)
                    .filter(|snap| {
                        snap.source_id.as_deref().is_none_or(|source| {
                            let key = ResourceKey::new(source);
                            !known.contains(&key) && !snapshot.known_elsewhere.contains(&key)
                        })
                    })
                    .map(|snap| {
                        let size = snap.disk_size_gb.unwrap_or(0);
                        let impact = if size > policy.snapshot_medium_gb {
                            CostImpact::Medium
                        } else {
                            CostImpact::Low
                        };
                        let details = match snap.source_id.as_deref() {
                            Some(source) => format!("Source {} no longer exists", source),
                            None => "Snapshot has no recorded source".to_string(),
                        };
                        finding(snap, OrphanCategory::OrphanedSnapshot, impact, details)
                    })
                    .collect()
            }
        }
    }
}

fn of_kind<'s>(
    snapshot: &ResourceSnapshot<'s>,
    kind: ResourceKind,
) -> impl Iterator<Item = &'s ResourceRecord> {
    snapshot.resources.iter().filter(move |r| r.kind() == kind)
}

pub fn disk_impact(size_gb: u64, policy: &OrphanPolicy) -> CostImpact {
    if size_gb > policy.disk_high_gb {
        CostImpact::High
    } else if size_gb > policy.disk_medium_gb {
        CostImpact::Medium
    } else {
        CostImpact::Low
    }
}

fn finding(
    resource: &ResourceRecord,
    category: OrphanCategory,
    cost_impact: CostImpact,
    details: String,
) -> OrphanFinding {
    OrphanFinding {
        resource_id: resource.resource_id.clone(),
        subscription_id: resource.subscription_id.clone(),
        resource_group: resource.resource_group.clone(),
        name: resource.name.clone(),
        resource_type: resource.resource_type.clone(),
        location: resource.location.clone(),
        category,
        cost_impact,
        sku: resource.sku.clone(),
        size_gb: resource.disk_size_gb,
        created_at: resource.created_at,
        details,
        tags: resource.tags.clone(),
    }
}

fn empty_group_finding(subscription: &str, group: &ResourceGroupInfo) -> OrphanFinding {
    OrphanFinding {
        resource_id: format!("/subscriptions/{}/resourceGroups/{}", subscription, group.name),
        subscription_id: subscription.to_string(),
        resource_group: group.name.clone(),
        name: group.name.clone(),
        resource_type: "microsoft.resources/resourcegroups".to_string(),
        location: group.location.clone(),
        category: OrphanCategory::EmptyResourceGroup,
        cost_impact: CostImpact::Low,
        sku: None,
        size_gb: None,
        created_at: None,
        details: "Resource group contains no resources (informational)".to_string(),
        tags: group.tags.clone(),
    }
}

/// Snapshot sources that are not among `resources`.
pub fn unresolved_sources(resources: &[ResourceRecord]) -> Vec<String> {
    let known: HashSet<ResourceKey> = resources.iter().map(Identified::key).collect();
    let mut sources: Vec<String> = resources
        .iter()
        .filter(|r| r.kind() == ResourceKind::Snapshot)
        .filter_map(|r| r.source_id.clone())
        .filter(|source| !known.contains(&ResourceKey::new(source)))
        .collect();
    sources.sort();
    sources.dedup();
    sources
}

/// Look up snapshot sources that a group-filtered scan could not see. An
/// unfiltered scan already covers the subscription. When the lookup fails
/// every unresolved source is assumed to exist, so no snapshot is flagged
/// on partial data, and the error is returned alongside.
async fn sources_outside_scope(
    api: &dyn AzureApi,
    subscription: &str,
    resource_groups: &[String],
    resources: &[ResourceRecord],
) -> (HashSet<ResourceKey>, Option<String>) {
    if resource_groups.is_empty() {
        return (HashSet::new(), None);
    }
    let unresolved = unresolved_sources(resources);
    match ResourceFetcher::new(api)
        .existing_ids(subscription, &unresolved)
        .await
    {
        Ok(found) => {
            log::debug!(
                "{} of {} snapshot source(s) found outside the scanned groups",
                found.len(),
                unresolved.len()
            );
            (found, None)
        }
        Err(err) => {
            log::warn!("Snapshot source lookup failed: {}", err);
            let assumed = unresolved.iter().map(|id| ResourceKey::new(id)).collect();
            (assumed, Some(err.to_string()))
        }
    }
}

/// Run every detector over one snapshot.
pub fn detect_all(snapshot: &ResourceSnapshot<'_>, policy: &OrphanPolicy) -> Vec<OrphanFinding> {
    let mut findings: Vec<OrphanFinding> = Detector::ALL
        .iter()
        .flat_map(|d| d.detect(snapshot, policy))
        .collect();
    sort_findings(&mut findings);
    findings
}

fn sort_findings(findings: &mut [OrphanFinding]) {
    findings.sort_by(|a, b| {
        a.category
            .cmp(&b.category)
            .then_with(|| a.name.to_ascii_lowercase().cmp(&b.name.to_ascii_lowercase()))
            .then_with(|| a.resource_id.cmp(&b.resource_id))
    });
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrphanOutcome {
    pub findings: Vec<OrphanFinding>,
    /// Detectors that could not run, with the reason
    pub failed_detectors: Vec<(Detector, String)>,
}

impl OrphanOutcome {
    pub fn degraded(&self) -> Option<String> {
        if self.failed_detectors.is_empty() {
            return None;
        }
        let names: Vec<&str> = self
            .failed_detectors
            .iter()
            .map(|(d, _)| d.category().as_str())
            .collect();
        Some(format!("detectors failed: {}", names.join(", ")))
    }
}

pub struct OrphanDetector<'a> {
    policy: &'a OrphanPolicy,
}

impl<'a> OrphanDetector<'a> {
    pub fn new(policy: &'a OrphanPolicy) -> Self {
        Self { policy }
    }

    /// Detect over an already fetched inventory of `resource_groups`.
    pub async fn run(
        &self,
        api: &dyn AzureApi,
        subscription: &str,
        resource_groups: &[String],
        resources: &[ResourceRecord],
        groups: &[ResourceGroupInfo],
    ) -> OrphanOutcome {
        let (known_elsewhere, lookup_error) =
            sources_outside_scope(api, subscription, resource_groups, resources).await;
        let snapshot = ResourceSnapshot {
            subscription,
            resources,
            groups,
            known_elsewhere: &known_elsewhere,
        };
        let findings = detect_all(&snapshot, self.policy);
        log::info!("Orphan detection: {} findings", findings.len());
        OrphanOutcome {
            findings,
            failed_detectors: lookup_error
                .map(|err| (Detector::OrphanedSnapshot, err))
                .into_iter()
                .collect(),
        }
    }

    /// Fetch per detector and detect. A detector whose query fails is
    /// reported and contributes no findings.
    pub async fn run_standalone(
        &self,
        api: &dyn AzureApi,
        subscription: &str,
        resource_groups: &[String],
        groups: &[ResourceGroupInfo],
    ) -> Result<OrphanOutcome> {
        let fetcher = ResourceFetcher::new(api);
        let mut findings = Vec::new();
        let mut failed_detectors = Vec::new();

        for detector in Detector::ALL {
            match fetcher
                .fetch_resources(subscription, resource_groups, detector.query_kinds())
                .await
            {
                Ok(resources) => {
                    let (known_elsewhere, lookup_error) =
                        if detector == Detector::OrphanedSnapshot {
                            sources_outside_scope(api, subscription, resource_groups, &resources)
                                .await
                        } else {
                            (HashSet::new(), None)
                        };
                    if let Some(err) = lookup_error {
                        failed_detectors.push((detector, err));
                    }
                    let snapshot = ResourceSnapshot {
                        subscription,
                        resources: &resources,
                        groups,
                        known_elsewhere: &known_elsewhere,
                    };
                    findings.extend(detector.detect(&snapshot, self.policy));
                }
                Err(err) => {
                    log::warn!("{} detector failed: {}", detector.category(), err);
                    failed_detectors.push((detector, err.to_string()));
                }
            }
        }

        sort_findings(&mut findings);
        log::info!("Orphan detection: {} findings", findings.len());
        Ok(OrphanOutcome {
            findings,
            failed_detectors,
        })
    }
}
