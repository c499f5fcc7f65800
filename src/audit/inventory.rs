//! Resource Fetcher.
//!
//! Validates the requested scope, queries the resource graph, and normalizes
//! each row into a [`ResourceRecord`]. The fetch is all-or-nothing: any
//! transport failure fails the whole inventory.

use super::types::{
    Inventory, ResourceGroupInfo, ResourceKey, ResourceKind, ResourceRecord, SubscriptionInfo,
    Tags,
};
use crate::azure::{AzureApi, ResourceQuery};
use crate::error::{AuditError, Result, TransportError};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};
use std::sync::LazyLock;

static SUBSCRIPTION_ID_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
        .unwrap()
});

static RESOURCE_GROUP_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[-\w._()]{1,90}$").unwrap());

/// Scope of one inventory fetch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InventoryRequest {
    pub subscription: String,
    /// Allow-list; empty means the whole subscription
    pub resource_groups: Vec<String>,
}

impl InventoryRequest {
    pub fn new(subscription: impl Into<String>, resource_groups: Vec<String>) -> Self {
        Self {
            subscription: subscription.into(),
            resource_groups,
        }
    }

    /// Format checks that need no network access.
    pub fn validate(&self) -> Result<()> {
        validate_subscription_id(&self.subscription)?;
        for group in &self.resource_groups {
            validate_resource_group_name(group)?;
        }
        Ok(())
    }
}

pub fn validate_subscription_id(subscription: &str) -> Result<()> {
    if SUBSCRIPTION_ID_REGEX.is_match(subscription.trim()) {
        Ok(())
    } else {
        Err(AuditError::validation(format!(
            "invalid subscription id '{}': expected a GUID",
            subscription
        )))
    }
}

pub fn validate_resource_group_name(name: &str) -> Result<()> {
    if RESOURCE_GROUP_REGEX.is_match(name) && !name.ends_with('.') {
        Ok(())
    } else {
        Err(AuditError::validation(format!(
            "invalid resource group name '{}'",
            name
        )))
    }
}

/// Split a `--resource-groups` value into unique, trimmed names.
pub fn parse_resource_groups(value: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    value
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .filter(|name| seen.insert(name.to_ascii_lowercase()))
        .map(str::to_string)
        .collect()
}

pub struct ResourceFetcher<'a> {
    api: &'a dyn AzureApi,
}

impl<'a> ResourceFetcher<'a> {
    pub fn new(api: &'a dyn AzureApi) -> Self {
        Self { api }
    }

    /// Resolve the subscription and the resource group allow-list.
    ///
    /// Unknown groups fail validation before any resource query is issued.
    pub async fn resolve_scope(
        &self,
        request: &InventoryRequest,
    ) -> Result<(SubscriptionInfo, Vec<ResourceGroupInfo>)> {
        request.validate()?;

        let subscription = self
            .api
            .show_subscription(&request.subscription)
            .await
            .map_err(|e| match e {
                TransportError::NotFound(msg) => AuditError::Auth(format!(
                    "subscription {} is not accessible: {}",
                    request.subscription, msg
                )),
                other => other.into(),
            })?;
        if !subscription.is_enabled() {
            return Err(AuditError::Auth(format!(
                "subscription {} is not enabled (state: {})",
                request.subscription, subscription.state
            )));
        }

        let groups = self.api.list_resource_groups(&request.subscription).await?;
        let groups = select_groups(groups, &request.resource_groups)?;
        Ok((subscription, groups))
    }

    /// Fetch the complete inventory for the requested scope.
    pub async fn fetch(&self, request: &InventoryRequest) -> Result<Inventory> {
        let (subscription, resource_groups) = self.resolve_scope(request).await?;
        let resources = self
            .fetch_resources(&request.subscription, &request.resource_groups, &[])
            .await?;

        log::info!(
            "Inventory: {} resources across {} resource groups",
            resources.len(),
            resource_groups.len()
        );
        Ok(Inventory {
            subscription,
            resource_groups,
            resources,
        })
    }

    /// Query and normalize resources, sorted by name for stable reports.
    pub async fn fetch_resources(
        &self,
        subscription: &str,
        resource_groups: &[String],
        kinds: &[ResourceKind],
    ) -> Result<Vec<ResourceRecord>> {
        let query = ResourceQuery::subscription(subscription)
            .with_groups(resource_groups)
            .with_kinds(kinds);
        let rows = self.api.query_resources(&query).await?;

        let mut resources: Vec<ResourceRecord> = rows
            .iter()
            .filter_map(|row| {
                let record = normalize_resource(row);
                if record.is_none() {
                    log::warn!("Skipping resource graph row without an id: {}", row);
                }
                record
            })
            .collect();
        sort_resources(&mut resources);
        Ok(resources)
    }

    /// Which of `ids` exist anywhere in the subscription, regardless of group.
    pub async fn existing_ids(
        &self,
        subscription: &str,
        ids: &[String],
    ) -> Result<HashSet<ResourceKey>> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }
        let query = ResourceQuery::subscription(subscription).with_ids(ids);
        let rows = self.api.query_resources(&query).await?;
        Ok(rows
            .iter()
            .filter_map(|row| row["id"].as_str())
            .map(ResourceKey::new)
            .collect())
    }
}

/// Keep the requested groups, failing on any that do not exist.
fn select_groups(
    available: Vec<ResourceGroupInfo>,
    requested: &[String],
) -> Result<Vec<ResourceGroupInfo>> {
    if requested.is_empty() {
        return Ok(available);
    }

    let unknown: Vec<&str> = requested
        .iter()
        .filter(|name| !available.iter().any(|g| g.name.eq_ignore_ascii_case(name)))
        .map(String::as_str)
        .collect();
    if !unknown.is_empty() {
        return Err(AuditError::validation(format!(
            "resource group(s) not found in subscription: {}",
            unknown.join(", ")
        )));
    }

    Ok(available
        .into_iter()
        .filter(|g| requested.iter().any(|r| r.eq_ignore_ascii_case(&g.name)))
        .collect())
}

pub fn sort_resources(resources: &mut [ResourceRecord]) {
    resources.sort_by(|a, b| {
        a.name
            .to_ascii_lowercase()
            .cmp(&b.name.to_ascii_lowercase())
            .then_with(|| a.resource_id.cmp(&b.resource_id))
    });
}

/// Normalize one resource graph row. Rows without an id are rejected.
pub fn normalize_resource(row: &Value) -> Option<ResourceRecord> {
    let resource_id = non_empty(&row["id"])?;
    let resource_type = row["type"].as_str().unwrap_or_default().to_ascii_lowercase();
    let kind = ResourceKind::from_arm_type(&resource_type);
    let props = &row["properties"];

    let created_at = ["timeCreated", "creationTime", "createdTime"]
        .iter()
        .find_map(|key| parse_time(&props[*key]));

    let power_state = match kind {
        ResourceKind::VirtualMachine => {
            let state = &props["extended"]["instanceView"]["powerState"];
            non_empty(&state["code"]).or_else(|| non_empty(&state["displayStatus"]))
        }
        _ => None,
    };

    let size = match kind {
        ResourceKind::VirtualMachine => non_empty(&props["hardwareProfile"]["vmSize"]),
        _ => None,
    };

    let disk_size_gb = match kind {
        ResourceKind::Disk | ResourceKind::Snapshot => props["diskSizeGB"].as_u64(),
        _ => None,
    };

    let attached_to = match kind {
        ResourceKind::Disk => non_empty(&row["managedBy"])
            .or_else(|| non_empty(&props["managedBy"]))
            .or_else(|| {
                let state = props["diskState"].as_str().unwrap_or_default();
                state
                    .eq_ignore_ascii_case("attached")
                    .then(|| "(attached)".to_string())
            }),
        ResourceKind::PublicIp => non_empty(&props["ipConfiguration"]["id"])
            .or_else(|| non_empty(&props["natGateway"]["id"])),
        ResourceKind::NetworkInterface => non_empty(&props["virtualMachine"]["id"])
            .or_else(|| non_empty(&props["privateEndpoint"]["id"])),
        _ => None,
    };

    let consumer_count = match kind {
        ResourceKind::NetworkSecurityGroup => {
            Some(array_len(&props["networkInterfaces"]) + array_len(&props["subnets"]))
        }
        ResourceKind::LoadBalancer => Some(
            props["backendAddressPools"]
                .as_array()
                .map(|pools| {
                    pools
                        .iter()
                        .map(|pool| {
                            let pool_props = &pool["properties"];
                            array_len(&pool_props["backendIPConfigurations"])
                                + array_len(&pool_props["loadBalancerBackendAddresses"])
                        })
                        .sum()
                })
                .unwrap_or(0),
        ),
        _ => None,
    };

    let source_id = match kind {
        ResourceKind::Snapshot => non_empty(&props["creationData"]["sourceResourceId"]),
        _ => None,
    };

    Some(ResourceRecord {
        resource_id,
        subscription_id: row["subscriptionId"].as_str().unwrap_or_default().to_string(),
        resource_group: row["resourceGroup"].as_str().unwrap_or_default().to_string(),
        name: row["name"].as_str().unwrap_or_default().to_string(),
        resource_type,
        location: row["location"].as_str().unwrap_or_default().to_string(),
        created_at,
        provisioning_state: non_empty(&props["provisioningState"]),
        power_state,
        sku: non_empty(&row["sku"]["name"]),
        size,
        disk_size_gb,
        attached_to,
        consumer_count,
        source_id,
        tags: Tags::from_json(&row["tags"]),
    })
}

fn non_empty(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn array_len(value: &Value) -> u32 {
    value.as_array().map(|a| a.len() as u32).unwrap_or(0)
}

fn parse_time(value: &Value) -> Option<DateTime<Utc>> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}
