//! Activity tracking.
//!
//! Reads the subscription activity log for a bounded lookback window and
//! derives who created and who modified what. When the log is unavailable or
//! empty, creation events are inferred from resource metadata and creator
//! tags, and labelled [`EventSource::Inferred`].

use super::inventory::ResourceFetcher;
use super::types::{
    ActivityEvent, ArmId, CreatorSummary, EventSource, Identified, ResourceHistory, ResourceKey,
    ResourceRecord, Tags,
};
use crate::azure::{ActivityQuery, AzureApi};
use crate::config::ActivityPolicy;
use crate::error::{AuditError, Result};
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};

pub const UNKNOWN_CALLER: &str = "Unknown";

/// Creator tag keys in precedence order, compared after [`normalize_tag_key`].
const CREATOR_TAG_TIERS: &[&[&str]] = &[
    &["createdby", "createby"],
    &["owner", "creator", "author"],
    &["deployedby", "deployer"],
];

/// What an operation did to its resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Create,
    Write,
    Delete,
    Action,
    Other,
}

impl OperationKind {
    /// Create and write operations are candidates for creation.
    pub fn is_create_or_write(&self) -> bool {
        matches!(self, OperationKind::Create | OperationKind::Write)
    }
}

pub fn classify_operation(operation: &str) -> OperationKind {
    let op = operation.to_ascii_lowercase();
    if op.contains("/delete") {
        OperationKind::Delete
    } else if op.ends_with("/write") {
        OperationKind::Write
    } else if op.contains("create") {
        OperationKind::Create
    } else if op.ends_with("/action") {
        OperationKind::Action
    } else {
        OperationKind::Other
    }
}

/// Reject lookback windows outside `1..=max_days`.
pub fn validate_days_back(days: u32, policy: &ActivityPolicy) -> Result<u32> {
    if days == 0 || days > policy.max_days {
        return Err(AuditError::validation(format!(
            "--days-back must be between 1 and {} (activity log retention), got {}",
            policy.max_days, days
        )));
    }
    Ok(days)
}

fn normalize_tag_key(key: &str) -> String {
    key.chars()
        .filter(|c| !matches!(c, '-' | '_' | ' ' | '.'))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Creator from tags: CreatedBy variants, then Owner/Creator/Author, then
/// DeployedBy, then [`UNKNOWN_CALLER`].
pub fn resolve_creator(tags: &Tags) -> String {
    CREATOR_TAG_TIERS
        .iter()
        .find_map(|tier| {
            tags.iter().find_map(|(key, value)| {
                let value = value.trim();
                (tier.contains(&normalize_tag_key(key).as_str()) && !value.is_empty())
                    .then(|| value.to_string())
            })
        })
        .unwrap_or_else(|| UNKNOWN_CALLER.to_string())
}

/// Parse one `az monitor activity-log list` entry.
pub fn parse_event(value: &Value, subscription: &str) -> Option<ActivityEvent> {
    let timestamp = value["eventTimestamp"]
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())?
        .with_timezone(&Utc);
    let resource_id = value["resourceId"].as_str().unwrap_or_default().to_string();
    let parsed = ArmId::parse(&resource_id);

    let localized = |field: &str| -> String {
        value[field]["value"]
            .as_str()
            .or_else(|| value[field]["localizedValue"].as_str())
            .or_else(|| value[field].as_str())
            .unwrap_or_default()
            .to_string()
    };

    let resource_group = value["resourceGroupName"]
        .as_str()
        .map(str::to_string)
        .or_else(|| parsed.as_ref().map(|p| p.resource_group.clone()))
        .unwrap_or_default();
    let resource_type = match localized("resourceType") {
        t if !t.is_empty() => t.to_ascii_lowercase(),
        _ => parsed
            .as_ref()
            .map(|p| p.resource_type.to_ascii_lowercase())
            .unwrap_or_default(),
    };
    let caller = value["caller"]
        .as_str()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or(UNKNOWN_CALLER)
        .to_string();

    Some(ActivityEvent {
        timestamp,
        operation_name: localized("operationName"),
        status: localized("status"),
        caller,
        resource_id,
        resource_group,
        resource_type,
        subscription_id: value["subscriptionId"]
            .as_str()
            .unwrap_or(subscription)
            .to_string(),
        source: EventSource::ActivityLog,
    })
}

/// One creation event per resource with a known creation time.
pub fn infer_events(resources: &[ResourceRecord]) -> Vec<ActivityEvent> {
    let mut events: Vec<ActivityEvent> = resources
        .iter()
        .filter_map(|r| {
            Some(ActivityEvent {
                timestamp: r.created_at?,
                operation_name: format!("{}/write", r.resource_type),
                status: "Succeeded".to_string(),
                caller: resolve_creator(&r.tags),
                resource_id: r.resource_id.clone(),
                resource_group: r.resource_group.clone(),
                resource_type: r.resource_type.clone(),
                subscription_id: r.subscription_id.clone(),
                source: EventSource::Inferred,
            })
        })
        .collect();
    sort_events(&mut events);
    events
}

fn sort_events(events: &mut [ActivityEvent]) {
    events.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.resource_id.cmp(&b.resource_id))
    });
}

fn succeeded(event: &ActivityEvent) -> bool {
    event.status.is_empty() || event.status.eq_ignore_ascii_case("succeeded")
}

/// Role of each event in its resource's lifecycle, by index. The earliest
/// create/write event per resource is its creation.
fn creation_indices(events: &[ActivityEvent]) -> HashMap<ResourceKey, usize> {
    let mut first: HashMap<ResourceKey, usize> = HashMap::new();
    for (i, event) in events.iter().enumerate() {
        if !classify_operation(&event.operation_name).is_create_or_write() {
            continue;
        }
        let key = event.key();
        match first.get(&key) {
            Some(&j) if events[j].timestamp <= event.timestamp => {}
            _ => {
                first.insert(key, i);
            }
        }
    }
    first
}

/// Per-caller rollup. Counts by role only include successful events;
/// `total_operations` counts every event.
pub fn summarize_creators(events: &[ActivityEvent]) -> Vec<CreatorSummary> {
    let creations = creation_indices(events);
    let mut by_caller: BTreeMap<&str, CreatorSummary> = BTreeMap::new();
    let mut types: BTreeMap<&str, BTreeSet<String>> = BTreeMap::new();

    for (i, event) in events.iter().enumerate() {
        let summary = by_caller
            .entry(event.caller.as_str())
            .or_insert_with(|| CreatorSummary {
                caller: event.caller.clone(),
                total_operations: 0,
                creations: 0,
                modifications: 0,
                deletions: 0,
                resource_types: Vec::new(),
                last_activity: None,
                source: event.source,
            });
        summary.total_operations += 1;
        summary.last_activity = summary.last_activity.max(Some(event.timestamp));
        if !event.resource_type.is_empty() {
            types
                .entry(event.caller.as_str())
                .or_default()
                .insert(event.resource_type.clone());
        }

        if !succeeded(event) {
            continue;
        }
        match classify_operation(&event.operation_name) {
            OperationKind::Delete => summary.deletions += 1,
            kind if kind.is_create_or_write() => {
                if creations.get(&event.key()) == Some(&i) || kind == OperationKind::Create {
                    summary.creations += 1;
                } else {
                    summary.modifications += 1;
                }
            }
            _ => {}
        }
    }

    let mut summaries: Vec<CreatorSummary> = by_caller
        .into_iter()
        .map(|(caller, mut summary)| {
            summary.resource_types = types
                .remove(caller)
                .map(|set| set.into_iter().collect())
                .unwrap_or_default();
            summary
        })
        .collect();
    summaries.sort_by(|a, b| {
        b.total_operations
            .cmp(&a.total_operations)
            .then_with(|| a.caller.cmp(&b.caller))
    });
    summaries
}

/// Per-resource history. The creator is the caller of the earliest
/// create/write event; when the window holds none, the inventory's creator
/// tags and creation time fill in and the row is labeled `Inferred`.
pub fn build_histories(
    events: &[ActivityEvent],
    inventory: &[ResourceRecord],
) -> Vec<ResourceHistory> {
    let creations = creation_indices(events);
    let resources: HashMap<ResourceKey, &ResourceRecord> =
        inventory.iter().map(|r| (r.key(), r)).collect();

    let mut grouped: BTreeMap<ResourceKey, Vec<usize>> = BTreeMap::new();
    for (i, event) in events.iter().enumerate() {
        if event.resource_id.is_empty() {
            continue;
        }
        grouped.entry(event.key()).or_default().push(i);
    }

    grouped
        .into_iter()
        .map(|(key, indices)| {
            let first = &events[indices[0]];
            let resource = resources.get(&key);
            let created = creations.get(&key).map(|&i| &events[i]);

            let (created_by, created_at, source) = match (created, resource) {
                (Some(event), _) => (event.caller.clone(), Some(event.timestamp), event.source),
                (None, Some(r)) => (resolve_creator(&r.tags), r.created_at, EventSource::Inferred),
                (None, None) => (UNKNOWN_CALLER.to_string(), None, EventSource::Inferred),
            };

            let modifications: Vec<&ActivityEvent> = indices
                .iter()
                .filter(|&&i| Some(&i) != creations.get(&key))
                .map(|&i| &events[i])
                .filter(|e| classify_operation(&e.operation_name) == OperationKind::Write)
                .collect();
            let last = modifications.iter().max_by_key(|e| e.timestamp);

            let name = resource
                .map(|r| r.name.clone())
                .or_else(|| ArmId::parse(&first.resource_id).map(|p| p.name))
                .unwrap_or_default();

            ResourceHistory {
                resource_id: first.resource_id.clone(),
                resource_group: first.resource_group.clone(),
                name,
                created_by,
                created_at,
                last_modified_by: last.map(|e| e.caller.clone()),
                last_modified_at: last.map(|e| e.timestamp),
                modification_count: modifications.len(),
                source,
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActivityOutcome {
    pub events: Vec<ActivityEvent>,
    pub creators: Vec<CreatorSummary>,
    pub histories: Vec<ResourceHistory>,
    /// Set when events were inferred instead of read from the log
    pub degraded: Option<String>,
}

pub struct ActivityTracker<'a> {
    api: &'a dyn AzureApi,
    policy: &'a ActivityPolicy,
}

impl<'a> ActivityTracker<'a> {
    pub fn new(api: &'a dyn AzureApi, policy: &'a ActivityPolicy) -> Self {
        Self { api, policy }
    }

    /// Collect activity for the last `days_back` days ending at `now`.
    pub async fn run(
        &self,
        subscription: &str,
        resource_groups: &[String],
        days_back: u32,
        now: DateTime<Utc>,
        inventory: Option<&[ResourceRecord]>,
    ) -> Result<ActivityOutcome> {
        let days_back = validate_days_back(days_back, self.policy)?;
        log::info!("Activity tracking over the last {} days", days_back);

        let query = ActivityQuery {
            subscription: subscription.to_string(),
            start: now - Duration::days(i64::from(days_back)),
            end: now,
            max_events: self.policy.max_events,
        };

        let logged = match self.api.list_activity(&query).await {
            Ok(raw) => {
                let mut events: Vec<ActivityEvent> = raw
                    .iter()
                    .filter_map(|v| parse_event(v, subscription))
                    .filter(|e| in_groups(&e.resource_group, resource_groups))
                    .collect();
                sort_events(&mut events);
                if events.is_empty() {
                    Err("activity log returned no events".to_string())
                } else {
                    Ok(events)
                }
            }
            Err(err) => Err(format!("activity log unavailable: {}", err)),
        };

        let fetched;
        let resources = match inventory {
            Some(resources) => resources,
            None => {
                fetched = ResourceFetcher::new(self.api)
                    .fetch_resources(subscription, resource_groups, &[])
                    .await
                    .unwrap_or_else(|err| {
                        log::warn!("Could not fetch resources for activity history: {}", err);
                        Vec::new()
                    });
                &fetched[..]
            }
        };

        let (events, degraded) = match logged {
            Ok(events) => (events, None),
            Err(reason) => {
                log::warn!("{}; inferring creation events from resource metadata", reason);
                (infer_events(resources), Some(reason))
            }
        };

        let creators = summarize_creators(&events);
        let histories = build_histories(&events, resources);
        log::info!(
            "Activity tracking: {} events, {} callers, {} resources",
            events.len(),
            creators.len(),
            histories.len()
        );
        Ok(ActivityOutcome {
            events,
            creators,
            histories,
            degraded,
        })
    }
}

fn in_groups(group: &str, groups: &[String]) -> bool {
    groups.is_empty() || groups.iter().any(|g| g.eq_ignore_ascii_case(group))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    const DISK: &str = "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Compute/disks/d1";

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap()
    }

    fn event(day: u32, op: &str, caller: &str, resource_id: &str) -> ActivityEvent {
        ActivityEvent {
            timestamp: at(day),
            operation_name: op.into(),
            status: "Succeeded".into(),
            caller: caller.into(),
            resource_id: resource_id.into(),
            resource_group: "rg".into(),
            resource_type: "microsoft.compute/disks".into(),
            subscription_id: "s".into(),
            source: EventSource::ActivityLog,
        }
    }

    fn tags(pairs: &[(&str, &str)]) -> Tags {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_classify_operation() {
        assert_eq!(classify_operation("Microsoft.Compute/disks/delete"), OperationKind::Delete);
        assert_eq!(classify_operation("Microsoft.Compute/disks/write"), OperationKind::Write);
        assert_eq!(classify_operation("Create or Update Virtual Machine"), OperationKind::Create);
        assert_eq!(classify_operation("Microsoft.Compute/virtualMachines/start/action"), OperationKind::Action);
        assert_eq!(classify_operation("Microsoft.Insights/diagnosticSettings/read"), OperationKind::Other);
    }

    #[test]
    fn test_creator_tag_precedence() {
        assert_eq!(resolve_creator(&tags(&[("CreatedBy", "alice"), ("Owner", "bob")])), "alice");
        assert_eq!(resolve_creator(&tags(&[("owner", "bob"), ("deployed-by", "ci")])), "bob");
        assert_eq!(resolve_creator(&tags(&[("Deployed_By", "ci")])), "ci");
        assert_eq!(resolve_creator(&tags(&[("created-by", "  "), ("Author", "carol")])), "carol");
        assert_eq!(resolve_creator(&tags(&[("env", "prod")])), UNKNOWN_CALLER);
    }

    #[test]
    fn test_days_back_bounds() {
        let policy = ActivityPolicy::default();
        assert_eq!(validate_days_back(30, &policy).unwrap(), 30);
        assert_eq!(validate_days_back(91, &policy).unwrap_err().exit_code(), 3);
        assert!(validate_days_back(0, &policy).is_err());
    }

    #[test]
    fn test_parse_event() {
        let raw = json!({
            "eventTimestamp": "2024-03-05T10:00:00.1234567Z",
            "operationName": {"value": "Microsoft.Compute/disks/write", "localizedValue": "Create or Update Disk"},
            "status": {"value": "Succeeded"},
            "caller": "alice@example.com",
            "resourceId": DISK,
            "resourceGroupName": "rg",
            "resourceType": {"value": "Microsoft.Compute/disks"},
            "subscriptionId": "s"
        });
        let event = parse_event(&raw, "s").unwrap();
        assert_eq!(event.operation_name, "Microsoft.Compute/disks/write");
        assert_eq!(event.caller, "alice@example.com");
        assert_eq!(event.resource_type, "microsoft.compute/disks");
        assert_eq!(event.source, EventSource::ActivityLog);

        assert!(parse_event(&json!({"caller": "x"}), "s").is_none());
    }

    #[test]
    fn test_creator_is_earliest_write() {
        let events = vec![
            event(1, "Microsoft.Compute/disks/write", "alice", DISK),
            event(2, "Microsoft.Compute/disks/write", "bob", DISK),
            event(3, "Microsoft.Compute/disks/write", "bob", DISK),
        ];
        let histories = build_histories(&events, &[]);
        assert_eq!(histories.len(), 1);
        assert_eq!(histories[0].created_by, "alice");
        assert_eq!(histories[0].modification_count, 2);
        assert_eq!(histories[0].last_modified_by.as_deref(), Some("bob"));
        assert_eq!(histories[0].last_modified_at, Some(at(3)));
        assert_eq!(histories[0].name, "d1");

        let creators = summarize_creators(&events);
        assert_eq!(creators[0].caller, "bob");
        assert_eq!(creators[0].modifications, 2);
        assert_eq!(creators[1].caller, "alice");
        assert_eq!(creators[1].creations, 1);
    }

    #[test]
    fn test_tag_creator_without_log_creation_is_inferred() {
        let mut resource = ResourceRecord {
            resource_id: DISK.into(),
            subscription_id: "s".into(),
            resource_group: "rg".into(),
            name: "d1".into(),
            resource_type: "microsoft.compute/disks".into(),
            location: "eastus".into(),
            created_at: Some(at(1)),
            provisioning_state: None,
            power_state: None,
            sku: None,
            size: None,
            disk_size_gb: None,
            attached_to: None,
            consumer_count: None,
            source_id: None,
            tags: tags(&[("CreatedBy", "tag-person")]),
        };
        let events = vec![event(4, "Microsoft.Compute/disks/beginGetAccess/action", "bob", DISK)];

        let histories = build_histories(&events, std::slice::from_ref(&resource));
        assert_eq!(histories[0].created_by, "tag-person");
        assert_eq!(histories[0].created_at, Some(at(1)));
        assert_eq!(histories[0].source, EventSource::Inferred);

        resource.tags = Tags::new();
        let histories = build_histories(&events, &[]);
        assert_eq!(histories[0].created_by, UNKNOWN_CALLER);
        assert_eq!(histories[0].source, EventSource::Inferred);

        let logged = vec![event(2, "Microsoft.Compute/disks/write", "alice", DISK)];
        let histories = build_histories(&logged, &[resource]);
        assert_eq!(histories[0].created_by, "alice");
        assert_eq!(histories[0].source, EventSource::ActivityLog);
    }

    #[test]
    fn test_summary_counts_and_types() {
        let other = "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Network/publicIPAddresses/ip";
        let mut ip_event = event(4, "Microsoft.Network/publicIPAddresses/delete", "alice", other);
        ip_event.resource_type = "microsoft.network/publicipaddresses".into();
        let mut failed = event(5, "Microsoft.Compute/disks/write", "alice", DISK);
        failed.status = "Failed".into();
        let events = vec![event(1, "Microsoft.Compute/disks/write", "alice", DISK), ip_event, failed];

        let creators = summarize_creators(&events);
        assert_eq!(creators.len(), 1);
        let alice = &creators[0];
        assert_eq!(alice.total_operations, 3);
        assert_eq!(alice.creations, 1);
        assert_eq!(alice.deletions, 1);
        assert_eq!(alice.modifications, 0);
        assert_eq!(alice.resource_types.len(), 2);
        assert_eq!(alice.last_activity, Some(at(5)));
    }

    #[test]
    fn test_inferred_events_use_creator_tags() {
        let resource = ResourceRecord {
            resource_id: DISK.into(),
            subscription_id: "s".into(),
            resource_group: "rg".into(),
            name: "d1".into(),
            resource_type: "microsoft.compute/disks".into(),
            location: "eastus".into(),
            created_at: Some(at(2)),
            provisioning_state: None,
            power_state: None,
            sku: None,
            size: None,
            disk_size_gb: None,
            attached_to: None,
            consumer_count: None,
            source_id: None,
            tags: tags(&[("CreatedBy", "alice"), ("Owner", "bob")]),
        };
        let mut untagged = resource.clone();
        untagged.resource_id = DISK.replace("d1", "d2");
        untagged.tags = Tags::new();
        let mut undated = resource.clone();
        undated.created_at = None;

        let events = infer_events(&[resource, untagged, undated]);
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.source == EventSource::Inferred));
        assert_eq!(events[0].caller, "alice");
        assert_eq!(events[1].caller, UNKNOWN_CALLER);

        let histories = build_histories(&events, &[]);
        assert!(histories.iter().all(|h| h.source == EventSource::Inferred));
    }
}
