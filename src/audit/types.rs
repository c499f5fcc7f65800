//! Core record types shared by every stage of an audit run.
//!
//! All records are flat so they serialize directly to one CSV row. Identity
//! across records is the lowercased ARM resource id (see [`ResourceKey`]).

use chrono::{DateTime, NaiveDate, Utc};
use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

use crate::common::report::{Report, list_field};

// ============================================================================
// Tags
// ============================================================================

/// Tag mapping with unique keys.
///
/// Serialized as `key=value` pairs joined by `;` so a tag set fits one CSV
/// field. `\`, `;` and `=` inside keys and values are backslash-escaped.
/// Deserialization also accepts a JSON object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tags(BTreeMap<String, String>);

impl Tags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Render as `k=v;k2=v2`.
    pub fn to_field(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| format!("{}={}", escape_tag(k), escape_tag(v)))
            .collect::<Vec<_>>()
            .join(";")
    }

    /// Parse the `k=v;k2=v2` form. Pairs without `=` become keys with empty
    /// values; an unescaped `=` after the first belongs to the value.
    pub fn parse_field(field: &str) -> Self {
        let mut tags = Tags::new();
        let mut key = String::new();
        let mut value: Option<String> = None;
        let mut chars = field.chars();
        while let Some(c) = chars.next() {
            let escaped = c == '\\';
            let c = if escaped { chars.next().unwrap_or('\\') } else { c };
            if !escaped && c == ';' {
                tags.insert_pair(std::mem::take(&mut key), value.take());
                continue;
            }
            if !escaped && c == '=' && value.is_none() {
                value = Some(String::new());
                continue;
            }
            match value.as_mut() {
                Some(v) => v.push(c),
                None => key.push(c),
            }
        }
        tags.insert_pair(key, value);
        tags
    }

    fn insert_pair(&mut self, key: String, value: Option<String>) {
        let key = key.trim();
        if !key.is_empty() {
            self.insert(key, value.as_deref().unwrap_or_default().trim());
        }
    }

    /// Build from provider JSON (`{"k": "v"}` or null). Non-string values are stringified.
    pub fn from_json(value: &serde_json::Value) -> Self {
        let mut tags = Tags::new();
        if let Some(map) = value.as_object() {
            for (k, v) in map {
                let value = match v {
                    serde_json::Value::String(s) => s.clone(),
                    serde_json::Value::Null => String::new(),
                    other => other.to_string(),
                };
                tags.insert(k.clone(), value);
            }
        }
        tags
    }
}

fn escape_tag(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | ';' | '=') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

impl FromIterator<(String, String)> for Tags {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Tags(iter.into_iter().collect())
    }
}

impl Serialize for Tags {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_field())
    }
}

impl<'de> Deserialize<'de> for Tags {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TagsVisitor;

        impl<'de> Visitor<'de> for TagsVisitor {
            type Value = Tags;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a `k=v;k2=v2` string or a map of tags")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Tags, E> {
                Ok(Tags::parse_field(v))
            }

            // CSV infers scalars for bare fields such as `true` or `42`
            fn visit_bool<E: de::Error>(self, v: bool) -> Result<Tags, E> {
                Ok(Tags::parse_field(&v.to_string()))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Tags, E> {
                Ok(Tags::parse_field(&v.to_string()))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Tags, E> {
                Ok(Tags::parse_field(&v.to_string()))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Tags, E> {
                Ok(Tags::parse_field(&v.to_string()))
            }

            fn visit_unit<E: de::Error>(self) -> Result<Tags, E> {
                Ok(Tags::new())
            }

            fn visit_none<E: de::Error>(self) -> Result<Tags, E> {
                Ok(Tags::new())
            }

            fn visit_map<M: MapAccess<'de>>(self, mut map: M) -> Result<Tags, M::Error> {
                let mut tags = Tags::new();
                while let Some((k, v)) = map.next_entry::<String, String>()? {
                    tags.insert(k, v);
                }
                Ok(tags)
            }
        }

        deserializer.deserialize_any(TagsVisitor)
    }
}

// ============================================================================
// Resource identity
// ============================================================================

/// Known resource kinds. Detector logic switches over this enum rather than
/// matching substrings of the ARM type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    VirtualMachine,
    Disk,
    Snapshot,
    PublicIp,
    NetworkSecurityGroup,
    NetworkInterface,
    LoadBalancer,
    StorageAccount,
    SqlServer,
    SqlDatabase,
    CosmosDb,
    WebApp,
    KeyVault,
    ResourceGroup,
    Other,
}

impl ResourceKind {
    pub const ALL_KNOWN: &'static [ResourceKind] = &[
        ResourceKind::VirtualMachine,
        ResourceKind::Disk,
        ResourceKind::Snapshot,
        ResourceKind::PublicIp,
        ResourceKind::NetworkSecurityGroup,
        ResourceKind::NetworkInterface,
        ResourceKind::LoadBalancer,
        ResourceKind::StorageAccount,
        ResourceKind::SqlServer,
        ResourceKind::SqlDatabase,
        ResourceKind::CosmosDb,
        ResourceKind::WebApp,
        ResourceKind::KeyVault,
    ];

    /// Classify an ARM type string, ignoring case.
    pub fn from_arm_type(arm_type: &str) -> Self {
        let normalized = arm_type.trim().to_ascii_lowercase();
        Self::ALL_KNOWN
            .iter()
            .chain(std::iter::once(&ResourceKind::ResourceGroup))
            .copied()
            .find(|kind| kind.arm_type() == Some(normalized.as_str()))
            .unwrap_or(ResourceKind::Other)
    }

    /// Canonical lowercase ARM type.
    pub fn arm_type(&self) -> Option<&'static str> {
        match self {
            Self::VirtualMachine => Some("microsoft.compute/virtualmachines"),
            Self::Disk => Some("microsoft.compute/disks"),
            Self::Snapshot => Some("microsoft.compute/snapshots"),
            Self::PublicIp => Some("microsoft.network/publicipaddresses"),
            Self::NetworkSecurityGroup => Some("microsoft.network/networksecuritygroups"),
            Self::NetworkInterface => Some("microsoft.network/networkinterfaces"),
            Self::LoadBalancer => Some("microsoft.network/loadbalancers"),
            Self::StorageAccount => Some("microsoft.storage/storageaccounts"),
            Self::SqlServer => Some("microsoft.sql/servers"),
            Self::SqlDatabase => Some("microsoft.sql/servers/databases"),
            Self::CosmosDb => Some("microsoft.documentdb/databaseaccounts"),
            Self::WebApp => Some("microsoft.web/sites"),
            Self::KeyVault => Some("microsoft.keyvault/vaults"),
            Self::ResourceGroup => Some("microsoft.resources/resourcegroups"),
            Self::Other => None,
        }
    }

    /// Compute and data-store kinds whose removal is never routine.
    pub fn is_stateful_service(&self) -> bool {
        matches!(
            self,
            Self::VirtualMachine | Self::SqlServer | Self::SqlDatabase | Self::CosmosDb
        )
    }
}

/// Normalized identity of a resource: the lowercased ARM id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey(String);

impl ResourceKey {
    pub fn new(resource_id: &str) -> Self {
        Self(resource_id.trim().trim_end_matches('/').to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Components of an ARM resource id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArmId {
    pub subscription_id: String,
    pub resource_group: String,
    /// Full type, e.g. `Microsoft.Compute/disks`
    pub resource_type: String,
    pub name: String,
}

impl ArmId {
    /// Parse `/subscriptions/{s}/resourceGroups/{rg}[/providers/{ns}/{type}/{name}...]`.
    pub fn parse(resource_id: &str) -> Option<Self> {
        let segments: Vec<&str> = resource_id
            .trim()
            .trim_matches('/')
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();

        if segments.len() < 4
            || !segments[0].eq_ignore_ascii_case("subscriptions")
            || !segments[2].eq_ignore_ascii_case("resourcegroups")
        {
            return None;
        }

        let subscription_id = segments[1].to_string();
        let resource_group = segments[3].to_string();

        if segments.len() == 4 {
            return Some(Self {
                subscription_id,
                name: resource_group.clone(),
                resource_group,
                resource_type: "Microsoft.Resources/resourceGroups".to_string(),
            });
        }

        if segments.len() < 8 || !segments[4].eq_ignore_ascii_case("providers") {
            return None;
        }

        // namespace, then (type, name) pairs
        let rest = &segments[6..];
        if rest.len() % 2 != 0 {
            return None;
        }
        let mut type_parts = vec![segments[5]];
        let mut name = "";
        for pair in rest.chunks(2) {
            type_parts.push(pair[0]);
            name = pair[1];
        }

        Some(Self {
            subscription_id,
            resource_group,
            resource_type: type_parts.join("/"),
            name: name.to_string(),
        })
    }
}

/// Records that can be joined by resource identity.
pub trait Identified {
    fn resource_id(&self) -> &str;

    fn key(&self) -> ResourceKey {
        ResourceKey::new(self.resource_id())
    }
}

// ============================================================================
// Tiers and levels
// ============================================================================

/// Coarse cost bucket used in place of metered cost.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub enum CostImpact {
    #[default]
    Low,
    Medium,
    High,
}

impl CostImpact {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
        }
    }
}

impl fmt::Display for CostImpact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
        };
        f.write_str(s)
    }
}

/// Recommendation priority, serialized as its tier number (1 is most urgent).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Priority {
    Critical,
    Moderate,
    Low,
}

impl Priority {
    pub fn tier(&self) -> u8 {
        match self {
            Self::Critical => 1,
            Self::Moderate => 2,
            Self::Low => 3,
        }
    }

    /// Priority implied by a cost-impact tier. Higher impact never yields a
    /// less urgent priority.
    pub fn from_impact(impact: CostImpact) -> Self {
        match impact {
            CostImpact::High => Self::Critical,
            CostImpact::Medium => Self::Moderate,
            CostImpact::Low => Self::Low,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Critical => "Critical",
            Self::Moderate => "Moderate",
            Self::Low => "Low",
        }
    }
}

impl From<Priority> for u8 {
    fn from(p: Priority) -> u8 {
        p.tier()
    }
}

impl TryFrom<u8> for Priority {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Critical),
            2 => Ok(Self::Moderate),
            3 => Ok(Self::Low),
            other => Err(format!("priority must be 1-3, got {}", other)),
        }
    }
}

/// Monthly savings bracket. Ordered from smallest to largest.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub enum SavingsRange {
    #[default]
    #[serde(rename = "$0")]
    None,
    #[serde(rename = "$0-10")]
    UpTo10,
    #[serde(rename = "$10-50")]
    From10To50,
    #[serde(rename = "$50-200")]
    From50To200,
    #[serde(rename = "$200+")]
    Over200,
}

impl SavingsRange {
    /// Bracket for a monthly amount.
    pub fn from_monthly(amount: f64) -> Self {
        if amount <= 0.0 {
            Self::None
        } else if amount < 10.0 {
            Self::UpTo10
        } else if amount < 50.0 {
            Self::From10To50
        } else if amount < 200.0 {
            Self::From50To200
        } else {
            Self::Over200
        }
    }

    /// Bracket assumed when only the cost-impact tier is known.
    pub fn from_impact(impact: CostImpact) -> Self {
        match impact {
            CostImpact::Low => Self::UpTo10,
            CostImpact::Medium => Self::From10To50,
            CostImpact::High => Self::From50To200,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::None => "$0",
            Self::UpTo10 => "$0-10",
            Self::From10To50 => "$10-50",
            Self::From50To200 => "$50-200",
            Self::Over200 => "$200+",
        }
    }
}

// ============================================================================
// Inventory
// ============================================================================

/// One resource as returned by the resource graph, normalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResourceRecord {
    pub resource_id: String,
    pub subscription_id: String,
    pub resource_group: String,
    pub name: String,
    /// Lowercased ARM type
    #[serde(rename = "Type")]
    pub resource_type: String,
    pub location: String,
    pub created_at: Option<DateTime<Utc>>,
    pub provisioning_state: Option<String>,
    pub power_state: Option<String>,
    pub sku: Option<String>,
    /// VM size (e.g. `Standard_D4s_v3`)
    pub size: Option<String>,
    pub disk_size_gb: Option<u64>,
    /// Id of the consumer this resource is bound to (VM, IP configuration, ...)
    pub attached_to: Option<String>,
    /// Number of consumers (NSG subnets + NICs, load balancer backend members)
    pub consumer_count: Option<u32>,
    /// Source disk or VM of a snapshot
    pub source_id: Option<String>,
    pub tags: Tags,
}

impl ResourceRecord {
    pub fn kind(&self) -> ResourceKind {
        ResourceKind::from_arm_type(&self.resource_type)
    }

    /// Deallocated or stopped, per the instance view power state.
    pub fn is_stopped(&self) -> bool {
        self.power_state
            .as_deref()
            .map(|s| {
                let s = s.to_ascii_lowercase();
                s.contains("deallocated") || s.contains("stopped")
            })
            .unwrap_or(false)
    }

    /// Whole days since creation, when the creation time is known.
    pub fn age_days(&self, now: DateTime<Utc>) -> Option<i64> {
        self.created_at.map(|created| (now - created).num_days())
    }
}

impl Identified for ResourceRecord {
    fn resource_id(&self) -> &str {
        &self.resource_id
    }
}

impl Report for ResourceRecord {
    const NAME: &'static str = "inventory";
    const HEADERS: &'static [&'static str] = &[
        "ResourceId",
        "SubscriptionId",
        "ResourceGroup",
        "Name",
        "Type",
        "Location",
        "CreatedAt",
        "ProvisioningState",
        "PowerState",
        "Sku",
        "Size",
        "DiskSizeGb",
        "AttachedTo",
        "ConsumerCount",
        "SourceId",
        "Tags",
    ];
}

/// A resource group in the audited subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResourceGroupInfo {
    pub name: String,
    pub location: String,
    pub tags: Tags,
}

/// Subscription as reported by the account API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionInfo {
    pub id: String,
    pub name: String,
    pub state: String,
}

impl SubscriptionInfo {
    pub fn is_enabled(&self) -> bool {
        self.state.eq_ignore_ascii_case("enabled")
    }
}

/// Everything the fetcher produced for one audit run.
#[derive(Debug, Clone, PartialEq)]
pub struct Inventory {
    pub subscription: SubscriptionInfo,
    /// Groups in scope (all groups, or the requested allow-list)
    pub resource_groups: Vec<ResourceGroupInfo>,
    pub resources: Vec<ResourceRecord>,
}

impl Inventory {
    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.resources.iter().any(|r| &r.key() == key)
    }

    pub fn of_kind(&self, kind: ResourceKind) -> impl Iterator<Item = &ResourceRecord> {
        self.resources.iter().filter(move |r| r.kind() == kind)
    }
}

// ============================================================================
// Cost
// ============================================================================

/// Where a cost figure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CostSource {
    /// Metered cost from the cost management API
    #[default]
    Metered,
    /// Size/SKU based estimate; low confidence
    #[serde(rename = "Estimated (low confidence)")]
    Estimated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CostRecord {
    pub date: NaiveDate,
    pub resource_id: String,
    pub subscription_id: String,
    pub resource_group: String,
    pub name: String,
    #[serde(rename = "Type")]
    pub resource_type: String,
    pub location: String,
    pub charge_type: String,
    /// Never negative
    pub cost: f64,
    pub currency: String,
    pub source: CostSource,
}

impl Identified for CostRecord {
    fn resource_id(&self) -> &str {
        &self.resource_id
    }
}

impl Report for CostRecord {
    const NAME: &'static str = "costs";
    const HEADERS: &'static [&'static str] = &[
        "Date",
        "ResourceId",
        "SubscriptionId",
        "ResourceGroup",
        "Name",
        "Type",
        "Location",
        "ChargeType",
        "Cost",
        "Currency",
        "Source",
    ];
}

/// Cost summed per resource over the reporting window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResourceCost {
    pub resource_id: String,
    pub resource_group: String,
    pub name: String,
    #[serde(rename = "Type")]
    pub resource_type: String,
    pub total_cost: f64,
    pub currency: String,
    pub record_count: usize,
    pub cost_flag: CostImpact,
    pub source: CostSource,
}

impl Identified for ResourceCost {
    fn resource_id(&self) -> &str {
        &self.resource_id
    }
}

impl Report for ResourceCost {
    const NAME: &'static str = "cost-aggregate";
    const HEADERS: &'static [&'static str] = &[
        "ResourceId",
        "ResourceGroup",
        "Name",
        "Type",
        "TotalCost",
        "Currency",
        "RecordCount",
        "CostFlag",
        "Source",
    ];
}

// ============================================================================
// Orphans
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OrphanCategory {
    #[serde(rename = "Unattached Disk")]
    UnattachedDisk,
    #[serde(rename = "Unassociated Public IP")]
    UnassociatedPublicIp,
    #[serde(rename = "Unused NSG")]
    UnusedNsg,
    #[serde(rename = "Orphaned NIC")]
    OrphanedNic,
    #[serde(rename = "Unused Load Balancer")]
    UnusedLoadBalancer,
    #[serde(rename = "Empty Resource Group")]
    EmptyResourceGroup,
    #[serde(rename = "Orphaned Snapshot")]
    OrphanedSnapshot,
    #[serde(rename = "Stopped VM")]
    StoppedVm,
}

impl OrphanCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnattachedDisk => "Unattached Disk",
            Self::UnassociatedPublicIp => "Unassociated Public IP",
            Self::UnusedNsg => "Unused NSG",
            Self::OrphanedNic => "Orphaned NIC",
            Self::UnusedLoadBalancer => "Unused Load Balancer",
            Self::EmptyResourceGroup => "Empty Resource Group",
            Self::OrphanedSnapshot => "Orphaned Snapshot",
            Self::StoppedVm => "Stopped VM",
        }
    }
}

impl fmt::Display for OrphanCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OrphanFinding {
    pub resource_id: String,
    pub subscription_id: String,
    pub resource_group: String,
    pub name: String,
    #[serde(rename = "Type")]
    pub resource_type: String,
    pub location: String,
    pub category: OrphanCategory,
    pub cost_impact: CostImpact,
    pub sku: Option<String>,
    pub size_gb: Option<u64>,
    pub created_at: Option<DateTime<Utc>>,
    pub details: String,
    pub tags: Tags,
}

impl Identified for OrphanFinding {
    fn resource_id(&self) -> &str {
        &self.resource_id
    }
}

impl Report for OrphanFinding {
    const NAME: &'static str = "orphans";
    const HEADERS: &'static [&'static str] = &[
        "ResourceId",
        "SubscriptionId",
        "ResourceGroup",
        "Name",
        "Type",
        "Location",
        "Category",
        "CostImpact",
        "Sku",
        "SizeGb",
        "CreatedAt",
        "Details",
        "Tags",
    ];
}

// ============================================================================
// Activity
// ============================================================================

/// Whether an activity record is authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EventSource {
    #[default]
    #[serde(rename = "ActivityLog")]
    ActivityLog,
    /// Derived from resource metadata because the activity log was unavailable
    #[serde(rename = "Inferred")]
    Inferred,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ActivityEvent {
    pub timestamp: DateTime<Utc>,
    pub operation_name: String,
    pub status: String,
    pub caller: String,
    pub resource_id: String,
    pub resource_group: String,
    #[serde(rename = "Type")]
    pub resource_type: String,
    pub subscription_id: String,
    pub source: EventSource,
}

impl Identified for ActivityEvent {
    fn resource_id(&self) -> &str {
        &self.resource_id
    }
}

impl Report for ActivityEvent {
    const NAME: &'static str = "activity-events";
    const HEADERS: &'static [&'static str] = &[
        "Timestamp",
        "OperationName",
        "Status",
        "Caller",
        "ResourceId",
        "ResourceGroup",
        "Type",
        "SubscriptionId",
        "Source",
    ];
}

/// Per-caller rollup of activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreatorSummary {
    pub caller: String,
    pub total_operations: usize,
    pub creations: usize,
    pub modifications: usize,
    pub deletions: usize,
    #[serde(with = "list_field")]
    pub resource_types: Vec<String>,
    pub last_activity: Option<DateTime<Utc>>,
    pub source: EventSource,
}

impl Report for CreatorSummary {
    const NAME: &'static str = "activity-creators";
    const HEADERS: &'static [&'static str] = &[
        "Caller",
        "TotalOperations",
        "Creations",
        "Modifications",
        "Deletions",
        "ResourceTypes",
        "LastActivity",
        "Source",
    ];
}

/// Per-resource creation and modification history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResourceHistory {
    pub resource_id: String,
    pub resource_group: String,
    pub name: String,
    pub created_by: String,
    pub created_at: Option<DateTime<Utc>>,
    pub last_modified_by: Option<String>,
    pub last_modified_at: Option<DateTime<Utc>>,
    pub modification_count: usize,
    pub source: EventSource,
}

impl Identified for ResourceHistory {
    fn resource_id(&self) -> &str {
        &self.resource_id
    }
}

impl Report for ResourceHistory {
    const NAME: &'static str = "activity-resources";
    const HEADERS: &'static [&'static str] = &[
        "ResourceId",
        "ResourceGroup",
        "Name",
        "CreatedBy",
        "CreatedAt",
        "LastModifiedBy",
        "LastModifiedAt",
        "ModificationCount",
        "Source",
    ];
}

// ============================================================================
// Recommendations
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RecommendationCategory {
    #[serde(rename = "Unattached Disk")]
    UnattachedDisk,
    #[serde(rename = "Unassociated Public IP")]
    UnassociatedPublicIp,
    #[serde(rename = "Unused NSG")]
    UnusedNsg,
    #[serde(rename = "Orphaned NIC")]
    OrphanedNic,
    #[serde(rename = "Unused Load Balancer")]
    UnusedLoadBalancer,
    #[serde(rename = "Empty Resource Group")]
    EmptyResourceGroup,
    #[serde(rename = "Orphaned Snapshot")]
    OrphanedSnapshot,
    #[serde(rename = "Stopped VM")]
    StoppedVm,
    #[serde(rename = "High Cost")]
    HighCost,
    #[serde(rename = "Aged Resource")]
    AgedResource,
}

impl From<OrphanCategory> for RecommendationCategory {
    fn from(category: OrphanCategory) -> Self {
        match category {
            OrphanCategory::UnattachedDisk => Self::UnattachedDisk,
            OrphanCategory::UnassociatedPublicIp => Self::UnassociatedPublicIp,
            OrphanCategory::UnusedNsg => Self::UnusedNsg,
            OrphanCategory::OrphanedNic => Self::OrphanedNic,
            OrphanCategory::UnusedLoadBalancer => Self::UnusedLoadBalancer,
            OrphanCategory::EmptyResourceGroup => Self::EmptyResourceGroup,
            OrphanCategory::OrphanedSnapshot => Self::OrphanedSnapshot,
            OrphanCategory::StoppedVm => Self::StoppedVm,
        }
    }
}

impl fmt::Display for RecommendationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::HighCost => "High Cost",
            Self::AgedResource => "Aged Resource",
            Self::UnattachedDisk => OrphanCategory::UnattachedDisk.as_str(),
            Self::UnassociatedPublicIp => OrphanCategory::UnassociatedPublicIp.as_str(),
            Self::UnusedNsg => OrphanCategory::UnusedNsg.as_str(),
            Self::OrphanedNic => OrphanCategory::OrphanedNic.as_str(),
            Self::UnusedLoadBalancer => OrphanCategory::UnusedLoadBalancer.as_str(),
            Self::EmptyResourceGroup => OrphanCategory::EmptyResourceGroup.as_str(),
            Self::OrphanedSnapshot => OrphanCategory::OrphanedSnapshot.as_str(),
            Self::StoppedVm => OrphanCategory::StoppedVm.as_str(),
        };
        f.write_str(s)
    }
}

/// Advisory cleanup recommendation. Never acted on without review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Recommendation {
    pub priority: Priority,
    pub resource_id: String,
    pub subscription_id: String,
    pub resource_group: String,
    pub name: String,
    #[serde(rename = "Type")]
    pub resource_type: String,
    pub category: RecommendationCategory,
    pub estimated_savings: SavingsRange,
    pub risk: RiskLevel,
    #[serde(with = "list_field")]
    pub safety_checks: Vec<String>,
    pub action: String,
    /// False when the resource was not in this run's inventory
    pub verified: bool,
    pub details: String,
    pub tags: Tags,
}

impl Recommendation {
    pub fn kind(&self) -> ResourceKind {
        ResourceKind::from_arm_type(&self.resource_type)
    }
}

impl Identified for Recommendation {
    fn resource_id(&self) -> &str {
        &self.resource_id
    }
}

impl Report for Recommendation {
    const NAME: &'static str = "cleanup-recommendations";
    const HEADERS: &'static [&'static str] = &[
        "Priority",
        "ResourceId",
        "SubscriptionId",
        "ResourceGroup",
        "Name",
        "Type",
        "Category",
        "EstimatedSavings",
        "Risk",
        "SafetyChecks",
        "Action",
        "Verified",
        "Details",
        "Tags",
    ];
}
