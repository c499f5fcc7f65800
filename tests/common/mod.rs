#![allow(dead_code)]

use async_trait::async_trait;
use azure_audit::audit::types::{ResourceGroupInfo, SubscriptionInfo, Tags};
use azure_audit::azure::{ActivityQuery, AzureApi, CostTable, CostWindow, ResourceQuery};
use azure_audit::error::TransportError;
use serde_json::{Value, json};
use std::sync::Mutex;
use std::time::Duration;

pub const SUB: &str = "0b1f6471-1bf0-4dda-aec3-cb9272f09590";

/// In-memory Azure: scripted responses, per-method failures and a call log.
pub struct FakeAzure {
    pub subscription_state: String,
    pub groups: Vec<ResourceGroupInfo>,
    pub resources: Vec<Value>,
    pub costs: Result<CostTable, TransportError>,
    pub activity: Result<Vec<Value>, TransportError>,
    pub activity_delay: Option<Duration>,
    pub fail_tags: bool,
    pub calls: Mutex<Vec<String>>,
    pub tagged: Mutex<Vec<String>>,
}

impl FakeAzure {
    pub fn new(group_names: &[&str]) -> Self {
        Self {
            subscription_state: "Enabled".to_string(),
            groups: group_names
                .iter()
                .map(|name| ResourceGroupInfo {
                    name: name.to_string(),
                    location: "westeurope".to_string(),
                    tags: Tags::new(),
                })
                .collect(),
            resources: Vec::new(),
            costs: Ok(empty_cost_table()),
            activity: Ok(Vec::new()),
            activity_delay: None,
            fail_tags: false,
            calls: Mutex::new(Vec::new()),
            tagged: Mutex::new(Vec::new()),
        }
    }

    pub fn with_resource(mut self, resource: Value) -> Self {
        self.resources.push(resource);
        self
    }

    pub fn called(&self, method: &str) -> bool {
        self.calls.lock().unwrap().iter().any(|c| c == method)
    }

    pub fn tagged_ids(&self) -> Vec<String> {
        self.tagged.lock().unwrap().clone()
    }

    fn record(&self, method: &str) {
        self.calls.lock().unwrap().push(method.to_string());
    }
}

#[async_trait]
impl AzureApi for FakeAzure {
    async fn show_subscription(
        &self,
        subscription: &str,
    ) -> Result<SubscriptionInfo, TransportError> {
        self.record("show_subscription");
        if subscription != SUB {
            return Err(TransportError::NotFound(subscription.to_string()));
        }
        Ok(SubscriptionInfo {
            id: SUB.to_string(),
            name: "Test Subscription".to_string(),
            state: self.subscription_state.clone(),
        })
    }

    async fn list_resource_groups(
        &self,
        _subscription: &str,
    ) -> Result<Vec<ResourceGroupInfo>, TransportError> {
        self.record("list_resource_groups");
        Ok(self.groups.clone())
    }

    async fn query_resources(&self, query: &ResourceQuery) -> Result<Vec<Value>, TransportError> {
        self.record("query_resources");
        let types: Vec<&str> = query.kinds.iter().filter_map(|k| k.arm_type()).collect();
        Ok(self
            .resources
            .iter()
            .filter(|row| {
                let row_type = row["type"].as_str().unwrap_or_default().to_ascii_lowercase();
                types.is_empty() || types.contains(&row_type.as_str())
            })
            .filter(|row| {
                let group = row["resourceGroup"].as_str().unwrap_or_default();
                query.resource_groups.is_empty()
                    || query
                        .resource_groups
                        .iter()
                        .any(|g| g.eq_ignore_ascii_case(group))
            })
            .filter(|row| {
                let id = row["id"].as_str().unwrap_or_default();
                query.ids.is_empty() || query.ids.iter().any(|i| i.eq_ignore_ascii_case(id))
            })
            .cloned()
            .collect())
    }

    async fn query_costs(
        &self,
        _subscription: &str,
        _window: &CostWindow,
    ) -> Result<CostTable, TransportError> {
        self.record("query_costs");
        self.costs.clone()
    }

    async fn list_activity(&self, _query: &ActivityQuery) -> Result<Vec<Value>, TransportError> {
        self.record("list_activity");
        if let Some(delay) = self.activity_delay {
            tokio::time::sleep(delay).await;
        }
        self.activity.clone()
    }

    async fn merge_tags(&self, resource_id: &str, _tags: &Tags) -> Result<(), TransportError> {
        self.record("merge_tags");
        if self.fail_tags {
            return Err(TransportError::CommandFailed("tag update rejected".to_string()));
        }
        self.tagged.lock().unwrap().push(resource_id.to_string());
        Ok(())
    }
}

pub fn empty_cost_table() -> CostTable {
    CostTable {
        columns: vec![
            "PreTaxCost".to_string(),
            "UsageDate".to_string(),
            "ResourceId".to_string(),
            "Currency".to_string(),
        ],
        rows: Vec::new(),
    }
}

pub fn resource_id(group: &str, provider_type: &str, name: &str) -> String {
    format!(
        "/subscriptions/{}/resourceGroups/{}/providers/{}/{}",
        SUB, group, provider_type, name
    )
}

pub fn disk(group: &str, name: &str, size_gb: u64, managed_by: Option<&str>) -> Value {
    let disk_state = if managed_by.is_some() { "Attached" } else { "Unattached" };
    json!({
        "id": resource_id(group, "Microsoft.Compute/disks", name),
        "name": name,
        "type": "Microsoft.Compute/disks",
        "resourceGroup": group,
        "location": "westeurope",
        "subscriptionId": SUB,
        "managedBy": managed_by,
        "sku": { "name": "Premium_LRS" },
        "properties": {
            "diskSizeGB": size_gb,
            "diskState": disk_state
        },
        "tags": {}
    })
}

pub fn snapshot(group: &str, name: &str, size_gb: u64, source_id: &str) -> Value {
    json!({
        "id": resource_id(group, "Microsoft.Compute/snapshots", name),
        "name": name,
        "type": "Microsoft.Compute/snapshots",
        "resourceGroup": group,
        "location": "westeurope",
        "subscriptionId": SUB,
        "sku": { "name": "Standard_LRS" },
        "properties": {
            "diskSizeGB": size_gb,
            "creationData": { "createOption": "Copy", "sourceResourceId": source_id }
        },
        "tags": {}
    })
}

pub fn vm(group: &str, name: &str, size: &str, power_state: &str) -> Value {
    json!({
        "id": resource_id(group, "Microsoft.Compute/virtualMachines", name),
        "name": name,
        "type": "Microsoft.Compute/virtualMachines",
        "resourceGroup": group,
        "location": "westeurope",
        "subscriptionId": SUB,
        "properties": {
            "hardwareProfile": { "vmSize": size },
            "extended": { "instanceView": { "powerState": { "code": power_state } } }
        },
        "tags": {}
    })
}

pub fn storage_account(group: &str, name: &str, sku: &str) -> Value {
    json!({
        "id": resource_id(group, "Microsoft.Storage/storageAccounts", name),
        "name": name,
        "type": "Microsoft.Storage/storageAccounts",
        "resourceGroup": group,
        "location": "westeurope",
        "subscriptionId": SUB,
        "sku": { "name": sku },
        "properties": {},
        "tags": {}
    })
}
