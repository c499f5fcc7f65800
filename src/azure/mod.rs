//! Azure access.
//!
//! The pipeline talks to Azure only through [`AzureApi`]. Responses are the
//! provider's JSON, normalized by each audit module. The production
//! implementation shells out to the `az` CLI ([`AzCliClient`]); tests supply
//! an in-memory implementation.

pub mod cli_client;

pub use cli_client::{AzCliClient, build_graph_query, classify_failure};

use crate::audit::types::{ResourceGroupInfo, ResourceKind, SubscriptionInfo, Tags};
use crate::error::TransportError;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;

/// Resource graph query scope.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceQuery {
    pub subscription: String,
    /// Empty means every group in the subscription
    pub resource_groups: Vec<String>,
    /// Empty means every kind
    pub kinds: Vec<ResourceKind>,
    /// Restrict to these resource ids; empty means no restriction
    pub ids: Vec<String>,
}

impl ResourceQuery {
    pub fn subscription(subscription: impl Into<String>) -> Self {
        Self {
            subscription: subscription.into(),
            ..Self::default()
        }
    }

    pub fn with_groups(mut self, groups: &[String]) -> Self {
        self.resource_groups = groups.to_vec();
        self
    }

    pub fn with_kinds(mut self, kinds: &[ResourceKind]) -> Self {
        self.kinds = kinds.to_vec();
        self
    }

    pub fn with_ids(mut self, ids: &[String]) -> Self {
        self.ids = ids.to_vec();
        self
    }
}

/// Inclusive date range for a cost query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CostWindow {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl CostWindow {
    pub fn days(&self) -> i64 {
        (self.to - self.from).num_days() + 1
    }
}

/// Tabular cost query result: named columns and positional rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CostTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl CostTable {
    /// Index of a column, ignoring case.
    pub fn column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.eq_ignore_ascii_case(name))
    }
}

/// Activity log query window.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityQuery {
    pub subscription: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub max_events: u32,
}

#[async_trait]
pub trait AzureApi: Send + Sync {
    /// Look up a subscription the caller can access.
    async fn show_subscription(&self, subscription: &str)
    -> Result<SubscriptionInfo, TransportError>;

    async fn list_resource_groups(
        &self,
        subscription: &str,
    ) -> Result<Vec<ResourceGroupInfo>, TransportError>;

    /// Resource graph rows (`id`, `name`, `type`, `properties`, ...).
    async fn query_resources(&self, query: &ResourceQuery) -> Result<Vec<Value>, TransportError>;

    /// Daily actual cost grouped by resource.
    async fn query_costs(
        &self,
        subscription: &str,
        window: &CostWindow,
    ) -> Result<CostTable, TransportError>;

    /// Raw activity log events.
    async fn list_activity(&self, query: &ActivityQuery) -> Result<Vec<Value>, TransportError>;

    /// Merge tags onto a resource, keeping existing ones.
    async fn merge_tags(&self, resource_id: &str, tags: &Tags) -> Result<(), TransportError>;
}
