//! Cost Analysis.
//!
//! Pulls daily metered cost per resource for a reporting window and sums it
//! per resource. When the cost API is unavailable the module degrades to a
//! size/SKU estimate for VMs and storage accounts; every estimated row is
//! marked [`CostSource::Estimated`] and never mixed with metered rows.

use super::inventory::ResourceFetcher;
use super::lookup_by_prefix;
use super::types::{
    ArmId, CostImpact, CostRecord, CostSource, Identified, ResourceCost, ResourceKey,
    ResourceKind, ResourceRecord,
};
use crate::azure::{AzureApi, CostTable, CostWindow};
use crate::config::CostPolicy;
use crate::error::{AuditError, Result, TransportError};
use chrono::{Datelike, Days, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Reporting window selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum TimePeriod {
    #[default]
    MonthToDate,
    LastMonth,
    Custom,
}

impl TimePeriod {
    /// Resolve to concrete dates. `Custom` needs both bounds.
    pub fn window(
        &self,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
        today: NaiveDate,
    ) -> Result<CostWindow> {
        match self {
            TimePeriod::MonthToDate => Ok(CostWindow {
                from: first_of_month(today),
                to: today,
            }),
            TimePeriod::LastMonth => {
                let end = first_of_month(today)
                    .checked_sub_days(Days::new(1))
                    .ok_or_else(|| AuditError::validation("date out of range"))?;
                Ok(CostWindow {
                    from: first_of_month(end),
                    to: end,
                })
            }
            TimePeriod::Custom => {
                let (Some(from), Some(to)) = (from, to) else {
                    return Err(AuditError::validation(
                        "--time-period custom requires both --from and --to",
                    ));
                };
                if from > to {
                    return Err(AuditError::validation(format!(
                        "--from {} is after --to {}",
                        from, to
                    )));
                }
                Ok(CostWindow { from, to })
            }
        }
    }
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

#[derive(Debug, Clone, PartialEq)]
pub struct CostOutcome {
    pub records: Vec<CostRecord>,
    pub aggregate: Vec<ResourceCost>,
    /// Why the module fell back to estimates, if it did
    pub degraded: Option<String>,
}

pub struct CostAnalyzer<'a> {
    api: &'a dyn AzureApi,
    policy: &'a CostPolicy,
}

impl<'a> CostAnalyzer<'a> {
    pub fn new(api: &'a dyn AzureApi, policy: &'a CostPolicy) -> Self {
        Self { api, policy }
    }

    /// Metered cost for the window, or estimates when the cost API fails.
    ///
    /// `inventory` feeds the estimate; without it the VMs and storage
    /// accounts are fetched on demand. Failing that fetch fails the module.
    pub async fn run(
        &self,
        subscription: &str,
        resource_groups: &[String],
        window: CostWindow,
        inventory: Option<&[ResourceRecord]>,
    ) -> Result<CostOutcome> {
        log::info!("Cost analysis for {} to {}", window.from, window.to);

        let metered = self
            .api
            .query_costs(subscription, &window)
            .await
            .and_then(|table| parse_cost_table(&table, subscription, &self.policy.currency));

        let (records, degraded) = match metered {
            Ok(records) => (filter_by_groups(records, resource_groups), None),
            Err(err) => {
                log::warn!(
                    "Cost query failed ({}); falling back to size/SKU estimates",
                    err
                );
                let resources = match inventory {
                    Some(resources) => resources.to_vec(),
                    None => {
                        ResourceFetcher::new(self.api)
                            .fetch_resources(
                                subscription,
                                resource_groups,
                                &[ResourceKind::VirtualMachine, ResourceKind::StorageAccount],
                            )
                            .await?
                    }
                };
                let estimates = estimate_costs(&resources, self.policy, &window);
                (
                    estimates,
                    Some(format!("cost API unavailable, estimates used: {}", err)),
                )
            }
        };

        let aggregate = aggregate_costs(&records, self.policy);
        log::info!(
            "Cost analysis: {} rows across {} resources",
            records.len(),
            aggregate.len()
        );
        Ok(CostOutcome {
            records,
            aggregate,
            degraded,
        })
    }
}

fn filter_by_groups(records: Vec<CostRecord>, groups: &[String]) -> Vec<CostRecord> {
    if groups.is_empty() {
        return records;
    }
    records
        .into_iter()
        .filter(|r| groups.iter().any(|g| g.eq_ignore_ascii_case(&r.resource_group)))
        .collect()
}

/// Turn the cost API table into records. Columns are located by name.
pub fn parse_cost_table(
    table: &CostTable,
    subscription: &str,
    default_currency: &str,
) -> std::result::Result<Vec<CostRecord>, TransportError> {
    let cost_col = ["PreTaxCost", "Cost", "CostUSD"]
        .iter()
        .find_map(|c| table.column(c))
        .ok_or_else(|| TransportError::Parse("cost table has no cost column".into()))?;
    let id_col = table
        .column("ResourceId")
        .ok_or_else(|| TransportError::Parse("cost table has no ResourceId column".into()))?;
    let date_col = table.column("UsageDate");
    let type_col = table.column("ResourceType");
    let location_col = table.column("ResourceLocation");
    let charge_col = table.column("ChargeType");
    let currency_col = table.column("Currency");

    let cell = |row: &[Value], col: Option<usize>| -> String {
        col.and_then(|i| row.get(i))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    let mut records = Vec::with_capacity(table.rows.len());
    for row in &table.rows {
        let Some(date) = date_col.and_then(|i| row.get(i)).and_then(parse_usage_date) else {
            log::warn!("Skipping cost row without a usable date: {:?}", row);
            continue;
        };

        let resource_id = cell(row, Some(id_col));
        let parsed = ArmId::parse(&resource_id);
        let resource_type = match cell(row, type_col) {
            t if !t.is_empty() => t.to_ascii_lowercase(),
            _ => parsed
                .as_ref()
                .map(|p| p.resource_type.to_ascii_lowercase())
                .unwrap_or_default(),
        };
        let currency = match cell(row, currency_col) {
            c if !c.is_empty() => c,
            _ => default_currency.to_string(),
        };

        records.push(CostRecord {
            date,
            subscription_id: parsed
                .as_ref()
                .map(|p| p.subscription_id.clone())
                .unwrap_or_else(|| subscription.to_string()),
            resource_group: parsed
                .as_ref()
                .map(|p| p.resource_group.clone())
                .unwrap_or_default(),
            name: parsed.as_ref().map(|p| p.name.clone()).unwrap_or_default(),
            resource_id,
            resource_type,
            location: cell(row, location_col),
            charge_type: cell(row, charge_col),
            cost: parse_amount(row.get(cost_col)),
            currency,
            source: CostSource::Metered,
        });
    }
    Ok(records)
}

/// Non-negative amount. Missing or unparseable values count as zero.
fn parse_amount(value: Option<&Value>) -> f64 {
    let amount = match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };
    if amount.is_finite() { amount.max(0.0) } else { 0.0 }
}

/// `UsageDate` arrives as a `yyyymmdd` number or an ISO date string.
fn parse_usage_date(value: &Value) -> Option<NaiveDate> {
    match value {
        Value::Number(n) => {
            NaiveDate::parse_from_str(&n.as_u64()?.to_string(), "%Y%m%d").ok()
        }
        Value::String(s) => {
            let s = s.trim();
            NaiveDate::parse_from_str(s.get(..10).unwrap_or(s), "%Y-%m-%d")
                .or_else(|_| NaiveDate::parse_from_str(s, "%Y%m%d"))
                .ok()
        }
        _ => None,
    }
}

/// Low-confidence estimates for VMs and storage accounts, prorated to the window.
pub fn estimate_costs(
    resources: &[ResourceRecord],
    policy: &CostPolicy,
    window: &CostWindow,
) -> Vec<CostRecord> {
    let scale = window.days() as f64 / 30.0;
    resources
        .iter()
        .filter_map(|resource| {
            let monthly = match resource.kind() {
                ResourceKind::VirtualMachine => resource
                    .size
                    .as_deref()
                    .and_then(|size| lookup_by_prefix(&policy.vm_monthly_estimates, size))
                    .copied()
                    .unwrap_or(policy.vm_default_estimate),
                ResourceKind::StorageAccount => resource
                    .sku
                    .as_deref()
                    .and_then(|sku| {
                        policy
                            .storage_monthly_estimates
                            .iter()
                            .find(|(k, _)| k.eq_ignore_ascii_case(sku))
                            .map(|(_, v)| *v)
                    })
                    .unwrap_or(policy.storage_default_estimate),
                _ => return None,
            };
            Some(CostRecord {
                date: window.to,
                resource_id: resource.resource_id.clone(),
                subscription_id: resource.subscription_id.clone(),
                resource_group: resource.resource_group.clone(),
                name: resource.name.clone(),
                resource_type: resource.resource_type.clone(),
                location: resource.location.clone(),
                charge_type: "Estimate".to_string(),
                cost: round_cents(monthly * scale),
                currency: policy.currency.clone(),
                source: CostSource::Estimated,
            })
        })
        .collect()
}

fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

/// Sum cost per resource and currency, and flag totals against the
/// thresholds. A resource billed in several currencies gets one row each.
///
/// Sorted by total, largest first.
pub fn aggregate_costs(records: &[CostRecord], policy: &CostPolicy) -> Vec<ResourceCost> {
    let mut by_resource: BTreeMap<(ResourceKey, String), ResourceCost> = BTreeMap::new();
    for record in records {
        let entry = by_resource
            .entry((record.key(), record.currency.to_ascii_uppercase()))
            .or_insert_with(|| ResourceCost {
                resource_id: record.resource_id.clone(),
                resource_group: record.resource_group.clone(),
                name: record.name.clone(),
                resource_type: record.resource_type.clone(),
                total_cost: 0.0,
                currency: record.currency.clone(),
                record_count: 0,
                cost_flag: CostImpact::Low,
                source: record.source,
            });
        entry.total_cost += record.cost.max(0.0);
        entry.record_count += 1;
        if record.source == CostSource::Estimated {
            entry.source = CostSource::Estimated;
        }
    }

    let currencies: BTreeSet<&str> = by_resource.keys().map(|(_, c)| c.as_str()).collect();
    if currencies.len() > 1 {
        log::warn!(
            "Cost rows use several currencies ({}); totals are kept per currency",
            currencies.into_iter().collect::<Vec<_>>().join(", ")
        );
    }

    let mut aggregate: Vec<ResourceCost> = by_resource
        .into_values()
        .map(|mut cost| {
            cost.cost_flag = flag_for(cost.total_cost, policy);
            cost
        })
        .collect();
    aggregate.sort_by(|a, b| {
        b.total_cost
            .total_cmp(&a.total_cost)
            .then_with(|| a.resource_id.cmp(&b.resource_id))
    });
    aggregate
}

pub fn flag_for(total: f64, policy: &CostPolicy) -> CostImpact {
    if total > policy.high_threshold {
        CostImpact::High
    } else if total > policy.medium_threshold {
        CostImpact::Medium
    } else {
        CostImpact::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::types::Tags;
    use serde_json::json;

    const DISK: &str = "/subscriptions/s/resourceGroups/rg-app/providers/Microsoft.Compute/disks/d1";
    const VM: &str = "/subscriptions/s/resourceGroups/RG-DATA/providers/Microsoft.Compute/virtualMachines/vm1";

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn table() -> CostTable {
        CostTable {
            columns: vec![
                "PreTaxCost".into(),
                "UsageDate".into(),
                "ResourceId".into(),
                "ResourceType".into(),
                "ResourceLocation".into(),
                "ChargeType".into(),
                "Currency".into(),
            ],
            rows: vec![
                vec![json!(12.5), json!(20240301), json!(DISK), json!("Microsoft.Compute/disks"), json!("eastus"), json!("Usage"), json!("USD")],
                vec![json!(7.5), json!(20240302), json!(DISK), json!("Microsoft.Compute/disks"), json!("eastus"), json!("Usage"), json!("USD")],
                vec![json!(-3.0), json!(20240302), json!(VM), json!(""), json!("eastus"), json!("Refund"), json!("USD")],
                vec![json!(null), json!("2024-03-03T00:00:00"), json!(VM), json!(""), json!("eastus"), json!("Usage"), json!("")],
            ],
        }
    }

    fn vm(size: &str) -> ResourceRecord {
        ResourceRecord {
            resource_id: VM.into(),
            subscription_id: "s".into(),
            resource_group: "RG-DATA".into(),
            name: "vm1".into(),
            resource_type: "microsoft.compute/virtualmachines".into(),
            location: "eastus".into(),
            created_at: None,
            provisioning_state: None,
            power_state: None,
            sku: None,
            size: Some(size.into()),
            disk_size_gb: None,
            attached_to: None,
            consumer_count: None,
            source_id: None,
            tags: Tags::new(),
        }
    }

    #[test]
    fn test_parse_table_clamps_and_defaults() {
        let records = parse_cost_table(&table(), "s", "EUR").unwrap();
        assert_eq!(records.len(), 4);
        assert_eq!(records[0].date, date(2024, 3, 1));
        assert_eq!(records[0].name, "d1");
        assert_eq!(records[0].resource_group, "rg-app");
        assert_eq!(records[2].cost, 0.0);
        assert_eq!(records[2].resource_type, "microsoft.compute/virtualmachines");
        assert_eq!(records[3].cost, 0.0);
        assert_eq!(records[3].date, date(2024, 3, 3));
        assert_eq!(records[3].currency, "EUR");
        assert!(records.iter().all(|r| r.source == CostSource::Metered));
    }

    #[test]
    fn test_parse_table_requires_cost_column() {
        let table = CostTable {
            columns: vec!["ResourceId".into()],
            rows: vec![],
        };
        assert!(matches!(
            parse_cost_table(&table, "s", "USD"),
            Err(TransportError::Parse(_))
        ));
    }

    #[test]
    fn test_aggregate_sums_per_resource() {
        let policy = CostPolicy {
            high_threshold: 15.0,
            medium_threshold: 5.0,
            ..CostPolicy::default()
        };
        let records = parse_cost_table(&table(), "s", "USD").unwrap();
        let aggregate = aggregate_costs(&records, &policy);
        assert_eq!(aggregate.len(), 2);
        assert_eq!(aggregate[0].name, "d1");
        assert_eq!(aggregate[0].total_cost, 20.0);
        assert_eq!(aggregate[0].record_count, 2);
        assert_eq!(aggregate[0].cost_flag, CostImpact::High);
        assert_eq!(aggregate[1].total_cost, 0.0);
        assert_eq!(aggregate[1].cost_flag, CostImpact::Low);
    }

    #[test]
    fn test_aggregate_keeps_currencies_apart() {
        let records = parse_cost_table(&table(), "s", "USD").unwrap();
        let mut euro = records[0].clone();
        euro.cost = 4.0;
        euro.currency = "eur".into();
        let mut records = records;
        records.push(euro);

        let aggregate = aggregate_costs(&records, &CostPolicy::default());
        let disk: Vec<_> = aggregate.iter().filter(|c| c.name == "d1").collect();
        assert_eq!(disk.len(), 2);
        assert_eq!(disk[0].currency, "USD");
        assert_eq!(disk[0].total_cost, 20.0);
        assert_eq!(disk[1].currency, "eur");
        assert_eq!(disk[1].total_cost, 4.0);
    }

    #[test]
    fn test_filter_by_groups_ignores_case() {
        let records = parse_cost_table(&table(), "s", "USD").unwrap();
        let filtered = filter_by_groups(records, &["rg-data".to_string()]);
        assert_eq!(filtered.len(), 2);
        assert!(filtered.iter().all(|r| r.name == "vm1"));
    }

    #[test]
    fn test_estimates_are_prorated_and_marked() {
        let policy = CostPolicy::default();
        let window = CostWindow {
            from: date(2024, 4, 1),
            to: date(2024, 4, 15),
        };
        let records = estimate_costs(&[vm("Standard_D4s_v3"), vm("Basic_A1")], &policy, &window);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].cost, 70.0);
        assert_eq!(records[1].cost, 50.0);
        assert!(records.iter().all(|r| r.source == CostSource::Estimated));

        let aggregate = aggregate_costs(&records, &policy);
        assert!(aggregate.iter().all(|a| a.source == CostSource::Estimated));
    }

    #[test]
    fn test_time_period_windows() {
        let today = date(2024, 3, 15);
        let mtd = TimePeriod::MonthToDate.window(None, None, today).unwrap();
        assert_eq!((mtd.from, mtd.to), (date(2024, 3, 1), today));

        let last = TimePeriod::LastMonth.window(None, None, date(2024, 1, 10)).unwrap();
        assert_eq!((last.from, last.to), (date(2023, 12, 1), date(2023, 12, 31)));

        let custom = TimePeriod::Custom
            .window(Some(date(2024, 2, 1)), Some(date(2024, 2, 10)), today)
            .unwrap();
        assert_eq!(custom.days(), 10);

        let err = TimePeriod::Custom.window(Some(date(2024, 2, 1)), None, today).unwrap_err();
        assert_eq!(err.exit_code(), 3);
        assert!(TimePeriod::Custom
            .window(Some(date(2024, 2, 10)), Some(date(2024, 2, 1)), today)
            .is_err());
    }
}
