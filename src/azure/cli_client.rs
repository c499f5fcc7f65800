//! `az` CLI transport.
//!
//! Every call runs `az ... --output json` and goes through the injected
//! [`RetryPolicy`]. Failures are classified from stderr so authorization
//! problems are never retried and transient ones are.

use super::{ActivityQuery, AzureApi, CostTable, CostWindow, ResourceQuery};
use crate::audit::types::{ResourceGroupInfo, SubscriptionInfo, Tags};
use crate::common::retry::RetryPolicy;
use crate::error::TransportError;
use async_trait::async_trait;
use regex::Regex;
use serde_json::{Value, json};
use std::sync::LazyLock;
use tokio::process::Command;

const MANAGEMENT_ENDPOINT: &str = "https://management.azure.com";
const COST_API_VERSION: &str = "2023-03-01";
const GRAPH_PAGE_SIZE: u32 = 1000;

/// Retryable HTTP status codes, only where they read as a status: `(503)`,
/// `status code 503`, `HTTP 429`. Bare digits inside ids and GUIDs do not count.
static TRANSIENT_STATUS_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\(\s*(429|502|503|504)\s*\)|\b(status(\s+code)?|http)[\s:='\x22]*(429|502|503|504)\b")
        .unwrap()
});

pub struct AzCliClient {
    program: String,
    retry: RetryPolicy,
}

impl AzCliClient {
    pub fn new(retry: RetryPolicy) -> Self {
        Self::with_program("az", retry)
    }

    /// Use a different executable (e.g. a wrapper script).
    pub fn with_program(program: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            program: program.into(),
            retry,
        }
    }

    async fn run_json(&self, label: &str, args: Vec<String>) -> Result<Value, TransportError> {
        self.retry.run(label, || self.invoke(&args)).await
    }

    async fn invoke(&self, args: &[String]) -> Result<Value, TransportError> {
        log::trace!("{} {}", self.program, args.join(" "));
        // a module timeout drops this future; the child must not outlive it
        let output = Command::new(&self.program)
            .args(args)
            .args(["--output", "json"])
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| TransportError::Spawn(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(&stderr));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&stdout).map_err(|e| TransportError::Parse(e.to_string()))
    }
}

#[async_trait]
impl AzureApi for AzCliClient {
    async fn show_subscription(
        &self,
        subscription: &str,
    ) -> Result<SubscriptionInfo, TransportError> {
        let value = self
            .run_json(
                "account show",
                args(&["account", "show", "--subscription", subscription]),
            )
            .await?;
        Ok(SubscriptionInfo {
            id: str_field(&value, "id"),
            name: str_field(&value, "name"),
            state: str_field(&value, "state"),
        })
    }

    async fn list_resource_groups(
        &self,
        subscription: &str,
    ) -> Result<Vec<ResourceGroupInfo>, TransportError> {
        let value = self
            .run_json(
                "group list",
                args(&["group", "list", "--subscription", subscription]),
            )
            .await?;
        let groups = as_array(value, "group list")?
            .iter()
            .map(|g| ResourceGroupInfo {
                name: str_field(g, "name"),
                location: str_field(g, "location"),
                tags: Tags::from_json(&g["tags"]),
            })
            .collect();
        Ok(groups)
    }

    async fn query_resources(&self, query: &ResourceQuery) -> Result<Vec<Value>, TransportError> {
        let graph_query = build_graph_query(query);
        let mut rows = Vec::new();
        let mut skip_token: Option<String> = None;

        loop {
            let mut call = args(&[
                "graph",
                "query",
                "-q",
                &graph_query,
                "--subscriptions",
                &query.subscription,
                "--first",
                &GRAPH_PAGE_SIZE.to_string(),
            ]);
            if let Some(token) = &skip_token {
                call.push("--skip-token".to_string());
                call.push(token.clone());
            }

            let page = self.run_json("graph query", call).await?;
            match page.get("data") {
                Some(Value::Array(data)) => rows.extend(data.iter().cloned()),
                _ => {
                    return Err(TransportError::Parse(
                        "graph query response has no data array".to_string(),
                    ));
                }
            }

            skip_token = page
                .get("skip_token")
                .or_else(|| page.get("$skipToken"))
                .and_then(Value::as_str)
                .map(str::to_string);
            if skip_token.is_none() {
                break;
            }
        }

        log::debug!("Resource graph returned {} rows", rows.len());
        Ok(rows)
    }

    async fn query_costs(
        &self,
        subscription: &str,
        window: &CostWindow,
    ) -> Result<CostTable, TransportError> {
        let body = json!({
            "type": "ActualCost",
            "timeframe": "Custom",
            "timePeriod": {
                "from": format!("{}T00:00:00Z", window.from),
                "to": format!("{}T23:59:59Z", window.to),
            },
            "dataset": {
                "granularity": "Daily",
                "aggregation": {
                    "totalCost": { "name": "PreTaxCost", "function": "Sum" }
                },
                "grouping": [
                    { "type": "Dimension", "name": "ResourceId" },
                    { "type": "Dimension", "name": "ResourceType" },
                    { "type": "Dimension", "name": "ResourceLocation" },
                    { "type": "Dimension", "name": "ChargeType" }
                ]
            }
        })
        .to_string();

        let mut url = Some(format!(
            "{}/subscriptions/{}/providers/Microsoft.CostManagement/query?api-version={}",
            MANAGEMENT_ENDPOINT, subscription, COST_API_VERSION
        ));
        let mut table = CostTable::default();

        while let Some(next) = url.take() {
            let page = self
                .run_json(
                    "cost query",
                    args(&["rest", "--method", "post", "--url", &next, "--body", &body]),
                )
                .await?;
            let properties = &page["properties"];

            if table.columns.is_empty() {
                table.columns = properties["columns"]
                    .as_array()
                    .map(|cols| cols.iter().map(|c| str_field(c, "name")).collect())
                    .unwrap_or_default();
            }
            if let Some(rows) = properties["rows"].as_array() {
                table.rows.extend(
                    rows.iter()
                        .filter_map(|r| r.as_array().cloned()),
                );
            }

            url = properties["nextLink"]
                .as_str()
                .filter(|s| !s.is_empty())
                .map(str::to_string);
        }

        Ok(table)
    }

    async fn list_activity(&self, query: &ActivityQuery) -> Result<Vec<Value>, TransportError> {
        let value = self
            .run_json(
                "activity-log list",
                args(&[
                    "monitor",
                    "activity-log",
                    "list",
                    "--subscription",
                    &query.subscription,
                    "--start-time",
                    &query.start.to_rfc3339(),
                    "--end-time",
                    &query.end.to_rfc3339(),
                    "--max-events",
                    &query.max_events.to_string(),
                ]),
            )
            .await?;
        as_array(value, "activity-log list")
    }

    async fn merge_tags(&self, resource_id: &str, tags: &Tags) -> Result<(), TransportError> {
        let mut call = args(&[
            "tag",
            "update",
            "--resource-id",
            resource_id,
            "--operation",
            "Merge",
            "--tags",
        ]);
        call.extend(tags.iter().map(|(k, v)| format!("{}={}", k, v)));
        self.run_json("tag update", call).await?;
        Ok(())
    }
}

/// Kusto query for the resource graph.
pub fn build_graph_query(query: &ResourceQuery) -> String {
    let mut lines = vec![
        "Resources".to_string(),
        format!("| where subscriptionId =~ '{}'", escape_kql(&query.subscription)),
    ];

    if !query.resource_groups.is_empty() {
        lines.push(format!(
            "| where resourceGroup in~ ({})",
            quoted_list(query.resource_groups.iter().map(String::as_str))
        ));
    }

    let types: Vec<&str> = query.kinds.iter().filter_map(|k| k.arm_type()).collect();
    if !types.is_empty() {
        lines.push(format!("| where type in~ ({})", quoted_list(types.into_iter())));
    }

    if !query.ids.is_empty() {
        lines.push(format!(
            "| where id in~ ({})",
            quoted_list(query.ids.iter().map(String::as_str))
        ));
    }

    lines.push(
        "| project id, name, type, resourceGroup, location, subscriptionId, tags, sku, managedBy, properties"
            .to_string(),
    );
    lines.join("\n")
}

/// Map `az` stderr onto a transport error category.
pub fn classify_failure(stderr: &str) -> TransportError {
    let lower = stderr.to_ascii_lowercase();
    let summary = stderr
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("az exited with an error")
        .to_string();

    const AUTH: &[&str] = &[
        "authorizationfailed",
        "does not have authorization",
        "az login",
        "aadsts",
        "forbidden",
        "insufficient privileges",
        "invalidauthenticationtoken",
    ];
    const NOT_FOUND: &[&str] = &[
        "resourcegroupnotfound",
        "subscriptionnotfound",
        "resourcenotfound",
        "could not be found",
        "was not found",
    ];
    const TRANSIENT: &[&str] = &[
        "timed out",
        "timeout",
        "too many requests",
        "throttl",
        "serviceunavailable",
        "service unavailable",
        "internalservererror",
        "gatewaytimeout",
        "bad gateway",
        "connection reset",
        "connection aborted",
        "temporarily unavailable",
    ];

    if AUTH.iter().any(|p| lower.contains(p)) {
        TransportError::Auth(summary)
    } else if NOT_FOUND.iter().any(|p| lower.contains(p)) {
        TransportError::NotFound(summary)
    } else if TRANSIENT.iter().any(|p| lower.contains(p))
        || TRANSIENT_STATUS_REGEX.is_match(stderr)
    {
        TransportError::Transient(summary)
    } else {
        TransportError::CommandFailed(summary)
    }
}

fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

fn as_array(value: Value, label: &str) -> Result<Vec<Value>, TransportError> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Null => Ok(Vec::new()),
        other => Err(TransportError::Parse(format!(
            "{} returned {} instead of an array",
            label,
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn str_field(value: &Value, key: &str) -> String {
    value[key].as_str().unwrap_or_default().to_string()
}

fn escape_kql(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

fn quoted_list<'a>(items: impl Iterator<Item = &'a str>) -> String {
    items
        .map(|i| format!("'{}'", escape_kql(i)))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::types::ResourceKind;

    #[test]
    fn test_graph_query_scopes() {
        let query = ResourceQuery::subscription("sub-1")
            .with_groups(&["rg-a".to_string(), "rg-'b".to_string()])
            .with_kinds(&[ResourceKind::Disk, ResourceKind::Other]);
        let kql = build_graph_query(&query);
        assert!(kql.starts_with("Resources\n| where subscriptionId =~ 'sub-1'"));
        assert!(kql.contains("| where resourceGroup in~ ('rg-a', 'rg-\\'b')"));
        assert!(kql.contains("| where type in~ ('microsoft.compute/disks')"));
        assert!(kql.contains("managedBy"));
    }

    #[test]
    fn test_graph_query_unfiltered() {
        let kql = build_graph_query(&ResourceQuery::subscription("s"));
        assert!(!kql.contains("resourceGroup in~"));
        assert!(!kql.contains("type in~"));
    }

    #[test]
    fn test_classify_failure() {
        assert!(matches!(
            classify_failure("ERROR: (AuthorizationFailed) The client does not have authorization"),
            TransportError::Auth(_)
        ));
        assert!(matches!(
            classify_failure("Please run 'az login' to setup account."),
            TransportError::Auth(_)
        ));
        assert!(matches!(
            classify_failure("ERROR: (ResourceGroupNotFound) Resource group 'x' could not be found."),
            TransportError::NotFound(_)
        ));
        assert!(matches!(
            classify_failure("ERROR: Operation returned an invalid status 'Too Many Requests'"),
            TransportError::Transient(_)
        ));
        assert!(matches!(
            classify_failure("ERROR: (ServiceUnavailable) try later"),
            TransportError::Transient(_)
        ));
        match classify_failure("\nERROR: unrecognized arguments: --bogus\nusage: az") {
            TransportError::CommandFailed(msg) => {
                assert_eq!(msg, "ERROR: unrecognized arguments: --bogus")
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_status_codes_need_http_context() {
        for stderr in [
            "ERROR: (429) Rate limit is exceeded",
            "ERROR: Operation returned an invalid status code 503",
            "ERROR: HTTP 502 from management endpoint",
        ] {
            assert!(
                matches!(classify_failure(stderr), TransportError::Transient(_)),
                "{}",
                stderr
            );
        }
        for stderr in [
            "ERROR: (InvalidTemplate) Deployment for vm-503 failed validation",
            "ERROR: (LinkedInvalidPropertyId) /subscriptions/5a429b1e-0502-4f03-8504-42950310aa11/resourceGroups/rg is malformed",
        ] {
            assert!(
                matches!(classify_failure(stderr), TransportError::CommandFailed(_)),
                "{}",
                stderr
            );
        }
    }

    #[test]
    fn test_as_array_accepts_null() {
        assert!(as_array(Value::Null, "x").unwrap().is_empty());
        assert!(as_array(json!({"a": 1}), "x").is_err());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_abandoned_call_kills_child() {
        use std::os::unix::fs::PermissionsExt;
        use std::time::Duration;

        let dir = tempfile::TempDir::new().unwrap();
        let pid_file = dir.path().join("pid");
        let script = dir.path().join("slow-az");
        std::fs::write(
            &script,
            format!("#!/bin/sh\necho $$ > '{}'\nexec sleep 30\n", pid_file.display()),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let client = AzCliClient::with_program(script.to_string_lossy(), RetryPolicy::no_retry());
        let call = client.show_subscription("s");
        assert!(tokio::time::timeout(Duration::from_millis(500), call).await.is_err());

        let pid = std::fs::read_to_string(&pid_file).unwrap().trim().to_string();
        tokio::time::sleep(Duration::from_millis(200)).await;
        // gone, or a zombie awaiting reaping; never still sleeping
        let state = std::fs::read_to_string(format!("/proc/{}/stat", pid)).unwrap_or_default();
        let running = state
            .rsplit(')')
            .next()
            .and_then(|rest| rest.split_whitespace().next())
            .is_some_and(|s| s != "Z" && s != "X");
        assert!(!running, "child still alive: {}", state);
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let client = AzCliClient::with_program("az-does-not-exist-7731", RetryPolicy::no_retry());
        let err = client.show_subscription("s").await.unwrap_err();
        assert!(matches!(err, TransportError::Spawn(_)));
    }
}
