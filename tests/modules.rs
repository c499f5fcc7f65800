mod common;

use azure_audit::audit::activity::resolve_creator;
use azure_audit::audit::types::{EventSource, OrphanCategory, Recommendation, Tags};
use azure_audit::audit::cleanup::CleanupTargets;
use azure_audit::audit::inventory::InventoryRequest;
use azure_audit::audit::{
    ActivityTracker, AuditOptions, CleanupEngine, CleanupInputs, CleanupOptions, CostAnalyzer,
    Orchestrator, OrphanDetector, ResourceFetcher, new_run_id,
};
use azure_audit::azure::CostWindow;
use azure_audit::common::report::{ReportWriter, read_report};
use azure_audit::config::{Config, ReportFormat};
use azure_audit::error::TransportError;
use chrono::{NaiveDate, TimeZone, Utc};
use common::{FakeAzure, SUB, disk, resource_id, snapshot, vm};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

#[test]
fn test_created_by_tag_beats_owner_tag() {
    let mut tags = Tags::new();
    tags.insert("CreatedBy", "alice");
    tags.insert("Owner", "bob");
    assert_eq!(resolve_creator(&tags), "alice");
}

#[tokio::test]
async fn test_activity_falls_back_to_tags_when_log_unavailable() {
    let mut fake = FakeAzure::new(&["rg-app"]).with_resource(json!({
        "id": resource_id("rg-app", "Microsoft.Storage/storageAccounts", "files"),
        "name": "files",
        "type": "Microsoft.Storage/storageAccounts",
        "resourceGroup": "rg-app",
        "location": "westeurope",
        "subscriptionId": SUB,
        "properties": { "creationTime": "2023-02-01T10:00:00Z" },
        "tags": { "CreatedBy": "alice", "Owner": "bob" }
    }));
    fake.activity = Err(TransportError::Auth("AuthorizationFailed".into()));

    let config = Config::default();
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
    let outcome = ActivityTracker::new(&fake, &config.activity)
        .run(SUB, &[], 30, now, None)
        .await
        .unwrap();

    assert!(outcome.degraded.is_some());
    assert_eq!(outcome.events.len(), 1);
    assert_eq!(outcome.events[0].source, EventSource::Inferred);
    assert_eq!(outcome.creators[0].caller, "alice");
    assert_eq!(outcome.histories[0].created_by, "alice");
}

#[tokio::test]
async fn test_activity_log_events_are_summarized() {
    let mut fake = FakeAzure::new(&["rg-app"]);
    let disk_id = resource_id("rg-app", "Microsoft.Compute/disks", "d1");
    fake.activity = Ok(vec![
        json!({
            "eventTimestamp": "2024-05-01T09:00:00Z",
            "operationName": { "value": "Microsoft.Compute/disks/write" },
            "status": { "value": "Succeeded" },
            "caller": "carol@example.com",
            "resourceId": disk_id,
            "resourceGroupName": "rg-app",
            "resourceType": { "value": "Microsoft.Compute/disks" },
            "subscriptionId": SUB
        }),
        json!({
            "eventTimestamp": "2024-05-02T09:00:00Z",
            "operationName": { "value": "Microsoft.Compute/disks/delete" },
            "status": { "value": "Failed" },
            "caller": "dave@example.com",
            "resourceId": disk_id,
            "resourceGroupName": "rg-app",
            "resourceType": { "value": "Microsoft.Compute/disks" },
            "subscriptionId": SUB
        }),
    ]);

    let config = Config::default();
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
    let outcome = ActivityTracker::new(&fake, &config.activity)
        .run(SUB, &[], 90, now, None)
        .await
        .unwrap();

    assert!(outcome.degraded.is_none());
    assert_eq!(outcome.events.len(), 2);
    let dave = outcome
        .creators
        .iter()
        .find(|c| c.caller == "dave@example.com")
        .unwrap();
    // failed operations count toward the total only
    assert_eq!(dave.total_operations, 1);
    assert_eq!(dave.deletions, 0);
    let history = outcome
        .histories
        .iter()
        .find(|h| h.name == "d1")
        .unwrap();
    assert_eq!(history.created_by, "carol@example.com");
}

#[tokio::test]
async fn test_days_back_above_retention_is_rejected() {
    let fake = FakeAzure::new(&["rg-app"]);
    let config = Config::default();
    let err = ActivityTracker::new(&fake, &config.activity)
        .run(SUB, &[], 91, Utc::now(), None)
        .await
        .unwrap_err();
    assert_eq!(err.exit_code(), 3);
    assert!(!fake.called("list_activity"));
}

#[tokio::test]
async fn test_standalone_orphans_include_empty_groups() {
    let fake = FakeAzure::new(&["rg-app", "rg-idle"])
        .with_resource(disk("rg-app", "d1", 200, None))
        .with_resource(vm("rg-app", "web", "Standard_B2s", "PowerState/running"));
    let request = InventoryRequest::new(SUB, vec![]);
    let (_, groups) = ResourceFetcher::new(&fake)
        .resolve_scope(&request)
        .await
        .unwrap();

    let config = Config::default();
    let outcome = OrphanDetector::new(&config.orphans)
        .run_standalone(&fake, SUB, &[], &groups)
        .await
        .unwrap();

    assert!(outcome.degraded().is_none());
    let categories: Vec<OrphanCategory> = outcome.findings.iter().map(|f| f.category).collect();
    assert_eq!(
        categories,
        vec![
            OrphanCategory::UnattachedDisk,
            OrphanCategory::EmptyResourceGroup
        ]
    );
    assert_eq!(outcome.findings[1].name, "rg-idle");
}

#[tokio::test]
async fn test_standalone_cost_uses_metered_rows() {
    let mut fake = FakeAzure::new(&["rg-app"]);
    let vm_id = resource_id("rg-app", "Microsoft.Compute/virtualMachines", "web");
    fake.costs = Ok(azure_audit::azure::CostTable {
        columns: vec![
            "PreTaxCost".into(),
            "UsageDate".into(),
            "ResourceId".into(),
            "Currency".into(),
        ],
        rows: vec![
            vec![json!(700.0), json!(20240501), json!(vm_id), json!("USD")],
            vec![json!(450.5), json!(20240502), json!(vm_id), json!("USD")],
        ],
    });

    let config = Config::default();
    let window = CostWindow {
        from: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
        to: NaiveDate::from_ymd_opt(2024, 5, 31).unwrap(),
    };
    let outcome = CostAnalyzer::new(&fake, &config.cost)
        .run(SUB, &[], window, None)
        .await
        .unwrap();

    assert!(outcome.degraded.is_none());
    assert_eq!(outcome.records.len(), 2);
    assert_eq!(outcome.aggregate.len(), 1);
    assert!((outcome.aggregate[0].total_cost - 1150.5).abs() < 1e-9);
    assert!(!fake.called("query_resources"));
}

#[tokio::test]
async fn test_cleanup_from_previous_run_matches_pipeline() {
    let dir = TempDir::new().unwrap();
    let fake = Arc::new(
        FakeAzure::new(&["rg-app"])
            .with_resource(disk("rg-app", "big", 600, None))
            .with_resource(disk("rg-app", "small", 16, None)),
    );
    let run_id = new_run_id(Utc::now());
    let writer = ReportWriter::new(dir.path(), run_id.clone(), ReportFormat::Csv);
    let config = Arc::new(Config::default());
    let options = AuditOptions::new(SUB, vec![], &config, Utc::now()).unwrap();
    Orchestrator::new(fake, config.clone(), writer.clone())
        .run(&options)
        .await
        .unwrap();
    let from_pipeline: Vec<Recommendation> =
        read_report(&writer.path_for::<Recommendation>()).unwrap();

    let inputs = CleanupInputs::load(dir.path(), &run_id);
    assert!(inputs.inventory.is_some());
    let rerun_dir = TempDir::new().unwrap();
    let rerun = ReportWriter::new(rerun_dir.path(), run_id, ReportFormat::Json);
    let mut engine = CleanupEngine::new(&config.cleanup, &config.cost);
    let outcome = engine
        .run(
            None,
            inputs,
            &CleanupOptions {
                auto_tag: false,
                dry_run: true,
                now: Utc::now(),
            },
            &CleanupTargets::for_writer(&rerun),
        )
        .await
        .unwrap();

    let names = |recs: &[Recommendation]| recs.iter().map(|r| r.name.clone()).collect::<Vec<_>>();
    assert_eq!(names(&outcome.recommendations), names(&from_pipeline));
    assert_eq!(names(&from_pipeline), vec!["big", "small"]);
    assert!(outcome.tagging.is_none());
}

#[tokio::test]
async fn test_group_filter_is_a_subset_of_the_full_inventory() {
    let fake = FakeAzure::new(&["rg-a", "rg-b", "rg-empty"])
        .with_resource(disk("rg-a", "d1", 10, None))
        .with_resource(disk("rg-b", "d2", 10, None))
        .with_resource(vm("RG-A", "web", "Standard_B2s", "PowerState/running"));
    let fetcher = ResourceFetcher::new(&fake);

    let all = fetcher
        .fetch(&InventoryRequest::new(SUB, vec![]))
        .await
        .unwrap();
    let filtered = fetcher
        .fetch(&InventoryRequest::new(SUB, vec!["rg-a".into()]))
        .await
        .unwrap();
    assert_eq!(all.resources.len(), 3);
    let expected: Vec<_> = all
        .resources
        .iter()
        .filter(|r| r.resource_group.eq_ignore_ascii_case("rg-a"))
        .cloned()
        .collect();
    assert_eq!(filtered.resources, expected);

    let empty = fetcher
        .fetch(&InventoryRequest::new(SUB, vec!["rg-empty".into()]))
        .await
        .unwrap();
    assert!(empty.resources.is_empty());
}

#[tokio::test]
async fn test_snapshot_source_in_another_group_is_not_orphaned() {
    let source = resource_id("rg-b", "Microsoft.Compute/disks", "src");
    let gone = resource_id("rg-b", "Microsoft.Compute/disks", "gone");
    let fake = FakeAzure::new(&["rg-a", "rg-b"])
        .with_resource(disk("rg-b", "src", 64, Some("/subscriptions/x/vm")))
        .with_resource(snapshot("rg-a", "snap-kept", 64, &source))
        .with_resource(snapshot("rg-a", "snap-lost", 64, &gone));
    let scope = vec!["rg-a".to_string()];
    let request = InventoryRequest::new(SUB, scope.clone());
    let (_, groups) = ResourceFetcher::new(&fake)
        .resolve_scope(&request)
        .await
        .unwrap();
    let config = Config::default();
    let detector = OrphanDetector::new(&config.orphans);

    let standalone = detector
        .run_standalone(&fake, SUB, &scope, &groups)
        .await
        .unwrap();
    let names: Vec<&str> = standalone.findings.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["snap-lost"]);
    assert!(standalone.degraded().is_none());

    let inventory = ResourceFetcher::new(&fake).fetch(&request).await.unwrap();
    let from_inventory = detector
        .run(&fake, SUB, &scope, &inventory.resources, &inventory.resource_groups)
        .await;
    assert_eq!(from_inventory.findings, standalone.findings);
}
