//! Single-module commands. Each resolves the scope first so a bad
//! subscription or resource group fails before any data query.

use crate::audit::cleanup::{CleanupTargets, TaggingReport};
use crate::audit::inventory::{InventoryRequest, ResourceFetcher};
use crate::audit::types::{OrphanCategory, Recommendation};
use crate::audit::{
    ActivityTracker, CleanupEngine, CleanupInputs, CleanupOptions, CostAnalyzer, OrphanDetector,
};
use crate::azure::{AzureApi, CostWindow};
use crate::common::report::{self, OutputFile, Report, ReportWriter};
use crate::config::Config;
use chrono::Utc;
use colored::*;
use std::collections::BTreeMap;
use std::path::PathBuf;

const TOP_ROWS: usize = 10;

/// Where a single-module command writes.
///
/// Either the run's conventional file names, or an explicit `--output`
/// path for the primary report with related reports written next to it.
#[derive(Debug, Clone)]
pub enum ReportSink {
    Run(ReportWriter),
    File(PathBuf),
}

impl ReportSink {
    pub fn new(output: Option<PathBuf>, writer: &ReportWriter) -> Self {
        match output {
            Some(path) => ReportSink::File(path),
            None => ReportSink::Run(writer.clone()),
        }
    }

    /// Write the primary report (`suffix` is `None`) or a related one.
    pub fn write<T: Report>(&self, records: &[T], suffix: Option<&str>) -> crate::Result<OutputFile> {
        match self {
            ReportSink::Run(writer) => writer.write(records),
            ReportSink::File(primary) => {
                let path = match suffix {
                    Some(suffix) => report::sibling_path(primary, suffix),
                    None => primary.clone(),
                };
                report::write_report_to(&path, report::format_for_path(primary), records)
            }
        }
    }
}

fn print_saved(files: &[OutputFile]) {
    for file in files {
        println!(
            "   {} {} records -> {}",
            "💾".dimmed(),
            file.records,
            file.path.display()
        );
    }
}

pub async fn handle_inventory(
    api: &dyn AzureApi,
    request: &InventoryRequest,
    sink: &ReportSink,
    quiet: bool,
) -> crate::Result<i32> {
    if !quiet {
        println!("🔍 Fetching inventory for {}", request.subscription.cyan());
    }
    let inventory = ResourceFetcher::new(api).fetch(request).await?;
    let file = sink.write(&inventory.resources, None)?;

    if !quiet {
        println!(
            "✅ {} resources across {} resource groups in {}",
            inventory.resources.len(),
            inventory.resource_groups.len(),
            inventory.subscription.name.bold()
        );
        let mut by_type: BTreeMap<&str, usize> = BTreeMap::new();
        for resource in &inventory.resources {
            *by_type.entry(resource.resource_type.as_str()).or_default() += 1;
        }
        for (resource_type, count) in by_type {
            println!("   {:>5}  {}", count, resource_type);
        }
        print_saved(&[file]);
    }
    Ok(0)
}

pub async fn handle_cost(
    api: &dyn AzureApi,
    config: &Config,
    request: &InventoryRequest,
    window: CostWindow,
    sink: &ReportSink,
    quiet: bool,
) -> crate::Result<i32> {
    ResourceFetcher::new(api).resolve_scope(request).await?;
    if !quiet {
        println!(
            "💰 Analyzing cost for {} from {} to {}",
            request.subscription.cyan(),
            window.from,
            window.to
        );
    }

    let outcome = CostAnalyzer::new(api, &config.cost)
        .run(&request.subscription, &request.resource_groups, window, None)
        .await?;
    let files = vec![
        sink.write(&outcome.records, None)?,
        sink.write(&outcome.aggregate, Some("aggregate"))?,
    ];

    if let Some(reason) = &outcome.degraded {
        eprintln!("{} {}", "⚠️ ".yellow(), reason.yellow());
    }
    if !quiet {
        let total: f64 = outcome.aggregate.iter().map(|c| c.total_cost).sum();
        println!(
            "✅ {:.2} {} across {} resources",
            total,
            config.cost.currency,
            outcome.aggregate.len()
        );
        for cost in outcome.aggregate.iter().take(TOP_ROWS) {
            println!(
                "   {:>10.2}  {:<6}  {} ({})",
                cost.total_cost,
                cost.cost_flag.to_string(),
                cost.name,
                cost.resource_group
            );
        }
        print_saved(&files);
    }
    Ok(0)
}

pub async fn handle_orphans(
    api: &dyn AzureApi,
    config: &Config,
    request: &InventoryRequest,
    sink: &ReportSink,
    quiet: bool,
) -> crate::Result<i32> {
    let (_, groups) = ResourceFetcher::new(api).resolve_scope(request).await?;
    if !quiet {
        println!("🧹 Detecting orphaned resources in {}", request.subscription.cyan());
    }

    let outcome = OrphanDetector::new(&config.orphans)
        .run_standalone(api, &request.subscription, &request.resource_groups, &groups)
        .await?;
    let file = sink.write(&outcome.findings, None)?;

    if let Some(reason) = outcome.degraded() {
        eprintln!("{} {}", "⚠️ ".yellow(), reason.yellow());
    }
    if !quiet {
        println!("✅ {} orphaned resources found", outcome.findings.len());
        let mut by_category: BTreeMap<OrphanCategory, usize> = BTreeMap::new();
        for finding in &outcome.findings {
            *by_category.entry(finding.category).or_default() += 1;
        }
        for (category, count) in by_category {
            println!("   {:>5}  {}", count, category);
        }
        print_saved(&[file]);
    }
    Ok(0)
}

pub async fn handle_activity(
    api: &dyn AzureApi,
    config: &Config,
    request: &InventoryRequest,
    days_back: u32,
    sink: &ReportSink,
    quiet: bool,
) -> crate::Result<i32> {
    ResourceFetcher::new(api).resolve_scope(request).await?;
    if !quiet {
        println!(
            "📜 Reading {} days of activity for {}",
            days_back,
            request.subscription.cyan()
        );
    }

    let outcome = ActivityTracker::new(api, &config.activity)
        .run(
            &request.subscription,
            &request.resource_groups,
            days_back,
            Utc::now(),
            None,
        )
        .await?;
    let files = vec![
        sink.write(&outcome.events, None)?,
        sink.write(&outcome.creators, Some("creators"))?,
        sink.write(&outcome.histories, Some("resources"))?,
    ];

    if let Some(reason) = &outcome.degraded {
        eprintln!("{} {}", "⚠️ ".yellow(), reason.yellow());
    }
    if !quiet {
        println!(
            "✅ {} events from {} callers",
            outcome.events.len(),
            outcome.creators.len()
        );
        for creator in outcome.creators.iter().take(TOP_ROWS) {
            println!(
                "   {:>5}  {} ({} created, {} modified, {} deleted)",
                creator.total_operations,
                creator.caller,
                creator.creations,
                creator.modifications,
                creator.deletions
            );
        }
        print_saved(&files);
    }
    Ok(0)
}

/// Build recommendations from the reports in `input_dir` that share the
/// writer's run id.
///
/// `api` is only needed for safety tagging.
pub async fn handle_cleanup(
    api: Option<&dyn AzureApi>,
    config: &Config,
    input_dir: PathBuf,
    writer: &ReportWriter,
    output: Option<PathBuf>,
    options: &CleanupOptions,
    quiet: bool,
) -> crate::Result<i32> {
    if !quiet {
        println!(
            "🧾 Building cleanup recommendations from run {} in {}",
            writer.run_id().cyan(),
            input_dir.display()
        );
    }

    let inputs = CleanupInputs::load(&input_dir, writer.run_id());
    let mut targets = CleanupTargets::for_writer(writer);
    if let Some(path) = output {
        targets.format = report::format_for_path(&path);
        targets.script = path.with_file_name(format!("cleanup-script-{}.sh", writer.run_id()));
        targets.recommendations = path;
    }

    let mut engine = CleanupEngine::new(&config.cleanup, &config.cost);
    let outcome = engine.run(api, inputs, options, &targets).await?;

    if !quiet {
        println!("✅ {} recommendations", outcome.recommendations.len());
        print_recommendations(&outcome.recommendations);
        print_saved(std::slice::from_ref(&outcome.report));
        println!(
            "   {} review script -> {}",
            "📝".dimmed(),
            outcome.script.display()
        );
    }
    if let Some(tagging) = &outcome.tagging {
        print_tagging(tagging, quiet);
    } else if options.auto_tag && !quiet {
        println!("{}", "   Safety tagging skipped (dry run or disabled)".yellow());
    }
    Ok(0)
}

fn print_recommendations(recommendations: &[Recommendation]) {
    for rec in recommendations.iter().take(TOP_ROWS) {
        let priority = match rec.priority.tier() {
            1 => "P1".red().bold(),
            2 => "P2".yellow(),
            _ => "P3".normal(),
        };
        let mut line = format!(
            "   {}  {:<22} {} ({}) risk {}, savings {}",
            priority,
            rec.category.to_string(),
            rec.name,
            rec.resource_group,
            rec.risk,
            rec.estimated_savings.label()
        );
        if !rec.verified {
            line.push_str(&format!(" {}", "[unverified]".dimmed()));
        }
        println!("{}", line);
    }
    if recommendations.len() > TOP_ROWS {
        println!("   ... and {} more", recommendations.len() - TOP_ROWS);
    }
}

fn print_tagging(tagging: &TaggingReport, quiet: bool) {
    if !quiet {
        println!(
            "🏷️  Tagged {} resources for review ({} high-risk skipped)",
            tagging.tagged.len(),
            tagging.skipped_high_risk
        );
    }
    for (resource_id, error) in &tagging.failures {
        eprintln!("{} could not tag {}: {}", "❌".red(), resource_id, error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::types::{CreatorSummary, EventSource};
    use crate::config::ReportFormat;
    use tempfile::TempDir;

    fn rows() -> Vec<CreatorSummary> {
        vec![CreatorSummary {
            caller: "alice@example.com".into(),
            total_operations: 3,
            creations: 1,
            modifications: 2,
            deletions: 0,
            resource_types: vec!["microsoft.compute/disks".into()],
            last_activity: None,
            source: EventSource::ActivityLog,
        }]
    }

    #[test]
    fn test_run_sink_uses_conventional_names() {
        let dir = TempDir::new().unwrap();
        let writer = ReportWriter::new(dir.path(), "20240101-000000", ReportFormat::Csv);
        let sink = ReportSink::new(None, &writer);
        let file = sink.write(&rows(), None).unwrap();
        assert_eq!(file.records, 1);
        assert!(file.path.starts_with(dir.path()));
    }

    #[test]
    fn test_file_sink_writes_siblings_in_same_format() {
        let dir = TempDir::new().unwrap();
        let writer = ReportWriter::new(dir.path(), "r1", ReportFormat::Csv);
        let primary = dir.path().join("out/costs.json");
        let sink = ReportSink::new(Some(primary.clone()), &writer);

        let main = sink.write(&rows(), None).unwrap();
        let related = sink.write(&rows(), Some("aggregate")).unwrap();
        assert_eq!(main.path, primary);
        assert_eq!(related.path, dir.path().join("out/costs-aggregate.json"));
        let text = std::fs::read_to_string(&related.path).unwrap();
        assert!(text.trim_start().starts_with('['));
    }
}
