//! Pipeline orchestration.
//!
//! Two barriers: the inventory fetch completes before any analysis module
//! starts, and every analysis module completes (or times out) before the
//! cleanup engine runs. Analysis modules run as tokio tasks bounded by a
//! semaphore; each writes only its own report files.

use super::activity::{ActivityTracker, validate_days_back};
use super::cleanup::{CleanupEngine, CleanupInputs, CleanupOptions, CleanupTargets};
use super::cost::{CostAnalyzer, TimePeriod};
use super::inventory::{InventoryRequest, ResourceFetcher};
use super::orphans::OrphanDetector;
use super::summary::{ModuleName, ModuleReport, ModuleStatus, RunSummary};
use super::types::{
    ActivityEvent, CreatorSummary, Inventory, OrphanFinding, ResourceCost, ResourceHistory,
};
use crate::azure::{AzureApi, CostWindow};
use crate::common::report::{OutputFile, ReportWriter};
use crate::config::Config;
use crate::error::{AuditError, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

/// Per-run choices, resolved from the command line.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditOptions {
    pub subscription: String,
    pub resource_groups: Vec<String>,
    pub cost: bool,
    pub orphans: bool,
    pub activity: bool,
    pub dry_run: bool,
    pub auto_tag: bool,
    pub cost_window: CostWindow,
    pub days_back: u32,
}

impl AuditOptions {
    /// Every module enabled, month-to-date costs, the configured lookback.
    pub fn new(
        subscription: impl Into<String>,
        resource_groups: Vec<String>,
        config: &Config,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        Ok(Self {
            subscription: subscription.into(),
            resource_groups,
            cost: true,
            orphans: true,
            activity: true,
            dry_run: false,
            auto_tag: false,
            cost_window: TimePeriod::MonthToDate.window(None, None, now.date_naive())?,
            days_back: config.activity.default_days,
        })
    }
}

/// What an analysis task hands back to the orchestrator.
enum AnalysisOutput {
    Cost(Vec<ResourceCost>),
    Orphans(Vec<OrphanFinding>),
    Activity(Vec<ResourceHistory>),
}

struct ModuleRun {
    report: ModuleReport,
    output: Option<AnalysisOutput>,
}

#[derive(Clone)]
struct ModuleContext {
    api: Arc<dyn AzureApi>,
    config: Arc<Config>,
    writer: ReportWriter,
    inventory: Arc<Inventory>,
    options: AuditOptions,
}

pub struct Orchestrator {
    api: Arc<dyn AzureApi>,
    config: Arc<Config>,
    writer: ReportWriter,
}

impl Orchestrator {
    pub fn new(api: Arc<dyn AzureApi>, config: Arc<Config>, writer: ReportWriter) -> Self {
        Self {
            api,
            config,
            writer,
        }
    }

    pub fn writer(&self) -> &ReportWriter {
        &self.writer
    }

    /// Run the whole pipeline and write the summary.
    ///
    /// An inventory failure aborts with that error. Analysis failures are
    /// recorded in the summary and do not stop the run.
    pub async fn run(&self, options: &AuditOptions) -> Result<RunSummary> {
        let started_at = Utc::now();
        let request = InventoryRequest::new(&options.subscription, options.resource_groups.clone());
        request.validate()?;
        if options.activity {
            validate_days_back(options.days_back, &self.config.activity)?;
        }

        log::info!("Starting audit run {}", self.writer.run_id());
        let mut modules = Vec::new();

        let clock = Instant::now();
        let inventory = ResourceFetcher::new(self.api.as_ref()).fetch(&request).await?;
        let inventory_file = self.writer.write(&inventory.resources)?;
        modules.push(ModuleReport {
            module: ModuleName::Inventory,
            status: ModuleStatus::Succeeded,
            duration_secs: clock.elapsed().as_secs_f64(),
            outputs: vec![inventory_file],
        });

        let inventory = Arc::new(inventory);
        let runs = self.run_analysis(options, &inventory).await;

        let mut inputs = CleanupInputs {
            inventory: Some(inventory.resources.clone()),
            ..CleanupInputs::default()
        };
        for run in runs {
            match run.output {
                Some(AnalysisOutput::Cost(costs)) => inputs.costs = costs,
                Some(AnalysisOutput::Orphans(findings)) => inputs.orphans = findings,
                Some(AnalysisOutput::Activity(histories)) => inputs.histories = histories,
                None => {}
            }
            modules.push(run.report);
        }

        let clock = Instant::now();
        let mut engine = CleanupEngine::new(&self.config.cleanup, &self.config.cost);
        let cleanup_options = CleanupOptions {
            auto_tag: options.auto_tag,
            dry_run: options.dry_run,
            now: Utc::now(),
        };
        let (cleanup_report, recommendations, tagged) = match engine
            .run(
                Some(self.api.as_ref()),
                inputs,
                &cleanup_options,
                &CleanupTargets::for_writer(&self.writer),
            )
            .await
        {
            Ok(outcome) => {
                let status = match outcome.degraded() {
                    Some(reason) => ModuleStatus::Degraded(reason),
                    None => ModuleStatus::Succeeded,
                };
                let script = OutputFile {
                    report: "cleanup-script".to_string(),
                    path: outcome.script.clone(),
                    records: outcome.recommendations.len(),
                };
                let report = ModuleReport {
                    module: ModuleName::Cleanup,
                    status,
                    duration_secs: clock.elapsed().as_secs_f64(),
                    outputs: vec![outcome.report.clone(), script],
                };
                let tagged = outcome.tagging.as_ref().map_or(0, |t| t.tagged.len());
                (report, outcome.recommendations.len(), tagged)
            }
            Err(err) => {
                log::error!("Cleanup engine failed: {}", err);
                let report = ModuleReport::failed(
                    ModuleName::Cleanup,
                    err.to_string(),
                    clock.elapsed().as_secs_f64(),
                );
                (report, 0, 0)
            }
        };
        modules.push(cleanup_report);

        let summary = RunSummary {
            run_id: self.writer.run_id().to_string(),
            subscription: options.subscription.clone(),
            resource_groups: options.resource_groups.clone(),
            started_at,
            finished_at: Utc::now(),
            dry_run: options.dry_run,
            modules,
            recommendations,
            tagged,
        };
        summary.write_json(&self.writer.artifact_path("audit-summary", "json"))?;
        Ok(summary)
    }

    /// Fan out the enabled analysis modules and wait for all of them.
    async fn run_analysis(
        &self,
        options: &AuditOptions,
        inventory: &Arc<Inventory>,
    ) -> Vec<ModuleRun> {
        let semaphore = Arc::new(Semaphore::new(self.config.audit.parallel_jobs.max(1)));
        let timeout = Duration::from_secs(self.config.audit.module_timeout_secs);
        let context = ModuleContext {
            api: Arc::clone(&self.api),
            config: Arc::clone(&self.config),
            writer: self.writer.clone(),
            inventory: Arc::clone(inventory),
            options: options.clone(),
        };

        let mut handles = Vec::new();
        let mut runs = Vec::new();
        for (module, enabled) in [
            (ModuleName::Cost, options.cost),
            (ModuleName::Orphans, options.orphans),
            (ModuleName::Activity, options.activity),
        ] {
            if !enabled {
                log::info!("Module {} disabled", module.as_str());
                runs.push(ModuleRun {
                    report: ModuleReport::skipped(module),
                    output: None,
                });
                continue;
            }

            let context = context.clone();
            let semaphore = Arc::clone(&semaphore);
            let handle = tokio::spawn(async move {
                // held for the module's lifetime; a closed semaphore just means no limit
                let _permit = semaphore.acquire_owned().await.ok();
                let clock = Instant::now();
                let result = tokio::time::timeout(timeout, run_module(module, &context)).await;
                let duration_secs = clock.elapsed().as_secs_f64();
                match result {
                    Ok(Ok((output, outputs, degraded))) => ModuleRun {
                        report: ModuleReport {
                            module,
                            status: match degraded {
                                Some(reason) => ModuleStatus::Degraded(reason),
                                None => ModuleStatus::Succeeded,
                            },
                            duration_secs,
                            outputs,
                        },
                        output: Some(output),
                    },
                    Ok(Err(err)) => {
                        log::error!("Module {} failed: {}", module.as_str(), err);
                        ModuleRun {
                            report: ModuleReport::failed(module, err.to_string(), duration_secs),
                            output: None,
                        }
                    }
                    Err(_) => {
                        let reason = format!("timed out after {}s", timeout.as_secs());
                        log::error!("Module {} {}", module.as_str(), reason);
                        ModuleRun {
                            report: ModuleReport::failed(module, reason, duration_secs),
                            output: None,
                        }
                    }
                }
            });
            handles.push((module, handle));
        }

        for (module, handle) in handles {
            match handle.await {
                Ok(run) => runs.push(run),
                Err(err) => runs.push(ModuleRun {
                    report: ModuleReport::failed(module, format!("task aborted: {}", err), 0.0),
                    output: None,
                }),
            }
        }
        runs.sort_by_key(|run| run.report.module as u8);
        runs
    }
}

async fn run_module(
    module: ModuleName,
    ctx: &ModuleContext,
) -> Result<(AnalysisOutput, Vec<OutputFile>, Option<String>)> {
    let api = ctx.api.as_ref();
    let options = &ctx.options;
    let resources = &ctx.inventory.resources[..];

    match module {
        ModuleName::Cost => {
            let outcome = CostAnalyzer::new(api, &ctx.config.cost)
                .run(
                    &options.subscription,
                    &options.resource_groups,
                    options.cost_window,
                    Some(resources),
                )
                .await?;
            let files = vec![
                ctx.writer.write(&outcome.records)?,
                ctx.writer.write(&outcome.aggregate)?,
            ];
            Ok((AnalysisOutput::Cost(outcome.aggregate), files, outcome.degraded))
        }
        ModuleName::Orphans => {
            let outcome = OrphanDetector::new(&ctx.config.orphans)
                .run(
                    api,
                    &options.subscription,
                    &options.resource_groups,
                    resources,
                    &ctx.inventory.resource_groups,
                )
                .await;
            let degraded = outcome.degraded();
            let files = vec![ctx.writer.write(&outcome.findings)?];
            Ok((AnalysisOutput::Orphans(outcome.findings), files, degraded))
        }
        ModuleName::Activity => {
            let outcome = ActivityTracker::new(api, &ctx.config.activity)
                .run(
                    &options.subscription,
                    &options.resource_groups,
                    options.days_back,
                    Utc::now(),
                    Some(resources),
                )
                .await?;
            let files = vec![
                ctx.writer.write::<ActivityEvent>(&outcome.events)?,
                ctx.writer.write::<CreatorSummary>(&outcome.creators)?,
                ctx.writer.write(&outcome.histories)?,
            ];
            Ok((AnalysisOutput::Activity(outcome.histories), files, outcome.degraded))
        }
        ModuleName::Inventory | ModuleName::Cleanup => Err(AuditError::ModuleFailed {
            module: module.as_str().to_string(),
            reason: "not an analysis module".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};

    #[test]
    fn test_default_options() {
        let now = Utc.with_ymd_and_hms(2024, 3, 15, 8, 0, 0).unwrap();
        let options = AuditOptions::new("s", vec![], &Config::default(), now).unwrap();
        assert!(options.cost && options.orphans && options.activity);
        assert!(!options.auto_tag && !options.dry_run);
        assert_eq!(options.days_back, 90);
        assert_eq!(
            options.cost_window.from,
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
        );
    }
}
