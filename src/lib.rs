//! # azure-audit
//!
//! Audits an Azure subscription for orphaned and high-cost resources and
//! produces ranked, reviewable cleanup recommendations.
//!
//! ## Features
//!
//! - **Inventory**: Normalized resource inventory from the resource graph
//! - **Cost Analysis**: Metered cost per resource, with size/SKU estimates when the cost API is unavailable
//! - **Orphan Detection**: Unattached disks, unused NSGs and load balancers, orphaned NICs and snapshots, empty groups, stopped VMs
//! - **Activity Tracking**: Who created and modified what, from the activity log or resource tags
//! - **Cleanup Recommendations**: Prioritized, risk-rated actions plus an inert review script
//!
//! Nothing is ever deleted. The only write to Azure is optional safety tagging.
//!
//! ## Example
//!
//! ```rust,no_run
//! use azure_audit::audit::{AuditOptions, Orchestrator, new_run_id};
//! use azure_audit::azure::AzCliClient;
//! use azure_audit::common::report::ReportWriter;
//! use azure_audit::common::retry::RetryPolicy;
//! use azure_audit::config::Config;
//! use std::sync::Arc;
//!
//! # async fn example() -> azure_audit::Result<()> {
//! let config = Arc::new(Config::default());
//! let now = chrono::Utc::now();
//! let api = Arc::new(AzCliClient::new(RetryPolicy::from_config(&config.retry)));
//! let writer = ReportWriter::new("./audit-reports", new_run_id(now), config.audit.format);
//! let options = AuditOptions::new("0b1f6471-1bf0-4dda-aec3-cb9272f09590", vec![], &config, now)?;
//! let summary = Orchestrator::new(api, config, writer).run(&options).await?;
//! summary.print();
//! # Ok(())
//! # }
//! ```

pub mod audit;
pub mod azure;
pub mod cli;
pub mod common;
pub mod config;
pub mod error;
pub mod handlers;

// Re-export commonly used types and functions
pub use audit::{AuditOptions, Orchestrator, RunSummary};
pub use error::{AuditError, Result};

use audit::activity::validate_days_back;
use audit::inventory::{InventoryRequest, validate_subscription_id};
use audit::{CleanupEngine, CleanupOptions, new_run_id};
use azure::{AzCliClient, AzureApi};
use chrono::Utc;
use cli::{Cli, Commands, ScopeArgs};
use common::command_utils::require_command;
use common::report::ReportWriter;
use common::retry::RetryPolicy;
use config::Config;
use handlers::ReportSink;
use regex::Regex;
use std::path::Path;
use std::sync::{Arc, LazyLock};

/// The current version of the CLI tool
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

const AZ_INSTALL_HINT: &str = "Install the Azure CLI (https://learn.microsoft.com/cli/azure/install-azure-cli) and run `az login`.";

static RUN_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{8}-\d{6}$").unwrap());

static RUN_REPORT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(inventory|orphans|cost-aggregate|activity-resources)-(\d{8}-\d{6})\.(csv|json)$")
        .unwrap()
});

/// Run the parsed command line. Returns the process exit code.
///
/// Arguments are validated before the `az` executable is looked up, so bad
/// input fails with a validation error even where Azure is unreachable.
pub async fn run_command(mut cli: Cli) -> Result<i32> {
    let config = Arc::new(build_config(&cli)?);
    let now = Utc::now();

    match cli.command.take() {
        None => {
            let subscription = cli.subscription.clone().unwrap_or_default();
            let mut options =
                AuditOptions::new(subscription, cli.resource_group_list(), &config, now)?;
            options.cost = !cli.no_cost_analysis;
            options.orphans = !cli.no_orphan_detection;
            options.activity = !cli.no_activity_tracking;
            options.dry_run = cli.dry_run;
            options.auto_tag = cli.auto_tag;
            InventoryRequest::new(&options.subscription, options.resource_groups.clone()).validate()?;

            let api = connect(&cli.az_path, &config)?;
            let writer = ReportWriter::new(
                config.audit.output_dir.clone(),
                new_run_id(now),
                config.audit.format,
            );
            handlers::handle_audit(api, config, writer, &options, cli.quiet).await
        }
        Some(Commands::Inventory { scope }) => {
            let request = scope_request(&scope)?;
            let api = connect(&cli.az_path, &config)?;
            let sink = scope_sink(scope, &config, now);
            handlers::handle_inventory(api.as_ref(), &request, &sink, cli.quiet).await
        }
        Some(Commands::Cost {
            scope,
            time_period,
            from,
            to,
        }) => {
            let request = scope_request(&scope)?;
            let window = time_period.window(from, to, now.date_naive())?;
            let api = connect(&cli.az_path, &config)?;
            let sink = scope_sink(scope, &config, now);
            handlers::handle_cost(api.as_ref(), &config, &request, window, &sink, cli.quiet).await
        }
        Some(Commands::Orphans { scope }) => {
            let request = scope_request(&scope)?;
            let api = connect(&cli.az_path, &config)?;
            let sink = scope_sink(scope, &config, now);
            handlers::handle_orphans(api.as_ref(), &config, &request, &sink, cli.quiet).await
        }
        Some(Commands::Activity { scope, days_back }) => {
            let request = scope_request(&scope)?;
            let days_back = validate_days_back(
                days_back.unwrap_or(config.activity.default_days),
                &config.activity,
            )?;
            let api = connect(&cli.az_path, &config)?;
            let sink = scope_sink(scope, &config, now);
            handlers::handle_activity(api.as_ref(), &config, &request, days_back, &sink, cli.quiet)
                .await
        }
        Some(Commands::Cleanup {
            subscription,
            report_date,
            input_dir,
            output,
            auto_tag,
            dry_run,
        }) => {
            if let Some(subscription) = &subscription {
                validate_subscription_id(subscription)?;
            }
            let input_dir = input_dir.unwrap_or_else(|| config.audit.output_dir.clone());
            let run_id = match report_date {
                Some(run_id) if RUN_ID_REGEX.is_match(&run_id) => run_id,
                Some(run_id) => {
                    return Err(AuditError::validation(format!(
                        "--report-date must look like YYYYMMDD-HHMMSS, got '{}'",
                        run_id
                    )));
                }
                None => latest_run_id(&input_dir)?.ok_or_else(|| {
                    AuditError::validation(format!(
                        "no audit reports found in {}; pass --report-date or --input-dir",
                        input_dir.display()
                    ))
                })?,
            };
            let options = CleanupOptions {
                auto_tag: auto_tag || cli.auto_tag,
                dry_run: dry_run || cli.dry_run,
                now,
            };

            let api = if CleanupEngine::new(&config.cleanup, &config.cost).tagging_allowed(&options)
            {
                Some(connect(&cli.az_path, &config)?)
            } else {
                None
            };
            let writer =
                ReportWriter::new(config.audit.output_dir.clone(), run_id, config.audit.format);
            handlers::handle_cleanup(
                api.as_deref(),
                &config,
                input_dir,
                &writer,
                output,
                &options,
                cli.quiet,
            )
            .await
        }
    }
}

/// Configuration file plus command-line overrides, validated.
fn build_config(cli: &Cli) -> Result<Config> {
    let mut config = config::load_config(cli.config.as_deref())?;
    if let Some(dir) = &cli.output_dir {
        config.audit.output_dir = dir.clone();
    }
    if let Some(format) = cli.format {
        config.audit.format = format;
    }
    if let Some(jobs) = cli.parallel_jobs {
        config.audit.parallel_jobs = jobs;
    }
    config::validate_config(&config)?;
    Ok(config)
}

fn scope_request(scope: &ScopeArgs) -> Result<InventoryRequest> {
    let request = InventoryRequest::new(&scope.subscription, scope.resource_group_list());
    request.validate()?;
    Ok(request)
}

fn scope_sink(scope: ScopeArgs, config: &Config, now: chrono::DateTime<Utc>) -> ReportSink {
    let writer = ReportWriter::new(
        config.audit.output_dir.clone(),
        new_run_id(now),
        config.audit.format,
    );
    ReportSink::new(scope.output, &writer)
}

fn connect(az_path: &str, config: &Config) -> Result<Arc<dyn AzureApi>> {
    require_command(az_path, AZ_INSTALL_HINT)?;
    Ok(Arc::new(AzCliClient::with_program(
        az_path,
        RetryPolicy::from_config(&config.retry),
    )))
}

/// Most recent run id with at least one cleanup input report in `dir`.
pub fn latest_run_id(dir: &Path) -> Result<Option<String>> {
    if !dir.is_dir() {
        return Ok(None);
    }
    let mut latest: Option<String> = None;
    for entry in std::fs::read_dir(dir)? {
        let file_name = entry?.file_name();
        let name = file_name.to_string_lossy();
        let Some(captures) = RUN_REPORT_REGEX.captures(&name) else {
            continue;
        };
        let run_id = captures[2].to_string();
        if latest.as_ref().is_none_or(|current| run_id > *current) {
            latest = Some(run_id);
        }
    }
    Ok(latest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use tempfile::TempDir;

    #[test]
    fn test_latest_run_id_picks_newest_input_report() {
        let dir = TempDir::new().unwrap();
        for name in [
            "inventory-20240101-000000.csv",
            "orphans-20240302-101500.json",
            "cleanup-recommendations-20250101-000000.csv",
            "notes.txt",
        ] {
            std::fs::write(dir.path().join(name), "").unwrap();
        }
        assert_eq!(
            latest_run_id(dir.path()).unwrap().as_deref(),
            Some("20240302-101500")
        );
    }

    #[test]
    fn test_latest_run_id_missing_dir() {
        let dir = TempDir::new().unwrap();
        assert_eq!(latest_run_id(&dir.path().join("nope")).unwrap(), None);
    }

    #[test]
    fn test_parallel_jobs_flag_overrides_invalid_file_value() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("azure-audit.toml");
        std::fs::write(&path, "[audit]\nparallel_jobs = 40\n").unwrap();
        let args = |extra: &[&str]| {
            let mut argv = vec![
                "azure-audit",
                "--subscription",
                "0b1f6471-1bf0-4dda-aec3-cb9272f09590",
                "--config",
                path.to_str().unwrap(),
            ];
            argv.extend_from_slice(extra);
            Cli::try_parse_from(argv).unwrap()
        };

        let config = build_config(&args(&["--parallel-jobs", "4"])).unwrap();
        assert_eq!(config.audit.parallel_jobs, 4);

        let err = build_config(&args(&[])).unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_run_id_shape() {
        assert!(RUN_ID_REGEX.is_match("20240101-235959"));
        assert!(!RUN_ID_REGEX.is_match("2024-01-01"));
    }
}
