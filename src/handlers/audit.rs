use crate::audit::{AuditOptions, Orchestrator};
use crate::azure::AzureApi;
use crate::common::report::ReportWriter;
use crate::config::Config;
use colored::*;
use std::sync::Arc;

/// Full pipeline run. Returns the process exit code.
pub async fn handle_audit(
    api: Arc<dyn AzureApi>,
    config: Arc<Config>,
    writer: ReportWriter,
    options: &AuditOptions,
    quiet: bool,
) -> crate::Result<i32> {
    if !quiet {
        println!(
            "🔍 Auditing subscription {} (run {})",
            options.subscription.cyan(),
            writer.run_id()
        );
        if options.dry_run {
            println!("{}", "   Dry run: no resources will be tagged".yellow());
        }
    }

    let orchestrator = Orchestrator::new(api, config, writer);
    let summary = orchestrator.run(options).await?;
    summary.print();

    let summary_path = orchestrator.writer().artifact_path("audit-summary", "json");
    if summary.has_failures() {
        eprintln!(
            "{} one or more modules failed; see {}",
            "❌".red(),
            summary_path.display()
        );
    } else if !quiet {
        println!("✅ Audit complete. Summary saved to: {}", summary_path.display());
    }
    Ok(summary.exit_code())
}
