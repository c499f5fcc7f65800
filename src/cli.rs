use crate::audit::cost::TimePeriod;
use crate::audit::inventory::parse_resource_groups;
use crate::config::ReportFormat;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "azure-audit")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Audit an Azure subscription for orphaned and high-cost resources")]
#[command(long_about = "Fetches a subscription's resource inventory, runs cost, orphan and activity analysis concurrently, and joins the results into ranked, reviewable cleanup recommendations. Nothing is ever deleted: the generated cleanup script is inert until edited and confirmed.")]
#[command(subcommand_negates_reqs = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Subscription id (GUID) to audit
    #[arg(long, env = "AZURE_SUBSCRIPTION_ID", required = true)]
    pub subscription: Option<String>,

    /// Comma-separated resource group allow-list
    #[arg(long, value_name = "GROUPS")]
    pub resource_groups: Option<String>,

    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Directory for report files
    #[arg(long, global = true, env = "AZURE_AUDIT_OUTPUT_DIR", value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Report format
    #[arg(long, global = true, value_enum)]
    pub format: Option<ReportFormat>,

    /// Skip the cost analysis module
    #[arg(long)]
    pub no_cost_analysis: bool,

    /// Skip the orphan detection module
    #[arg(long)]
    pub no_orphan_detection: bool,

    /// Skip the activity tracking module
    #[arg(long)]
    pub no_activity_tracking: bool,

    /// Produce reports and the script but never tag resources
    #[arg(long)]
    pub dry_run: bool,

    /// Maximum number of analysis modules running at once (1-16)
    #[arg(long, value_name = "N")]
    pub parallel_jobs: Option<usize>,

    /// Tag low and medium risk candidates with audit-candidate/audit-date
    #[arg(long)]
    pub auto_tag: bool,

    /// Path to the az executable
    #[arg(long, global = true, env = "AZURE_AUDIT_AZ", default_value = "az", value_name = "PATH")]
    pub az_path: String,

    /// Enable verbose logging (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all output except errors and the final summary
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch the resource inventory
    Inventory {
        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// Analyze cost for a reporting window
    Cost {
        #[command(flatten)]
        scope: ScopeArgs,

        /// Reporting window
        #[arg(long, value_enum, default_value = "month-to-date")]
        time_period: TimePeriod,

        /// Window start for --time-period custom
        #[arg(long, value_name = "YYYY-MM-DD")]
        from: Option<NaiveDate>,

        /// Window end (inclusive) for --time-period custom
        #[arg(long, value_name = "YYYY-MM-DD")]
        to: Option<NaiveDate>,
    },

    /// Detect orphaned resources
    Orphans {
        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// Summarize who created and modified resources
    Activity {
        #[command(flatten)]
        scope: ScopeArgs,

        /// Lookback window in days (at most the activity log retention)
        #[arg(long, value_name = "DAYS")]
        days_back: Option<u32>,
    },

    /// Build cleanup recommendations from a previous run's reports
    Cleanup {
        /// Subscription id, needed only for --auto-tag
        #[arg(long, env = "AZURE_SUBSCRIPTION_ID")]
        subscription: Option<String>,

        /// Run id of the reports to read (YYYYMMDD-HHMMSS); defaults to the latest
        #[arg(long, value_name = "RUN_ID")]
        report_date: Option<String>,

        /// Directory holding the reports; defaults to the output directory
        #[arg(long, value_name = "DIR")]
        input_dir: Option<PathBuf>,

        /// Recommendations file to write
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,

        /// Tag low and medium risk candidates
        #[arg(long)]
        auto_tag: bool,

        /// Never tag resources
        #[arg(long)]
        dry_run: bool,
    },
}

/// Scope shared by the single-module commands.
#[derive(Args, Debug, Clone)]
pub struct ScopeArgs {
    /// Subscription id (GUID)
    #[arg(long, env = "AZURE_SUBSCRIPTION_ID")]
    pub subscription: String,

    /// Comma-separated resource group allow-list
    #[arg(long, value_name = "GROUPS")]
    pub resource_groups: Option<String>,

    /// Report file to write; related reports are written next to it
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,
}

impl ScopeArgs {
    pub fn resource_group_list(&self) -> Vec<String> {
        self.resource_groups
            .as_deref()
            .map(parse_resource_groups)
            .unwrap_or_default()
    }
}

impl Cli {
    pub fn resource_group_list(&self) -> Vec<String> {
        self.resource_groups
            .as_deref()
            .map(parse_resource_groups)
            .unwrap_or_default()
    }

    /// Initialize logging based on verbosity level
    pub fn init_logging(&self) {
        if self.quiet {
            return;
        }

        let level = match self.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        };

        env_logger::Builder::from_default_env()
            .filter_level(level)
            .init();
    }
}
