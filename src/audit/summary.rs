//! Run summary: what ran, how it ended, and every file it wrote.

use crate::common::report::OutputFile;
use crate::error::Result;
use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::Serialize;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleName {
    Inventory,
    Cost,
    Orphans,
    Activity,
    Cleanup,
}

impl ModuleName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleName::Inventory => "inventory",
            ModuleName::Cost => "cost",
            ModuleName::Orphans => "orphans",
            ModuleName::Activity => "activity",
            ModuleName::Cleanup => "cleanup",
        }
    }
}

/// How a module ended. Degraded means it produced lower-confidence output
/// and is not a failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason")]
pub enum ModuleStatus {
    Succeeded,
    Degraded(String),
    Failed(String),
    Skipped,
}

impl ModuleStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, ModuleStatus::Failed(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            ModuleStatus::Succeeded => "succeeded",
            ModuleStatus::Degraded(_) => "degraded",
            ModuleStatus::Failed(_) => "failed",
            ModuleStatus::Skipped => "skipped",
        }
    }

    fn reason(&self) -> Option<&str> {
        match self {
            ModuleStatus::Degraded(r) | ModuleStatus::Failed(r) => Some(r),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleReport {
    pub module: ModuleName,
    #[serde(flatten)]
    pub status: ModuleStatus,
    pub duration_secs: f64,
    pub outputs: Vec<OutputFile>,
}

impl ModuleReport {
    pub fn skipped(module: ModuleName) -> Self {
        Self {
            module,
            status: ModuleStatus::Skipped,
            duration_secs: 0.0,
            outputs: Vec::new(),
        }
    }

    pub fn failed(module: ModuleName, reason: impl Into<String>, duration_secs: f64) -> Self {
        Self {
            module,
            status: ModuleStatus::Failed(reason.into()),
            duration_secs,
            outputs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub subscription: String,
    pub resource_groups: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    pub modules: Vec<ModuleReport>,
    pub recommendations: usize,
    pub tagged: usize,
}

impl RunSummary {
    pub fn outputs(&self) -> impl Iterator<Item = &OutputFile> {
        self.modules.iter().flat_map(|m| m.outputs.iter())
    }

    pub fn module(&self, name: ModuleName) -> Option<&ModuleReport> {
        self.modules.iter().find(|m| m.module == name)
    }

    pub fn has_failures(&self) -> bool {
        self.modules.iter().any(|m| m.status.is_failed())
    }

    /// 0 when every enabled module succeeded or degraded, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.has_failures() { 1 } else { 0 }
    }

    pub fn duration_secs(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Human-readable table of modules and outputs.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "\n{}", "📋 Audit Summary".bold());
        let _ = writeln!(out, "   Run:          {}", self.run_id.cyan());
        let _ = writeln!(out, "   Subscription: {}", self.subscription);
        if !self.resource_groups.is_empty() {
            let _ = writeln!(out, "   Groups:       {}", self.resource_groups.join(", "));
        }
        let _ = writeln!(out, "   Duration:     {:.1}s", self.duration_secs());
        if self.dry_run {
            let _ = writeln!(out, "   Mode:         {}", "dry run".yellow());
        }

        let _ = writeln!(out, "\n{}", "Modules".bold());
        for module in &self.modules {
            let status = match &module.status {
                ModuleStatus::Succeeded => "✅ succeeded".green(),
                ModuleStatus::Degraded(_) => "⚠️  degraded".yellow(),
                ModuleStatus::Failed(_) => "❌ failed".red(),
                ModuleStatus::Skipped => "⏭  skipped".dimmed(),
            };
            let _ = write!(
                out,
                "   {:<10} {:<16} {:>6.1}s",
                module.module.as_str(),
                status,
                module.duration_secs
            );
            if let Some(reason) = module.status.reason() {
                let _ = write!(out, "  {}", reason.dimmed());
            }
            let _ = writeln!(out);
        }

        let _ = writeln!(out, "\n{}", "Output files".bold());
        let mut any = false;
        for file in self.outputs() {
            any = true;
            let _ = writeln!(
                out,
                "   {:>7} records  {}",
                file.records,
                file.path.display()
            );
        }
        if !any {
            let _ = writeln!(out, "   (none)");
        }

        let _ = writeln!(
            out,
            "\n   {} recommendation(s), {} resource(s) tagged for review",
            self.recommendations, self.tagged
        );
        out
    }

    pub fn print(&self) {
        println!("{}", self.render());
    }
}
