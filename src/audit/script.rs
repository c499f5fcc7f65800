//! Reviewable cleanup script.
//!
//! The script never deletes anything as written: every command is commented
//! out, `EXECUTE` defaults to false, and each command asks for confirmation.

use super::types::{Recommendation, RecommendationCategory, ResourceKind};
use crate::error::Result;
use std::fs;
use std::path::Path;

const HEADER: &str = r#"set -euo pipefail

# Nothing below runs until BOTH:
#   1. EXECUTE is set to true, and
#   2. the individual command is uncommented.
# Each command then asks for confirmation before running.
EXECUTE=false

confirm() {
  local answer
  read -r -p "$1 [y/N] " answer
  [[ "$answer" == "y" || "$answer" == "Y" ]]
}

run() {
  if [[ "$EXECUTE" != "true" ]]; then
    echo "[dry-run] $*"
    return 0
  fi
  if confirm "Run: $*?"; then
    "$@"
  else
    echo "Skipped: $*"
  fi
}
"#;

/// Render the script for a ranked recommendation list.
pub fn render_script(recommendations: &[Recommendation], run_id: &str) -> String {
    let mut out = String::new();
    out.push_str("#!/usr/bin/env bash\n");
    out.push_str(&format!(
        "# Cleanup script generated by azure-audit {} for run {}\n",
        env!("CARGO_PKG_VERSION"),
        run_id
    ));
    out.push_str(&format!(
        "# {} recommendation(s). Review every entry before enabling anything.\n",
        recommendations.len()
    ));
    out.push_str(HEADER);

    for rec in recommendations {
        out.push('\n');
        out.push_str(&format!(
            "# [P{}] {}: {} ({})\n",
            rec.priority.tier(),
            rec.category,
            rec.name,
            rec.resource_group
        ));
        out.push_str(&format!(
            "# Risk: {} | Estimated savings: {} | Action: {}\n",
            rec.risk,
            rec.estimated_savings.label(),
            rec.action
        ));
        if !rec.verified {
            out.push_str("# UNVERIFIED: resource was not in this run's inventory\n");
        }
        if !rec.safety_checks.is_empty() {
            out.push_str("# Safety checks:\n");
            for check in &rec.safety_checks {
                out.push_str(&format!("#   - {}\n", check));
            }
        }
        let commands = commands_for(rec);
        if commands.is_empty() {
            out.push_str("# Review only: no automated action\n");
        }
        for command in commands {
            out.push_str(&format!("# run {}\n", command));
        }
    }

    out
}

pub fn write_script(path: &Path, recommendations: &[Recommendation], run_id: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, render_script(recommendations, run_id))?;
    log::info!("Wrote cleanup script to {}", path.display());
    Ok(())
}

/// `az` commands implementing a recommendation, shell-quoted.
fn commands_for(rec: &Recommendation) -> Vec<String> {
    let id = quote(&rec.resource_id);
    match rec.category {
        RecommendationCategory::HighCost | RecommendationCategory::AgedResource => Vec::new(),
        RecommendationCategory::EmptyResourceGroup => {
            vec![format!("az group delete --name {} --yes", quote(&rec.name))]
        }
        _ => match rec.kind() {
            ResourceKind::Disk if rec.action.to_ascii_lowercase().contains("snapshot") => vec![
                format!(
                    "az snapshot create --resource-group {} --name {} --source {}",
                    quote(&rec.resource_group),
                    quote(&format!("{}-pre-delete", rec.name)),
                    id
                ),
                format!("az disk delete --ids {} --yes", id),
            ],
            ResourceKind::Disk => vec![format!("az disk delete --ids {} --yes", id)],
            ResourceKind::Snapshot => vec![format!("az snapshot delete --ids {}", id)],
            ResourceKind::PublicIp => vec![format!("az network public-ip delete --ids {}", id)],
            ResourceKind::NetworkSecurityGroup => {
                vec![format!("az network nsg delete --ids {}", id)]
            }
            ResourceKind::NetworkInterface => vec![format!("az network nic delete --ids {}", id)],
            ResourceKind::LoadBalancer => vec![format!("az network lb delete --ids {}", id)],
            ResourceKind::VirtualMachine => vec![format!("az vm delete --ids {} --yes", id)],
            _ => vec![format!("az resource delete --ids {}", id)],
        },
    }
}

/// Single-quote for bash.
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
