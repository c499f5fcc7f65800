use crate::error::{AuditError, Result};
use std::process::Command;

/// Check if a command is available in PATH
pub fn is_command_available(cmd: &str) -> bool {
    Command::new(cmd)
        .arg("--version")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

/// Fail with the missing-tool error when a required command is absent
pub fn require_command(cmd: &str, install_hint: &str) -> Result<()> {
    if is_command_available(cmd) {
        log::debug!("Found required tool: {}", cmd);
        Ok(())
    } else {
        Err(AuditError::MissingTool {
            tool: cmd.to_string(),
            hint: install_hint.to_string(),
        })
    }
}
