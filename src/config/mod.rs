pub mod types;

use crate::error::{ConfigError, Result};
use std::fs;
use std::path::{Path, PathBuf};

pub use types::{
    ActivityPolicy, AuditSettings, BackoffKind, CleanupPolicy, Config, CostPolicy, OrphanPolicy,
    ReportFormat, RetryConfig,
};

const CONFIG_FILE_NAME: &str = "azure-audit.toml";

/// Upper bound for `--parallel-jobs`
pub const MAX_PARALLEL_JOBS: usize = 16;

/// Get the global config file path (~/.azure-audit.toml)
pub fn global_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(format!(".{}", CONFIG_FILE_NAME)))
}

/// Get the local config file path (./azure-audit.toml)
pub fn local_config_path() -> PathBuf {
    PathBuf::from(CONFIG_FILE_NAME)
}

/// Load configuration.
///
/// An explicit path must exist and parse. Without one, the local file is
/// tried first, then the global one, then the built-in defaults. The result
/// is not validated: callers apply command-line overrides first, then call
/// [`validate_config`].
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let config = match explicit {
        Some(path) => read_config_file(path)?,
        None => {
            let local = local_config_path();
            if local.exists() {
                read_config_file(&local)?
            } else if let Some(global) = global_config_path().filter(|g| g.exists()) {
                read_config_file(&global)?
            } else {
                log::debug!("No config file found, using defaults");
                Config::default()
            }
        }
    };
    Ok(config)
}

/// Parse configuration from TOML text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config =
        toml::from_str(content).map_err(|e| ConfigError::ParsingFailed(e.to_string()))?;
    Ok(config)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadFailed {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    log::info!("Loaded configuration from {}", path.display());
    parse_config(&content)
}

/// Reject configurations whose values cannot describe a sane audit run.
pub fn validate_config(config: &Config) -> Result<()> {
    if config.audit.parallel_jobs == 0 || config.audit.parallel_jobs > MAX_PARALLEL_JOBS {
        return Err(invalid(
            "audit.parallel_jobs",
            format!(
                "must be between 1 and {}, got {}",
                MAX_PARALLEL_JOBS, config.audit.parallel_jobs
            ),
        ));
    }
    if config.audit.module_timeout_secs == 0 {
        return Err(invalid("audit.module_timeout_secs", "must be positive"));
    }
    if config.retry.max_attempts == 0 {
        return Err(invalid("retry.max_attempts", "must be at least 1"));
    }
    let cost = &config.cost;
    if cost.medium_threshold < 0.0 || cost.medium_threshold > cost.high_threshold {
        return Err(invalid(
            "cost.medium_threshold",
            format!(
                "must be non-negative and not above cost.high_threshold ({})",
                cost.high_threshold
            ),
        ));
    }
    let orphans = &config.orphans;
    if orphans.disk_medium_gb > orphans.disk_high_gb {
        return Err(invalid(
            "orphans.disk_medium_gb",
            "must not exceed orphans.disk_high_gb",
        ));
    }
    let activity = &config.activity;
    if activity.max_days == 0 || activity.max_days > 90 {
        return Err(invalid(
            "activity.max_days",
            "must be between 1 and the 90 day retention ceiling",
        ));
    }
    if activity.default_days == 0 || activity.default_days > activity.max_days {
        return Err(invalid(
            "activity.default_days",
            format!("must be between 1 and {}", activity.max_days),
        ));
    }
    if config.cleanup.candidate_tag_key.trim().is_empty()
        || config.cleanup.date_tag_key.trim().is_empty()
    {
        return Err(invalid("cleanup.*_tag_key", "tag keys must not be empty"));
    }
    Ok(())
}

fn invalid(field: &str, message: impl Into<String>) -> crate::error::AuditError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.into(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::types::CostImpact;

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = parse_config(
            r#"
            [audit]
            parallel_jobs = 2

            [cost]
            high_threshold = 500.0
            "#,
        )
        .unwrap();
        assert_eq!(config.audit.parallel_jobs, 2);
        assert_eq!(config.audit.module_timeout_secs, 900);
        assert_eq!(config.cost.high_threshold, 500.0);
        assert_eq!(config.cost.medium_threshold, 100.0);
        assert_eq!(config.orphans.disk_high_gb, 512);
    }

    #[test]
    fn test_policy_tables_are_configurable() {
        let config = parse_config(
            r#"
            [orphans.vm_family_impact]
            Standard_E = "High"
            "#,
        )
        .unwrap();
        assert_eq!(
            config.orphans.vm_family_impact.get("Standard_E"),
            Some(&CostImpact::High)
        );
    }

    #[test]
    fn test_rejects_bad_parallelism() {
        let mut config = Config::default();
        config.audit.parallel_jobs = 0;
        let err = validate_config(&config).unwrap_err();
        assert_eq!(err.exit_code(), 3);
        assert!(err.to_string().contains("parallel_jobs"));

        config.audit.parallel_jobs = MAX_PARALLEL_JOBS + 1;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        let mut config = Config::default();
        config.cost.medium_threshold = 2000.0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_rejects_window_beyond_retention() {
        let mut config = Config::default();
        config.activity.max_days = 120;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_missing_explicit_file_is_config_error() {
        let err = load_config(Some(Path::new("/nonexistent/azure-audit.toml"))).unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let err = parse_config("[audit\nparallel_jobs = ").unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }
}
