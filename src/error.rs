use thiserror::Error;

/// Top-level error for the audit CLI.
#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Authorization failed: {0}")]
    Auth(String),

    #[error("Required tool '{tool}' not found. {hint}")]
    MissingTool { tool: String, hint: String },

    #[error("Azure request failed: {0}")]
    Transport(TransportError),

    #[error("{module} module failed: {reason}")]
    ModuleFailed { module: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {message}")]
    ReadFailed { path: String, message: String },

    #[error("Configuration parsing failed: {0}")]
    ParsingFailed(String),

    #[error("Invalid configuration value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

/// Failures reported by the Azure transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("not authorized: {0}")]
    Auth(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("command failed: {0}")]
    CommandFailed(String),

    #[error("unexpected response: {0}")]
    Parse(String),

    #[error("failed to launch az: {0}")]
    Spawn(String),
}

impl TransportError {
    /// Only transient failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Transient(_))
    }
}

impl From<TransportError> for AuditError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Auth(msg) => AuditError::Auth(msg),
            other => AuditError::Transport(other),
        }
    }
}

impl AuditError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            AuditError::Validation(_) | AuditError::Config(_) => 3,
            AuditError::Auth(_) => 2,
            AuditError::MissingTool { .. } => 4,
            _ => 1,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        AuditError::Validation(message.into())
    }
}

pub type Result<T> = std::result::Result<T, AuditError>;
