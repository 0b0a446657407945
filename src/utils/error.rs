use thiserror::Error;

#[derive(Error, Debug)]
pub enum MumuError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("CSV export error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Configuration validation failed for '{field}': {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Missing configuration value: {field}")]
    MissingConfigError { field: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("MuMuManager executable not found: '{path}'")]
    ExecutableNotFound { path: String },

    #[error("Failed to spawn command: {message}")]
    SpawnError { message: String },

    #[error("Command timed out after {seconds}s (args: {args})")]
    CommandTimeout { seconds: u64, args: String },

    #[error("{}", command_failure_message(.return_code, .stderr, .stdout))]
    CommandFailed {
        return_code: Option<i32>,
        stderr: String,
        stdout: String,
    },

    #[error("Invalid backend output: {message}")]
    InvalidOutput { message: String, raw: String },

    #[error("Validation error: {message}")]
    ValidationError { message: String },

    #[error("Automation is already running (state: {state})")]
    AutomationAlreadyRunning { state: String },

    #[error("Automation error: {message}")]
    AutomationError { message: String },

    #[error("CPU usage {cpu:.1}% exceeded threshold {threshold:.1}%")]
    ResourceLimitExceeded { cpu: f32, threshold: f32 },
}

pub type Result<T> = std::result::Result<T, MumuError>;

/// Exit code MuMuManager.exe reports when it rejects the argument set.
pub const MUMU_REJECTED_ARGS_CODE: i32 = -21;

const TRANSIENT_KEYWORDS: [&str; 8] = [
    "timeout",
    "connection",
    "busy",
    "resource",
    "temporary",
    "network",
    "unavailable",
    "overloaded",
];

fn command_failure_message(return_code: &Option<i32>, stderr: &str, stdout: &str) -> String {
    let mut parts = vec![match *return_code {
        Some(code) => format!("Command failed (return code: {})", code),
        None => "Command failed (terminated by signal)".to_string(),
    }];
    if *return_code == Some(MUMU_REJECTED_ARGS_CODE) {
        parts.push(
            "MuMu executable returned error -21 (possibly needs different parameters or environment)"
                .to_string(),
        );
    }
    if !stderr.trim().is_empty() {
        parts.push(format!("Error: {}", stderr.trim()));
    }
    if !stdout.trim().is_empty() {
        parts.push(format!("Output: {}", stdout.trim()));
    }
    parts.join("\n")
}

/// Returns true when the text looks like a temporary failure worth retrying.
pub fn is_transient_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    TRANSIENT_KEYWORDS.iter().any(|keyword| lower.contains(keyword))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Backend,
    Automation,
    System,
    Data,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl MumuError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            MumuError::ConfigError { .. }
            | MumuError::ConfigValidationError { .. }
            | MumuError::MissingConfigError { .. }
            | MumuError::InvalidConfigValueError { .. } => ErrorCategory::Configuration,
            MumuError::ExecutableNotFound { .. }
            | MumuError::SpawnError { .. }
            | MumuError::CommandTimeout { .. }
            | MumuError::CommandFailed { .. } => ErrorCategory::Backend,
            MumuError::AutomationAlreadyRunning { .. }
            | MumuError::AutomationError { .. }
            | MumuError::ResourceLimitExceeded { .. } => ErrorCategory::Automation,
            MumuError::IoError(_) => ErrorCategory::System,
            MumuError::SerializationError(_)
            | MumuError::CsvError(_)
            | MumuError::InvalidOutput { .. }
            | MumuError::ValidationError { .. } => ErrorCategory::Data,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            MumuError::AutomationAlreadyRunning { .. } => ErrorSeverity::Low,
            MumuError::CommandTimeout { .. } | MumuError::ResourceLimitExceeded { .. } => {
                ErrorSeverity::Medium
            }
            MumuError::ExecutableNotFound { .. } | MumuError::IoError(_) => {
                ErrorSeverity::Critical
            }
            _ => ErrorSeverity::High,
        }
    }

    /// Whether a retry has a reasonable chance of succeeding.
    pub fn is_transient(&self) -> bool {
        match self {
            MumuError::CommandTimeout { .. } | MumuError::ResourceLimitExceeded { .. } => true,
            MumuError::CommandFailed { .. } | MumuError::SpawnError { .. } => {
                is_transient_message(&self.to_string())
            }
            _ => false,
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Configuration => {
                "Check mumu-manager.toml and automation_settings.json for invalid values"
            }
            ErrorCategory::Backend => match self {
                MumuError::ExecutableNotFound { .. } => {
                    "Install MuMu Player or pass --executable with the path to MuMuManager.exe"
                }
                MumuError::CommandTimeout { .. } => {
                    "Raise manager.command_timeout_seconds or reduce the number of concurrent commands"
                }
                _ => "Verify the instance indices exist and MuMu Player is running",
            },
            ErrorCategory::Automation => match self {
                MumuError::ResourceLimitExceeded { .. } => {
                    "Reduce batch_size or increase batch_delay, then run again when the host is idle"
                }
                _ => "Wait for the current automation to finish or stop it first",
            },
            ErrorCategory::System => "Check file permissions and available disk space",
            ErrorCategory::Data => "Re-run with --verbose to inspect the raw backend output",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            MumuError::ExecutableNotFound { path } if path.is_empty() => {
                "MuMuManager.exe could not be located".to_string()
            }
            MumuError::CommandFailed { .. } => {
                format!("MuMu Player rejected the command:\n{}", self)
            }
            MumuError::InvalidOutput { message, .. } => {
                format!("MuMu Player returned data that could not be read ({})", message)
            }
            _ => self.to_string(),
        }
    }
}

impl From<toml::de::Error> for MumuError {
    fn from(err: toml::de::Error) -> Self {
        MumuError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", err),
        }
    }
}
