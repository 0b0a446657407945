use crate::backend::disk::default_instance_roots;
use crate::backend::manager::{ManagerOptions, DEFAULT_COMMAND_TIMEOUT};
use crate::backend::command_bus::DEFAULT_MAX_CONCURRENT_COMMANDS;
use crate::cache::smart_cache::{CacheStrategy, SmartCache, DEFAULT_MAX_SIZE_MB};
use crate::utils::error::{MumuError, Result};
use crate::utils::validation::{validate_path, validate_positive_number, Validate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "mumu-manager.toml";
pub const DEFAULT_SETTINGS_FILE: &str = "automation_settings.json";

/// Application config file. Every section is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub manager: Option<ManagerSection>,
    pub automation: Option<AutomationSection>,
    pub cache: Option<CacheSection>,
    pub monitoring: Option<MonitoringSection>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManagerSection {
    pub executable: Option<String>,
    pub command_timeout_seconds: Option<u64>,
    pub max_concurrent_commands: Option<usize>,
    pub instance_roots: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutomationSection {
    pub settings_file: Option<String>,
    pub monitor_interval_seconds: Option<u64>,
    pub shutdown_on_overload: Option<bool>,
    pub retry_base_delay_seconds: Option<f64>,
    pub max_concurrent_batches: Option<usize>,
    pub dispatch_delay_seconds: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheSection {
    pub max_size_mb: Option<usize>,
    pub strategy: Option<CacheStrategy>,
    pub instance_ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitoringSection {
    pub enabled: Option<bool>,
    pub json_logs: Option<bool>,
}

impl AppConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(MumuError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// Loads `path` when given, else `mumu-manager.toml` in the working
    /// directory if present, else defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => Self::from_file(DEFAULT_CONFIG_FILE),
            None => Ok(Self::default()),
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed = Self::substitute_env_vars(content)?;
        Ok(toml::from_str(&processed)?)
    }

    /// Replaces `${VAR}` with the environment value; unknown variables stay as written.
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| MumuError::ConfigError {
            message: format!("Invalid substitution pattern: {}", e),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    fn manager(&self) -> ManagerSection {
        self.manager.clone().unwrap_or_default()
    }

    fn automation(&self) -> AutomationSection {
        self.automation.clone().unwrap_or_default()
    }

    fn cache(&self) -> CacheSection {
        self.cache.clone().unwrap_or_default()
    }

    pub fn executable(&self) -> Option<PathBuf> {
        self.manager().executable.map(PathBuf::from)
    }

    pub fn command_timeout(&self) -> Duration {
        self.manager()
            .command_timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_COMMAND_TIMEOUT)
    }

    pub fn instance_roots(&self) -> Vec<PathBuf> {
        self.manager()
            .instance_roots
            .map(|roots| roots.into_iter().map(PathBuf::from).collect())
            .unwrap_or_else(default_instance_roots)
    }

    pub fn settings_file(&self) -> PathBuf {
        PathBuf::from(
            self.automation()
                .settings_file
                .unwrap_or_else(|| DEFAULT_SETTINGS_FILE.to_string()),
        )
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.automation().monitor_interval_seconds.unwrap_or(10))
    }

    pub fn shutdown_on_overload(&self) -> bool {
        self.automation().shutdown_on_overload.unwrap_or(true)
    }

    pub fn retry_base_delay(&self) -> Duration {
        seconds(self.automation().retry_base_delay_seconds, 2.0)
    }

    pub fn max_concurrent_batches(&self) -> usize {
        self.automation().max_concurrent_batches.unwrap_or(2)
    }

    pub fn dispatch_delay(&self) -> Duration {
        seconds(self.automation().dispatch_delay_seconds, 2.0)
    }

    pub fn instance_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache().instance_ttl_seconds.unwrap_or(3))
    }

    pub fn monitoring_enabled(&self) -> bool {
        self.monitoring
            .as_ref()
            .and_then(|m| m.enabled)
            .unwrap_or(false)
    }

    pub fn json_logs(&self) -> bool {
        self.monitoring
            .as_ref()
            .and_then(|m| m.json_logs)
            .unwrap_or(false)
    }

    /// Manager options; `executable_override` (from the command line) wins over the file.
    pub fn manager_options(&self, executable_override: Option<PathBuf>) -> ManagerOptions {
        let manager = self.manager();
        let cache = self.cache();
        ManagerOptions {
            executable: executable_override.or_else(|| self.executable()),
            command_timeout: self.command_timeout(),
            max_concurrent_commands: manager
                .max_concurrent_commands
                .unwrap_or(DEFAULT_MAX_CONCURRENT_COMMANDS),
            instance_roots: self.instance_roots(),
            cache: Arc::new(SmartCache::new(
                cache.max_size_mb.unwrap_or(DEFAULT_MAX_SIZE_MB),
                cache.strategy.unwrap_or(CacheStrategy::Smart),
            )),
        }
    }
}

fn seconds(value: Option<f64>, default: f64) -> Duration {
    value
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .unwrap_or_else(|| Duration::from_secs_f64(default))
}

fn validate_seconds(field: &str, value: Option<f64>) -> Result<()> {
    match value {
        Some(secs) if !secs.is_finite() || secs < 0.0 => Err(MumuError::InvalidConfigValueError {
            field: field.to_string(),
            value: secs.to_string(),
            reason: "Seconds must be a non-negative number".to_string(),
        }),
        _ => Ok(()),
    }
}

impl Validate for AppConfig {
    fn validate(&self) -> Result<()> {
        let manager = self.manager();
        if let Some(executable) = &manager.executable {
            validate_path("manager.executable", executable)?;
        }
        if let Some(timeout) = manager.command_timeout_seconds {
            validate_positive_number("manager.command_timeout_seconds", timeout as usize, 1)?;
        }
        if let Some(max) = manager.max_concurrent_commands {
            validate_positive_number("manager.max_concurrent_commands", max, 1)?;
        }

        let automation = self.automation();
        if let Some(file) = &automation.settings_file {
            validate_path("automation.settings_file", file)?;
        }
        if let Some(interval) = automation.monitor_interval_seconds {
            validate_positive_number("automation.monitor_interval_seconds", interval as usize, 1)?;
        }
        if let Some(workers) = automation.max_concurrent_batches {
            validate_positive_number("automation.max_concurrent_batches", workers, 1)?;
        }
        validate_seconds("automation.retry_base_delay_seconds", automation.retry_base_delay_seconds)?;
        validate_seconds("automation.dispatch_delay_seconds", automation.dispatch_delay_seconds)?;

        if let Some(size) = self.cache().max_size_mb {
            validate_positive_number("cache.max_size_mb", size, 1)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = AppConfig::from_toml_str("").unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.command_timeout(), DEFAULT_COMMAND_TIMEOUT);
        assert_eq!(config.settings_file(), PathBuf::from(DEFAULT_SETTINGS_FILE));
        assert!(config.shutdown_on_overload());
        assert_eq!(config.max_concurrent_batches(), 2);
        assert!(!config.json_logs());
    }

    #[test]
    fn test_parse_sections() {
        let config = AppConfig::from_toml_str(
            r#"
[manager]
executable = 'D:\MuMu\shell\MuMuManager.exe'
command_timeout_seconds = 30
instance_roots = ["D:/vms"]

[automation]
monitor_interval_seconds = 5
shutdown_on_overload = false
dispatch_delay_seconds = 0.5

[cache]
strategy = "lazy"

[monitoring]
enabled = true
json_logs = true
"#,
        )
        .unwrap();

        assert!(config.validate().is_ok());
        assert_eq!(config.command_timeout(), Duration::from_secs(30));
        assert_eq!(config.instance_roots(), vec![PathBuf::from("D:/vms")]);
        assert_eq!(config.monitor_interval(), Duration::from_secs(5));
        assert!(!config.shutdown_on_overload());
        assert_eq!(config.dispatch_delay(), Duration::from_millis(500));
        assert_eq!(config.cache.as_ref().unwrap().strategy, Some(CacheStrategy::Lazy));
        assert!(config.monitoring_enabled());

        let options = config.manager_options(Some(PathBuf::from("override.exe")));
        assert_eq!(options.executable, Some(PathBuf::from("override.exe")));
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("MUMU_TEST_EXECUTABLE", "C:/MuMu/MuMuManager.exe");

        let config = AppConfig::from_toml_str(
            r#"
[manager]
executable = "${MUMU_TEST_EXECUTABLE}"
"#,
        )
        .unwrap();
        assert_eq!(config.executable(), Some(PathBuf::from("C:/MuMu/MuMuManager.exe")));

        std::env::remove_var("MUMU_TEST_EXECUTABLE");
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let config = AppConfig::from_toml_str("[manager]\nmax_concurrent_commands = 0\n").unwrap();
        assert!(config.validate().is_err());

        let config = AppConfig::from_toml_str("[automation]\ndispatch_delay_seconds = -1.0\n").unwrap();
        assert!(config.validate().is_err());

        assert!(AppConfig::from_toml_str("[manager\n").is_err());
    }

    #[test]
    fn test_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(b"[cache]\nmax_size_mb = 8\ninstance_ttl_seconds = 7\n")
            .unwrap();

        let config = AppConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.instance_cache_ttl(), Duration::from_secs(7));
    }
}
