use crate::automation::engine::AutomationConfig;
use crate::automation::schedule::{AutoStartSchedule, DEFAULT_AUTO_START_TIME};
use crate::utils::error::{MumuError, Result};
use crate::utils::validation::{validate_cpu_threshold, validate_positive_number, Validate};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Persisted automation settings (`automation_settings.json`).
/// Missing keys take their default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomationSettings {
    pub enable_auto_start: bool,
    pub auto_start_time: String,
    pub from_instance: u32,
    pub to_instance: u32,
    pub batch_size: usize,
    /// Seconds.
    pub batch_delay: f64,
    /// Seconds.
    pub start_delay: f64,
    pub cpu_threshold: f32,
    pub max_retries: u32,
    pub enable_ai_optimization: bool,
    pub enable_cpu_protection: bool,
}

impl Default for AutomationSettings {
    fn default() -> Self {
        let engine = AutomationConfig::default();
        Self {
            enable_auto_start: false,
            auto_start_time: DEFAULT_AUTO_START_TIME.to_string(),
            from_instance: engine.from_instance,
            to_instance: engine.to_instance,
            batch_size: engine.batch_size,
            batch_delay: engine.batch_delay.as_secs_f64(),
            start_delay: engine.start_delay.as_secs_f64(),
            cpu_threshold: engine.cpu_threshold,
            max_retries: engine.max_retries,
            enable_ai_optimization: engine.enable_ai_optimization,
            enable_cpu_protection: engine.enable_cpu_protection,
        }
    }
}

fn delay(field: &str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs).map_err(|_| MumuError::InvalidConfigValueError {
        field: field.to_string(),
        value: secs.to_string(),
        reason: "Delay must be a non-negative number of seconds".to_string(),
    })
}

impl AutomationSettings {
    /// Missing file gives defaults; an unreadable or corrupt file is an error.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!("No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let settings: Self = serde_json::from_str(&content)?;
        tracing::info!("✅ Loaded automation settings from {}", path.display());
        Ok(settings)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        tracing::info!("💾 Saved automation settings to {}", path.display());
        Ok(())
    }

    pub fn schedule(&self) -> Result<AutoStartSchedule> {
        AutoStartSchedule::parse(self.enable_auto_start, &self.auto_start_time)
    }

    /// Engine config from these settings; fields the file does not carry come from `base`.
    pub fn to_automation_config(&self, base: AutomationConfig) -> Result<AutomationConfig> {
        Ok(AutomationConfig {
            from_instance: self.from_instance,
            to_instance: self.to_instance,
            batch_size: self.batch_size,
            batch_delay: delay("batch_delay", self.batch_delay)?,
            start_delay: delay("start_delay", self.start_delay)?,
            cpu_threshold: self.cpu_threshold,
            max_retries: self.max_retries,
            enable_ai_optimization: self.enable_ai_optimization,
            enable_cpu_protection: self.enable_cpu_protection,
            ..base
        })
    }
}

impl Validate for AutomationSettings {
    fn validate(&self) -> Result<()> {
        if self.from_instance > self.to_instance {
            return Err(MumuError::ConfigValidationError {
                field: "from_instance".to_string(),
                message: "From instance cannot be greater than to instance".to_string(),
            });
        }
        validate_positive_number("batch_size", self.batch_size, 1)?;
        delay("batch_delay", self.batch_delay)?;
        delay("start_delay", self.start_delay)?;
        validate_cpu_threshold(self.cpu_threshold)?;
        self.schedule()?;
        Ok(())
    }
}
