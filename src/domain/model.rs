use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::utils::error::MumuError;

/// Lifecycle operation accepted by `MuMuManager.exe control`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Launch,
    Shutdown,
    Restart,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Launch => "launch",
            Action::Shutdown => "shutdown",
            Action::Restart => "restart",
        }
    }

    /// Stop operations jump the command queue, start operations come right after.
    pub fn priority(&self) -> CommandPriority {
        match self {
            Action::Shutdown => CommandPriority::Critical,
            Action::Launch | Action::Restart => CommandPriority::High,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = MumuError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "launch" | "start" => Ok(Action::Launch),
            "shutdown" | "stop" | "kill" => Ok(Action::Shutdown),
            "restart" | "reboot" => Ok(Action::Restart),
            other => Err(MumuError::ValidationError {
                message: format!(
                    "Unknown action '{}'. Expected launch, shutdown or restart",
                    other
                ),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CommandPriority {
    Critical = 0,
    High = 1,
    Normal = 2,
    Low = 3,
}

/// Captured result of one external process run.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub duration: std::time::Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// stdout and stderr, trimmed, joined by a newline; empty streams are skipped.
    pub fn merged(&self) -> String {
        [self.stdout.trim(), self.stderr.trim()]
            .iter()
            .filter(|part| !part.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// One emulator instance as reported by `MuMuManager.exe info`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub index: u32,
    pub name: Option<String>,
    pub status: Option<String>,
    pub running: Option<bool>,
    pub cpu: Option<String>,
    pub memory: Option<String>,
    pub disk_usage: Option<String>,
    #[serde(default)]
    pub disk_size_bytes: u64,
    pub path: Option<String>,
    pub version: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

const KNOWN_FIELDS: [&str; 10] = [
    "index",
    "name",
    "status",
    "running",
    "cpu",
    "memory",
    "disk_usage",
    "disk_size_bytes",
    "path",
    "version",
];

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

fn value_to_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|v| v != 0),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "running" => Some(true),
            "false" | "0" | "no" | "stopped" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Reads an index that may arrive as a number or a numeric string.
pub fn value_to_index(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl InstanceInfo {
    pub fn new(index: u32) -> Self {
        Self {
            index,
            name: None,
            status: None,
            running: None,
            cpu: None,
            memory: None,
            disk_usage: None,
            disk_size_bytes: 0,
            path: None,
            version: None,
            extra: Map::new(),
        }
    }

    /// Builds an instance from a JSON object. `fallback_index` is used when the
    /// object carries no usable `index`.
    pub fn from_json(object: &Map<String, Value>, fallback_index: Option<u32>) -> Option<Self> {
        let index = object
            .get("index")
            .and_then(value_to_index)
            .or(fallback_index)?;

        let text = |key: &str| object.get(key).and_then(scalar_to_string);

        let running = object
            .get("running")
            .and_then(value_to_bool)
            .or_else(|| object.get("is_android_started").and_then(value_to_bool))
            .or_else(|| object.get("is_process_started").and_then(value_to_bool));

        let extra = object
            .iter()
            .filter(|(key, _)| !KNOWN_FIELDS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Some(Self {
            index,
            name: text("name"),
            status: text("status"),
            running,
            cpu: text("cpu"),
            memory: text("memory"),
            disk_usage: text("disk_usage"),
            disk_size_bytes: object
                .get("disk_size_bytes")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            path: text("path").filter(|p| !p.trim().is_empty()),
            version: text("version"),
            extra,
        })
    }

    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("Instance {}", self.index))
    }

    pub fn display_status(&self) -> String {
        match (&self.status, self.running) {
            (Some(status), _) => status.clone(),
            (None, Some(true)) => "running".to_string(),
            (None, Some(false)) => "stopped".to_string(),
            (None, None) => "unknown".to_string(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.unwrap_or_else(|| {
            self.status
                .as_deref()
                .is_some_and(|s| matches!(s.trim().to_lowercase().as_str(), "running" | "started"))
        })
    }

    /// Compares the fields the instance table cares about; values are compared as
    /// trimmed strings so `"1"` and `1` are equal.
    pub fn has_changed(&self, other: &InstanceInfo) -> bool {
        fn differs(a: Option<String>, b: Option<String>) -> bool {
            match (a, b) {
                (None, None) => false,
                (Some(a), Some(b)) => a.trim() != b.trim(),
                _ => true,
            }
        }

        differs(self.name.clone(), other.name.clone())
            || differs(self.status.clone(), other.status.clone())
            || differs(self.cpu.clone(), other.cpu.clone())
            || differs(self.memory.clone(), other.memory.clone())
            || differs(self.disk_usage.clone(), other.disk_usage.clone())
            || differs(
                self.running.map(|r| r.to_string()),
                other.running.map(|r| r.to_string()),
            )
    }
}

/// Host load reading used for batch sizing and CPU protection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceSample {
    pub cpu_percent: f32,
    pub memory_percent: f32,
}

impl ResourceSample {
    pub fn new(cpu_percent: f32, memory_percent: f32) -> Self {
        Self {
            cpu_percent,
            memory_percent,
        }
    }
}
