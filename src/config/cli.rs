use crate::domain::model::Action;
use crate::utils::error::{MumuError, Result};
use crate::utils::export::OutputFormat;
use crate::utils::validation::{parse_indices, validate_path, Validate};
use clap::{Args, Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "mumu-manager")]
#[command(about = "Inspect, control and batch-launch MuMu Player instances", version)]
pub struct CliConfig {
    /// Path to mumu-manager.toml
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to MuMuManager.exe (overrides auto-detection and the config file)
    #[arg(long, global = true)]
    pub executable: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, global = true, help = "Emit logs as JSON lines")]
    pub json_logs: bool,

    #[arg(long, global = true, help = "Log CPU and memory usage")]
    pub monitor: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// List instances, or show one
    Info(InfoArgs),
    /// Launch, shut down or restart instances
    Control {
        /// Instance list such as 0,2,5-8
        indices: String,
        action: Action,
    },
    /// Create new instances
    Create {
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u32,
    },
    /// Clone an existing instance
    Clone {
        source: u32,
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u32,
    },
    /// Delete instances
    Delete {
        indices: String,
        #[arg(long, help = "Do not ask for confirmation")]
        yes: bool,
    },
    /// Rename an instance
    Rename { index: u32, name: String },
    /// Run an adb command on instances
    Adb {
        indices: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,
    },
    /// Set a simulation value (device model, IMEI, ...)
    Simulation {
        indices: String,
        key: String,
        value: String,
    },
    /// Read or write instance settings
    #[command(subcommand)]
    Settings(SettingsCommand),
    /// Shut down every running instance, or the given ones
    StopAll {
        #[arg(long)]
        indices: Option<String>,
    },
    /// Print instance changes as they happen
    Watch {
        #[arg(long, default_value_t = 5)]
        interval: u64,
    },
    /// Batch automation
    #[command(subcommand)]
    Automation(AutomationCommand),
    /// Print host CPU and memory usage
    Monitor {
        #[arg(long, default_value_t = 10)]
        interval: u64,
        #[arg(long, help = "Stop after this many samples")]
        count: Option<u32>,
    },
    /// Print the MuMuManager version
    Version,
}

#[derive(Debug, Clone, Args)]
pub struct InfoArgs {
    /// Only this instance
    #[arg(long)]
    pub index: Option<u32>,

    #[arg(long, value_enum, default_value = "table")]
    pub format: OutputFormat,

    /// Write to a file instead of stdout
    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum SettingsCommand {
    /// Show all settings of an instance
    Show {
        index: u32,
        #[arg(long, help = "Only writable settings")]
        writable: bool,
    },
    /// Apply key=value settings
    Set {
        indices: String,
        #[arg(required = true)]
        pairs: Vec<String>,
    },
}

#[derive(Debug, Clone, Subcommand)]
pub enum AutomationCommand {
    /// Run a batch launch
    Run(AutomationRunArgs),
    /// Launch batches on concurrent workers
    Batch(AutomationBatchArgs),
    /// Print the saved automation settings
    Show {
        #[arg(long)]
        settings: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Default, Args)]
pub struct AutomationOverrides {
    #[arg(long)]
    pub from: Option<u32>,
    #[arg(long)]
    pub to: Option<u32>,
    #[arg(long)]
    pub batch_size: Option<usize>,
}

#[derive(Debug, Clone, Args)]
pub struct AutomationRunArgs {
    #[command(flatten)]
    pub range: AutomationOverrides,

    /// Seconds between batches
    #[arg(long)]
    pub batch_delay: Option<f64>,

    /// Seconds before the first batch and between launches
    #[arg(long)]
    pub start_delay: Option<f64>,

    #[arg(long)]
    pub cpu_threshold: Option<f32>,

    #[arg(long)]
    pub max_retries: Option<u32>,

    #[arg(long, help = "Keep the batch size regardless of host load")]
    pub no_ai: bool,

    #[arg(long, help = "Disable the CPU overload guard")]
    pub no_cpu_protection: bool,

    /// automation_settings.json to read
    #[arg(long)]
    pub settings: Option<PathBuf>,

    #[arg(long, help = "Write the effective settings back to the settings file")]
    pub save: bool,

    #[arg(long, help = "Wait for the scheduled auto start time first")]
    pub scheduled: bool,
}

#[derive(Debug, Clone, Args)]
pub struct AutomationBatchArgs {
    #[command(flatten)]
    pub range: AutomationOverrides,

    #[arg(long)]
    pub workers: Option<usize>,

    #[arg(long)]
    pub settings: Option<PathBuf>,
}

impl clap::ValueEnum for Action {
    fn value_variants<'a>() -> &'a [Self] {
        &[Action::Launch, Action::Shutdown, Action::Restart]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        let value = clap::builder::PossibleValue::new(self.as_str());
        Some(match self {
            Action::Launch => value.alias("start"),
            Action::Shutdown => value.alias("stop"),
            Action::Restart => value,
        })
    }
}

/// Parses `key=value` pairs; the value may itself contain `=`.
pub fn parse_setting_pairs(pairs: &[String]) -> Result<BTreeMap<String, String>> {
    pairs
        .iter()
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok((key.trim().to_string(), value.to_string()))
            }
            _ => Err(MumuError::ValidationError {
                message: format!("Expected key=value, got '{}'", pair),
            }),
        })
        .collect()
}

impl Validate for CliConfig {
    fn validate(&self) -> Result<()> {
        if let Some(executable) = &self.executable {
            validate_path("executable", &executable.to_string_lossy())?;
        }

        match &self.command {
            Command::Control { indices, .. } | Command::Delete { indices, .. } => {
                parse_indices(indices)?;
            }
            Command::Adb { indices, .. } | Command::Simulation { indices, .. } => {
                parse_indices(indices)?;
            }
            Command::Settings(SettingsCommand::Set { indices, pairs }) => {
                parse_indices(indices)?;
                parse_setting_pairs(pairs)?;
            }
            Command::StopAll {
                indices: Some(indices),
            } => {
                parse_indices(indices)?;
            }
            Command::Watch { interval } | Command::Monitor { interval, .. } if *interval == 0 => {
                return Err(MumuError::InvalidConfigValueError {
                    field: "interval".to_string(),
                    value: "0".to_string(),
                    reason: "Interval must be at least 1 second".to_string(),
                });
            }
            _ => {}
        }
        Ok(())
    }
}
