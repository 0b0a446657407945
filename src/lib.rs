pub mod automation;
pub mod backend;
pub mod cache;
pub mod config;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;

pub use automation::{AutomationConfig, AutomationEngine, BatchProcessor};
pub use backend::{InstanceCache, ManagerOptions, MumuManager};
pub use config::{AppConfig, AutomationSettings};
pub use domain::model::{Action, InstanceInfo};
pub use utils::error::{MumuError, Result};
