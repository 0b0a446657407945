use crate::backend::command_bus::{BusStats, CommandBus, DEFAULT_MAX_CONCURRENT_COMMANDS};
use crate::backend::disk::{apply_disk_usage, default_instance_roots};
use crate::backend::parse::{parse_instances, parse_single_instance, InstanceMap};
use crate::backend::runner::ProcessRunner;
use crate::cache::smart_cache::{CommandKind, SmartCache};
use crate::domain::model::{Action, CommandOutput, CommandPriority, InstanceInfo};
use crate::domain::ports::{CommandRunner, InstanceController, InstanceSource};
use crate::utils::error::{MumuError, Result};
use crate::utils::validation::{
    join_indices, validate_indices, validate_non_empty_string, validate_range,
};
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_EXECUTABLE_PATHS: [&str; 7] = [
    r"C:\Program Files\Netease\MuMuPlayer\nx_main\MuMuManager.exe",
    r"C:\Program Files\Netease\MuMuPlayerGlobal-12.0\shell\MuMuManager.exe",
    r"C:\Program Files\Netease\MuMuPlayer-12.0\shell\MuMuManager.exe",
    r"C:\Program Files (x86)\Netease\MuMuPlayerGlobal-12.0\shell\MuMuManager.exe",
    r"C:\Program Files (x86)\Netease\MuMuPlayer-12.0\shell\MuMuManager.exe",
    r"C:\Program Files\Netease\MuMuPlayerGlobal-12.0\nx_main\MuMuManager.exe",
    r"C:\Program Files\Netease\MuMuPlayer-12.0\nx_main\MuMuManager.exe",
];

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);
pub const MAX_CREATE_COUNT: u32 = 50;
pub const MAX_CLONE_COUNT: u32 = 20;
pub const MAX_NAME_LENGTH: usize = 100;

const DANGEROUS_ADB_PATTERNS: [&str; 6] = ["rm -rf", "format", "factory", "wipe", "delete", "dd if="];
const ADB_TOKEN_PATTERN: &str = r#""([^"]*)"|'([^']*)'|(\S+)"#;

pub fn detect_executable() -> Option<PathBuf> {
    DEFAULT_EXECUTABLE_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|path| path.is_file())
}

#[derive(Clone)]
pub struct ManagerOptions {
    pub executable: Option<PathBuf>,
    pub command_timeout: Duration,
    pub max_concurrent_commands: usize,
    pub instance_roots: Vec<PathBuf>,
    pub cache: Arc<SmartCache>,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            executable: None,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            max_concurrent_commands: DEFAULT_MAX_CONCURRENT_COMMANDS,
            instance_roots: default_instance_roots(),
            cache: Arc::new(SmartCache::default()),
        }
    }
}

/// Wrapper around the `MuMuManager.exe` command line tool.
pub struct MumuManager<R: CommandRunner = ProcessRunner> {
    executable: Option<PathBuf>,
    bus: CommandBus<R>,
    timeout: Duration,
    instance_roots: Vec<PathBuf>,
    cache: Arc<SmartCache>,
}

impl MumuManager<ProcessRunner> {
    pub fn new(options: ManagerOptions) -> Self {
        Self::with_runner(ProcessRunner::new(), options)
    }
}

impl<R: CommandRunner> MumuManager<R> {
    pub fn with_runner(runner: R, options: ManagerOptions) -> Self {
        let executable = options.executable.or_else(|| {
            let detected = detect_executable();
            match &detected {
                Some(path) => tracing::info!("✅ Auto-detected MuMuManager.exe at: {}", path.display()),
                None => tracing::warn!("⚠️ Could not auto-detect MuMuManager.exe path"),
            }
            detected
        });

        Self {
            executable,
            bus: CommandBus::new(runner, options.max_concurrent_commands),
            timeout: options.command_timeout,
            instance_roots: options.instance_roots,
            cache: options.cache,
        }
    }

    pub fn executable(&self) -> Option<&Path> {
        self.executable.as_deref()
    }

    pub fn is_valid(&self) -> bool {
        self.executable
            .as_deref()
            .map(Path::is_file)
            .unwrap_or(false)
    }

    pub fn cache(&self) -> &Arc<SmartCache> {
        &self.cache
    }

    pub fn bus_stats(&self) -> BusStats {
        self.bus.stats()
    }

    async fn execute(&self, args: Vec<String>, priority: CommandPriority) -> Result<CommandOutput> {
        let executable = match self.executable.as_deref() {
            Some(path) if path.is_file() => path,
            other => {
                return Err(MumuError::ExecutableNotFound {
                    path: other.map(|p| p.display().to_string()).unwrap_or_default(),
                })
            }
        };

        tracing::debug!("🔧 MuMuManager {}", args.join(" "));
        let output = self
            .bus
            .execute(&executable.to_string_lossy(), &args, priority, self.timeout)
            .await?;

        if !output.success() {
            let err = MumuError::CommandFailed {
                return_code: output.exit_code,
                stderr: output.stderr,
                stdout: output.stdout,
            };
            tracing::debug!("❌ {}", err);
            return Err(err);
        }

        Ok(output)
    }

    /// Runs one command and returns trimmed stdout and stderr joined by a newline.
    pub async fn run_command(&self, args: Vec<String>, priority: CommandPriority) -> Result<String> {
        Ok(self.execute(args, priority).await?.merged())
    }

    pub async fn version(&self) -> Result<String> {
        let params = BTreeMap::new();
        if let Some(Value::String(cached)) = self.cache.get("version", &params) {
            return Ok(cached);
        }

        let version = self
            .run_command(args(["--version"]), CommandPriority::Low)
            .await?;
        self.cache.set(
            "version",
            &params,
            Value::String(version.clone()),
            CommandKind::SystemInfo,
        );
        Ok(version)
    }

    pub async fn get_all_info(&self) -> Result<InstanceMap> {
        let output = self
            .execute(args(["info", "-v", "all"]), CommandPriority::Low)
            .await?;
        let instances = parse_instances(&output.stdout)?;
        tracing::debug!("📋 Parsed {} instances", instances.len());

        let roots = self.instance_roots.clone();
        tokio::task::spawn_blocking(move || {
            instances
                .into_iter()
                .map(|(index, mut info)| {
                    apply_disk_usage(&mut info, &roots);
                    (index, info)
                })
                .collect()
        })
        .await
        .map_err(|e| MumuError::IoError(std::io::Error::other(e)))
    }

    pub async fn get_single_info(&self, index: u32) -> Result<InstanceInfo> {
        let output = self
            .execute(args(["info", "-v", &index.to_string()]), CommandPriority::Low)
            .await?;
        let mut info = parse_single_instance(&output.stdout, index)?;

        let roots = self.instance_roots.clone();
        tokio::task::spawn_blocking(move || {
            apply_disk_usage(&mut info, &roots);
            info
        })
        .await
        .map_err(|e| MumuError::IoError(std::io::Error::other(e)))
    }

    pub async fn control_instance(&self, indices: &[u32], action: Action) -> Result<String> {
        validate_indices(indices)?;
        let command = args(["control", "--vmindex", &join_indices(indices), action.as_str()]);
        self.run_command(command, action.priority()).await
    }

    pub async fn create_instance(&self, count: u32) -> Result<String> {
        validate_range("count", count, 1, MAX_CREATE_COUNT)?;
        self.run_command(args(["create", "-n", &count.to_string()]), CommandPriority::Normal)
            .await
    }

    pub async fn clone_instance(&self, source: u32, count: u32) -> Result<String> {
        validate_range("count", count, 1, MAX_CLONE_COUNT)?;
        let command = args(["clone", "-v", &source.to_string(), "-n", &count.to_string()]);
        self.run_command(command, CommandPriority::Normal).await
    }

    pub async fn delete_instance(&self, indices: &[u32]) -> Result<String> {
        validate_indices(indices)?;
        self.run_command(args(["delete", "-v", &join_indices(indices)]), CommandPriority::High)
            .await
    }

    pub async fn rename_instance(&self, index: u32, new_name: &str) -> Result<String> {
        validate_non_empty_string("name", new_name)?;
        let name = new_name.trim();
        if name.chars().count() > MAX_NAME_LENGTH {
            return Err(MumuError::ValidationError {
                message: format!("Instance name is longer than {} characters", MAX_NAME_LENGTH),
            });
        }

        let command = args(["rename", "-v", &index.to_string(), "-n", name]);
        self.run_command(command, CommandPriority::Normal).await
    }

    pub async fn run_adb(&self, indices: &[u32], command: &str) -> Result<String> {
        validate_indices(indices)?;
        let tokens = tokenize_adb_command(command)?;

        let mut full = args(["adb", "-v", &join_indices(indices), "-c"]);
        full.extend(tokens);
        self.run_command(full, CommandPriority::High).await
    }

    pub async fn set_simulation_value(
        &self,
        indices: &[u32],
        key: &str,
        value: &str,
    ) -> Result<String> {
        validate_indices(indices)?;
        validate_non_empty_string("key", key)?;
        let command = args([
            "simulation",
            "-v",
            &join_indices(indices),
            "-sk",
            key.trim(),
            "-sv",
            value,
        ]);
        self.run_command(command, CommandPriority::Normal).await
    }

    pub async fn get_settings_info(&self, index: u32) -> Result<Value> {
        self.cached_setting_query(index, "-i", "setting_info").await
    }

    pub async fn get_writable_settings(&self, index: u32) -> Result<Value> {
        self.cached_setting_query(index, "-aw", "setting_writable").await
    }

    async fn cached_setting_query(&self, index: u32, flag: &str, cache_name: &str) -> Result<Value> {
        let params = BTreeMap::from([("index".to_string(), index.to_string())]);
        if let Some(cached) = self.cache.get(cache_name, &params) {
            return Ok(cached);
        }

        let output = self
            .execute(args(["setting", "-v", &index.to_string(), flag]), CommandPriority::Low)
            .await?;
        let value: Value = serde_json::from_str(output.stdout.trim()).map_err(|e| {
            MumuError::InvalidOutput {
                message: format!("settings for instance {} are not JSON: {}", index, e),
                raw: output.stdout.clone(),
            }
        })?;

        self.cache
            .set(cache_name, &params, value.clone(), CommandKind::Default);
        Ok(value)
    }

    pub async fn set_settings(
        &self,
        indices: &[u32],
        settings: &BTreeMap<String, String>,
    ) -> Result<String> {
        validate_indices(indices)?;
        if settings.is_empty() {
            return Ok("No settings to apply".to_string());
        }

        let mut command = args(["setting", "-v", &join_indices(indices)]);
        for (key, value) in settings {
            let key = key.trim();
            if key.is_empty() {
                return Err(MumuError::ValidationError {
                    message: "Setting key cannot be empty".to_string(),
                });
            }
            command.extend(args(["-k", key, "-val", value]));
        }

        let result = self.run_command(command, CommandPriority::Normal).await;
        let dropped = self.cache.invalidate_pattern("setting_");
        tracing::debug!("🗑️ Invalidated {} cached settings entries", dropped);
        result
    }
}

fn args<const N: usize>(parts: [&str; N]) -> Vec<String> {
    parts.iter().map(|part| part.to_string()).collect()
}

/// Splits an adb command honouring quotes and refuses destructive commands.
pub fn tokenize_adb_command(command: &str) -> Result<Vec<String>> {
    let command = command.trim();
    if command.is_empty() {
        return Err(MumuError::ValidationError {
            message: "ADB command cannot be empty".to_string(),
        });
    }

    let lower = command.to_lowercase();
    if let Some(pattern) = DANGEROUS_ADB_PATTERNS.iter().find(|p| lower.contains(*p)) {
        return Err(MumuError::ValidationError {
            message: format!("ADB command contains a dangerous pattern: '{}'", pattern),
        });
    }

    let regex = Regex::new(ADB_TOKEN_PATTERN).map_err(|e| MumuError::ConfigError {
        message: format!("Invalid adb token pattern: {}", e),
    })?;

    Ok(regex
        .captures_iter(command)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3)))
        .map(|m| m.as_str().to_string())
        .collect())
}

#[async_trait]
impl<R: CommandRunner> InstanceController for MumuManager<R> {
    async fn control(&self, indices: &[u32], action: Action) -> Result<String> {
        self.control_instance(indices, action).await
    }
}

#[async_trait]
impl<R: CommandRunner> InstanceSource for MumuManager<R> {
    async fn fetch_all(&self) -> Result<InstanceMap> {
        self.get_all_info().await
    }
}
