use crate::domain::model::CommandOutput;
use crate::domain::ports::CommandRunner;
use crate::utils::error::{MumuError, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Spawns real processes through tokio.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, program: &str, args: &[String], timeout: Duration) -> Result<CommandOutput> {
        tracing::debug!("🔧 Running {} {}", program, args.join(" "));

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // No console window flashing up for every MuMuManager call.
        #[cfg(windows)]
        command.creation_flags(CREATE_NO_WINDOW);

        let child = command.spawn().map_err(|e| MumuError::SpawnError {
            message: format!("{}: {}", program, e),
        })?;

        let start = Instant::now();

        // Dropping the wait future on timeout kills the child (kill_on_drop).
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                tracing::warn!("⏱️ Command timed out after {:?}: {}", timeout, args.join(" "));
                return Err(MumuError::CommandTimeout {
                    seconds: timeout.as_secs(),
                    args: args.join(" "),
                });
            }
        };

        let result = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code(),
            duration: start.elapsed(),
        };

        tracing::debug!(
            "🔧 Command finished with {:?} in {:?}",
            result.exit_code,
            result.duration
        );

        Ok(result)
    }
}
