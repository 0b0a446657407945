use crate::domain::model::{Action, CommandOutput, InstanceInfo, ResourceSample};
use crate::utils::error::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;

/// Runs an external program and captures its output.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String], timeout: Duration) -> Result<CommandOutput>;
}

/// Starts and stops emulator instances.
#[async_trait]
pub trait InstanceController: Send + Sync {
    async fn control(&self, indices: &[u32], action: Action) -> Result<String>;

    async fn stop_all(&self, indices: &[u32]) -> Result<()> {
        for chunk in indices.chunks(crate::utils::validation::MAX_INDICES_PER_COMMAND) {
            self.control(chunk, Action::Shutdown).await?;
        }
        Ok(())
    }
}

/// Lists emulator instances.
#[async_trait]
pub trait InstanceSource: Send + Sync {
    async fn fetch_all(&self) -> Result<BTreeMap<u32, InstanceInfo>>;
}

/// Reads host CPU and memory load.
pub trait ResourceProbe: Send + Sync {
    fn sample(&self) -> ResourceSample;
}
