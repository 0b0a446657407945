#![allow(dead_code)]

use async_trait::async_trait;
use mumu_manager::backend::parse::InstanceMap;
use mumu_manager::domain::model::{Action, CommandOutput, InstanceInfo, ResourceSample};
use mumu_manager::domain::ports::{CommandRunner, InstanceController, InstanceSource, ResourceProbe};
use mumu_manager::{MumuError, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Records every control call and fails launches on demand.
#[derive(Default)]
pub struct MockController {
    calls: Mutex<Vec<(Vec<u32>, Action)>>,
    failures: Mutex<HashMap<u32, VecDeque<MumuError>>>,
    launch_time: Duration,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl MockController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_launch_time(launch_time: Duration) -> Self {
        Self {
            launch_time,
            ..Self::default()
        }
    }

    /// Queues `error` for the next launch of `index`.
    pub fn fail_with(self, index: u32, error: MumuError) -> Self {
        self.failures
            .lock()
            .unwrap()
            .entry(index)
            .or_default()
            .push_back(error);
        self
    }

    pub fn calls(&self) -> Vec<(Vec<u32>, Action)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn launched(&self) -> Vec<u32> {
        self.calls()
            .into_iter()
            .filter(|(_, action)| *action == Action::Launch)
            .flat_map(|(indices, _)| indices)
            .collect()
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InstanceController for MockController {
    async fn control(&self, indices: &[u32], action: Action) -> Result<String> {
        self.calls.lock().unwrap().push((indices.to_vec(), action));

        let running = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(running, Ordering::SeqCst);
        if !self.launch_time.is_zero() {
            tokio::time::sleep(self.launch_time).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        let failure = indices
            .first()
            .and_then(|index| self.failures.lock().unwrap().get_mut(index)?.pop_front());
        match failure {
            Some(err) if action == Action::Launch => Err(err),
            _ => Ok(String::new()),
        }
    }
}

/// Host load that tests can change while an automation runs.
pub struct FixedProbe {
    sample: Mutex<ResourceSample>,
    samples: AtomicUsize,
}

impl FixedProbe {
    pub fn new(cpu: f32, memory: f32) -> Self {
        Self {
            sample: Mutex::new(ResourceSample::new(cpu, memory)),
            samples: AtomicUsize::new(0),
        }
    }

    pub fn samples(&self) -> usize {
        self.samples.load(Ordering::SeqCst)
    }

    pub fn set(&self, cpu: f32, memory: f32) {
        *self.sample.lock().unwrap() = ResourceSample::new(cpu, memory);
    }
}

impl ResourceProbe for FixedProbe {
    fn sample(&self) -> ResourceSample {
        self.samples.fetch_add(1, Ordering::SeqCst);
        *self.sample.lock().unwrap()
    }
}

type Responder = Box<dyn Fn(&[String]) -> CommandOutput + Send + Sync>;

/// Stands in for MuMuManager.exe; answers from a closure and keeps the argument vectors.
pub struct RecordingRunner {
    calls: Arc<Mutex<Vec<Vec<String>>>>,
    respond: Responder,
    latency: Duration,
}

impl RecordingRunner {
    pub fn new<F>(respond: F) -> (Self, Arc<Mutex<Vec<Vec<String>>>>)
    where
        F: Fn(&[String]) -> CommandOutput + Send + Sync + 'static,
    {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let runner = Self {
            calls: Arc::clone(&calls),
            respond: Box::new(respond),
            latency: Duration::ZERO,
        };
        (runner, calls)
    }

    /// Every command takes `latency` after it is recorded.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, _program: &str, args: &[String], _timeout: Duration) -> Result<CommandOutput> {
        self.calls.lock().unwrap().push(args.to_vec());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        Ok((self.respond)(args))
    }
}

pub fn ok(stdout: &str) -> CommandOutput {
    CommandOutput {
        stdout: stdout.to_string(),
        exit_code: Some(0),
        ..CommandOutput::default()
    }
}

pub fn exit(code: i32, stderr: &str) -> CommandOutput {
    CommandOutput {
        stderr: stderr.to_string(),
        exit_code: Some(code),
        ..CommandOutput::default()
    }
}

pub fn command_failed(stderr: &str) -> MumuError {
    MumuError::CommandFailed {
        return_code: Some(1),
        stderr: stderr.to_string(),
        stdout: String::new(),
    }
}

/// Instance list whose next `fail_next` fetches fail.
#[derive(Default)]
pub struct MockSource {
    instances: Mutex<InstanceMap>,
    fail_next: AtomicUsize,
    fetches: AtomicUsize,
}

impl MockSource {
    pub fn new(names: &[(u32, &str)]) -> Self {
        let source = Self::default();
        for (index, name) in names {
            source.upsert(*index, name);
        }
        source
    }

    pub fn upsert(&self, index: u32, name: &str) {
        let mut info = InstanceInfo::new(index);
        info.name = Some(name.to_string());
        self.instances.lock().unwrap().insert(index, info);
    }

    pub fn remove(&self, index: u32) {
        self.instances.lock().unwrap().remove(&index);
    }

    pub fn fail_next(&self, times: usize) {
        self.fail_next.store(times, Ordering::SeqCst);
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InstanceSource for MockSource {
    async fn fetch_all(&self) -> Result<InstanceMap> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(command_failed("backend busy"));
        }
        Ok(self.instances.lock().unwrap().clone())
    }
}
