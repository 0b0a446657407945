use crate::automation::metrics::AutomationMetrics;
use crate::automation::optimizer::{adaptive_delay, optimal_batch_size, partition};
use crate::automation::retry::{
    launch_with_retry, InstanceOutcome, RetryManager, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_BASE_DELAY,
};
use crate::domain::ports::{InstanceController, ResourceProbe};
use crate::utils::error::{MumuError, Result};
use crate::utils::validation::{validate_cpu_threshold, validate_positive_number, Validate};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(10);
pub const OVERLOAD_COOLDOWN: Duration = Duration::from_secs(45);
pub const RESUME_DELAY: Duration = Duration::from_secs(1);
const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AutomationState {
    Idle,
    Running,
    Paused,
    Stopping,
    Error,
}

impl fmt::Display for AutomationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AutomationState::Idle => "idle",
            AutomationState::Running => "running",
            AutomationState::Paused => "paused",
            AutomationState::Stopping => "stopping",
            AutomationState::Error => "error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AutomationConfig {
    pub from_instance: u32,
    pub to_instance: u32,
    pub batch_size: usize,
    /// Pause between two batches.
    pub batch_delay: Duration,
    /// Pause before the first batch and between two launches.
    pub start_delay: Duration,
    pub cpu_threshold: f32,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub enable_ai_optimization: bool,
    pub enable_cpu_protection: bool,
    pub monitor_interval: Duration,
    /// Shut down the instances this run launched when CPU protection trips.
    pub shutdown_on_overload: bool,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            from_instance: 0,
            to_instance: 10,
            batch_size: 5,
            batch_delay: Duration::from_secs(30),
            start_delay: Duration::from_secs(5),
            cpu_threshold: 70.0,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
            enable_ai_optimization: true,
            enable_cpu_protection: true,
            monitor_interval: DEFAULT_MONITOR_INTERVAL,
            shutdown_on_overload: true,
        }
    }
}

impl Validate for AutomationConfig {
    fn validate(&self) -> Result<()> {
        if self.from_instance > self.to_instance {
            return Err(MumuError::ConfigValidationError {
                field: "from_instance".to_string(),
                message: "From instance cannot be greater than to instance".to_string(),
            });
        }
        validate_positive_number("batch_size", self.batch_size, 1)?;
        validate_cpu_threshold(self.cpu_threshold)?;
        if self.enable_cpu_protection && self.monitor_interval.is_zero() {
            return Err(MumuError::InvalidConfigValueError {
                field: "monitor_interval".to_string(),
                value: "0".to_string(),
                reason: "Monitor interval must be positive".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StopReason {
    Completed,
    UserRequested,
    CpuOverload { cpu: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AutomationEvent {
    StateChanged { state: AutomationState },
    BatchStarted { batch: usize, total_batches: usize, instances: Vec<u32> },
    BatchCompleted { batch: usize, successful: usize, failed: usize },
    InstanceProcessed { outcome: InstanceOutcome },
    Progress { processed: usize, total: usize },
    Metrics { metrics: AutomationMetrics },
    Log { level: LogLevel, message: String },
    Error { kind: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AutomationReport {
    pub stop_reason: StopReason,
    pub batch_size: usize,
    pub outcomes: Vec<InstanceOutcome>,
    /// Instances shut down by CPU protection.
    pub shut_down: Vec<u32>,
    pub metrics: AutomationMetrics,
}

impl AutomationReport {
    pub fn successful(&self) -> usize {
        self.outcomes.iter().filter(|o| o.success).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.successful()
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Control {
    Run,
    Pause,
    Stop(StopReason),
}

struct Shared {
    state: Mutex<AutomationState>,
    metrics: Mutex<AutomationMetrics>,
    control: watch::Sender<Control>,
    events: broadcast::Sender<AutomationEvent>,
}

impl Shared {
    fn new() -> Self {
        let (control, _) = watch::channel(Control::Run);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: Mutex::new(AutomationState::Idle),
            metrics: Mutex::new(AutomationMetrics::default()),
            control,
            events,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, AutomationState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_metrics(&self) -> MutexGuard<'_, AutomationMetrics> {
        self.metrics.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn state(&self) -> AutomationState {
        *self.lock_state()
    }

    fn set_state(&self, new_state: AutomationState) {
        let changed = {
            let mut state = self.lock_state();
            let changed = *state != new_state;
            *state = new_state;
            changed
        };
        if changed {
            self.emit(AutomationEvent::StateChanged { state: new_state });
        }
    }

    /// Moves `from` to `to` atomically and publishes `control` while still holding the lock.
    fn transition(&self, from: &[AutomationState], to: AutomationState, control: Control) -> bool {
        {
            let mut state = self.lock_state();
            if !from.contains(&*state) {
                return false;
            }
            *state = to;
            self.control.send_replace(control);
        }
        self.emit(AutomationEvent::StateChanged { state: to });
        true
    }

    fn request_stop(&self, reason: StopReason) -> bool {
        self.transition(
            &[AutomationState::Running, AutomationState::Paused],
            AutomationState::Stopping,
            Control::Stop(reason),
        )
    }

    fn emit(&self, event: AutomationEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Info | LogLevel::Success => tracing::info!("{}", message),
            LogLevel::Warning => tracing::warn!("{}", message),
            LogLevel::Error => tracing::error!("{}", message),
        }
        self.emit(AutomationEvent::Log { level, message });
    }

    fn error(&self, kind: &str, message: impl Into<String>) {
        self.emit(AutomationEvent::Error {
            kind: kind.to_string(),
            message: message.into(),
        });
    }

    fn publish_metrics(&self) {
        let metrics = self.lock_metrics().clone();
        self.emit(AutomationEvent::Metrics { metrics });
    }
}

/// Cloneable remote control for a running automation.
#[derive(Clone)]
pub struct AutomationHandle {
    shared: Arc<Shared>,
}

impl AutomationHandle {
    pub fn state(&self) -> AutomationState {
        self.shared.state()
    }

    pub fn metrics(&self) -> AutomationMetrics {
        self.shared.lock_metrics().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AutomationEvent> {
        self.shared.events.subscribe()
    }

    pub fn pause(&self) -> bool {
        let paused = self.shared.transition(
            &[AutomationState::Running],
            AutomationState::Paused,
            Control::Pause,
        );
        if paused {
            self.shared.log(LogLevel::Warning, "⏸️ Automation paused");
        }
        paused
    }

    pub fn resume(&self) -> bool {
        let resumed = self.shared.transition(
            &[AutomationState::Paused],
            AutomationState::Running,
            Control::Run,
        );
        if resumed {
            self.shared.log(LogLevel::Info, "▶️ Automation resumed");
        }
        resumed
    }

    pub fn stop(&self) -> bool {
        let stopped = self.shared.request_stop(StopReason::UserRequested);
        if stopped {
            self.shared.log(LogLevel::Error, "⏹️ Automation stopped");
        }
        stopped
    }
}

/// Launches a range of instances batch by batch with pacing, retry and CPU protection.
pub struct AutomationEngine<C, P> {
    controller: Arc<C>,
    probe: Arc<P>,
    shared: Arc<Shared>,
}

impl<C, P> Clone for AutomationEngine<C, P> {
    fn clone(&self) -> Self {
        Self {
            controller: Arc::clone(&self.controller),
            probe: Arc::clone(&self.probe),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C, P> AutomationEngine<C, P>
where
    C: InstanceController + 'static,
    P: ResourceProbe + 'static,
{
    pub fn new(controller: Arc<C>, probe: Arc<P>) -> Self {
        Self {
            controller,
            probe,
            shared: Arc::new(Shared::new()),
        }
    }

    pub fn handle(&self) -> AutomationHandle {
        AutomationHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AutomationEvent> {
        self.shared.events.subscribe()
    }

    pub fn state(&self) -> AutomationState {
        self.shared.state()
    }

    /// Runs the automation on its own task.
    pub fn spawn(&self, config: AutomationConfig) -> JoinHandle<Result<AutomationReport>> {
        let engine = self.clone();
        tokio::spawn(async move { engine.run(config).await })
    }

    pub async fn run(&self, config: AutomationConfig) -> Result<AutomationReport> {
        if let Err(e) = config.validate() {
            self.shared.error("config_error", e.to_string());
            return Err(e);
        }

        if !self
            .shared
            .transition(&[AutomationState::Idle], AutomationState::Running, Control::Run)
        {
            let state = self.shared.state();
            self.shared
                .log(LogLevel::Warning, "❌ Automation is already running");
            return Err(MumuError::AutomationAlreadyRunning {
                state: state.to_string(),
            });
        }

        let run = ActiveRun {
            shared: Arc::clone(&self.shared),
            cpu_guard: config
                .enable_cpu_protection
                .then(|| self.spawn_cpu_guard(config.cpu_threshold, config.monitor_interval)),
        };
        let mut control = self.shared.control.subscribe();

        let report = self.execute(&config, &mut control).await;

        if !report.outcomes.is_empty() && report.successful() == 0 {
            self.shared.set_state(AutomationState::Error);
            self.shared.error(
                "automation_failed",
                format!("All {} launches failed", report.outcomes.len()),
            );
        }
        drop(run);
        Ok(report)
    }

    async fn execute(
        &self,
        config: &AutomationConfig,
        control: &mut watch::Receiver<Control>,
    ) -> AutomationReport {
        let mut batch_size = config.batch_size;
        if config.enable_ai_optimization {
            let optimized = optimal_batch_size(self.probe.sample(), batch_size);
            if optimized != batch_size {
                self.shared.log(
                    LogLevel::Info,
                    format!(
                        "🤖 AI Optimization: Batch size adjusted from {} to {}",
                        batch_size, optimized
                    ),
                );
                batch_size = optimized;
            }
        }

        let batches = partition(config.from_instance, config.to_instance, batch_size);
        let total_instances: usize = batches.iter().map(Vec::len).sum();
        *self.shared.lock_metrics() =
            AutomationMetrics::new(total_instances, batches.len(), Instant::now());

        self.shared.log(
            LogLevel::Success,
            format!(
                "✅ Automation started: {} instances in {} batches",
                total_instances,
                batches.len()
            ),
        );

        let retry = RetryManager::new(config.max_retries, config.retry_base_delay);
        let mut outcomes = Vec::with_capacity(total_instances);
        let mut launched = Vec::new();

        let stop_reason = 'run: {
            if let Some(reason) = wait(control, config.start_delay).await {
                break 'run reason;
            }

            for (position, batch) in batches.iter().enumerate() {
                let batch_number = position + 1;
                self.shared.lock_metrics().current_batch = batch_number;
                self.shared.emit(AutomationEvent::BatchStarted {
                    batch: batch_number,
                    total_batches: batches.len(),
                    instances: batch.clone(),
                });
                self.shared.log(
                    LogLevel::Info,
                    format!(
                        "🔄 Processing batch {}/{}: {} instances",
                        batch_number,
                        batches.len(),
                        batch.len()
                    ),
                );

                let launch_delay = if config.enable_ai_optimization {
                    adaptive_delay(self.probe.sample(), config.start_delay).max(config.start_delay)
                } else {
                    config.start_delay
                };

                let (mut successful, mut failed) = (0, 0);
                for (slot, &index) in batch.iter().enumerate() {
                    if slot > 0 {
                        if let Some(reason) = wait(control, launch_delay).await {
                            break 'run reason;
                        }
                    }

                    let backoff_control = control.clone();
                    let outcome =
                        launch_with_retry(self.controller.as_ref(), index, &retry, |delay| {
                            let mut control = backoff_control.clone();
                            async move { wait(&mut control, delay).await.is_none() }
                        })
                        .await;
                    if outcome.success {
                        successful += 1;
                        launched.push(index);
                    } else {
                        failed += 1;
                        self.shared.log(
                            LogLevel::Warning,
                            format!("⚠️ Instance {} failed: {}", index, outcome.message),
                        );
                    }

                    {
                        let mut metrics = self.shared.lock_metrics();
                        metrics.record(outcome.success);
                        metrics.update(Instant::now());
                    }
                    self.shared.emit(AutomationEvent::InstanceProcessed {
                        outcome: outcome.clone(),
                    });
                    outcomes.push(outcome);

                    if let Some(reason) = stop_requested(control) {
                        break 'run reason;
                    }
                }

                self.shared.emit(AutomationEvent::BatchCompleted {
                    batch: batch_number,
                    successful,
                    failed,
                });
                let processed = self.shared.lock_metrics().processed_instances;
                self.shared.emit(AutomationEvent::Progress {
                    processed,
                    total: total_instances,
                });
                self.shared.publish_metrics();

                if batch_number < batches.len() {
                    if let Some(reason) = wait(control, config.batch_delay).await {
                        break 'run reason;
                    }
                }
            }

            StopReason::Completed
        };

        let mut shut_down = Vec::new();
        if matches!(stop_reason, StopReason::CpuOverload { .. })
            && config.shutdown_on_overload
            && !launched.is_empty()
        {
            self.shared.log(
                LogLevel::Warning,
                format!("🛑 Shutting down {} instances launched by this run", launched.len()),
            );
            match self.controller.stop_all(&launched).await {
                Ok(()) => shut_down = launched,
                Err(e) => self.shared.error("shutdown_error", e.to_string()),
            }
        }

        let metrics = {
            let mut metrics = self.shared.lock_metrics();
            metrics.update(Instant::now());
            metrics.clone()
        };

        match &stop_reason {
            StopReason::Completed => self.shared.log(
                LogLevel::Success,
                format!(
                    "🎉 Automation completed! Processed {} instances in {:?}",
                    metrics.processed_instances,
                    metrics.elapsed(Instant::now())
                ),
            ),
            other => self.shared.log(
                LogLevel::Warning,
                format!(
                    "⏹️ Automation ended early ({:?}) after {} of {} instances",
                    other, metrics.processed_instances, metrics.total_instances
                ),
            ),
        }
        self.shared.publish_metrics();

        AutomationReport {
            stop_reason,
            batch_size,
            outcomes,
            shut_down,
            metrics,
        }
    }

    fn spawn_cpu_guard(&self, threshold: f32, interval: Duration) -> JoinHandle<()> {
        let probe = Arc::clone(&self.probe);
        let shared = Arc::clone(&self.shared);

        tokio::spawn(async move {
            let mut last_alert: Option<Instant> = None;
            loop {
                tokio::time::sleep(interval).await;

                let sample = probe.sample();
                shared.lock_metrics().update_system(sample);
                if sample.cpu_percent < threshold {
                    continue;
                }

                let now = Instant::now();
                if last_alert.is_some_and(|at| now.duration_since(at) < OVERLOAD_COOLDOWN) {
                    continue;
                }
                last_alert = Some(now);

                shared.log(
                    LogLevel::Error,
                    format!(
                        "🚨 CPU threshold exceeded: {:.1}% (limit: {:.1}%)",
                        sample.cpu_percent, threshold
                    ),
                );
                let err = MumuError::ResourceLimitExceeded {
                    cpu: sample.cpu_percent,
                    threshold,
                };
                shared.error("resource_protection", err.to_string());
                shared.request_stop(StopReason::CpuOverload {
                    cpu: sample.cpu_percent,
                });
            }
        })
    }
}

/// Resets the engine to `Idle` and ends the CPU guard when a run finishes or is dropped.
struct ActiveRun {
    shared: Arc<Shared>,
    cpu_guard: Option<JoinHandle<()>>,
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        if let Some(guard) = self.cpu_guard.take() {
            guard.abort();
        }
        self.shared.set_state(AutomationState::Idle);
    }
}

fn stop_requested(control: &watch::Receiver<Control>) -> Option<StopReason> {
    match &*control.borrow() {
        Control::Stop(reason) => Some(reason.clone()),
        _ => None,
    }
}

/// Sleeps for `duration` unless stopped. A pause holds here until resumed,
/// then the wait ends `RESUME_DELAY` later.
async fn wait(control: &mut watch::Receiver<Control>, duration: Duration) -> Option<StopReason> {
    let mut deadline = Instant::now() + duration;
    loop {
        let current = control.borrow_and_update().clone();
        match current {
            Control::Stop(reason) => return Some(reason),
            Control::Pause => {
                if control.changed().await.is_err() {
                    return None;
                }
                if *control.borrow() == Control::Run {
                    deadline = Instant::now() + RESUME_DELAY;
                }
                continue;
            }
            Control::Run => {}
        }

        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => return None,
            changed = control.changed() => {
                if changed.is_err() {
                    return None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        assert!(AutomationConfig::default().validate().is_ok());

        let reversed = AutomationConfig {
            from_instance: 5,
            to_instance: 1,
            ..AutomationConfig::default()
        };
        assert!(reversed.validate().is_err());

        let empty_batch = AutomationConfig {
            batch_size: 0,
            ..AutomationConfig::default()
        };
        assert!(empty_batch.validate().is_err());

        for threshold in [0.0, 100.5, f32::NAN] {
            let config = AutomationConfig {
                cpu_threshold: threshold,
                ..AutomationConfig::default()
            };
            assert!(config.validate().is_err());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_pause_then_resume() {
        let (tx, mut rx) = watch::channel(Control::Run);
        tx.send_replace(Control::Pause);

        let waiter = tokio::spawn(async move {
            let started = Instant::now();
            let reason = wait(&mut rx, Duration::from_secs(30)).await;
            (reason, started.elapsed())
        });

        tokio::time::sleep(Duration::from_secs(100)).await;
        tx.send_replace(Control::Run);

        let (reason, elapsed) = waiter.await.unwrap();
        assert_eq!(reason, None);
        assert_eq!(elapsed, Duration::from_secs(100) + RESUME_DELAY);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_returns_stop_reason() {
        let (tx, mut rx) = watch::channel(Control::Run);
        let waiter = tokio::spawn(async move { wait(&mut rx, Duration::from_secs(30)).await });

        tokio::time::sleep(Duration::from_secs(3)).await;
        tx.send_replace(Control::Stop(StopReason::UserRequested));

        assert_eq!(waiter.await.unwrap(), Some(StopReason::UserRequested));
    }
}
