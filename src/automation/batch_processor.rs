use crate::automation::optimizer::dispatch_delay;
use crate::automation::retry::{launch_with_retry, sleep_backoff, InstanceOutcome, RetryManager};
use crate::domain::ports::{InstanceController, ResourceProbe};
use crate::utils::error::{MumuError, Result};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;

pub const DEFAULT_MAX_CONCURRENT_BATCHES: usize = 2;
pub const DEFAULT_DISPATCH_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchResult {
    pub batch_id: usize,
    pub instances: Vec<u32>,
    pub status: BatchStatus,
    pub successful: Vec<u32>,
    pub failed: Vec<u32>,
    pub errors: BTreeMap<u32, String>,
    pub processing_time: Duration,
    /// Retries spent across all instances of the batch.
    pub retry_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BatchEvent {
    Queued { batch_id: usize, instances: Vec<u32> },
    Started { batch_id: usize, instances: Vec<u32> },
    InstanceProcessed { batch_id: usize, outcome: InstanceOutcome },
    Completed { result: BatchResult },
    Progress { completed: usize, total: usize },
    AllCompleted { batches: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessingStats {
    pub is_processing: bool,
    pub total_batches: usize,
    pub completed_batches: usize,
    pub failed_batches: usize,
    pub active_batches: usize,
    pub queued_batches: usize,
    pub total_instances_processed: usize,
    pub successful_instances: usize,
    pub failed_instances: usize,
    pub success_rate: f64,
    /// Instances per minute.
    pub throughput: f64,
}

#[derive(Debug, Default)]
struct ProcessorState {
    is_processing: bool,
    queued: usize,
    active: usize,
    completed: Vec<BatchResult>,
    failed: Vec<BatchResult>,
    processed: usize,
    successful: usize,
    started_at: Option<Instant>,
}

impl ProcessorState {
    fn finished(&self) -> usize {
        self.completed.len() + self.failed.len()
    }

    fn total(&self) -> usize {
        self.finished() + self.active + self.queued
    }
}

/// Runs queued batches on a bounded number of concurrent workers.
pub struct BatchProcessor<C, P> {
    controller: Arc<C>,
    probe: Arc<P>,
    retry: RetryManager,
    max_concurrent: usize,
    base_delay: Duration,
    state: Arc<Mutex<ProcessorState>>,
    stop: watch::Sender<bool>,
    events: broadcast::Sender<BatchEvent>,
}

impl<C, P> BatchProcessor<C, P>
where
    C: InstanceController + 'static,
    P: ResourceProbe + 'static,
{
    pub fn new(controller: Arc<C>, probe: Arc<P>, max_concurrent: usize) -> Self {
        let (stop, _) = watch::channel(false);
        let (events, _) = broadcast::channel(256);
        Self {
            controller,
            probe,
            retry: RetryManager::default(),
            max_concurrent: max_concurrent.max(1),
            base_delay: DEFAULT_DISPATCH_DELAY,
            state: Arc::new(Mutex::new(ProcessorState::default())),
            stop,
            events,
        }
    }

    pub fn with_retry(mut self, retry: RetryManager) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_dispatch_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BatchEvent> {
        self.events.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, ProcessorState> {
        lock_state(&self.state)
    }

    pub fn is_processing(&self) -> bool {
        self.lock().is_processing
    }

    /// Stops dispatching; workers already running finish their batch.
    pub fn stop(&self) {
        if self.is_processing() {
            self.stop.send_replace(true);
            tracing::info!("⏹️ Batch processing stopped");
        }
    }

    pub async fn process(&self, batches: Vec<Vec<u32>>) -> Result<Vec<BatchResult>> {
        let mut queue: VecDeque<(usize, Vec<u32>)> = batches
            .into_iter()
            .enumerate()
            .map(|(position, instances)| (position + 1, instances))
            .collect();

        {
            let mut state = self.lock();
            if state.is_processing {
                tracing::warn!("⚠️ Batch processing already in progress");
                return Err(MumuError::AutomationAlreadyRunning {
                    state: "processing".to_string(),
                });
            }
            *state = ProcessorState {
                is_processing: true,
                queued: queue.len(),
                started_at: Some(Instant::now()),
                ..ProcessorState::default()
            };
        }
        let processing = ProcessingRun {
            state: Arc::clone(&self.state),
        };
        self.stop.send_replace(false);
        let mut stop = self.stop.subscribe();

        for (batch_id, instances) in &queue {
            self.emit(BatchEvent::Queued {
                batch_id: *batch_id,
                instances: instances.clone(),
            });
        }
        tracing::info!("📦 Started batch processing: {} batches queued", queue.len());

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut workers = JoinSet::new();

        while let Some((batch_id, instances)) = queue.pop_front() {
            if *stop.borrow() {
                break;
            }

            let permit = tokio::select! {
                permit = Arc::clone(&semaphore).acquire_owned() => permit.map_err(|e| {
                    MumuError::AutomationError { message: format!("Worker pool closed: {}", e) }
                })?,
                _ = stop.wait_for(|stopped| *stopped) => break,
            };

            {
                let mut state = self.lock();
                state.queued = state.queued.saturating_sub(1);
                state.active += 1;
            }
            workers.spawn(run_batch(
                batch_id,
                instances,
                Arc::clone(&self.controller),
                self.retry,
                Arc::clone(&self.state),
                self.events.clone(),
                permit,
            ));

            if !queue.is_empty() {
                let delay = dispatch_delay(self.probe.sample(), self.base_delay);
                tracing::debug!("⏳ Next batch in {:?}", delay);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = stop.wait_for(|stopped| *stopped) => {}
                }
            }
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                tracing::error!("❌ Batch worker panicked: {}", e);
            }
        }

        let results = {
            let state = self.lock();
            let mut results: Vec<BatchResult> =
                state.completed.iter().chain(state.failed.iter()).cloned().collect();
            results.sort_by_key(|result| result.batch_id);
            results
        };
        drop(processing);

        self.emit(BatchEvent::AllCompleted {
            batches: results.len(),
        });
        let stats = self.stats();
        tracing::info!(
            "✅ Batch processing completed: {}/{} batches ok, {:.1}% instance success",
            stats.completed_batches,
            stats.total_batches,
            stats.success_rate
        );

        Ok(results)
    }

    pub fn stats(&self) -> ProcessingStats {
        let state = self.lock();
        let throughput = match state.started_at {
            Some(start) if state.processed > 0 => {
                let elapsed = start.elapsed().as_secs_f64();
                if elapsed > 0.0 {
                    state.processed as f64 * 60.0 / elapsed
                } else {
                    0.0
                }
            }
            _ => 0.0,
        };

        ProcessingStats {
            is_processing: state.is_processing,
            total_batches: state.total(),
            completed_batches: state.completed.len(),
            failed_batches: state.failed.len(),
            active_batches: state.active,
            queued_batches: state.queued,
            total_instances_processed: state.processed,
            successful_instances: state.successful,
            failed_instances: state.processed - state.successful,
            success_rate: state.successful as f64 * 100.0 / state.processed.max(1) as f64,
            throughput,
        }
    }

    fn emit(&self, event: BatchEvent) {
        let _ = self.events.send(event);
    }
}

/// Clears the processing flag when `process` returns or its future is dropped.
struct ProcessingRun {
    state: Arc<Mutex<ProcessorState>>,
}

impl Drop for ProcessingRun {
    fn drop(&mut self) {
        let mut state = lock_state(&self.state);
        state.is_processing = false;
        state.queued = 0;
        state.active = 0;
    }
}

fn lock_state(state: &Mutex<ProcessorState>) -> MutexGuard<'_, ProcessorState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn run_batch<C: InstanceController + ?Sized>(
    batch_id: usize,
    instances: Vec<u32>,
    controller: Arc<C>,
    retry: RetryManager,
    state: Arc<Mutex<ProcessorState>>,
    events: broadcast::Sender<BatchEvent>,
    _permit: OwnedSemaphorePermit,
) {
    let started = Instant::now();
    let _ = events.send(BatchEvent::Started {
        batch_id,
        instances: instances.clone(),
    });

    let mut result = BatchResult {
        batch_id,
        instances: instances.clone(),
        status: BatchStatus::Processing,
        successful: Vec::new(),
        failed: Vec::new(),
        errors: BTreeMap::new(),
        processing_time: Duration::ZERO,
        retry_count: 0,
    };

    for &index in &instances {
        let outcome = launch_with_retry(controller.as_ref(), index, &retry, sleep_backoff).await;
        result.retry_count += outcome.attempts.saturating_sub(1);
        if outcome.success {
            result.successful.push(index);
        } else {
            result.failed.push(index);
            result.errors.insert(index, outcome.message.clone());
        }

        {
            let mut state = lock_state(&state);
            state.processed += 1;
            if outcome.success {
                state.successful += 1;
            }
        }
        let _ = events.send(BatchEvent::InstanceProcessed { batch_id, outcome });
    }

    result.processing_time = started.elapsed();
    result.status = if result.failed.is_empty() {
        BatchStatus::Completed
    } else {
        BatchStatus::Failed
    };
    tracing::info!(
        "📦 Batch {} {:?}: {} ok, {} failed in {:?}",
        batch_id,
        result.status,
        result.successful.len(),
        result.failed.len(),
        result.processing_time
    );

    let (completed, total) = {
        let mut state = lock_state(&state);
        state.active = state.active.saturating_sub(1);
        match result.status {
            BatchStatus::Completed => state.completed.push(result.clone()),
            _ => state.failed.push(result.clone()),
        }
        (state.finished(), state.total())
    };

    let _ = events.send(BatchEvent::Completed { result });
    let _ = events.send(BatchEvent::Progress { completed, total });
}
