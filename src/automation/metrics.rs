use crate::domain::model::ResourceSample;
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

/// Live counters for one automation run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AutomationMetrics {
    pub total_instances: usize,
    pub processed_instances: usize,
    pub successful_instances: usize,
    pub failed_instances: usize,
    pub current_batch: usize,
    pub total_batches: usize,
    /// Instances per minute.
    pub throughput: f64,
    pub success_rate: f64,
    pub system_efficiency: f64,
    #[serde(skip)]
    pub started_at: Option<Instant>,
}

impl Default for AutomationMetrics {
    fn default() -> Self {
        Self {
            total_instances: 0,
            processed_instances: 0,
            successful_instances: 0,
            failed_instances: 0,
            current_batch: 0,
            total_batches: 0,
            throughput: 0.0,
            success_rate: 100.0,
            system_efficiency: 100.0,
            started_at: None,
        }
    }
}

impl AutomationMetrics {
    pub fn new(total_instances: usize, total_batches: usize, started_at: Instant) -> Self {
        Self {
            total_instances,
            total_batches,
            started_at: Some(started_at),
            ..Self::default()
        }
    }

    pub fn record(&mut self, success: bool) {
        self.processed_instances += 1;
        if success {
            self.successful_instances += 1;
        } else {
            self.failed_instances += 1;
        }
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        self.started_at
            .map(|start| now.saturating_duration_since(start))
            .unwrap_or_default()
    }

    /// Recomputes success rate and throughput.
    pub fn update(&mut self, now: Instant) {
        if self.processed_instances > 0 {
            self.success_rate =
                self.successful_instances as f64 * 100.0 / self.processed_instances as f64;

            let elapsed = self.elapsed(now).as_secs_f64();
            if elapsed > 0.0 {
                self.throughput = self.processed_instances as f64 * 60.0 / elapsed;
            }
        }
    }

    pub fn update_system(&mut self, sample: ResourceSample) {
        let busiest = sample.cpu_percent.max(sample.memory_percent) as f64;
        self.system_efficiency = (100.0 - busiest).max(0.0);
    }

    pub fn progress_percent(&self) -> f64 {
        if self.total_instances == 0 {
            return 0.0;
        }
        self.processed_instances as f64 * 100.0 / self.total_instances as f64
    }

    /// Remaining time as `MM:SS`, extrapolated from progress so far.
    pub fn eta(&self, now: Instant) -> String {
        if self.started_at.is_none() || self.processed_instances == 0 || self.total_instances == 0 {
            return "Calculating...".to_string();
        }

        let elapsed = self.elapsed(now).as_secs_f64();
        let progress = self.processed_instances as f64 / self.total_instances as f64;
        let remaining = (elapsed / progress - elapsed).max(0.0).round() as u64;

        format!("{:02}:{:02}", remaining / 60, remaining % 60)
    }
}
