use crate::domain::model::ResourceSample;
use crate::domain::ports::ResourceProbe;
#[cfg(feature = "cli")]
use std::sync::{Arc, Mutex};
#[cfg(feature = "cli")]
use std::time::{Duration, Instant};
#[cfg(feature = "cli")]
use sysinfo::{Pid, ProcessesToUpdate, System};

#[cfg(feature = "cli")]
#[derive(Debug, Clone)]
pub struct SystemStats {
    pub cpu_usage: f32,
    pub memory_usage_percent: f32,
    pub process_memory_mb: u64,
    pub peak_memory_mb: u64,
    pub elapsed_time: Duration,
}

#[cfg(feature = "cli")]
pub struct SystemMonitor {
    system: Arc<Mutex<System>>,
    pid: Option<Pid>,
    start_time: Instant,
    peak_memory: Arc<Mutex<u64>>,
    enabled: bool,
}

#[cfg(feature = "cli")]
impl SystemMonitor {
    pub fn new(enabled: bool) -> Self {
        let mut system = System::new();

        // CPU usage is a delta between two refreshes; prime it once here.
        system.refresh_cpu_usage();
        system.refresh_memory();
        std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
        system.refresh_cpu_usage();

        Self {
            system: Arc::new(Mutex::new(system)),
            pid: sysinfo::get_current_pid().ok(),
            start_time: Instant::now(),
            peak_memory: Arc::new(Mutex::new(0)),
            enabled,
        }
    }

    pub fn get_stats(&self) -> Option<SystemStats> {
        if !self.enabled {
            return None;
        }

        let mut system = self.system.lock().ok()?;
        system.refresh_cpu_usage();
        system.refresh_memory();

        let process_memory_mb = match self.pid {
            Some(pid) => {
                system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
                system
                    .process(pid)
                    .map(|process| process.memory() / 1024 / 1024)
                    .unwrap_or(0)
            }
            None => 0,
        };

        let mut peak = self.peak_memory.lock().ok()?;
        if process_memory_mb > *peak {
            *peak = process_memory_mb;
        }

        Some(SystemStats {
            cpu_usage: system.global_cpu_usage(),
            memory_usage_percent: memory_percent(&system),
            process_memory_mb,
            peak_memory_mb: *peak,
            elapsed_time: self.start_time.elapsed(),
        })
    }

    pub fn log_stats(&self, phase: &str) {
        if let Some(stats) = self.get_stats() {
            tracing::info!(
                "📊 {} - CPU: {:.1}%, Memory: {:.1}%, Process: {}MB, Peak: {}MB, Time: {:?}",
                phase,
                stats.cpu_usage,
                stats.memory_usage_percent,
                stats.process_memory_mb,
                stats.peak_memory_mb,
                stats.elapsed_time
            );
        }
    }

    pub fn log_final_stats(&self) {
        if let Some(stats) = self.get_stats() {
            tracing::info!(
                "📊 Final Stats - Total Time: {:?}, Peak Memory: {}MB",
                stats.elapsed_time,
                stats.peak_memory_mb
            );
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

#[cfg(feature = "cli")]
fn memory_percent(system: &System) -> f32 {
    let total = system.total_memory();
    if total > 0 {
        (system.used_memory() as f64 / total as f64 * 100.0) as f32
    } else {
        0.0
    }
}

#[cfg(feature = "cli")]
impl ResourceProbe for SystemMonitor {
    fn sample(&self) -> ResourceSample {
        // Sampling is independent of `enabled`, which only governs stats logging.
        match self.system.lock() {
            Ok(mut system) => {
                system.refresh_cpu_usage();
                system.refresh_memory();
                ResourceSample::new(system.global_cpu_usage(), memory_percent(&system))
            }
            Err(_) => ResourceSample::default(),
        }
    }
}

#[cfg(feature = "cli")]
impl Default for SystemMonitor {
    fn default() -> Self {
        Self::new(false)
    }
}

// No-op monitor for builds without the cli feature
#[cfg(not(feature = "cli"))]
#[derive(Default)]
pub struct SystemMonitor;

#[cfg(not(feature = "cli"))]
impl SystemMonitor {
    pub fn new(_enabled: bool) -> Self {
        Self
    }

    pub fn log_stats(&self, _phase: &str) {}

    pub fn log_final_stats(&self) {}

    pub fn is_enabled(&self) -> bool {
        false
    }
}

#[cfg(not(feature = "cli"))]
impl ResourceProbe for SystemMonitor {
    fn sample(&self) -> ResourceSample {
        ResourceSample::default()
    }
}
