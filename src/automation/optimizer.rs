use crate::domain::model::ResourceSample;
use serde::Serialize;
use std::time::Duration;

pub const MAX_ADAPTIVE_DELAY: Duration = Duration::from_secs(10);

/// Splits `from..=to` into consecutive batches of `size`; the last one may be shorter.
pub fn partition(from: u32, to: u32, size: usize) -> Vec<Vec<u32>> {
    if from > to || size == 0 {
        return Vec::new();
    }
    let range: Vec<u32> = (from..=to).collect();
    range.chunks(size).map(<[u32]>::to_vec).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LoadTier {
    Heavy,
    Moderate,
    Light,
    Normal,
}

impl LoadTier {
    pub fn classify(sample: ResourceSample) -> Self {
        let (cpu, mem) = (sample.cpu_percent, sample.memory_percent);
        if cpu >= 80.0 || mem >= 85.0 {
            LoadTier::Heavy
        } else if cpu >= 60.0 || mem >= 70.0 {
            LoadTier::Moderate
        } else if cpu < 30.0 && mem < 50.0 {
            LoadTier::Light
        } else {
            LoadTier::Normal
        }
    }
}

pub fn optimal_batch_size(sample: ResourceSample, base: usize) -> usize {
    match LoadTier::classify(sample) {
        LoadTier::Heavy => (base / 4).max(5),
        LoadTier::Moderate => (base / 2).max(10),
        LoadTier::Light => (base * 3 / 2).min(30),
        LoadTier::Normal => base,
    }
}

/// Stretches `base` by up to 3x as the host gets busier, capped at ten seconds.
pub fn adaptive_delay(sample: ResourceSample, base: Duration) -> Duration {
    let load = (sample.cpu_percent + sample.memory_percent).max(0.0) as f64 / 100.0;
    base.mul_f64(1.0 + load).min(MAX_ADAPTIVE_DELAY)
}

/// Pause between batch dispatches in the concurrent processor.
pub fn dispatch_delay(sample: ResourceSample, base: Duration) -> Duration {
    let (cpu, mem) = (sample.cpu_percent, sample.memory_percent);
    let factor = if cpu > 80.0 || mem > 85.0 {
        3.0
    } else if cpu > 60.0 || mem > 70.0 {
        2.0
    } else if cpu < 30.0 && mem < 50.0 {
        0.5
    } else {
        1.0
    };
    base.mul_f64(factor)
}
