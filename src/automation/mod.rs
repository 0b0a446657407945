pub mod batch_processor;
pub mod engine;
pub mod metrics;
pub mod optimizer;
pub mod retry;
pub mod schedule;

pub use batch_processor::{BatchProcessor, BatchResult, BatchStatus};
pub use engine::{
    AutomationConfig, AutomationEngine, AutomationEvent, AutomationHandle, AutomationReport,
    AutomationState, StopReason,
};
pub use metrics::AutomationMetrics;
pub use retry::{InstanceOutcome, RetryManager};
pub use schedule::AutoStartSchedule;
