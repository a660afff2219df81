// Monitor module - sampling, health scoring, alerting and restart policy

pub mod alerts;
pub mod cooldown;
pub mod engine;
pub mod health;
pub mod metrics;
pub mod sampler;
pub mod thresholds;

pub use alerts::{Alert, AlertBook, AlertSeverity};
pub use cooldown::{BackoffStrategy, CooldownDecision, CooldownState};
pub use engine::{MonitorState, MonitoringEngine, THRESHOLDS_KEY};
pub use health::{compute_health, HealthIssue, HealthRecord, HealthStatus};
pub use metrics::{MetricsSample, MetricsWindow};
pub use sampler::{ProcessUsage, SysinfoSampler, UsageSampler};
pub use thresholds::{AlertThresholdConfig, Threshold, ThresholdBook, ThresholdScope};
