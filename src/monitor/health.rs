// Health scoring from smoothed metrics

use crate::monitor::metrics::{MetricsWindow, SMOOTHING_SAMPLES};
use crate::monitor::{AlertSeverity, AlertThresholdConfig, Threshold};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const WARNING_BASE: f64 = 10.0;
const CRITICAL_BASE: f64 = 35.0;
const MAX_DEDUCTION: f64 = 65.0;

pub const HEALTHY_MIN_SCORE: u8 = 70;
pub const DEGRADED_MIN_SCORE: u8 = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Critical,
    Unknown,
}

impl HealthStatus {
    pub fn from_score(score: u8) -> Self {
        if score >= HEALTHY_MIN_SCORE {
            HealthStatus::Healthy
        } else if score >= DEGRADED_MIN_SCORE {
            HealthStatus::Degraded
        } else {
            HealthStatus::Critical
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Critical => "critical",
            HealthStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthIssue {
    pub metric: String,
    pub severity: AlertSeverity,
    pub value: f64,
    pub threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthRecord {
    pub score: u8,
    pub status: HealthStatus,
    pub issues: Vec<HealthIssue>,
    pub computed_at: DateTime<Utc>,
}

impl HealthRecord {
    /// Record for a server whose metrics could not be read
    pub fn unknown() -> Self {
        Self {
            score: 0,
            status: HealthStatus::Unknown,
            issues: Vec::new(),
            computed_at: Utc::now(),
        }
    }
}

/// Points deducted for one metric value
pub fn metric_deduction(value: f64, threshold: &Threshold) -> f64 {
    let span = threshold.critical - threshold.warning;
    if value < threshold.warning || span <= 0.0 {
        return 0.0;
    }

    if value < threshold.critical {
        let fraction = (value - threshold.warning) / span;
        WARNING_BASE + fraction * (CRITICAL_BASE - WARNING_BASE)
    } else {
        let fraction = ((value - threshold.critical) / span).min(1.0);
        (CRITICAL_BASE + fraction * (MAX_DEDUCTION - CRITICAL_BASE)).min(MAX_DEDUCTION)
    }
}

/// Score the tail of `window` against `thresholds`. An empty window is
/// `unknown`.
///
/// Below warning a metric costs nothing; from warning to critical it costs
/// 10 to 35 points, and past critical 35 to 65, reaching the cap one
/// (critical - warning) span above critical.
pub fn compute_health(window: &MetricsWindow, thresholds: &AlertThresholdConfig) -> HealthRecord {
    let Some(averages) = window.averages(SMOOTHING_SAMPLES) else {
        return HealthRecord::unknown();
    };

    let mut total = 0.0;
    let mut issues = Vec::new();

    for (metric, threshold) in thresholds.metrics() {
        let value = match metric {
            "cpu" => Some(averages.cpu_percent),
            "memory" => Some(averages.memory_mb),
            name => averages.counters.get(name).copied(),
        };
        let Some(value) = value else {
            continue;
        };

        total += metric_deduction(value, threshold);
        if let Some(severity) = threshold.level(value) {
            issues.push(HealthIssue {
                metric: metric.to_string(),
                severity,
                value,
                threshold: match severity {
                    AlertSeverity::Warning => threshold.warning,
                    AlertSeverity::Critical => threshold.critical,
                },
            });
        }
    }

    let score = (100.0 - total).clamp(0.0, 100.0).round() as u8;

    HealthRecord {
        score,
        status: HealthStatus::from_score(score),
        issues,
        computed_at: Utc::now(),
    }
}
