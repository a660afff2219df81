use crate::error::{WardenError, Result};
use crate::monitor::Threshold;
use crate::process::ServerId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

pub const SERVER_HISTORY_LIMIT: usize = 100;
pub const GLOBAL_HISTORY_LIMIT: usize = 500;

/// Metric name used for auto-restart entries in the alert history
pub const AUTO_RESTART_METRIC: &str = "auto_restart";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: String,
    pub server_id: ServerId,
    pub metric: String,
    pub severity: AlertSeverity,
    pub value: f64,
    pub threshold: f64,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub acknowledged: bool,
}

impl Alert {
    pub fn new(
        server_id: ServerId,
        metric: impl Into<String>,
        severity: AlertSeverity,
        value: f64,
        threshold: f64,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            server_id,
            metric: metric.into(),
            severity,
            value,
            threshold,
            message: message.into(),
            timestamp: Utc::now(),
            acknowledged: false,
        }
    }
}

/// Alert history plus the set of metric/severity pairs already alerted
/// since the metric was last below its warning level
#[derive(Debug, Default)]
pub struct AlertBook {
    by_server: HashMap<ServerId, VecDeque<Alert>>,
    global: VecDeque<Alert>,
    raised: HashSet<(ServerId, String, AlertSeverity)>,
}

impl AlertBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare a metric value with its threshold and return a new alert when
    /// it crosses a level not yet alerted. The alert is recorded.
    pub fn evaluate(
        &mut self,
        server_id: &ServerId,
        metric: &str,
        value: f64,
        threshold: &Threshold,
    ) -> Option<Alert> {
        let Some(severity) = threshold.level(value) else {
            self.raised
                .retain(|(id, m, _)| !(id == server_id && m == metric));
            return None;
        };

        let key = (server_id.clone(), metric.to_string(), severity);
        if !self.raised.insert(key) {
            return None;
        }

        let level = match severity {
            AlertSeverity::Warning => threshold.warning,
            AlertSeverity::Critical => threshold.critical,
        };
        let alert = Alert::new(
            server_id.clone(),
            metric,
            severity,
            value,
            level,
            format!("{} at {:.1} crossed {:?} level {:.1}", metric, value, severity, level),
        );
        self.record(alert.clone());
        Some(alert)
    }

    pub fn record(&mut self, alert: Alert) {
        let history = self.by_server.entry(alert.server_id.clone()).or_default();
        if history.len() == SERVER_HISTORY_LIMIT {
            history.pop_front();
        }
        history.push_back(alert.clone());

        if self.global.len() == GLOBAL_HISTORY_LIMIT {
            self.global.pop_front();
        }
        self.global.push_back(alert);
    }

    /// Alerts of one server, oldest first
    pub fn for_server(&self, server_id: &ServerId) -> Vec<Alert> {
        self.by_server
            .get(server_id)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn all(&self) -> Vec<Alert> {
        self.global.iter().cloned().collect()
    }

    pub fn acknowledge(&mut self, alert_id: &str) -> Result<Alert> {
        let mut found = None;

        for alert in self.global.iter_mut().filter(|a| a.id == alert_id) {
            alert.acknowledged = true;
            found = Some(alert.clone());
        }
        for history in self.by_server.values_mut() {
            for alert in history.iter_mut().filter(|a| a.id == alert_id) {
                alert.acknowledged = true;
                found = Some(alert.clone());
            }
        }

        found.ok_or_else(|| WardenError::InvalidParams(format!("Unknown alert id: {}", alert_id)))
    }

    /// Forget per-server state. Global history is kept.
    pub fn forget(&mut self, server_id: &ServerId) {
        self.by_server.remove(server_id);
        self.raised.retain(|(id, _, _)| id != server_id);
    }

    /// Allow every metric of a server to alert again
    pub fn reset_levels(&mut self, server_id: &ServerId) {
        self.raised.retain(|(id, _, _)| id != server_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_once_per_level_until_recovery() {
        let mut book = AlertBook::new();
        let id = ServerId::from("srv");
        let t = Threshold::new(80.0, 95.0);

        assert!(book.evaluate(&id, "cpu", 50.0, &t).is_none());

        let warning = book.evaluate(&id, "cpu", 85.0, &t).unwrap();
        assert_eq!(warning.severity, AlertSeverity::Warning);
        assert_eq!(warning.threshold, 80.0);
        assert!(book.evaluate(&id, "cpu", 86.0, &t).is_none());

        let critical = book.evaluate(&id, "cpu", 99.0, &t).unwrap();
        assert_eq!(critical.severity, AlertSeverity::Critical);

        // Bouncing between warning and critical does not re-alert
        assert!(book.evaluate(&id, "cpu", 85.0, &t).is_none());
        assert!(book.evaluate(&id, "cpu", 99.0, &t).is_none());

        // Recovery below warning re-arms both levels
        assert!(book.evaluate(&id, "cpu", 10.0, &t).is_none());
        assert!(book.evaluate(&id, "cpu", 99.0, &t).is_some());

        assert_eq!(book.for_server(&id).len(), 3);
    }

    #[test]
    fn test_metrics_are_independent() {
        let mut book = AlertBook::new();
        let id = ServerId::from("srv");
        let t = Threshold::new(1.0, 2.0);
        assert!(book.evaluate(&id, "cpu", 1.5, &t).is_some());
        assert!(book.evaluate(&id, "memory", 1.5, &t).is_some());
        assert!(book
            .evaluate(&ServerId::from("other"), "cpu", 1.5, &t)
            .is_some());
    }

    #[test]
    fn test_history_bounds() {
        let mut book = AlertBook::new();
        for i in 0..(GLOBAL_HISTORY_LIMIT + 20) {
            let id = ServerId::from(if i % 2 == 0 { "a" } else { "b" });
            book.record(Alert::new(id, "cpu", AlertSeverity::Warning, 1.0, 1.0, "x"));
        }
        assert_eq!(book.all().len(), GLOBAL_HISTORY_LIMIT);
        assert_eq!(book.for_server(&ServerId::from("a")).len(), SERVER_HISTORY_LIMIT);
    }

    #[test]
    fn test_acknowledge() {
        let mut book = AlertBook::new();
        let id = ServerId::from("srv");
        let alert = book
            .evaluate(&id, "cpu", 99.0, &Threshold::new(80.0, 95.0))
            .unwrap();

        let acked = book.acknowledge(&alert.id).unwrap();
        assert!(acked.acknowledged);
        assert!(book.for_server(&id)[0].acknowledged);
        assert!(book.all()[0].acknowledged);
        assert!(matches!(
            book.acknowledge("missing"),
            Err(WardenError::InvalidParams(_))
        ));
    }

    #[test]
    fn test_forget_keeps_global() {
        let mut book = AlertBook::new();
        let id = ServerId::from("srv");
        book.evaluate(&id, "cpu", 99.0, &Threshold::new(80.0, 95.0));
        book.forget(&id);
        assert!(book.for_server(&id).is_empty());
        assert_eq!(book.all().len(), 1);
        assert!(book
            .evaluate(&id, "cpu", 99.0, &Threshold::new(80.0, 95.0))
            .is_some());
    }
}
