use crate::error::{WardenError, Result};
use crate::monitor::AlertSeverity;
use crate::process::ServerId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Warning/critical levels for one metric; higher values are worse
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub warning: f64,
    pub critical: f64,
}

impl Threshold {
    pub const fn new(warning: f64, critical: f64) -> Self {
        Self { warning, critical }
    }

    pub fn level(&self, value: f64) -> Option<AlertSeverity> {
        if value >= self.critical {
            Some(AlertSeverity::Critical)
        } else if value >= self.warning {
            Some(AlertSeverity::Warning)
        } else {
            None
        }
    }

    fn validate(&self, metric: &str) -> Result<()> {
        if !self.warning.is_finite() || !self.critical.is_finite() || self.warning < 0.0 {
            return Err(WardenError::InvalidConfig(format!(
                "Threshold for '{}' must be finite and non-negative",
                metric
            )));
        }
        if self.warning >= self.critical {
            return Err(WardenError::InvalidConfig(format!(
                "Warning threshold for '{}' must be below its critical threshold",
                metric
            )));
        }
        Ok(())
    }
}

/// Alerting and auto-restart policy for a server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertThresholdConfig {
    /// CPU usage in percent of one core
    #[serde(default = "default_cpu")]
    pub cpu: Threshold,

    /// Resident memory in MiB
    #[serde(default = "default_memory_mb")]
    pub memory_mb: Threshold,

    /// Thresholds for game counters, keyed by counter name
    #[serde(default)]
    pub custom: HashMap<String, Threshold>,

    /// Triggers per cooldown window; the trigger that reaches it is suppressed
    #[serde(default = "default_max_restart_count")]
    pub max_restart_count: u32,

    #[serde(default = "default_restart_cooldown_secs")]
    pub restart_cooldown_secs: u64,

    /// Consecutive critical ticks before health triggers a restart
    #[serde(default = "default_critical_ticks")]
    pub critical_ticks_before_restart: u32,

    #[serde(default = "default_auto_restart")]
    pub auto_restart: bool,

    /// Delay before the first automatic restart; doubles per restart in the window
    #[serde(default = "default_restart_delay_secs")]
    pub restart_delay_secs: u64,

    #[serde(default = "default_max_restart_delay_secs")]
    pub max_restart_delay_secs: u64,
}

fn default_cpu() -> Threshold {
    Threshold::new(80.0, 95.0)
}

fn default_memory_mb() -> Threshold {
    Threshold::new(4096.0, 8192.0)
}

fn default_max_restart_count() -> u32 {
    3
}

fn default_restart_cooldown_secs() -> u64 {
    300
}

fn default_critical_ticks() -> u32 {
    3
}

fn default_auto_restart() -> bool {
    true
}

fn default_restart_delay_secs() -> u64 {
    5
}

fn default_max_restart_delay_secs() -> u64 {
    60
}

impl Default for AlertThresholdConfig {
    fn default() -> Self {
        Self {
            cpu: default_cpu(),
            memory_mb: default_memory_mb(),
            custom: HashMap::new(),
            max_restart_count: default_max_restart_count(),
            restart_cooldown_secs: default_restart_cooldown_secs(),
            critical_ticks_before_restart: default_critical_ticks(),
            auto_restart: default_auto_restart(),
            restart_delay_secs: default_restart_delay_secs(),
            max_restart_delay_secs: default_max_restart_delay_secs(),
        }
    }
}

impl AlertThresholdConfig {
    pub fn validate(&self) -> Result<()> {
        self.cpu.validate("cpu")?;
        self.memory_mb.validate("memory_mb")?;
        for (name, threshold) in &self.custom {
            if name.trim().is_empty() {
                return Err(WardenError::InvalidConfig(
                    "Custom threshold names cannot be empty".to_string(),
                ));
            }
            threshold.validate(name)?;
        }
        if self.max_restart_count == 0 {
            return Err(WardenError::InvalidConfig(
                "max_restart_count must be at least 1".to_string(),
            ));
        }
        if self.restart_cooldown_secs == 0 {
            return Err(WardenError::InvalidConfig(
                "restart_cooldown_secs must be greater than 0".to_string(),
            ));
        }
        if self.critical_ticks_before_restart == 0 {
            return Err(WardenError::InvalidConfig(
                "critical_ticks_before_restart must be at least 1".to_string(),
            ));
        }
        if self.max_restart_delay_secs < self.restart_delay_secs {
            return Err(WardenError::InvalidConfig(
                "max_restart_delay_secs cannot be below restart_delay_secs".to_string(),
            ));
        }
        Ok(())
    }

    pub fn restart_cooldown(&self) -> Duration {
        Duration::from_secs(self.restart_cooldown_secs)
    }

    /// Every metric with its threshold, as `(name, threshold)`
    pub fn metrics(&self) -> Vec<(&str, &Threshold)> {
        let mut metrics = vec![("cpu", &self.cpu), ("memory", &self.memory_mb)];
        let mut custom: Vec<_> = self.custom.iter().map(|(k, v)| (k.as_str(), v)).collect();
        custom.sort_by(|a, b| a.0.cmp(b.0));
        metrics.extend(custom);
        metrics
    }
}

/// Where a threshold update applies
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThresholdScope {
    Global,
    Server(ServerId),
}

/// Global defaults plus operator overrides per server
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThresholdBook {
    pub global: AlertThresholdConfig,
    #[serde(default)]
    pub overrides: HashMap<ServerId, AlertThresholdConfig>,
}

impl ThresholdBook {
    pub fn new(global: AlertThresholdConfig) -> Self {
        Self {
            global,
            overrides: HashMap::new(),
        }
    }

    /// Operator override first, then the server's deployed config, then global
    pub fn effective(
        &self,
        server_id: &ServerId,
        deployed: Option<&AlertThresholdConfig>,
    ) -> AlertThresholdConfig {
        self.overrides
            .get(server_id)
            .or(deployed)
            .unwrap_or(&self.global)
            .clone()
    }

    pub fn set(&mut self, scope: ThresholdScope, config: AlertThresholdConfig) -> Result<()> {
        config.validate()?;
        match scope {
            ThresholdScope::Global => self.global = config,
            ThresholdScope::Server(id) => {
                self.overrides.insert(id, config);
            }
        }
        Ok(())
    }

    pub fn forget(&mut self, server_id: &ServerId) {
        self.overrides.remove(server_id);
    }
}
