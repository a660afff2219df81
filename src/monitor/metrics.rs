use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Number of trailing samples averaged when evaluating a metric
pub const SMOOTHING_SAMPLES: usize = 3;

const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;

/// One observation of a running server process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSample {
    pub timestamp: DateTime<Utc>,
    pub cpu_percent: f64,
    pub memory_bytes: u64,
    pub uptime_secs: u64,
    /// Game counters reported by integrations (players online, tick lag, ...)
    #[serde(default)]
    pub counters: HashMap<String, f64>,
}

impl MetricsSample {
    pub fn memory_mb(&self) -> f64 {
        self.memory_bytes as f64 / BYTES_PER_MIB
    }
}

/// Metric values averaged over the tail of a window
#[derive(Debug, Clone, PartialEq)]
pub struct MetricAverages {
    pub cpu_percent: f64,
    pub memory_mb: f64,
    pub counters: HashMap<String, f64>,
}

/// Bounded ring buffer of samples, oldest first
#[derive(Debug, Clone)]
pub struct MetricsWindow {
    samples: VecDeque<MetricsSample>,
    capacity: usize,
}

impl MetricsWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, sample: MetricsSample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn latest(&self) -> Option<&MetricsSample> {
        self.samples.back()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn samples(&self) -> Vec<MetricsSample> {
        self.samples.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Mean of each metric over the last `n` samples. Counters are averaged
    /// over the samples that carry them.
    pub fn averages(&self, n: usize) -> Option<MetricAverages> {
        let take = n.min(self.samples.len());
        if take == 0 {
            return None;
        }

        let recent = self.samples.iter().skip(self.samples.len() - take);
        let mut cpu = 0.0;
        let mut memory = 0.0;
        let mut sums: HashMap<String, (f64, u32)> = HashMap::new();

        for sample in recent {
            cpu += sample.cpu_percent;
            memory += sample.memory_mb();
            for (name, value) in &sample.counters {
                let entry = sums.entry(name.clone()).or_insert((0.0, 0));
                entry.0 += value;
                entry.1 += 1;
            }
        }

        Some(MetricAverages {
            cpu_percent: cpu / take as f64,
            memory_mb: memory / take as f64,
            counters: sums
                .into_iter()
                .map(|(name, (sum, count))| (name, sum / count as f64))
                .collect(),
        })
    }
}
