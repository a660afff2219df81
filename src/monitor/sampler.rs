use crate::error::{WardenError, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// OS-level resource usage of one process
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessUsage {
    pub cpu_percent: f64,
    pub memory_bytes: u64,
}

/// Source of per-process resource usage. Called from a blocking thread.
pub trait UsageSampler: Send + Sync + 'static {
    fn sample(&self, pid: u32) -> Result<ProcessUsage>;

    /// Drop any state kept for a process that will not be sampled again
    fn release(&self, _pid: u32) {}
}

/// `sysinfo`-backed sampler. CPU usage is relative to the previous refresh,
/// so the first sample of a process reads 0%.
///
/// Each pid gets its own `System`, so a slow read for one process never
/// holds up samples of another.
pub struct SysinfoSampler {
    systems: Mutex<HashMap<u32, Arc<Mutex<System>>>>,
}

impl SysinfoSampler {
    pub fn new() -> Self {
        Self {
            systems: Mutex::new(HashMap::new()),
        }
    }

    fn system_for(&self, pid: u32) -> Result<Arc<Mutex<System>>> {
        let mut systems = self
            .systems
            .lock()
            .map_err(|_| WardenError::Internal("sampler table poisoned".to_string()))?;
        Ok(Arc::clone(
            systems
                .entry(pid)
                .or_insert_with(|| Arc::new(Mutex::new(System::new()))),
        ))
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl UsageSampler for SysinfoSampler {
    fn sample(&self, pid: u32) -> Result<ProcessUsage> {
        let system = self.system_for(pid)?;
        let mut system = system
            .lock()
            .map_err(|_| WardenError::Internal("sampler lock poisoned".to_string()))?;

        let sys_pid = Pid::from_u32(pid);
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[sys_pid]),
            true,
            ProcessRefreshKind::new().with_cpu().with_memory(),
        );

        let usage = system.process(sys_pid).map(|process| ProcessUsage {
            cpu_percent: process.cpu_usage() as f64,
            memory_bytes: process.memory(),
        });
        drop(system);

        usage.ok_or_else(|| {
            self.release(pid);
            WardenError::SampleFailed(pid.to_string(), "process not found".to_string())
        })
    }

    fn release(&self, pid: u32) {
        if let Ok(mut systems) = self.systems.lock() {
            systems.remove(&pid);
        }
    }
}
