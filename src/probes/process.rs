//! Host process statistics via `sysinfo`.

use parking_lot::Mutex;
use sysinfo::{Pid, ProcessesToUpdate, System};

use super::{Probe, ProbeError, Sample};

/// Samples CPU, memory and thread count of the current process.
pub struct ProcessProbe {
    pid: Pid,
    system: Mutex<System>,
}

impl ProcessProbe {
    pub fn new() -> Self {
        Self {
            pid: Pid::from_u32(std::process::id()),
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for ProcessProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl Probe for ProcessProbe {
    fn name(&self) -> &str {
        "process"
    }

    fn namespace(&self) -> &str {
        "runtime_process"
    }

    fn dependencies_present(&self) -> bool {
        sysinfo::IS_SUPPORTED_SYSTEM
    }

    fn sample(&self) -> Result<Vec<Sample>, ProbeError> {
        let mut system = self.system.lock();
        // Only this pid; CPU totals are needed for the usage percentage.
        system.refresh_cpu_usage();
        system.refresh_processes(ProcessesToUpdate::Some(&[self.pid]), true);

        let process = system.process(self.pid).ok_or_else(|| ProbeError::Unavailable {
            probe: self.name().to_string(),
            reason: format!("process {} not visible", self.pid),
        })?;

        let mut samples = vec![
            // First reading is 0: CPU usage needs two refreshes.
            Sample::new("cpu_usage_percent", f64::from(process.cpu_usage())),
            Sample::new("resident_memory_bytes", process.memory() as f64),
            Sample::new("virtual_memory_bytes", process.virtual_memory() as f64),
        ];
        if let Some(tasks) = process.tasks() {
            samples.push(Sample::new("threads", tasks.len() as f64));
        }
        Ok(samples)
    }
}
