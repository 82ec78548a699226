//! Process and host statistics gathered with `sysinfo`.
//!
//! Runtime gauges are enumerated by [`RUNTIME_STATS`], a static table of
//! metric names and accessors over a [`RuntimeSample`].

use sysinfo::{
    CpuRefreshKind, MemoryRefreshKind, Pid, ProcessRefreshKind, ProcessesToUpdate, RefreshKind,
    System,
};
use tracing::debug;

/// One reading of process-level and system-level statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuntimeSample {
    pub resident_memory: u64,
    pub virtual_memory: u64,
    pub cpu_usage: f32,
    pub disk_read_bytes: u64,
    pub disk_written_bytes: u64,
    pub run_time_secs: u64,
    pub load_one: f64,
    pub load_five: f64,
    pub load_fifteen: f64,
    pub used_memory: u64,
    pub available_memory: u64,
    pub total_swap: u64,
    pub used_swap: u64,
}

/// Accessor from a sample to one gauge value.
pub type StatAccessor = fn(&RuntimeSample) -> f64;

/// Gauge name and accessor for every runtime statistic the agent reports.
pub static RUNTIME_STATS: &[(&str, StatAccessor)] = &[
    ("ResidentMemory", |s| s.resident_memory as f64),
    ("VirtualMemory", |s| s.virtual_memory as f64),
    ("ProcessCPUUsage", |s| f64::from(s.cpu_usage)),
    ("DiskReadBytes", |s| s.disk_read_bytes as f64),
    ("DiskWrittenBytes", |s| s.disk_written_bytes as f64),
    ("RunTime", |s| s.run_time_secs as f64),
    ("LoadAverage1", |s| s.load_one),
    ("LoadAverage5", |s| s.load_five),
    ("LoadAverage15", |s| s.load_fifteen),
    ("UsedMemory", |s| s.used_memory as f64),
    ("AvailableMemory", |s| s.available_memory as f64),
    ("TotalSwap", |s| s.total_swap as f64),
    ("UsedSwap", |s| s.used_swap as f64),
];

impl RuntimeSample {
    /// Every runtime gauge of this sample, in table order.
    pub fn gauges(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        RUNTIME_STATS
            .iter()
            .map(move |(name, accessor)| (*name, accessor(self)))
    }
}

/// Samples statistics of the current process.
pub struct RuntimeSampler {
    system: System,
    pid: Option<Pid>,
}

impl RuntimeSampler {
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                debug!("Process statistics unavailable: {}", e);
                None
            }
        };
        Self {
            system: System::new_with_specifics(
                RefreshKind::nothing().with_memory(MemoryRefreshKind::everything()),
            ),
            pid,
        }
    }

    pub fn sample(&mut self) -> RuntimeSample {
        self.system.refresh_memory();
        let load = System::load_average();

        let mut sample = RuntimeSample {
            load_one: load.one,
            load_five: load.five,
            load_fifteen: load.fifteen,
            used_memory: self.system.used_memory(),
            available_memory: self.system.available_memory(),
            total_swap: self.system.total_swap(),
            used_swap: self.system.used_swap(),
            ..Default::default()
        };

        if let Some(pid) = self.pid {
            self.system.refresh_processes_specifics(
                ProcessesToUpdate::Some(&[pid]),
                false,
                ProcessRefreshKind::nothing()
                    .with_memory()
                    .with_cpu()
                    .with_disk_usage(),
            );
            if let Some(process) = self.system.process(pid) {
                let disk = process.disk_usage();
                sample.resident_memory = process.memory();
                sample.virtual_memory = process.virtual_memory();
                sample.cpu_usage = process.cpu_usage();
                sample.disk_read_bytes = disk.total_read_bytes;
                sample.disk_written_bytes = disk.total_written_bytes;
                sample.run_time_secs = process.run_time();
            }
        }

        sample
    }
}

impl Default for RuntimeSampler {
    fn default() -> Self {
        Self::new()
    }
}

/// Samples host memory and per-CPU utilization.
pub struct HostSampler {
    system: System,
}

impl HostSampler {
    pub fn new() -> Self {
        Self {
            system: System::new_with_specifics(
                RefreshKind::nothing()
                    .with_cpu(CpuRefreshKind::everything())
                    .with_memory(MemoryRefreshKind::everything()),
            ),
        }
    }

    /// `TotalMemory`, `FreeMemory` and `CPUutilization{N}` (1-based).
    pub fn sample(&mut self) -> Vec<(String, f64)> {
        self.system.refresh_memory();
        self.system.refresh_cpu_usage();

        let mut stats = Vec::with_capacity(2 + self.system.cpus().len());
        stats.push(("TotalMemory".to_string(), self.system.total_memory() as f64));
        stats.push(("FreeMemory".to_string(), self.system.free_memory() as f64));
        for (i, cpu) in self.system.cpus().iter().enumerate() {
            stats.push((
                format!("CPUutilization{}", i + 1),
                f64::from(cpu.cpu_usage()),
            ));
        }
        stats
    }
}

impl Default for HostSampler {
    fn default() -> Self {
        Self::new()
    }
}
