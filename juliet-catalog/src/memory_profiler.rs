//! Memory sampling for the harness itself and for analyzer child processes.
//!
//! Harness scopes are enabled with `JULIET_MEMORY_PROFILE=1`; child
//! sampling is always on because it enforces the memory limit.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use sysinfo::{Pid, System};

static PROFILING_ENABLED: AtomicBool = AtomicBool::new(false);
static PEAK_MEMORY_MB: AtomicU64 = AtomicU64::new(0);

pub fn init() {
    if std::env::var("JULIET_MEMORY_PROFILE").is_ok() {
        PROFILING_ENABLED.store(true, Ordering::SeqCst);
        tracing::info!("memory profiling enabled");
    }
}

pub fn is_enabled() -> bool {
    PROFILING_ENABLED.load(Ordering::SeqCst)
}

/// Resident memory of `pid` in bytes, `None` once the process is gone.
pub fn process_memory(pid: u32) -> Option<u64> {
    ProcessSampler::new(pid).sample()
}

pub fn current_memory_mb() -> f64 {
    process_memory(std::process::id())
        .map(|bytes| bytes as f64 / (1024.0 * 1024.0))
        .unwrap_or(0.0)
}

/// Repeatedly samples one process, remembering the peak.
pub struct ProcessSampler {
    system: System,
    pid: Pid,
    peak: u64,
}

impl ProcessSampler {
    pub fn new(pid: u32) -> Self {
        Self {
            system: System::new(),
            pid: Pid::from(pid as usize),
            peak: 0,
        }
    }

    pub fn sample(&mut self) -> Option<u64> {
        self.system.refresh_process(self.pid);
        let bytes = self.system.process(self.pid)?.memory();
        self.peak = self.peak.max(bytes);
        Some(bytes)
    }

    pub fn peak(&self) -> u64 {
        self.peak
    }
}

fn update_peak(current_mb: f64) -> f64 {
    let current_mb_int = current_mb as u64;
    let old_peak = PEAK_MEMORY_MB.fetch_max(current_mb_int, Ordering::SeqCst);
    old_peak.max(current_mb_int) as f64
}

/// Highest harness memory seen at a scope boundary, in MB.
pub fn peak_mb() -> f64 {
    PEAK_MEMORY_MB.load(Ordering::SeqCst) as f64
}

/// Logs the memory delta of a scope when dropped. Both ends feed the peak.
pub struct MemoryScope {
    label: String,
    start_mb: f64,
}

impl MemoryScope {
    pub fn new(label: &str) -> Self {
        let start_mb = if is_enabled() {
            let mb = current_memory_mb();
            update_peak(mb);
            mb
        } else {
            0.0
        };

        Self {
            label: label.to_string(),
            start_mb,
        }
    }
}

impl Drop for MemoryScope {
    fn drop(&mut self) {
        if is_enabled() {
            let end_mb = current_memory_mb();
            let peak = update_peak(end_mb);
            let delta = end_mb - self.start_mb;
            let sign = if delta >= 0.0 { "+" } else { "" };
            tracing::info!(
                target: "juliet::memory",
                "{} completed: {:.1} MB ({}{:.1} MB, peak {:.1} MB)",
                self.label,
                end_mb,
                sign,
                delta,
                peak
            );
        }
    }
}

pub fn final_report() {
    if !is_enabled() {
        return;
    }

    let current = current_memory_mb();
    let peak = update_peak(current);
    tracing::info!(target: "juliet::memory", "final: current {current:.1} MB, peak {peak:.1} MB");
}
