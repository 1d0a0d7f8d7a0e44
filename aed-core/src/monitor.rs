//! Process CPU sampling for result records.

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::warn;

/// Best-effort CPU usage source. Sampling must return quickly; a failed
/// sample reports `0.0` rather than an error.
pub trait ResourceMonitor: Send {
    /// CPU usage of this process in percent (may exceed 100 on multi-core).
    fn cpu_percent(&mut self) -> f32;
}

/// `sysinfo`-backed monitor for the current process.
///
/// CPU usage is a delta between refreshes, so the first sample is `0.0`.
pub struct SysinfoMonitor {
    system: System,
    pid: Option<Pid>,
}

impl SysinfoMonitor {
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                warn!("cannot resolve current pid, cpu usage will read 0: {e}");
                None
            }
        };
        let mut monitor = Self {
            system: System::new(),
            pid,
        };
        // Prime the delta.
        monitor.cpu_percent();
        monitor
    }
}

impl Default for SysinfoMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceMonitor for SysinfoMonitor {
    fn cpu_percent(&mut self) -> f32 {
        let Some(pid) = self.pid else {
            return 0.0;
        };
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing().with_cpu(),
        );
        self.system
            .process(pid)
            .map(|p| p.cpu_usage())
            .filter(|v| v.is_finite())
            .unwrap_or(0.0)
    }
}

/// Reports a constant value. For tests and for runs that do not want
/// telemetry.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedMonitor(pub f32);

impl ResourceMonitor for FixedMonitor {
    fn cpu_percent(&mut self) -> f32 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn sysinfo_samples_are_finite_and_non_negative() {
        let mut monitor = SysinfoMonitor::new();
        // Burn a little CPU so the delta has something to measure.
        let mut acc = 0u64;
        for i in 0..200_000u64 {
            acc = acc.wrapping_mul(31).wrapping_add(i);
        }
        assert_ne!(acc, 1);

        let started = Instant::now();
        let cpu = monitor.cpu_percent();
        assert!(cpu.is_finite());
        assert!(cpu >= 0.0);
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn fixed_monitor_reports_its_value() {
        assert_eq!(FixedMonitor(12.5).cpu_percent(), 12.5);
    }
}
