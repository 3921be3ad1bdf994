//! Readers backed by the `sysinfo` crate.
//!
//! Used where no native reader exists (Windows and the BSDs). They work on
//! Linux and macOS too, which is where the tests exercise them.

use crate::collectors::{MemoryCounters, MemorySource, ProcessSource};
use crate::error::{MonitorError, Result};
use crate::types::ProcessEntry;
use parking_lot::Mutex;
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};

/// Memory counters from [`System::refresh_memory`].
pub struct SysinfoMemory {
    system: Mutex<System>,
}

impl SysinfoMemory {
    /// Creates a reader with an empty system snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self { system: Mutex::new(System::new()) }
    }
}

impl Default for SysinfoMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySource for SysinfoMemory {
    fn id(&self) -> &'static str {
        "sysinfo"
    }

    fn read(&self) -> Result<MemoryCounters> {
        let mut system = self.system.lock();
        system.refresh_memory();

        let total = system.total_memory();
        if total == 0 {
            return Err(MonitorError::TransientRead {
                source_name: "sysinfo",
                message: "total memory reported as zero".to_string(),
            });
        }

        // Some platforms report no available figure; fall back to used.
        let used = match system.available_memory() {
            0 => system.used_memory(),
            available => total.saturating_sub(available),
        };
        Ok(MemoryCounters {
            ram_total: total,
            ram_used: used.min(total),
            swap_total: system.total_swap(),
            swap_used: system.used_swap(),
        })
    }
}

impl std::fmt::Debug for SysinfoMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SysinfoMemory").finish_non_exhaustive()
    }
}

/// Process table from [`System::refresh_processes_specifics`], memory only.
pub struct SysinfoProcesses {
    system: Mutex<System>,
}

impl SysinfoProcesses {
    /// Creates an enumerator with an empty system snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self { system: Mutex::new(System::new()) }
    }
}

impl Default for SysinfoProcesses {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSource for SysinfoProcesses {
    fn id(&self) -> &'static str {
        "sysinfo"
    }

    fn scan(&self) -> Result<Vec<Result<ProcessEntry>>> {
        let mut system = self.system.lock();
        let refreshed = system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing().with_memory(),
        );
        if refreshed == 0 {
            return Err(MonitorError::TransientRead {
                source_name: "sysinfo",
                message: "no processes listed".to_string(),
            });
        }

        Ok(system
            .processes()
            .iter()
            .map(|(pid, process)| {
                Ok(ProcessEntry::new(
                    pid.as_u32(),
                    process.name().to_string_lossy().into_owned(),
                    process.memory(),
                ))
            })
            .collect())
    }
}

impl std::fmt::Debug for SysinfoProcesses {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SysinfoProcesses").finish_non_exhaustive()
    }
}

#[cfg(all(test, any(target_os = "linux", target_os = "macos", windows)))]
mod tests {
    use super::*;
    use crate::collectors::{Sampler, TopConsumers};

    #[test]
    fn test_memory_reads_live_host() {
        let counters = SysinfoMemory::new().read().unwrap();

        assert!(counters.ram_total > 0);
        assert!(counters.ram_used <= counters.ram_total);
        assert!(counters.swap_used <= counters.swap_total || counters.swap_total == 0);
    }

    #[test]
    fn test_sampler_over_sysinfo_yields_percentages() {
        let mut sampler = Sampler::new(Box::new(SysinfoMemory::new()));
        let sample = sampler.sample();

        assert!(sample.ram_percent > 0.0 && sample.ram_percent <= 100.0);
        assert_eq!(sampler.consecutive_failures(), 0);
    }

    #[test]
    fn test_scan_lists_this_process() {
        let me = std::process::id();
        let entries = SysinfoProcesses::new().scan().unwrap();

        let own = entries.iter().flatten().find(|e| e.pid == me).unwrap();
        assert!(own.resident_bytes > 0);
    }

    #[test]
    fn test_ranking_over_sysinfo() {
        let mut top = TopConsumers::new(Box::new(SysinfoProcesses::new()));
        let ranking = top.refresh(3);

        assert!(!ranking.is_empty() && ranking.len() <= 3);
        let sizes: Vec<u64> = ranking.iter().map(|e| e.resident_bytes).collect();
        assert!(sizes.windows(2).all(|w| w[0] >= w[1]));
    }
}
