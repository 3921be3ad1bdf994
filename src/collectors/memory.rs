//! Memory counters and the per-tick sampler.
//!
//! Parses `/proc/meminfo` on Linux and `vm_stat`/`sysctl` output on macOS;
//! other platforms go through `sysinfo`.
//! Read failures are transient: the [`Sampler`] keeps the previous counters
//! and re-stamps them, so a tick always produces a [`Sample`].

use crate::error::{MonitorError, Result};
#[cfg(target_os = "macos")]
use crate::subprocess::run_with_timeout_stdout;
use crate::types::Sample;
use std::path::PathBuf;
#[cfg(target_os = "macos")]
use std::time::Duration;
use std::time::Instant;
use tracing::{debug, warn};

/// Raw memory counters in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryCounters {
    /// Total physical memory.
    pub ram_total: u64,
    /// Used physical memory (total minus available).
    pub ram_used: u64,
    /// Total swap.
    pub swap_total: u64,
    /// Used swap.
    pub swap_used: u64,
}

impl MemoryCounters {
    /// Converts to a [`Sample`] stamped `timestamp`.
    #[must_use]
    pub fn into_sample(self, timestamp: Instant) -> Sample {
        Sample::new(timestamp, self.ram_used, self.ram_total, self.swap_used, self.swap_total)
    }
}

/// A host memory reader.
pub trait MemorySource: Send + Sync {
    /// Short identifier used in errors and logs.
    fn id(&self) -> &'static str;

    /// Reads current counters.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::TransientRead`] when the host data is
    /// unavailable or unparseable this time.
    fn read(&self) -> Result<MemoryCounters>;
}

/// Reads `/proc/meminfo` (or a file in the same format).
#[derive(Debug, Clone)]
pub struct ProcMeminfo {
    path: PathBuf,
}

impl ProcMeminfo {
    /// Reads the live `/proc/meminfo`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_path("/proc/meminfo")
    }

    /// Reads a meminfo-formatted file at `path`.
    #[must_use]
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for ProcMeminfo {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySource for ProcMeminfo {
    fn id(&self) -> &'static str {
        "meminfo"
    }

    fn read(&self) -> Result<MemoryCounters> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            MonitorError::TransientRead {
                source_name: "meminfo",
                message: format!("failed to read {}: {}", self.path.display(), e),
            }
        })?;
        parse_meminfo(&content)
    }
}

/// Parses meminfo text. Values are in KiB.
///
/// # Errors
///
/// Returns [`MonitorError::TransientRead`] if `MemTotal` is missing or zero.
pub fn parse_meminfo(content: &str) -> Result<MemoryCounters> {
    let mut total: u64 = 0;
    let mut free: u64 = 0;
    let mut available: Option<u64> = None;
    let mut swap_total: u64 = 0;
    let mut swap_free: u64 = 0;

    for line in content.lines() {
        let mut parts = line.split_whitespace();
        let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
            continue;
        };
        let Ok(kib) = value.parse::<u64>() else {
            continue;
        };
        let bytes = kib.saturating_mul(1024);

        match key {
            "MemTotal:" => total = bytes,
            "MemFree:" => free = bytes,
            "MemAvailable:" => available = Some(bytes),
            "SwapTotal:" => swap_total = bytes,
            "SwapFree:" => swap_free = bytes,
            _ => {}
        }
    }

    if total == 0 {
        return Err(MonitorError::TransientRead {
            source_name: "meminfo",
            message: "MemTotal missing or zero".to_string(),
        });
    }

    // Kernels before 3.14 lack MemAvailable.
    let available = available.unwrap_or(free);
    Ok(MemoryCounters {
        ram_total: total,
        ram_used: total.saturating_sub(available),
        swap_total,
        swap_used: swap_total.saturating_sub(swap_free),
    })
}

/// Reads `sysctl`/`vm_stat` on macOS.
#[cfg(target_os = "macos")]
#[derive(Debug, Clone, Default)]
pub struct VmStat;

#[cfg(target_os = "macos")]
impl MemorySource for VmStat {
    fn id(&self) -> &'static str {
        "vm_stat"
    }

    fn read(&self) -> Result<MemoryCounters> {
        let transient = |message: &str| MonitorError::TransientRead {
            source_name: "vm_stat",
            message: message.to_string(),
        };

        let total: u64 =
            run_with_timeout_stdout("sysctl", &["-n", "hw.memsize"], Duration::from_secs(1))
                .and_then(|s| s.trim().parse().ok())
                .ok_or_else(|| transient("sysctl hw.memsize failed"))?;
        let content = run_with_timeout_stdout("vm_stat", &[], Duration::from_secs(2))
            .ok_or_else(|| transient("vm_stat timed out or failed"))?;

        let available = parse_vm_stat_available(&content);
        let (swap_total, swap_used) =
            run_with_timeout_stdout("sysctl", &["-n", "vm.swapusage"], Duration::from_secs(1))
                .map(|s| parse_swapusage(&s))
                .unwrap_or((0, 0));

        Ok(MemoryCounters {
            ram_total: total,
            ram_used: total.saturating_sub(available),
            swap_total,
            swap_used,
        })
    }
}

/// Reclaimable bytes from `vm_stat` output: free, speculative, inactive and
/// purgeable pages.
#[cfg(any(target_os = "macos", test))]
fn parse_vm_stat_available(content: &str) -> u64 {
    let page_size: u64 = content
        .lines()
        .next()
        .and_then(|line| line.split("page size of ").nth(1))
        .and_then(|s| s.split(' ').next())
        .and_then(|s| s.parse().ok())
        .unwrap_or(4096);

    let pages: u64 = content
        .lines()
        .filter_map(|line| line.split_once(':'))
        .filter(|(key, _)| {
            matches!(
                key.trim(),
                "Pages free" | "Pages speculative" | "Pages inactive" | "Pages purgeable"
            )
        })
        .filter_map(|(_, value)| value.trim().trim_end_matches('.').parse::<u64>().ok())
        .sum();

    pages.saturating_mul(page_size)
}

/// Parses `total = 2048.00M  used = 1024.00M  free = ...` into (total, used).
#[cfg(any(target_os = "macos", test))]
fn parse_swapusage(content: &str) -> (u64, u64) {
    let mut sizes = content.split_whitespace().filter_map(|part| {
        let (number, scale) = if let Some(n) = part.strip_suffix('M') {
            (n, 1024.0 * 1024.0)
        } else if let Some(n) = part.strip_suffix('G') {
            (n, 1024.0 * 1024.0 * 1024.0)
        } else {
            return None;
        };
        number.parse::<f64>().ok().map(|v| (v * scale) as u64)
    });

    let total = sizes.next().unwrap_or(0);
    let used = sizes.next().unwrap_or(0);
    (total, used)
}

/// The best memory reader for the current platform.
#[must_use]
pub fn platform_source() -> Box<dyn MemorySource> {
    #[cfg(target_os = "linux")]
    {
        Box::new(ProcMeminfo::new())
    }
    #[cfg(target_os = "macos")]
    {
        Box::new(VmStat)
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        Box::new(super::SysinfoMemory::new())
    }
}

/// Produces one [`Sample`] per call, never failing.
pub struct Sampler {
    source: Box<dyn MemorySource>,
    last: Option<Sample>,
    failures: u32,
}

impl Sampler {
    /// Creates a sampler over `source`.
    #[must_use]
    pub fn new(source: Box<dyn MemorySource>) -> Self {
        Self { source, last: None, failures: 0 }
    }

    /// Samples now.
    pub fn sample(&mut self) -> Sample {
        self.sample_at(Instant::now())
    }

    /// Samples, stamping the result `now`.
    ///
    /// On a read error the previous counters are returned with the new
    /// timestamp (all zeros before the first successful read).
    pub fn sample_at(&mut self, now: Instant) -> Sample {
        match self.source.read() {
            Ok(counters) => {
                if self.failures > 0 {
                    debug!(source = self.source.id(), failures = self.failures, "memory reads recovered");
                    self.failures = 0;
                }
                let sample = counters.into_sample(now);
                self.last = Some(sample);
                sample
            }
            Err(err) => {
                self.failures = self.failures.saturating_add(1);
                // Log the first failure of a streak; the rest are noise.
                if self.failures == 1 {
                    warn!(source = self.source.id(), error = %err, "memory read failed, keeping last sample");
                }
                self.last.map_or_else(|| Sample::empty(now), |s| s.restamped(now))
            }
        }
    }

    /// The last successfully read sample.
    #[must_use]
    pub fn last(&self) -> Option<Sample> {
        self.last
    }

    /// Consecutive failed reads.
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.failures
    }
}

impl std::fmt::Debug for Sampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sampler")
            .field("source", &self.source.id())
            .field("last", &self.last)
            .field("failures", &self.failures)
            .finish()
    }
}
