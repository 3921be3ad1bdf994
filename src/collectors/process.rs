//! Top memory consumers.
//!
//! Walks `/proc/[pid]` on Linux (`ps` on macOS, `sysinfo` elsewhere) and
//! ranks processes by resident memory. A process that exits or denies
//! access mid-scan is skipped; only a failure to enumerate at all is
//! reported.

use crate::error::{MonitorError, Result};
#[cfg(target_os = "macos")]
use crate::subprocess::run_with_timeout;
use crate::types::{ProcessEntry, ProcessRanking};
use std::path::{Path, PathBuf};
#[cfg(target_os = "macos")]
use std::time::Duration;
use tracing::{debug, warn};

/// A host process enumerator.
pub trait ProcessSource: Send + Sync {
    /// Short identifier used in errors and logs.
    fn id(&self) -> &'static str;

    /// Enumerates processes. Per-process failures are returned inline so the
    /// caller can skip them.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::TransientRead`] if enumeration itself fails.
    fn scan(&self) -> Result<Vec<Result<ProcessEntry>>>;
}

/// Reads `/proc` (or a directory laid out the same way).
#[derive(Debug, Clone)]
pub struct ProcFs {
    root: PathBuf,
    page_size: u64,
}

impl ProcFs {
    /// Reads the live `/proc`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_root("/proc", system_page_size())
    }

    /// Reads a proc-like tree at `root` with the given page size.
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>, page_size: u64) -> Self {
        Self { root: root.into(), page_size }
    }

    fn read_entry(&self, pid: u32) -> Result<ProcessEntry> {
        let dir = self.root.join(pid.to_string());
        let stat = read_or_vanished(&dir.join("stat"), pid)?;
        let statm = read_or_vanished(&dir.join("statm"), pid)?;

        let name = parse_stat_name(&stat).ok_or(MonitorError::ProcessNotFound(pid))?;
        let pages = parse_statm_resident(&statm).ok_or(MonitorError::ProcessNotFound(pid))?;

        Ok(ProcessEntry::new(pid, name, pages.saturating_mul(self.page_size)))
    }
}

impl Default for ProcFs {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSource for ProcFs {
    fn id(&self) -> &'static str {
        "procfs"
    }

    fn scan(&self) -> Result<Vec<Result<ProcessEntry>>> {
        let dir = std::fs::read_dir(&self.root).map_err(|e| MonitorError::TransientRead {
            source_name: "procfs",
            message: format!("failed to read {}: {}", self.root.display(), e),
        })?;

        Ok(dir
            .flatten()
            .filter_map(|entry| entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()))
            .map(|pid| self.read_entry(pid))
            .collect())
    }
}

fn read_or_vanished(path: &Path, pid: u32) -> Result<String> {
    std::fs::read_to_string(path).map_err(|_| MonitorError::ProcessNotFound(pid))
}

/// Extracts the command name from `/proc/[pid]/stat`: `pid (name) state ...`.
///
/// The name may itself contain parentheses, so the last `)` closes it.
#[must_use]
pub fn parse_stat_name(stat: &str) -> Option<String> {
    let start = stat.find('(')?;
    let end = stat.rfind(')')?;
    (end > start).then(|| stat[start + 1..end].to_string())
}

/// Resident pages: the second field of `/proc/[pid]/statm`.
#[must_use]
pub fn parse_statm_resident(statm: &str) -> Option<u64> {
    statm.split_whitespace().nth(1)?.parse().ok()
}

#[cfg(target_os = "linux")]
#[allow(unsafe_code)]
fn system_page_size() -> u64 {
    // SAFETY: sysconf only reads a system constant.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    u64::try_from(size).ok().filter(|&s| s > 0).unwrap_or(4096)
}

#[cfg(not(target_os = "linux"))]
fn system_page_size() -> u64 {
    4096
}

/// Runs `ps` on macOS.
#[cfg(target_os = "macos")]
#[derive(Debug, Clone, Default)]
pub struct Ps;

#[cfg(target_os = "macos")]
impl ProcessSource for Ps {
    fn id(&self) -> &'static str {
        "ps"
    }

    fn scan(&self) -> Result<Vec<Result<ProcessEntry>>> {
        let out = run_with_timeout("ps", &["-axo", "pid=,rss=,comm="], Duration::from_secs(5))
            .stdout_string()
            .ok_or_else(|| MonitorError::TransientRead {
                source_name: "ps",
                message: "ps timed out or failed".to_string(),
            })?;
        Ok(out.lines().filter_map(parse_ps_line).map(Ok).collect())
    }
}

/// Parses one `pid rss comm` line; rss is in KiB.
#[cfg(any(target_os = "macos", test))]
fn parse_ps_line(line: &str) -> Option<ProcessEntry> {
    let mut parts = line.split_whitespace();
    let pid = parts.next()?.parse().ok()?;
    let rss_kib: u64 = parts.next()?.parse().ok()?;
    let command = parts.collect::<Vec<_>>().join(" ");
    let name = command.rsplit('/').next().unwrap_or(&command).to_string();
    Some(ProcessEntry::new(pid, name, rss_kib.saturating_mul(1024)))
}

/// The best process enumerator for the current platform.
#[must_use]
pub fn platform_source() -> Box<dyn ProcessSource> {
    #[cfg(target_os = "linux")]
    {
        Box::new(ProcFs::new())
    }
    #[cfg(target_os = "macos")]
    {
        Box::new(Ps)
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        Box::new(super::SysinfoProcesses::new())
    }
}

/// Ranks processes by resident memory on each refresh.
pub struct TopConsumers {
    source: Box<dyn ProcessSource>,
    last: ProcessRanking,
    skipped: usize,
}

impl TopConsumers {
    /// Creates a ranker over `source`.
    #[must_use]
    pub fn new(source: Box<dyn ProcessSource>) -> Self {
        Self { source, last: ProcessRanking::default(), skipped: 0 }
    }

    /// Rebuilds the ranking, keeping the top `n`.
    ///
    /// If enumeration fails, the previous ranking (cut to `n`) is returned.
    pub fn refresh(&mut self, n: usize) -> ProcessRanking {
        match self.source.scan() {
            Ok(results) => {
                let total = results.len();
                let entries: Vec<ProcessEntry> = results.into_iter().filter_map(|r| r.ok()).collect();
                self.skipped = total - entries.len();
                if self.skipped > 0 {
                    debug!(skipped = self.skipped, "processes skipped during scan");
                }
                self.last = ProcessRanking::from_entries(entries, n);
            }
            Err(err) => {
                warn!(source = self.source.id(), error = %err, "process scan failed, keeping last ranking");
                self.last = ProcessRanking::from_entries(self.last.entries().to_vec(), n);
            }
        }
        self.last.clone()
    }

    /// The most recent ranking.
    #[must_use]
    pub fn last(&self) -> &ProcessRanking {
        &self.last
    }

    /// Processes skipped in the most recent successful scan.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

impl std::fmt::Debug for TopConsumers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopConsumers")
            .field("source", &self.source.id())
            .field("last", &self.last)
            .finish()
    }
}
