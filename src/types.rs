//! Core value types shared by every component.
//!
//! - [`Sample`]: one immutable memory reading, produced once per tick
//! - [`ProcessRanking`]: top memory consumers, rebuilt wholesale each refresh
//! - [`ReclaimRequest`] / [`ReclaimResult`]: the reclaim boundary
//!
//! All types are plain data and cheap to clone, so each tick can hand the
//! same values to history, ranking, policy evaluation and observers.

use std::cmp::Ordering;
use std::fmt;
use std::time::{Duration, Instant};

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// A point-in-time memory and swap reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// When the reading was taken (or, for a stale reading, re-stamped).
    pub timestamp: Instant,
    /// Used physical memory in bytes.
    pub ram_used: u64,
    /// Total physical memory in bytes.
    pub ram_total: u64,
    /// Used physical memory as a percentage of total (0.0 - 100.0).
    pub ram_percent: f64,
    /// Used swap in bytes.
    pub swap_used: u64,
    /// Total swap in bytes.
    pub swap_total: u64,
    /// Used swap as a percentage of total (0.0 - 100.0).
    pub swap_percent: f64,
}

impl Sample {
    /// Builds a sample from raw byte counters, deriving both percentages.
    #[must_use]
    pub fn new(
        timestamp: Instant,
        ram_used: u64,
        ram_total: u64,
        swap_used: u64,
        swap_total: u64,
    ) -> Self {
        Self {
            timestamp,
            ram_used,
            ram_total,
            ram_percent: percent_of(ram_used, ram_total),
            swap_used,
            swap_total,
            swap_percent: percent_of(swap_used, swap_total),
        }
    }

    /// An all-zero sample, used before the first successful read.
    #[must_use]
    pub fn empty(timestamp: Instant) -> Self {
        Self::new(timestamp, 0, 0, 0, 0)
    }

    /// Returns a copy with the same counters and a new timestamp.
    #[must_use]
    pub fn restamped(&self, timestamp: Instant) -> Self {
        Self { timestamp, ..*self }
    }

    /// Human-readable RAM line.
    #[must_use]
    pub fn ram_text(&self) -> String {
        format!(
            "Physical Memory: {:.2} GB / {:.2} GB ({:.1}%)",
            self.ram_used as f64 / GIB,
            self.ram_total as f64 / GIB,
            self.ram_percent
        )
    }

    /// Human-readable swap line.
    #[must_use]
    pub fn swap_text(&self) -> String {
        format!(
            "Paging File: {:.2} GB / {:.2} GB ({:.1}%)",
            self.swap_used as f64 / GIB,
            self.swap_total as f64 / GIB,
            self.swap_percent
        )
    }
}

fn percent_of(used: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    ((used as f64 / total as f64) * 100.0).clamp(0.0, 100.0)
}

/// One process in a ranking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    /// Process ID.
    pub pid: u32,
    /// Process name.
    pub name: String,
    /// Resident set size in bytes.
    pub resident_bytes: u64,
}

impl ProcessEntry {
    /// Creates a new entry.
    #[must_use]
    pub fn new(pid: u32, name: impl Into<String>, resident_bytes: u64) -> Self {
        Self { pid, name: name.into(), resident_bytes }
    }

    /// Ranking order: larger resident size first, then lower pid.
    fn rank_cmp(&self, other: &Self) -> Ordering {
        other.resident_bytes.cmp(&self.resident_bytes).then(self.pid.cmp(&other.pid))
    }
}

/// Processes ordered by resident memory, largest first.
///
/// Ties on resident size break by ascending pid so rankings are
/// deterministic. The length never exceeds the `n` it was built with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessRanking {
    entries: Vec<ProcessEntry>,
}

impl ProcessRanking {
    /// Ranks `entries` and keeps the top `n`.
    #[must_use]
    pub fn from_entries(mut entries: Vec<ProcessEntry>, n: usize) -> Self {
        entries.sort_unstable_by(ProcessEntry::rank_cmp);
        entries.truncate(n);
        Self { entries }
    }

    /// Returns the ranked entries.
    #[must_use]
    pub fn entries(&self) -> &[ProcessEntry] {
        &self.entries
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over entries, largest first.
    pub fn iter(&self) -> impl Iterator<Item = &ProcessEntry> {
        self.entries.iter()
    }
}

/// Why a reclaim was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReclaimReason {
    /// The user asked for it.
    Manual,
    /// RAM usage crossed the configured threshold.
    Threshold,
    /// The configured period elapsed.
    Periodic,
}

impl ReclaimReason {
    /// Returns a stable lowercase name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Threshold => "threshold",
            Self::Periodic => "periodic",
        }
    }
}

impl fmt::Display for ReclaimReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request to run the reclaim action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReclaimRequest {
    /// Why the request was made.
    pub reason: ReclaimReason,
    /// When the request was made.
    pub issued_at: Instant,
}

impl ReclaimRequest {
    /// Creates a request stamped with `issued_at`.
    #[must_use]
    pub fn new(reason: ReclaimReason, issued_at: Instant) -> Self {
        Self { reason, issued_at }
    }
}

/// Outcome of one reclaim operation.
#[derive(Debug, Clone, PartialEq)]
pub struct ReclaimResult {
    /// The reason of the request that started the operation.
    pub reason: ReclaimReason,
    /// Whether the reclaim action reported success.
    pub success: bool,
    /// RAM usage percentage read after the operation finished.
    pub percent_after: f64,
    /// Failure description, `"timeout"` for a timed-out operation.
    pub error: Option<String>,
    /// Wall time the operation took (capped at the timeout).
    pub elapsed: Duration,
}

impl ReclaimResult {
    /// A successful result.
    #[must_use]
    pub fn succeeded(reason: ReclaimReason, percent_after: f64, elapsed: Duration) -> Self {
        Self { reason, success: true, percent_after, error: None, elapsed }
    }

    /// A failed result.
    #[must_use]
    pub fn failed(
        reason: ReclaimReason,
        percent_after: f64,
        error: impl Into<String>,
        elapsed: Duration,
    ) -> Self {
        Self { reason, success: false, percent_after, error: Some(error.into()), elapsed }
    }

    /// Returns true if the operation was abandoned on timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.error.as_deref() == Some("timeout")
    }
}
