//! # memsweep
//!
//! Background memory monitor with automatic reclaim.
//!
//! A sampler thread reads host memory counters once per tick, keeps a short
//! usage history, ranks the largest processes, and publishes one immutable
//! view per tick to whoever subscribed. A reclaim action (an external
//! command by default) runs on demand, when RAM usage crosses a threshold,
//! or on a fixed period, with at most one reclaim in flight at any time.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use memsweep::prelude::*;
//! use std::sync::Arc;
//!
//! # fn main() -> memsweep::Result<()> {
//! let store = Arc::new(ConfigStore::open("/tmp/memsweep.yaml"));
//! let monitor = Monitor::for_host(store)?;
//! monitor.observers().subscribe_view(Arc::new(|view: &TickView| {
//!     println!("{} {}", view.ram_text, view.history_render);
//! }));
//!
//! let handle = monitor.start()?;
//! handle.controls().set_auto_clean(true, 85);
//! handle.shutdown()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
// Allow unwrap() in tests only
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]

// ============================================================================
// Core
// ============================================================================

pub mod error;
pub mod types;
pub mod ring_buffer;
pub mod history;
pub mod theme;
pub mod config;

// ============================================================================
// Host access
// ============================================================================

pub mod collectors;
pub mod subprocess;

// ============================================================================
// Policy and coordination
// ============================================================================

pub mod trigger;
pub mod reclaim;
pub mod observer;
pub mod stop;
pub mod runtime;

/// Tracing subscriber initialisation.
pub mod logging;

pub use error::{MonitorError, Result};

/// Commonly used types.
///
/// ```rust
/// use memsweep::prelude::*;
/// ```
pub mod prelude {
    pub use crate::collectors::{MemorySource, ProcessSource};
    pub use crate::config::{Config, ConfigStore};
    pub use crate::error::{MonitorError, Result};
    pub use crate::observer::{ObserverSync, TickView, TrayView};
    pub use crate::reclaim::{Admission, CommandReclaimer, ReclaimCoordinator, Reclaimer};
    pub use crate::runtime::{Controls, Monitor, MonitorHandle, Status};
    pub use crate::theme::{ColorBand, Theme};
    pub use crate::types::{ProcessEntry, ProcessRanking, ReclaimReason, ReclaimResult, Sample};
}
