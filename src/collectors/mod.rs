//! Host readers: memory counters and the process table.

pub mod memory;
pub mod process;
pub mod system;

pub use memory::{MemoryCounters, MemorySource, ProcMeminfo, Sampler};
pub use process::{ProcFs, ProcessSource, TopConsumers};
pub use system::{SysinfoMemory, SysinfoProcesses};
