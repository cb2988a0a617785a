//! Memory pressure probes for the memory-aware batch strategy.

use parking_lot::Mutex;
use sysinfo::System;

/// Source of current memory usage, injectable so tests can simulate
/// pressure without allocating.
pub trait MemoryMonitor: Send + Sync + std::fmt::Debug {
    /// Currently used system memory, in megabytes.
    fn used_memory_mb(&self) -> u64;
}

/// Real probe backed by `sysinfo`. Refreshes on every read; the memory-aware
/// strategy only polls once per chunk, so the refresh cost is negligible.
#[derive(Debug)]
pub struct SystemMemoryMonitor {
    system: Mutex<System>,
}

impl SystemMemoryMonitor {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SystemMemoryMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryMonitor for SystemMemoryMonitor {
    fn used_memory_mb(&self) -> u64 {
        let mut system = self.system.lock();
        system.refresh_memory();
        system.used_memory() / (1024 * 1024)
    }
}
