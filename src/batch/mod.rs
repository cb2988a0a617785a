//! # Adaptive Batch Processing
//!
//! Chunked execution of large item sets against a remote service, with
//! ordered results, per-chunk retries, and chunk sizing that reacts to
//! memory pressure and observed throughput.
//!
//! ## Architecture
//!
//! - [`BatchConfig`] / [`BatchStrategy`]: validated sizing, concurrency,
//!   and strategy selection
//! - [`BatchProcessor`]: the chunking engine; callers supply a
//!   [`ChunkHandler`] owning all domain knowledge
//! - [`BatchMetrics`]: run-scoped counters shared across workers
//! - [`MemoryMonitor`]: injectable memory probe for the memory-aware
//!   strategy, backed by `sysinfo` in production

pub mod config;
pub mod memory;
pub mod metrics;
pub mod processor;

pub use config::{BatchConfig, BatchStrategy};
pub use memory::{MemoryMonitor, SystemMemoryMonitor};
pub use metrics::{BatchMetrics, BatchMetricsSnapshot};
pub use processor::{
    BatchProcessor, CancellationFlag, ChunkHandler, ItemOutcome, ProgressCallback, ProgressUpdate,
};
