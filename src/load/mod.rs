/// Asynchronous loading module
///
/// This module handles:
/// - The pausable worker pool all decode and network work routes through
///   (pool.rs)
/// - The load coordinator with per-key dedup and staleness checks
///   (coordinator.rs)

pub mod coordinator;
pub mod pool;

pub use coordinator::{DisplaySlot, ImageLoader, LoaderConfig};
pub use pool::WorkerPool;
