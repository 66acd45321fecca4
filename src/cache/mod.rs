/// Cache tiers module
///
/// This module holds the two local tiers consulted before the network:
/// - In-memory byte-bounded LRU with buffer reuse (memory.rs)
/// - Disk cache keyed by derived file paths (disk.rs)

pub mod disk;
pub mod memory;

pub use disk::FileCache;
pub use memory::MemoryCache;
