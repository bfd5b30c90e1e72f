/// virtmem - byte-addressable virtual memory over a block disk
///
/// A bounded write-back block cache sits between byte-level reads and writes
/// and a slower, block-structured disk that counts its transfers.
///
/// Architecture:
/// 1. Disk: instrumented block store with pluggable backends (memory, file)
/// 2. BlockCache: fixed arena of slots with LRU eviction and dirty tracking
/// 3. Memory: address translation and startup/shutdown lifecycle

pub mod error;
pub mod config;
pub mod logging;
pub mod disk;
pub mod block_cache;
pub mod memory;

pub use block_cache::{BlockCache, CacheStats};
pub use config::{AddressPolicy, Config, MemoryConfig};
pub use disk::{BlockStore, Disk, DiskStats, FileStore, MemStore};
pub use error::{Result, VirtMemError};
pub use memory::Memory;
