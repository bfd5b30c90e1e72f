/// Memory: byte-addressable virtual memory over a block cache
///
/// Translates byte addresses into (block, offset) pairs, applies the
/// out-of-range policy and owns the session lifecycle. A session starts with
/// `startup()`, which attaches an empty cache, and ends with `shutdown()`,
/// which flushes every dirty block to disk.

use crate::block_cache::{BlockCache, CacheStats};
use crate::config::{AddressPolicy, MemoryConfig};
use crate::disk::Disk;
use crate::error::{Result, VirtMemError};
use std::sync::Arc;
use tracing::{info, trace, warn};

pub struct Memory {
    config: MemoryConfig,
    disk: Arc<Disk>,
    /// Present only between startup() and shutdown()
    cache: Option<BlockCache>,
}

impl Memory {
    /// Memory with the default geometry over a fresh in-memory disk.
    pub fn new() -> Self {
        let config = MemoryConfig::default();
        let disk = Arc::new(Disk::in_memory(config.block_size));
        Self {
            config,
            disk,
            cache: None,
        }
    }

    /// Memory with a custom geometry over a fresh in-memory disk.
    pub fn with_config(config: MemoryConfig) -> Result<Self> {
        config.validate()?;
        let disk = Arc::new(Disk::in_memory(config.block_size));
        Self::with_disk(config, disk)
    }

    /// Memory over an existing disk, e.g. one left behind by an earlier
    /// session.
    pub fn with_disk(config: MemoryConfig, disk: Arc<Disk>) -> Result<Self> {
        config.validate()?;
        if disk.block_size() != config.block_size {
            return Err(VirtMemError::ConfigError(format!(
                "disk block size {} does not match configured block size {}",
                disk.block_size(),
                config.block_size
            )));
        }
        Ok(Self {
            config,
            disk,
            cache: None,
        })
    }

    pub fn startup(&mut self) -> Result<()> {
        if self.cache.is_some() {
            return Err(VirtMemError::AlreadyStarted);
        }
        info!(
            "Starting memory: {} bytes addressable, {} cache slots, {} disk",
            self.config.address_space,
            self.config.capacity(),
            self.disk.backend()
        );
        self.cache = Some(BlockCache::new(
            Arc::clone(&self.disk),
            self.config.capacity(),
            self.config.block_count(),
        ));
        Ok(())
    }

    /// Flush all dirty blocks and detach the cache.
    ///
    /// If the flush fails the session stays active and nothing is lost.
    pub fn shutdown(&mut self) -> Result<()> {
        let cache = self.cache.as_mut().ok_or(VirtMemError::NotStarted)?;
        cache.flush_all()?;
        self.disk.sync()?;
        self.cache = None;
        info!(
            "Memory shut down: {} disk reads, {} disk writes",
            self.disk.read_count(),
            self.disk.write_count()
        );
        Ok(())
    }

    pub fn read(&mut self, address: u64) -> Result<u8> {
        let cache = self.cache.as_mut().ok_or(VirtMemError::NotStarted)?;
        match translate(&self.config, address) {
            Some((block, offset)) => cache.read_byte(block, offset),
            None => Ok(0),
        }
    }

    pub fn write(&mut self, address: u64, value: u8) -> Result<()> {
        let cache = self.cache.as_mut().ok_or(VirtMemError::NotStarted)?;
        match translate(&self.config, address) {
            Some((block, offset)) => cache.write_byte(block, offset, value),
            None => Ok(()),
        }
    }

    /// Write back dirty blocks while keeping the session and cache contents.
    pub fn sync(&mut self) -> Result<usize> {
        let cache = self.cache.as_mut().ok_or(VirtMemError::NotStarted)?;
        let written = cache.sync()?;
        self.disk.sync()?;
        Ok(written)
    }

    pub fn is_started(&self) -> bool {
        self.cache.is_some()
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// The backing disk. Hand it to a new `Memory` to reboot over the
    /// same storage.
    pub fn disk(&self) -> &Arc<Disk> {
        &self.disk
    }

    pub fn read_count_disk(&self) -> u64 {
        self.disk.read_count()
    }

    pub fn write_count_disk(&self) -> u64 {
        self.disk.write_count()
    }

    /// Cache statistics for the active session.
    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(BlockCache::stats)
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Memory {
    fn drop(&mut self) {
        if let Some(stats) = self.cache.as_ref().map(BlockCache::stats) {
            if stats.dirty > 0 {
                warn!(
                    "Memory dropped without shutdown, {} dirty blocks not persisted",
                    stats.dirty
                );
            }
        }
    }
}

/// Map a byte address to (block, offset), or `None` when the address is
/// dropped by the out-of-range policy.
fn translate(config: &MemoryConfig, address: u64) -> Option<(u64, usize)> {
    let address = if address < config.address_space {
        address
    } else {
        match config.out_of_range {
            AddressPolicy::Ignore => {
                trace!("Ignoring out-of-range address {:#x}", address);
                return None;
            }
            AddressPolicy::Wrap => {
                trace!("Wrapping out-of-range address {:#x}", address);
                address % config.address_space
            }
        }
    };

    let block_size = config.block_size as u64;
    Some((address / block_size, (address % block_size) as usize))
}
