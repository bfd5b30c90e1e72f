/// Configuration for the memory subsystem and its logging.
///
/// Every field has a default, so an empty JSON object is a valid config.
/// The defaults describe a 64 KiB address space of 32-byte blocks served
/// through 16 KiB of physical memory (512 cache slots).

use crate::error::{Result, VirtMemError};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const ADDRESS_SPACE: u64 = 64 * 1024;
pub const BLOCK_SIZE: usize = 32;
pub const PHYSICAL_MEMORY: usize = 16 * 1024;
pub const CACHE_CAPACITY: usize = PHYSICAL_MEMORY / BLOCK_SIZE;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub memory: MemoryConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load and validate a config from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(raw)?;
        config.memory.validate()?;
        Ok(config)
    }
}

/// What to do with a byte address outside `[0, address_space)`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AddressPolicy {
    /// Writes are dropped, reads return 0.
    #[default]
    Ignore,
    /// The address is reduced modulo the address space.
    Wrap,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MemoryConfig {
    /// Size of the byte-addressable space.
    pub address_space: u64,
    /// Unit of caching and disk transfer.
    pub block_size: usize,
    /// Bytes of cache; capacity in slots is `physical_memory / block_size`.
    pub physical_memory: usize,
    pub out_of_range: AddressPolicy,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            address_space: ADDRESS_SPACE,
            block_size: BLOCK_SIZE,
            physical_memory: PHYSICAL_MEMORY,
            out_of_range: AddressPolicy::Ignore,
        }
    }
}

impl MemoryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 || !self.block_size.is_power_of_two() {
            return Err(VirtMemError::ConfigError(format!(
                "block_size must be a power of two, got {}",
                self.block_size
            )));
        }
        if self.address_space == 0 || self.address_space > u64::from(u32::MAX) + 1 {
            return Err(VirtMemError::ConfigError(format!(
                "address_space must be in 1..=4GiB, got {}",
                self.address_space
            )));
        }
        if self.address_space % self.block_size as u64 != 0 {
            return Err(VirtMemError::ConfigError(format!(
                "address_space {} is not a multiple of block_size {}",
                self.address_space, self.block_size
            )));
        }
        if self.physical_memory % self.block_size != 0 {
            return Err(VirtMemError::ConfigError(format!(
                "physical_memory {} is not a multiple of block_size {}",
                self.physical_memory, self.block_size
            )));
        }
        if self.capacity() == 0 {
            return Err(VirtMemError::ConfigError(
                "physical_memory must hold at least one block".to_string(),
            ));
        }
        Ok(())
    }

    /// Number of cache slots.
    pub fn capacity(&self) -> usize {
        self.physical_memory / self.block_size
    }

    /// Number of addressable blocks.
    pub fn block_count(&self) -> u64 {
        self.address_space / self.block_size as u64
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when RUST_LOG is unset.
    pub level: String,
    pub format: LogFormat,
    pub target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            target: false,
        }
    }
}
