use thiserror::Error;

#[derive(Error, Debug)]
pub enum VirtMemError {
    #[error("Memory is not started, call startup() first")]
    NotStarted,

    #[error("Memory is already started")]
    AlreadyStarted,

    #[error("Block {block} offset {offset} is outside the configured address space")]
    AddressOutOfRange { block: u64, offset: usize },

    #[error("Invalid block length: expected {expected} bytes, got {actual}")]
    InvalidBlockLength { expected: usize, actual: usize },

    #[error("Storage error on block {block}: {source}")]
    Storage {
        block: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, VirtMemError>;

impl VirtMemError {
    pub(crate) fn storage(block: u64, source: std::io::Error) -> Self {
        VirtMemError::Storage { block, source }
    }
}
