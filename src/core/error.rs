use thiserror::Error;

#[derive(Error, Debug)]
pub enum BlockStoreError {
    #[error("Out of blocks: no unused blocks available")]
    OutOfBlocks,

    #[error("Block location not found: offset {offset_bytes}, size {size_bytes} is not an unused block")]
    LocationNotFound { offset_bytes: u64, size_bytes: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("Source exceeds declared size of {expected} bytes")]
    SourceTooLong { expected: u64 },

    #[error("Digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("Invalid digest: {0}")]
    InvalidDigest(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Encoding error: {0}")]
    Encoding(#[from] bincode::Error),
}

impl BlockStoreError {
    /// Whether the operation may succeed if retried later.
    ///
    /// Only exhaustion qualifies: blocks become available again once other
    /// holders release them.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BlockStoreError::OutOfBlocks)
    }
}

pub type Result<T> = std::result::Result<T, BlockStoreError>;
