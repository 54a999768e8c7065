//! Error types for the fat32-nav library

use std::io;

use thiserror::Error;

/// Result type for fat32-nav operations
pub type Result<T> = std::result::Result<T, Fat32Error>;

/// Main error type for fat32-nav operations
#[derive(Debug, Error)]
pub enum Fat32Error {
    /// I/O error from the underlying image
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Boot sector fields are missing or inconsistent
    #[error("Corrupt volume: {message}")]
    CorruptVolume { message: String },

    /// Cluster number outside the data region
    #[error("Invalid cluster {cluster}")]
    InvalidCluster { cluster: u32 },

    /// Byte offset outside the data region
    #[error("Offset {offset:#x} is outside the data region")]
    InvalidOffset { offset: u64 },

    /// A cluster chain loops back onto itself
    #[error("Cluster chain starting at {start} revisits cluster {cluster}")]
    CyclicChain { start: u32, cluster: u32 },

    /// A chain runs into a cluster marked bad
    #[error("Cluster {cluster} is marked bad")]
    BadCluster { cluster: u32 },

    /// A chain runs into a cluster marked free
    #[error("Cluster {cluster} is part of a chain but marked free")]
    FreeClusterInChain { cluster: u32 },

    /// Directory not found
    #[error("Not found: {name}")]
    NotFound { name: String },

    /// Name cannot be expressed as an 8.3 short name
    #[error("Invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    /// An active entry with the same short name exists
    #[error("Already exists: {name}")]
    DuplicateName { name: String },

    /// No free clusters available
    #[error("No free clusters available")]
    VolumeFull,

    /// A FAT update reached some copies but not all of them
    #[error("FAT copy {copy} was not updated for cluster {cluster}: {source}")]
    InconsistentFat {
        cluster: u32,
        copy: u8,
        #[source]
        source: io::Error,
    },
}

// Convenience constructors
impl Fat32Error {
    pub fn corrupt_volume(message: impl Into<String>) -> Self {
        Self::CorruptVolume {
            message: message.into(),
        }
    }

    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    pub fn invalid_name(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidName {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn duplicate_name(name: impl Into<String>) -> Self {
        Self::DuplicateName { name: name.into() }
    }

    /// Whether the session can continue at its current position after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. }
                | Self::InvalidName { .. }
                | Self::DuplicateName { .. }
                | Self::VolumeFull
                | Self::InconsistentFat { .. }
        )
    }
}
