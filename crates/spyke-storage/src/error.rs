//! Error types for the storage layer

use thiserror::Error;

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur while reading or writing persisted layouts
#[derive(Error, Debug)]
pub enum StorageError {
    /// Invalid magic number in binary format
    #[error("Invalid magic number: expected {expected:?}, found {found:?}")]
    InvalidMagic {
        /// Expected magic number
        expected: [u8; 4],
        /// Found magic number
        found: [u8; 4],
    },

    /// Unsupported version
    #[error("Unsupported version: {version}, supported: {supported}")]
    UnsupportedVersion {
        /// Version found
        version: u32,
        /// Supported version
        supported: u32,
    },

    /// Checksum verification failed
    #[error("Checksum verification failed: expected {expected:08x}, computed {computed:08x}")]
    ChecksumMismatch {
        /// Expected checksum
        expected: u32,
        /// Computed checksum
        computed: u32,
    },

    /// Invalid file format or corrupted data
    #[error("Invalid format: {reason}")]
    InvalidFormat {
        /// Reason for invalid format
        reason: String,
    },

    /// A synapse word layout that does not fit in 32 bits
    #[error("Invalid synapse format: {reason}")]
    InvalidSynapseFormat {
        /// Reason the layout was rejected
        reason: String,
    },

    /// Routing entries break the sorted, non-overlapping invariant
    #[error("Invalid routing table at entry {index}: {reason}")]
    InvalidRoutingTable {
        /// Offending entry index
        index: usize,
        /// What is wrong with it
        reason: String,
    },

    /// A row's counts run past the words that hold it
    #[error("Malformed synaptic row: need {needed} words, have {available}")]
    MalformedRow {
        /// Words implied by the row header
        needed: usize,
        /// Words actually present
        available: usize,
    },

    /// Field value does not fit its packed bit width
    #[error("Value {value} for {field} exceeds maximum {max}")]
    FieldOverflow {
        /// Field name
        field: &'static str,
        /// Offending value
        value: u64,
        /// Maximum allowed value
        max: u64,
    },

    /// I/O error
    #[error("I/O error: {source}")]
    Io {
        #[from]
        /// Source I/O error
        source: std::io::Error,
    },

    /// Memory mapping error
    #[error("Memory mapping error: {reason}")]
    MemoryMap {
        /// Reason for memory mapping failure
        reason: String,
    },

    /// Out of bounds access
    #[error("Index {index} out of bounds (max: {max})")]
    OutOfBounds {
        /// Index that was out of bounds
        index: usize,
        /// Maximum allowed index
        max: usize,
    },
}

impl StorageError {
    /// Create an invalid format error
    pub fn invalid_format(reason: impl Into<String>) -> Self {
        Self::InvalidFormat {
            reason: reason.into(),
        }
    }

    /// Create an invalid synapse format error
    pub fn invalid_synapse_format(reason: impl Into<String>) -> Self {
        Self::InvalidSynapseFormat {
            reason: reason.into(),
        }
    }

    /// Create an invalid routing table error
    pub fn invalid_routing(index: usize, reason: impl Into<String>) -> Self {
        Self::InvalidRoutingTable {
            index,
            reason: reason.into(),
        }
    }

    /// Create a memory mapping error
    pub fn memory_map(reason: impl Into<String>) -> Self {
        Self::MemoryMap {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = StorageError::invalid_format("test reason");
        assert!(matches!(err, StorageError::InvalidFormat { .. }));

        let err = StorageError::invalid_routing(3, "overlap");
        assert!(matches!(err, StorageError::InvalidRoutingTable { index: 3, .. }));
    }

    #[test]
    fn test_error_display() {
        let err = StorageError::InvalidMagic {
            expected: *b"SPKC",
            found: [0x00, 0x00, 0x00, 0x00],
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Invalid magic number"));

        let err = StorageError::MalformedRow { needed: 9, available: 4 };
        assert_eq!(err.to_string(), "Malformed synaptic row: need 9 words, have 4");
    }
}
