//! Error types for queue construction

use thiserror::Error;

/// Result type for queue operations
pub type Result<T> = std::result::Result<T, QueueError>;

/// Errors raised while building a queue
///
/// Runtime conditions (full, empty) are never errors; they are counted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// Capacity is zero, one, or not a power of two
    #[error("Invalid queue capacity {capacity}: must be a power of two >= 2")]
    InvalidCapacity {
        /// Requested capacity
        capacity: usize,
    },

    /// Backing storage could not be allocated
    #[error("Failed to allocate {capacity} spike slots")]
    AllocationFailed {
        /// Requested capacity
        capacity: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = QueueError::InvalidCapacity { capacity: 3 };
        assert!(err.to_string().contains("power of two"));
    }
}
