//! Error types for the synaptic core
//!
//! Only fatal conditions are errors. Queue overflow, ring-buffer saturation,
//! routing misses and rejected rows are counted in
//! [`Provenance`](crate::Provenance) instead.

use thiserror::Error;

/// Result type for runtime operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Fatal errors of the synaptic core
#[derive(Error, Debug)]
pub enum CoreError {
    /// Storage layer error
    #[error("Storage error: {source}")]
    Storage {
        #[from]
        /// Source storage error
        source: spyke_storage::StorageError,
    },

    /// Spike queue could not be built
    #[error("Spike queue error: {source}")]
    Queue {
        #[from]
        /// Source queue error
        source: spyke_lockfree::QueueError,
    },

    /// Invalid core configuration
    #[error("Invalid core configuration: {reason}")]
    InvalidConfiguration {
        /// Reason for invalid configuration
        reason: String,
    },

    /// Invalid parameter value
    #[error("Invalid parameter {parameter}: {value} (expected {constraint})")]
    InvalidParameter {
        /// Parameter name
        parameter: String,
        /// Invalid value
        value: String,
        /// Constraint description
        constraint: String,
    },

    /// A fixed-size structure could not be allocated at initialization
    #[error("Failed to allocate {resource} ({bytes} bytes)")]
    AllocationFailed {
        /// What was being allocated
        resource: &'static str,
        /// Requested size
        bytes: usize,
    },

    /// Spike processing did not finish before the timer tick
    #[error(
        "Timestep {time} overran its budget: {pending_spikes} spikes queued, \
         {transfers_in_flight} transfers in flight"
    )]
    TimestepOverrun {
        /// Timestep that failed to close
        time: u32,
        /// Spikes still in the ingestion queue
        pending_spikes: usize,
        /// Row transfers still outstanding
        transfers_in_flight: usize,
    },

    /// Row transfer engine failure
    #[error("Row transfer failed: {reason}")]
    Transfer {
        /// Reason for the failure
        reason: String,
    },
}

impl CoreError {
    /// Create an invalid configuration error
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            reason: reason.into(),
        }
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(
        parameter: impl Into<String>,
        value: impl Into<String>,
        constraint: impl Into<String>,
    ) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            value: value.into(),
            constraint: constraint.into(),
        }
    }

    /// Create a transfer error
    pub fn transfer(reason: impl Into<String>) -> Self {
        Self::Transfer {
            reason: reason.into(),
        }
    }

    /// True for errors that stop a running simulation (as opposed to init errors)
    pub fn is_runtime_fatal(&self) -> bool {
        matches!(self, Self::TimestepOverrun { .. } | Self::Transfer { .. })
    }
}

/// Reserve `len` elements or report the allocation failure
pub(crate) fn try_alloc<T: Clone>(resource: &'static str, len: usize, value: T) -> Result<Vec<T>> {
    let mut v = Vec::new();
    v.try_reserve_exact(len).map_err(|_| CoreError::AllocationFailed {
        resource,
        bytes: len.saturating_mul(core::mem::size_of::<T>()),
    })?;
    v.resize(len, value);
    Ok(v)
}
