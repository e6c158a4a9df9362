//! Binary layouts for the spyke synaptic processing core
//!
//! This crate owns every format that crosses the boundary between the
//! offline builder and a running core: the packed fixed-synapse word, the
//! synaptic row, the routing table and the core image file that bundles them.
//! Nothing here allocates or logs on a per-spike basis; the runtime decodes
//! rows in place through the zero-copy views in [`row`].

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod image;
pub mod le;
pub mod routing;
pub mod row;
pub mod synapse;

pub use error::{Result, StorageError};
pub use image::{CoreImage, ImageHeader, ImageMeta};
pub use routing::{RoutingEntry, RowDescriptor};
pub use row::{split_row_mut, FixedRegion, RowBuilder, SynapticRow, ROW_HEADER_WORDS};
pub use synapse::{
    decode_fixed_synapse, encode_fixed_synapse, encode_plastic_control, FixedSynapse,
    SynapseFormat,
};

/// Core image format version
pub const IMAGE_VERSION: u32 = 1;

/// Magic numbers for binary formats
pub mod magic {
    /// Core image magic number: "SPKC"
    pub const SPKC: [u8; 4] = [0x53, 0x50, 0x4B, 0x43];
}
