//! Core image file: everything one core loads before simulation starts
//!
//! ```text
//! offset  field
//! 0       magic "SPKC"
//! 4       version
//! 8       n_neurons
//! 12      n_synapse_types
//! 16      delay_bits
//! 20      routing table bytes (R)
//! 24      direct-row word count (D)
//! 28      row storage word count (W)
//! 32      CRC32 of payload
//! 36      CRC32 of bytes 0..36
//! 40      payload: routing table (R bytes), direct words (4D), row words (4W)
//! ```

use std::fs::File;
use std::io::Write;
use std::path::Path;

use memmap2::Mmap;

use crate::error::{Result, StorageError};
use crate::magic;
use crate::routing::{decode_table, encode_table, validate_entries, RoutingEntry};
use crate::le::{extend_le_words, read_u32_le, words_from_le_bytes};
use crate::synapse::SynapseFormat;
use crate::IMAGE_VERSION;

/// Size of the fixed image header in bytes
pub const HEADER_BYTES: usize = 40;

fn check_magic(bytes: &[u8]) -> Result<()> {
    match bytes.get(..4) {
        Some(found) if found == magic::SPKC => Ok(()),
        Some(found) => Err(StorageError::InvalidMagic {
            expected: magic::SPKC,
            found: [found[0], found[1], found[2], found[3]],
        }),
        None => Err(StorageError::invalid_format(format!(
            "{} bytes is too short for an image",
            bytes.len()
        ))),
    }
}

/// Compare the CRC32 of an image section with the one stored for it
fn check_crc(section: &[u8], stored: u32) -> Result<()> {
    let computed = crc32fast::hash(section);
    if computed != stored {
        return Err(StorageError::ChecksumMismatch {
            expected: stored,
            computed,
        });
    }
    Ok(())
}

/// Per-core dimensions recorded in the image header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ImageMeta {
    /// Neurons simulated by the core
    pub n_neurons: u32,
    /// Synapse types (receptor channels) per neuron
    pub n_synapse_types: u32,
    /// Width of the synapse delay field
    pub delay_bits: u32,
}

impl ImageMeta {
    /// Synapse word layout implied by these dimensions
    pub fn format(&self) -> Result<SynapseFormat> {
        SynapseFormat::for_core(self.n_neurons, self.n_synapse_types, self.delay_bits)
    }
}

/// Parsed header of an image file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageHeader {
    /// Schema version
    pub version: u32,
    /// Core dimensions
    pub meta: ImageMeta,
    /// Routing table section length in bytes
    pub routing_bytes: u32,
    /// Direct-row section length in words
    pub direct_words: u32,
    /// Row storage section length in words
    pub row_words: u32,
    /// CRC32 of the payload
    pub payload_checksum: u32,
}

impl ImageHeader {
    /// Parse and check a header from the front of `bytes`
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        check_magic(bytes)?;
        if bytes.len() < HEADER_BYTES {
            return Err(StorageError::invalid_format(format!(
                "image header truncated: {} of {} bytes",
                bytes.len(),
                HEADER_BYTES
            )));
        }
        check_crc(&bytes[..36], read_u32_le(bytes, 36)?)?;

        let version = read_u32_le(bytes, 4)?;
        if version != IMAGE_VERSION {
            return Err(StorageError::UnsupportedVersion {
                version,
                supported: IMAGE_VERSION,
            });
        }

        Ok(Self {
            version,
            meta: ImageMeta {
                n_neurons: read_u32_le(bytes, 8)?,
                n_synapse_types: read_u32_le(bytes, 12)?,
                delay_bits: read_u32_le(bytes, 16)?,
            },
            routing_bytes: read_u32_le(bytes, 20)?,
            direct_words: read_u32_le(bytes, 24)?,
            row_words: read_u32_le(bytes, 28)?,
            payload_checksum: read_u32_le(bytes, 32)?,
        })
    }

    /// Total payload length in bytes
    pub fn payload_len(&self) -> usize {
        self.routing_bytes as usize + 4 * (self.direct_words as usize + self.row_words as usize)
    }
}

/// All data loaded onto one core: routing table, direct rows and row storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreImage {
    /// Core dimensions
    pub meta: ImageMeta,
    /// Sorted, non-overlapping routing entries
    pub routing: Vec<RoutingEntry>,
    /// Single-synapse words addressed by direct routes
    pub direct_words: Vec<u32>,
    /// Bulk synaptic row storage
    pub row_words: Vec<u32>,
}

impl CoreImage {
    /// Assemble an image, checking the routing invariants and the dimensions
    pub fn new(
        meta: ImageMeta,
        routing: Vec<RoutingEntry>,
        direct_words: Vec<u32>,
        row_words: Vec<u32>,
    ) -> Result<Self> {
        meta.format()?;
        validate_entries(&routing)?;
        Ok(Self {
            meta,
            routing,
            direct_words,
            row_words,
        })
    }

    /// Serialize to the image file layout
    pub fn to_bytes(&self) -> Vec<u8> {
        let table = encode_table(&self.routing);
        let mut payload = Vec::with_capacity(
            table.len() + 4 * (self.direct_words.len() + self.row_words.len()),
        );
        payload.extend_from_slice(&table);
        extend_le_words(&mut payload, &self.direct_words);
        extend_le_words(&mut payload, &self.row_words);

        let mut out = Vec::with_capacity(HEADER_BYTES + payload.len());
        out.extend_from_slice(&magic::SPKC);
        for field in [
            IMAGE_VERSION,
            self.meta.n_neurons,
            self.meta.n_synapse_types,
            self.meta.delay_bits,
            table.len() as u32,
            self.direct_words.len() as u32,
            self.row_words.len() as u32,
            crc32fast::hash(&payload),
        ] {
            out.extend_from_slice(&field.to_le_bytes());
        }
        let header_crc = crc32fast::hash(&out);
        out.extend_from_slice(&header_crc.to_le_bytes());
        out.extend_from_slice(&payload);
        out
    }

    /// Parse an image from bytes, verifying both checksums and the routing invariants
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let header = ImageHeader::parse(bytes)?;
        let payload = bytes
            .get(HEADER_BYTES..HEADER_BYTES + header.payload_len())
            .ok_or_else(|| {
                StorageError::invalid_format(format!(
                    "image payload truncated: need {} bytes, have {}",
                    header.payload_len(),
                    bytes.len().saturating_sub(HEADER_BYTES)
                ))
            })?;
        check_crc(payload, header.payload_checksum)?;

        let routing_end = header.routing_bytes as usize;
        let direct_end = routing_end + 4 * header.direct_words as usize;
        let routing = decode_table(&payload[..routing_end])?;
        let direct_words = words_from_le_bytes(&payload[routing_end..direct_end])?;
        let row_words = words_from_le_bytes(&payload[direct_end..])?;

        log::debug!(
            "core image: {} neurons, {} types, {} routes, {} direct words, {} row words",
            header.meta.n_neurons,
            header.meta.n_synapse_types,
            routing.len(),
            direct_words.len(),
            row_words.len()
        );

        Self::new(header.meta, routing, direct_words, row_words)
    }

    /// Memory-map and parse an image file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        // SAFETY: the map is read-only and dropped before this function returns;
        // every byte is copied out by `from_bytes`.
        let map = unsafe { Mmap::map(&file) }
            .map_err(|e| StorageError::memory_map(format!("{}: {}", path.display(), e)))?;
        log::info!("loading core image {} ({} bytes)", path.display(), map.len());
        Self::from_bytes(&map)
    }

    /// Write the image to `path`
    pub fn write_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut file = File::create(path.as_ref())?;
        file.write_all(&self.to_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    /// Synapse word layout of this core
    pub fn format(&self) -> Result<SynapseFormat> {
        self.meta.format()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::RowDescriptor;

    fn sample() -> CoreImage {
        CoreImage::new(
            ImageMeta {
                n_neurons: 64,
                n_synapse_types: 2,
                delay_bits: 4,
            },
            vec![
                RoutingEntry::new(0x000, 0xFFFF_FF00, RowDescriptor::row(0, 8).unwrap()),
                RoutingEntry::new(0x100, 0xFFFF_FF00, RowDescriptor::direct(0).unwrap()),
            ],
            vec![0x0001_0203, 0x0004_0506],
            vec![7; 32],
        )
        .unwrap()
    }

    #[test]
    fn test_image_bytes() {
        let image = sample();
        let bytes = image.to_bytes();
        assert_eq!(&bytes[..4], b"SPKC");
        let header = ImageHeader::parse(&bytes).unwrap();
        assert_eq!(header.meta, image.meta);
        assert_eq!(header.direct_words, 2);
        assert_eq!(bytes.len(), HEADER_BYTES + header.payload_len());
        assert_eq!(CoreImage::from_bytes(&bytes).unwrap(), image);
    }

    #[test]
    fn test_corruption_detected() {
        let mut bytes = sample().to_bytes();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(matches!(
            CoreImage::from_bytes(&bytes),
            Err(StorageError::ChecksumMismatch { .. })
        ));

        let mut bytes = sample().to_bytes();
        bytes[8] ^= 0x01;
        assert!(matches!(
            ImageHeader::parse(&bytes),
            Err(StorageError::ChecksumMismatch { .. })
        ));

        let bytes = sample().to_bytes();
        assert!(CoreImage::from_bytes(&bytes[..bytes.len() - 4]).is_err());
    }

    #[test]
    fn test_magic_checked_first() {
        let mut bytes = sample().to_bytes();
        bytes[..4].copy_from_slice(b"SPKX");
        assert!(matches!(
            ImageHeader::parse(&bytes),
            Err(StorageError::InvalidMagic { found, .. }) if &found == b"SPKX"
        ));
        assert!(matches!(
            ImageHeader::parse(b"SP"),
            Err(StorageError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn test_invalid_image_rejected() {
        let meta = ImageMeta {
            n_neurons: 0,
            n_synapse_types: 1,
            delay_bits: 4,
        };
        assert!(CoreImage::new(meta, vec![], vec![], vec![]).is_err());
    }
}
