//! Synaptic row layout
//!
//! ```text
//! word 0            plastic_word_count (P)
//! words 1..=P       plastic region (opaque, owned by the plasticity rule)
//! word P+1          fixed_synapse_count (F)
//! word P+2          plastic_control_count (C)
//! next F words      fixed synapse words
//! next ceil(C/2)    plastic control halfwords, two per word, low half first
//! ```
//!
//! A row may sit in a slot wider than itself (the routing stride); trailing
//! words are ignored.

use crate::error::{Result, StorageError};
use crate::synapse::{encode_fixed_synapse, encode_plastic_control, FixedSynapse, SynapseFormat};

/// Header words in every generic row (plastic count, fixed count, control count)
pub const ROW_HEADER_WORDS: usize = 3;

#[inline]
fn control_words(n_controls: usize) -> usize {
    (n_controls + 1) / 2
}

/// Read-only view of the fixed half of a row
#[derive(Debug, Clone, Copy)]
pub struct FixedRegion<'a> {
    fixed: &'a [u32],
    controls: &'a [u32],
    n_controls: usize,
}

impl<'a> FixedRegion<'a> {
    /// Parse a fixed region starting at its count word
    pub fn parse(words: &'a [u32]) -> Result<Self> {
        if words.len() < 2 {
            return Err(StorageError::MalformedRow {
                needed: 2,
                available: words.len(),
            });
        }
        let n_fixed = words[0] as usize;
        let n_controls = words[1] as usize;
        let needed = 2usize
            .checked_add(n_fixed)
            .and_then(|n| n.checked_add(control_words(n_controls)))
            .ok_or(StorageError::MalformedRow {
                needed: usize::MAX,
                available: words.len(),
            })?;
        if needed > words.len() {
            return Err(StorageError::MalformedRow {
                needed,
                available: words.len(),
            });
        }
        let body = &words[2..needed];
        let (fixed, controls) = body.split_at(n_fixed);
        Ok(Self {
            fixed,
            controls,
            n_controls,
        })
    }

    /// Number of fixed synapse words
    pub fn fixed_synapse_count(&self) -> usize {
        self.fixed.len()
    }

    /// Fixed synapse words
    pub fn fixed_words(&self) -> &'a [u32] {
        self.fixed
    }

    /// Number of plastic control halfwords
    pub fn plastic_control_count(&self) -> usize {
        self.n_controls
    }

    /// Plastic control halfword `i`
    pub fn plastic_control(&self, i: usize) -> Option<u16> {
        if i >= self.n_controls {
            return None;
        }
        let word = self.controls[i / 2];
        Some(if i % 2 == 0 { word as u16 } else { (word >> 16) as u16 })
    }

    /// Iterate plastic control halfwords in order
    pub fn plastic_controls(&self) -> impl Iterator<Item = u16> + 'a {
        let controls = self.controls;
        (0..self.n_controls).map(move |i| {
            let word = controls[i / 2];
            if i % 2 == 0 {
                word as u16
            } else {
                (word >> 16) as u16
            }
        })
    }

    /// Words occupied by the region including its two count words
    pub fn word_len(&self) -> usize {
        2 + self.fixed.len() + self.controls.len()
    }
}

/// Zero-copy view of one synaptic row
#[derive(Debug, Clone, Copy)]
pub struct SynapticRow<'a> {
    plastic: &'a [u32],
    fixed: FixedRegion<'a>,
}

impl<'a> SynapticRow<'a> {
    /// Parse a row, checking every count against the available words
    pub fn parse(words: &'a [u32]) -> Result<Self> {
        let n_plastic = *words.first().ok_or(StorageError::MalformedRow {
            needed: ROW_HEADER_WORDS,
            available: 0,
        })? as usize;
        let fixed_start = n_plastic.checked_add(1).filter(|&s| s <= words.len()).ok_or(
            StorageError::MalformedRow {
                needed: n_plastic.saturating_add(ROW_HEADER_WORDS),
                available: words.len(),
            },
        )?;
        let fixed = FixedRegion::parse(&words[fixed_start..]).map_err(|err| match err {
            StorageError::MalformedRow { needed, .. } => StorageError::MalformedRow {
                needed: needed.saturating_add(fixed_start),
                available: words.len(),
            },
            other => other,
        })?;
        Ok(Self {
            plastic: &words[1..fixed_start],
            fixed,
        })
    }

    /// Number of words in the plastic region
    pub fn plastic_word_count(&self) -> usize {
        self.plastic.len()
    }

    /// Plastic region words
    pub fn plastic_region(&self) -> &'a [u32] {
        self.plastic
    }

    /// Number of fixed synapses
    pub fn fixed_synapse_count(&self) -> usize {
        self.fixed.fixed_synapse_count()
    }

    /// Number of plastic control halfwords
    pub fn plastic_control_count(&self) -> usize {
        self.fixed.plastic_control_count()
    }

    /// Fixed synapse words
    pub fn fixed_words(&self) -> &'a [u32] {
        self.fixed.fixed_words()
    }

    /// The fixed half of the row
    pub fn fixed_region(&self) -> FixedRegion<'a> {
        self.fixed
    }

    /// Words actually used by the row
    pub fn word_len(&self) -> usize {
        1 + self.plastic.len() + self.fixed.word_len()
    }
}

/// Split a row into its mutable plastic region and read-only fixed region
///
/// The two borrows never overlap, so a plasticity rule can rewrite weights
/// while reading the control words.
pub fn split_row_mut(words: &mut [u32]) -> Result<(&mut [u32], FixedRegion<'_>)> {
    let used = SynapticRow::parse(words)?.word_len();
    let n_plastic = words[0] as usize;
    let (head, tail) = words[..used].split_at_mut(1 + n_plastic);
    let tail: &[u32] = tail;
    let fixed = FixedRegion::parse(tail)?;
    Ok((&mut head[1..], fixed))
}

/// Writes rows in the persisted layout
#[derive(Debug, Clone, Default)]
pub struct RowBuilder {
    plastic: Vec<u32>,
    fixed: Vec<u32>,
    controls: Vec<u16>,
}

impl RowBuilder {
    /// Create an empty row
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the opaque plastic region
    pub fn plastic_words(mut self, words: &[u32]) -> Self {
        self.plastic = words.to_vec();
        self
    }

    /// Append a fixed synapse
    pub fn fixed_synapse(mut self, synapse: FixedSynapse, format: &SynapseFormat) -> Self {
        self.fixed.push(encode_fixed_synapse(&synapse, format));
        self
    }

    /// Append an already-encoded fixed synapse word
    pub fn fixed_word(mut self, word: u32) -> Self {
        self.fixed.push(word);
        self
    }

    /// Append a plastic control halfword for `synapse` (its weight is ignored)
    pub fn plastic_control(mut self, synapse: FixedSynapse, format: &SynapseFormat) -> Self {
        self.controls.push(encode_plastic_control(&synapse, format));
        self
    }

    /// Words the finished row will occupy
    pub fn word_len(&self) -> usize {
        ROW_HEADER_WORDS
            + self.plastic.len()
            + self.fixed.len()
            + control_words(self.controls.len())
    }

    /// Emit the row
    pub fn build(&self) -> Vec<u32> {
        let mut out = Vec::with_capacity(self.word_len());
        out.push(self.plastic.len() as u32);
        out.extend_from_slice(&self.plastic);
        out.push(self.fixed.len() as u32);
        out.push(self.controls.len() as u32);
        out.extend_from_slice(&self.fixed);
        for pair in self.controls.chunks(2) {
            let lo = u32::from(pair[0]);
            let hi = pair.get(1).map_or(0, |&h| u32::from(h));
            out.push(lo | (hi << 16));
        }
        out
    }

    /// Emit the row zero-padded to exactly `stride` words
    pub fn build_padded(&self, stride: usize) -> Result<Vec<u32>> {
        let len = self.word_len();
        if len > stride {
            return Err(StorageError::FieldOverflow {
                field: "row length",
                value: len as u64,
                max: stride as u64,
            });
        }
        let mut out = self.build();
        out.resize(stride, 0);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synapse::decode_fixed_synapse;

    fn format() -> SynapseFormat {
        SynapseFormat::new(8, 1, 4).unwrap()
    }

    #[test]
    fn test_empty_row() {
        let words = RowBuilder::new().build();
        assert_eq!(words, vec![0, 0, 0]);
        let row = SynapticRow::parse(&words).unwrap();
        assert_eq!(row.plastic_word_count(), 0);
        assert_eq!(row.fixed_synapse_count(), 0);
        assert_eq!(row.word_len(), ROW_HEADER_WORDS);
    }

    #[test]
    fn test_row_layout() {
        let f = format();
        let a = FixedSynapse::new(100, 1, 0, 3);
        let b = FixedSynapse::new(200, 2, 1, 4);
        let words = RowBuilder::new()
            .plastic_words(&[0xAAAA, 0xBBBB])
            .fixed_synapse(a, &f)
            .fixed_synapse(b, &f)
            .plastic_control(FixedSynapse::new(0, 3, 0, 7), &f)
            .plastic_control(FixedSynapse::new(0, 4, 1, 8), &f)
            .plastic_control(FixedSynapse::new(0, 5, 0, 9), &f)
            .build();

        assert_eq!(words[0], 2);
        assert_eq!(&words[1..3], &[0xAAAA, 0xBBBB]);
        assert_eq!(words[3], 2);
        assert_eq!(words[4], 3);
        assert_eq!(words.len(), 3 + 2 + 2 + 2);

        let row = SynapticRow::parse(&words).unwrap();
        assert_eq!(row.plastic_region(), &[0xAAAA, 0xBBBB]);
        let decoded: Vec<_> = row
            .fixed_words()
            .iter()
            .map(|&w| decode_fixed_synapse(w, &f))
            .collect();
        assert_eq!(decoded, vec![a, b]);

        let controls: Vec<_> = row
            .fixed_region()
            .plastic_controls()
            .map(|c| FixedSynapse::from_control(c, 0, &f).index)
            .collect();
        assert_eq!(controls, vec![7, 8, 9]);
        assert_eq!(row.fixed_region().plastic_control(3), None);
    }

    #[test]
    fn test_truncated_rows_rejected() {
        assert!(SynapticRow::parse(&[]).is_err());
        // claims 5 plastic words
        assert!(SynapticRow::parse(&[5, 0, 0]).is_err());
        // claims 4 fixed synapses, has 1
        assert!(matches!(
            SynapticRow::parse(&[0, 4, 0, 0x1]),
            Err(StorageError::MalformedRow { needed: 7, available: 4 })
        ));
        // claims 3 control halfwords, needs 2 words
        assert!(SynapticRow::parse(&[0, 0, 3, 0]).is_err());
        assert!(SynapticRow::parse(&[u32::MAX, 0, 0]).is_err());
    }

    #[test]
    fn test_padding_ignored() {
        let f = format();
        let words = RowBuilder::new()
            .fixed_synapse(FixedSynapse::new(1, 1, 0, 0), &f)
            .build_padded(8)
            .unwrap();
        assert_eq!(words.len(), 8);
        let row = SynapticRow::parse(&words).unwrap();
        assert_eq!(row.fixed_synapse_count(), 1);
        assert_eq!(row.word_len(), 4);

        assert!(RowBuilder::new().build_padded(2).is_err());
    }

    #[test]
    fn test_split_row_mut() {
        let f = format();
        let mut words = RowBuilder::new()
            .plastic_words(&[10, 20])
            .plastic_control(FixedSynapse::new(0, 1, 0, 2), &f)
            .build_padded(12)
            .unwrap();

        let (plastic, fixed) = split_row_mut(&mut words).unwrap();
        assert_eq!(fixed.plastic_control_count(), 1);
        plastic[0] = 99;
        assert_eq!(words[1], 99);
    }
}
