//! Little-endian word access for the persisted sections

use crate::error::{Result, StorageError};

/// Read a little-endian `u32` at `offset`
pub fn read_u32_le(data: &[u8], offset: usize) -> Result<u32> {
    let end = offset
        .checked_add(4)
        .ok_or_else(|| StorageError::invalid_format("offset overflow"))?;
    let bytes = data.get(offset..end).ok_or(StorageError::OutOfBounds {
        index: end,
        max: data.len(),
    })?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Decode a byte slice of little-endian words
pub fn words_from_le_bytes(data: &[u8]) -> Result<Vec<u32>> {
    if data.len() % 4 != 0 {
        return Err(StorageError::invalid_format(format!(
            "word section length {} is not a multiple of 4",
            data.len()
        )));
    }
    Ok(data
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Append words to `out` in little-endian order
pub fn extend_le_words(out: &mut Vec<u8>, words: &[u32]) {
    out.reserve(words.len() * 4);
    for w in words {
        out.extend_from_slice(&w.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_helpers() {
        let mut bytes = Vec::new();
        extend_le_words(&mut bytes, &[1, 0xDEAD_BEEF]);
        assert_eq!(bytes.len(), 8);
        assert_eq!(read_u32_le(&bytes, 4).unwrap(), 0xDEAD_BEEF);
        assert!(read_u32_le(&bytes, 6).is_err());
        assert!(read_u32_le(&bytes, usize::MAX).is_err());
        assert_eq!(words_from_le_bytes(&bytes).unwrap(), vec![1, 0xDEAD_BEEF]);
        assert!(words_from_le_bytes(&bytes[..7]).is_err());
    }
}
