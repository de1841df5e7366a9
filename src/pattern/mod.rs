//! # Pattern
//!
//! Conversion between textual hex patterns (`"0a1bff"`) and bounded byte buffers

pub mod buf;

use thiserror::Error;

pub use buf::{BoundedBuf, CapacityError};

/// Longest accepted pattern text, in characters
pub const MAX_PATTERN_CHARS: usize = 128;

/// Longest decoded pattern, in bytes
pub const MAX_PATTERN_BYTES: usize = MAX_PATTERN_CHARS / 2;

/// Decoded search/replace pattern or captured original bytes
pub type PatternBytes = BoundedBuf<MAX_PATTERN_BYTES>;

/// Errors when decoding a hex pattern
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PatternError {
    /// Pattern text is empty
    #[error("pattern is empty")]
    Empty,
    /// Pattern text has an odd number of characters
    #[error("pattern has odd length {0}")]
    OddLength(usize),
    /// Pattern text is longer than [`MAX_PATTERN_CHARS`]
    #[error("pattern is {len} characters long, at most {max} are allowed")]
    TooLong {
        /// Length of the rejected text
        len: usize,
        /// Maximum accepted length
        max: usize,
    },
    /// A character pair is not a hex byte
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

/// Decodes a hex pattern, two characters per byte.
///
/// Length is validated before any byte is produced, so rejected input never yields a partial buffer.
pub fn decode(text: &str) -> Result<PatternBytes, PatternError> {
    let len = text.len();
    if len == 0 {
        return Err(PatternError::Empty);
    }
    if len > MAX_PATTERN_CHARS {
        return Err(PatternError::TooLong {
            len,
            max: MAX_PATTERN_CHARS,
        });
    }
    if len % 2 != 0 {
        return Err(PatternError::OddLength(len));
    }

    // cannot overflow: len <= MAX_PATTERN_CHARS
    let mut bytes = PatternBytes::zeroed(len / 2).map_err(|_| PatternError::TooLong {
        len,
        max: MAX_PATTERN_CHARS,
    })?;
    hex::decode_to_slice(text, bytes.as_mut_slice())?;
    Ok(bytes)
}

/// Encodes bytes as lowercase hex, the normalized form [`decode`] accepts
pub fn encode(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

/// Length in bytes `text` decodes to, or `None` if it would not decode
pub fn decoded_len(text: &str) -> Option<usize> {
    decode(text).ok().map(|bytes| bytes.len())
}

#[cfg(test)]
mod tests {
    use super::{decode, decoded_len, encode, PatternError, MAX_PATTERN_CHARS};

    #[test]
    fn test_decode() {
        let bytes = decode("0a1b").unwrap();
        assert_eq!(&bytes[..], &[0x0a, 0x1b]);

        let bytes = decode("DEADbeef").unwrap();
        assert_eq!(&bytes[..], &[0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn test_decode_rejects_bad_length() {
        assert_eq!(decode(""), Err(PatternError::Empty));
        assert_eq!(decode("a"), Err(PatternError::OddLength(1)));
        assert_eq!(decode("0a1"), Err(PatternError::OddLength(3)));

        let long = "00".repeat(64) + "0";
        assert!(matches!(
            decode(&long),
            Err(PatternError::TooLong { len: 129, .. })
        ));
        let longer = "ff".repeat(65);
        assert!(matches!(decode(&longer), Err(PatternError::TooLong { .. })));
    }

    #[test]
    /// Exactly the maximum length is still accepted
    fn test_decode_max_length() {
        let text = "ab".repeat(MAX_PATTERN_CHARS / 2);
        let bytes = decode(&text).unwrap();
        assert_eq!(bytes.len(), 64);
        assert!(bytes.iter().all(|b| *b == 0xab));
    }

    #[test]
    fn test_decode_rejects_non_hex() {
        assert!(matches!(decode("zz"), Err(PatternError::InvalidHex(_))));
        assert!(matches!(decode("0x1f"), Err(PatternError::InvalidHex(_))));
    }

    #[test]
    fn test_encode_normalizes() {
        assert_eq!(encode(&decode("0A1B").unwrap()), "0a1b");
        assert_eq!(encode(&decode("c0035fd6").unwrap()), "c0035fd6");
    }

    #[test]
    fn test_decoded_len() {
        assert_eq!(decoded_len("90909090"), Some(4));
        assert_eq!(decoded_len("909"), None);
    }
}
