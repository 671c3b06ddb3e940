//! JSON framing for requests and responses.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Maximum frame size (50MB) to prevent memory exhaustion from misbehaving members.
pub const MAX_MESSAGE_SIZE: usize = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Frame exceeds max size ({size} > {max})")]
    TooLarge { size: usize, max: usize },

    #[error("Empty frame")]
    Empty,
}

/// Serialize a wire type to JSON bytes.
pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>, ProtocolError> {
    Ok(serde_json::to_vec(msg)?)
}

/// Parse a wire type from JSON bytes, rejecting empty and oversized frames.
pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T, ProtocolError> {
    if data.is_empty() {
        return Err(ProtocolError::Empty);
    }
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::TooLarge {
            size: data.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    Ok(serde_json::from_slice(data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Request;

    #[test]
    fn test_decode_empty() {
        assert!(matches!(decode::<Request>(&[]), Err(ProtocolError::Empty)));
    }

    #[test]
    fn test_decode_oversized() {
        let data = vec![b' '; MAX_MESSAGE_SIZE + 1];
        assert!(matches!(
            decode::<Request>(&data),
            Err(ProtocolError::TooLarge { .. })
        ));
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(
            decode::<Request>(b"not json"),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            decode::<Request>(&[0xFF, 0xFE]),
            Err(ProtocolError::Malformed(_))
        ));
    }
}
