//! Reversible text encodings

use crate::config::EncodingType;
use crate::error::{Error, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Encoding layer
#[derive(Debug, Clone, Copy)]
pub struct EncodingObfuscator {
    encoding: EncodingType,
}

impl EncodingObfuscator {
    /// Create an encoding layer
    pub fn new(encoding: EncodingType) -> Self {
        Self { encoding }
    }

    /// Encode `data`
    pub fn encode(&self, data: &[u8]) -> Vec<u8> {
        match self.encoding {
            EncodingType::Base64 => STANDARD.encode(data).into_bytes(),
            EncodingType::Hex => hex::encode(data).into_bytes(),
            EncodingType::None => data.to_vec(),
        }
    }

    /// Decode `data`
    pub fn decode(&self, data: &[u8]) -> Result<Vec<u8>> {
        match self.encoding {
            EncodingType::Base64 => STANDARD
                .decode(data)
                .map_err(|e| Error::encoding(format!("base64: {e}"))),
            EncodingType::Hex => {
                hex::decode(data).map_err(|e| Error::encoding(format!("hex: {e}")))
            }
            EncodingType::None => Ok(data.to_vec()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base64() {
        let enc = EncodingObfuscator::new(EncodingType::Base64);
        assert_eq!(enc.encode(b"hi"), b"aGk=");
        assert_eq!(enc.decode(b"aGk=").unwrap(), b"hi");
        assert!(matches!(enc.decode(b"!!"), Err(Error::Encoding(_))));
    }

    #[test]
    fn test_hex() {
        let enc = EncodingObfuscator::new(EncodingType::Hex);
        assert_eq!(enc.encode(&[0xde, 0xad]), b"dead");
        assert_eq!(enc.decode(b"dead").unwrap(), vec![0xde, 0xad]);
        assert!(enc.decode(b"xyz").is_err());
    }

    #[test]
    fn test_none_passthrough() {
        let enc = EncodingObfuscator::new(EncodingType::None);
        assert_eq!(enc.encode(b"raw"), b"raw");
        assert_eq!(enc.decode(b"raw").unwrap(), b"raw");
    }
}
