//! Secret sealing boundary.
//!
//! Host key pairs are sealed before they are written to the store and opened
//! when read back. The engine only sees opaque bytes; sealed blobs are stored
//! base64-encoded inside the entity JSON.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SealError {
    #[error("seal failed: {0}")]
    Seal(String),

    #[error("open failed: {0}")]
    Open(String),
}

pub trait Sealer: Send + Sync {
    fn seal(&self, plain: &[u8]) -> Result<Vec<u8>, SealError>;

    fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, SealError>;
}

pub(crate) fn seal_to_string(sealer: &dyn Sealer, plain: &[u8]) -> Result<String, SealError> {
    sealer.seal(plain).map(|bytes| STANDARD.encode(bytes))
}

pub(crate) fn open_from_string(sealer: &dyn Sealer, encoded: &str) -> Result<Vec<u8>, SealError> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| SealError::Open(format!("bad encoding: {}", e)))?;
    sealer.open(&bytes)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Reversible scrambling with a tag so a wrong key is detected. Not
    /// cryptography.
    pub struct XorSealer(pub u8);

    impl Sealer for XorSealer {
        fn seal(&self, plain: &[u8]) -> Result<Vec<u8>, SealError> {
            let mut out = vec![self.0];
            out.extend(plain.iter().map(|b| b ^ self.0));
            Ok(out)
        }

        fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, SealError> {
            match sealed.split_first() {
                Some((tag, body)) if *tag == self.0 => Ok(body.iter().map(|b| b ^ self.0).collect()),
                _ => Err(SealError::Open("wrong key".to_string())),
            }
        }
    }

    #[test]
    fn test_string_round_trip_and_wrong_key() {
        let s = seal_to_string(&XorSealer(7), b"secret").unwrap();
        assert_eq!(open_from_string(&XorSealer(7), &s).unwrap(), b"secret");
        assert!(open_from_string(&XorSealer(9), &s).is_err());
    }
}
