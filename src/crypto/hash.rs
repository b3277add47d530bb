//! Conditioning hash callbacks.
//!
//! SHA-512 is the default conditioning primitive; BLAKE3 is the
//! alternative. Both run a known-answer test at startup.

use blake3::Hasher as Blake3Hasher;
use sha2::{Digest, Sha512};

use super::{CryptoError, HashCb};

/// SHA-512 digest of the empty string, the known-answer vector.
const SHA512_EMPTY_KAT: [u8; 64] = [
    0xcf, 0x83, 0xe1, 0x35, 0x7e, 0xef, 0xb8, 0xbd, 0xf1, 0x54, 0x28, 0x50, 0xd6, 0x6d, 0x80, 0x07,
    0xd6, 0x20, 0xe4, 0x05, 0x0b, 0x57, 0x15, 0xdc, 0x83, 0xf4, 0xa9, 0x21, 0xd3, 0x6c, 0xe9, 0xce,
    0x47, 0xd0, 0xd1, 0x3c, 0x5d, 0x85, 0xf2, 0xb0, 0xff, 0x83, 0x18, 0xd2, 0x87, 0x7e, 0xec, 0x2f,
    0x63, 0xb9, 0x31, 0xbd, 0x47, 0x41, 0x7a, 0x81, 0xa5, 0x38, 0x32, 0x7a, 0xf9, 0x27, 0xda, 0x3e,
];

/// BLAKE3 digest of the empty string, the known-answer vector.
const BLAKE3_EMPTY_KAT: [u8; 32] = [
    0xaf, 0x13, 0x49, 0xb9, 0xf5, 0xf9, 0xa1, 0xa6, 0xa0, 0x40, 0x4d, 0xea, 0x36, 0xdc, 0xc9, 0x49,
    0x9b, 0xcb, 0x25, 0xc9, 0xad, 0xc1, 0x12, 0xb7, 0xcc, 0x9a, 0x93, 0xca, 0xe4, 0x1f, 0x32, 0x62,
];

/// SHA-512 conditioning hash.
#[derive(Debug, Default)]
pub struct Sha512Hash;

impl HashCb for Sha512Hash {
    fn name(&self) -> &'static str {
        "sha512"
    }

    fn digest_size(&self) -> usize {
        64
    }

    fn hash(&self, data: &[u8], out: &mut [u8]) -> Result<usize, CryptoError> {
        if out.len() < self.digest_size() {
            return Err(CryptoError::SeedRejected("output buffer too small"));
        }
        let digest = Sha512::digest(data);
        out[..64].copy_from_slice(&digest);
        Ok(64)
    }

    fn self_test(&self) -> Result<(), CryptoError> {
        let mut out = [0u8; 64];
        self.hash(&[], &mut out)?;
        if out != SHA512_EMPTY_KAT {
            return Err(CryptoError::SelfTestFailed("sha512 known answer mismatch"));
        }
        Ok(())
    }
}

/// BLAKE3 conditioning hash.
#[derive(Debug, Default)]
pub struct Blake3Hash;

impl HashCb for Blake3Hash {
    fn name(&self) -> &'static str {
        "blake3"
    }

    fn digest_size(&self) -> usize {
        32
    }

    fn hash(&self, data: &[u8], out: &mut [u8]) -> Result<usize, CryptoError> {
        if out.len() < self.digest_size() {
            return Err(CryptoError::SeedRejected("output buffer too small"));
        }
        let mut hasher = Blake3Hasher::new();
        hasher.update(data);
        out[..32].copy_from_slice(hasher.finalize().as_bytes());
        Ok(32)
    }

    fn self_test(&self) -> Result<(), CryptoError> {
        let mut out = [0u8; 32];
        self.hash(&[], &mut out)?;
        if out != BLAKE3_EMPTY_KAT {
            return Err(CryptoError::SelfTestFailed("blake3 known answer mismatch"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha512_known_answer() {
        Sha512Hash.self_test().unwrap();
    }

    #[test]
    fn test_blake3_known_answer() {
        Blake3Hash.self_test().unwrap();
    }

    #[test]
    fn test_different_input_different_digest() {
        let mut a = [0u8; 64];
        let mut b = [0u8; 64];
        Sha512Hash.hash(b"one", &mut a).unwrap();
        Sha512Hash.hash(b"two", &mut b).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_short_output_rejected() {
        let mut out = [0u8; 16];
        assert!(Sha512Hash.hash(b"data", &mut out).is_err());
    }
}
