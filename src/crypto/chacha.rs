//! ChaCha20-based DRNG callback.
//!
//! The plug-in alternative to the Hash-DRBG and the working state of the
//! atomic DRNG: seeding and generation never allocate, so the instance
//! is usable from contexts that must not block on the allocator.

use rand_chacha::ChaCha20Rng;
use rand_core::{RngCore, SeedableRng};
use sha2::{Digest, Sha512};
use zeroize::Zeroize;

use super::{CryptoError, DrngCb, DrngState};

/// Per-request generate limit, matching the Hash-DRBG contract.
const MAX_GENERATE_BYTES: usize = 1 << 16;

/// ChaCha20 DRNG callback set.
#[derive(Debug, Default)]
pub struct ChaCha20Drng;

impl DrngCb for ChaCha20Drng {
    fn name(&self) -> &'static str {
        "chacha20"
    }

    fn alloc(&self, strength_bytes: usize) -> Result<Box<dyn DrngState>, CryptoError> {
        if strength_bytes > 32 {
            return Err(CryptoError::SeedRejected("strength exceeds key size"));
        }
        Ok(Box::new(ChaCha20State::new()))
    }

    fn self_test(&self) -> Result<(), CryptoError> {
        let mut a = ChaCha20State::new();
        let mut b = ChaCha20State::new();
        a.seed(&[0x42u8; 32])?;
        b.seed(&[0x42u8; 32])?;

        let mut out_a = [0u8; 64];
        let mut out_b = [0u8; 64];
        a.generate(&mut out_a)?;
        b.generate(&mut out_b)?;
        if out_a != out_b {
            return Err(CryptoError::SelfTestFailed("chacha20 not deterministic"));
        }

        let mut c = ChaCha20State::new();
        c.seed(&[0x24u8; 32])?;
        let mut out_c = [0u8; 64];
        c.generate(&mut out_c)?;
        if out_c == out_a {
            return Err(CryptoError::SelfTestFailed("chacha20 seed ignored"));
        }

        Ok(())
    }
}

/// Working state of one ChaCha20 DRNG instance.
///
/// Seed material of arbitrary length is compressed to the 256-bit key
/// with SHA-512 and folded into the running state, so fresh entropy
/// supplements rather than replaces the previous key.
pub struct ChaCha20State {
    rng: ChaCha20Rng,
}

impl ChaCha20State {
    /// Creates an unseeded instance.
    pub fn new() -> Self {
        Self {
            rng: ChaCha20Rng::from_seed([0u8; 32]),
        }
    }
}

impl Default for ChaCha20State {
    fn default() -> Self {
        Self::new()
    }
}

impl DrngState for ChaCha20State {
    fn seed(&mut self, seed: &[u8]) -> Result<(), CryptoError> {
        if seed.is_empty() {
            return Err(CryptoError::SeedRejected("empty seed material"));
        }

        let digest = Sha512::digest(seed);

        // Fold fresh entropy into the current keystream position.
        let mut key = [0u8; 32];
        self.rng.fill_bytes(&mut key);
        for (k, d) in key.iter_mut().zip(digest.iter()) {
            *k ^= d;
        }

        self.rng = ChaCha20Rng::from_seed(key);
        key.zeroize();
        Ok(())
    }

    fn generate(&mut self, out: &mut [u8]) -> Result<usize, CryptoError> {
        if out.len() > MAX_GENERATE_BYTES {
            return Err(CryptoError::RequestTooLarge);
        }
        self.rng.fill_bytes(out);
        Ok(out.len())
    }
}

impl Drop for ChaCha20State {
    fn drop(&mut self) {
        // ChaCha20Rng exposes no zeroization hook; overwrite the key
        // schedule with a fixed state instead.
        self.rng = ChaCha20Rng::from_seed([0u8; 32]);
    }
}
