//! Cryptographic capability sets.
//!
//! The conditioning hash and the DRNG implementation are capability
//! bundles selected at startup: a name, allocation, the core operation
//! and a power-on self test. The default pairing is SHA-512 conditioning
//! with a Hash-DRBG; BLAKE3 and a ChaCha20 DRNG are the plug-in
//! alternatives. Swapping after init is guarded by the crypto-callback
//! update lock owned by the DRNG manager.

mod chacha;
mod hash;
mod hash_drbg;

pub use chacha::{ChaCha20Drng, ChaCha20State};
pub use hash::{Blake3Hash, Sha512Hash};
pub use hash_drbg::HashDrbg;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced by crypto callbacks.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The seed material was rejected by the DRNG.
    #[error("seed material rejected: {0}")]
    SeedRejected(&'static str),
    /// A generate request exceeded the per-request limit.
    #[error("generate request exceeds DRBG per-request limit")]
    RequestTooLarge,
    /// The callback's known-answer or consistency test failed.
    #[error("crypto self test failed: {0}")]
    SelfTestFailed(&'static str),
}

/// Capability set of a conditioning hash.
pub trait HashCb: Send + Sync {
    /// Implementation name for logging and status reports.
    fn name(&self) -> &'static str;

    /// Digest size in bytes.
    fn digest_size(&self) -> usize;

    /// Hashes `data` into `out`, returning the number of bytes written.
    ///
    /// `out` must hold at least `digest_size()` bytes.
    fn hash(&self, data: &[u8], out: &mut [u8]) -> Result<usize, CryptoError>;

    /// Runs the known-answer self test.
    fn self_test(&self) -> Result<(), CryptoError>;
}

/// Opaque, exclusively owned working state of one DRNG instance.
pub trait DrngState: Send + Sync {
    /// Mixes `seed` into the working state.
    fn seed(&mut self, seed: &[u8]) -> Result<(), CryptoError>;

    /// Fills `out` with generated bytes, returning the count produced.
    ///
    /// A single invocation never produces more than the DRBG's
    /// per-request limit; callers chunk accordingly.
    fn generate(&mut self, out: &mut [u8]) -> Result<usize, CryptoError>;
}

/// Capability set of a DRNG implementation.
pub trait DrngCb: Send + Sync {
    /// Implementation name for logging and status reports.
    fn name(&self) -> &'static str;

    /// Allocates fresh working state at the given security strength.
    fn alloc(&self, strength_bytes: usize) -> Result<Box<dyn DrngState>, CryptoError>;

    /// Runs the implementation self test (determinism and divergence).
    fn self_test(&self) -> Result<(), CryptoError>;
}

/// Built-in conditioning hash selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashKind {
    /// SHA-512, the default conditioning hash.
    #[default]
    Sha512,
    /// BLAKE3 alternative.
    Blake3,
}

/// Built-in DRNG selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DrngKind {
    /// SP 800-90A Hash-DRBG over SHA-512, the default.
    #[default]
    HashDrbg,
    /// ChaCha20-based DRNG alternative.
    ChaCha20,
}

static SHA512_CB: Sha512Hash = Sha512Hash;
static BLAKE3_CB: Blake3Hash = Blake3Hash;
static HASH_DRBG_CB: HashDrbg = HashDrbg;
static CHACHA20_CB: ChaCha20Drng = ChaCha20Drng;

/// Resolves a hash selection to its callback set.
pub fn hash_cb(kind: HashKind) -> &'static dyn HashCb {
    match kind {
        HashKind::Sha512 => &SHA512_CB,
        HashKind::Blake3 => &BLAKE3_CB,
    }
}

/// Resolves a DRNG selection to its callback set.
pub fn drng_cb(kind: DrngKind) -> &'static dyn DrngCb {
    match kind {
        DrngKind::HashDrbg => &HASH_DRBG_CB,
        DrngKind::ChaCha20 => &CHACHA20_CB,
    }
}
