//! Auxiliary entropy pool.
//!
//! The slot behind `write_data`: external writers inject bytes together
//! with a claimed entropy estimate. Injected data is compressed into a
//! running SHA-512 pool; the claim is only credited for privileged
//! writers. Polling consumes the accumulated credit and rolls the pool
//! forward so delivered output cannot be reconstructed.

use std::sync::Mutex;

use sha2::{Digest, Sha512};
use zeroize::Zeroize;

use crate::sources::{EntropySource, PollDelivery, SourceError, SourceKind};
use crate::{EsdmError, SECURITY_STRENGTH_BITS};

/// Upper bound on a single injection.
const MAX_WRITE_BYTES: usize = 4096;

struct AuxPool {
    digest: [u8; 64],
    entropy_bits: u32,
}

impl Drop for AuxPool {
    fn drop(&mut self) {
        self.digest.zeroize();
        self.entropy_bits = 0;
    }
}

/// Entropy source fed by external writers.
pub struct AuxSource {
    pool: Mutex<AuxPool>,
}

impl AuxSource {
    /// Creates an empty auxiliary pool.
    pub fn new() -> Self {
        Self {
            pool: Mutex::new(AuxPool {
                digest: [0u8; 64],
                entropy_bits: 0,
            }),
        }
    }

    /// Mixes caller-provided data into the pool.
    ///
    /// `claimed_bits` is credited only when `privileged` holds; data from
    /// unprivileged writers still mixes in at zero credit. The claim can
    /// never exceed the data length or the security strength.
    pub fn write(
        &self,
        data: &[u8],
        claimed_bits: u32,
        privileged: bool,
    ) -> Result<(), EsdmError> {
        if data.is_empty() || data.len() > MAX_WRITE_BYTES {
            return Err(EsdmError::InvalidArgument("aux write size out of range"));
        }
        if claimed_bits as usize > data.len() * 8 {
            return Err(EsdmError::InvalidArgument("entropy claim exceeds data"));
        }

        let credit = if privileged {
            claimed_bits.min(SECURITY_STRENGTH_BITS)
        } else {
            0
        };

        let mut pool = self.pool.lock().unwrap_or_else(|e| e.into_inner());
        let mut hasher = Sha512::new();
        hasher.update(pool.digest);
        hasher.update(data);
        pool.digest.copy_from_slice(&hasher.finalize());
        pool.entropy_bits = pool.entropy_bits.saturating_add(credit).min(SECURITY_STRENGTH_BITS);

        tracing::debug!(
            bytes = data.len(),
            credited = credit,
            pool_bits = pool.entropy_bits,
            "auxiliary entropy written"
        );
        Ok(())
    }

    /// Entropy bits currently held by the pool.
    pub fn pending_bits(&self) -> u32 {
        self.pool
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entropy_bits
    }
}

impl Default for AuxSource {
    fn default() -> Self {
        Self::new()
    }
}

impl EntropySource for AuxSource {
    fn name(&self) -> &'static str {
        "aux"
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Aux
    }

    fn max_entropy_bits_per_poll(&self) -> u32 {
        SECURITY_STRENGTH_BITS
    }

    fn entropy_available(&self) -> u32 {
        self.pending_bits()
    }

    fn poll(&self, dst: &mut [u8], requested_bits: u32) -> Result<PollDelivery, SourceError> {
        let mut pool = self.pool.lock().unwrap_or_else(|e| e.into_inner());

        let requested_bytes = (requested_bits as usize)
            .div_ceil(8)
            .min(dst.len())
            .min(pool.digest.len());
        dst[..requested_bytes].copy_from_slice(&pool.digest[..requested_bytes]);

        let credit = pool.entropy_bits.min(requested_bits);
        pool.entropy_bits = 0;

        // Roll the pool forward so the delivered bytes are gone.
        let mut hasher = Sha512::new();
        hasher.update(pool.digest);
        hasher.update([0x5f]);
        pool.digest.copy_from_slice(&hasher.finalize());

        Ok(PollDelivery {
            bytes: requested_bytes,
            entropy_bits: credit,
        })
    }
}
