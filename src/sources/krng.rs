//! Kernel RNG entropy source.
//!
//! Pulls from the operating system RNG (getrandom-class interface).
//! The kernel RNG carries no SP 800-90B assessment, so the manager
//! credits it zero in FIPS mode regardless of the configured rate.

use rand_core::{OsRng, RngCore};

use crate::sources::{EntropySource, PollDelivery, SourceError, SourceKind};
use crate::SECURITY_STRENGTH_BITS;

/// Entropy source backed by the OS RNG.
#[derive(Debug, Default)]
pub struct KernelRngSource;

impl KernelRngSource {
    /// Creates the kernel-RNG source.
    pub fn new() -> Self {
        Self
    }
}

impl EntropySource for KernelRngSource {
    fn name(&self) -> &'static str {
        "krng"
    }

    fn kind(&self) -> SourceKind {
        SourceKind::KernelRng
    }

    fn max_entropy_bits_per_poll(&self) -> u32 {
        SECURITY_STRENGTH_BITS
    }

    fn entropy_available(&self) -> u32 {
        // A post-boot OS RNG is assumed seeded and inexhaustible.
        SECURITY_STRENGTH_BITS
    }

    fn poll(&self, dst: &mut [u8], requested_bits: u32) -> Result<PollDelivery, SourceError> {
        let requested_bytes = (requested_bits as usize).div_ceil(8).min(dst.len());
        OsRng
            .try_fill_bytes(&mut dst[..requested_bytes])
            .map_err(|_| SourceError::Unavailable("OS RNG read failed"))?;

        Ok(PollDelivery {
            bytes: requested_bytes,
            entropy_bits: requested_bits.min(SECURITY_STRENGTH_BITS),
        })
    }

    fn self_test(&self) -> Result<(), SourceError> {
        // Stuck-output check: two reads must differ.
        let mut a = [0u8; 16];
        let mut b = [0u8; 16];
        OsRng
            .try_fill_bytes(&mut a)
            .map_err(|_| SourceError::Unavailable("OS RNG read failed"))?;
        OsRng
            .try_fill_bytes(&mut b)
            .map_err(|_| SourceError::Unavailable("OS RNG read failed"))?;
        if a == b {
            return Err(SourceError::SelfTestFailed("OS RNG output stuck"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_delivers_requested_amount() {
        let source = KernelRngSource::new();
        let mut buf = [0u8; 48];
        let delivery = source.poll(&mut buf, 256).unwrap();

        assert_eq!(delivery.bytes, 32);
        assert_eq!(delivery.entropy_bits, 256);
        assert!(buf[..32].iter().any(|&b| b != 0));
    }

    #[test]
    fn test_credit_capped_at_strength() {
        let source = KernelRngSource::new();
        let mut buf = [0u8; 64];
        let delivery = source.poll(&mut buf, 512).unwrap();
        assert_eq!(delivery.entropy_bits, SECURITY_STRENGTH_BITS);
    }

    #[test]
    fn test_self_test_passes() {
        KernelRngSource::new().self_test().unwrap();
    }
}
