//! Timing-jitter entropy source.
//!
//! Harvests entropy from execution-timing variance: the duration of a
//! short busy loop fluctuates with cache, frequency and scheduling
//! noise. Raw deltas are whitened with SHA-512 before delivery. The
//! credited amount is whatever the manager's configured rate allows;
//! the raw claim here is deliberately conservative.

use std::hint::black_box;
use std::time::Instant;

use sha2::{Digest, Sha512};

use crate::sources::{EntropySource, PollDelivery, SourceError, SourceKind};
use crate::SECURITY_STRENGTH_BITS;

/// Timing deltas folded into one whitened block.
const DELTAS_PER_BLOCK: usize = 64;

/// Timing-jitter entropy source.
#[derive(Debug, Default)]
pub struct TimerJitterSource;

impl TimerJitterSource {
    /// Creates the jitter source.
    pub fn new() -> Self {
        Self
    }

    /// Measures one batch of loop-timing deltas in nanoseconds.
    fn measure_deltas(deltas: &mut [u64; DELTAS_PER_BLOCK]) {
        for delta in deltas.iter_mut() {
            let start = Instant::now();
            let mut acc = 0u64;
            for i in 0..64u64 {
                acc = black_box(acc.wrapping_mul(0x517c_c1b7_2722_0a95).wrapping_add(i));
            }
            black_box(acc);
            *delta = start.elapsed().subsec_nanos() as u64;
        }
    }

    /// Produces one 64-byte whitened block of timing noise.
    fn harvest_block(counter: u64) -> [u8; 64] {
        let mut deltas = [0u64; DELTAS_PER_BLOCK];
        Self::measure_deltas(&mut deltas);

        let mut hasher = Sha512::new();
        hasher.update(counter.to_le_bytes());
        for delta in deltas {
            hasher.update(delta.to_le_bytes());
        }
        let mut block = [0u8; 64];
        block.copy_from_slice(&hasher.finalize());
        block
    }
}

impl EntropySource for TimerJitterSource {
    fn name(&self) -> &'static str {
        "jitter"
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Jitter
    }

    fn max_entropy_bits_per_poll(&self) -> u32 {
        SECURITY_STRENGTH_BITS
    }

    fn entropy_available(&self) -> u32 {
        // Jitter can be harvested on demand; the configured rate decides
        // the actual credit.
        SECURITY_STRENGTH_BITS
    }

    fn poll(&self, dst: &mut [u8], requested_bits: u32) -> Result<PollDelivery, SourceError> {
        let requested_bytes = (requested_bits as usize).div_ceil(8).min(dst.len());

        let mut written = 0usize;
        let mut counter = 0u64;
        while written < requested_bytes {
            let block = Self::harvest_block(counter);
            let take = (requested_bytes - written).min(block.len());
            dst[written..written + take].copy_from_slice(&block[..take]);
            written += take;
            counter += 1;
        }

        Ok(PollDelivery {
            bytes: written,
            entropy_bits: requested_bits.min(SECURITY_STRENGTH_BITS),
        })
    }

    fn self_test(&self) -> Result<(), SourceError> {
        // The timer must move and must not produce identical batches.
        let mut a = [0u64; DELTAS_PER_BLOCK];
        let mut b = [0u64; DELTAS_PER_BLOCK];
        Self::measure_deltas(&mut a);
        Self::measure_deltas(&mut b);

        if a.iter().all(|&d| d == 0) {
            return Err(SourceError::SelfTestFailed("timer resolution too coarse"));
        }
        if a == b {
            return Err(SourceError::SelfTestFailed("timing deltas stuck"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_fills_request() {
        let source = TimerJitterSource::new();
        let mut buf = [0u8; 48];
        let delivery = source.poll(&mut buf, 256).unwrap();

        assert_eq!(delivery.bytes, 32);
        assert!(buf[..32].iter().any(|&b| b != 0));
    }

    #[test]
    fn test_consecutive_polls_differ() {
        let source = TimerJitterSource::new();
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        source.poll(&mut a, 256).unwrap();
        source.poll(&mut b, 256).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_self_test_passes_on_host() {
        TimerJitterSource::new().self_test().unwrap();
    }
}
