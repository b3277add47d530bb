//! Deterministic mock entropy source for tests and demonstration.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use crate::sources::{EntropySource, PollDelivery, SourceError, SourceKind};

/// Mock source that produces a deterministic byte pattern and credits a
/// configurable entropy amount per poll.
///
/// The pattern is not entropy; it only exercises the accounting and
/// seeding machinery. The credited amount can be changed at runtime to
/// simulate a source drying up or recovering, and the health test can be
/// forced to fail.
#[derive(Debug)]
pub struct MockSource {
    kind: SourceKind,
    entropy_per_poll: AtomicU32,
    fail_self_test: AtomicBool,
    sequence: AtomicU64,
    polls: AtomicU64,
}

impl MockSource {
    /// Creates a mock feeding `kind` with `entropy_per_poll` bits.
    pub fn new(kind: SourceKind, entropy_per_poll: u32) -> Self {
        Self {
            kind,
            entropy_per_poll: AtomicU32::new(entropy_per_poll),
            fail_self_test: AtomicBool::new(false),
            sequence: AtomicU64::new(0),
            polls: AtomicU64::new(0),
        }
    }

    /// Changes the entropy credited per poll (0 quiesces the source).
    pub fn set_entropy_per_poll(&self, bits: u32) {
        self.entropy_per_poll.store(bits, Ordering::Relaxed);
    }

    /// Forces the health test to fail or recover.
    pub fn set_fail_self_test(&self, fail: bool) {
        self.fail_self_test.store(fail, Ordering::Relaxed);
    }

    /// Number of polls served so far.
    pub fn polls(&self) -> u64 {
        self.polls.load(Ordering::Relaxed)
    }
}

impl EntropySource for MockSource {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn max_entropy_bits_per_poll(&self) -> u32 {
        self.entropy_per_poll.load(Ordering::Relaxed)
    }

    fn entropy_available(&self) -> u32 {
        self.entropy_per_poll.load(Ordering::Relaxed)
    }

    fn poll(&self, dst: &mut [u8], requested_bits: u32) -> Result<PollDelivery, SourceError> {
        self.polls.fetch_add(1, Ordering::Relaxed);
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);

        let requested_bytes = (requested_bits as usize).div_ceil(8).min(dst.len());
        for (i, byte) in dst[..requested_bytes].iter_mut().enumerate() {
            *byte = ((seq.wrapping_mul(251)).wrapping_add(i as u64 * 17) % 256) as u8;
        }

        let credit = self
            .entropy_per_poll
            .load(Ordering::Relaxed)
            .min(requested_bits);
        Ok(PollDelivery {
            bytes: requested_bytes,
            entropy_bits: credit,
        })
    }

    fn self_test(&self) -> Result<(), SourceError> {
        if self.fail_self_test.load(Ordering::Relaxed) {
            return Err(SourceError::SelfTestFailed("mock forced failure"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_fills_and_credits() {
        let source = MockSource::new(SourceKind::Jitter, 256);
        let mut buf = [0u8; 48];
        let delivery = source.poll(&mut buf, 256).unwrap();

        assert_eq!(delivery.bytes, 32);
        assert_eq!(delivery.entropy_bits, 256);
        assert_eq!(source.polls(), 1);
    }

    #[test]
    fn test_quiesced_source_credits_zero() {
        let source = MockSource::new(SourceKind::Jitter, 256);
        source.set_entropy_per_poll(0);

        let mut buf = [0u8; 48];
        let delivery = source.poll(&mut buf, 256).unwrap();
        assert_eq!(delivery.entropy_bits, 0);
        assert!(delivery.bytes > 0);
    }

    #[test]
    fn test_forced_self_test_failure() {
        let source = MockSource::new(SourceKind::Jitter, 256);
        assert!(source.self_test().is_ok());

        source.set_fail_self_test(true);
        assert!(source.self_test().is_err());

        source.set_fail_self_test(false);
        assert!(source.self_test().is_ok());
    }

    #[test]
    fn test_sequence_varies_output() {
        let source = MockSource::new(SourceKind::Jitter, 256);
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        source.poll(&mut a, 256).unwrap();
        source.poll(&mut b, 256).unwrap();
        assert_ne!(a, b);
    }
}
