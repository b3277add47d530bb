//! Atomic (emergency) DRNG.
//!
//! A minimal DRNG for contexts that cannot block on the seed-state
//! machine or the allocator: the ChaCha20 working state is pre-allocated
//! at init and its lock is only ever held for the individual operation.
//! Output is strictly best-effort; callers needing fully-seeded bytes
//! must use the regular generate path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use zeroize::Zeroize;

use crate::crypto::{ChaCha20State, DrngState};
use crate::drng::instance::Drng;
use crate::sources::EsManager;
use crate::{EsdmError, SECURITY_STRENGTH_BYTES};

struct AtomicInner {
    state: ChaCha20State,
    /// Set when the last seed came from a freshly reseeded regular DRNG.
    last_seed_from_regular: Option<Instant>,
}

/// Emergency DRNG usable without blocking or allocating.
pub struct AtomicDrng {
    inner: Mutex<AtomicInner>,
    fully_seeded: AtomicBool,
    force_reseed: AtomicBool,
}

impl AtomicDrng {
    /// Pre-allocates the working state.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(AtomicInner {
                state: ChaCha20State::new(),
                last_seed_from_regular: None,
            }),
            fully_seeded: AtomicBool::new(false),
            force_reseed: AtomicBool::new(true),
        }
    }

    /// Seeds from a regular DRNG that just reseeded.
    ///
    /// A one-shot 256-bit pull; no reference to the regular DRNG is
    /// retained.
    pub fn seed_from_regular(&self, regular: &Drng) -> Result<(), EsdmError> {
        let mut seed = [0u8; SECURITY_STRENGTH_BYTES];
        regular.generate(&mut seed)?;

        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let res = inner.state.seed(&seed);
        seed.zeroize();
        res.map_err(|_| EsdmError::SeedFailed)?;

        inner.last_seed_from_regular = Some(Instant::now());
        drop(inner);

        self.fully_seeded
            .store(regular.fully_seeded(), Ordering::Release);
        self.force_reseed.store(false, Ordering::Release);
        tracing::debug!("atomic DRNG seeded from regular DRNG");
        Ok(())
    }

    /// Seeds directly from the entropy sources.
    ///
    /// Used only while no thread waits on the regular DRNG's seed state,
    /// so the sources are not drained away from blocked readers.
    pub fn seed_from_es(&self, esm: &EsManager) -> Result<(), EsdmError> {
        let buf = esm.fill_seed_buffer(esm.seed_entropy_osr(self.fully_seeded()));
        if !buf.has_payload() {
            return Err(EsdmError::EntropySourceUnavailable { name: "all" });
        }
        let fully = esm.fully_seeded(&buf);

        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .state
            .seed(&buf.payload())
            .map_err(|_| EsdmError::SeedFailed)?;
        inner.last_seed_from_regular = None;
        drop(inner);

        if fully {
            self.fully_seeded.store(true, Ordering::Release);
        }
        self.force_reseed.store(false, Ordering::Release);
        tracing::debug!(
            credited = buf.credited_bits(),
            "atomic DRNG seeded from entropy sources"
        );
        Ok(())
    }

    /// Best-effort generate; never blocks on entropy.
    pub fn generate(&self, out: &mut [u8]) -> Result<usize, EsdmError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .state
            .generate(out)
            .map_err(|_| EsdmError::DrngGenerateFailed)
    }

    /// True once the atomic DRNG received a full-entropy seed.
    pub fn fully_seeded(&self) -> bool {
        self.fully_seeded.load(Ordering::Acquire)
    }

    /// Flags the atomic DRNG for a reseed at the next opportunity.
    pub fn force_reseed(&self) {
        self.force_reseed.store(true, Ordering::Release);
    }

    /// True when a reseed was requested.
    pub fn reseed_requested(&self) -> bool {
        self.force_reseed.load(Ordering::Acquire)
    }

    /// Seconds since the last seed handed over from the regular DRNG.
    pub fn last_seed_from_regular_elapsed(&self) -> Option<u64> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last_seed_from_regular
            .map(|t| t.elapsed().as_secs())
    }

    /// Resets the seed state; the working state is overwritten.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.state = ChaCha20State::new();
        inner.last_seed_from_regular = None;
        drop(inner);
        self.fully_seeded.store(false, Ordering::Release);
        self.force_reseed.store(true, Ordering::Release);
        tracing::debug!("reset atomic DRNG");
    }
}

impl Default for AtomicDrng {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{drng_cb, hash_cb, DrngKind, HashKind};
    use crate::sources::{MockSource, SourceKind};
    use crate::{EsdmConfig, ForceFips};
    use std::sync::Arc;

    #[test]
    fn test_generate_works_unseeded() {
        let atomic = AtomicDrng::new();
        let mut out = [0u8; 32];
        assert_eq!(atomic.generate(&mut out).unwrap(), 32);
        assert!(!atomic.fully_seeded());
    }

    #[test]
    fn test_seed_from_regular_adopts_seed_level() {
        let regular =
            Drng::alloc(drng_cb(DrngKind::HashDrbg), hash_cb(HashKind::Sha512)).unwrap();
        regular.seed(&[0x42; 48], true, "regular").unwrap();

        let atomic = AtomicDrng::new();
        atomic.seed_from_regular(&regular).unwrap();

        assert!(atomic.fully_seeded());
        assert!(!atomic.reseed_requested());
        assert!(atomic.last_seed_from_regular_elapsed().is_some());
    }

    #[test]
    fn test_seed_from_es() {
        let config = Arc::new(EsdmConfig::new());
        config.set_force_fips(ForceFips::Off);
        config.set_es_jent_entropy_rate(256);
        let esm = EsManager::new(
            Arc::clone(&config),
            vec![Arc::new(MockSource::new(SourceKind::Jitter, 256))],
        )
        .unwrap();

        let atomic = AtomicDrng::new();
        atomic.seed_from_es(&esm).unwrap();

        assert!(atomic.fully_seeded());
        assert!(atomic.last_seed_from_regular_elapsed().is_none());
    }

    #[test]
    fn test_reset_clears_seed_state() {
        let atomic = AtomicDrng::new();
        let config = Arc::new(EsdmConfig::new());
        config.set_force_fips(ForceFips::Off);
        let esm = EsManager::new(
            Arc::clone(&config),
            vec![Arc::new(MockSource::new(SourceKind::Jitter, 256))],
        )
        .unwrap();
        atomic.seed_from_es(&esm).unwrap();

        atomic.reset();
        assert!(!atomic.fully_seeded());
        assert!(atomic.reseed_requested());
    }
}
