//! A single DRNG instance.
//!
//! Owns the opaque crypto state of one deterministic generator plus the
//! seed bookkeeping: the atomic request countdown, the count of generate
//! calls served since the last full-entropy seed, the seed timestamp and
//! the fully-seeded/force-reseed flags. A writer lock serializes seed,
//! generate and reset; a reader lock guards the hash callback reference
//! used by self tests.

use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use crate::crypto::{DrngCb, DrngState, HashCb};
use crate::{EsdmError, MAX_REQSIZE, RESEED_THRESH, SECURITY_STRENGTH_BYTES};

struct DrngInner {
    /// Crypto working state; `None` after teardown.
    state: Option<Box<dyn DrngState>>,
    drng_cb: &'static dyn DrngCb,
    last_seeded: Instant,
    fully_seeded: bool,
    force_reseed: bool,
}

/// One DRNG with its seed counters and crypto callbacks.
pub struct Drng {
    inner: RwLock<DrngInner>,
    hash_cb: RwLock<&'static dyn HashCb>,
    /// Countdown to the next mandatory reseed; decremented per generate.
    requests: AtomicI32,
    /// Generate calls served since the last full-entropy seed.
    requests_since_fully_seeded: AtomicU32,
}

impl Drng {
    /// Allocates crypto state and resets all counters.
    pub fn alloc(
        drng_cb: &'static dyn DrngCb,
        hash_cb: &'static dyn HashCb,
    ) -> Result<Self, EsdmError> {
        let state = drng_cb
            .alloc(SECURITY_STRENGTH_BYTES)
            .map_err(|err| {
                tracing::error!(%err, "DRNG allocation failed");
                EsdmError::Internal("DRNG allocation failed")
            })?;

        let drng = Self {
            inner: RwLock::new(DrngInner {
                state: Some(state),
                drng_cb,
                last_seeded: Instant::now(),
                fully_seeded: false,
                force_reseed: true,
            }),
            hash_cb: RwLock::new(hash_cb),
            requests: AtomicI32::new(RESEED_THRESH as i32),
            requests_since_fully_seeded: AtomicU32::new(0),
        };
        tracing::debug!(drng = drng_cb.name(), "DRNG allocated");
        Ok(drng)
    }

    /// Injects seed material; takes the writer lock.
    ///
    /// On callback failure the force-reseed flag is raised and the
    /// scheduler retries. On success the request countdown restarts and
    /// the generate calls since the previous seed are folded into the
    /// since-fully-seeded count unless this seed carried full entropy.
    pub fn seed(
        &self,
        payload: &[u8],
        fully_seeded: bool,
        label: &str,
    ) -> Result<(), EsdmError> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let state = inner.state.as_mut().ok_or(EsdmError::NotInitialized)?;

        tracing::debug!(label, bytes = payload.len(), "seeding DRNG");

        if let Err(err) = state.seed(payload) {
            tracing::warn!(label, %err, "DRNG seeding failed");
            inner.force_reseed = true;
            return Err(EsdmError::SeedFailed);
        }

        let generate_calls = (RESEED_THRESH as i64
            - i64::from(self.requests.load(Ordering::Acquire)))
        .clamp(0, u32::MAX as i64) as u32;

        if fully_seeded {
            self.requests_since_fully_seeded.store(0, Ordering::Relaxed);
        } else {
            self.requests_since_fully_seeded
                .fetch_add(generate_calls, Ordering::Relaxed);
        }

        tracing::debug!(
            label,
            secs_since_seed = inner.last_seeded.elapsed().as_secs(),
            generate_calls,
            "DRNG stats since last seeding"
        );

        inner.last_seeded = Instant::now();
        self.requests
            .store(RESEED_THRESH as i32, Ordering::Release);
        inner.force_reseed = false;

        if fully_seeded && !inner.fully_seeded {
            inner.fully_seeded = true;
            tracing::info!(label, "DRNG fully seeded");
        }

        Ok(())
    }

    /// Generates random bytes; takes the writer lock.
    ///
    /// A single invocation is bounded by the DRBG per-request limit.
    pub fn generate(&self, out: &mut [u8]) -> Result<usize, EsdmError> {
        if out.len() > MAX_REQSIZE {
            return Err(EsdmError::InvalidArgument("generate request too large"));
        }

        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let state = inner.state.as_mut().ok_or(EsdmError::NotInitialized)?;
        state.generate(out).map_err(|err| {
            tracing::warn!(%err, "getting random data from DRNG failed");
            EsdmError::DrngGenerateFailed
        })
    }

    /// Resets counters and flags; the next seed must re-earn trust.
    pub fn reset(&self) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        self.requests
            .store(RESEED_THRESH as i32, Ordering::Release);
        self.requests_since_fully_seeded.store(0, Ordering::Relaxed);
        inner.last_seeded = Instant::now();
        inner.fully_seeded = false;
        inner.force_reseed = true;
        tracing::debug!("reset DRNG");
    }

    /// Drops the crypto state; the instance refuses service afterwards.
    pub fn teardown(&self) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        // Dropping the boxed state zeroizes it.
        inner.state = None;
        inner.fully_seeded = false;
    }

    /// Decrements the request countdown, returning true when it hit the
    /// reseed threshold.
    ///
    /// Acquire ordering so the thread that takes the reseed branch
    /// observes all prior generates.
    pub fn request_elapsed(&self) -> bool {
        self.requests.fetch_sub(1, Ordering::AcqRel) == 1
    }

    /// Remaining generate calls until the next mandatory reseed.
    pub fn requests_remaining(&self) -> i32 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Generate calls since the last full-entropy seed.
    pub fn requests_since_fully_seeded(&self) -> u32 {
        self.requests_since_fully_seeded.load(Ordering::Relaxed)
    }

    /// True once this DRNG received a full-entropy seed in the current
    /// epoch.
    pub fn fully_seeded(&self) -> bool {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .fully_seeded
    }

    /// Drops the fully-seeded state after running too long on a stale
    /// seed.
    pub fn unset_fully_seeded(&self) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if inner.fully_seeded {
            inner.fully_seeded = false;
            inner.force_reseed = true;
            tracing::warn!("DRNG exceeded reseed ceiling, fully-seeded state dropped");
        }
    }

    /// True when a reseed was requested out of band.
    pub fn force_reseed(&self) -> bool {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .force_reseed
    }

    /// Flags this DRNG for a reseed before its next output.
    pub fn set_force_reseed(&self, force: bool) {
        self.inner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .force_reseed = force;
    }

    /// Seconds elapsed since the last seed injection.
    pub fn last_seeded_elapsed(&self) -> Duration {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        Instant::now().saturating_duration_since(inner.last_seeded)
    }

    /// Pushes the seed timestamp forward to stagger time-based reseeds
    /// across nodes.
    pub fn stagger_last_seeded(&self, node: u32) {
        if node == 0 {
            return;
        }
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if let Some(staggered) = inner
            .last_seeded
            .checked_add(Duration::from_secs(u64::from(node) * 60))
        {
            inner.last_seeded = staggered;
        }
    }

    /// Name of the DRNG implementation.
    pub fn drng_name(&self) -> &'static str {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .drng_cb
            .name()
    }

    /// Conditioning hash callback; reader lock held for the access.
    pub fn hash_cb(&self) -> &'static dyn HashCb {
        *self.hash_cb.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Swaps the hash callback; caller holds the crypto-update lock.
    pub(crate) fn set_hash_cb(&self, hash_cb: &'static dyn HashCb) {
        *self.hash_cb.write().unwrap_or_else(|e| e.into_inner()) = hash_cb;
    }

    /// Runs the self tests of the attached crypto callbacks.
    pub fn selftest(&self) -> Result<(), EsdmError> {
        let hash_cb = self.hash_cb();
        hash_cb.self_test().map_err(|err| {
            tracing::error!(%err, "hash self test failed");
            EsdmError::SelfTestFailed("hash callback")
        })?;

        let drng_cb = {
            let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
            inner.drng_cb
        };
        drng_cb.self_test().map_err(|err| {
            tracing::error!(%err, "DRNG self test failed");
            EsdmError::SelfTestFailed("DRNG callback")
        })?;

        Ok(())
    }
}

impl std::fmt::Debug for Drng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Drng")
            .field("drng", &self.drng_name())
            .field("fully_seeded", &self.fully_seeded())
            .field("requests_remaining", &self.requests_remaining())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{drng_cb, hash_cb, DrngKind, HashKind};

    fn test_drng() -> Drng {
        Drng::alloc(drng_cb(DrngKind::HashDrbg), hash_cb(HashKind::Sha512)).unwrap()
    }

    #[test]
    fn test_fresh_drng_wants_reseed() {
        let drng = test_drng();
        assert!(!drng.fully_seeded());
        assert!(drng.force_reseed());
        assert_eq!(drng.requests_remaining(), RESEED_THRESH as i32);
    }

    #[test]
    fn test_full_seed_sets_flags() {
        let drng = test_drng();
        drng.seed(&[0x42; 48], true, "test").unwrap();

        assert!(drng.fully_seeded());
        assert!(!drng.force_reseed());
        assert_eq!(drng.requests_since_fully_seeded(), 0);
    }

    #[test]
    fn test_partial_seed_accumulates_requests() {
        let drng = test_drng();
        drng.seed(&[0x42; 48], true, "test").unwrap();

        for _ in 0..10 {
            drng.request_elapsed();
            let mut out = [0u8; 16];
            drng.generate(&mut out).unwrap();
        }

        drng.seed(&[0x43; 48], false, "test").unwrap();
        assert_eq!(drng.requests_since_fully_seeded(), 10);
        // A partial seed does not clear the fully-seeded epoch.
        assert!(drng.fully_seeded());

        drng.seed(&[0x44; 48], true, "test").unwrap();
        assert_eq!(drng.requests_since_fully_seeded(), 0);
    }

    #[test]
    fn test_reset_invariants() {
        let drng = test_drng();
        drng.seed(&[0x42; 48], true, "test").unwrap();

        drng.reset();
        assert!(!drng.fully_seeded());
        assert!(drng.force_reseed());
        assert_eq!(drng.requests_remaining(), RESEED_THRESH as i32);
        assert_eq!(drng.requests_since_fully_seeded(), 0);
    }

    #[test]
    fn test_request_countdown_triggers_once_per_thresh() {
        let drng = test_drng();
        let mut triggers = 0;
        for _ in 0..RESEED_THRESH {
            if drng.request_elapsed() {
                triggers += 1;
            }
        }
        assert_eq!(triggers, 1);
    }

    #[test]
    fn test_generate_request_size_bounded() {
        let drng = test_drng();
        drng.seed(&[1; 48], true, "test").unwrap();

        let mut out = vec![0u8; MAX_REQSIZE + 1];
        assert!(matches!(
            drng.generate(&mut out),
            Err(EsdmError::InvalidArgument(_))
        ));

        let mut ok = vec![0u8; MAX_REQSIZE];
        assert_eq!(drng.generate(&mut ok).unwrap(), MAX_REQSIZE);
    }

    #[test]
    fn test_unset_fully_seeded_forces_reseed() {
        let drng = test_drng();
        drng.seed(&[1; 48], true, "test").unwrap();

        drng.unset_fully_seeded();
        assert!(!drng.fully_seeded());
        assert!(drng.force_reseed());
    }

    #[test]
    fn test_teardown_refuses_service() {
        let drng = test_drng();
        drng.seed(&[1; 48], true, "test").unwrap();
        drng.teardown();

        let mut out = [0u8; 16];
        assert!(matches!(
            drng.generate(&mut out),
            Err(EsdmError::NotInitialized)
        ));
        assert!(matches!(
            drng.seed(&[1; 48], true, "test"),
            Err(EsdmError::NotInitialized)
        ));
    }

    #[test]
    fn test_selftest_passes() {
        test_drng().selftest().unwrap();
    }
}
