//! DRNG manager: the ESDM context object and the generate path.
//!
//! [`Esdm`] owns the configuration, the seed-state machine, the
//! entropy-source manager, the per-node DRNG pool and the atomic DRNG.
//! Workers receive a shared handle; there are no hidden singletons.
//! Blocking output is gated on the seed state, chunked at the DRBG
//! request limit, and every chunk re-evaluates the reseed predicates.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::EsdmConfig;
use crate::crypto::{drng_cb, hash_cb, DrngKind, HashKind};
use crate::drng::atomic::AtomicDrng;
use crate::drng::instance::Drng;
use crate::drng::pool::NodePool;
use crate::sources::{EntropySource, EsManager, KernelRngSource, SourceKind, TimerJitterSource};
use crate::state::{SeedStage, SeedState};
use crate::{EsdmError, MAX_REQSIZE};

/// Builder for the [`Esdm`] context.
///
/// Registers entropy sources, selects the crypto callbacks and applies
/// configuration before init runs the self tests and the first seeding.
pub struct EsdmBuilder {
    config: Arc<EsdmConfig>,
    sources: Vec<Arc<dyn EntropySource>>,
    drng_kind: DrngKind,
    hash_kind: HashKind,
    default_sources: bool,
}

impl EsdmBuilder {
    /// Starts a builder with default configuration and sources.
    pub fn new() -> Self {
        Self {
            config: Arc::new(EsdmConfig::new()),
            sources: Vec::new(),
            drng_kind: DrngKind::default(),
            hash_kind: HashKind::default(),
            default_sources: true,
        }
    }

    /// Uses the given configuration handle.
    pub fn with_config(mut self, config: Arc<EsdmConfig>) -> Self {
        self.config = config;
        self
    }

    /// Registers an external entropy-source driver.
    pub fn with_source(mut self, source: Arc<dyn EntropySource>) -> Self {
        self.sources.push(source);
        self
    }

    /// Skips registration of the built-in jitter and kernel-RNG sources.
    pub fn without_default_sources(mut self) -> Self {
        self.default_sources = false;
        self
    }

    /// Selects the DRNG implementation.
    pub fn with_drng(mut self, kind: DrngKind) -> Self {
        self.drng_kind = kind;
        self
    }

    /// Selects the conditioning hash.
    pub fn with_hash(mut self, kind: HashKind) -> Self {
        self.hash_kind = kind;
        self
    }

    /// Initializes the service: allocates the DRNG pool, runs all self
    /// tests (fatal on failure) and performs the initial seeding.
    pub fn build(self) -> Result<Arc<Esdm>, EsdmError> {
        self.config.apply_fips_defaults();

        let mut sources = self.sources;
        if self.default_sources {
            let have_jitter = sources.iter().any(|s| s.kind() == SourceKind::Jitter);
            let have_kernel_rng = sources.iter().any(|s| s.kind() == SourceKind::KernelRng);
            if !have_jitter {
                sources.push(Arc::new(TimerJitterSource::new()));
            }
            if !have_kernel_rng {
                sources.push(Arc::new(KernelRngSource::new()));
            }
        }

        let esm = EsManager::new(Arc::clone(&self.config), sources)?;
        let pool = NodePool::new(
            drng_cb(self.drng_kind),
            hash_cb(self.hash_kind),
            self.config.online_nodes(),
        )?;

        let esdm = Arc::new(Esdm {
            config: self.config,
            state: SeedState::new(),
            esm,
            pool,
            atomic: AtomicDrng::new(),
            seed_lock: Mutex::new(()),
            crypto_update: Mutex::new(()),
            avail: AtomicBool::new(true),
        });

        esdm.selftest()?;
        tracing::info!(
            version = crate::VERSION,
            nodes = esdm.pool.node_count(),
            fips = esdm.config.fips_enabled(),
            "ESDM initialized"
        );

        // Initial seeding from whatever the sources deliver right now.
        esdm.es_add_entropy();
        Ok(esdm)
    }
}

impl Default for EsdmBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The ESDM context: entropy accounting, DRNG pool and output paths.
pub struct Esdm {
    pub(crate) config: Arc<EsdmConfig>,
    pub(crate) state: SeedState,
    pub(crate) esm: EsManager,
    pub(crate) pool: NodePool,
    pub(crate) atomic: AtomicDrng,
    /// Pool-global trylock: admits at most one seeding worker.
    pub(crate) seed_lock: Mutex<()>,
    /// Serializes crypto-callback swaps.
    crypto_update: Mutex<()>,
    avail: AtomicBool,
}

impl Esdm {
    /// True while the service accepts requests.
    pub fn available(&self) -> bool {
        self.avail.load(Ordering::Acquire)
    }

    /// Runs the crypto and source self tests.
    ///
    /// Fatal at init; also callable on demand for health monitoring.
    pub fn selftest(&self) -> Result<(), EsdmError> {
        self.pool.init_drng().selftest()?;
        self.esm.self_test()?;
        Ok(())
    }

    /// Blocks until the service is operational, then generates.
    pub fn get_random_bytes_full(&self, out: &mut [u8]) -> Result<usize, EsdmError> {
        self.state.wait_for(SeedStage::Operational, false)?;
        self.drng_get_sleep(out)
    }

    /// Non-blocking variant of [`Self::get_random_bytes_full`].
    pub fn try_get_random_bytes_full(&self, out: &mut [u8]) -> Result<usize, EsdmError> {
        self.state.wait_for(SeedStage::Operational, true)?;
        self.drng_get_sleep(out)
    }

    /// Bounded-wait variant of [`Self::get_random_bytes_full`].
    pub fn get_random_bytes_full_timeout(
        &self,
        out: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, EsdmError> {
        self.state.wait_for_timeout(SeedStage::Operational, timeout)?;
        self.drng_get_sleep(out)
    }

    /// Blocks until minimally seeded, then generates.
    pub fn get_random_bytes_min(&self, out: &mut [u8]) -> Result<usize, EsdmError> {
        self.state.wait_for(SeedStage::MinSeeded, false)?;
        self.drng_get_sleep(out)
    }

    /// Non-blocking variant of [`Self::get_random_bytes_min`].
    pub fn try_get_random_bytes_min(&self, out: &mut [u8]) -> Result<usize, EsdmError> {
        self.state.wait_for(SeedStage::MinSeeded, true)?;
        self.drng_get_sleep(out)
    }

    /// Best-effort output: generates immediately, whatever the seed
    /// level. Pre-seeded callers receive the init DRNG's current output.
    pub fn get_random_bytes(&self, out: &mut [u8]) -> Result<usize, EsdmError> {
        self.drng_get_sleep(out)
    }

    /// Best-effort output from the atomic DRNG.
    ///
    /// For callers that cannot tolerate blocking or allocation; never
    /// suitable when fully-seeded output is required.
    pub fn get_random_bytes_atomic(&self, out: &mut [u8]) -> Result<usize, EsdmError> {
        if !self.available() {
            return Err(EsdmError::NotInitialized);
        }
        self.atomic.generate(out)
    }

    /// Selects the caller's node DRNG and serves the request.
    fn drng_get_sleep(&self, out: &mut [u8]) -> Result<usize, EsdmError> {
        let node = self.config.curr_node();
        let drng = self.pool.select(node);
        self.drng_get(&drng, out)
    }

    /// Chunked generate with per-chunk reseed evaluation.
    fn drng_get(&self, drng: &Arc<Drng>, out: &mut [u8]) -> Result<usize, EsdmError> {
        if !self.available() {
            return Err(EsdmError::NotInitialized);
        }
        if out.is_empty() {
            return Ok(0);
        }

        if drng.requests_since_fully_seeded() > self.config.drng_max_wo_reseed() {
            drng.unset_fully_seeded();
            self.state.set_all_nodes_seeded(false);
            if Arc::ptr_eq(drng, self.pool.init_drng()) {
                self.state.unset_fully_seeded();
            }
        }

        let mut processed = 0usize;
        for chunk in out.chunks_mut(MAX_REQSIZE) {
            if self.must_reseed(drng) {
                match self.seed_lock.try_lock() {
                    Ok(_guard) => {
                        self.drng_seed(drng);
                        if self.pool.all_fully_seeded() {
                            self.state.set_all_nodes_seeded(true);
                        }
                    }
                    // A seeding worker is already running; it will
                    // eventually satisfy the request.
                    Err(_) => drng.set_force_reseed(true),
                }
            }

            match drng.generate(chunk) {
                Ok(n) => processed += n,
                // Deliver what was already produced as a short read;
                // an immediate failure surfaces as the error itself.
                Err(err) if processed == 0 => return Err(err),
                Err(_) => break,
            }
        }

        Ok(processed)
    }

    /// Injects external entropy into the auxiliary pool.
    ///
    /// The claim is only credited for privileged writers; data always
    /// mixes in. Triggers a seeding pass so the fresh entropy is put to
    /// use promptly.
    pub fn write_data(
        &self,
        data: &[u8],
        claimed_bits: u32,
        privileged: bool,
    ) -> Result<(), EsdmError> {
        if !self.available() {
            return Err(EsdmError::NotInitialized);
        }
        self.esm.write_data(data, claimed_bits, privileged)?;
        self.es_add_entropy();
        Ok(())
    }

    /// Sum of available entropy across sources, capped.
    pub fn avail_entropy(&self) -> u32 {
        self.esm.avail_entropy()
    }

    /// True when SP 800-90C oversampling rules apply.
    pub fn sp80090c_compliant(&self) -> bool {
        self.esm.sp80090c_compliant()
    }

    /// Current global seed stage.
    pub fn seed_stage(&self) -> SeedStage {
        self.state.stage()
    }

    /// Maximum seconds between reseeds.
    pub fn reseed_max_time(&self) -> u32 {
        self.config.reseed_max_time_secs()
    }

    /// Sets the maximum seconds between reseeds.
    pub fn set_reseed_max_time(&self, secs: u32) {
        self.config.set_reseed_max_time_secs(secs);
    }

    /// Sets the CPU source rate and re-evaluates seeding.
    pub fn set_es_cpu_entropy_rate(&self, bits: u32) {
        self.config.set_es_cpu_entropy_rate(bits);
        self.es_add_entropy();
    }

    /// Sets the jitter source rate and re-evaluates seeding.
    pub fn set_es_jent_entropy_rate(&self, bits: u32) {
        self.config.set_es_jent_entropy_rate(bits);
        self.es_add_entropy();
    }

    /// Sets the kernel-RNG source rate and re-evaluates seeding.
    pub fn set_es_krng_entropy_rate(&self, bits: u32) {
        self.config.set_es_krng_entropy_rate(bits);
        self.es_add_entropy();
    }

    /// Sets the scheduler source rate and re-evaluates seeding.
    pub fn set_es_sched_entropy_rate(&self, bits: u32) {
        self.config.set_es_sched_entropy_rate(bits);
        self.es_add_entropy();
    }

    /// Swaps the conditioning hash on every DRNG.
    ///
    /// The replacement must pass its self test first; the swap is
    /// serialized by the crypto-update lock.
    pub fn update_hash_cb(&self, kind: HashKind) -> Result<(), EsdmError> {
        let _guard = self
            .crypto_update
            .lock()
            .unwrap_or_else(|e| e.into_inner());

        let cb = hash_cb(kind);
        cb.self_test()
            .map_err(|_| EsdmError::SelfTestFailed("replacement hash callback"))?;

        for (_, drng) in self.pool.iter() {
            drng.set_hash_cb(cb);
        }
        tracing::info!(hash = cb.name(), "conditioning hash swapped");
        Ok(())
    }

    /// Resets all DRNGs and drops the seed state to unseeded.
    ///
    /// Existing entropy credit is gone; subsequent blocking calls
    /// suspend until re-seeding completes.
    pub fn reset(&self) {
        tracing::warn!("ESDM reset requested");
        self.pool.reset_all();
        self.atomic.reset();
        self.state.reset();
        // Start re-earning the seed levels right away.
        self.es_add_entropy();
    }

    /// Tears the service down: refuses further requests and drops all
    /// crypto state. Seed material is wiped as the states drop.
    pub fn fini(&self) {
        self.avail.store(false, Ordering::Release);
        self.pool.teardown_all();
        self.atomic.reset();
        self.state.reset();
        tracing::info!("ESDM finalized");
    }
}

impl std::fmt::Debug for Esdm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Esdm")
            .field("stage", &self.state.stage())
            .field("nodes", &self.pool.node_count())
            .field("available", &self.available())
            .finish_non_exhaustive()
    }
}
