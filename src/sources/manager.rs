//! Entropy-source manager.
//!
//! Aggregates per-source entropy estimates into seed buffers. Sources
//! are independent: a failing health test or poll degrades that source
//! for the seed at hand and the rest proceed. All crediting is capped by
//! the configured per-source rate and the security strength, with the
//! aggregate bounded by the oversampling-aware full-seed threshold.

use std::sync::Arc;

use serde::Serialize;

use crate::config::EsdmConfig;
use crate::sources::{
    AuxSource, EntropySource, SeedBuffer, SourceKind, SourceRegistry, SEED_SLOT_BYTES,
};
use crate::{EsdmError, INIT_ENTROPY_BITS, OVERSAMPLE_SLACK_BITS, SECURITY_STRENGTH_BITS};

/// Status of one registered source for reports.
#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    /// Driver name.
    pub name: &'static str,
    /// Slot the driver feeds.
    pub kind: SourceKind,
    /// Configured entropy rate in bits per pool fill.
    pub rate_bits: u32,
    /// Entropy the driver estimates as currently available, rate-capped.
    pub avail_bits: u32,
    /// Health-test verdict at snapshot time.
    pub healthy: bool,
}

/// Entropy-source manager: owns the source table and builds seed buffers.
pub struct EsManager {
    registry: SourceRegistry,
    aux: Arc<AuxSource>,
    config: Arc<EsdmConfig>,
}

impl EsManager {
    /// Creates the manager, registering the auxiliary pool plus the
    /// given collectors.
    pub fn new(
        config: Arc<EsdmConfig>,
        sources: Vec<Arc<dyn EntropySource>>,
    ) -> Result<Self, EsdmError> {
        let mut registry = SourceRegistry::new();
        let aux = Arc::new(AuxSource::new());
        registry.register(aux.clone())?;
        for source in sources {
            registry.register(source)?;
        }
        Ok(Self {
            registry,
            aux,
            config,
        })
    }

    /// Runs every registered source's health test.
    ///
    /// Fatal at init: a single failure refuses service startup.
    pub fn self_test(&self) -> Result<(), EsdmError> {
        for source in self.registry.iter() {
            source.self_test().map_err(|err| {
                tracing::error!(source = source.name(), %err, "source self test failed");
                EsdmError::SelfTestFailed("entropy source self test")
            })?;
        }
        Ok(())
    }

    /// Configured credit ceiling for one slot.
    fn rate_for(&self, kind: SourceKind) -> u32 {
        match kind {
            SourceKind::Cpu => self.config.es_cpu_entropy_rate(),
            SourceKind::Jitter => self.config.es_jent_entropy_rate(),
            // The kernel RNG has no SP 800-90B assessment; its credit is
            // void in FIPS mode.
            SourceKind::KernelRng => {
                if self.config.fips_enabled() {
                    0
                } else {
                    self.config.es_krng_entropy_rate()
                }
            }
            SourceKind::Sched => self.config.es_sched_entropy_rate(),
            SourceKind::Aux => SECURITY_STRENGTH_BITS,
        }
    }

    /// True when SP 800-90C oversampling rules apply.
    pub fn sp80090c_compliant(&self) -> bool {
        cfg!(feature = "oversample") && self.config.fips_enabled()
    }

    /// Full-seed threshold in bits under the current oversampling policy.
    pub fn full_seed_thresh_bits(&self) -> u32 {
        if self.sp80090c_compliant() {
            SECURITY_STRENGTH_BITS + OVERSAMPLE_SLACK_BITS
        } else {
            SECURITY_STRENGTH_BITS
        }
    }

    /// Entropy amount to request for a seed of a DRNG in the given state.
    ///
    /// A DRNG that never reached fully seeded gets extra headroom so the
    /// initial promotions happen promptly.
    pub fn seed_entropy_osr(&self, fully_seeded: bool) -> u32 {
        let mut bits = self.full_seed_thresh_bits();
        if !fully_seeded {
            bits += INIT_ENTROPY_BITS;
        }
        bits
    }

    /// Polls every source into a fresh seed buffer.
    ///
    /// Each slot is filled with up to `requested_bits` worth of payload;
    /// the credit per slot is the minimum of the driver's claim, the
    /// configured rate and the security strength.
    pub fn fill_seed_buffer(&self, requested_bits: u32) -> SeedBuffer {
        let mut buf = SeedBuffer::new(self.full_seed_thresh_bits(), requested_bits);
        let slot_bits = (SEED_SLOT_BYTES * 8) as u32;

        for source in self.registry.iter() {
            let kind = source.kind();

            if let Err(err) = source.self_test() {
                tracing::warn!(source = source.name(), %err, "source skipped for this seed");
                continue;
            }

            let request = requested_bits.min(slot_bits);
            let delivery = match source.poll(buf.slot_mut(kind), request) {
                Ok(delivery) => delivery,
                Err(err) => {
                    tracing::warn!(source = source.name(), %err, "source poll failed");
                    continue;
                }
            };

            let credit = delivery
                .entropy_bits
                .min(self.rate_for(kind))
                .min(SECURITY_STRENGTH_BITS);
            buf.set_slot(kind, delivery.bytes, credit);

            tracing::trace!(
                source = source.name(),
                bytes = delivery.bytes,
                credited = credit,
                "source polled into seed buffer"
            );
        }

        tracing::debug!(
            requested = requested_bits,
            credited = buf.credited_bits(),
            "seed buffer filled"
        );
        buf
    }

    /// True iff the buffer's credit meets the full-seed threshold.
    pub fn fully_seeded(&self, buf: &SeedBuffer) -> bool {
        buf.credited_bits() >= self.full_seed_thresh_bits()
    }

    /// Sum of available entropy across sources, rate-capped per source
    /// and bounded by the full-seed threshold.
    pub fn avail_entropy(&self) -> u32 {
        let sum = self
            .registry
            .iter()
            .map(|s| s.entropy_available().min(self.rate_for(s.kind())))
            .fold(0u32, u32::saturating_add);
        sum.min(self.full_seed_thresh_bits())
    }

    /// True while the sources could satisfy a full seed right now.
    ///
    /// The seed worker keeps draining as long as this holds and DRNGs
    /// still want entropy.
    pub fn reseed_wanted(&self) -> bool {
        self.avail_entropy() >= self.full_seed_thresh_bits()
    }

    /// Injects external entropy into the auxiliary pool.
    pub fn write_data(
        &self,
        data: &[u8],
        claimed_bits: u32,
        privileged: bool,
    ) -> Result<(), EsdmError> {
        self.aux.write(data, claimed_bits, privileged)
    }

    /// Entropy pending in the auxiliary pool.
    pub fn aux_pending_bits(&self) -> u32 {
        self.aux.pending_bits()
    }

    /// Per-source status snapshot.
    pub fn source_status(&self) -> Vec<SourceStatus> {
        self.registry
            .iter()
            .map(|s| SourceStatus {
                name: s.name(),
                kind: s.kind(),
                rate_bits: self.rate_for(s.kind()),
                avail_bits: s.entropy_available().min(self.rate_for(s.kind())),
                healthy: s.self_test().is_ok(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::MockSource;
    use crate::ForceFips;

    fn manager_with(sources: Vec<Arc<dyn EntropySource>>) -> (Arc<EsdmConfig>, EsManager) {
        let config = Arc::new(EsdmConfig::new());
        config.set_force_fips(ForceFips::Off);
        let esm = EsManager::new(Arc::clone(&config), sources).unwrap();
        (config, esm)
    }

    #[test]
    fn test_fill_credits_capped_by_rate() {
        let mock = Arc::new(MockSource::new(SourceKind::Jitter, 256));
        let (config, esm) = manager_with(vec![mock]);
        config.set_es_jent_entropy_rate(64);

        let buf = esm.fill_seed_buffer(256);
        assert_eq!(buf.slot_entropy(SourceKind::Jitter), 64);
    }

    #[test]
    fn test_full_seed_from_single_source() {
        let mock = Arc::new(MockSource::new(SourceKind::Jitter, 256));
        let (config, esm) = manager_with(vec![mock]);
        config.set_es_jent_entropy_rate(256);

        let buf = esm.fill_seed_buffer(esm.seed_entropy_osr(false));
        assert!(esm.fully_seeded(&buf));
        assert_eq!(buf.credited_bits(), 256);
    }

    #[test]
    fn test_failing_source_skipped_not_fatal() {
        let good = Arc::new(MockSource::new(SourceKind::Jitter, 256));
        let bad = Arc::new(MockSource::new(SourceKind::Cpu, 256));
        bad.set_fail_self_test(true);
        let (config, esm) =
            manager_with(vec![good, Arc::clone(&bad) as Arc<dyn EntropySource>]);
        config.set_es_jent_entropy_rate(256);
        config.set_es_cpu_entropy_rate(256);

        let buf = esm.fill_seed_buffer(256);
        assert_eq!(buf.slot_entropy(SourceKind::Cpu), 0);
        assert!(esm.fully_seeded(&buf));
    }

    #[test]
    fn test_self_test_failure_fatal_at_init() {
        let bad = Arc::new(MockSource::new(SourceKind::Cpu, 256));
        bad.set_fail_self_test(true);
        let (_config, esm) = manager_with(vec![bad]);

        assert!(matches!(
            esm.self_test(),
            Err(EsdmError::SelfTestFailed(_))
        ));
    }

    #[test]
    fn test_oversampled_threshold_in_fips() {
        let mock = Arc::new(MockSource::new(SourceKind::Jitter, 256));
        let (config, esm) = manager_with(vec![mock]);
        config.set_force_fips(ForceFips::On);

        assert!(esm.sp80090c_compliant());
        assert_eq!(esm.full_seed_thresh_bits(), 384);
        assert_eq!(esm.seed_entropy_osr(true), 384);
        assert_eq!(esm.seed_entropy_osr(false), 384 + INIT_ENTROPY_BITS);
    }

    #[test]
    fn test_fips_single_source_insufficient_for_oversampling() {
        let mock = Arc::new(MockSource::new(SourceKind::Jitter, 256));
        let (config, esm) = manager_with(vec![mock]);
        config.set_force_fips(ForceFips::On);

        // One source credits at most 256 bits, below the 384-bit
        // oversampled threshold.
        let buf = esm.fill_seed_buffer(esm.seed_entropy_osr(false));
        assert!(!esm.fully_seeded(&buf));
    }

    #[test]
    fn test_fips_two_sources_meet_oversampling() {
        let jitter = Arc::new(MockSource::new(SourceKind::Jitter, 256));
        let cpu = Arc::new(MockSource::new(SourceKind::Cpu, 256));
        let (config, esm) = manager_with(vec![jitter, cpu]);
        config.set_force_fips(ForceFips::On);
        config.set_es_cpu_entropy_rate(256);

        let buf = esm.fill_seed_buffer(esm.seed_entropy_osr(false));
        assert!(esm.fully_seeded(&buf));
        assert_eq!(buf.credited_bits(), 384);
    }

    #[test]
    fn test_krng_credit_void_in_fips() {
        let krng = Arc::new(MockSource::new(SourceKind::KernelRng, 256));
        let (config, esm) = manager_with(vec![krng]);
        config.set_es_krng_entropy_rate(256);

        let buf = esm.fill_seed_buffer(256);
        assert_eq!(buf.slot_entropy(SourceKind::KernelRng), 256);

        config.set_force_fips(ForceFips::On);
        let buf = esm.fill_seed_buffer(256);
        assert_eq!(buf.slot_entropy(SourceKind::KernelRng), 0);
    }

    #[test]
    fn test_avail_entropy_rate_capped() {
        let mock = Arc::new(MockSource::new(SourceKind::Jitter, 256));
        let (config, esm) = manager_with(vec![mock]);
        config.set_es_jent_entropy_rate(32);

        assert_eq!(esm.avail_entropy(), 32);
        assert!(!esm.reseed_wanted());

        config.set_es_jent_entropy_rate(256);
        assert!(esm.reseed_wanted());
    }

    #[test]
    fn test_write_data_privileged_credit() {
        let (_config, esm) = manager_with(vec![]);
        esm.write_data(&[1u8; 64], 128, true).unwrap();
        assert_eq!(esm.aux_pending_bits(), 128);
    }

    #[test]
    fn test_write_data_unprivileged_no_credit() {
        let (_config, esm) = manager_with(vec![]);
        esm.write_data(&[1u8; 64], 128, false).unwrap();
        assert_eq!(esm.aux_pending_bits(), 0);
    }
}
