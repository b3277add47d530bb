//! Reseed scheduling.
//!
//! Decides when a DRNG must reseed and runs the seed worker. The
//! pool-global trylock admits at most one seeding worker at any time;
//! losers flag the DRNG for a forced reseed and continue on the stale
//! seed. The worker walks the nodes in index order, staggers the seed
//! timestamps to spread time-based reseeds, and promotes the global
//! state once every node reports fully seeded.

use std::time::Duration;

use crate::drng::instance::Drng;
use crate::drng::mgr::Esdm;
use crate::RESEED_THRESH;

impl Esdm {
    /// True iff `drng` must reseed before its next output.
    ///
    /// Any of: the request countdown elapsed, a reseed was forced, or
    /// the seed is older than the configured maximum (a maximum of zero
    /// reseeds before every generate).
    pub(crate) fn must_reseed(&self, drng: &Drng) -> bool {
        let max_secs = self.config.reseed_max_time_secs();
        let time_expired = max_secs == 0
            || drng.last_seeded_elapsed() > Duration::from_secs(u64::from(max_secs));

        // The countdown must tick on every call, so keep it first.
        let elapsed = drng.request_elapsed();
        elapsed || drng.force_reseed() || time_expired
    }

    /// Seeds one DRNG from the entropy sources.
    ///
    /// The seed buffer lives on this stack frame and is wiped on drop.
    /// Zero-credit payload still mixes in; the fully-seeded flag only
    /// moves when the credit meets the oversampling-aware threshold.
    pub(crate) fn drng_seed_es(&self, drng: &Drng) {
        let osr_bits = self.esm.seed_entropy_osr(drng.fully_seeded());
        let buf = self.esm.fill_seed_buffer(osr_bits);

        if !buf.has_payload() {
            tracing::warn!("no entropy source delivered data, reseed deferred");
            drng.set_force_reseed(true);
            return;
        }

        let fully_seeded = self.esm.fully_seeded(&buf);
        match drng.seed(&buf.payload(), fully_seeded, "regular") {
            Ok(()) => {
                self.state
                    .init_ops(buf.credited_bits(), self.esm.full_seed_thresh_bits());
            }
            Err(_) => {
                // force_reseed is already set; the worker retries.
            }
        }
    }

    /// Seeds a regular DRNG and hands a fresh seed to the atomic DRNG.
    ///
    /// While the service is down, the atomic DRNG may seed directly from
    /// the sources, but only when nobody waits on the seed state.
    pub(crate) fn drng_seed(&self, drng: &Drng) {
        if self.available() {
            self.drng_seed_es(drng);
            if let Err(err) = self.atomic.seed_from_regular(drng) {
                tracing::warn!(%err, "atomic DRNG reseed from regular failed");
            }
        } else if !self.state.has_waiters() {
            let _ = self.atomic.seed_from_es(&self.esm);
        }
    }

    fn seed_work_one(&self, drng: &Drng, node: u32) {
        tracing::debug!(node, "reseed triggered for DRNG on node");
        self.drng_seed(drng);
        if drng.fully_seeded() {
            // Prevent a reseed storm across nodes.
            drng.stagger_last_seeded(node);
        }
    }

    fn seed_work_pass(&self) {
        for (node, drng) in self.pool.iter() {
            if !drng.fully_seeded() || drng.force_reseed() {
                self.seed_work_one(drng, node);
            }
        }

        if self.atomic.reseed_requested() {
            if let Err(err) = self.atomic.seed_from_regular(self.pool.init_drng()) {
                tracing::warn!(%err, "atomic DRNG forced reseed failed");
            }
        }

        if self.pool.all_fully_seeded() {
            self.state.set_all_nodes_seeded(true);
        }
    }

    /// The seed worker loop; caller holds the pool trylock.
    ///
    /// Keeps draining while the sources could still satisfy a full seed
    /// and a DRNG wants one. Pass count is bounded so a persistently
    /// failing seed callback cannot spin the worker.
    pub(crate) fn seed_work_locked(&self) {
        for _ in 0..=self.pool.node_count() {
            self.seed_work_pass();
            if self.pool.all_fully_seeded() || !self.esm.reseed_wanted() {
                break;
            }
        }
    }

    /// Runs the seed worker if no other worker is active.
    pub(crate) fn try_seed_work(&self) {
        if let Ok(_guard) = self.seed_lock.try_lock() {
            self.seed_work_locked();
        }
    }

    /// Entropy-availability tick: re-evaluates seeding immediately.
    ///
    /// Called after rate changes and external entropy injection.
    pub fn es_add_entropy(&self) {
        if !self.state.operational() || self.esm.reseed_wanted() {
            self.try_seed_work();
        }
    }

    /// Forces a meaningful reseed of the DRNG pool.
    ///
    /// Only DRNGs that are currently fully seeded are flagged (a reseed
    /// of an unseeded DRNG would change nothing), plus the atomic DRNG.
    /// If the init DRNG ran past the reseed threshold since its last
    /// full seed, only the init DRNG is forced: it is the fallback for
    /// every caller and must not starve behind the node instances.
    pub fn force_reseed(&self) {
        let init = self.pool.init_drng();

        if init.requests_since_fully_seeded() > RESEED_THRESH {
            init.set_force_reseed(init.fully_seeded());
            tracing::debug!("force reseed of init DRNG");
        } else {
            for (node, drng) in self.pool.iter() {
                drng.set_force_reseed(drng.fully_seeded());
                tracing::debug!(node, "force reseed of DRNG on node");
            }
            self.atomic.force_reseed();
        }

        self.try_seed_work();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drng::mgr::EsdmBuilder;
    use crate::sources::{MockSource, SourceKind};
    use crate::state::SeedStage;
    use crate::{EsdmConfig, ForceFips};
    use std::sync::Arc;

    fn quiet_config() -> Arc<EsdmConfig> {
        let config = Arc::new(EsdmConfig::new());
        config.set_force_fips(ForceFips::Off);
        config.set_max_nodes(1);
        config
    }

    #[test]
    fn test_worker_promotes_to_operational() {
        let mock = Arc::new(MockSource::new(SourceKind::Jitter, 256));
        let config = quiet_config();
        config.set_es_jent_entropy_rate(256);

        let esdm = EsdmBuilder::new()
            .with_config(config)
            .without_default_sources()
            .with_source(mock)
            .build()
            .unwrap();

        assert_eq!(esdm.seed_stage(), SeedStage::Operational);
        assert!(esdm.pool.all_fully_seeded());
    }

    #[test]
    fn test_quiesced_sources_stay_unseeded() {
        let mock = Arc::new(MockSource::new(SourceKind::Jitter, 0));
        let config = quiet_config();

        let esdm = EsdmBuilder::new()
            .with_config(config)
            .without_default_sources()
            .with_source(Arc::clone(&mock) as Arc<dyn crate::EntropySource>)
            .build()
            .unwrap();

        assert!(esdm.seed_stage() < SeedStage::MinSeeded);

        // Recovery: the source comes back and the tick re-seeds.
        mock.set_entropy_per_poll(256);
        esdm.set_es_jent_entropy_rate(256);
        assert_eq!(esdm.seed_stage(), SeedStage::Operational);
    }

    #[test]
    fn test_must_reseed_on_countdown() {
        let mock = Arc::new(MockSource::new(SourceKind::Jitter, 256));
        let config = quiet_config();
        config.set_es_jent_entropy_rate(256);

        let esdm = EsdmBuilder::new()
            .with_config(config)
            .without_default_sources()
            .with_source(mock)
            .build()
            .unwrap();

        let drng = esdm.pool.init_drng();
        let mut triggered = 0;
        for _ in 0..RESEED_THRESH {
            if esdm.must_reseed(drng) {
                triggered += 1;
            }
        }
        assert_eq!(triggered, 1);
    }

    #[test]
    fn test_must_reseed_every_time_with_zero_max_time() {
        let mock = Arc::new(MockSource::new(SourceKind::Jitter, 256));
        let config = quiet_config();
        config.set_es_jent_entropy_rate(256);
        config.set_reseed_max_time_secs(0);

        let esdm = EsdmBuilder::new()
            .with_config(config)
            .without_default_sources()
            .with_source(mock)
            .build()
            .unwrap();

        let drng = esdm.pool.init_drng();
        assert!(esdm.must_reseed(drng));
        assert!(esdm.must_reseed(drng));
    }

    #[test]
    fn test_force_reseed_flags_only_fully_seeded() {
        let mock = Arc::new(MockSource::new(SourceKind::Jitter, 256));
        let config = quiet_config();
        config.set_es_jent_entropy_rate(256);

        let esdm = EsdmBuilder::new()
            .with_config(config)
            .without_default_sources()
            .with_source(Arc::clone(&mock) as Arc<dyn crate::EntropySource>)
            .build()
            .unwrap();
        assert_eq!(esdm.seed_stage(), SeedStage::Operational);

        // Quiesce so the forced flag survives the worker run.
        mock.set_entropy_per_poll(0);
        esdm.force_reseed();

        // The worker re-seeded with zero credit: the DRNG stays in its
        // fully-seeded epoch and the state machine stays operational.
        assert_eq!(esdm.seed_stage(), SeedStage::Operational);
        assert!(esdm.pool.init_drng().fully_seeded());
    }

    #[test]
    fn test_force_reseed_remains_operational() {
        let mock = Arc::new(MockSource::new(SourceKind::Jitter, 256));
        let config = quiet_config();
        config.set_es_jent_entropy_rate(256);

        let esdm = EsdmBuilder::new()
            .with_config(config)
            .without_default_sources()
            .with_source(mock)
            .build()
            .unwrap();

        esdm.force_reseed();
        let mut out = [0u8; 32];
        esdm.get_random_bytes_full(&mut out).unwrap();
        esdm.force_reseed();

        assert_eq!(esdm.seed_stage(), SeedStage::Operational);
    }

    #[test]
    fn test_concurrent_seed_workers_exclusive() {
        use std::sync::atomic::{AtomicU32, Ordering};
        use std::thread;

        let mock = Arc::new(MockSource::new(SourceKind::Jitter, 256));
        let config = quiet_config();
        config.set_es_jent_entropy_rate(256);

        let esdm = EsdmBuilder::new()
            .with_config(config)
            .without_default_sources()
            .with_source(mock)
            .build()
            .unwrap();

        // Hold the pool lock so every contender takes the loser branch.
        let guard = esdm.seed_lock.try_lock().unwrap();
        let winners = Arc::new(AtomicU32::new(0));

        thread::scope(|s| {
            for _ in 0..4 {
                let esdm = Arc::clone(&esdm);
                let winners = Arc::clone(&winners);
                s.spawn(move || {
                    if esdm.seed_lock.try_lock().is_ok() {
                        winners.fetch_add(1, Ordering::SeqCst);
                    } else {
                        esdm.pool.init_drng().set_force_reseed(true);
                    }
                });
            }
        });

        assert_eq!(winners.load(Ordering::SeqCst), 0);
        assert!(esdm.pool.init_drng().force_reseed());
        drop(guard);
    }
}
