//! Status reporting.
//!
//! The formatted multi-line report served to clients and the
//! serializable snapshot handed to observers (the in-process stand-in
//! for the read-only shared status page front-ends consume).

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::drng::Esdm;
use crate::sources::SourceStatus;
use crate::state::SeedStage;

/// Version of the status snapshot layout.
pub const STATUS_VERSION: u32 = 1;

/// Maximum length of the rendered info text carried in a snapshot.
const INFO_MAX_LEN: usize = 1024;

/// Per-node DRNG state for reports.
#[derive(Debug, Clone, Serialize)]
pub struct DrngStatus {
    /// Node index; 0 is the init DRNG.
    pub node: u32,
    /// DRNG implementation name.
    pub drng: &'static str,
    /// True once the instance received a full-entropy seed.
    pub fully_seeded: bool,
    /// Seconds since the last seed injection.
    pub last_seeded_secs: u64,
    /// Generate calls remaining until the next mandatory reseed.
    pub requests_remaining: i32,
    /// Generate calls since the last full-entropy seed.
    pub requests_since_fully_seeded: u32,
}

/// Observer-facing snapshot of the service state.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    /// Snapshot layout version.
    pub version: u32,
    /// Snapshot creation time.
    pub timestamp: DateTime<Utc>,
    /// Rendered status report, truncated to the page limit.
    pub info: String,
    /// Global seed stage.
    pub stage: SeedStage,
    /// True once every node DRNG is fully seeded.
    pub operational: bool,
    /// True while the service wants more entropy from writers.
    pub need_entropy: bool,
    /// FIPS mode indicator.
    pub fips: bool,
    /// SP 800-90C compliance indicator.
    pub sp80090c: bool,
    /// Available entropy across sources, capped.
    pub avail_entropy_bits: u32,
    /// Per-source state.
    pub sources: Vec<SourceStatus>,
    /// Per-node DRNG state.
    pub drngs: Vec<DrngStatus>,
}

impl Esdm {
    fn drng_status(&self) -> Vec<DrngStatus> {
        self.pool
            .iter()
            .map(|(node, drng)| DrngStatus {
                node,
                drng: drng.drng_name(),
                fully_seeded: drng.fully_seeded(),
                last_seeded_secs: drng.last_seeded_elapsed().as_secs(),
                requests_remaining: drng.requests_remaining(),
                requests_since_fully_seeded: drng.requests_since_fully_seeded(),
            })
            .collect()
    }

    /// Renders the multi-line status report.
    pub fn status(&self) -> String {
        let stage = self.state.stage();
        let mut out = String::new();

        let _ = writeln!(out, "ESDM library version: {}", crate::VERSION);
        let _ = writeln!(out, "FIPS mode enabled: {}", self.config.fips_enabled());
        let _ = writeln!(out, "SP800-90C compliance: {}", self.sp80090c_compliant());
        let _ = writeln!(out, "Global state: {}", stage.name());
        let _ = writeln!(out, "Available entropy: {} bits", self.avail_entropy());

        let _ = writeln!(out, "Entropy sources:");
        for source in self.esm.source_status() {
            let _ = writeln!(
                out,
                " {}: rate {} bits, available {} bits, {}",
                source.name,
                source.rate_bits,
                source.avail_bits,
                if source.healthy { "healthy" } else { "unhealthy" },
            );
        }

        let _ = writeln!(out, "DRNG pool ({} nodes):", self.pool.node_count());
        for drng in self.drng_status() {
            let _ = writeln!(
                out,
                " node {} [{}]: {}, last seeded {} s ago, {} requests to reseed, {} since fully seeded",
                drng.node,
                drng.drng,
                if drng.fully_seeded {
                    "fully seeded"
                } else {
                    "not fully seeded"
                },
                drng.last_seeded_secs,
                drng.requests_remaining,
                drng.requests_since_fully_seeded,
            );
        }

        let _ = writeln!(
            out,
            "Atomic DRNG: {}",
            if self.atomic.fully_seeded() {
                "fully seeded"
            } else {
                "not fully seeded"
            }
        );

        out
    }

    /// Builds the observer snapshot.
    pub fn status_snapshot(&self) -> StatusSnapshot {
        let stage = self.state.stage();
        let mut info = self.status();
        info.truncate(INFO_MAX_LEN);

        StatusSnapshot {
            version: STATUS_VERSION,
            timestamp: Utc::now(),
            info,
            stage,
            operational: stage >= SeedStage::Operational,
            need_entropy: stage < SeedStage::FullySeeded,
            fips: self.config.fips_enabled(),
            sp80090c: self.sp80090c_compliant(),
            avail_entropy_bits: self.avail_entropy(),
            sources: self.esm.source_status(),
            drngs: self.drng_status(),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::drng::EsdmBuilder;
    use crate::sources::{MockSource, SourceKind};
    use crate::{EsdmConfig, ForceFips};
    use std::sync::Arc;

    fn test_esdm() -> Arc<crate::Esdm> {
        let config = Arc::new(EsdmConfig::new());
        config.set_force_fips(ForceFips::Off);
        config.set_max_nodes(1);
        config.set_es_jent_entropy_rate(256);

        EsdmBuilder::new()
            .with_config(config)
            .without_default_sources()
            .with_source(Arc::new(MockSource::new(SourceKind::Jitter, 256)))
            .build()
            .unwrap()
    }

    #[test]
    fn test_status_mentions_all_sections() {
        let esdm = test_esdm();
        let status = esdm.status();

        assert!(status.contains("ESDM library version"));
        assert!(status.contains("Global state: operational"));
        assert!(status.contains("mock"));
        assert!(status.contains("node 0"));
    }

    #[test]
    fn test_snapshot_reflects_operational_state() {
        let esdm = test_esdm();
        let snapshot = esdm.status_snapshot();

        assert_eq!(snapshot.version, super::STATUS_VERSION);
        assert!(snapshot.operational);
        assert!(!snapshot.need_entropy);
        assert!(snapshot.info.len() <= 1024);
        assert_eq!(snapshot.drngs.len(), 1);
        assert!(snapshot.drngs[0].fully_seeded);
    }

    #[test]
    fn test_snapshot_serializes() {
        let esdm = test_esdm();
        let snapshot = esdm.status_snapshot();
        let toml = toml::to_string(&snapshot);
        assert!(toml.is_ok());
    }
}
