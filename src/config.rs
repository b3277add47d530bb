//! Runtime configuration facility.
//!
//! Process-wide, read-mostly tunables: per-source entropy rates, the
//! reseed ceilings and the FIPS override. Writers are rare and serialized
//! by a single lock. All entropy rates are clamped to the DRNG security
//! strength.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::thread;

use serde::{Deserialize, Serialize};

use crate::{DRNG_MAX_WO_RESEED_DEFAULT, RESEED_MAX_TIME_DEFAULT_SECS, SECURITY_STRENGTH_BITS};

/// Default CPU source rate: a 32th of the security strength.
///
/// The implementation of CPU noise sources cannot be reviewed, so a
/// conservative estimate is used.
pub const CPU_ENTROPY_RATE_DEFAULT: u32 = SECURITY_STRENGTH_BITS / 32;

/// Default jitter source rate: a 16th of the security strength.
///
/// The jitter source ships with a full entropy assessment, but the
/// underestimate keeps reviewers comfortable on unassessed hardware.
pub const JENT_ENTROPY_RATE_DEFAULT: u32 = SECURITY_STRENGTH_BITS / 16;

/// Default kernel-RNG source rate: full security strength.
///
/// Credited entropy drops to zero in FIPS mode regardless of this rate,
/// as the kernel RNG carries no SP 800-90B assessment.
pub const KRNG_ENTROPY_RATE_DEFAULT: u32 = SECURITY_STRENGTH_BITS;

/// Default scheduler source rate: disabled until a collector registers.
pub const SCHED_ENTROPY_RATE_DEFAULT: u32 = 0;

/// Forced FIPS mode override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForceFips {
    /// Follow the host FIPS indicator.
    #[default]
    Unset,
    /// FIPS mode forced on.
    On,
    /// FIPS mode forced off.
    Off,
}

#[derive(Debug, Clone)]
struct ConfigValues {
    es_cpu_entropy_rate_bits: u32,
    es_jent_entropy_rate_bits: u32,
    es_krng_entropy_rate_bits: u32,
    es_sched_entropy_rate_bits: u32,
    drng_max_wo_reseed: u32,
    max_nodes: u32,
    reseed_max_time_secs: u32,
    force_fips: ForceFips,
}

impl Default for ConfigValues {
    fn default() -> Self {
        Self {
            es_cpu_entropy_rate_bits: CPU_ENTROPY_RATE_DEFAULT,
            es_jent_entropy_rate_bits: JENT_ENTROPY_RATE_DEFAULT,
            es_krng_entropy_rate_bits: KRNG_ENTROPY_RATE_DEFAULT,
            es_sched_entropy_rate_bits: SCHED_ENTROPY_RATE_DEFAULT,
            drng_max_wo_reseed: DRNG_MAX_WO_RESEED_DEFAULT,
            max_nodes: u32::MAX,
            reseed_max_time_secs: RESEED_MAX_TIME_DEFAULT_SECS,
            force_fips: ForceFips::Unset,
        }
    }
}

/// File-level configuration for the daemon binary.
///
/// Every field is optional; unset fields keep the built-in default.
/// CLI arguments override file values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// CPU source entropy rate in bits per pool fill.
    pub es_cpu_entropy_rate_bits: Option<u32>,
    /// Jitter source entropy rate in bits per pool fill.
    pub es_jent_entropy_rate_bits: Option<u32>,
    /// Kernel-RNG source entropy rate in bits per pool fill.
    pub es_krng_entropy_rate_bits: Option<u32>,
    /// Scheduler source entropy rate in bits per pool fill.
    pub es_sched_entropy_rate_bits: Option<u32>,
    /// Generate-call ceiling before a DRNG loses its fully-seeded state.
    pub drng_max_wo_reseed: Option<u32>,
    /// Upper limit of per-node DRNG instances.
    pub max_nodes: Option<u32>,
    /// Maximum seconds between reseeds; 0 reseeds before every generate.
    pub reseed_max_time_secs: Option<u32>,
    /// FIPS mode override.
    pub force_fips: Option<ForceFips>,
}

/// Process-wide runtime configuration.
///
/// Shared by reference between the daemon, the entropy-source manager and
/// the reseed scheduler. Rate setters clamp to the security strength; the
/// owning context re-evaluates seeding after every rate change.
#[derive(Debug)]
pub struct EsdmConfig {
    values: Mutex<ConfigValues>,
}

fn entropy_rate_max(val: u32) -> u32 {
    val.min(SECURITY_STRENGTH_BITS)
}

impl EsdmConfig {
    /// Creates a configuration with built-in defaults.
    pub fn new() -> Self {
        Self {
            values: Mutex::new(ConfigValues::default()),
        }
    }

    /// Creates a configuration from file values.
    pub fn from_file_config(file: &FileConfig) -> Self {
        let config = Self::new();
        {
            let mut values = config.values.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(v) = file.es_cpu_entropy_rate_bits {
                values.es_cpu_entropy_rate_bits = entropy_rate_max(v);
            }
            if let Some(v) = file.es_jent_entropy_rate_bits {
                values.es_jent_entropy_rate_bits = entropy_rate_max(v);
            }
            if let Some(v) = file.es_krng_entropy_rate_bits {
                values.es_krng_entropy_rate_bits = entropy_rate_max(v);
            }
            if let Some(v) = file.es_sched_entropy_rate_bits {
                values.es_sched_entropy_rate_bits = entropy_rate_max(v);
            }
            if let Some(v) = file.drng_max_wo_reseed {
                values.drng_max_wo_reseed = v;
            }
            if let Some(v) = file.max_nodes {
                values.max_nodes = v;
            }
            if let Some(v) = file.reseed_max_time_secs {
                values.reseed_max_time_secs = v;
            }
            if let Some(v) = file.force_fips {
                values.force_fips = v;
            }
        }
        config.apply_fips_defaults();
        config
    }

    fn values(&self) -> ConfigValues {
        self.values.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Raises the jitter rate to full strength in FIPS mode.
    ///
    /// The jitter source is defined to deliver full entropy in FIPS mode
    /// unless the user overrode the default, or the built-in default is
    /// zero (an RBG2 construction that excludes the jitter source).
    pub fn apply_fips_defaults(&self) {
        if !self.fips_enabled() || JENT_ENTROPY_RATE_DEFAULT == 0 {
            return;
        }
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        if values.es_jent_entropy_rate_bits == JENT_ENTROPY_RATE_DEFAULT {
            values.es_jent_entropy_rate_bits = SECURITY_STRENGTH_BITS;
            tracing::info!("jitter source raised to full entropy for FIPS mode");
        }
    }

    /// Returns the CPU source entropy rate in bits.
    pub fn es_cpu_entropy_rate(&self) -> u32 {
        self.values().es_cpu_entropy_rate_bits
    }

    /// Sets the CPU source entropy rate, clamped to the security strength.
    pub fn set_es_cpu_entropy_rate(&self, bits: u32) {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.es_cpu_entropy_rate_bits = entropy_rate_max(bits);
    }

    /// Returns the jitter source entropy rate in bits.
    pub fn es_jent_entropy_rate(&self) -> u32 {
        self.values().es_jent_entropy_rate_bits
    }

    /// Sets the jitter source entropy rate, clamped to the security strength.
    pub fn set_es_jent_entropy_rate(&self, bits: u32) {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.es_jent_entropy_rate_bits = entropy_rate_max(bits);
    }

    /// Returns the kernel-RNG source entropy rate in bits.
    pub fn es_krng_entropy_rate(&self) -> u32 {
        self.values().es_krng_entropy_rate_bits
    }

    /// Sets the kernel-RNG source entropy rate, clamped to the security strength.
    pub fn set_es_krng_entropy_rate(&self, bits: u32) {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.es_krng_entropy_rate_bits = entropy_rate_max(bits);
    }

    /// Returns the scheduler source entropy rate in bits.
    pub fn es_sched_entropy_rate(&self) -> u32 {
        self.values().es_sched_entropy_rate_bits
    }

    /// Sets the scheduler source entropy rate, clamped to the security strength.
    pub fn set_es_sched_entropy_rate(&self, bits: u32) {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.es_sched_entropy_rate_bits = entropy_rate_max(bits);
    }

    /// Returns the generate-call ceiling without a full reseed.
    ///
    /// A DRNG that operates beyond this ceiling without a full-entropy
    /// reseed loses its fully-seeded status.
    pub fn drng_max_wo_reseed(&self) -> u32 {
        self.values().drng_max_wo_reseed
    }

    /// Sets the generate-call ceiling without a full reseed.
    pub fn set_drng_max_wo_reseed(&self, val: u32) {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.drng_max_wo_reseed = val;
    }

    /// Returns the configured upper limit of DRNG nodes.
    pub fn max_nodes(&self) -> u32 {
        self.values().max_nodes
    }

    /// Sets the upper limit of DRNG nodes.
    ///
    /// Takes effect for pools created afterwards; an existing pool keeps
    /// its topology.
    pub fn set_max_nodes(&self, val: u32) {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.max_nodes = val.max(1);
    }

    /// Returns the maximum seconds between reseeds.
    ///
    /// Zero means a reseed is attempted before every generate call.
    pub fn reseed_max_time_secs(&self) -> u32 {
        self.values().reseed_max_time_secs
    }

    /// Sets the maximum seconds between reseeds.
    pub fn set_reseed_max_time_secs(&self, secs: u32) {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.reseed_max_time_secs = secs;
    }

    /// Returns the FIPS override state.
    pub fn force_fips(&self) -> ForceFips {
        self.values().force_fips
    }

    /// Overrides FIPS mode detection.
    pub fn set_force_fips(&self, val: ForceFips) {
        {
            let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
            values.force_fips = val;
        }
        self.apply_fips_defaults();
    }

    /// Returns true if the process operates in FIPS mode.
    ///
    /// The override wins when set; otherwise the host FIPS indicator
    /// decides.
    pub fn fips_enabled(&self) -> bool {
        match self.force_fips() {
            ForceFips::On => true,
            ForceFips::Off => false,
            ForceFips::Unset => host_fips_enabled(),
        }
    }

    /// Returns the number of online DRNG nodes, capped by `max_nodes`.
    pub fn online_nodes(&self) -> u32 {
        let online = thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or(1);
        online.min(self.max_nodes()).max(1)
    }

    /// Returns the node index the calling thread maps to.
    pub fn curr_node(&self) -> u32 {
        let mut hasher = DefaultHasher::new();
        thread::current().id().hash(&mut hasher);
        (hasher.finish() % u64::from(self.online_nodes())) as u32
    }
}

impl Default for EsdmConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn host_fips_enabled() -> bool {
    std::fs::read_to_string("/proc/sys/crypto/fips_enabled")
        .map(|s| s.trim() == "1")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_setter_clamps_to_security_strength() {
        let config = EsdmConfig::new();
        config.set_es_cpu_entropy_rate(10_000);
        assert_eq!(config.es_cpu_entropy_rate(), SECURITY_STRENGTH_BITS);

        config.set_es_jent_entropy_rate(100);
        assert_eq!(config.es_jent_entropy_rate(), 100);
    }

    #[test]
    fn test_force_fips_overrides_host() {
        let config = EsdmConfig::new();
        config.set_force_fips(ForceFips::On);
        assert!(config.fips_enabled());

        config.set_force_fips(ForceFips::Off);
        assert!(!config.fips_enabled());
    }

    #[test]
    fn test_fips_raises_default_jitter_rate() {
        let config = EsdmConfig::new();
        assert_eq!(config.es_jent_entropy_rate(), JENT_ENTROPY_RATE_DEFAULT);

        config.set_force_fips(ForceFips::On);
        assert_eq!(config.es_jent_entropy_rate(), SECURITY_STRENGTH_BITS);
    }

    #[test]
    fn test_fips_keeps_user_jitter_rate() {
        let config = EsdmConfig::new();
        config.set_es_jent_entropy_rate(42);

        config.set_force_fips(ForceFips::On);
        assert_eq!(config.es_jent_entropy_rate(), 42);
    }

    #[test]
    fn test_file_config_overrides_defaults() {
        let file = FileConfig {
            es_krng_entropy_rate_bits: Some(64),
            max_nodes: Some(2),
            ..Default::default()
        };
        let config = EsdmConfig::from_file_config(&file);
        assert_eq!(config.es_krng_entropy_rate(), 64);
        assert_eq!(config.max_nodes(), 2);
        assert_eq!(config.reseed_max_time_secs(), RESEED_MAX_TIME_DEFAULT_SECS);
    }

    #[test]
    fn test_curr_node_within_bounds() {
        let config = EsdmConfig::new();
        config.set_max_nodes(4);
        assert!(config.curr_node() < config.online_nodes());
    }

    #[test]
    fn test_online_nodes_capped() {
        let config = EsdmConfig::new();
        config.set_max_nodes(1);
        assert_eq!(config.online_nodes(), 1);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_rate_roundtrip_clamps(bits in any::<u32>()) {
                let config = EsdmConfig::new();
                config.set_es_jent_entropy_rate(bits);
                prop_assert_eq!(
                    config.es_jent_entropy_rate(),
                    bits.min(SECURITY_STRENGTH_BITS)
                );
            }

            #[test]
            fn prop_all_rates_bounded(cpu in any::<u32>(), jent in any::<u32>(),
                                      krng in any::<u32>(), sched in any::<u32>()) {
                let config = EsdmConfig::new();
                config.set_es_cpu_entropy_rate(cpu);
                config.set_es_jent_entropy_rate(jent);
                config.set_es_krng_entropy_rate(krng);
                config.set_es_sched_entropy_rate(sched);

                for rate in [
                    config.es_cpu_entropy_rate(),
                    config.es_jent_entropy_rate(),
                    config.es_krng_entropy_rate(),
                    config.es_sched_entropy_rate(),
                ] {
                    prop_assert!(rate <= SECURITY_STRENGTH_BITS);
                }
            }
        }
    }
}
