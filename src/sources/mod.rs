//! Entropy sources and their accounting.
//!
//! A source driver produces raw bytes plus a credited-entropy estimate.
//! The core only consumes the callback contract defined here; the
//! interesting collectors (CPU noise, scheduler events) live outside and
//! register at init. Built in are a timer-jitter collector, a kernel-RNG
//! collector, a deterministic mock for tests and the auxiliary slot fed
//! by external writers.

mod aux_pool;
mod jitter;
mod krng;
mod manager;
mod mock;
mod registry;
mod seed_buffer;

pub use aux_pool::AuxSource;
pub use jitter::TimerJitterSource;
pub use krng::KernelRngSource;
pub use manager::{EsManager, SourceStatus};
pub use mock::MockSource;
pub use registry::SourceRegistry;
pub use seed_buffer::{SeedBuffer, SEED_SLOT_BYTES};

use serde::Serialize;
use thiserror::Error;

/// Slot identity of an entropy source.
///
/// The seed buffer carries one fixed slot per kind; a kind can hold at
/// most one registered source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// CPU noise source (e.g. RDSEED-class instructions).
    Cpu,
    /// Timing-jitter noise source.
    Jitter,
    /// Kernel RNG (getrandom-class) source.
    KernelRng,
    /// Scheduler/interrupt event source.
    Sched,
    /// Auxiliary pool fed by external entropy writers.
    Aux,
}

impl SourceKind {
    /// All slot kinds in seed-buffer order.
    pub const ALL: [SourceKind; 5] = [
        SourceKind::Cpu,
        SourceKind::Jitter,
        SourceKind::KernelRng,
        SourceKind::Sched,
        SourceKind::Aux,
    ];

    /// Number of slot kinds.
    pub const COUNT: usize = Self::ALL.len();

    /// Stable slot index in the seed buffer.
    pub fn index(&self) -> usize {
        *self as usize
    }
}

/// Errors produced by entropy-source drivers.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The driver's health self test failed.
    #[error("source self test failed: {0}")]
    SelfTestFailed(&'static str),
    /// The driver cannot currently deliver data.
    #[error("source unavailable: {0}")]
    Unavailable(&'static str),
}

/// Result of one poll: bytes written and the entropy the driver claims
/// for them. The manager caps the claim by the configured rate and the
/// security strength before crediting.
#[derive(Debug, Clone, Copy)]
pub struct PollDelivery {
    /// Bytes written into the destination slot.
    pub bytes: usize,
    /// Entropy the driver attributes to those bytes.
    pub entropy_bits: u32,
}

/// Callback contract of an entropy-source driver.
///
/// Drivers are registered at init and never destroyed. They are polled
/// concurrently with generate traffic, so all methods take `&self` and
/// any mutable driver state is the driver's own concern.
pub trait EntropySource: Send + Sync {
    /// Driver name for logging and status reports.
    fn name(&self) -> &'static str;

    /// Slot this driver feeds.
    fn kind(&self) -> SourceKind;

    /// Upper bound of entropy bits one poll can deliver.
    fn max_entropy_bits_per_poll(&self) -> u32;

    /// Entropy bits the driver estimates it could deliver right now.
    fn entropy_available(&self) -> u32;

    /// Fills `dst` with raw data for a request of `requested_bits`.
    ///
    /// A failing driver simply credits zero; it must not clobber other
    /// sources' slots.
    fn poll(&self, dst: &mut [u8], requested_bits: u32) -> Result<PollDelivery, SourceError>;

    /// Runs the driver health test; polled sources are skipped for a
    /// seed when this fails.
    fn self_test(&self) -> Result<(), SourceError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_indices_are_stable() {
        for (i, kind) in SourceKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
        }
    }
}
