//! Entropy Source and DRNG Manager core.
//!
//! A userspace random number service core: entropy from several
//! independent noise sources is collected, conditioned and credited, one
//! deterministic random bit generator (DRNG) per topology node is seeded
//! from it, and random bytes are served with blocking semantics gated on
//! the global seed state. Designed along NIST SP 800-90A/B/C and
//! AIS-20/31 guidance, optionally in a FIPS-enforced mode.
//!
//! # Architecture
//!
//! The system follows an explicit data flow:
//!
//! ```text
//! sources → seed buffer → DRNG pool → generate path
//!     ↓          ↓             ↓
//!   registry  accounting   seed-state machine (blocking gates)
//! ```
//!
//! # Design Principles
//!
//! - **Fail-closed**: output blocks until the credited entropy meets the
//!   threshold the caller asked for
//! - **Uses standard primitives**: SHA-512 conditioning, Hash-DRBG and
//!   ChaCha20 generation
//! - **Explicit context**: all state hangs off the [`Esdm`] handle; there
//!   are no hidden singletons
//!
//! # Example
//!
//! ```no_run
//! use esdm_core::EsdmBuilder;
//!
//! let esdm = EsdmBuilder::new().build().unwrap();
//!
//! let mut buf = [0u8; 64];
//! esdm.get_random_bytes_full(&mut buf).unwrap();
//!
//! println!("{}", esdm.status());
//! esdm.fini();
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod crypto;
pub mod drng;
pub mod sources;
pub mod state;
pub mod status;

use thiserror::Error;

// Re-export commonly used types at crate root
pub use config::{EsdmConfig, FileConfig, ForceFips};
pub use drng::{Esdm, EsdmBuilder};
pub use sources::{EntropySource, PollDelivery, SourceKind};
pub use state::{SeedStage, SeedState};
pub use status::StatusSnapshot;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// DRNG security strength in bits.
pub const SECURITY_STRENGTH_BITS: u32 = 256;

/// DRNG security strength in bytes.
pub const SECURITY_STRENGTH_BYTES: usize = (SECURITY_STRENGTH_BITS / 8) as usize;

/// Number of generate calls between mandatory reseeds.
pub const RESEED_THRESH: u32 = 1 << 12;

/// Maximum bytes a single DRBG generate invocation may produce.
pub const MAX_REQSIZE: usize = 1 << 12;

/// Default ceiling of generate calls a DRNG may serve without a full
/// reseed before it loses its fully-seeded status.
pub const DRNG_MAX_WO_RESEED_DEFAULT: u32 = 1 << 20;

/// Entropy in bits required to consider the service minimally seeded.
pub const MIN_SEED_ENTROPY_BITS: u32 = 128;

/// Entropy in bits required before the first state promotion.
pub const INIT_ENTROPY_BITS: u32 = 32;

/// SP 800-90C oversampling slack added to every seed request in
/// compliant mode.
pub const OVERSAMPLE_SLACK_BITS: u32 = 128;

/// Default maximum seconds between DRNG reseeds.
pub const RESEED_MAX_TIME_DEFAULT_SECS: u32 = 600;

/// Errors surfaced by the ESDM core.
#[derive(Debug, Error)]
pub enum EsdmError {
    /// A caller-supplied argument is out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// The manager has not been initialized or was torn down.
    #[error("ESDM not initialized")]
    NotInitialized,
    /// The requested operation is not supported in this configuration.
    #[error("operation not supported")]
    NotSupported,
    /// A non-blocking request would have to suspend.
    #[error("operation would block")]
    WouldBlock,
    /// An entropy source is unavailable for this seed operation.
    #[error("entropy source unavailable: {name}")]
    EntropySourceUnavailable {
        /// Name of the affected source.
        name: &'static str,
    },
    /// Seeding a DRNG failed; the scheduler will retry.
    #[error("DRNG seeding failed")]
    SeedFailed,
    /// A DRNG generate callback failed.
    #[error("DRNG generate failed")]
    DrngGenerateFailed,
    /// A bounded wait elapsed without the condition becoming true.
    #[error("timed out waiting for seed state")]
    Timeout,
    /// The caller lacks the privilege the operation requires.
    #[error("permission denied")]
    PermissionDenied,
    /// A power-on self test failed; the service must not start.
    #[error("self test failed: {0}")]
    SelfTestFailed(&'static str),
    /// Internal invariant violation.
    #[error("internal error: {0}")]
    Internal(&'static str),
}
