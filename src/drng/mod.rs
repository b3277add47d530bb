//! DRNG management.
//!
//! One DRNG per topology node plus the init fallback and the atomic
//! emergency instance, driven by the reseed scheduler and served through
//! the seed-state-gated generate path.

mod atomic;
mod instance;
mod mgr;
mod pool;
mod scheduler;

pub use atomic::AtomicDrng;
pub use instance::Drng;
pub use mgr::{Esdm, EsdmBuilder};
pub use pool::NodePool;
