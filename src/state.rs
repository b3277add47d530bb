//! Seed-state machine.
//!
//! Tracks global seeding progress from unseeded to operational and wakes
//! blocked readers on every upward transition. Transitions are totally
//! ordered by the state lock; a reset drops back to unseeded and re-arms
//! the initial entropy threshold.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use serde::Serialize;

use crate::{EsdmError, INIT_ENTROPY_BITS, MIN_SEED_ENTROPY_BITS};

/// Global seeding stage, ordered from least to most seeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedStage {
    /// No entropy has been credited yet.
    Unseeded,
    /// At least the minimum seed entropy was credited into a DRNG.
    MinSeeded,
    /// The full-seed threshold was met at least once.
    FullySeeded,
    /// Every online node DRNG reports fully seeded.
    Operational,
}

impl SeedStage {
    /// Returns the display name used in status reports.
    pub fn name(&self) -> &'static str {
        match self {
            SeedStage::Unseeded => "unseeded",
            SeedStage::MinSeeded => "min-seeded",
            SeedStage::FullySeeded => "fully seeded",
            SeedStage::Operational => "operational",
        }
    }
}

/// Seed-state machine with an attached wait queue.
///
/// Waiters suspend on the condition variable until the stage reaches the
/// level they need. The waiter count feeds the atomic-DRNG seeding
/// decision: direct entropy-source seeding of the emergency DRNG is only
/// permitted while nobody is waiting here.
#[derive(Debug)]
pub struct SeedState {
    stage: Mutex<SeedStage>,
    cond: Condvar,
    /// Entropy threshold (bits) the next injection must meet to advance.
    entropy_thresh: AtomicU32,
    waiters: AtomicU32,
}

impl SeedState {
    /// Creates the state machine in the unseeded stage.
    pub fn new() -> Self {
        Self {
            stage: Mutex::new(SeedStage::Unseeded),
            cond: Condvar::new(),
            entropy_thresh: AtomicU32::new(INIT_ENTROPY_BITS),
            waiters: AtomicU32::new(0),
        }
    }

    /// Returns the current stage.
    pub fn stage(&self) -> SeedStage {
        *self.stage.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns true once the state machine reached `Operational`.
    pub fn operational(&self) -> bool {
        self.stage() >= SeedStage::Operational
    }

    /// Returns true once at least the minimum seed level was reached.
    pub fn min_seeded(&self) -> bool {
        self.stage() >= SeedStage::MinSeeded
    }

    /// Returns the entropy threshold the next seed must meet, in bits.
    pub fn entropy_thresh(&self) -> u32 {
        self.entropy_thresh.load(Ordering::Relaxed)
    }

    /// Returns true while at least one thread waits on the state condvar.
    pub fn has_waiters(&self) -> bool {
        self.waiters.load(Ordering::Acquire) > 0
    }

    /// Records the outcome of a seed injection into the init path.
    ///
    /// `credited_bits` is the entropy credited by the injection,
    /// `full_thresh_bits` the oversampling-aware full-seed threshold.
    /// Promotes the stage as far as the credit allows and wakes waiters
    /// on every upward step.
    pub fn init_ops(&self, credited_bits: u32, full_thresh_bits: u32) {
        let mut stage = self.stage.lock().unwrap_or_else(|e| e.into_inner());
        let before = *stage;

        if *stage < SeedStage::FullySeeded && credited_bits >= full_thresh_bits {
            *stage = SeedStage::FullySeeded;
            self.entropy_thresh.store(full_thresh_bits, Ordering::Relaxed);
        } else if *stage < SeedStage::MinSeeded && credited_bits >= MIN_SEED_ENTROPY_BITS {
            *stage = SeedStage::MinSeeded;
            self.entropy_thresh.store(full_thresh_bits, Ordering::Relaxed);
        }

        if *stage > before {
            tracing::info!(from = before.name(), to = stage.name(), "seed state advanced");
            self.cond.notify_all();
        }
    }

    /// Promotes to or demotes from the operational stage.
    ///
    /// Called by the seed worker once all (or no longer all) online node
    /// DRNGs report fully seeded.
    pub fn set_all_nodes_seeded(&self, seeded: bool) {
        let mut stage = self.stage.lock().unwrap_or_else(|e| e.into_inner());
        if seeded && *stage >= SeedStage::FullySeeded && *stage < SeedStage::Operational {
            *stage = SeedStage::Operational;
            tracing::info!("all node DRNGs fully seeded, ESDM operational");
            self.cond.notify_all();
        } else if !seeded && *stage == SeedStage::Operational {
            *stage = SeedStage::FullySeeded;
            tracing::warn!("node DRNG lost its seed state, ESDM no longer operational");
        }
    }

    /// Demotes below the fully-seeded stage after a DRNG starved.
    pub fn unset_fully_seeded(&self) {
        let mut stage = self.stage.lock().unwrap_or_else(|e| e.into_inner());
        if *stage > SeedStage::MinSeeded {
            *stage = SeedStage::MinSeeded;
            tracing::warn!("fully-seeded state lost, reseed required");
        }
    }

    /// Drops the state machine back to unseeded.
    pub fn reset(&self) {
        let mut stage = self.stage.lock().unwrap_or_else(|e| e.into_inner());
        *stage = SeedStage::Unseeded;
        self.entropy_thresh.store(INIT_ENTROPY_BITS, Ordering::Relaxed);
        tracing::info!("seed state reset to unseeded");
    }

    /// Blocks until the stage reaches `target`.
    ///
    /// With `nonblock` set, returns `WouldBlock` instead of suspending.
    pub fn wait_for(&self, target: SeedStage, nonblock: bool) -> Result<(), EsdmError> {
        let mut stage = self.stage.lock().unwrap_or_else(|e| e.into_inner());
        if *stage >= target {
            return Ok(());
        }
        if nonblock {
            return Err(EsdmError::WouldBlock);
        }

        self.waiters.fetch_add(1, Ordering::AcqRel);
        while *stage < target {
            stage = self.cond.wait(stage).unwrap_or_else(|e| e.into_inner());
        }
        self.waiters.fetch_sub(1, Ordering::AcqRel);
        Ok(())
    }

    /// Blocks until the stage reaches `target` or the timeout elapses.
    pub fn wait_for_timeout(&self, target: SeedStage, timeout: Duration) -> Result<(), EsdmError> {
        let mut stage = self.stage.lock().unwrap_or_else(|e| e.into_inner());
        let deadline = std::time::Instant::now() + timeout;

        self.waiters.fetch_add(1, Ordering::AcqRel);
        while *stage < target {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                self.waiters.fetch_sub(1, Ordering::AcqRel);
                return Err(EsdmError::Timeout);
            }
            let (guard, res) = self
                .cond
                .wait_timeout(stage, remaining)
                .unwrap_or_else(|e| e.into_inner());
            stage = guard;
            if res.timed_out() && *stage < target {
                self.waiters.fetch_sub(1, Ordering::AcqRel);
                return Err(EsdmError::Timeout);
            }
        }
        self.waiters.fetch_sub(1, Ordering::AcqRel);
        Ok(())
    }
}

impl Default for SeedState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_starts_unseeded() {
        let state = SeedState::new();
        assert_eq!(state.stage(), SeedStage::Unseeded);
        assert!(!state.min_seeded());
        assert!(!state.operational());
    }

    #[test]
    fn test_stage_ordering() {
        assert!(SeedStage::Unseeded < SeedStage::MinSeeded);
        assert!(SeedStage::MinSeeded < SeedStage::FullySeeded);
        assert!(SeedStage::FullySeeded < SeedStage::Operational);
    }

    #[test]
    fn test_min_seed_promotion() {
        let state = SeedState::new();
        state.init_ops(MIN_SEED_ENTROPY_BITS, 256);
        assert_eq!(state.stage(), SeedStage::MinSeeded);
    }

    #[test]
    fn test_full_seed_promotion() {
        let state = SeedState::new();
        state.init_ops(256, 256);
        assert_eq!(state.stage(), SeedStage::FullySeeded);
    }

    #[test]
    fn test_insufficient_credit_keeps_stage() {
        let state = SeedState::new();
        state.init_ops(8, 256);
        assert_eq!(state.stage(), SeedStage::Unseeded);
    }

    #[test]
    fn test_operational_requires_fully_seeded() {
        let state = SeedState::new();
        state.set_all_nodes_seeded(true);
        assert_eq!(state.stage(), SeedStage::Unseeded);

        state.init_ops(256, 256);
        state.set_all_nodes_seeded(true);
        assert_eq!(state.stage(), SeedStage::Operational);
    }

    #[test]
    fn test_reset_drops_to_unseeded() {
        let state = SeedState::new();
        state.init_ops(256, 256);
        state.set_all_nodes_seeded(true);

        state.reset();
        assert_eq!(state.stage(), SeedStage::Unseeded);
        assert_eq!(state.entropy_thresh(), INIT_ENTROPY_BITS);
    }

    #[test]
    fn test_nonblocking_wait_fails_before_seed() {
        let state = SeedState::new();
        assert!(matches!(
            state.wait_for(SeedStage::MinSeeded, true),
            Err(EsdmError::WouldBlock)
        ));
    }

    #[test]
    fn test_waiter_woken_on_promotion() {
        let state = Arc::new(SeedState::new());
        let waiter_state = Arc::clone(&state);

        let handle = thread::spawn(move || {
            waiter_state.wait_for(SeedStage::MinSeeded, false).unwrap();
            waiter_state.stage()
        });

        // Give the waiter a moment to park.
        while !state.has_waiters() {
            thread::yield_now();
        }

        state.init_ops(MIN_SEED_ENTROPY_BITS, 256);
        let observed = handle.join().unwrap();
        assert!(observed >= SeedStage::MinSeeded);
        assert!(!state.has_waiters());
    }

    #[test]
    fn test_wait_timeout_expires() {
        let state = SeedState::new();
        let res = state.wait_for_timeout(SeedStage::Operational, Duration::from_millis(10));
        assert!(matches!(res, Err(EsdmError::Timeout)));
        assert!(!state.has_waiters());
    }
}
