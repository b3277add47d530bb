//! Seed buffer: the fixed-layout aggregate carried to a DRNG seed input.
//!
//! One slot per source kind, each holding a byte payload plus the
//! entropy credited for it. The layout is stable within a run and the
//! byte size is known at build time. Buffers live on the seed worker's
//! stack and are wiped on drop.

use zeroize::{Zeroize, Zeroizing};

use crate::sources::SourceKind;

/// Payload capacity of one slot: security strength plus oversampling
/// slack (384 bits).
pub const SEED_SLOT_BYTES: usize = 48;

#[derive(Clone)]
struct SeedSlot {
    data: [u8; SEED_SLOT_BYTES],
    len: usize,
    entropy_bits: u32,
}

impl SeedSlot {
    const fn empty() -> Self {
        Self {
            data: [0u8; SEED_SLOT_BYTES],
            len: 0,
            entropy_bits: 0,
        }
    }
}

/// Fixed-layout seed buffer with one slot per source kind.
pub struct SeedBuffer {
    slots: [SeedSlot; SourceKind::COUNT],
    /// Aggregate credit ceiling in bits (oversampling-aware strength).
    cap_bits: u32,
    /// Entropy amount the fill requested, in bits.
    requested_bits: u32,
}

impl SeedBuffer {
    /// Creates an empty buffer whose aggregate credit is capped at
    /// `cap_bits`.
    pub fn new(cap_bits: u32, requested_bits: u32) -> Self {
        Self {
            slots: [const { SeedSlot::empty() }; SourceKind::COUNT],
            cap_bits,
            requested_bits,
        }
    }

    /// Entropy amount the fill requested, in bits.
    pub fn requested_bits(&self) -> u32 {
        self.requested_bits
    }

    /// Returns the slot payload area for a source to fill.
    pub(crate) fn slot_mut(&mut self, kind: SourceKind) -> &mut [u8; SEED_SLOT_BYTES] {
        &mut self.slots[kind.index()].data
    }

    /// Records a source's delivery into its slot.
    pub(crate) fn set_slot(&mut self, kind: SourceKind, len: usize, entropy_bits: u32) {
        let slot = &mut self.slots[kind.index()];
        slot.len = len.min(SEED_SLOT_BYTES);
        slot.entropy_bits = entropy_bits;
    }

    /// Entropy credited to one slot.
    pub fn slot_entropy(&self, kind: SourceKind) -> u32 {
        self.slots[kind.index()].entropy_bits
    }

    /// Aggregate credited entropy, capped at the buffer's ceiling.
    pub fn credited_bits(&self) -> u32 {
        let sum: u32 = self
            .slots
            .iter()
            .map(|s| s.entropy_bits)
            .fold(0, u32::saturating_add);
        sum.min(self.cap_bits)
    }

    /// Concatenated slot payloads, wiped when the return value drops.
    ///
    /// Every slot contributes its full payload area; zero-credit data
    /// still mixes into the DRNG.
    pub fn payload(&self) -> Zeroizing<Vec<u8>> {
        let mut out = Zeroizing::new(Vec::with_capacity(SourceKind::COUNT * SEED_SLOT_BYTES));
        for slot in &self.slots {
            out.extend_from_slice(&slot.data[..slot.len]);
        }
        out
    }

    /// True if any slot carries payload bytes.
    pub fn has_payload(&self) -> bool {
        self.slots.iter().any(|s| s.len > 0)
    }
}

impl Drop for SeedBuffer {
    fn drop(&mut self) {
        for slot in &mut self.slots {
            slot.data.zeroize();
            slot.len = 0;
            slot.entropy_bits = 0;
        }
    }
}

impl std::fmt::Debug for SeedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeedBuffer")
            .field("credited_bits", &self.credited_bits())
            .field("requested_bits", &self.requested_bits)
            .finish_non_exhaustive()
    }
}
