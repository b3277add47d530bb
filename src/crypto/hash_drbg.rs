//! SP 800-90A Hash-DRBG over SHA-512.
//!
//! The default DRNG. The working state is the pair (V, C) of 888-bit
//! big-endian integers plus the reseed counter. Seeding before the first
//! output is the responsibility of the DRNG manager; a freshly allocated
//! instance carries no entropy.

use sha2::{Digest, Sha512};
use zeroize::Zeroize;

use super::{CryptoError, DrngCb, DrngState};

/// Hash-DRBG seed length for SHA-512: 888 bits.
const SEEDLEN_BYTES: usize = 111;

/// Per-request generate limit: 2^19 bits.
const MAX_GENERATE_BYTES: usize = 1 << 16;

/// Hash-DRBG callback set.
#[derive(Debug, Default)]
pub struct HashDrbg;

impl DrngCb for HashDrbg {
    fn name(&self) -> &'static str {
        "hash-drbg-sha512"
    }

    fn alloc(&self, strength_bytes: usize) -> Result<Box<dyn DrngState>, CryptoError> {
        if strength_bytes > SEEDLEN_BYTES {
            return Err(CryptoError::SeedRejected("strength exceeds seed length"));
        }
        Ok(Box::new(HashDrbgState::new()))
    }

    fn self_test(&self) -> Result<(), CryptoError> {
        let seed = [0x5au8; 48];
        let mut a = HashDrbgState::new();
        let mut b = HashDrbgState::new();
        a.seed(&seed)?;
        b.seed(&seed)?;

        let mut out_a = [0u8; 64];
        let mut out_b = [0u8; 64];
        a.generate(&mut out_a)?;
        b.generate(&mut out_b)?;
        if out_a != out_b {
            return Err(CryptoError::SelfTestFailed("hash-drbg not deterministic"));
        }
        if out_a.iter().all(|&x| x == 0) {
            return Err(CryptoError::SelfTestFailed("hash-drbg all-zero output"));
        }

        // A diverging seed must diverge the stream.
        let mut c = HashDrbgState::new();
        c.seed(&[0xa5u8; 48])?;
        let mut out_c = [0u8; 64];
        c.generate(&mut out_c)?;
        if out_c == out_a {
            return Err(CryptoError::SelfTestFailed("hash-drbg seed ignored"));
        }

        // Reseeding must change the stream relative to the unreseeded twin.
        a.seed(&[0x3cu8; 48])?;
        a.generate(&mut out_a)?;
        b.generate(&mut out_b)?;
        if out_a == out_b {
            return Err(CryptoError::SelfTestFailed("hash-drbg reseed ignored"));
        }

        Ok(())
    }
}

/// Working state of one Hash-DRBG instance.
struct HashDrbgState {
    v: [u8; SEEDLEN_BYTES],
    c: [u8; SEEDLEN_BYTES],
    reseed_counter: u64,
    seeded: bool,
}

impl HashDrbgState {
    fn new() -> Self {
        Self {
            v: [0u8; SEEDLEN_BYTES],
            c: [0u8; SEEDLEN_BYTES],
            reseed_counter: 0,
            seeded: false,
        }
    }

    /// Hash_df per SP 800-90A 10.3.1: derives `SEEDLEN_BYTES` from the
    /// concatenation of `parts`.
    fn hash_df(parts: &[&[u8]], out: &mut [u8; SEEDLEN_BYTES]) {
        const OUT_BITS: u32 = (SEEDLEN_BYTES as u32) * 8;
        let mut written = 0usize;
        let mut counter: u8 = 1;

        while written < SEEDLEN_BYTES {
            let mut hasher = Sha512::new();
            hasher.update([counter]);
            hasher.update(OUT_BITS.to_be_bytes());
            for part in parts {
                hasher.update(part);
            }
            let digest = hasher.finalize();

            let take = (SEEDLEN_BYTES - written).min(digest.len());
            out[written..written + take].copy_from_slice(&digest[..take]);
            written += take;
            counter = counter.wrapping_add(1);
        }
    }

    /// Adds `src` (big-endian, right-aligned) into `dst` mod 2^888.
    fn add_be(dst: &mut [u8; SEEDLEN_BYTES], src: &[u8]) {
        let mut carry = 0u16;
        let offset = SEEDLEN_BYTES.saturating_sub(src.len());
        for i in (0..SEEDLEN_BYTES).rev() {
            let s = if i >= offset {
                src[i - offset] as u16
            } else {
                0
            };
            let sum = dst[i] as u16 + s + carry;
            dst[i] = (sum & 0xff) as u8;
            carry = sum >> 8;
        }
    }

    fn update_c(&mut self) {
        let v = self.v;
        Self::hash_df(&[&[0x00], &v], &mut self.c);
    }
}

impl DrngState for HashDrbgState {
    fn seed(&mut self, seed: &[u8]) -> Result<(), CryptoError> {
        if seed.is_empty() {
            return Err(CryptoError::SeedRejected("empty seed material"));
        }

        if !self.seeded {
            // Instantiate: V = Hash_df(entropy), C = Hash_df(0x00 || V).
            let mut v = [0u8; SEEDLEN_BYTES];
            Self::hash_df(&[seed], &mut v);
            self.v = v;
        } else {
            // Reseed: V = Hash_df(0x01 || V || entropy), C = Hash_df(0x00 || V).
            let old_v = self.v;
            let mut v = [0u8; SEEDLEN_BYTES];
            Self::hash_df(&[&[0x01], &old_v, seed], &mut v);
            self.v = v;
        }
        self.update_c();
        self.reseed_counter = 1;
        self.seeded = true;
        Ok(())
    }

    fn generate(&mut self, out: &mut [u8]) -> Result<usize, CryptoError> {
        if out.len() > MAX_GENERATE_BYTES {
            return Err(CryptoError::RequestTooLarge);
        }
        if out.is_empty() {
            return Ok(0);
        }

        // Hashgen: hash a copy of V, incrementing it per block.
        let mut data = self.v;
        let mut written = 0usize;
        while written < out.len() {
            let digest = Sha512::digest(data);
            let take = (out.len() - written).min(digest.len());
            out[written..written + take].copy_from_slice(&digest[..take]);
            written += take;
            Self::add_be(&mut data, &[0x01]);
        }
        data.zeroize();

        // V = (V + H + C + reseed_counter) mod 2^seedlen with
        // H = Hash(0x03 || V).
        let mut hasher = Sha512::new();
        hasher.update([0x03]);
        hasher.update(self.v);
        let mut h_bytes = [0u8; 64];
        h_bytes.copy_from_slice(&hasher.finalize());

        let c = self.c;
        Self::add_be(&mut self.v, &h_bytes);
        Self::add_be(&mut self.v, &c);
        Self::add_be(&mut self.v, &self.reseed_counter.to_be_bytes());
        self.reseed_counter = self.reseed_counter.wrapping_add(1);

        Ok(written)
    }
}

impl Drop for HashDrbgState {
    fn drop(&mut self) {
        self.v.zeroize();
        self.c.zeroize();
        self.reseed_counter = 0;
    }
}
