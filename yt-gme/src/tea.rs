//! 16-round TEA with the QQ-style chaining and padding used by GME AuthBuffers.
//!
//! Padded layout before encryption:
//!
//! ```text
//! [fill-2 | random<<3] (1 byte) + random (fill-1 bytes) + plaintext + 0x00 * 7
//! ```
//!
//! where `fill = 2 + ((8 - ((len + 9) % 8)) % 8)` so the total is a multiple of 8.
//!
//! Chaining is not textbook CBC. For block `i`:
//!
//! ```text
//! C[i]       = TEA(P[i] ^ pre_plain ^ pre_cipher)
//! pre_plain  = P[i] ^ pre_cipher
//! pre_cipher = C[i]
//! ```
//!
//! with both state blocks starting at zero.

use rand::{Rng, RngCore};
use tracing::debug;

use yt_core::constants::GME_KEY_LEN;
use yt_core::error::{YtError, YtResult};

const DELTA: u32 = 0x9E37_79B9;
const ROUNDS: u32 = 16;
const TRAILER_LEN: usize = 7;

type Block = [u8; 8];

/// TEA cipher bound to one 128-bit key. Holds no other state, so a single
/// instance can be shared freely across threads.
#[derive(Clone)]
pub struct TeaCipher {
    key: [u32; 4],
}

impl std::fmt::Debug for TeaCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TeaCipher").finish_non_exhaustive()
    }
}

impl TeaCipher {
    /// Build a cipher from a key of exactly 16 bytes.
    pub fn new(key: &[u8]) -> YtResult<Self> {
        if key.len() != GME_KEY_LEN {
            return Err(YtError::InvalidValue(format!(
                "key must be exactly {GME_KEY_LEN} bytes, got {}",
                key.len()
            )));
        }
        let word = |i: usize| u32::from_be_bytes([key[i], key[i + 1], key[i + 2], key[i + 3]]);
        Ok(Self {
            key: [word(0), word(4), word(8), word(12)],
        })
    }

    /// Encrypt with padding drawn from the thread-local RNG.
    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        self.encrypt_with_rng(plaintext, &mut rand::thread_rng())
    }

    /// Encrypt with padding drawn from `rng`.
    pub fn encrypt_with_rng<R: RngCore + ?Sized>(&self, plaintext: &[u8], rng: &mut R) -> Vec<u8> {
        let fill = padding_len(plaintext.len());

        let mut padded = Vec::with_capacity(fill + plaintext.len() + TRAILER_LEN);
        padded.push((rng.gen::<u8>() & 0xF8) | (fill - 2) as u8);
        padded.extend((1..fill).map(|_| rng.gen::<u8>()));
        padded.extend_from_slice(plaintext);
        padded.extend_from_slice(&[0u8; TRAILER_LEN]);

        let mut out = Vec::with_capacity(padded.len());
        let mut pre_plain: Block = [0; 8];
        let mut pre_cipher: Block = [0; 8];

        for chunk in padded.chunks_exact(8) {
            let block = to_block(chunk);
            let cipher = self.encrypt_block(xor(xor(block, pre_plain), pre_cipher));
            out.extend_from_slice(&cipher);
            pre_plain = xor(block, pre_cipher);
            pre_cipher = cipher;
        }
        out
    }

    /// Decrypt and strip padding.
    ///
    /// The seven trailing bytes are expected to be zero but are not
    /// enforced; tokens with a dirty trailer are still returned.
    pub fn decrypt(&self, ciphertext: &[u8]) -> YtResult<Vec<u8>> {
        if ciphertext.len() < 16 || ciphertext.len() % 8 != 0 {
            return Err(YtError::Decrypt(format!(
                "ciphertext length {} is not a multiple of 8 of at least 16",
                ciphertext.len()
            )));
        }

        let mut plain = Vec::with_capacity(ciphertext.len());
        let mut pre_plain: Block = [0; 8];
        let mut pre_cipher: Block = [0; 8];

        for chunk in ciphertext.chunks_exact(8) {
            let cipher = to_block(chunk);
            let block = xor(xor(self.decrypt_block(cipher), pre_plain), pre_cipher);
            plain.extend_from_slice(&block);
            pre_plain = xor(block, pre_cipher);
            pre_cipher = cipher;
        }

        let start = usize::from(plain[0] & 0x07) + 2;
        if plain.len() < start + TRAILER_LEN {
            return Err(YtError::Decrypt(format!(
                "padding of {start} bytes leaves no room in {} bytes",
                plain.len()
            )));
        }

        let end = plain.len() - TRAILER_LEN;
        if plain[end..].iter().any(|b| *b != 0) {
            debug!("authbuffer trailer is not zero-filled, accepting anyway");
        }

        Ok(plain[start..end].to_vec())
    }

    /// Encrypt a single 64-bit block.
    pub fn encrypt_block(&self, block: Block) -> Block {
        let (mut v0, mut v1) = split(block);
        let [k0, k1, k2, k3] = self.key;
        let mut sum = 0u32;

        for _ in 0..ROUNDS {
            sum = sum.wrapping_add(DELTA);
            v0 = v0.wrapping_add(
                (v1 << 4).wrapping_add(k0) ^ v1.wrapping_add(sum) ^ (v1 >> 5).wrapping_add(k1),
            );
            v1 = v1.wrapping_add(
                (v0 << 4).wrapping_add(k2) ^ v0.wrapping_add(sum) ^ (v0 >> 5).wrapping_add(k3),
            );
        }

        join(v0, v1)
    }

    /// Decrypt a single 64-bit block. Rounds run backwards and update `v1`
    /// before `v0`.
    pub fn decrypt_block(&self, block: Block) -> Block {
        let (mut v0, mut v1) = split(block);
        let [k0, k1, k2, k3] = self.key;
        let mut sum = DELTA.wrapping_mul(ROUNDS);

        for _ in 0..ROUNDS {
            v1 = v1.wrapping_sub(
                (v0 << 4).wrapping_add(k2) ^ v0.wrapping_add(sum) ^ (v0 >> 5).wrapping_add(k3),
            );
            v0 = v0.wrapping_sub(
                (v1 << 4).wrapping_add(k0) ^ v1.wrapping_add(sum) ^ (v1 >> 5).wrapping_add(k1),
            );
            sum = sum.wrapping_sub(DELTA);
        }

        join(v0, v1)
    }
}

/// Number of leading padding bytes (header byte included) for a plaintext
/// of `len` bytes. Always in `2..=9`.
pub fn padding_len(len: usize) -> usize {
    2 + (8 - (len + 9) % 8) % 8
}

/// Ciphertext size for a plaintext of `len` bytes.
pub fn ciphertext_len(len: usize) -> usize {
    padding_len(len) + len + TRAILER_LEN
}

fn to_block(chunk: &[u8]) -> Block {
    let mut block = [0u8; 8];
    block.copy_from_slice(chunk);
    block
}

fn xor(a: Block, b: Block) -> Block {
    let mut out = [0u8; 8];
    for (o, (x, y)) in out.iter_mut().zip(a.iter().zip(b.iter())) {
        *o = x ^ y;
    }
    out
}

fn split(block: Block) -> (u32, u32) {
    (
        u32::from_be_bytes([block[0], block[1], block[2], block[3]]),
        u32::from_be_bytes([block[4], block[5], block[6], block[7]]),
    )
}

fn join(v0: u32, v1: u32) -> Block {
    let mut block = [0u8; 8];
    block[..4].copy_from_slice(&v0.to_be_bytes());
    block[4..].copy_from_slice(&v1.to_be_bytes());
    block
}
