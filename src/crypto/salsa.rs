//! Hand-rolled Salsa20/12 stream cipher.
//!
//! Reduced-round Salsa20 has no mainstream RustCrypto crate exposing a
//! selectable round count, so this is implemented directly from the
//! public-domain Salsa20 core (Bernstein, http://cr.yp.to/snuffle.html),
//! with the round count fixed at 12 rather than the usual 20. Used to key
//! Poly1305 and to encrypt the payload for cipher suite
//! `POLY1305_SALSA2012`, and as the keystream source for the V0 identity
//! hashcash scratch buffer.

use zeroize::Zeroize;

const SIGMA: [u32; 4] = [0x61707865, 0x3320646e, 0x79622d32, 0x6b206574];

#[inline(always)]
fn rotl(x: u32, n: u32) -> u32 {
    x.rotate_left(n)
}

/// Salsa20/12 keystream generator, keyed with a 256-bit key and a 64-bit IV.
///
/// Keystream output is buffered a block at a time and handed out
/// byte-by-byte across calls to [`Self::keystream`] and
/// [`Self::crypt`]/[`Self::crypt_in_place`], so callers can draw a partial
/// block (e.g. 32 bytes to key Poly1305) and continue encrypting from
/// exactly where that draw left off, as a single continuous keystream.
pub struct Salsa20 {
    state: [u32; 16],
    buffer: [u8; 64],
    pos: usize,
}

impl Salsa20 {
    pub fn new(key: &[u8; 32], iv: &[u8; 8]) -> Self {
        let mut state = [0u32; 16];
        state[0] = SIGMA[0];
        state[5] = SIGMA[1];
        state[10] = SIGMA[2];
        state[15] = SIGMA[3];

        for i in 0..4 {
            state[1 + i] = u32::from_le_bytes(key[4 * i..4 * i + 4].try_into().unwrap());
            state[11 + i] = u32::from_le_bytes(key[16 + 4 * i..16 + 4 * i + 4].try_into().unwrap());
        }
        state[6] = u32::from_le_bytes(iv[0..4].try_into().unwrap());
        state[7] = u32::from_le_bytes(iv[4..8].try_into().unwrap());
        // Block counter, starts at zero.
        state[8] = 0;
        state[9] = 0;

        // `pos == 64` means the buffer is empty and must be refilled before
        // the next byte is drawn.
        Self { state, buffer: [0u8; 64], pos: 64 }
    }

    fn block(&mut self, out: &mut [u8; 64]) {
        let mut x = self.state;

        for _ in 0..6 {
            // column round
            x[4] ^= rotl(x[0].wrapping_add(x[12]), 7);
            x[8] ^= rotl(x[4].wrapping_add(x[0]), 9);
            x[12] ^= rotl(x[8].wrapping_add(x[4]), 13);
            x[0] ^= rotl(x[12].wrapping_add(x[8]), 18);
            x[9] ^= rotl(x[5].wrapping_add(x[1]), 7);
            x[13] ^= rotl(x[9].wrapping_add(x[5]), 9);
            x[1] ^= rotl(x[13].wrapping_add(x[9]), 13);
            x[5] ^= rotl(x[1].wrapping_add(x[13]), 18);
            x[14] ^= rotl(x[10].wrapping_add(x[6]), 7);
            x[2] ^= rotl(x[14].wrapping_add(x[10]), 9);
            x[6] ^= rotl(x[2].wrapping_add(x[14]), 13);
            x[10] ^= rotl(x[6].wrapping_add(x[2]), 18);
            x[3] ^= rotl(x[15].wrapping_add(x[11]), 7);
            x[7] ^= rotl(x[3].wrapping_add(x[15]), 9);
            x[11] ^= rotl(x[7].wrapping_add(x[3]), 13);
            x[15] ^= rotl(x[11].wrapping_add(x[7]), 18);
            // row round
            x[1] ^= rotl(x[0].wrapping_add(x[3]), 7);
            x[2] ^= rotl(x[1].wrapping_add(x[0]), 9);
            x[3] ^= rotl(x[2].wrapping_add(x[1]), 13);
            x[0] ^= rotl(x[3].wrapping_add(x[2]), 18);
            x[6] ^= rotl(x[5].wrapping_add(x[4]), 7);
            x[7] ^= rotl(x[6].wrapping_add(x[5]), 9);
            x[4] ^= rotl(x[7].wrapping_add(x[6]), 13);
            x[5] ^= rotl(x[4].wrapping_add(x[7]), 18);
            x[11] ^= rotl(x[10].wrapping_add(x[9]), 7);
            x[8] ^= rotl(x[11].wrapping_add(x[10]), 9);
            x[9] ^= rotl(x[8].wrapping_add(x[11]), 13);
            x[10] ^= rotl(x[9].wrapping_add(x[8]), 18);
            x[12] ^= rotl(x[15].wrapping_add(x[14]), 7);
            x[13] ^= rotl(x[12].wrapping_add(x[15]), 9);
            x[14] ^= rotl(x[13].wrapping_add(x[12]), 13);
            x[15] ^= rotl(x[14].wrapping_add(x[13]), 18);
        }

        for i in 0..16 {
            let word = x[i].wrapping_add(self.state[i]);
            out[4 * i..4 * i + 4].copy_from_slice(&word.to_le_bytes());
        }

        // Increment the 64-bit block counter (words 8,9), carrying on overflow.
        self.state[8] = self.state[8].wrapping_add(1);
        if self.state[8] == 0 {
            self.state[9] = self.state[9].wrapping_add(1);
        }
    }

    /// Refills the buffer with the next block's keystream, resetting the
    /// read position to its start.
    fn refill(&mut self) {
        let mut block = [0u8; 64];
        self.block(&mut block);
        self.buffer = block;
        self.pos = 0;
    }

    #[inline]
    fn next_byte(&mut self) -> u8 {
        if self.pos == 64 {
            self.refill();
        }
        let b = self.buffer[self.pos];
        self.pos += 1;
        b
    }

    /// XOR `input` with the Salsa20/12 keystream into `output`. Both slices
    /// must have equal length.
    pub fn crypt(&mut self, input: &[u8], output: &mut [u8]) {
        assert_eq!(input.len(), output.len());
        for i in 0..input.len() {
            output[i] = input[i] ^ self.next_byte();
        }
    }

    /// In-place variant of [`Self::crypt`].
    pub fn crypt_in_place(&mut self, buf: &mut [u8]) {
        for b in buf.iter_mut() {
            *b ^= self.next_byte();
        }
    }

    /// Draw the next `n` bytes of raw keystream (used to derive the
    /// Poly1305 one-time key). Subsequent draws, whether via `keystream`
    /// or `crypt`/`crypt_in_place`, continue from the same keystream
    /// position rather than restarting at the next block boundary.
    pub fn keystream(&mut self, n: usize) -> Vec<u8> {
        (0..n).map(|_| self.next_byte()).collect()
    }
}

impl Drop for Salsa20 {
    fn drop(&mut self) {
        self.state.zeroize();
        self.buffer.zeroize();
    }
}
