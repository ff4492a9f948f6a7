// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

use std::hash::Hasher;

const C1: u64 = 0x87c3_7b91_1142_53d5;
const C2: u64 = 0x4cf5_ad43_2745_937f;

/// A streaming MurmurHash3 (x64, 128-bit) hasher.
///
/// Input fed through [`Hasher::write`] is buffered into 16-byte blocks, so the result only
/// depends on the concatenated byte stream and not on how it was split across writes.
#[derive(Debug, Clone)]
pub struct MurmurHash3X64128 {
    h1: u64,
    h2: u64,
    buf: [u8; 16],
    buf_len: usize,
    total_len: u64,
}

impl Default for MurmurHash3X64128 {
    fn default() -> Self {
        Self::with_seed(0)
    }
}

impl MurmurHash3X64128 {
    /// Creates a hasher whose two lanes both start at `seed`.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            h1: seed,
            h2: seed,
            buf: [0; 16],
            buf_len: 0,
            total_len: 0,
        }
    }

    pub(crate) fn write_bytes(&mut self, mut bytes: &[u8]) {
        self.total_len += bytes.len() as u64;

        if self.buf_len > 0 {
            let take = (16 - self.buf_len).min(bytes.len());
            self.buf[self.buf_len..self.buf_len + take].copy_from_slice(&bytes[..take]);
            self.buf_len += take;
            bytes = &bytes[take..];
            if self.buf_len < 16 {
                return;
            }
            let block = self.buf;
            self.mix_block(&block);
            self.buf_len = 0;
        }

        let mut blocks = bytes.chunks_exact(16);
        for block in &mut blocks {
            self.mix_block(block);
        }
        let rest = blocks.remainder();
        self.buf[..rest.len()].copy_from_slice(rest);
        self.buf_len = rest.len();
    }

    fn mix_block(&mut self, block: &[u8]) {
        let k1 = read_u64_le(&block[..8]);
        let k2 = read_u64_le(&block[8..16]);

        self.h1 ^= mix_k1(k1);
        self.h1 = self.h1.rotate_left(27).wrapping_add(self.h2);
        self.h1 = self.h1.wrapping_mul(5).wrapping_add(0x52dc_e729);

        self.h2 ^= mix_k2(k2);
        self.h2 = self.h2.rotate_left(31).wrapping_add(self.h1);
        self.h2 = self.h2.wrapping_mul(5).wrapping_add(0x3849_5ab5);
    }

    /// Returns both 64-bit halves of the hash of everything written so far.
    pub fn finish128(&self) -> (u64, u64) {
        let mut h1 = self.h1;
        let mut h2 = self.h2;

        let tail = &self.buf[..self.buf_len];
        if tail.len() > 8 {
            h2 ^= mix_k2(read_u64_le(&tail[8..]));
        }
        if !tail.is_empty() {
            h1 ^= mix_k1(read_u64_le(&tail[..tail.len().min(8)]));
        }

        h1 ^= self.total_len;
        h2 ^= self.total_len;
        h1 = h1.wrapping_add(h2);
        h2 = h2.wrapping_add(h1);
        h1 = fmix64(h1);
        h2 = fmix64(h2);
        h1 = h1.wrapping_add(h2);
        h2 = h2.wrapping_add(h1);
        (h1, h2)
    }
}

impl Hasher for MurmurHash3X64128 {
    fn finish(&self) -> u64 {
        self.finish128().0
    }

    fn write(&mut self, bytes: &[u8]) {
        self.write_bytes(bytes);
    }
}

/// Reads up to eight bytes as a little-endian integer, zero-padding the high bytes.
#[inline]
fn read_u64_le(bytes: &[u8]) -> u64 {
    let mut word = [0u8; 8];
    word[..bytes.len()].copy_from_slice(bytes);
    u64::from_le_bytes(word)
}

#[inline]
fn mix_k1(k1: u64) -> u64 {
    k1.wrapping_mul(C1).rotate_left(31).wrapping_mul(C2)
}

#[inline]
fn mix_k2(k2: u64) -> u64 {
    k2.wrapping_mul(C2).rotate_left(33).wrapping_mul(C1)
}

#[inline]
fn fmix64(mut k: u64) -> u64 {
    k ^= k >> 33;
    k = k.wrapping_mul(0xff51_afd7_ed55_8ccd);
    k ^= k >> 33;
    k = k.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    k ^ (k >> 33)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(bytes: &[u8], seed: u64) -> (u64, u64) {
        let mut hasher = MurmurHash3X64128::with_seed(seed);
        hasher.write(bytes);
        hasher.finish128()
    }

    #[test]
    fn test_known_vectors() {
        let key = "The quick brown fox jumps over the lazy dog";
        assert_eq!(hash(key.as_bytes(), 0), (0xe34bbc7bbc071b6c, 0x7a433ca9c49a9347));

        // change one bit
        let key = "The quick brown fox jumps over the lazy eog";
        assert_eq!(hash(key.as_bytes(), 0), (0x362108102c62d1c9, 0x3285cd100292b305));

        // test a remainder < 8
        let key = "The quick brown fox jumps over the lazy dogdogdog";
        assert_eq!(hash(key.as_bytes(), 0), (0x9c8205300e612fc4, 0xcbc0af6136aa3df9));

        // test a remainder = 8
        let key = "The quick brown fox jumps over the lazy1";
        assert_eq!(hash(key.as_bytes(), 0), (0xe3301a827e5cdfe3, 0xbdbf05f8da0f0392));

        // test a remainder = 0
        let key = "The quick brown fox jumps over t";
        assert_eq!(hash(key.as_bytes(), 0), (0xdf6af91bb29bdacf, 0x91a341c58df1f3a6));
    }

    #[test]
    fn test_matches_reference_for_all_tail_lengths() {
        let data: Vec<u8> = (0..=255u8).collect();
        for len in 0..=48 {
            let expected = mur3::murmurhash3_x64_128(&data[..len], 0);
            assert_eq!(hash(&data[..len], 0), expected, "len={len}");
        }
    }

    #[test]
    fn test_split_writes() {
        let data: Vec<u8> = (0..100u8).collect();
        let expected = hash(&data, 7);
        for split in [1, 3, 8, 15, 16, 17, 31, 64] {
            let mut hasher = MurmurHash3X64128::with_seed(7);
            for chunk in data.chunks(split) {
                hasher.write(chunk);
            }
            assert_eq!(hasher.finish128(), expected, "split={split}");
        }
    }
}
