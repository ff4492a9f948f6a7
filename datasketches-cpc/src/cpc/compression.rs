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

//! Bit-level compression of the pair table and the sliding window.
//!
//! Bits are packed least significant first into 32-bit words. A pair is written as its column
//! delta through the length-limited unary code, then its row delta Golomb coded: a unary
//! quotient (zeros closed by a one) and `base_bits` low bits. Window bytes go through one of
//! the Huffman tables, picked by the pseudo-phase of `C / K`.
//!
//! Every stream is padded so that a decoder peeking 12 bits at a time never runs past its end.

use crate::cpc::compression_data::COLUMN_PERMUTATIONS_FOR_DECODING;
use crate::cpc::compression_data::COLUMN_PERMUTATIONS_FOR_ENCODING;
use crate::cpc::compression_data::DECODING_TABLES_FOR_HIGH_ENTROPY_BYTE;
use crate::cpc::compression_data::ENCODING_TABLES_FOR_HIGH_ENTROPY_BYTE;
use crate::cpc::compression_data::LENGTH_LIMITED_UNARY_DECODING_TABLE65;
use crate::cpc::compression_data::LENGTH_LIMITED_UNARY_ENCODING_TABLE65;
use crate::error::Error;

#[derive(Debug, Default)]
struct BitWriter {
    words: Vec<u32>,
    buf: u64,
    buf_bits: u32,
}

impl BitWriter {
    /// Appends the low `num_bits` bits of `value`; the bits above must be clear.
    fn write_bits(&mut self, value: u64, num_bits: u32) {
        debug_assert!(num_bits <= 32);
        debug_assert!(num_bits == 32 || value >> num_bits == 0);
        self.buf |= value << self.buf_bits;
        self.buf_bits += num_bits;
        self.flush_full_word();
    }

    /// Appends a code from one of the `(length << 12) | code` tables.
    fn write_code(&mut self, entry: u16) {
        self.write_bits(u64::from(entry & 0xfff), u32::from(entry >> 12));
    }

    /// Appends `value` zeros closed by a one.
    fn write_unary(&mut self, mut value: u64) {
        while value >= 16 {
            self.pad(16);
            value -= 16;
        }
        self.write_bits(1 << value, value as u32 + 1);
    }

    /// Appends `num_bits` zeros.
    fn pad(&mut self, num_bits: u32) {
        self.buf_bits += num_bits;
        self.flush_full_word();
    }

    fn flush_full_word(&mut self) {
        if self.buf_bits >= 32 {
            self.words.push(self.buf as u32);
            self.buf >>= 32;
            self.buf_bits -= 32;
        }
    }

    fn finish(mut self) -> Vec<u32> {
        if self.buf_bits > 0 {
            self.words.push(self.buf as u32);
        }
        self.words
    }
}

struct BitReader<'a> {
    words: &'a [u32],
    pos: usize,
}

impl<'a> BitReader<'a> {
    fn new(words: &'a [u32]) -> Self {
        Self { words, pos: 0 }
    }

    /// Returns the next `num_bits` (at most 32) without consuming them.
    fn peek(&self, num_bits: u32) -> Result<u64, Error> {
        debug_assert!(num_bits <= 32);
        if num_bits == 0 {
            return Ok(0);
        }
        if self.pos + num_bits as usize > self.words.len() * 32 {
            return Err(Error::insufficient_data("compressed bit stream"));
        }
        let index = self.pos / 32;
        let shift = self.pos % 32;
        let low = u64::from(self.words[index]);
        let high = self.words.get(index + 1).map_or(0, |&word| u64::from(word));
        let bits = ((high << 32) | low) >> shift;
        Ok(bits & ((1u64 << num_bits) - 1))
    }

    fn consume(&mut self, num_bits: u32) {
        self.pos += num_bits as usize;
    }

    fn read_bits(&mut self, num_bits: u32) -> Result<u64, Error> {
        let value = self.peek(num_bits)?;
        self.consume(num_bits);
        Ok(value)
    }

    /// Decodes one symbol through a 12-bit lookup table.
    fn read_code(&mut self, decoding: &[u16; 4096]) -> Result<u8, Error> {
        let entry = decoding[self.peek(12)? as usize];
        self.consume(u32::from(entry >> 8));
        Ok((entry & 0xff) as u8)
    }

    /// Reads zeros up to the closing one; fails once the count exceeds `limit`.
    fn read_unary(&mut self, limit: u64) -> Result<u64, Error> {
        let mut value = 0u64;
        loop {
            let byte = self.peek(8)?;
            if byte != 0 {
                let zeros = byte.trailing_zeros();
                self.consume(zeros + 1);
                value += u64::from(zeros);
                break;
            }
            self.consume(8);
            value += 8;
            if value > limit {
                break;
            }
        }
        if value > limit {
            return Err(Error::deserial("unary code exceeds the row range"));
        }
        Ok(value)
    }
}

/// Chooses the Golomb parameter for `count` row deltas spread over `k` rows; between zero and
/// `ceil(log2(k)) - 1`.
fn golomb_base_bits(k: u64, count: u64) -> u32 {
    debug_assert!(count > 0 && count <= k);
    let quotient = (k - count) / count;
    if quotient == 0 { 0 } else { quotient.ilog2() }
}

/// Returns the index of the code table for a sketch holding `num_coupons` coupons.
///
/// Past `C / K = 2.375` this is the true phase, `(C / (K / 16)) mod 16`, which also selects
/// the column permutation of the sliding flavor. Below it the mid-range tables `16..22`
/// apply, with phase 6 borrowed just before the steady state.
pub(super) fn determine_pseudo_phase(lg_k: u8, num_coupons: u32) -> usize {
    let k = 1u64 << lg_k;
    let c = u64::from(num_coupons);
    if 1000 * c < 2375 * k {
        if 4 * c < 3 * k {
            16
        } else if 10 * c < 11 * k {
            17
        } else if 100 * c < 132 * k {
            18
        } else if 3 * c < 5 * k {
            19
        } else if 1000 * c < 1965 * k {
            20
        } else if 1000 * c < 2275 * k {
            21
        } else {
            6
        }
    } else {
        ((c >> (lg_k - 4)) & 15) as usize
    }
}

/// Compresses strictly ascending packed pairs.
pub(super) fn compress_pairs(pairs: &[u32], lg_k: u8) -> Vec<u32> {
    let mut writer = BitWriter::default();
    if pairs.is_empty() {
        return writer.finish();
    }
    let num_pairs = pairs.len() as u64;
    let base_bits = golomb_base_bits((1u64 << lg_k) + num_pairs, num_pairs);
    let low_mask = (1u64 << base_bits) - 1;

    let mut predicted_row = 0u32;
    let mut predicted_col = 0u32;
    for &pair in pairs {
        let row = pair >> 6;
        let col = pair & 63;
        if row != predicted_row {
            predicted_col = 0;
        }
        debug_assert!(row >= predicted_row && col >= predicted_col, "pairs must be sorted");
        let row_delta = u64::from(row - predicted_row);
        let col_delta = col - predicted_col;
        predicted_row = row;
        predicted_col = col + 1;

        writer.write_code(LENGTH_LIMITED_UNARY_ENCODING_TABLE65[col_delta as usize]);
        writer.write_unary(row_delta >> base_bits);
        writer.write_bits(row_delta & low_mask, base_bits);
    }
    writer.pad(10u32.saturating_sub(base_bits));
    writer.finish()
}

/// Inverse of [`compress_pairs`]. The decoded pairs are strictly ascending and in range.
pub(super) fn uncompress_pairs(words: &[u32], num_pairs: u32, lg_k: u8) -> Result<Vec<u32>, Error> {
    if num_pairs == 0 {
        return Ok(vec![]);
    }
    let k = 1u32 << lg_k;
    let base_bits = golomb_base_bits(u64::from(k) + u64::from(num_pairs), u64::from(num_pairs));
    let max_quotient = u64::from(k >> base_bits);

    let mut reader = BitReader::new(words);
    // every pair takes at least two bits
    let mut pairs = Vec::with_capacity((num_pairs as usize).min(words.len() * 16));
    let mut predicted_row = 0u32;
    let mut predicted_col = 0u32;
    for _ in 0..num_pairs {
        let col_delta = u32::from(reader.read_code(&LENGTH_LIMITED_UNARY_DECODING_TABLE65)?);
        let quotient = reader.read_unary(max_quotient)?;
        let row_delta = (quotient << base_bits) | reader.read_bits(base_bits)?;

        if row_delta > 0 {
            predicted_col = 0;
        }
        let row = u64::from(predicted_row) + row_delta;
        if row >= u64::from(k) {
            return Err(Error::deserial(format!(
                "row {row} out of range for lg_k {lg_k}"
            )));
        }
        let col = predicted_col + col_delta;
        if col > 63 {
            return Err(Error::deserial(format!(
                "column delta {col_delta} decodes to column {col}, which exceeds 63"
            )));
        }
        let pair = ((row as u32) << 6) | col;
        if pair == u32::MAX {
            return Err(Error::deserial("pair collides with the empty slot marker"));
        }
        pairs.push(pair);
        predicted_row = row as u32;
        predicted_col = col + 1;
    }
    Ok(pairs)
}

/// Compresses the `K` window bytes of a sketch holding `num_coupons` coupons.
pub(super) fn compress_window(window: &[u8], lg_k: u8, num_coupons: u32) -> Vec<u32> {
    let table = &ENCODING_TABLES_FOR_HIGH_ENTROPY_BYTE[determine_pseudo_phase(lg_k, num_coupons)];
    let mut writer = BitWriter::default();
    for &byte in window {
        writer.write_code(table[byte as usize]);
    }
    writer.pad(11);
    writer.finish()
}

pub(super) fn uncompress_window(words: &[u32], lg_k: u8, num_coupons: u32) -> Result<Vec<u8>, Error> {
    let table = &DECODING_TABLES_FOR_HIGH_ENTROPY_BYTE[determine_pseudo_phase(lg_k, num_coupons)];
    let mut reader = BitReader::new(words);
    let mut window = vec![0u8; 1 << lg_k];
    for byte in window.iter_mut() {
        *byte = reader.read_code(table)?;
    }
    Ok(window)
}

/// Maps a surprising column of a sliding sketch into `0..56` for the current phase.
pub(super) fn permute_column(col: u8, window_offset: u8, pseudo_phase: usize) -> u8 {
    debug_assert!(window_offset <= 56);
    let rotated = (col + 56 - window_offset) & 63;
    debug_assert!(rotated < 56, "col {col} inside the window at offset {window_offset}");
    COLUMN_PERMUTATIONS_FOR_ENCODING[pseudo_phase][rotated as usize]
}

/// Inverse of [`permute_column`].
pub(super) fn unpermute_column(
    code: u8,
    window_offset: u8,
    pseudo_phase: usize,
) -> Result<u8, Error> {
    let rotated = COLUMN_PERMUTATIONS_FOR_DECODING[pseudo_phase]
        .get(code as usize)
        .ok_or_else(|| {
            Error::deserial(format!("sliding column code {code} is out of range"))
        })?;
    Ok((rotated + window_offset + 8) & 63)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn pair(row: u32, col: u32) -> u32 {
        (row << 6) | col
    }

    #[test]
    fn test_bit_writer_reader() {
        let mut writer = BitWriter::default();
        writer.write_bits(0b101, 3);
        writer.write_unary(40);
        writer.write_unary(0);
        writer.write_bits(u64::from(u32::MAX), 32);
        writer.pad(12);
        let words = writer.finish();

        let mut reader = BitReader::new(&words);
        assert_eq!(reader.read_bits(3).unwrap(), 0b101);
        assert_eq!(reader.read_unary(100).unwrap(), 40);
        assert_eq!(reader.read_unary(100).unwrap(), 0);
        assert_eq!(reader.read_bits(32).unwrap(), u64::from(u32::MAX));
        assert_eq!(reader.read_bits(12).unwrap(), 0);
    }

    #[test]
    fn test_reader_reports_overrun() {
        let mut reader = BitReader::new(&[0]);
        assert_eq!(reader.read_bits(20).unwrap(), 0);
        let err = reader.peek(13).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn test_unary_limit() {
        let mut writer = BitWriter::default();
        writer.write_unary(70);
        writer.pad(12);
        let words = writer.finish();
        assert!(BitReader::new(&words).read_unary(64).is_err());
        assert_eq!(BitReader::new(&words).read_unary(80).unwrap(), 70);
    }

    #[test]
    fn test_golomb_base_bits() {
        assert_eq!(golomb_base_bits(2048 + 3, 3), 9);
        assert_eq!(golomb_base_bits(100, 100), 0);
        assert_eq!(golomb_base_bits(16 + 8, 8), 1);
    }

    #[test]
    fn test_three_pairs_match_reference_words() {
        // the coupons of "a", "b" and "c" at lg_k 11
        let pairs = vec![pair(367, 0), pair(559, 0), pair(1802, 0)];
        let words = compress_pairs(&pairs, 11);
        assert_eq!(words, vec![0x6e1815be, 0x00000003]);
        assert_eq!(uncompress_pairs(&words, 3, 11).unwrap(), pairs);
    }

    #[test]
    fn test_pairs() {
        let lg_k = 10;
        let pairs = vec![pair(0, 0), pair(0, 17), pair(5, 63), pair(1000, 2), pair(1023, 1)];
        let words = compress_pairs(&pairs, lg_k);
        assert_eq!(uncompress_pairs(&words, 5, lg_k).unwrap(), pairs);
    }

    #[test]
    fn test_dense_row_of_pairs() {
        let lg_k = 4;
        let pairs: Vec<u32> = (0..64).map(|col| pair(7, col)).collect();
        let words = compress_pairs(&pairs, lg_k);
        assert_eq!(uncompress_pairs(&words, 64, lg_k).unwrap(), pairs);
    }

    #[test]
    fn test_truncated_stream_is_rejected() {
        let lg_k = 10;
        let pairs: Vec<u32> = (0..50).map(|row| pair(row * 20, 9)).collect();
        let words = compress_pairs(&pairs, lg_k);
        let err = uncompress_pairs(&words[..words.len() - 2], 50, lg_k);
        assert_eq!(err.unwrap_err().kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn test_rows_past_k_are_rejected() {
        // one pair at lg_k 4 uses 4 base bits, so a quotient of 1 already means row 16
        for quotient in [1, 2] {
            let mut writer = BitWriter::default();
            writer.write_code(LENGTH_LIMITED_UNARY_ENCODING_TABLE65[0]);
            writer.write_unary(quotient);
            writer.write_bits(0, 4);
            writer.pad(12);
            let words = writer.finish();
            let err = uncompress_pairs(&words, 1, 4).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidData);
        }
    }

    #[test]
    fn test_window() {
        let lg_k = 6;
        let window: Vec<u8> = (0..64u32).map(|i| (i * 37 % 256) as u8).collect();
        for num_coupons in [100, 160, 300, 500] {
            let words = compress_window(&window, lg_k, num_coupons);
            assert_eq!(uncompress_window(&words, lg_k, num_coupons).unwrap(), window);
        }
        let words = compress_window(&window, lg_k, 500);
        assert!(uncompress_window(&words[..1], lg_k, 500).is_err());
    }

    #[test]
    fn test_pseudo_phase() {
        // lg_k 11: K = 2048
        assert_eq!(determine_pseudo_phase(11, 1000), 16);
        assert_eq!(determine_pseudo_phase(11, 2000), 17);
        assert_eq!(determine_pseudo_phase(11, 4700), 6);
        assert_eq!(determine_pseudo_phase(11, 5376), 10);
        assert_eq!(determine_pseudo_phase(11, 7415), 9);
        assert_eq!(determine_pseudo_phase(26, u32::MAX), 15);
    }

    #[test]
    fn test_column_permutation() {
        for phase in 0..16 {
            for offset in [0u8, 3, 56] {
                for col in (0..64u8).filter(|&c| c < offset || c >= offset + 8) {
                    let code = permute_column(col, offset, phase);
                    assert!(code < 56);
                    assert_eq!(unpermute_column(code, offset, phase).unwrap(), col);
                }
            }
        }
        assert!(unpermute_column(56, 0, 0).is_err());
    }
}
