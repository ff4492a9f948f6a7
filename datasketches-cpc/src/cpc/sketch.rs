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

use std::fmt;
use std::hash::Hash;
use std::hash::Hasher;

use crate::codec::SketchBytes;
use crate::codec::SketchSlice;
use crate::codec::assert::ensure_seed_hash_matches;
use crate::codec::assert::insufficient_data;
use crate::common::NumStdDev;
use crate::common::canonical_double;
use crate::common::format_significant;
use crate::common::inv_pow2_table::INVERSE_POWERS_OF_2;
use crate::cpc::DEFAULT_LG_K;
use crate::cpc::Flavor;
use crate::cpc::MAX_LG_K;
use crate::cpc::MIN_LG_K;
use crate::cpc::check_lg_k;
use crate::cpc::compression::compress_pairs;
use crate::cpc::compression::compress_window;
use crate::cpc::compression::determine_pseudo_phase;
use crate::cpc::compression::permute_column;
use crate::cpc::compression::uncompress_pairs;
use crate::cpc::compression::uncompress_window;
use crate::cpc::compression::unpermute_column;
use crate::cpc::count_bits_set_in_matrix;
use crate::cpc::determine_correct_offset;
use crate::cpc::determine_flavor;
use crate::cpc::estimator::estimate;
use crate::cpc::estimator::lower_bound;
use crate::cpc::estimator::upper_bound;
use crate::cpc::kxp_byte_lookup::KXP_BYTE_TABLE;
use crate::cpc::pair_table::EMPTY_SLOT;
use crate::cpc::pair_table::PairTable;
use crate::cpc::serialization::Preamble;
use crate::error::Error;
use crate::hash::DEFAULT_UPDATE_SEED;
use crate::hash::MurmurHash3X64128;
use crate::hash::compute_seed_hash;

/// A Compressed Probabilistic Counting sketch.
///
/// See the [module level documentation](crate::cpc) for more.
#[derive(Debug, Clone)]
pub struct CpcSketch {
    // immutable config variables
    lg_k: u8,
    seed: u64,

    // sketch state
    /// Columns below this are known to be full in every row, so updates landing there are
    /// ignored without a lookup.
    first_interesting_column: u8,
    /// The number of coupons collected so far.
    num_coupons: u32,
    /// Every coupon while sparse; afterwards only the cells that disagree with the window.
    surprising_value_table: PairTable,
    /// Derivable from num_coupons, but made explicit for speed.
    window_offset: u8,
    /// Size K bytes once past sparse, empty before.
    sliding_window: Vec<u8>,

    // estimator state
    /// Whether the sketch is a result of merging.
    ///
    /// If `false`, the HIP (Historical Inverse Probability) estimator is used.
    /// If `true`, the ICON (Inter-Column Optimal) Estimator is fallback in use.
    merge_flag: bool,
    // the following variables are only valid in HIP estimator
    /// A pre-calculated probability factor (`k * p`) used to compute the increment delta.
    kxp: f64,
    /// The accumulated cardinality estimate.
    hip_est_accum: f64,
}

impl Default for CpcSketch {
    fn default() -> Self {
        Self::new(DEFAULT_LG_K)
    }
}

impl CpcSketch {
    /// Creates a new `CpcSketch` with the given `lg_k` and default seed.
    ///
    /// # Panics
    ///
    /// Panics if `lg_k` is not in `[4, 26]`.
    pub fn new(lg_k: u8) -> Self {
        Self::with_seed(lg_k, DEFAULT_UPDATE_SEED)
    }

    /// Creates a new `CpcSketch` with the given `lg_k` and `seed`.
    ///
    /// # Panics
    ///
    /// Panics if `lg_k` is not in `[4, 26]`.
    pub fn with_seed(lg_k: u8, seed: u64) -> Self {
        assert!(
            (MIN_LG_K..=MAX_LG_K).contains(&lg_k),
            "lg_k out of range; got {lg_k}",
        );
        Self::new_unchecked(lg_k, seed)
    }

    /// Creates a new `CpcSketch`, returning an error instead of panicking on a bad `lg_k`.
    pub fn try_with_seed(lg_k: u8, seed: u64) -> Result<Self, Error> {
        check_lg_k(lg_k)?;
        Ok(Self::new_unchecked(lg_k, seed))
    }

    fn new_unchecked(lg_k: u8, seed: u64) -> Self {
        Self {
            lg_k,
            seed,
            first_interesting_column: 0,
            num_coupons: 0,
            surprising_value_table: PairTable::with_lg_k(lg_k),
            window_offset: 0,
            sliding_window: vec![],
            merge_flag: false,
            kxp: (1u64 << lg_k) as f64,
            hip_est_accum: 0.0,
        }
    }

    /// Return the parameter lg_k.
    pub fn lg_k(&self) -> u8 {
        self.lg_k
    }

    /// Returns the hash seed.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Returns the number of coupons (distinct occupied cells) collected so far.
    pub fn num_coupons(&self) -> u32 {
        self.num_coupons
    }

    /// Returns the current internal representation.
    pub fn flavor(&self) -> Flavor {
        determine_flavor(self.lg_k, self.num_coupons)
    }

    /// Returns true if the sketch is empty.
    pub fn is_empty(&self) -> bool {
        self.num_coupons == 0
    }

    /// Returns true if this sketch is the result of a union, in which case the estimate comes
    /// from the ICON estimator.
    pub fn is_merged(&self) -> bool {
        self.merge_flag
    }

    /// Returns the best estimate of the cardinality of the sketch.
    pub fn estimate(&self) -> f64 {
        estimate(
            self.merge_flag,
            self.hip_est_accum,
            self.lg_k,
            self.num_coupons,
        )
    }

    /// Returns the best estimate of the lower bound of the confidence interval given `kappa`.
    pub fn lower_bound(&self, kappa: NumStdDev) -> f64 {
        lower_bound(
            self.merge_flag,
            self.hip_est_accum,
            self.lg_k,
            self.num_coupons,
            kappa,
        )
    }

    /// Returns the best estimate of the upper bound of the confidence interval given `kappa`.
    pub fn upper_bound(&self, kappa: NumStdDev) -> f64 {
        upper_bound(
            self.merge_flag,
            self.hip_est_accum,
            self.lg_k,
            self.num_coupons,
            kappa,
        )
    }

    /// Update the sketch with a hashable value.
    ///
    /// For `f32`/`f64` values, use `update_f32`/`update_f64` instead. Strings hashed through
    /// this method include the [`Hash`] terminator byte; use [`update_str`](Self::update_str)
    /// to hash only the UTF-8 bytes.
    ///
    /// # Examples
    ///
    /// ```
    /// # use datasketches_cpc::cpc::CpcSketch;
    /// let mut sketch = CpcSketch::new(11);
    /// sketch.update(42i64);
    /// sketch.update(42i64);
    /// assert_eq!(sketch.estimate(), 1.0);
    /// ```
    pub fn update<T: Hash>(&mut self, value: T) {
        let mut hasher = MurmurHash3X64128::with_seed(self.seed);
        value.hash(&mut hasher);
        self.hash_update(hasher);
    }

    /// Update the sketch with the raw bytes of `value`.
    pub fn update_bytes(&mut self, value: &[u8]) {
        let mut hasher = MurmurHash3X64128::with_seed(self.seed);
        hasher.write(value);
        self.hash_update(hasher);
    }

    /// Update the sketch with the UTF-8 bytes of `value`.
    pub fn update_str(&mut self, value: &str) {
        self.update_bytes(value.as_bytes());
    }

    /// Update the sketch with a f64 value.
    pub fn update_f64(&mut self, value: f64) {
        // Canonicalize double for compatibility with Java
        let canonical = canonical_double(value);
        self.update(canonical);
    }

    /// Update the sketch with a f32 value.
    pub fn update_f32(&mut self, value: f32) {
        self.update_f64(value as f64);
    }

    fn hash_update(&mut self, hasher: MurmurHash3X64128) {
        let (h1, h2) = hasher.finish128();

        let k = 1u64 << self.lg_k;
        let col = h2.leading_zeros().min(63); // 0 <= col <= 63
        let row = (h1 & (k - 1)) as u32;
        let mut row_col = (row << 6) | col;
        // To avoid the hash table's "empty" value, we change the row of the following pair.
        // This case is extremely unlikely, but we might as well handle it.
        if row_col == u32::MAX {
            row_col ^= 1 << 6;
        }
        self.row_col_update(row_col);
    }

    pub(super) fn row_col_update(&mut self, row_col: u32) {
        let col = (row_col & 63) as u8;
        if col < self.first_interesting_column {
            // important speed optimization
            return;
        }

        if self.sliding_window.is_empty() {
            self.update_sparse(row_col);
        } else {
            self.update_windowed(row_col);
        }
    }

    fn update_hip(&mut self, row_col: u32) {
        if self.merge_flag {
            return;
        }
        let k = (1u64 << self.lg_k) as f64;
        let col = (row_col & 63) as usize;
        let one_over_p = k / self.kxp;
        self.hip_est_accum += one_over_p;
        self.kxp -= INVERSE_POWERS_OF_2[col + 1]; // notice the "+1"
    }

    fn update_sparse(&mut self, row_col: u32) {
        let k = 1u64 << self.lg_k;
        let c32pre = (self.num_coupons as u64) << 5;
        debug_assert!(c32pre < 3 * k); // C < 3K/32, in other words, flavor == SPARSE
        let is_novel = self.surprising_value_table.maybe_insert(row_col);
        if is_novel {
            self.num_coupons += 1;
            self.update_hip(row_col);
            let c32post = (self.num_coupons as u64) << 5;
            if c32post >= 3 * k {
                self.promote_sparse_to_windowed();
            }
        }
    }

    fn promote_sparse_to_windowed(&mut self) {
        debug_assert_eq!(self.window_offset, 0);

        let k = 1usize << self.lg_k;
        self.sliding_window = vec![0; k];

        let old_table = std::mem::replace(
            &mut self.surprising_value_table,
            PairTable::with_lg_k(self.lg_k),
        );
        for row_col in old_table.iter() {
            let col = (row_col & 63) as u8;
            if col < 8 {
                let row = (row_col >> 6) as usize;
                self.sliding_window[row] |= 1 << col;
            } else {
                // cannot use must_insert(), because it doesn't provide for growth
                let is_novel = self.surprising_value_table.maybe_insert(row_col);
                debug_assert!(is_novel);
            }
        }

        tracing::debug!(
            lg_k = self.lg_k,
            num_coupons = self.num_coupons,
            table_entries = self.surprising_value_table.num_items(),
            "promoted CPC sketch from sparse to windowed"
        );
    }

    fn update_windowed(&mut self, row_col: u32) {
        debug_assert!(self.window_offset <= 56);
        let k = 1u64 << self.lg_k;
        let w8pre = (self.window_offset as u64) << 3;

        let col = (row_col & 63) as u8;
        let is_novel = if col < self.window_offset {
            // track the surprising 0's "before" the window
            self.surprising_value_table.maybe_delete(row_col) // inverted logic
        } else if col < self.window_offset + 8 {
            // track the 8 bits inside the window
            let row = (row_col >> 6) as usize;
            let old_bits = self.sliding_window[row];
            let new_bits = old_bits | (1 << (col - self.window_offset));
            self.sliding_window[row] = new_bits;
            old_bits != new_bits
        } else {
            // track the surprising 1's "after" the window
            self.surprising_value_table.maybe_insert(row_col) // normal logic
        };

        if is_novel {
            self.num_coupons += 1;
            self.update_hip(row_col);
            let c8post = (self.num_coupons as u64) << 3;
            if c8post >= (27 + w8pre) * k {
                self.move_window();
                debug_assert!((1..=56).contains(&self.window_offset));
            }
        }
    }

    /// Slides the window one column to the right and rebuilds the surprise table around it.
    fn move_window(&mut self) {
        let new_offset = self.window_offset + 1;
        assert!(new_offset <= 56, "window offset out of range: {new_offset}");
        debug_assert_eq!(
            new_offset,
            determine_correct_offset(self.lg_k, self.num_coupons)
        );

        let bit_matrix = self.build_bit_matrix();

        // refresh the KXP register on every 8th window shift
        if (new_offset & 0x7) == 0 {
            self.refresh_kxp(&bit_matrix);
        }

        self.surprising_value_table.clear();
        self.window_offset = new_offset;
        self.first_interesting_column = self.split_bit_matrix(&bit_matrix);

        tracing::trace!(
            window_offset = self.window_offset,
            first_interesting_column = self.first_interesting_column,
            table_entries = self.surprising_value_table.num_items(),
            "moved CPC sliding window"
        );
    }

    /// Loads `bit_matrix` into the window at the current offset and the surprise table,
    /// returning the first interesting column.
    ///
    /// The table must be empty and the window allocated.
    fn split_bit_matrix(&mut self, bit_matrix: &[u64]) -> u8 {
        let offset = self.window_offset;
        let mask_for_clearing_window = !(0xffu64 << offset);
        let mask_for_flipping_early_zone = (1u64 << offset) - 1;
        let mut all_surprises_ored = 0;

        for (row, &bits) in bit_matrix.iter().enumerate() {
            let mut pattern = bits;
            self.sliding_window[row] = ((pattern >> offset) & 0xff) as u8;
            pattern &= mask_for_clearing_window;
            // cells left of the window are surprising when they are zero
            pattern ^= mask_for_flipping_early_zone;
            all_surprises_ored |= pattern;
            while pattern != 0 {
                let col = pattern.trailing_zeros();
                pattern ^= 1 << col; // erase the 1
                let row_col = ((row as u32) << 6) | col;
                let is_novel = self.surprising_value_table.maybe_insert(row_col);
                debug_assert!(is_novel);
            }
        }

        // the trailing zeros of an all-zero pattern is 64
        (all_surprises_ored.trailing_zeros() as u8).min(offset)
    }

    /// Recomputes `kxp` from scratch to shed accumulated rounding error.
    fn refresh_kxp(&mut self, bit_matrix: &[u64]) {
        if self.merge_flag {
            return;
        }
        // for improved numerical accuracy, we separately sum the bytes of the u64's
        let mut byte_sums = [0.0; 8];
        for &row in bit_matrix {
            let mut word = row;
            for sum in byte_sums.iter_mut() {
                *sum += KXP_BYTE_TABLE[(word & 0xff) as usize];
                word >>= 8;
            }
        }
        let mut total = 0.0;
        // the reverse order is important
        for j in (0..8).rev() {
            let factor = INVERSE_POWERS_OF_2[8 * j]; // 256^-j
            total += factor * byte_sums[j];
        }
        self.kxp = total;
    }

    /// Expands the sketch into a `K x 64` bit matrix, one `u64` per row.
    pub(super) fn build_bit_matrix(&self) -> Vec<u64> {
        let k = 1usize << self.lg_k;
        let offset = self.window_offset;
        debug_assert!(offset <= 56);

        // the columns left of the window are assumed full
        let default_row = (1u64 << offset) - 1;
        let mut matrix = vec![default_row; k];

        for (row, &byte) in self.sliding_window.iter().enumerate() {
            matrix[row] |= (byte as u64) << offset;
        }

        // table entries flip a bit in either direction
        for row_col in self.surprising_value_table.iter() {
            let col = row_col & 63;
            let row = (row_col >> 6) as usize;
            matrix[row] ^= 1u64 << col;
        }
        matrix
    }

    /// Checks that the tables and the window hold exactly `num_coupons` coupons.
    pub fn validate(&self) -> bool {
        if self.window_offset > 56 {
            return false;
        }
        let windowed = !matches!(self.flavor(), Flavor::Empty | Flavor::Sparse);
        if windowed == self.sliding_window.is_empty() {
            return false;
        }
        let bit_matrix = self.build_bit_matrix();
        count_bits_set_in_matrix(&bit_matrix) == self.num_coupons
    }
}

impl CpcSketch {
    pub(super) fn table(&self) -> &PairTable {
        &self.surprising_value_table
    }

    pub(super) fn window(&self) -> &[u8] {
        &self.sliding_window
    }

    pub(super) fn window_offset(&self) -> u8 {
        self.window_offset
    }

    /// Marks the sketch as the product of a union, which permanently disables HIP.
    pub(super) fn mark_merged(&mut self) {
        self.merge_flag = true;
        self.kxp = (1u64 << self.lg_k) as f64;
        self.hip_est_accum = 0.0;
    }

    /// Creates an empty sketch that is already marked merged. `lg_k` must be in range.
    pub(super) fn empty_merged(lg_k: u8, seed: u64) -> Self {
        let mut sketch = Self::new_unchecked(lg_k, seed);
        sketch.mark_merged();
        sketch
    }

    /// Builds a merged sketch holding exactly the coupons set in `bit_matrix`.
    ///
    /// The layout is the one a sketch with the same number of coupons would have reached by
    /// updates: window and offset follow the flavor thresholds.
    pub(super) fn from_bit_matrix(lg_k: u8, seed: u64, bit_matrix: &[u64]) -> Self {
        let mut sketch = Self::empty_merged(lg_k, seed);
        sketch.num_coupons = count_bits_set_in_matrix(bit_matrix);

        match sketch.flavor() {
            Flavor::Empty => {}
            Flavor::Sparse => {
                for (row, &bits) in bit_matrix.iter().enumerate() {
                    let mut pattern = bits;
                    while pattern != 0 {
                        let col = pattern.trailing_zeros();
                        pattern ^= 1 << col;
                        sketch
                            .surprising_value_table
                            .maybe_insert(((row as u32) << 6) | col);
                    }
                }
            }
            Flavor::Hybrid | Flavor::Pinned | Flavor::Sliding => {
                // LgSize = K/16; in some cases this will end up being oversized
                let lg_size = lg_k.saturating_sub(4).max(2);
                sketch.surprising_value_table = PairTable::new(lg_size, 6 + lg_k);
                sketch.sliding_window = vec![0; 1 << lg_k];
                sketch.window_offset = determine_correct_offset(lg_k, sketch.num_coupons);
                sketch.first_interesting_column = sketch.split_bit_matrix(bit_matrix);
            }
        }
        sketch
    }
}

impl CpcSketch {
    /// Returns the estimated maximum serialized size of a sketch.
    ///
    /// For small values of `n` the size can be much smaller.
    ///
    /// # Panics
    ///
    /// Panics if `lg_k` is not in `[4, 26]`.
    pub fn max_serialized_bytes(lg_k: u8) -> usize {
        assert!(
            (MIN_LG_K..=MAX_LG_K).contains(&lg_k),
            "lg_k out of range; got {lg_k}",
        );
        let lg_k = lg_k as usize;

        // These empirical maxima were measured over values of the quantity C/K between 0.06
        // and 9.0 and do not include the worst-case space for the preamble.
        const EMPIRICAL_SIZE_MAX_LGK: usize = 19;
        const EMPIRICAL_MAX_SIZE_BYTES: [usize; 16] = [
            24,     // lg_k = 4
            36,     // lg_k = 5
            56,     // lg_k = 6
            100,    // lg_k = 7
            180,    // lg_k = 8
            344,    // lg_k = 9
            660,    // lg_k = 10
            1292,   // lg_k = 11
            2540,   // lg_k = 12
            5020,   // lg_k = 13
            9968,   // lg_k = 14
            19836,  // lg_k = 15
            39532,  // lg_k = 16
            78880,  // lg_k = 17
            157516, // lg_k = 18
            314656, // lg_k = 19
        ];
        // about 4.8 bits per row once compressed
        const EMPIRICAL_MAX_SIZE_FACTOR: f64 = 0.6;
        const MAX_PREAMBLE_SIZE_BYTES: usize = 40;

        if lg_k <= EMPIRICAL_SIZE_MAX_LGK {
            return EMPIRICAL_MAX_SIZE_BYTES[lg_k - MIN_LG_K as usize] + MAX_PREAMBLE_SIZE_BYTES;
        }
        let k = 1usize << lg_k;
        ((EMPIRICAL_MAX_SIZE_FACTOR * k as f64) as usize) + MAX_PREAMBLE_SIZE_BYTES
    }

    /// Serializes this sketch to bytes.
    ///
    /// # Examples
    ///
    /// ```
    /// # use datasketches_cpc::cpc::CpcSketch;
    /// let mut sketch = CpcSketch::new(11);
    /// sketch.update_str("apple");
    /// let bytes = sketch.serialize();
    /// let restored = CpcSketch::deserialize(&bytes).unwrap();
    /// assert_eq!(sketch.estimate(), restored.estimate());
    /// ```
    pub fn serialize(&self) -> Vec<u8> {
        let flavor = self.flavor();
        let mut pairs = match flavor {
            Flavor::Empty => vec![],
            Flavor::Sparse | Flavor::Hybrid => self.all_coupons_sorted(),
            Flavor::Pinned => {
                debug_assert_eq!(self.window_offset, 0);
                // columns 8.. shift down past the window
                self.surprising_value_table
                    .iter()
                    .map(|pair| {
                        debug_assert!(pair & 63 >= 8, "pair {pair} inside the pinned window");
                        pair - 8
                    })
                    .collect()
            }
            Flavor::Sliding => {
                let phase = determine_pseudo_phase(self.lg_k, self.num_coupons);
                self.surprising_value_table
                    .iter()
                    .map(|pair| {
                        let col = permute_column((pair & 63) as u8, self.window_offset, phase);
                        (pair & !63) | col as u32
                    })
                    .collect()
            }
        };
        pairs.sort_unstable();

        let window_data = match flavor {
            Flavor::Pinned | Flavor::Sliding => {
                compress_window(&self.sliding_window, self.lg_k, self.num_coupons)
            }
            _ => vec![],
        };
        let table_data = compress_pairs(&pairs, self.lg_k);

        let preamble = Preamble {
            lg_k: self.lg_k,
            first_interesting_column: self.first_interesting_column,
            seed_hash: compute_seed_hash(self.seed),
            merged: self.merge_flag,
            num_coupons: self.num_coupons,
            num_table_entries: pairs.len() as u32,
            table_words: table_data.len() as u32,
            window_words: window_data.len() as u32,
            kxp: self.kxp,
            hip_est_accum: self.hip_est_accum,
        };

        let mut bytes = SketchBytes::with_capacity(preamble.serialized_size());
        preamble.write(&mut bytes);
        for word in window_data.into_iter().chain(table_data) {
            bytes.write_u32_le(word);
        }
        bytes.into_bytes()
    }

    /// Every coupon as a sorted pair; only meaningful while the window sits at offset 0.
    fn all_coupons_sorted(&self) -> Vec<u32> {
        debug_assert_eq!(self.window_offset, 0);
        let mut pairs: Vec<u32> = self.surprising_value_table.iter().collect();
        for (row, &byte) in self.sliding_window.iter().enumerate() {
            let mut bits = byte;
            while bits != 0 {
                let col = bits.trailing_zeros();
                bits ^= 1 << col;
                pairs.push(((row as u32) << 6) | col);
            }
        }
        pairs.sort_unstable();
        pairs
    }

    /// Deserializes a sketch from bytes.
    ///
    /// Uses the default seed (9001). For sketches created with a different seed,
    /// use [`deserialize_with_seed`](Self::deserialize_with_seed).
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are invalid or corrupted, or if the sketch was built with
    /// another seed.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        Self::deserialize_with_seed(bytes, DEFAULT_UPDATE_SEED)
    }

    /// Deserializes a sketch from bytes with a specific seed.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The bytes are too short or have trailing data
    /// - The format is invalid (wrong family ID, unsupported version, inconsistent flags)
    /// - The compressed data does not decode to the recorded number of coupons
    /// - The seed hash doesn't match (with [`ErrorKind::SeedMismatch`])
    ///
    /// [`ErrorKind::SeedMismatch`]: crate::error::ErrorKind::SeedMismatch
    pub fn deserialize_with_seed(bytes: &[u8], seed: u64) -> Result<Self, Error> {
        let mut cursor = SketchSlice::new(bytes);
        let preamble = Preamble::read(&mut cursor)?;
        ensure_seed_hash_matches(seed, preamble.seed_hash)?;

        let window_data = cursor
            .read_u32_words(preamble.window_words as usize)
            .map_err(insufficient_data("window_data"))?;
        let table_data = cursor
            .read_u32_words(preamble.table_words as usize)
            .map_err(insufficient_data("table_data"))?;
        if cursor.remaining() != 0 {
            return Err(Error::deserial(format!(
                "{} trailing bytes after sketch data",
                cursor.remaining()
            )));
        }

        let lg_k = preamble.lg_k;
        let num_coupons = preamble.num_coupons;
        let mut sketch = Self::new_unchecked(lg_k, seed);
        sketch.num_coupons = num_coupons;
        if preamble.merged {
            sketch.mark_merged();
        } else {
            sketch.kxp = preamble.kxp;
            sketch.hip_est_accum = preamble.hip_est_accum;
        }

        let pairs = uncompress_pairs(&table_data, preamble.num_table_entries, lg_k)?;
        let flavor = sketch.flavor();
        match flavor {
            Flavor::Empty => {}
            Flavor::Sparse => {
                sketch.surprising_value_table = PairTable::from_items(lg_k, &pairs);
            }
            Flavor::Hybrid => {
                sketch.sliding_window = vec![0; 1 << lg_k];
                let mut surprises = Vec::with_capacity(pairs.len());
                for pair in pairs {
                    let col = pair & 63;
                    if col < 8 {
                        sketch.sliding_window[(pair >> 6) as usize] |= 1 << col;
                    } else {
                        surprises.push(pair);
                    }
                }
                sketch.surprising_value_table = PairTable::from_items(lg_k, &surprises);
            }
            Flavor::Pinned | Flavor::Sliding => {
                sketch.sliding_window = uncompress_window(&window_data, lg_k, num_coupons)?;
                let offset = determine_correct_offset(lg_k, num_coupons);
                if offset > 56 {
                    return Err(Error::deserial(format!(
                        "window offset {offset} implied by {num_coupons} coupons is past 56"
                    )));
                }
                sketch.window_offset = offset;
                let phase = determine_pseudo_phase(lg_k, num_coupons);
                let surprises = pairs
                    .into_iter()
                    .map(|pair| {
                        let code = (pair & 63) as u8;
                        let col = if flavor == Flavor::Pinned {
                            if code >= 56 {
                                return Err(Error::deserial(format!(
                                    "pinned column code {code} is out of range"
                                )));
                            }
                            code + 8
                        } else {
                            unpermute_column(code, offset, phase)?
                        };
                        let pair = (pair & !63) | col as u32;
                        if pair == EMPTY_SLOT {
                            return Err(Error::deserial(
                                "pair collides with the empty slot marker",
                            ));
                        }
                        Ok(pair)
                    })
                    .collect::<Result<Vec<_>, Error>>()?;
                sketch.surprising_value_table = PairTable::from_items(lg_k, &surprises);
            }
        }

        if preamble.first_interesting_column > sketch.window_offset {
            return Err(Error::deserial(format!(
                "first interesting column {} is past the window offset {}",
                preamble.first_interesting_column, sketch.window_offset
            )));
        }
        sketch.first_interesting_column = preamble.first_interesting_column;

        let counted = sketch.count_coupons();
        if counted != u64::from(num_coupons) {
            return Err(Error::deserial(format!(
                "decoded data holds {counted} coupons, expected {num_coupons}"
            )));
        }
        Ok(sketch)
    }

    /// Counts coupons from the window and the table without expanding the bit matrix.
    ///
    /// Decoded pairs are distinct, so every table entry is one coupon in the sparse flavor.
    /// Once windowed, an entry left of the window marks a missing cell in an otherwise full
    /// region, and an entry right of it marks a present one.
    fn count_coupons(&self) -> u64 {
        let table_entries = u64::from(self.surprising_value_table.num_items());
        if self.sliding_window.is_empty() {
            return table_entries;
        }
        let offset = u32::from(self.window_offset);
        let window: u64 = self
            .sliding_window
            .iter()
            .map(|byte| u64::from(byte.count_ones()))
            .sum();
        let missing = self
            .surprising_value_table
            .iter()
            .filter(|pair| pair & 63 < offset)
            .count() as u64;
        let left_of_window = (1u64 << self.lg_k) * u64::from(offset);
        window + (left_of_window - missing) + (table_entries - missing)
    }
}

impl fmt::Display for CpcSketch {
    /// Writes a human readable summary of the sketch state.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "### CPC sketch summary:")?;
        writeln!(f, "   lg_k           : {}", self.lg_k)?;
        writeln!(f, "   seed hash      : {:x}", compute_seed_hash(self.seed))?;
        writeln!(f, "   C              : {}", self.num_coupons)?;
        writeln!(f, "   flavor         : {}", self.flavor().code())?;
        writeln!(f, "   merged         : {}", self.merge_flag)?;
        if !self.merge_flag {
            writeln!(
                f,
                "   HIP estimate   : {}",
                format_significant(self.hip_est_accum, 6)
            )?;
            writeln!(f, "   kxp            : {}", format_significant(self.kxp, 6))?;
        }
        writeln!(f, "   interesting col: {}", self.first_interesting_column)?;
        writeln!(
            f,
            "   table entries  : {}",
            self.surprising_value_table.num_items()
        )?;
        if self.sliding_window.is_empty() {
            writeln!(f, "   window         : not allocated")?;
        } else {
            writeln!(f, "   window         : allocated")?;
            writeln!(f, "   window offset  : {}", self.window_offset)?;
        }
        writeln!(f, "### End sketch summary")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sketch_with(lg_k: u8, n: u64) -> CpcSketch {
        let mut sketch = CpcSketch::new(lg_k);
        for i in 0..n {
            sketch.update(i);
        }
        sketch
    }

    #[test]
    fn test_flavor_progression() {
        let lg_k = 8; // K = 256
        let mut sketch = CpcSketch::new(lg_k);
        let mut seen = vec![sketch.flavor()];
        let mut i = 0u64;
        while sketch.flavor() != Flavor::Sliding {
            sketch.update(i);
            i += 1;
            if seen.last() != Some(&sketch.flavor()) {
                seen.push(sketch.flavor());
            }
            assert!(sketch.validate(), "invalid after {i} updates");
        }
        assert_eq!(
            seen,
            vec![
                Flavor::Empty,
                Flavor::Sparse,
                Flavor::Hybrid,
                Flavor::Pinned,
                Flavor::Sliding
            ]
        );
        assert_eq!(sketch.window_offset, 1);
    }

    #[test]
    fn test_window_moves_and_kxp_refresh() {
        // enough items at K = 16 to slide the window past offset 8
        let sketch = sketch_with(4, 100_000);
        assert!(sketch.validate());
        assert!(sketch.window_offset >= 8);
        assert_eq!(
            sketch.window_offset,
            determine_correct_offset(4, sketch.num_coupons)
        );
        assert!(sketch.first_interesting_column <= sketch.window_offset);

        // kxp must equal the probability mass of the empty cells
        let matrix = sketch.build_bit_matrix();
        let mut expected = 0.0;
        for row in matrix {
            for col in 0..64 {
                if row & (1 << col) == 0 {
                    expected += INVERSE_POWERS_OF_2[col + 1];
                }
            }
        }
        let relative = (sketch.kxp - expected).abs() / expected;
        assert!(relative < 1e-9, "kxp {} vs {expected}", sketch.kxp);
    }

    #[test]
    fn test_bit_matrix_round_trip() {
        for n in [0, 10, 100, 1000, 10_000] {
            let sketch = sketch_with(6, n);
            let matrix = sketch.build_bit_matrix();
            let rebuilt = CpcSketch::from_bit_matrix(6, DEFAULT_UPDATE_SEED, &matrix);
            assert!(rebuilt.validate());
            assert!(rebuilt.is_merged());
            assert_eq!(rebuilt.num_coupons, sketch.num_coupons);
            assert_eq!(rebuilt.window_offset, sketch.window_offset);
            assert_eq!(rebuilt.build_bit_matrix(), sketch.build_bit_matrix());
        }
    }

    #[test]
    fn test_count_coupons_matches_bit_matrix() {
        let cases = [
            (4, 0),
            (4, 3),
            (4, 100_000),
            (6, 50),
            (8, 300),
            (8, 5_000),
            (10, 100_000),
        ];
        for (lg_k, n) in cases {
            let sketch = sketch_with(lg_k, n);
            let matrix = sketch.build_bit_matrix();
            let bits = count_bits_set_in_matrix(&matrix);
            assert_eq!(sketch.count_coupons(), u64::from(bits));
            assert_eq!(sketch.count_coupons(), u64::from(sketch.num_coupons));
        }
    }

    #[test]
    fn test_first_interesting_column_skips_full_columns() {
        let mut sketch = sketch_with(4, 100_000);
        let before = sketch.num_coupons;
        let matrix = sketch.build_bit_matrix();
        let full = sketch.first_interesting_column;
        assert!(matrix.iter().all(|row| row & ((1 << full) - 1) == (1 << full) - 1));
        // a coupon in a full column changes nothing
        if full > 0 {
            sketch.row_col_update(0);
            assert_eq!(sketch.num_coupons, before);
        }
    }

    #[test]
    fn test_try_with_seed_rejects_lg_k() {
        assert!(CpcSketch::try_with_seed(3, 1).is_err());
        assert!(CpcSketch::try_with_seed(27, 1).is_err());
        assert_eq!(CpcSketch::try_with_seed(26, 1).unwrap().lg_k(), 26);
    }

    #[test]
    #[should_panic(expected = "lg_k out of range")]
    fn test_new_panics_on_bad_lg_k() {
        let _ = CpcSketch::new(2);
    }
}
