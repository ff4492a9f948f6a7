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

use crate::codec::assert::ensure_seed_hash_matches;
use crate::cpc::CpcSketch;
use crate::cpc::DEFAULT_LG_K;
use crate::cpc::Flavor;
use crate::cpc::MAX_LG_K;
use crate::cpc::MIN_LG_K;
use crate::cpc::check_lg_k;
use crate::cpc::pair_table::EMPTY_SLOT;
use crate::error::Error;
use crate::hash::DEFAULT_UPDATE_SEED;
use crate::hash::compute_seed_hash;

/// The union (merge) operation for CPC sketches.
///
/// Sketches with a different `lg_k` can be merged: the union then shrinks to the smallest `lg_k`
/// it has seen. Sketches built with another seed are rejected.
///
/// # Examples
///
/// ```
/// # use datasketches_cpc::cpc::{CpcSketch, CpcUnion};
/// let mut a = CpcSketch::new(10);
/// let mut b = CpcSketch::new(12);
/// a.update_str("apple");
/// b.update_str("banana");
///
/// let mut union = CpcUnion::new(12);
/// union.update(&a).unwrap();
/// union.update(&b).unwrap();
/// assert_eq!(union.lg_k(), 10);
/// assert!((union.to_sketch().estimate() - 2.0).abs() < 0.01);
/// ```
#[derive(Debug, Clone)]
pub struct CpcUnion {
    lg_k: u8,
    seed: u64,
    state: UnionState,
}

/// Exactly one representation is live at any time.
#[derive(Debug, Clone)]
enum UnionState {
    /// A sparse sketch collecting coupons while the union is small. Always `Empty` or `Sparse`.
    Accumulator(CpcSketch),
    /// One `u64` row per `K` once the union has outgrown the accumulator.
    BitMatrix(Vec<u64>),
}

impl Default for CpcUnion {
    fn default() -> Self {
        Self::new(DEFAULT_LG_K)
    }
}

impl CpcUnion {
    /// Creates a new union with the given `lg_k` and the default seed.
    ///
    /// # Panics
    ///
    /// Panics if `lg_k` is not in `[4, 26]`.
    pub fn new(lg_k: u8) -> Self {
        Self::with_seed(lg_k, DEFAULT_UPDATE_SEED)
    }

    /// Creates a new union with the given `lg_k` and `seed`.
    ///
    /// # Panics
    ///
    /// Panics if `lg_k` is not in `[4, 26]`.
    pub fn with_seed(lg_k: u8, seed: u64) -> Self {
        assert!(
            (MIN_LG_K..=MAX_LG_K).contains(&lg_k),
            "lg_k out of range; got {lg_k}",
        );
        Self {
            lg_k,
            seed,
            state: UnionState::Accumulator(CpcSketch::empty_merged(lg_k, seed)),
        }
    }

    /// Creates a new union, returning an error instead of panicking on a bad `lg_k`.
    pub fn try_with_seed(lg_k: u8, seed: u64) -> Result<Self, Error> {
        check_lg_k(lg_k)?;
        Ok(Self::with_seed(lg_k, seed))
    }

    /// Returns the current `lg_k`, which may have shrunk below the configured one.
    pub fn lg_k(&self) -> u8 {
        self.lg_k
    }

    /// Returns the hash seed.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Merges `sketch` into the union.
    ///
    /// # Errors
    ///
    /// Returns an error of kind [`SeedMismatch`](crate::error::ErrorKind::SeedMismatch) if the
    /// sketch was built with a different seed.
    pub fn update(&mut self, sketch: &CpcSketch) -> Result<(), Error> {
        ensure_seed_hash_matches(self.seed, compute_seed_hash(sketch.seed()))?;

        let source_flavor = sketch.flavor();
        if source_flavor == Flavor::Empty {
            return Ok(());
        }

        if sketch.lg_k() < self.lg_k {
            self.reduce_k(sketch.lg_k());
        }
        debug_assert!(self.lg_k <= sketch.lg_k());

        match source_flavor {
            Flavor::Empty => unreachable!("empty sources return early"),
            Flavor::Sparse => self.merge_sparse(sketch),
            Flavor::Hybrid | Flavor::Pinned => {
                let mask = self.row_mask();
                let matrix = self.switch_to_bit_matrix();
                or_window_into_matrix(matrix, sketch.window(), sketch.window_offset(), mask);
                or_table_into_matrix(matrix, sketch.table().iter(), mask);
            }
            Flavor::Sliding => {
                let mask = self.row_mask();
                let matrix = self.switch_to_bit_matrix();
                for (row, bits) in sketch.build_bit_matrix().into_iter().enumerate() {
                    matrix[row & mask] |= bits;
                }
            }
        }
        Ok(())
    }

    /// Returns the merged sketch. The union stays usable.
    pub fn to_sketch(&self) -> CpcSketch {
        match &self.state {
            UnionState::Accumulator(accumulator) => {
                if accumulator.is_empty() {
                    return CpcSketch::empty_merged(self.lg_k, self.seed);
                }
                let mut sketch = accumulator.clone();
                sketch.mark_merged();
                sketch
            }
            UnionState::BitMatrix(matrix) => {
                CpcSketch::from_bit_matrix(self.lg_k, self.seed, matrix)
            }
        }
    }

    fn merge_sparse(&mut self, sketch: &CpcSketch) {
        let mask = self.row_mask();
        let overflowed = match &mut self.state {
            UnionState::Accumulator(accumulator) => {
                if accumulator.is_empty() && accumulator.lg_k() == sketch.lg_k() {
                    let mut copy = sketch.clone();
                    copy.mark_merged();
                    *accumulator = copy;
                } else {
                    walk_table_updating_sketch(accumulator, sketch.table().slots());
                }
                accumulator.flavor() > Flavor::Sparse
            }
            UnionState::BitMatrix(matrix) => {
                or_table_into_matrix(matrix, sketch.table().iter(), mask);
                false
            }
        };
        if overflowed {
            self.switch_to_bit_matrix();
        }
    }

    /// Converts the accumulator, if live, into a bit matrix and returns the matrix.
    fn switch_to_bit_matrix(&mut self) -> &mut Vec<u64> {
        if let UnionState::Accumulator(accumulator) = &self.state {
            let matrix = accumulator.build_bit_matrix();
            tracing::debug!(
                lg_k = self.lg_k,
                num_coupons = accumulator.num_coupons(),
                "CPC union switched from accumulator to bit matrix"
            );
            self.state = UnionState::BitMatrix(matrix);
        }
        match &mut self.state {
            UnionState::BitMatrix(matrix) => matrix,
            UnionState::Accumulator(_) => unreachable!("state was just switched"),
        }
    }

    /// Shrinks the union to `new_lg_k` by folding rows together.
    fn reduce_k(&mut self, new_lg_k: u8) {
        debug_assert!(new_lg_k < self.lg_k);
        tracing::debug!(from = self.lg_k, to = new_lg_k, "reducing CPC union lg_k");

        let mask = row_mask(new_lg_k);
        let state = match &self.state {
            UnionState::BitMatrix(old_matrix) => {
                let mut matrix = vec![0u64; 1 << new_lg_k];
                for (row, &bits) in old_matrix.iter().enumerate() {
                    matrix[row & mask] |= bits;
                }
                UnionState::BitMatrix(matrix)
            }
            UnionState::Accumulator(old) => {
                let mut accumulator = CpcSketch::empty_merged(new_lg_k, self.seed);
                if !old.is_empty() {
                    walk_table_updating_sketch(&mut accumulator, old.table().slots());
                }
                if accumulator.flavor() > Flavor::Sparse {
                    UnionState::BitMatrix(accumulator.build_bit_matrix())
                } else {
                    UnionState::Accumulator(accumulator)
                }
            }
        };
        self.lg_k = new_lg_k;
        self.state = state;
    }

    fn row_mask(&self) -> usize {
        row_mask(self.lg_k)
    }
}

fn row_mask(lg_k: u8) -> usize {
    (1usize << lg_k) - 1
}

/// Feeds the pairs of a sparse sketch's table into `dest`, folding rows to its `lg_k`.
///
/// The slots are visited in a stride order rather than sequentially, which keeps the
/// destination table from seeing long runs of clustered keys.
fn walk_table_updating_sketch(dest: &mut CpcSketch, slots: &[u32]) {
    let num_slots = slots.len();
    debug_assert!(num_slots.is_power_of_two());
    let dest_mask = ((row_mask(dest.lg_k()) as u32) << 6) | 63;

    // Using the inverse golden ratio stride fixes the snowplow effect.
    let mut stride = (0.6180339887498949 * num_slots as f64) as usize;
    debug_assert!(stride >= 2);
    if stride % 2 == 0 {
        stride += 1; // force the stride to be odd
    }

    let mut j = 0;
    for _ in 0..num_slots {
        j = (j + stride) & (num_slots - 1);
        let row_col = slots[j];
        if row_col != EMPTY_SLOT {
            dest.row_col_update(row_col & dest_mask);
        }
    }
}

fn or_table_into_matrix(matrix: &mut [u64], pairs: impl Iterator<Item = u32>, mask: usize) {
    for row_col in pairs {
        let col = row_col & 63;
        let row = (row_col >> 6) as usize;
        matrix[row & mask] |= 1u64 << col;
    }
}

fn or_window_into_matrix(matrix: &mut [u64], window: &[u8], offset: u8, mask: usize) {
    for (row, &byte) in window.iter().enumerate() {
        matrix[row & mask] |= (byte as u64) << offset;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sketch_of(lg_k: u8, range: std::ops::Range<u64>) -> CpcSketch {
        let mut sketch = CpcSketch::new(lg_k);
        for i in range {
            sketch.update(i);
        }
        sketch
    }

    fn accumulator_coupons(union: &CpcUnion) -> Option<u32> {
        match &union.state {
            UnionState::Accumulator(sketch) => Some(sketch.num_coupons()),
            UnionState::BitMatrix(_) => None,
        }
    }

    #[test]
    fn test_sparse_sources_stay_in_accumulator() {
        let mut union = CpcUnion::new(10);
        union.update(&sketch_of(10, 0..20)).unwrap();
        union.update(&sketch_of(10, 10..30)).unwrap();
        assert_eq!(accumulator_coupons(&union), Some(30));
        let result = union.to_sketch();
        assert!(result.is_merged());
        assert!(result.validate());
        assert_eq!(result.num_coupons(), 30);
    }

    #[test]
    fn test_accumulator_overflow_switches_to_matrix() {
        let mut union = CpcUnion::new(8);
        // two sparse sources whose union is past the sparse threshold (24 coupons at K = 256)
        union.update(&sketch_of(8, 0..20)).unwrap();
        union.update(&sketch_of(8, 20..40)).unwrap();
        assert_eq!(accumulator_coupons(&union), None);

        let mut direct = CpcSketch::new(8);
        for i in 0..40u64 {
            direct.update(i);
        }
        let result = union.to_sketch();
        assert!(result.validate());
        assert_eq!(result.flavor(), Flavor::Hybrid);
        assert_eq!(result.num_coupons(), direct.num_coupons());
        assert_eq!(result.build_bit_matrix(), direct.build_bit_matrix());
    }

    #[test]
    fn test_reduce_k_folds_rows() {
        let big = sketch_of(12, 0..100);
        let small = sketch_of(8, 1000..1010);
        let mut union = CpcUnion::new(12);
        union.update(&big).unwrap();
        union.update(&small).unwrap();
        assert_eq!(union.lg_k(), 8);

        let mut expected = vec![0u64; 256];
        for source in [&big, &small] {
            for (row, bits) in source.build_bit_matrix().into_iter().enumerate() {
                expected[row & 255] |= bits;
            }
        }
        assert_eq!(union.to_sketch().build_bit_matrix(), expected);
    }

    #[test]
    fn test_reduce_k_of_bit_matrix() {
        let mut union = CpcUnion::new(10);
        union.update(&sketch_of(10, 0..5000)).unwrap();
        assert_eq!(accumulator_coupons(&union), None);
        union.update(&sketch_of(6, 0..5)).unwrap();
        assert_eq!(union.lg_k(), 6);
        let result = union.to_sketch();
        assert!(result.validate());
        assert_eq!(result.lg_k(), 6);
    }

    #[test]
    fn test_stride_walk_visits_every_slot() {
        for lg_size in 2..12 {
            let num_slots = 1usize << lg_size;
            let mut stride = (0.6180339887498949 * num_slots as f64) as usize;
            if stride % 2 == 0 {
                stride += 1;
            }
            let mut seen = vec![false; num_slots];
            let mut j = 0;
            for _ in 0..num_slots {
                j = (j + stride) & (num_slots - 1);
                seen[j] = true;
            }
            assert!(seen.into_iter().all(|s| s), "lg_size {lg_size}");
        }
    }
}
