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

//! Compressed Probabilistic Counting sketch.
//!
//! This is a unique-counting sketch that implements the Compressed Probabilistic Counting (CPC,
//! a.k.a. FM85) algorithms developed by Kevin Lang in his paper [Back to the Future: an Even More
//! Nearly Optimal Cardinality Estimation Algorithm](https://arxiv.org/abs/1708.06839).
//!
//! Each item is hashed to a coupon, a `(row, column)` cell of a conceptual `K x 64` bit matrix.
//! Depending on how many coupons have been collected, the sketch stores the matrix in one of
//! several [`Flavor`]s: a sparse hash set of pairs, or a dense one-byte-per-row sliding window
//! plus a small table of "surprising" cells that disagree with what the window implies.
//!
//! A sketch that has only seen updates answers with the [Historical Inverse Probability
//! (HIP)](https://arxiv.org/abs/1306.3284) estimator. HIP does not survive merging, so the
//! result of a [`CpcUnion`] falls back to the ICON estimator, which only needs `lg_k` and the
//! number of coupons.
//!
//! The union also allows merging sketches configured with different values of K; the result
//! takes the smallest K.
//!
//! # Examples
//!
//! ```
//! use datasketches_cpc::common::NumStdDev;
//! use datasketches_cpc::cpc::CpcSketch;
//! use datasketches_cpc::cpc::CpcUnion;
//!
//! let mut a = CpcSketch::new(11);
//! let mut b = CpcSketch::new(11);
//! for i in 0..1000 {
//!     a.update(i);
//!     b.update(i + 500);
//! }
//!
//! let mut union = CpcUnion::new(11);
//! union.update(&a).unwrap();
//! union.update(&b).unwrap();
//! let merged = union.to_sketch();
//! assert!(merged.is_merged());
//! assert!(merged.lower_bound(NumStdDev::Two) <= merged.estimate());
//!
//! let restored = CpcSketch::deserialize(&merged.serialize()).unwrap();
//! assert_eq!(restored.estimate(), merged.estimate());
//! ```

mod compression;
mod compression_data;
mod estimator;
mod icon_estimator;
mod kxp_byte_lookup;
mod pair_table;
mod serialization;
mod sketch;
mod union;
mod wrapper;

use std::fmt;

pub use self::sketch::CpcSketch;
pub use self::union::CpcUnion;
pub use self::wrapper::CpcWrapper;
use crate::error::Error;

/// Default log2 of K.
pub const DEFAULT_LG_K: u8 = 11;
/// Min log2 of K.
pub const MIN_LG_K: u8 = 4;
/// Max log2 of K.
pub const MAX_LG_K: u8 = 26;

/// The internal representation a sketch uses, fully determined by `lg_k` and the number of
/// coupons `C`.
#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub enum Flavor {
    /// `C == 0`
    Empty,
    /// `1 <= C < 3K/32`: every coupon lives in the pair table.
    Sparse,
    /// `3K/32 <= C < K/2`: columns `0..8` live in the window, the rest in the table.
    Hybrid,
    /// `K/2 <= C < 27K/8`: as hybrid, and the table also tracks missing cells left of the
    /// window (which is still at offset 0).
    Pinned,
    /// `27K/8 <= C`: the window has started sliding to the right.
    Sliding,
}

impl Flavor {
    /// Returns the numeric code of this flavor (0 for empty up to 4 for sliding).
    pub const fn code(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Flavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Flavor::Empty => "EMPTY",
            Flavor::Sparse => "SPARSE",
            Flavor::Hybrid => "HYBRID",
            Flavor::Pinned => "PINNED",
            Flavor::Sliding => "SLIDING",
        };
        f.write_str(name)
    }
}

pub(crate) fn check_lg_k(lg_k: u8) -> Result<(), Error> {
    if (MIN_LG_K..=MAX_LG_K).contains(&lg_k) {
        Ok(())
    } else {
        Err(Error::invalid_argument(format!(
            "lg_k must be in [{MIN_LG_K}, {MAX_LG_K}], got {lg_k}"
        )))
    }
}

fn count_bits_set_in_matrix(matrix: &[u64]) -> u32 {
    matrix.iter().map(|word| word.count_ones()).sum()
}

fn determine_flavor(lg_k: u8, num_coupons: u32) -> Flavor {
    let k = 1u64 << lg_k;
    let c = num_coupons as u64;
    if c == 0 {
        Flavor::Empty
    } else if (c << 5) < (3 * k) {
        Flavor::Sparse
    } else if (c << 1) < k {
        Flavor::Hybrid
    } else if (c << 3) < (27 * k) {
        Flavor::Pinned
    } else {
        Flavor::Sliding
    }
}

fn determine_correct_offset(lg_k: u8, num_coupons: u32) -> u8 {
    let k = 1i64 << lg_k;
    let tmp = ((num_coupons as i64) << 3) - (19 * k); // 8C - 19K
    if tmp < 0 {
        0
    } else {
        (tmp >> (lg_k + 3)) as u8 // tmp / 8K
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_determine_flavor_thresholds() {
        // K = 1024
        assert_eq!(determine_flavor(10, 0), Flavor::Empty);
        assert_eq!(determine_flavor(10, 1), Flavor::Sparse);
        assert_eq!(determine_flavor(10, 95), Flavor::Sparse);
        assert_eq!(determine_flavor(10, 96), Flavor::Hybrid);
        assert_eq!(determine_flavor(10, 511), Flavor::Hybrid);
        assert_eq!(determine_flavor(10, 512), Flavor::Pinned);
        assert_eq!(determine_flavor(10, 3455), Flavor::Pinned);
        assert_eq!(determine_flavor(10, 3456), Flavor::Sliding);
        assert_eq!(determine_flavor(26, u32::MAX), Flavor::Sliding);
    }

    #[test]
    fn test_determine_correct_offset() {
        assert_eq!(determine_correct_offset(10, 0), 0);
        assert_eq!(determine_correct_offset(10, 3455), 0);
        // 8C - 19K = 8K exactly at C = 27K/8
        assert_eq!(determine_correct_offset(10, 3456), 1);
        assert_eq!(determine_correct_offset(10, 4479), 1);
        assert_eq!(determine_correct_offset(10, 4480), 2);
    }

    #[test]
    fn test_flavor_codes() {
        assert_eq!(Flavor::Empty.code(), 0);
        assert_eq!(Flavor::Sliding.code(), 4);
        assert_eq!(Flavor::Hybrid.to_string(), "HYBRID");
    }
}
