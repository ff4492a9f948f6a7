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

use datasketches_cpc::common::NumStdDev;
use datasketches_cpc::cpc::CpcSketch;
use datasketches_cpc::cpc::Flavor;
use googletest::assert_that;
use googletest::prelude::eq;
use googletest::prelude::ge;
use googletest::prelude::gt;
use googletest::prelude::le;
use googletest::prelude::lt;
use googletest::prelude::near;

const RELATIVE_ERROR_FOR_LG_K_11: f64 = 0.02;

fn sketch_of_range(lg_k: u8, seed: u64, range: std::ops::RangeInclusive<i64>) -> CpcSketch {
    let mut sketch = CpcSketch::with_seed(lg_k, seed);
    for i in range {
        sketch.update(i);
    }
    sketch
}

#[test]
fn test_empty() {
    let sketch = CpcSketch::new(11);
    assert!(sketch.is_empty());
    assert!(!sketch.is_merged());
    assert_eq!(sketch.flavor(), Flavor::Empty);
    assert_eq!(sketch.estimate(), 0.0);
    assert_eq!(sketch.lower_bound(NumStdDev::One), 0.0);
    assert_eq!(sketch.upper_bound(NumStdDev::One), 0.0);
    assert!(sketch.validate());
}

#[test]
fn test_one_value() {
    let mut sketch = CpcSketch::new(11);
    sketch.update(1);
    assert!(!sketch.is_empty());
    assert_eq!(sketch.flavor(), Flavor::Sparse);
    assert_eq!(sketch.estimate(), 1.0);
    assert_that!(sketch.estimate(), ge(sketch.lower_bound(NumStdDev::One)));
    assert_that!(sketch.estimate(), le(sketch.upper_bound(NumStdDev::One)));
}

#[test]
fn test_duplicates_are_idempotent() {
    let mut sketch = CpcSketch::new(11);
    for _ in 0..100 {
        sketch.update_str("a");
        sketch.update(42i64);
    }
    assert_eq!(sketch.num_coupons(), 2);
    let before = sketch.serialize();
    sketch.update_str("a");
    assert_eq!(sketch.serialize(), before);
}

#[test]
fn test_many_values() {
    const N: usize = 10000;
    const N_F64: f64 = N as f64;

    let mut sketch = CpcSketch::new(11);
    for i in 0..N {
        sketch.update(i);
    }
    assert!(!sketch.is_empty());
    assert!(sketch.validate());
    assert_that!(
        sketch.estimate(),
        near(N_F64, RELATIVE_ERROR_FOR_LG_K_11 * N_F64)
    );
    assert_that!(sketch.estimate(), ge(sketch.lower_bound(NumStdDev::One)));
    assert_that!(sketch.estimate(), le(sketch.upper_bound(NumStdDev::One)));
}

#[test]
fn test_strings_hash_raw_bytes() {
    let mut sketch = CpcSketch::new(11);
    for s in ["a", "b", "c"] {
        sketch.update_str(s);
    }
    assert_eq!(sketch.num_coupons(), 3);
    assert_that!(sketch.estimate(), near(3.0007327200292515, 1e-12));

    let mut bytes = CpcSketch::new(11);
    for s in ["a", "b", "c"] {
        bytes.update_bytes(s.as_bytes());
    }
    assert_eq!(bytes.serialize(), sketch.serialize());
}

#[test]
fn test_int64_range_lg_k_11() {
    let sketch = sketch_of_range(11, 9001, 1..=10000);
    assert_eq!(sketch.num_coupons(), 5376);
    assert_eq!(sketch.flavor(), Flavor::Pinned);
    assert_that!(sketch.estimate(), near(9912.033040262888, 1e-9));
    assert_that!(sketch.estimate(), near(10000.0, 0.03 * 10000.0));

    let sketch = sketch_of_range(11, 9001, 100000..=110000);
    assert_eq!(sketch.num_coupons(), 5360);
    assert_that!(sketch.estimate(), near(9940.759099131006, 1e-9));
}

#[test]
fn test_int64_range_lg_k_10_custom_seed() {
    let sketch = sketch_of_range(10, 111, 1..=10000);
    assert_eq!(sketch.seed(), 111);
    assert_eq!(sketch.num_coupons(), 3739);
    assert_eq!(sketch.flavor(), Flavor::Sliding);
    assert_that!(sketch.estimate(), near(10215.099161258, 1e-9));

    let sketch = sketch_of_range(10, 111, 100000..=110000);
    assert_eq!(sketch.num_coupons(), 3663);
    assert_that!(sketch.estimate(), near(9927.018622344847, 1e-9));
}

#[test]
fn test_to_string() {
    let sketch = sketch_of_range(11, 9001, 1..=10000);
    insta::assert_snapshot!(sketch.to_string().trim_end(), @r"
### CPC sketch summary:
   lg_k           : 11
   seed hash      : 93cc
   C              : 5376
   flavor         : 3
   merged         : false
   HIP estimate   : 9912.03
   kxp            : 595.238
   interesting col: 0
   table entries  : 38
   window         : allocated
   window offset  : 0
### End sketch summary
");

    let sketch = sketch_of_range(10, 111, 1..=10000);
    insta::assert_snapshot!(sketch.to_string().trim_end(), @r"
### CPC sketch summary:
   lg_k           : 10
   seed hash      : d38c
   C              : 3739
   flavor         : 4
   merged         : false
   HIP estimate   : 10215.1
   kxp            : 147.338
   interesting col: 0
   table entries  : 19
   window         : allocated
   window offset  : 1
### End sketch summary
");
}

#[test]
fn test_flavors_follow_coupon_count() {
    let lg_k = 10;
    let k = 1u32 << lg_k;
    let mut sketch = CpcSketch::new(lg_k);
    let mut i = 0u64;
    while sketch.num_coupons() < 6 * k {
        sketch.update(i);
        i += 1;
        let c = sketch.num_coupons();
        let expected = if 32 * c < 3 * k {
            Flavor::Sparse
        } else if 2 * c < k {
            Flavor::Hybrid
        } else if 8 * c < 27 * k {
            Flavor::Pinned
        } else {
            Flavor::Sliding
        };
        assert_eq!(sketch.flavor(), expected, "C = {c}");
    }
    assert!(sketch.validate());
}

#[test]
fn test_estimate_tracks_cardinality_over_flavors() {
    let mut sketch = CpcSketch::new(11);
    let mut n = 0u64;
    for target in [10u64, 100, 1_000, 10_000, 100_000, 1_000_000] {
        while n < target {
            sketch.update(n);
            n += 1;
        }
        let est = sketch.estimate();
        let lb = sketch.lower_bound(NumStdDev::Three);
        let ub = sketch.upper_bound(NumStdDev::Three);
        assert_that!(lb, le(n as f64));
        assert_that!(ub, ge(n as f64));
        assert_that!(est, near(n as f64, 0.05 * n as f64));
    }
    assert!(sketch.validate());
}

#[test]
fn test_bounds_narrow_with_lg_k() {
    let mut widths = vec![];
    for lg_k in [8, 10, 12, 14] {
        let mut sketch = CpcSketch::new(lg_k);
        for i in 0..100_000u64 {
            sketch.update(i);
        }
        let width =
            sketch.upper_bound(NumStdDev::Two) - sketch.lower_bound(NumStdDev::Two);
        widths.push(width);
    }
    for pair in widths.windows(2) {
        assert_that!(pair[1], lt(pair[0]));
    }
}

#[test]
fn test_bounds_widen_with_kappa() {
    let mut sketch = CpcSketch::new(11);
    for i in 0..50_000u64 {
        sketch.update(i);
    }
    let est = sketch.estimate();
    let mut prev = (est, est);
    for kappa in [NumStdDev::One, NumStdDev::Two, NumStdDev::Three] {
        let lb = sketch.lower_bound(kappa);
        let ub = sketch.upper_bound(kappa);
        assert_that!(lb, lt(prev.0));
        assert_that!(ub, gt(prev.1));
        prev = (lb, ub);
    }
}

#[test]
fn test_update_float_canonicalization() {
    let mut sketch = CpcSketch::new(11);
    sketch.update_f64(0.0);
    sketch.update_f64(-0.0);
    assert_eq!(sketch.num_coupons(), 1);
    sketch.update_f64(f64::NAN);
    sketch.update_f64(-f64::NAN);
    assert_eq!(sketch.num_coupons(), 2);
    sketch.update_f32(1.5);
    sketch.update_f64(1.5);
    assert_eq!(sketch.num_coupons(), 3);
}

#[test]
fn test_lg_k_limits() {
    for lg_k in [4, 26] {
        let mut sketch = CpcSketch::new(lg_k);
        sketch.update(1u64);
        assert_that!(sketch.lg_k(), eq(lg_k));
        assert_eq!(sketch.num_coupons(), 1);
    }
    assert!(CpcSketch::try_with_seed(3, 9001).is_err());
    assert!(CpcSketch::try_with_seed(27, 9001).is_err());
}

#[test]
fn test_small_lg_k_slides_far() {
    // K = 16 fills up quickly, so the window slides across most of the columns
    let mut sketch = CpcSketch::new(4);
    for i in 0..1_000_000u64 {
        sketch.update(i);
    }
    assert!(sketch.validate());
    assert_eq!(sketch.flavor(), Flavor::Sliding);
    assert_that!(sketch.estimate(), near(1_000_000.0, 0.5 * 1_000_000.0));
}
