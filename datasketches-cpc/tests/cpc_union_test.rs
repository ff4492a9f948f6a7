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
use datasketches_cpc::cpc::CpcUnion;
use datasketches_cpc::cpc::Flavor;
use datasketches_cpc::error::ErrorKind;
use googletest::assert_that;
use googletest::prelude::eq;
use googletest::prelude::ge;
use googletest::prelude::le;
use googletest::prelude::near;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

fn sketch_of_range(lg_k: u8, seed: u64, range: std::ops::RangeInclusive<i64>) -> CpcSketch {
    let mut sketch = CpcSketch::with_seed(lg_k, seed);
    for i in range {
        sketch.update(i);
    }
    sketch
}

fn sketch_of_strs(lg_k: u8, seed: u64, items: &[&str]) -> CpcSketch {
    let mut sketch = CpcSketch::with_seed(lg_k, seed);
    for item in items {
        sketch.update_str(item);
    }
    sketch
}

#[test]
fn test_empty_union() {
    let union = CpcUnion::new(11);
    let result = union.to_sketch();
    assert!(result.is_empty());
    assert!(result.is_merged());
    assert_eq!(result.estimate(), 0.0);
}

#[test]
fn test_union_of_small_string_sets() {
    for (lg_k, seed, expected) in [(11, 9001, 5.00162840932184), (10, 111, 5.003258518185566)] {
        let a = sketch_of_strs(lg_k, seed, &["a", "b", "c"]);
        let b = sketch_of_strs(lg_k, seed, &["c", "d", "e"]);
        let mut union = CpcUnion::with_seed(lg_k, seed);
        union.update(&a).unwrap();
        union.update(&b).unwrap();
        let result = union.to_sketch();
        assert_eq!(result.num_coupons(), 5);
        assert_eq!(result.flavor(), Flavor::Sparse);
        assert_that!(result.estimate(), near(expected, 1e-12));
    }
}

#[test]
fn test_union_to_string() {
    let a = sketch_of_strs(11, 9001, &["a", "b", "c"]);
    let b = sketch_of_strs(11, 9001, &["c", "d", "e"]);
    let mut union = CpcUnion::new(11);
    union.update(&a).unwrap();
    union.update(&b).unwrap();
    assert_eq!(
        union.to_sketch().to_string(),
        "### CPC sketch summary:\n   lg_k           : 11\n   seed hash      : 93cc\n   \
         C              : 5\n   flavor         : 1\n   merged         : true\n   \
         interesting col: 0\n   table entries  : 5\n   window         : not allocated\n\
         ### End sketch summary\n"
    );

    let a = sketch_of_strs(10, 111, &["a", "b", "c"]);
    let b = sketch_of_strs(10, 111, &["c", "d", "e"]);
    let mut union = CpcUnion::with_seed(10, 111);
    union.update(&a).unwrap();
    union.update(&b).unwrap();
    insta::assert_snapshot!(union.to_sketch().to_string().trim_end(), @r"
### CPC sketch summary:
   lg_k           : 10
   seed hash      : d38c
   C              : 5
   flavor         : 1
   merged         : true
   interesting col: 0
   table entries  : 5
   window         : not allocated
### End sketch summary
");
}

#[test]
fn test_union_of_int64_ranges() {
    let a = sketch_of_range(11, 9001, 1..=10000);
    let b = sketch_of_range(11, 9001, 100000..=110000);
    let mut union = CpcUnion::new(11);
    union.update(&a).unwrap();
    union.update(&b).unwrap();
    let result = union.to_sketch();

    assert!(result.is_merged());
    assert!(result.validate());
    assert_eq!(result.num_coupons(), 7415);
    assert_eq!(result.flavor(), Flavor::Sliding);
    assert_that!(result.estimate(), near(20000.731632174215, 1e-9));
    assert_that!(result.lower_bound(NumStdDev::Three), near(19103.49112120969, 1e-6));
    assert_that!(result.upper_bound(NumStdDev::Three), eq(20932.0));
    insta::assert_snapshot!(result.to_string().trim_end(), @r"
### CPC sketch summary:
   lg_k           : 11
   seed hash      : 93cc
   C              : 7415
   flavor         : 4
   merged         : true
   interesting col: 0
   table entries  : 45
   window         : allocated
   window offset  : 1
### End sketch summary
");
}

#[test]
fn test_union_of_int64_ranges_custom_seed() {
    let a = sketch_of_range(10, 111, 1..=10000);
    let b = sketch_of_range(10, 111, 100000..=110000);
    let mut union = CpcUnion::with_seed(10, 111);
    union.update(&a).unwrap();
    union.update(&b).unwrap();
    let result = union.to_sketch();

    assert_eq!(result.num_coupons(), 4729);
    assert_that!(result.estimate(), near(19967.703650307845, 1e-9));
    assert_that!(result.lower_bound(NumStdDev::Three), near(18707.573211045103, 1e-6));
    assert_that!(result.upper_bound(NumStdDev::Three), eq(21304.0));
    insta::assert_snapshot!(result.to_string().trim_end(), @r"
### CPC sketch summary:
   lg_k           : 10
   seed hash      : d38c
   C              : 4729
   flavor         : 4
   merged         : true
   interesting col: 1
   table entries  : 24
   window         : allocated
   window offset  : 2
### End sketch summary
");
}

#[test]
fn test_union_with_empty_is_identity() {
    for n in [0i64, 5, 200, 1500, 30_000] {
        let sketch = sketch_of_range(11, 9001, 1..=n);
        let mut union = CpcUnion::new(11);
        union.update(&sketch).unwrap();
        union.update(&CpcSketch::new(11)).unwrap();
        let result = union.to_sketch();
        assert!(result.is_merged());
        assert_eq!(result.num_coupons(), sketch.num_coupons());

        // once merged, another pass through a union changes nothing
        let mut again = CpcUnion::new(11);
        again.update(&result).unwrap();
        again.update(&CpcSketch::new(11)).unwrap();
        assert_eq!(again.to_sketch().serialize(), result.serialize());
    }
}

#[test]
fn test_union_is_order_independent() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut sketches = vec![];
    for (lg_k, start, len) in [
        (11, 0, 10),
        (11, 5, 300),
        (12, 1000, 3000),
        (11, 2000, 20_000),
        (13, 50_000, 100),
        (11, 90_000, 5000),
    ] {
        sketches.push(sketch_of_range(lg_k, 9001, start..=start + len));
    }

    let mut expected = None;
    for _ in 0..10 {
        sketches.shuffle(&mut rng);
        let mut union = CpcUnion::new(13);
        for sketch in &sketches {
            union.update(sketch).unwrap();
        }
        assert_eq!(union.lg_k(), 11);
        let result = union.to_sketch();
        assert!(result.validate());
        let state = (result.num_coupons(), result.estimate());
        match expected {
            None => expected = Some(state),
            Some(prev) => assert_eq!(state, prev),
        }
    }
}

#[test]
fn test_union_matches_single_sketch() {
    let mut all = CpcSketch::new(10);
    let mut union = CpcUnion::new(10);
    for part in 0..8i64 {
        let mut sketch = CpcSketch::new(10);
        for i in part * 1000..(part + 1) * 1000 + 200 {
            sketch.update(i);
            all.update(i);
        }
        union.update(&sketch).unwrap();
    }
    let result = union.to_sketch();
    assert_eq!(result.num_coupons(), all.num_coupons());
    assert_eq!(result.flavor(), all.flavor());
    assert_that!(result.estimate(), near(all.estimate(), 0.1 * all.estimate()));
}

#[test]
fn test_union_reduces_lg_k() {
    let big = sketch_of_range(12, 9001, 0..=20_000);
    let small = sketch_of_range(8, 9001, 0..=20_000);
    let mut union = CpcUnion::new(12);
    union.update(&big).unwrap();
    union.update(&small).unwrap();
    assert_eq!(union.lg_k(), 8);
    let result = union.to_sketch();
    assert_eq!(result.lg_k(), 8);
    // folding the bigger sketch adds nothing the small one did not already see
    assert_eq!(result.num_coupons(), small.num_coupons());
    assert_that!(result.estimate(), near(20_000.0, 0.2 * 20_000.0));
}

#[test]
fn test_union_seed_mismatch() {
    let mut sketch = CpcSketch::with_seed(11, 123);
    sketch.update(1u64);
    let mut union = CpcUnion::new(11);
    let err = union.update(&sketch).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SeedMismatch);

    // even an empty sketch with the wrong seed is rejected
    let err = union.update(&CpcSketch::with_seed(11, 123)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SeedMismatch);
}

#[test]
fn test_merged_flag_survives_round_trip() {
    let sketch = sketch_of_range(11, 9001, 1..=1000);
    let mut union = CpcUnion::new(11);
    union.update(&sketch).unwrap();
    let merged = union.to_sketch();
    let restored = CpcSketch::deserialize(&merged.serialize()).unwrap();
    assert!(restored.is_merged());
    assert_eq!(restored.estimate(), merged.estimate());
    assert_that!(restored.estimate(), ge(restored.lower_bound(NumStdDev::Two)));
    assert_that!(restored.estimate(), le(restored.upper_bound(NumStdDev::Two)));
}
