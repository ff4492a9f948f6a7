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

use datasketches_cpc::cpc::CpcSketch;
use datasketches_cpc::error::ErrorKind;
use datasketches_cpc::functions;
use datasketches_cpc::functions::CpcConfig;
use googletest::assert_that;
use googletest::prelude::contains_substring;
use googletest::prelude::eq;
use googletest::prelude::ge;
use googletest::prelude::le;
use googletest::prelude::near;

const LG_K_10_SEED_111: CpcConfig = CpcConfig {
    lg_k: 10,
    seed: 111,
};

#[test]
fn test_config_defaults() {
    let config = CpcConfig::default();
    assert_eq!(config.lg_k, 11);
    assert_eq!(config.seed, 9001);
    assert!(config.validate().is_ok());
    assert_eq!(CpcConfig::with_lg_k(12).seed, 9001);

    let err = CpcConfig::with_lg_k(30).validate().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    let err = functions::build([Some(1i64)], &CpcConfig::with_lg_k(3)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[test]
fn test_build_skips_nulls() {
    let config = CpcConfig::default();
    let bytes = functions::build([Some("a"), None, Some("b"), Some("c"), None], &config)
        .unwrap()
        .unwrap();
    let estimate = functions::get_estimate(Some(bytes.as_slice()), &config).unwrap();
    assert_that!(estimate.unwrap(), near(3.0007327200292515, 1e-12));

    assert_eq!(functions::build::<_, &str>([None, None], &config).unwrap(), None);
    assert_eq!(
        functions::build(std::iter::empty::<Option<i64>>(), &config).unwrap(),
        None
    );
}

#[test]
fn test_build_matches_sketch() {
    let config = CpcConfig::default();
    let bytes = functions::build((1..=10000i64).map(Some), &config)
        .unwrap()
        .unwrap();
    let mut sketch = CpcSketch::new(11);
    for i in 1..=10000i64 {
        sketch.update(i);
    }
    assert_eq!(bytes, sketch.serialize());
}

#[test]
fn test_merge_and_union() {
    let config = LG_K_10_SEED_111;
    let a = functions::build((1..=10000i64).map(Some), &config).unwrap();
    let b = functions::build((100000..=110000i64).map(Some), &config).unwrap();

    let merged = functions::merge([a.clone(), None, b.clone()], &config)
        .unwrap()
        .unwrap();
    let unioned = functions::union(a.as_deref(), b.as_deref(), &config)
        .unwrap()
        .unwrap();
    assert_eq!(merged, unioned);

    let result = functions::get_estimate_and_bounds(Some(merged.as_slice()), 3, &config)
        .unwrap()
        .unwrap();
    assert_that!(result.estimate, near(19967.703650307845, 1e-9));
    assert_that!(result.lower_bound, le(result.estimate));
    assert_that!(result.upper_bound, ge(result.estimate));
    assert_that!(result.upper_bound, eq(21304.0));

    let summary = functions::to_string(Some(merged.as_slice()), &config)
        .unwrap()
        .unwrap();
    assert_that!(summary, contains_substring("   C              : 4729\n"));
    assert_that!(summary, contains_substring("   merged         : true\n"));
}

#[test]
fn test_union_null_sides() {
    let config = CpcConfig::default();
    let a = functions::build([Some("a"), Some("b")], &config).unwrap();

    assert_eq!(functions::union(None, None, &config).unwrap(), None);

    // a null side behaves like an empty sketch, and the result is marked merged
    let left = functions::union(a.as_deref(), None, &config).unwrap().unwrap();
    let right = functions::union(None, a.as_deref(), &config).unwrap().unwrap();
    assert_eq!(left, right);
    let sketch = CpcSketch::deserialize(&left).unwrap();
    assert!(sketch.is_merged());
    assert_eq!(sketch.num_coupons(), 2);

    assert_eq!(
        functions::merge(Vec::<Option<Vec<u8>>>::new(), &config).unwrap(),
        None
    );
}

#[test]
fn test_null_in_null_out() {
    let config = CpcConfig::default();
    let invalid = CpcConfig::with_lg_k(3);

    assert_eq!(functions::build::<_, i64>([None, None], &config).unwrap(), None);
    assert_eq!(functions::build::<_, i64>([None], &invalid).unwrap(), None);
    assert_eq!(
        functions::build(std::iter::empty::<Option<&str>>(), &invalid).unwrap(),
        None
    );

    assert_eq!(functions::merge([None::<Vec<u8>>, None], &config).unwrap(), None);
    assert_eq!(functions::merge([None::<Vec<u8>>], &invalid).unwrap(), None);
    assert_eq!(functions::union(None, None, &config).unwrap(), None);
    assert_eq!(functions::union(None, None, &invalid).unwrap(), None);

    assert_eq!(functions::get_estimate(None, &config).unwrap(), None);
    assert_eq!(functions::get_estimate(None, &invalid).unwrap(), None);
    for num_std_devs in [0, 1, 2, 3, 4, 5, u8::MAX] {
        assert_eq!(
            functions::get_estimate_and_bounds(None, num_std_devs, &config).unwrap(),
            None,
            "num_std_devs = {num_std_devs}"
        );
        assert_eq!(
            functions::get_estimate_and_bounds(None, num_std_devs, &invalid).unwrap(),
            None,
            "num_std_devs = {num_std_devs}"
        );
    }
    assert_eq!(functions::to_string(None, &config).unwrap(), None);
    assert_eq!(functions::to_string(None, &invalid).unwrap(), None);
}

#[test]
fn test_invalid_num_std_devs() {
    let config = CpcConfig::default();
    let bytes = functions::build([Some(1i64)], &config).unwrap();
    for kappa in [0, 4, 5] {
        let err = functions::get_estimate_and_bounds(bytes.as_deref(), kappa, &config)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }
}

#[test]
fn test_seed_mismatch() {
    let a = functions::build([Some(1i64)], &LG_K_10_SEED_111).unwrap();
    let config = CpcConfig::with_lg_k(10);

    let err = functions::get_estimate(a.as_deref(), &config).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SeedMismatch);
    let err = functions::merge([a.clone()], &config).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SeedMismatch);
    let err = functions::union(a.as_deref(), None, &config).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SeedMismatch);
}

#[test]
fn test_corrupt_input() {
    let config = CpcConfig::default();
    let err = functions::get_estimate(Some(&[1u8, 2, 3][..]), &config).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidData);
    let err = functions::to_string(Some(&[][..]), &config).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidData);
}

#[test]
fn test_mixed_item_types() {
    let config = CpcConfig::default();
    let strings = vec![String::from("x"), String::from("y")];
    let owned = functions::build(strings.iter().map(Some), &config).unwrap();
    let borrowed = functions::build([Some("x"), Some("y")], &config).unwrap();
    assert_eq!(owned, borrowed);

    let bytes = functions::build([Some(b"x".as_slice()), Some(b"y".as_slice())], &config).unwrap();
    assert_eq!(bytes, borrowed);

    let floats = functions::build([Some(0.0f64), Some(-0.0)], &config).unwrap().unwrap();
    let sketch = CpcSketch::deserialize(&floats).unwrap();
    assert_eq!(sketch.num_coupons(), 1);
}
