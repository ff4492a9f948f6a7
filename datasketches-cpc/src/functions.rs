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

//! Null-propagating operations over serialized sketches.
//!
//! Every function takes and returns serialized bytes so that partial states can be shipped
//! between workers. A `None` input is skipped (or treated as an empty sketch) and a result
//! computed from nothing but `None` is itself `None`.
//!
//! # Examples
//!
//! ```
//! use datasketches_cpc::functions::{self, CpcConfig};
//!
//! let config = CpcConfig::default();
//! let a = functions::build([Some("a"), Some("b"), None, Some("c")], &config).unwrap();
//! let b = functions::build([Some("c"), Some("d"), Some("e")], &config).unwrap();
//! let merged = functions::union(a.as_deref(), b.as_deref(), &config).unwrap();
//! let estimate = functions::get_estimate(merged.as_deref(), &config).unwrap().unwrap();
//! assert!((estimate - 5.0).abs() < 0.01);
//! ```

use crate::common::NumStdDev;
use crate::cpc::CpcSketch;
use crate::cpc::CpcUnion;
use crate::cpc::DEFAULT_LG_K;
use crate::cpc::check_lg_k;
use crate::error::Error;
use crate::hash::DEFAULT_UPDATE_SEED;

/// Parameters shared by every operation in this module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpcConfig {
    /// Log2 of the number of rows K, in `[4, 26]`.
    pub lg_k: u8,
    /// Hash seed; sketches built with different seeds cannot be combined.
    pub seed: u64,
}

impl Default for CpcConfig {
    fn default() -> Self {
        Self {
            lg_k: DEFAULT_LG_K,
            seed: DEFAULT_UPDATE_SEED,
        }
    }
}

impl CpcConfig {
    /// Creates a config with the given `lg_k` and the default seed.
    pub fn with_lg_k(lg_k: u8) -> Self {
        Self {
            lg_k,
            ..Self::default()
        }
    }

    /// Checks that `lg_k` is in range.
    pub fn validate(&self) -> Result<(), Error> {
        check_lg_k(self.lg_k)
    }
}

/// The estimate of a sketch together with its confidence bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EstimateAndBounds {
    /// The best estimate of the number of distinct items.
    pub estimate: f64,
    /// The lower bound at the requested number of standard deviations.
    pub lower_bound: f64,
    /// The upper bound at the requested number of standard deviations.
    pub upper_bound: f64,
}

/// A value that can be fed into a sketch by [`build`].
///
/// Integers hash as their 8 little-endian bytes, strings and byte slices as their raw bytes,
/// and floats after canonicalization, so sketches built by other DataSketches libraries agree.
pub trait CpcItem {
    /// Updates `sketch` with this value.
    fn update_sketch(&self, sketch: &mut CpcSketch);
}

impl CpcItem for i64 {
    fn update_sketch(&self, sketch: &mut CpcSketch) {
        sketch.update(*self);
    }
}

impl CpcItem for u64 {
    fn update_sketch(&self, sketch: &mut CpcSketch) {
        sketch.update(*self);
    }
}

impl CpcItem for f64 {
    fn update_sketch(&self, sketch: &mut CpcSketch) {
        sketch.update_f64(*self);
    }
}

impl CpcItem for str {
    fn update_sketch(&self, sketch: &mut CpcSketch) {
        sketch.update_str(self);
    }
}

impl CpcItem for String {
    fn update_sketch(&self, sketch: &mut CpcSketch) {
        sketch.update_str(self);
    }
}

impl CpcItem for [u8] {
    fn update_sketch(&self, sketch: &mut CpcSketch) {
        sketch.update_bytes(self);
    }
}

impl CpcItem for Vec<u8> {
    fn update_sketch(&self, sketch: &mut CpcSketch) {
        sketch.update_bytes(self);
    }
}

impl<T: CpcItem + ?Sized> CpcItem for &T {
    fn update_sketch(&self, sketch: &mut CpcSketch) {
        (**self).update_sketch(sketch);
    }
}

/// Builds a sketch from `items`, skipping `None`.
///
/// Returns `Ok(None)` when no item is present, before `config` is looked at.
pub fn build<I, T>(items: I, config: &CpcConfig) -> Result<Option<Vec<u8>>, Error>
where
    I: IntoIterator<Item = Option<T>>,
    T: CpcItem,
{
    let mut items = items.into_iter().flatten().peekable();
    if items.peek().is_none() {
        return Ok(None);
    }
    let mut sketch = CpcSketch::try_with_seed(config.lg_k, config.seed)?;
    let mut num_items = 0u64;
    for item in items {
        item.update_sketch(&mut sketch);
        num_items += 1;
    }
    tracing::debug!(
        lg_k = config.lg_k,
        num_items,
        num_coupons = sketch.num_coupons(),
        "built CPC sketch"
    );
    Ok(Some(sketch.serialize()))
}

/// Merges serialized sketches, skipping `None`.
///
/// Returns `Ok(None)` when no sketch is present, before `config` is looked at.
///
/// # Errors
///
/// Fails if a sketch is malformed or was built with a different seed.
pub fn merge<I, B>(sketches: I, config: &CpcConfig) -> Result<Option<Vec<u8>>, Error>
where
    I: IntoIterator<Item = Option<B>>,
    B: AsRef<[u8]>,
{
    let mut sketches = sketches.into_iter().flatten().peekable();
    if sketches.peek().is_none() {
        return Ok(None);
    }
    let mut union = CpcUnion::try_with_seed(config.lg_k, config.seed)?;
    let mut num_sketches = 0usize;
    for bytes in sketches {
        let sketch = CpcSketch::deserialize_with_seed(bytes.as_ref(), config.seed)?;
        union.update(&sketch)?;
        num_sketches += 1;
    }
    tracing::debug!(
        lg_k = union.lg_k(),
        num_sketches,
        "merged CPC sketches"
    );
    Ok(Some(union.to_sketch().serialize()))
}

/// Unions two serialized sketches. A `None` side counts as an empty sketch.
///
/// Returns `Ok(None)` only when both sides are `None`.
pub fn union(
    a: Option<&[u8]>,
    b: Option<&[u8]>,
    config: &CpcConfig,
) -> Result<Option<Vec<u8>>, Error> {
    merge([a, b], config)
}

/// Returns the estimate of a serialized sketch.
pub fn get_estimate(bytes: Option<&[u8]>, config: &CpcConfig) -> Result<Option<f64>, Error> {
    let Some(bytes) = bytes else {
        return Ok(None);
    };
    let sketch = CpcSketch::deserialize_with_seed(bytes, config.seed)?;
    Ok(Some(sketch.estimate()))
}

/// Returns the estimate and the bounds at `num_std_devs` standard deviations.
///
/// A `None` sketch yields `Ok(None)` whatever `num_std_devs` is.
///
/// # Errors
///
/// Fails if `num_std_devs` is not 1, 2 or 3, or if the sketch cannot be read.
pub fn get_estimate_and_bounds(
    bytes: Option<&[u8]>,
    num_std_devs: u8,
    config: &CpcConfig,
) -> Result<Option<EstimateAndBounds>, Error> {
    let Some(bytes) = bytes else {
        return Ok(None);
    };
    let kappa = NumStdDev::try_from(num_std_devs)?;
    let sketch = CpcSketch::deserialize_with_seed(bytes, config.seed)?;
    Ok(Some(EstimateAndBounds {
        estimate: sketch.estimate(),
        lower_bound: sketch.lower_bound(kappa),
        upper_bound: sketch.upper_bound(kappa),
    }))
}

/// Returns the human readable summary of a serialized sketch.
pub fn to_string(bytes: Option<&[u8]>, config: &CpcConfig) -> Result<Option<String>, Error> {
    let Some(bytes) = bytes else {
        return Ok(None);
    };
    let sketch = CpcSketch::deserialize_with_seed(bytes, config.seed)?;
    Ok(Some(sketch.to_string()))
}
