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

use crate::codec::SketchSlice;
use crate::common::NumStdDev;
use crate::cpc::estimator::estimate;
use crate::cpc::estimator::lower_bound;
use crate::cpc::estimator::upper_bound;
use crate::cpc::serialization::Preamble;
use crate::error::Error;

/// A read-only view of a serialized [`CpcSketch`](crate::cpc::CpcSketch).
///
/// Only the preamble is parsed, so the estimate and bounds are available without decompressing
/// the sketch. The seed is not checked.
///
/// # Examples
///
/// ```
/// # use datasketches_cpc::common::NumStdDev;
/// # use datasketches_cpc::cpc::{CpcSketch, CpcWrapper};
/// let mut sketch = CpcSketch::new(11);
/// for i in 0..1000u64 {
///     sketch.update(i);
/// }
/// let bytes = sketch.serialize();
/// let wrapper = CpcWrapper::new(&bytes).unwrap();
/// assert_eq!(wrapper.estimate(), sketch.estimate());
/// assert_eq!(wrapper.upper_bound(NumStdDev::Two), sketch.upper_bound(NumStdDev::Two));
/// ```
#[derive(Debug, Clone)]
pub struct CpcWrapper {
    preamble: Preamble,
}

impl CpcWrapper {
    /// Creates a wrapper over `bytes`.
    ///
    /// # Errors
    ///
    /// Returns an error if the preamble is malformed.
    pub fn new(bytes: &[u8]) -> Result<Self, Error> {
        let mut cursor = SketchSlice::new(bytes);
        let preamble = Preamble::read(&mut cursor)?;
        Ok(Self { preamble })
    }

    /// Return the parameter lg_k.
    pub fn lg_k(&self) -> u8 {
        self.preamble.lg_k
    }

    /// Returns the number of coupons recorded in the sketch.
    pub fn num_coupons(&self) -> u32 {
        self.preamble.num_coupons
    }

    /// Returns true if the sketch is empty.
    pub fn is_empty(&self) -> bool {
        self.preamble.num_coupons == 0
    }

    /// Returns true if the sketch is the result of a union.
    pub fn is_merged(&self) -> bool {
        self.preamble.merged
    }

    /// Returns the best estimate of the cardinality of the sketch.
    pub fn estimate(&self) -> f64 {
        let p = &self.preamble;
        estimate(p.merged, p.hip_est_accum, p.lg_k, p.num_coupons)
    }

    /// Returns the best estimate of the lower bound of the confidence interval given `kappa`.
    pub fn lower_bound(&self, kappa: NumStdDev) -> f64 {
        let p = &self.preamble;
        lower_bound(p.merged, p.hip_est_accum, p.lg_k, p.num_coupons, kappa)
    }

    /// Returns the best estimate of the upper bound of the confidence interval given `kappa`.
    pub fn upper_bound(&self, kappa: NumStdDev) -> f64 {
        let p = &self.preamble;
        upper_bound(p.merged, p.hip_est_accum, p.lg_k, p.num_coupons, kappa)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpc::CpcSketch;
    use crate::cpc::CpcUnion;

    #[test]
    fn test_wrapper_matches_sketch() {
        for n in [0u64, 1, 100, 2000, 20_000] {
            let mut sketch = CpcSketch::new(10);
            for i in 0..n {
                sketch.update(i);
            }
            let wrapper = CpcWrapper::new(&sketch.serialize()).unwrap();
            assert_eq!(wrapper.lg_k(), 10);
            assert_eq!(wrapper.is_empty(), n == 0);
            assert!(!wrapper.is_merged());
            assert_eq!(wrapper.num_coupons(), sketch.num_coupons());
            assert_eq!(wrapper.estimate(), sketch.estimate());
            assert_eq!(
                wrapper.lower_bound(NumStdDev::One),
                sketch.lower_bound(NumStdDev::One)
            );
        }
    }

    #[test]
    fn test_wrapper_of_union_uses_icon() {
        let mut sketch = CpcSketch::new(10);
        for i in 0..3000u64 {
            sketch.update(i);
        }
        let mut union = CpcUnion::new(10);
        union.update(&sketch).unwrap();
        let merged = union.to_sketch();
        let wrapper = CpcWrapper::new(&merged.serialize()).unwrap();
        assert!(wrapper.is_merged());
        assert_eq!(wrapper.estimate(), merged.estimate());
        assert_eq!(
            wrapper.upper_bound(NumStdDev::Three),
            merged.upper_bound(NumStdDev::Three)
        );
    }

    #[test]
    fn test_wrapper_rejects_garbage() {
        assert!(CpcWrapper::new(&[]).is_err());
        assert!(CpcWrapper::new(&[2, 1, 3, 11, 0, 6, 0xcc, 0x93]).is_err());
    }
}
