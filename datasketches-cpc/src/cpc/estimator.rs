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

use std::f64::consts::LN_2;

use crate::common::NumStdDev;
use crate::cpc::icon_estimator::icon_estimate;

const ICON_ERROR_CONSTANT: f64 = LN_2;

#[allow(clippy::excessive_precision)]
const HIP_ERROR_CONSTANT: f64 = 0.588705011257737332; // (LN_2 / 2.0).sqrt()

/// Beyond this `lg_k` the asymptotic error constants are used instead of the tables.
const MAX_TABLED_LG_K: u8 = 14;

// Measured relative standard errors times sqrt(K), scaled by 10^4. Rows are lg_k 4..=14,
// columns are kappa 1..=3.

const ICON_LOW_SIDE_DATA: [u16; 33] = [
    //1,    2,    3,   kappa
    //                 lgK num trials
    6037, 5720, 5328, // 4 1000000
    6411, 6262, 5682, // 5 1000000
    6724, 6403, 6127, // 6 1000000
    6665, 6411, 6208, // 7 1000000
    6959, 6525, 6427, // 8 1000000
    6892, 6665, 6619, // 9 1000000
    6792, 6752, 6690, // 10 1000000
    6899, 6818, 6708, // 11 1000000
    6871, 6845, 6812, // 12 1046369
    6909, 6861, 6828, // 13 1043411
    6919, 6897, 6842, // 14 1000297
];

const ICON_HIGH_SIDE_DATA: [u16; 33] = [
    //1,    2,    3,   kappa
    //                 lgK num trials
    8031, 8559, 9309, // 4 1000000
    7084, 7959, 8660, // 5 1000000
    7141, 7514, 7876, // 6 1000000
    7458, 7430, 7572, // 7 1000000
    6892, 7141, 7497, // 8 1000000
    6889, 7132, 7290, // 9 1000000
    7075, 7118, 7185, // 10 1000000
    7040, 7047, 7085, // 11 1000000
    6993, 7019, 7053, // 12 1046369
    6953, 7001, 6983, // 13 1043411
    6944, 6966, 7004, // 14 1000297
];

const HIP_LOW_SIDE_DATA: [u16; 33] = [
    //1,    2,    3,   kappa
    //                 lgK num trials
    5871, 5247, 4826, // 4 1000000
    5877, 5403, 5070, // 5 1000000
    5873, 5533, 5304, // 6 1000000
    5878, 5632, 5464, // 7 1000000
    5874, 5690, 5564, // 8 1000000
    5880, 5745, 5619, // 9 1000000
    5875, 5784, 5701, // 10 1000000
    5866, 5789, 5742, // 11 1000000
    5869, 5827, 5784, // 12 1046369
    5876, 5860, 5827, // 13 1043411
    5881, 5853, 5842, // 14 1000297
];

const HIP_HIGH_SIDE_DATA: [u16; 33] = [
    //1,    2,    3,   kappa
    //                 lgK num trials
    5855, 6688, 7391, // 4 1000000
    5886, 6444, 6923, // 5 1000000
    5885, 6254, 6594, // 6 1000000
    5889, 6134, 6326, // 7 1000000
    5900, 6072, 6203, // 8 1000000
    5875, 6005, 6089, // 9 1000000
    5871, 5980, 6040, // 10 1000000
    5889, 5941, 6015, // 11 1000000
    5871, 5926, 5973, // 12 1046369
    5866, 5901, 5915, // 13 1043411
    5880, 5914, 5953, // 14 1000297
];

/// Returns the HIP estimate for a sketch that has never been merged, otherwise ICON.
pub(super) fn estimate(merge_flag: bool, hip_est_accum: f64, lg_k: u8, num_coupons: u32) -> f64 {
    if merge_flag {
        icon_estimate(lg_k, num_coupons)
    } else {
        hip_est_accum
    }
}

pub(super) fn lower_bound(
    merge_flag: bool,
    hip_est_accum: f64,
    lg_k: u8,
    num_coupons: u32,
    kappa: NumStdDev,
) -> f64 {
    if num_coupons == 0 {
        return 0.0;
    }
    // the lower bound is driven by the error on the high side, and vice versa
    let (est, x) = if merge_flag {
        let x = relative_error(lg_k, kappa, &ICON_HIGH_SIDE_DATA, ICON_ERROR_CONSTANT);
        (icon_estimate(lg_k, num_coupons), x)
    } else {
        let x = relative_error(lg_k, kappa, &HIP_HIGH_SIDE_DATA, HIP_ERROR_CONSTANT);
        (hip_est_accum, x)
    };
    let eps = (kappa.as_u8() as f64) * x;
    (est / (1.0 + eps)).max(num_coupons as f64)
}

pub(super) fn upper_bound(
    merge_flag: bool,
    hip_est_accum: f64,
    lg_k: u8,
    num_coupons: u32,
    kappa: NumStdDev,
) -> f64 {
    if num_coupons == 0 {
        return 0.0;
    }
    let (est, x) = if merge_flag {
        let x = relative_error(lg_k, kappa, &ICON_LOW_SIDE_DATA, ICON_ERROR_CONSTANT);
        (icon_estimate(lg_k, num_coupons), x)
    } else {
        let x = relative_error(lg_k, kappa, &HIP_LOW_SIDE_DATA, HIP_ERROR_CONSTANT);
        (hip_est_accum, x)
    };
    let eps = (kappa.as_u8() as f64) * x;
    // slight widening of interval to be conservative
    (est / (1.0 - eps)).ceil()
}

/// Returns the relative standard error `x / sqrt(K)` for the given side of the interval.
fn relative_error(lg_k: u8, kappa: NumStdDev, table: &[u16; 33], asymptotic: f64) -> f64 {
    let x = if lg_k <= MAX_TABLED_LG_K {
        let idx = 3 * (lg_k as usize - 4) + (kappa.as_u8() as usize - 1);
        (table[idx] as f64) / 10000.0
    } else {
        asymptotic
    };
    let k = (1u64 << lg_k) as f64;
    x / k.sqrt()
}

#[cfg(test)]
mod tests {
    use googletest::assert_that;
    use googletest::prelude::eq;
    use googletest::prelude::ge;
    use googletest::prelude::le;
    use googletest::prelude::near;

    use super::*;

    #[test]
    fn test_empty_bounds_are_zero() {
        for merged in [false, true] {
            assert_eq!(lower_bound(merged, 0.0, 11, 0, NumStdDev::Three), 0.0);
            assert_eq!(upper_bound(merged, 0.0, 11, 0, NumStdDev::Three), 0.0);
        }
    }

    #[test]
    fn test_hip_bounds() {
        // lg_k = 11, kappa = 3
        let hip = 20000.73;
        let lb = lower_bound(false, hip, 11, 9000, NumStdDev::Three);
        let ub = upper_bound(false, hip, 11, 9000, NumStdDev::Three);
        assert_that!(lb, near(hip / (1.0 + 3.0 * 0.6015 / 2048f64.sqrt()), 1e-9));
        assert_that!(ub, eq((hip / (1.0 - 3.0 * 0.5742 / 2048f64.sqrt())).ceil()));
        assert_that!(lb, le(hip));
        assert_that!(ub, ge(hip));
    }

    #[test]
    fn test_icon_bounds_after_union() {
        // kappa = 3 at lg_k = 11
        let c = 9417;
        let est = estimate(true, 0.0, 11, c);
        let lb = lower_bound(true, 0.0, 11, c, NumStdDev::Three);
        let ub = upper_bound(true, 0.0, 11, c, NumStdDev::Three);
        assert_that!(lb, near(est / (1.0 + 3.0 * 0.7085 / 2048f64.sqrt()), 1e-6));
        assert_that!(ub, eq((est / (1.0 - 3.0 * 0.6708 / 2048f64.sqrt())).ceil()));
    }

    #[test]
    fn test_lower_bound_never_below_coupons() {
        let lb = lower_bound(false, 10.0, 4, 10, NumStdDev::Three);
        assert_eq!(lb, 10.0);
    }

    #[test]
    fn test_asymptotic_constants_beyond_tables() {
        let ub = upper_bound(false, 1e6, 20, 500_000, NumStdDev::One);
        let eps = HIP_ERROR_CONSTANT / 1024.0;
        assert_eq!(ub, (1e6 / (1.0 - eps)).ceil());

        let est = estimate(true, 0.0, 20, 500_000);
        let lb = lower_bound(true, 0.0, 20, 500_000, NumStdDev::One);
        assert_that!(lb, near(est / (1.0 + ICON_ERROR_CONSTANT / 1024.0), 1e-6));
    }

    #[test]
    fn test_bounds_narrow_as_lg_k_grows() {
        let width = |lg_k: u8| {
            upper_bound(false, 1e5, lg_k, 50_000, NumStdDev::Two)
                - lower_bound(false, 1e5, lg_k, 50_000, NumStdDev::Two)
        };
        assert_that!(width(12), le(width(10)));
        assert_that!(width(16), le(width(12)));
    }
}
