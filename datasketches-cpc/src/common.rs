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

//! Helpers shared across the sketch modules.

use std::fmt;

use crate::error::Error;

pub(crate) mod inv_pow2_table;

/// Number of standard deviations used to widen confidence bounds.
///
/// Larger values give wider intervals that cover the true cardinality with higher
/// probability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NumStdDev {
    /// One standard deviation (\~68% confidence interval).
    One = 1,
    /// Two standard deviations (\~95% confidence interval).
    Two = 2,
    /// Three standard deviations (\~99.7% confidence interval).
    Three = 3,
}

impl NumStdDev {
    /// Returns the number of standard deviations as an integer in `1..=3`.
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for NumStdDev {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(NumStdDev::One),
            2 => Ok(NumStdDev::Two),
            3 => Ok(NumStdDev::Three),
            _ => Err(Error::invalid_argument(format!(
                "number of standard deviations must be 1, 2 or 3, got {value}"
            ))),
        }
    }
}

impl fmt::Display for NumStdDev {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// Canonicalize double value for compatibility with Java
pub(crate) fn canonical_double(value: f64) -> i64 {
    if value.is_nan() {
        // Java's Double.doubleToLongBits() NaN value
        0x7ff8000000000000i64
    } else {
        // -0.0 + 0.0 == +0.0 under IEEE754 roundTiesToEven rounding mode.
        (value + 0.0).to_bits() as i64
    }
}

/// Formats `value` with `digits` significant digits the way C's `%g` does.
///
/// Trailing zeros are dropped, and scientific notation is used when the decimal exponent
/// is below -4 or at least `digits`.
pub(crate) fn format_significant(value: f64, digits: usize) -> String {
    if value == 0.0 {
        return "0".to_string();
    }
    if !value.is_finite() {
        return value.to_string();
    }
    let digits = digits.max(1);
    let scientific = format!("{:.*e}", digits - 1, value);
    let Some((mantissa, exponent)) = scientific.split_once('e') else {
        return scientific;
    };
    let exponent: i32 = exponent.parse().unwrap_or(0);
    if exponent < -4 || exponent >= digits as i32 {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!(
            "{}e{sign}{:02}",
            trim_fraction(mantissa),
            exponent.unsigned_abs()
        )
    } else {
        let decimals = (digits as i32 - 1 - exponent) as usize;
        trim_fraction(&format!("{value:.decimals$}")).to_string()
    }
}

fn trim_fraction(number: &str) -> &str {
    if number.contains('.') {
        number.trim_end_matches('0').trim_end_matches('.')
    } else {
        number
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_num_std_dev_try_from() {
        assert_eq!(NumStdDev::try_from(1).unwrap(), NumStdDev::One);
        assert_eq!(NumStdDev::try_from(3).unwrap().as_u8(), 3);
        for invalid in [0u8, 4, 255] {
            let err = NumStdDev::try_from(invalid).unwrap_err();
            assert_eq!(err.kind(), crate::error::ErrorKind::InvalidArgument);
        }
    }

    #[test]
    fn test_canonical_double() {
        assert_eq!(canonical_double(-0.0), canonical_double(0.0));
        assert_eq!(canonical_double(f64::NAN), canonical_double(-f64::NAN));
        assert_ne!(canonical_double(1.0), canonical_double(-1.0));
    }

    #[test]
    fn test_format_significant() {
        assert_eq!(format_significant(9912.033040262888, 6), "9912.03");
        assert_eq!(format_significant(595.2383422851562, 6), "595.238");
        assert_eq!(format_significant(10215.099161258, 6), "10215.1");
        assert_eq!(format_significant(147.33836364746094, 6), "147.338");
        assert_eq!(format_significant(2048.0, 6), "2048");
        assert_eq!(format_significant(0.0, 6), "0");
        assert_eq!(format_significant(1001234.5, 6), "1.00123e+06");
        assert_eq!(format_significant(999999.7, 6), "1e+06");
        assert_eq!(format_significant(0.0001234567, 6), "0.000123457");
        assert_eq!(format_significant(0.00001234567, 6), "1.23457e-05");
        assert_eq!(format_significant(-3.5, 6), "-3.5");
    }
}
