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

use crate::common::inv_pow2_table::INVERSE_POWERS_OF_2;

/// `KXP_BYTE_TABLE[b]` is the sum of `2^-(j+1)` over every bit `j` that is zero in `b`.
///
/// Summing one entry per byte of a row (scaled by `2^-8i` for byte `i`) gives that row's share
/// of `kxp`: the probability mass of the cells that are still empty.
pub(super) const KXP_BYTE_TABLE: [f64; 256] = {
    let mut table = [0.0; 256];
    let mut byte = 0;
    while byte < 256 {
        let mut sum = 0.0;
        let mut bit = 0;
        while bit < 8 {
            if (byte >> bit) & 1 == 0 {
                sum += INVERSE_POWERS_OF_2[bit + 1];
            }
            bit += 1;
        }
        table[byte] = sum;
        byte += 1;
    }
    table
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kxp_byte_table() {
        assert_eq!(KXP_BYTE_TABLE[0xff], 0.0);
        assert_eq!(KXP_BYTE_TABLE[0x00], 1.0 - 1.0 / 256.0);
        assert_eq!(KXP_BYTE_TABLE[0xfe], 0.5);
        assert_eq!(KXP_BYTE_TABLE[0x7f], 1.0 / 256.0);
        assert_eq!(KXP_BYTE_TABLE[0x0f], 0.0625 - 1.0 / 256.0);
    }
}
