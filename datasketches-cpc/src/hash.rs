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

//! Hashing used to map items onto sketch coupons.

mod murmurhash;

pub use self::murmurhash::MurmurHash3X64128;

/// The seed used when none is given explicitly.
pub const DEFAULT_UPDATE_SEED: u64 = 9001;

/// Computes the 16-bit fingerprint of `seed` stored in serialized sketches.
///
/// Two sketches can only be merged when their seed hashes agree.
pub(crate) fn compute_seed_hash(seed: u64) -> u16 {
    let mut hasher = MurmurHash3X64128::with_seed(0);
    hasher.write_bytes(&seed.to_le_bytes());
    let (h1, _) = hasher.finish128();
    (h1 & 0xffff) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_hash() {
        assert_eq!(compute_seed_hash(DEFAULT_UPDATE_SEED), 0x93cc);
        assert_eq!(compute_seed_hash(111), 0xd38c);
    }

    #[test]
    fn test_seed_hash_matches_reference() {
        for seed in [0u64, 1, 42, 9001, u64::MAX] {
            let (h1, _) = mur3::murmurhash3_x64_128(&seed.to_le_bytes(), 0);
            assert_eq!(compute_seed_hash(seed), (h1 & 0xffff) as u16);
        }
    }
}
