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

//! The fixed-size head of a serialized sketch.
//!
//! ```text
//! byte 0    preamble ints (number of 32-bit words before the data words)
//! byte 1    serial version
//! byte 2    family id
//! byte 3    lg_k
//! byte 4    first interesting column
//! byte 5    flags
//! bytes 6-7 seed hash
//! if C > 0:
//!   u32  C
//!   if table && window: u32 number of table entries; if HIP: f64 kxp, f64 hip
//!   if table:  u32 table data words
//!   if window: u32 window data words
//!   if HIP && !(table && window): f64 kxp, f64 hip
//! window data words, then table data words
//! ```

use crate::codec::SketchBytes;
use crate::codec::SketchSlice;
use crate::codec::assert::ensure_preamble_ints_in;
use crate::codec::assert::ensure_serial_version_is;
use crate::codec::assert::insufficient_data;
use crate::codec::family::Family;
use crate::cpc::Flavor;
use crate::cpc::determine_flavor;
use crate::error::Error;
use crate::error::ErrorKind;

pub(super) const SERIAL_VERSION: u8 = 1;
pub(super) const FLAG_COMPRESSED: u8 = 1;
pub(super) const FLAG_HAS_HIP: u8 = 2;
pub(super) const FLAG_HAS_TABLE: u8 = 3;
pub(super) const FLAG_HAS_WINDOW: u8 = 4;

pub(super) fn make_preamble_ints(
    num_coupons: u32,
    has_hip: bool,
    has_table: bool,
    has_window: bool,
) -> u8 {
    let mut preamble_ints = 2;
    if num_coupons > 0 {
        preamble_ints += 1; // number of coupons
        if has_hip {
            preamble_ints += 4; // HIP
        }
        if has_table {
            preamble_ints += 1; // table data length
            // number of values (if there is no window it is the same as number of coupons)
            if has_window {
                preamble_ints += 1;
            }
        }
        if has_window {
            preamble_ints += 1; // window length
        }
    }
    preamble_ints
}

#[derive(Debug, Clone, PartialEq)]
pub(super) struct Preamble {
    pub lg_k: u8,
    pub first_interesting_column: u8,
    pub seed_hash: u16,
    pub merged: bool,
    pub num_coupons: u32,
    /// Pairs in the table stream; equals `num_coupons` when there is no window.
    pub num_table_entries: u32,
    pub table_words: u32,
    pub window_words: u32,
    /// Only meaningful when not merged.
    pub kxp: f64,
    pub hip_est_accum: f64,
}

impl Preamble {
    fn has_table(&self) -> bool {
        self.table_words > 0
    }

    fn has_window(&self) -> bool {
        self.window_words > 0
    }

    pub fn serialized_size(&self) -> usize {
        let preamble_ints = make_preamble_ints(
            self.num_coupons,
            !self.merged,
            self.has_table(),
            self.has_window(),
        ) as usize;
        4 * (preamble_ints + self.table_words as usize + self.window_words as usize)
    }

    pub fn write(&self, bytes: &mut SketchBytes) {
        let has_hip = !self.merged;
        let has_table = self.has_table();
        let has_window = self.has_window();

        let mut flags = 1 << FLAG_COMPRESSED;
        if has_hip {
            flags |= 1 << FLAG_HAS_HIP;
        }
        if has_table {
            flags |= 1 << FLAG_HAS_TABLE;
        }
        if has_window {
            flags |= 1 << FLAG_HAS_WINDOW;
        }

        bytes.write_u8(make_preamble_ints(
            self.num_coupons,
            has_hip,
            has_table,
            has_window,
        ));
        bytes.write_u8(SERIAL_VERSION);
        bytes.write_u8(Family::CPC.id);
        bytes.write_u8(self.lg_k);
        bytes.write_u8(self.first_interesting_column);
        bytes.write_u8(flags);
        bytes.write_u16_le(self.seed_hash);

        if self.num_coupons == 0 {
            return;
        }
        bytes.write_u32_le(self.num_coupons);
        if has_table && has_window {
            bytes.write_u32_le(self.num_table_entries);
            if has_hip {
                bytes.write_f64_le(self.kxp);
                bytes.write_f64_le(self.hip_est_accum);
            }
        }
        if has_table {
            bytes.write_u32_le(self.table_words);
        }
        if has_window {
            bytes.write_u32_le(self.window_words);
        }
        if has_hip && !(has_table && has_window) {
            bytes.write_f64_le(self.kxp);
            bytes.write_f64_le(self.hip_est_accum);
        }
    }

    /// Reads and validates everything up to the data words.
    pub fn read(cursor: &mut SketchSlice<'_>) -> Result<Self, Error> {
        let preamble_ints = cursor
            .read_u8()
            .map_err(insufficient_data("preamble_ints"))?;
        let serial_version = cursor
            .read_u8()
            .map_err(insufficient_data("serial_version"))?;
        let family_id = cursor.read_u8().map_err(insufficient_data("family_id"))?;
        Family::CPC.validate_id(family_id)?;
        ensure_serial_version_is(SERIAL_VERSION, serial_version)?;

        let lg_k = cursor.read_u8().map_err(insufficient_data("lg_k"))?;
        super::check_lg_k(lg_k).map_err(|err| Error::deserial(err.message()))?;
        let first_interesting_column = cursor
            .read_u8()
            .map_err(insufficient_data("first_interesting_column"))?;
        if first_interesting_column > 63 {
            return Err(Error::deserial(format!(
                "first_interesting_column out of range; got {first_interesting_column}"
            )));
        }

        let flags = cursor.read_u8().map_err(insufficient_data("flags"))?;
        let is_compressed = flags & (1 << FLAG_COMPRESSED) != 0;
        if !is_compressed {
            return Err(Error::new(
                ErrorKind::InvalidData,
                "only compressed sketches are supported",
            ));
        }
        let has_hip = flags & (1 << FLAG_HAS_HIP) != 0;
        let has_table = flags & (1 << FLAG_HAS_TABLE) != 0;
        let has_window = flags & (1 << FLAG_HAS_WINDOW) != 0;

        let seed_hash = cursor
            .read_u16_le()
            .map_err(insufficient_data("seed_hash"))?;

        let mut preamble = Preamble {
            lg_k,
            first_interesting_column,
            seed_hash,
            merged: !has_hip,
            num_coupons: 0,
            num_table_entries: 0,
            table_words: 0,
            window_words: 0,
            kxp: (1u64 << lg_k) as f64,
            hip_est_accum: 0.0,
        };

        if has_table || has_window {
            preamble.num_coupons = cursor
                .read_u32_le()
                .map_err(insufficient_data("num_coupons"))?;
            if has_table && has_window {
                preamble.num_table_entries = cursor
                    .read_u32_le()
                    .map_err(insufficient_data("table_num_entries"))?;
                if has_hip {
                    preamble.read_hip(cursor)?;
                }
            } else if has_table {
                preamble.num_table_entries = preamble.num_coupons;
            }
            if has_table {
                preamble.table_words = cursor
                    .read_u32_le()
                    .map_err(insufficient_data("table_data_words"))?;
            }
            if has_window {
                preamble.window_words = cursor
                    .read_u32_le()
                    .map_err(insufficient_data("window_data_words"))?;
            }
            if has_hip && !(has_table && has_window) {
                preamble.read_hip(cursor)?;
            }
        }

        let expected_preamble_ints =
            make_preamble_ints(preamble.num_coupons, has_hip, has_table, has_window);
        ensure_preamble_ints_in(&[expected_preamble_ints], preamble_ints)?;
        preamble.check_flavor(has_table, has_window)?;
        Ok(preamble)
    }

    fn read_hip(&mut self, cursor: &mut SketchSlice<'_>) -> Result<(), Error> {
        self.kxp = cursor.read_f64_le().map_err(insufficient_data("kxp"))?;
        self.hip_est_accum = cursor
            .read_f64_le()
            .map_err(insufficient_data("hip_est_accum"))?;
        Ok(())
    }

    /// Checks that the flags and lengths agree with the flavor implied by `C`.
    fn check_flavor(&self, has_table: bool, has_window: bool) -> Result<(), Error> {
        if u64::from(self.num_coupons) > 64 << self.lg_k {
            return Err(Error::deserial(format!(
                "{} coupons exceed the {} cells of lg_k {}",
                self.num_coupons,
                64u64 << self.lg_k,
                self.lg_k
            )));
        }
        if self.num_table_entries > self.num_coupons {
            return Err(Error::deserial(format!(
                "{} table entries exceed {} coupons",
                self.num_table_entries, self.num_coupons
            )));
        }
        let flavor = determine_flavor(self.lg_k, self.num_coupons);
        let consistent = match flavor {
            Flavor::Empty => !has_table && !has_window,
            Flavor::Sparse | Flavor::Hybrid => has_table && !has_window,
            Flavor::Pinned | Flavor::Sliding => has_window,
        };
        if !consistent {
            return Err(Error::deserial(format!(
                "flags {{table: {has_table}, window: {has_window}}} do not match flavor {flavor}"
            ))
            .with_context("num_coupons", self.num_coupons));
        }
        if has_table != (self.table_words > 0) || has_window != (self.window_words > 0) {
            return Err(Error::deserial("data length disagrees with flags"));
        }
        if has_table && self.num_table_entries == 0 {
            return Err(Error::deserial("table flag set without table entries"));
        }
        if !self.merged && !(self.kxp.is_finite() && self.hip_est_accum.is_finite()) {
            return Err(Error::deserial("HIP state is not finite"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_make_preamble_ints() {
        assert_eq!(make_preamble_ints(0, true, false, false), 2);
        // sparse, not merged: C, table length, kxp and hip
        assert_eq!(make_preamble_ints(3, true, true, false), 8);
        // sparse, merged
        assert_eq!(make_preamble_ints(5, false, true, false), 4);
        // sliding, not merged
        assert_eq!(make_preamble_ints(5376, true, true, true), 10);
        // sliding, merged
        assert_eq!(make_preamble_ints(7415, false, true, true), 6);
        // pinned without surprises
        assert_eq!(make_preamble_ints(600, false, false, true), 4);
    }

    #[test]
    fn test_write_then_read() {
        let preamble = Preamble {
            lg_k: 11,
            first_interesting_column: 0,
            seed_hash: 0x93cc,
            merged: false,
            num_coupons: 5376,
            num_table_entries: 38,
            table_words: 12,
            window_words: 512,
            kxp: 595.2383422851562,
            hip_est_accum: 9912.033040262888,
        };
        let mut bytes = SketchBytes::with_capacity(40);
        preamble.write(&mut bytes);
        let bytes = bytes.into_bytes();
        assert_eq!(bytes.len(), 40);
        assert_eq!(&bytes[..8], &[10, 1, 16, 11, 0, 0x1e, 0xcc, 0x93]);
        assert_eq!(preamble.serialized_size(), 40 + 4 * (12 + 512));

        let mut cursor = SketchSlice::new(&bytes);
        assert_eq!(Preamble::read(&mut cursor).unwrap(), preamble);
    }

    #[test]
    fn test_flavor_mismatch_is_rejected() {
        // C = 3 at lg_k 11 is sparse, but the flags claim a window
        let preamble = Preamble {
            lg_k: 11,
            first_interesting_column: 0,
            seed_hash: 0x93cc,
            merged: true,
            num_coupons: 3,
            num_table_entries: 3,
            table_words: 0,
            window_words: 512,
            kxp: 2048.0,
            hip_est_accum: 0.0,
        };
        let mut bytes = SketchBytes::with_capacity(16);
        preamble.write(&mut bytes);
        let bytes = bytes.into_bytes();
        let err = Preamble::read(&mut SketchSlice::new(&bytes)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
        assert!(err.message().contains("do not match flavor SPARSE"));
    }
}
