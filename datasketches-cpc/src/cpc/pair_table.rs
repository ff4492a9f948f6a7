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

/// Marks an unused slot. No coupon ever packs to this value.
pub(super) const EMPTY_SLOT: u32 = u32::MAX;

const UPSIZE_NUMERATOR: u32 = 3;
const UPSIZE_DENOMINATOR: u32 = 4;
const DOWNSIZE_NUMERATOR: u32 = 1;
const DOWNSIZE_DENOMINATOR: u32 = 4;
const MIN_LG_SIZE: u8 = 2;

/// An open-addressing set of packed `row << 6 | col` coupons.
///
/// Slots are scanned linearly starting from the high bits of the coupon, so a nearly sorted
/// sequence of items can be pulled back out cheaply. The table grows past 3/4 load and shrinks
/// below 1/4 load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct PairTable {
    /// log2 of number of slots
    lg_size: u8,
    /// The number of meaningful low bits in an item, `6 + lg_k`.
    num_valid_bits: u8,
    num_items: u32,
    slots: Vec<u32>,
}

impl PairTable {
    pub fn new(lg_size: u8, num_valid_bits: u8) -> Self {
        assert!(
            (MIN_LG_SIZE..=26).contains(&lg_size),
            "lg_size must be in [2, 26], got {lg_size}"
        );
        assert!(
            ((lg_size + 1)..=32).contains(&num_valid_bits),
            "num_valid_bits must be in [lg_size + 1, 32], got {num_valid_bits} where lg_size = {lg_size}"
        );
        Self {
            lg_size,
            num_valid_bits,
            num_items: 0,
            slots: vec![EMPTY_SLOT; 1 << lg_size],
        }
    }

    /// Creates the smallest table for coupons of a sketch with the given `lg_k`.
    pub fn with_lg_k(lg_k: u8) -> Self {
        Self::new(MIN_LG_SIZE, 6 + lg_k)
    }

    /// Creates a table already large enough to hold `items` without growing.
    ///
    /// The items must be distinct.
    pub fn from_items(lg_k: u8, items: &[u32]) -> Self {
        let num_items = items.len() as u32;
        let mut lg_size = MIN_LG_SIZE;
        while UPSIZE_DENOMINATOR * num_items > UPSIZE_NUMERATOR * (1 << lg_size) {
            lg_size += 1;
        }

        let mut table = Self::new(lg_size, 6 + lg_k);
        for &item in items {
            table.must_insert(item);
        }
        table.num_items = num_items;
        table
    }

    pub fn num_items(&self) -> u32 {
        self.num_items
    }

    #[cfg(test)]
    pub fn lg_size(&self) -> u8 {
        self.lg_size
    }

    /// The raw slots, with [`EMPTY_SLOT`] marking unused ones.
    pub fn slots(&self) -> &[u32] {
        &self.slots
    }

    /// Iterates over the stored items in slot order.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.slots.iter().copied().filter(|&slot| slot != EMPTY_SLOT)
    }

    /// Removes every item, keeping the current capacity.
    pub fn clear(&mut self) {
        self.slots.fill(EMPTY_SLOT);
        self.num_items = 0;
    }

    /// Removes `item`, returning whether it was present.
    pub fn maybe_delete(&mut self, item: u32) -> bool {
        let index = self.lookup(item);
        if self.slots[index] == EMPTY_SLOT {
            return false;
        }
        debug_assert_eq!(self.slots[index], item);
        debug_assert!(self.num_items > 0);

        self.slots[index] = EMPTY_SLOT;
        self.num_items -= 1;

        // the rest of the cluster may have been displaced past the freed slot
        let mask = (1 << self.lg_size) - 1;
        let mut index = (index + 1) & mask;
        let mut fetched = self.slots[index];
        while fetched != EMPTY_SLOT {
            self.slots[index] = EMPTY_SLOT;
            self.must_insert(fetched);
            index = (index + 1) & mask;
            fetched = self.slots[index];
        }

        while (DOWNSIZE_DENOMINATOR * self.num_items) < (DOWNSIZE_NUMERATOR * (1 << self.lg_size))
            && self.lg_size > MIN_LG_SIZE
        {
            self.rebuild(self.lg_size - 1);
        }

        true
    }

    /// Adds `item`, returning whether it was absent.
    pub fn maybe_insert(&mut self, item: u32) -> bool {
        let index = self.lookup(item);
        if self.slots[index] == item {
            return false;
        }
        debug_assert_eq!(self.slots[index], EMPTY_SLOT);
        self.slots[index] = item;
        self.num_items += 1;
        while (UPSIZE_DENOMINATOR * self.num_items) > (UPSIZE_NUMERATOR * (1 << self.lg_size)) {
            self.rebuild(self.lg_size + 1);
        }
        true
    }

    /// Returns all items in ascending order.
    pub fn sorted_items(&self) -> Vec<u32> {
        let mut items = self.unwrapping_get_items();
        // nearly sorted already; the stable merge sort handles this in close to linear time
        items.sort();
        items
    }

    /// While extracting the items from a linear probing hashtable, this will usually undo the
    /// wrap-around provided that the table isn't too full.
    fn unwrapping_get_items(&self) -> Vec<u32> {
        if self.num_items == 0 {
            return vec![];
        }

        let table_size = 1usize << self.lg_size;
        let mut result = vec![0; self.num_items as usize];
        let mut i = 0;
        let mut l = 0;
        let mut r = self.num_items as usize;

        // items before the first empty slot with the high bit set probably wrapped around
        let hi_bit = 1 << (self.num_valid_bits - 1);
        while i < table_size && self.slots[i] != EMPTY_SLOT {
            let item = self.slots[i];
            i += 1;
            if (item & hi_bit) != 0 {
                r -= 1;
                result[r] = item;
            } else {
                result[l] = item;
                l += 1;
            }
        }

        while i < table_size {
            let item = self.slots[i];
            i += 1;
            if item != EMPTY_SLOT {
                result[l] = item;
                l += 1;
            }
        }

        debug_assert_eq!(l, r);
        result
    }

    /// Places an item known to be absent. Counts and resizing are the caller's job.
    fn must_insert(&mut self, item: u32) {
        let index = self.lookup(item);
        debug_assert_eq!(self.slots[index], EMPTY_SLOT, "duplicate item {item}");
        self.slots[index] = item;
    }

    /// Returns the slot holding `item`, or the empty slot where it would go.
    fn lookup(&self, item: u32) -> usize {
        let mask = (1usize << self.lg_size) - 1;
        let shift = self.num_valid_bits - self.lg_size;
        let mut index = (item >> shift) as usize;
        debug_assert!(index <= mask, "index = {index}, mask = {mask}");

        loop {
            let slot = self.slots[index];
            if slot == item || slot == EMPTY_SLOT {
                return index;
            }
            index = (index + 1) & mask;
        }
    }

    /// Moves every item into a table of `2^lg_size` slots.
    fn rebuild(&mut self, lg_size: u8) {
        assert!(
            (MIN_LG_SIZE..self.num_valid_bits).contains(&lg_size),
            "lg_size must be in [2, {}), got {lg_size}",
            self.num_valid_bits
        );
        debug_assert!((1u32 << lg_size) > self.num_items);

        let slots = std::mem::replace(&mut self.slots, vec![EMPTY_SLOT; 1 << lg_size]);
        self.lg_size = lg_size;
        for slot in slots {
            if slot != EMPTY_SLOT {
                self.must_insert(slot);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coupon(row: u32, col: u32) -> u32 {
        (row << 6) | col
    }

    #[test]
    fn test_insert_and_delete() {
        let mut table = PairTable::with_lg_k(10);
        assert!(table.maybe_insert(coupon(3, 7)));
        assert!(!table.maybe_insert(coupon(3, 7)));
        assert!(table.maybe_insert(coupon(3, 8)));
        assert_eq!(table.num_items(), 2);

        assert!(table.maybe_delete(coupon(3, 7)));
        assert!(!table.maybe_delete(coupon(3, 7)));
        assert_eq!(table.num_items(), 1);
        assert_eq!(table.iter().collect::<Vec<_>>(), vec![coupon(3, 8)]);
    }

    #[test]
    fn test_grow_and_shrink() {
        let mut table = PairTable::with_lg_k(10);
        for row in 0..100 {
            assert!(table.maybe_insert(coupon(row * 7 % 1024, row % 64)));
        }
        assert_eq!(table.num_items(), 100);
        // 100 items need at least 134 slots at 3/4 load
        assert_eq!(table.lg_size(), 8);

        for row in 0..98 {
            assert!(table.maybe_delete(coupon(row * 7 % 1024, row % 64)));
        }
        assert_eq!(table.num_items(), 2);
        assert_eq!(table.lg_size(), 3);
        assert_eq!(
            table.sorted_items(),
            vec![coupon(98 * 7 % 1024, 98 % 64), coupon(99 * 7 % 1024, 99 % 64)]
        );
    }

    #[test]
    fn test_collisions_survive_delete() {
        // all of these start from the same home slot
        let mut table = PairTable::new(4, 16);
        let items = [0x0001, 0x0002, 0x0003, 0x0004];
        for item in items {
            table.maybe_insert(item);
        }
        assert!(table.maybe_delete(0x0002));
        for item in [0x0001, 0x0003, 0x0004] {
            assert!(!table.maybe_insert(item), "item {item} was lost");
        }
    }

    #[test]
    fn test_sorted_items_with_wrap_around() {
        let lg_k = 4;
        let mut table = PairTable::with_lg_k(lg_k);
        let mut expected = vec![];
        for row in (0..16).rev() {
            for col in [5, 40, 63] {
                table.maybe_insert(coupon(row, col));
                expected.push(coupon(row, col));
            }
        }
        expected.sort();
        assert_eq!(table.sorted_items(), expected);

        let rebuilt = PairTable::from_items(lg_k, &expected);
        assert_eq!(rebuilt.num_items(), expected.len() as u32);
        assert_eq!(rebuilt.sorted_items(), expected);
    }
}
