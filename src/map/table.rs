// MIT License
//
// Copyright (c) 2020 Gregory Meyer
//
// Permission is hereby granted, free of charge, to any person
// obtaining a copy of this software and associated documentation files
// (the "Software"), to deal in the Software without restriction,
// including without limitation the rights to use, copy, modify, merge,
// publish, distribute, sublicense, and/or sell copies of the Software,
// and to permit persons to whom the Software is furnished to do so,
// subject to the following conditions:
//
// The above copyright notice and this permission notice shall be
// included in all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND,
// EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF
// MERCHANTABILITY, FITNESS FOR A PARTICULAR PURPOSE AND
// NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR COPYRIGHT HOLDERS
// BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER IN AN
// ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
// CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

use super::slot::{self, Slot, ValueRef, MOVED, NULL_KEY, NULL_VALUE, TOMBSTONE};

use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_epoch::{Atomic, CompareExchangeError, Guard, Owned, Shared};
use log::{debug, trace};

pub(crate) const INITIAL_CAPACITY: usize = 2; // doubling from 1 breaks the shift derivation
const MAX_PROBES: usize = 8;

const GOLDEN_RATIO: u32 = 0x9E37_79B9;

/// One fixed-capacity generation of the map.
///
/// Once a probe sequence is exhausted, a generation of twice the capacity is
/// linked through `next` and every slot of this one is frozen, copied and
/// marked as moved by whichever threads come along. `cursor` counts the
/// leading slots that have been fully resolved.
pub(crate) struct Table {
    slots: Box<[Slot]>,
    pub(crate) next: Atomic<Table>,
    cursor: AtomicUsize,
    epoch: usize,
    shift: u32,
}

/// Returned by [`Table::insert`] when the key does not fit into the probe
/// window of a generation. The caller must drain migration and retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct NeedsRehash;

enum Probe<'a> {
    Found(&'a Slot),
    Vacant,
    Exhausted,
}

impl Table {
    pub(crate) fn with_capacity(epoch: usize, capacity: usize) -> Self {
        assert!(capacity.is_power_of_two());
        assert!(capacity > 1);
        assert!(capacity.trailing_zeros() < u32::BITS);

        let slots = (0..capacity).map(|_| Slot::default()).collect();
        let next = Atomic::null();
        let cursor = AtomicUsize::new(0);
        let shift = u32::BITS - capacity.trailing_zeros();

        Self {
            slots,
            next,
            cursor,
            epoch,
            shift,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn epoch(&self) -> usize {
        self.epoch
    }

    /// Number of slots whose key has been claimed.
    pub(crate) fn claimed(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.load_key() != NULL_KEY)
            .count()
    }

    fn home(&self, key: i32) -> usize {
        ((key as u32).wrapping_mul(GOLDEN_RATIO) >> self.shift) as usize
    }

    fn probe(&self, key: i32, claim: bool) -> Probe<'_> {
        let mut index = self.home(key);

        for _ in 0..MAX_PROBES {
            let this_slot = &self.slots[index];

            loop {
                match this_slot.load_key() {
                    this_key if this_key == key => return Probe::Found(this_slot),
                    NULL_KEY if !claim => return Probe::Vacant,
                    NULL_KEY => {
                        if this_slot.claim(key).is_ok() {
                            return Probe::Found(this_slot);
                        }
                        // lost the race; the winner may have claimed it for this key
                    }
                    _ => break,
                }
            }

            index = index.checked_sub(1).unwrap_or(self.slots.len() - 1);
        }

        Probe::Exhausted
    }
}

impl<'g> Table {
    /// Returns the raw value stored for `key`, following moved slots into
    /// later generations.
    pub(crate) fn get(&self, guard: &'g Guard, key: i32) -> i32 {
        let mut table = self;

        loop {
            let this_slot = match table.probe(key, false) {
                Probe::Found(s) => s,
                Probe::Vacant => return NULL_VALUE,
                Probe::Exhausted => match table.next(guard) {
                    Some(next) => {
                        table = next;

                        continue;
                    }
                    None => return NULL_VALUE,
                },
            };

            loop {
                let raw = this_slot.load_value();

                match ValueRef::decode(raw) {
                    ValueRef::Moved => break,
                    ValueRef::Frozen(value) => table.help_move(guard, this_slot, raw, value),
                    ValueRef::Live(value) => return value,
                    ValueRef::Null | ValueRef::Tombstone => return NULL_VALUE,
                }
            }

            table = table.successor(guard);
        }
    }

    /// Stores `value` (a live value or the tombstone) for `key` and returns
    /// the raw value it replaced.
    pub(crate) fn insert(
        &self,
        guard: &'g Guard,
        key: i32,
        value: i32,
    ) -> Result<i32, NeedsRehash> {
        assert!(slot::is_value(value) || value == TOMBSTONE);

        let is_removal = value == TOMBSTONE;
        let mut table = self;

        loop {
            let this_slot = match table.probe(key, !is_removal) {
                Probe::Found(s) => s,
                Probe::Vacant => return Ok(NULL_VALUE),
                Probe::Exhausted if is_removal => match table.next(guard) {
                    Some(next) => {
                        table = next;

                        continue;
                    }
                    None => return Ok(NULL_VALUE),
                },
                Probe::Exhausted => {
                    table.grow(guard);

                    return Err(NeedsRehash);
                }
            };

            loop {
                let raw = this_slot.load_value();

                match ValueRef::decode(raw) {
                    ValueRef::Moved => break,
                    ValueRef::Frozen(frozen) => table.help_move(guard, this_slot, raw, frozen),
                    ValueRef::Null | ValueRef::Tombstone if is_removal => return Ok(raw),
                    ValueRef::Null | ValueRef::Tombstone | ValueRef::Live(_) => {
                        if this_slot.compare_exchange_value(raw, value).is_ok() {
                            return Ok(raw);
                        }
                    }
                }
            }

            table = table.successor(guard);
        }
    }

    /// Copies a frozen value into this generation on behalf of migration.
    ///
    /// Only an absent value is ever overwritten; anything else in the slot was
    /// written after the value was frozen and takes precedence.
    fn transfer(&self, guard: &'g Guard, key: i32, value: i32) {
        let mut table = self;

        loop {
            let this_slot = match table.probe(key, true) {
                Probe::Found(s) => s,
                // claiming probes stop at a null key by taking it
                Probe::Vacant => unreachable!(),
                Probe::Exhausted => {
                    // claimed slots are never released, so the key can only live further on
                    trace!(
                        "key {} does not fit into epoch {}, copying past it",
                        key,
                        table.epoch
                    );

                    table = table.grow(guard);

                    continue;
                }
            };

            loop {
                match ValueRef::decode(this_slot.load_value()) {
                    ValueRef::Null => {
                        if this_slot.compare_exchange_value(NULL_VALUE, value).is_ok() {
                            return;
                        }
                    }
                    ValueRef::Moved => break,
                    ValueRef::Live(_) | ValueRef::Tombstone | ValueRef::Frozen(_) => return,
                }
            }

            table = table.successor(guard);
        }
    }

    fn help_move(&self, guard: &'g Guard, this_slot: &Slot, raw: i32, value: i32) {
        let key = this_slot.load_key();
        assert_ne!(key, NULL_KEY);

        self.successor(guard).transfer(guard, key, value);
        this_slot.compare_exchange_value(raw, MOVED).ok();
    }

    /// Moves every slot of this generation into the next one, then swings
    /// `active` from this generation to the next.
    ///
    /// Returns false if there is no next generation, in which case nothing is
    /// done.
    pub(crate) fn migrate(&self, guard: &'g Guard, active: &Atomic<Table>) -> bool {
        let next = match self.next(guard) {
            Some(n) => n,
            None => return false,
        };

        loop {
            let i = self.cursor.load(Ordering::SeqCst);

            if i >= self.capacity() {
                break;
            }

            self.migrate_slot(guard, &self.slots[i], next);

            // failure means another thread already resolved this slot
            self.cursor
                .compare_exchange(i, i + 1, Ordering::SeqCst, Ordering::SeqCst)
                .ok();
        }

        let current_ptr: Shared<'g, Table> = (self as *const Table).into();
        let next_ptr: Shared<'g, Table> = (next as *const Table).into();

        if active
            .compare_exchange(
                current_ptr,
                next_ptr,
                Ordering::AcqRel,
                Ordering::Acquire,
                guard,
            )
            .is_ok()
        {
            debug!(
                "epoch {} retired, capacity is now {}",
                self.epoch,
                next.capacity()
            );

            unsafe { guard.defer_destroy(current_ptr) };
        }

        true
    }

    fn migrate_slot(&self, guard: &'g Guard, this_slot: &Slot, next: &'g Table) {
        loop {
            let raw = this_slot.load_value();

            match ValueRef::decode(raw) {
                ValueRef::Moved => return,
                ValueRef::Frozen(value) => {
                    next.transfer(guard, this_slot.load_key(), value);
                    this_slot.compare_exchange_value(raw, MOVED).ok();
                }
                // tombstones are carried over too, so that a late helper still
                // holding an older frozen value finds the slot populated
                ValueRef::Live(_) | ValueRef::Tombstone => {
                    this_slot
                        .compare_exchange_value(raw, slot::freeze(raw))
                        .ok();
                }
                // nothing was ever written here
                ValueRef::Null => {
                    this_slot.compare_exchange_value(raw, MOVED).ok();
                }
            }
        }
    }

    /// Returns the next generation, creating it if it does not exist yet.
    pub(crate) fn grow(&self, guard: &'g Guard) -> &'g Table {
        let mut maybe_new_next = None;

        loop {
            if let Some(next) = self.next(guard) {
                return next;
            }

            let new_next = maybe_new_next.unwrap_or_else(|| {
                Owned::new(Table::with_capacity(self.epoch + 1, self.capacity() * 2))
            });

            match self.next.compare_exchange_weak(
                Shared::null(),
                new_next,
                Ordering::AcqRel,
                Ordering::Acquire,
                guard,
            ) {
                Ok(p) => {
                    debug!(
                        "growing epoch {} from {} to {} slots",
                        self.epoch,
                        self.capacity(),
                        self.capacity() * 2
                    );

                    return unsafe { p.deref() };
                }
                Err(CompareExchangeError { new, .. }) => maybe_new_next = Some(new),
            }
        }
    }

    pub(crate) fn next(&self, guard: &'g Guard) -> Option<&'g Table> {
        unsafe { self.next.load(Ordering::Acquire, guard).as_ref() }
    }

    fn successor(&self, guard: &'g Guard) -> &'g Table {
        let next_ptr = self.next.load(Ordering::Acquire, guard);
        assert!(!next_ptr.is_null());

        unsafe { next_ptr.deref() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn destroy_chain(active: &Atomic<Table>) {
        let guard = unsafe { crossbeam_epoch::unprotected() };
        let mut table_ptr = active.swap(Shared::null(), Ordering::Relaxed, guard);

        while !table_ptr.is_null() {
            let next_ptr = unsafe { table_ptr.deref() }
                .next
                .load(Ordering::Relaxed, guard);

            unsafe { drop(table_ptr.into_owned()) };
            table_ptr = next_ptr;
        }
    }

    fn load_active<'g>(active: &Atomic<Table>, guard: &'g Guard) -> &'g Table {
        unsafe { active.load(Ordering::Acquire, guard).deref() }
    }

    #[test]
    fn home_is_within_capacity() {
        for &capacity in &[2, 4, 8, 1024] {
            let table = Table::with_capacity(0, capacity);

            for key in 1..4096 {
                assert!(table.home(key) < capacity);
            }
        }
    }

    #[test]
    #[should_panic]
    fn capacity_of_one_is_rejected() {
        Table::with_capacity(0, 1);
    }

    #[test]
    fn insert_then_get() {
        let guard = &crossbeam_epoch::pin();
        let table = Table::with_capacity(0, 8);

        assert_eq!(table.get(guard, 7), NULL_VALUE);
        assert_eq!(table.insert(guard, 7, 70), Ok(NULL_VALUE));
        assert_eq!(table.get(guard, 7), 70);
        assert_eq!(table.insert(guard, 7, 71), Ok(70));
        assert_eq!(table.insert(guard, 7, TOMBSTONE), Ok(71));
        assert_eq!(table.get(guard, 7), NULL_VALUE);
        assert_eq!(table.insert(guard, 7, TOMBSTONE), Ok(TOMBSTONE));
        assert_eq!(table.claimed(), 1);
    }

    #[test]
    fn removal_of_missing_key_claims_nothing() {
        let guard = &crossbeam_epoch::pin();
        let table = Table::with_capacity(0, 2);

        assert_eq!(table.insert(guard, 3, TOMBSTONE), Ok(NULL_VALUE));
        assert_eq!(table.claimed(), 0);

        assert_eq!(table.insert(guard, 1, 10), Ok(NULL_VALUE));
        assert_eq!(table.insert(guard, 2, 20), Ok(NULL_VALUE));

        // the window is full, but a removal never needs to grow
        assert_eq!(table.insert(guard, 3, TOMBSTONE), Ok(NULL_VALUE));
        assert_eq!(table.claimed(), 2);
        assert!(table.next(guard).is_none());
    }

    #[test]
    fn exhausted_window_grows() {
        let active = Atomic::new(Table::with_capacity(0, INITIAL_CAPACITY));

        {
            let guard = &crossbeam_epoch::pin();
            let table = load_active(&active, guard);

            assert_eq!(table.insert(guard, 1, 10), Ok(NULL_VALUE));
            assert_eq!(table.insert(guard, 2, 20), Ok(NULL_VALUE));
            assert_eq!(table.insert(guard, 3, 30), Err(NeedsRehash));

            let next = table.next(guard).expect("next generation");
            assert_eq!(next.capacity(), 4);
            assert_eq!(next.epoch(), 1);

            // lookups of keys that are not in the window go to the next generation
            assert_eq!(table.get(guard, 3), NULL_VALUE);
        }

        destroy_chain(&active);
    }

    #[test]
    fn grow_is_set_once() {
        let guard = &crossbeam_epoch::pin();
        let table = Table::with_capacity(0, 4);

        let first = table.grow(guard) as *const Table;
        let second = table.grow(guard) as *const Table;
        assert_eq!(first, second);

        unsafe { drop(table.next.load(Ordering::Relaxed, guard).into_owned()) };
    }

    #[test]
    fn migration_moves_every_slot() {
        let active = Atomic::new(Table::with_capacity(0, INITIAL_CAPACITY));

        {
            let guard = &crossbeam_epoch::pin();
            let old = load_active(&active, guard);

            assert_eq!(old.insert(guard, 1, 10), Ok(NULL_VALUE));
            assert_eq!(old.insert(guard, 2, 20), Ok(NULL_VALUE));
            assert_eq!(old.insert(guard, 2, TOMBSTONE), Ok(20));
            assert_eq!(old.insert(guard, 3, 30), Err(NeedsRehash));

            assert!(old.migrate(guard, &active));

            for this_slot in old.slots.iter() {
                assert_eq!(this_slot.load_value(), MOVED);
            }

            let new = load_active(&active, guard);
            assert_eq!(new.epoch(), 1);
            assert_eq!(new.get(guard, 1), 10);
            assert_eq!(new.get(guard, 2), NULL_VALUE);

            assert_eq!(new.claimed(), 2);

            // reads and writes through the old generation are forwarded
            assert_eq!(old.get(guard, 1), 10);
            assert_eq!(old.insert(guard, 1, 11), Ok(10));
            assert_eq!(new.get(guard, 1), 11);

            // a second pass is a no-op
            assert!(old.migrate(guard, &active));
            assert!(!new.migrate(guard, &active));
            assert_eq!(new.get(guard, 1), 11);
        }

        destroy_chain(&active);
    }

    #[test]
    fn frozen_slots_are_forwarded() {
        let active = Atomic::new(Table::with_capacity(0, 4));

        {
            let guard = &crossbeam_epoch::pin();
            let old = load_active(&active, guard);

            assert_eq!(old.insert(guard, 5, 50), Ok(NULL_VALUE));

            let next = old.grow(guard);
            let this_slot = old
                .slots
                .iter()
                .find(|s| s.load_key() == 5)
                .expect("claimed slot");

            this_slot
                .compare_exchange_value(50, slot::freeze(50))
                .expect("freeze");

            // a writer that meets a frozen slot copies it over first
            assert_eq!(old.insert(guard, 5, 51), Ok(50));
            assert_eq!(this_slot.load_value(), MOVED);
            assert_eq!(next.get(guard, 5), 51);
        }

        destroy_chain(&active);
    }

    #[test]
    fn transfer_does_not_clobber() {
        let guard = &crossbeam_epoch::pin();
        let table = Table::with_capacity(0, 8);

        table.transfer(guard, 4, 40);
        assert_eq!(table.get(guard, 4), 40);

        table.transfer(guard, 4, 41);
        assert_eq!(table.get(guard, 4), 40);

        assert_eq!(table.insert(guard, 4, TOMBSTONE), Ok(40));
        table.transfer(guard, 4, 42);
        assert_eq!(table.get(guard, 4), NULL_VALUE);
    }

    #[test]
    fn transfer_past_exhausted_window() {
        let guard = &crossbeam_epoch::pin();
        let table = Table::with_capacity(0, 2);

        assert_eq!(table.insert(guard, 1, 10), Ok(NULL_VALUE));
        assert_eq!(table.insert(guard, 2, 20), Ok(NULL_VALUE));

        table.transfer(guard, 3, 30);

        let next = table.next(guard).expect("next generation");
        assert_eq!(next.get(guard, 3), 30);
        assert_eq!(table.get(guard, 3), 30);

        unsafe { drop(table.next.load(Ordering::Relaxed, guard).into_owned()) };
    }
}
