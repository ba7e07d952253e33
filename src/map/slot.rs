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

use std::sync::atomic::{AtomicI32, Ordering};

pub(crate) const NULL_KEY: i32 = 0; // set on slots that have never been claimed
pub(crate) const NULL_VALUE: i32 = 0; // set on slots that have no value yet
pub(crate) const TOMBSTONE: i32 = i32::MAX; // set when the key has been removed
pub(crate) const MOVED: i32 = i32::MIN; // set on old table slots when copied into a new table

const FROZEN_BIT: i32 = i32::MIN;

/// A key cell and a value cell.
///
/// The key is claimed at most once and never changes afterwards. The value
/// cell multiplexes live values, the tombstone, frozen snapshots and the moved
/// marker into one integer so that every state transition is a single CAS.
#[derive(Debug, Default)]
pub(crate) struct Slot {
    key: AtomicI32,
    value: AtomicI32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ValueRef {
    Null,
    Live(i32),
    Tombstone,
    Frozen(i32),
    Moved,
}

impl Slot {
    pub(crate) fn load_key(&self) -> i32 {
        self.key.load(Ordering::SeqCst)
    }

    pub(crate) fn load_value(&self) -> i32 {
        self.value.load(Ordering::SeqCst)
    }

    pub(crate) fn claim(&self, key: i32) -> Result<(), i32> {
        assert_ne!(key, NULL_KEY);

        self.key
            .compare_exchange(NULL_KEY, key, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
    }

    pub(crate) fn compare_exchange_value(&self, current: i32, new: i32) -> Result<i32, i32> {
        self.value
            .compare_exchange(current, new, Ordering::SeqCst, Ordering::SeqCst)
    }
}

impl ValueRef {
    pub(crate) fn decode(raw: i32) -> Self {
        match raw {
            NULL_VALUE => ValueRef::Null,
            TOMBSTONE => ValueRef::Tombstone,
            MOVED => ValueRef::Moved,
            r if r & FROZEN_BIT != 0 => ValueRef::Frozen(r & !FROZEN_BIT),
            r => ValueRef::Live(r),
        }
    }
}

/// Returns true if `value` may be stored by a caller.
pub(crate) fn is_value(value: i32) -> bool {
    value > NULL_VALUE && value < TOMBSTONE
}

/// Maps an internal value to the zero-means-absent public contract.
pub(crate) fn to_public(raw: i32) -> i32 {
    if is_value(raw) {
        raw
    } else {
        NULL_VALUE
    }
}

pub(crate) fn freeze(value: i32) -> i32 {
    assert!(is_value(value) || value == TOMBSTONE);

    value | FROZEN_BIT
}
