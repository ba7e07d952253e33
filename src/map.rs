// MIT License
//
// Copyright (c) 2019 Gregory Meyer
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

//! A lockfree concurrent integer-to-integer hash map implemented with open
//! addressing and linear probing.

mod slot;
mod table;


use slot::TOMBSTONE;
use table::{Table, INITIAL_CAPACITY};

use std::{
    fmt::{self, Debug, Formatter},
    sync::atomic::{self, Ordering},
};

use crossbeam_epoch::{self, Atomic, Guard, Shared};
use thiserror::Error;

/// The error returned when a key or value is outside of the domain accepted by
/// [`HashMap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InvalidArgument {
    /// Keys must be strictly positive.
    #[error("key must be positive: {0}")]
    Key(i32),
    /// Values must be strictly positive and less than [`i32::MAX`], which is
    /// reserved.
    #[error("invalid value: {0}")]
    Value(i32),
}

/// A lockfree concurrent hash map from positive `i32` keys to positive `i32`
/// values.
///
/// All operations may be invoked concurrently from any number of threads.
/// Absent values are reported as `0`, which is why neither keys nor values may
/// be zero.
///
/// The map starts out with room for two entries. When a key cannot be placed
/// within a short probe window, a table of twice the capacity is allocated and
/// the entries of the old table are moved over incrementally. Moving is
/// cooperative: every thread that calls into the map first helps finish any
/// move in progress, so no thread ever waits on another.
pub struct HashMap {
    table: Atomic<Table>,
}

impl HashMap {
    /// Creates an empty `HashMap` with a capacity of two.
    pub fn new() -> HashMap {
        HashMap {
            table: Atomic::new(Table::with_capacity(0, INITIAL_CAPACITY)),
        }
    }

    /// Returns the number of slots in the current table.
    ///
    /// Any growth already in progress is finished before the capacity is read.
    pub fn capacity(&self) -> usize {
        let guard = &crossbeam_epoch::pin();

        self.current(guard).capacity()
    }

    /// Returns the value corresponding to `key`, or `0` if there is none.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidArgument::Key`] if `key` is not positive.
    pub fn get(&self, key: i32) -> Result<i32, InvalidArgument> {
        check_key(key)?;

        let guard = &crossbeam_epoch::pin();

        Ok(slot::to_public(self.current(guard).get(guard, key)))
    }

    /// Associates `value` with `key`, then returns the previous value or `0`
    /// if there was none.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidArgument::Key`] if `key` is not positive and
    /// [`InvalidArgument::Value`] if `value` is not positive or is
    /// [`i32::MAX`].
    pub fn put(&self, key: i32, value: i32) -> Result<i32, InvalidArgument> {
        check_key(key)?;

        if !slot::is_value(value) {
            return Err(InvalidArgument::Value(value));
        }

        Ok(slot::to_public(self.insert_while_rehashing(key, value)))
    }

    /// Removes the value associated with `key`, then returns it or `0` if there
    /// was none.
    ///
    /// Removing a key that was never inserted does not allocate space for it.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidArgument::Key`] if `key` is not positive.
    pub fn remove(&self, key: i32) -> Result<i32, InvalidArgument> {
        check_key(key)?;

        Ok(slot::to_public(self.insert_while_rehashing(key, TOMBSTONE)))
    }
}

impl HashMap {
    fn insert_while_rehashing(&self, key: i32, value: i32) -> i32 {
        let guard = &crossbeam_epoch::pin();

        loop {
            if let Ok(previous) = self.current(guard).insert(guard, key, value) {
                return previous;
            }
        }
    }

    /// Finishes every pending migration, then returns the newest table.
    fn current<'g>(&self, guard: &'g Guard) -> &'g Table {
        loop {
            let table_ptr = self.table.load(Ordering::Acquire, guard);
            assert!(!table_ptr.is_null());

            let table_ref = unsafe { table_ptr.deref() };

            if !table_ref.migrate(guard, &self.table) {
                return table_ref;
            }
        }
    }
}

fn check_key(key: i32) -> Result<(), InvalidArgument> {
    if key > 0 {
        Ok(())
    } else {
        Err(InvalidArgument::Key(key))
    }
}

impl Default for HashMap {
    fn default() -> Self {
        HashMap::new()
    }
}

impl Debug for HashMap {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let guard = &crossbeam_epoch::pin();
        let table_ref = unsafe { self.table.load(Ordering::Acquire, guard).deref() };

        f.debug_struct("HashMap")
            .field("capacity", &table_ref.capacity())
            .field("epoch", &table_ref.epoch())
            .finish()
    }
}

impl Drop for HashMap {
    fn drop(&mut self) {
        // ensure all loads have the most recent data available
        atomic::fence(Ordering::Acquire);

        // retired tables belong to the collector; everything from the active
        // table onwards is still ours
        let guard = unsafe { crossbeam_epoch::unprotected() };

        let mut table_ptr = self.table.swap(Shared::null(), Ordering::Relaxed, guard);

        while !table_ptr.is_null() {
            let next_ptr = unsafe { table_ptr.deref() }
                .next
                .swap(Shared::null(), Ordering::Relaxed, guard);

            unsafe { drop(table_ptr.into_owned()) };

            table_ptr = next_ptr;
        }
    }
}
