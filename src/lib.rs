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

//! Lockfree resizeable concurrent hash map for `i32` keys and values.
//!
//! [`HashMap`] supports fully concurrent lookups, insertions and removals. It
//! grows by linking a table of twice the capacity behind the current one and
//! having every thread that touches the map help move entries over.
//!
//! ```
//! use cht_int::HashMap;
//!
//! let map = HashMap::new();
//!
//! assert_eq!(map.put(1, 10), Ok(0));
//! assert_eq!(map.put(1, 11), Ok(10));
//! assert_eq!(map.get(1), Ok(11));
//! assert_eq!(map.remove(1), Ok(11));
//! assert_eq!(map.get(1), Ok(0));
//! assert!(map.put(0, 1).is_err());
//! ```

pub mod map;

pub use map::{HashMap, InvalidArgument};
