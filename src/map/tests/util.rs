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

use std::{
    sync::{Arc, Barrier},
    thread,
};

pub(crate) fn init_logger() {
    env_logger::builder().is_test(true).try_init().ok();
}

/// Spawns `num_threads` threads that start `f` at the same time, then joins
/// them and returns their results in spawn order.
pub(crate) fn run_concurrently<F, T>(num_threads: usize, f: F) -> Vec<T>
where
    F: Fn(usize) -> T + Send + Sync + 'static,
    T: Send + 'static,
{
    let f = Arc::new(f);
    let barrier = Arc::new(Barrier::new(num_threads));

    let threads: Vec<_> = (0..num_threads)
        .map(|i| {
            let f = f.clone();
            let barrier = barrier.clone();

            thread::spawn(move || {
                barrier.wait();

                f(i)
            })
        })
        .collect();

    threads
        .into_iter()
        .map(|t| t.join().expect("worker thread panicked"))
        .collect()
}
