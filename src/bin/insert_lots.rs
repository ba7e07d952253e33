use cht_int::HashMap;

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

fn main() {
    const NUM_THREADS: usize = 64;
    const KEYS_PER_THREAD: i32 = 1024;

    let keep_running = Arc::new(AtomicBool::new(true));
    let map = Arc::new(HashMap::new());
    let threads: Vec<_> = (0..NUM_THREADS)
        .map(|i| {
            let keep_running = keep_running.clone();
            let map = map.clone();

            thread::spawn(move || {
                let base = i as i32 * KEYS_PER_THREAD;
                let mut round = 0;

                while keep_running.load(Ordering::Relaxed) {
                    round = round % 1024 + 1;

                    for key in base + 1..=base + KEYS_PER_THREAD {
                        assert_eq!(map.put(key, round), Ok(0));
                        assert_eq!(map.get(key), Ok(round));
                        assert_eq!(map.remove(key), Ok(round));
                    }

                    // a shared, contended key
                    map.put(i32::MAX - 1, round).ok();
                }
            })
        })
        .collect();

    thread::sleep(Duration::from_secs(5));
    keep_running.store(false, Ordering::Relaxed);

    let results = threads.into_iter().map(|t| t.join());

    for result in results.into_iter() {
        assert!(result.is_ok());
    }

    println!("{:?}", map);
}
