// Copyright 2026 the vega authors
// Distributed under the Boost Software License, Version 1.0. (See accompanying
// file LICENSE.txt or copy at http://www.boost.org/LICENSE_1_0.txt)

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use vega::{Promise, Scheduler};

const PENDING: u8 = 0;
const SUBMITTED: u8 = 1;
const FINISHED: u8 = 2;

// A coroutine awaiting a promise that nobody will ever settle keeps its
// scheduler draining forever, while a scheduler with settleable work runs to
// completion.
#[test]
fn never_settled_promise_blocks_run_blocking() {
    let fluent_status = Arc::new(AtomicU8::new(PENDING));
    let blocked_status = Arc::new(AtomicU8::new(PENDING));

    let fluent = {
        let status = fluent_status.clone();
        thread::spawn(move || {
            status.store(SUBMITTED, Ordering::SeqCst);
            Scheduler::get().run_blocking(|| async {
                Promise::<()>::resolve(()).await?;
                let _pending = Promise::<()>::new();
                Scheduler::current()
                    .expect("inside run_blocking")
                    .delay(Duration::from_millis(200))
                    .await?;
                Ok(())
            });
            status.store(FINISHED, Ordering::SeqCst);
        })
    };

    let _blocked = {
        let status = blocked_status.clone();
        thread::spawn(move || {
            status.store(SUBMITTED, Ordering::SeqCst);
            Scheduler::new(0).run_blocking(|| async {
                Promise::<()>::new().await?;
                Ok(())
            });
            status.store(FINISHED, Ordering::SeqCst);
        })
    };

    thread::sleep(Duration::from_millis(600));

    assert_eq!(fluent_status.load(Ordering::SeqCst), FINISHED);
    assert_eq!(blocked_status.load(Ordering::SeqCst), SUBMITTED);

    fluent.join().expect("fluent thread");
    // The blocked thread never exits its drain loop; it is left running and
    // dies with the process.
}
