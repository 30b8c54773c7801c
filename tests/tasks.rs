// Copyright 2026 the vega authors
// Distributed under the Boost Software License, Version 1.0. (See accompanying
// file LICENSE.txt or copy at http://www.boost.org/LICENSE_1_0.txt)

use std::sync::{Arc, Mutex};

use vega::Scheduler;

// Regular tasks on a single-threaded scheduler run in submission order.
#[test]
fn regular_tasks_are_fifo() {
    let scheduler = Scheduler::new(0);
    let order = Arc::new(Mutex::new(Vec::new()));

    for i in 0..50 {
        let order = order.clone();
        scheduler.add_task(move || order.lock().unwrap().push(i));
    }

    scheduler.run_blocking_fn(|| {});

    let order = order.lock().unwrap();
    assert_eq!(*order, (0..50).collect::<Vec<_>>());
}

// A task enqueued from inside another task still runs before the drain loop
// exits.
#[test]
fn tasks_can_enqueue_more_tasks() {
    let scheduler = Scheduler::new(0);
    let order = Arc::new(Mutex::new(Vec::new()));

    let o = order.clone();
    scheduler.run_blocking_fn(move || {
        o.lock().unwrap().push("outer");

        let current = Scheduler::current().expect("inside run_blocking_fn");
        let o2 = o.clone();
        current.add_task(move || o2.lock().unwrap().push("inner"));
    });

    assert_eq!(*order.lock().unwrap(), vec!["outer", "inner"]);
}
