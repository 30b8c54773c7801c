// Copyright 2026 the vega authors
// Distributed under the Boost Software License, Version 1.0. (See accompanying
// file LICENSE.txt or copy at http://www.boost.org/LICENSE_1_0.txt)

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use vega::{Promise, Scheduler, SchedulerHandle};

const TASK_DURATION: Duration = Duration::from_millis(500);
const N_TASKS: usize = 8;
const N_WORKERS: usize = 4;

fn cpu_task(
    current: &SchedulerHandle,
    task_id: i32,
    threads: Arc<Mutex<HashSet<ThreadId>>>,
    completed: Arc<AtomicUsize>,
) -> Promise<i32> {
    let hop = current.delay(Duration::ZERO);
    current.spawn(async move {
        // Yield once so the task is dispatched onto a worker.
        hop.await?;

        threads.lock().unwrap().insert(thread::current().id());
        thread::sleep(TASK_DURATION);
        completed.fetch_add(1, Ordering::SeqCst);
        Ok(task_id)
    })
}

#[test]
fn worker_pool_overlaps_independent_tasks() {
    let scheduler = Scheduler::new(N_WORKERS);
    let threads = Arc::new(Mutex::new(HashSet::new()));
    let completed = Arc::new(AtomicUsize::new(0));
    let started = Instant::now();

    let threads2 = threads.clone();
    let completed2 = completed.clone();
    scheduler.run_blocking(move || async move {
        let current = Scheduler::current().expect("inside run_blocking");

        let tasks: Vec<Promise<i32>> = (0..N_TASKS as i32)
            .map(|id| cpu_task(&current, id, threads2.clone(), completed2.clone()))
            .collect();

        for (id, task) in tasks.into_iter().enumerate() {
            assert_eq!(task.await?, id as i32);
        }
        Ok(())
    });

    let elapsed = started.elapsed();
    assert_eq!(completed.load(Ordering::SeqCst), N_TASKS);

    // Eight half-second tasks over four workers fit in two waves; one extra
    // wave of slack for dispatch latency.
    let deadline = TASK_DURATION * (N_TASKS / N_WORKERS + 1) as u32;
    assert!(elapsed <= deadline, "tasks did not run in parallel: {elapsed:?} > {deadline:?}");

    let distinct = threads.lock().unwrap().len();
    assert!(distinct > 1, "expected more than one worker thread, saw {distinct}");
}

#[test]
fn dropping_the_scheduler_joins_its_workers() {
    let scheduler = Scheduler::new(2);
    let hits = Arc::new(AtomicUsize::new(0));

    let h = hits.clone();
    scheduler.run_blocking(move || async move {
        let current = Scheduler::current().expect("inside run_blocking");
        let h2 = h.clone();
        current
            .spawn(async move {
                h2.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await?;
        Ok(())
    });

    drop(scheduler);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}
