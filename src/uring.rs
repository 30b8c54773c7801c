// Copyright 2026 the vega authors
// Distributed under the Boost Software License, Version 1.0. (See accompanying
// file LICENSE.txt or copy at http://www.boost.org/LICENSE_1_0.txt)

//! Thread-local io_uring pump.
//!
//! Every thread that performs async I/O lazily owns one ring. Each submitted
//! entry is stamped with a monotonic ticket in `user_data`; completions are
//! matched back to waiting promises by that ticket. A completion whose waiter
//! has not arrived yet is parked as an orphan, and a waiter whose completion
//! has not arrived yet is parked in the waiter map. The ring is never touched
//! from another thread.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};

use io_uring::{squeue, IoUring};
use log::{debug, trace};
use nix::errno::Errno;

use crate::error::{Error, Result};
use crate::promise::Promise;
use crate::scheduler::Scheduler;

/// Submission queue depth of each per-thread ring.
pub const QUEUE_DEPTH: u32 = 16;

/// Snapshot of a kernel completion. `res < 0` carries `-errno`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompleteQueueEntry {
    pub res: i32,
    pub flags: u32,
}

struct Ring {
    ring: IoUring,
    /// Completed but not yet waited on.
    orphan_cqes: HashMap<u64, CompleteQueueEntry>,
    /// Waited on but not yet completed.
    waiting_sqes: HashMap<u64, Promise<CompleteQueueEntry>>,
    /// Submissions parked while the submission queue was full, with their
    /// already-assigned tickets.
    backlog: VecDeque<(squeue::Entry, u64, Promise<u64>)>,
}

thread_local! {
    static RING: RefCell<Option<Ring>> = const { RefCell::new(None) };
    static NEXT_TICKET: Cell<u64> = const { Cell::new(5_000_001) };
}

fn next_ticket() -> u64 {
    NEXT_TICKET.with(|ticket| {
        let value = ticket.get();
        ticket.set(value + 1);
        value
    })
}

/// Runs `f` against this thread's ring, constructing the ring on first use.
///
/// The thread-local slot stays borrowed for the duration of `f`, so `f` must
/// not settle promises (settling may run continuations that re-enter this
/// module). Callers stage settlements and perform them after returning.
fn with_ring<R>(f: impl FnOnce(&mut Ring) -> R) -> Result<R> {
    RING.with(|slot| {
        let mut slot = slot.borrow_mut();
        if slot.is_none() {
            let ring = IoUring::new(QUEUE_DEPTH).map_err(|e| {
                Error::RingInit(Errno::from_raw(e.raw_os_error().unwrap_or(0)))
            })?;
            debug!("io_uring ready on {:?}, depth {QUEUE_DEPTH}", std::thread::current().id());
            *slot = Some(Ring {
                ring,
                orphan_cqes: HashMap::new(),
                waiting_sqes: HashMap::new(),
                backlog: VecDeque::new(),
            });
        }
        Ok(f(slot.as_mut().expect("ring initialized above")))
    })
}

/// Whether this thread can obtain a ring at all.
pub fn is_available() -> bool {
    with_ring(|_| ()).is_ok()
}

enum PushOutcome {
    Granted(u64),
    Parked(Promise<u64>),
}

/// Queues `entry` for submission and promises the ticket it was stamped
/// with. The fast path pushes into the submission queue immediately; when
/// the queue is full the entry is parked and pushed by a later [`poll`],
/// once a submit has freed a slot.
///
/// Any buffer the entry points into must stay valid until the matching
/// completion is reaped. The I/O backends uphold this by holding the buffer
/// borrow across the await on [`wait`].
pub fn push(entry: squeue::Entry) -> Promise<u64> {
    let outcome = with_ring(|ring| {
        let ticket = next_ticket();
        let entry = entry.user_data(ticket);
        match unsafe { ring.ring.submission().push(&entry) } {
            Ok(()) => PushOutcome::Granted(ticket),
            Err(_) => {
                trace!("submission queue full, parking ticket {ticket}");
                let promise = Promise::new();
                ring.backlog.push_back((entry, ticket, promise.clone()));
                PushOutcome::Parked(promise)
            }
        }
    });

    match outcome {
        Ok(PushOutcome::Granted(ticket)) => Promise::resolve(ticket),
        Ok(PushOutcome::Parked(promise)) => promise,
        Err(e) => Promise::reject(e),
    }
}

/// Submits all pushed entries to the kernel.
pub fn submit() -> Result<usize> {
    with_ring(|ring| {
        ring.ring.submit().map_err(|e| Error::Io {
            op: "io_uring_submit",
            errno: Errno::from_raw(e.raw_os_error().unwrap_or(0)),
        })
    })?
}

enum WaitOutcome {
    Orphan(CompleteQueueEntry),
    Existing(Promise<CompleteQueueEntry>),
    Fresh(Promise<CompleteQueueEntry>),
}

/// A promise for the completion stamped with `ticket`.
///
/// If the completion already arrived, its orphaned snapshot resolves the
/// promise immediately; waiting twice on one ticket returns the same
/// promise. A fresh waiter is tracked on the current scheduler so the drain
/// loop stays alive until the kernel answers.
pub fn wait(ticket: u64) -> Promise<CompleteQueueEntry> {
    let outcome = with_ring(|ring| {
        if let Some(cqe) = ring.orphan_cqes.remove(&ticket) {
            return WaitOutcome::Orphan(cqe);
        }
        if let Some(promise) = ring.waiting_sqes.get(&ticket) {
            return WaitOutcome::Existing(promise.clone());
        }
        let promise = Promise::new();
        ring.waiting_sqes.insert(ticket, promise.clone());
        WaitOutcome::Fresh(promise)
    });

    match outcome {
        Ok(WaitOutcome::Orphan(cqe)) => Promise::resolve(cqe),
        Ok(WaitOutcome::Existing(promise)) => promise,
        Ok(WaitOutcome::Fresh(promise)) => {
            if let Some(current) = Scheduler::current() {
                current.track(&promise);
            }
            promise
        }
        Err(e) => Promise::reject(e),
    }
}

/// Registers the waiter for `ticket` first, then submits. The completion
/// cannot be observed before the next [`poll`] either way, but registering
/// first means the waiter map is complete when it is.
pub fn submit_and_wait(ticket: u64) -> Promise<CompleteQueueEntry> {
    let promise = wait(ticket);
    if let Err(e) = submit() {
        return Promise::reject(e);
    }
    promise
}

/// Drains every ready completion, non-blocking. Returns the number of
/// completions reaped.
///
/// Waiter promises are resolved only after the completion queue and the
/// parked-submission backlog have been fully processed, so continuations
/// that re-enter [`wait`] or [`push`] see consistent maps.
pub fn poll() -> usize {
    let Ok((reaped, granted, completed)) = with_ring(|ring| {
        let mut completed: Vec<(CompleteQueueEntry, Promise<CompleteQueueEntry>)> = Vec::new();
        let mut reaped = 0;

        {
            let mut cq = ring.ring.completion();
            cq.sync();
            for cqe in &mut cq {
                let snapshot = CompleteQueueEntry { res: cqe.result(), flags: cqe.flags() };
                let ticket = cqe.user_data();
                match ring.waiting_sqes.remove(&ticket) {
                    Some(promise) => completed.push((snapshot, promise)),
                    None => {
                        ring.orphan_cqes.insert(ticket, snapshot);
                    }
                }
                reaped += 1;
            }
        }

        // Submitted entries have left the submission queue by now, so parked
        // entries can take the freed slots.
        let mut granted: Vec<(u64, Promise<u64>)> = Vec::new();
        while let Some((entry, ticket, promise)) = ring.backlog.pop_front() {
            match unsafe { ring.ring.submission().push(&entry) } {
                Ok(()) => granted.push((ticket, promise)),
                Err(_) => {
                    ring.backlog.push_front((entry, ticket, promise));
                    break;
                }
            }
        }

        (reaped, granted, completed)
    }) else {
        return 0;
    };

    for (ticket, promise) in granted {
        promise.state().resolve(ticket);
    }
    for (cqe, promise) in completed {
        promise.state().resolve(cqe);
    }

    reaped
}

/// [`poll`], but only when this thread already owns a ring. Drain and worker
/// loops call this so threads that never touched the pump stay ring-free.
pub fn poll_ready() -> usize {
    let initialized = RING.with(|slot| slot.borrow().is_some());
    if initialized {
        poll()
    } else {
        0
    }
}

/// Pushes, submits, and waits out one entry.
pub async fn run(entry: squeue::Entry) -> Result<CompleteQueueEntry> {
    let ticket = push(entry).await?;
    submit_and_wait(ticket).await
}

/// [`run`], reduced to the raw completion result. Negative results are
/// passed through for the caller to classify.
pub async fn run_res(entry: squeue::Entry) -> Result<i32> {
    let cqe = run(entry).await?;
    Ok(cqe.res)
}

#[cfg(test)]
mod tests {
    use io_uring::opcode;

    use super::*;
    use crate::scheduler::Scheduler;

    #[test]
    fn tickets_are_unique_and_monotonic() {
        let a = next_ticket();
        let b = next_ticket();
        assert!(b > a);
    }

    #[test]
    fn wait_before_completion_resolves_on_poll() {
        let scheduler = Scheduler::new(0);
        scheduler.run_blocking(|| async {
            let cqe = run(opcode::Nop::new().build()).await?;
            assert_eq!(cqe.res, 0);
            Ok(())
        });
    }

    #[test]
    fn completion_before_wait_is_orphaned_then_claimed() {
        let scheduler = Scheduler::new(0);
        scheduler.run_blocking(|| async {
            let ticket = push(opcode::Nop::new().build()).await?;
            submit()?;

            // Reap the completion before anyone waits on it.
            let mut reaped = poll();
            while reaped == 0 {
                std::thread::sleep(std::time::Duration::from_micros(100));
                reaped = poll();
            }

            // The first wait resolves immediately from the orphan map.
            let cqe = wait(ticket).await?;
            assert_eq!(cqe.res, 0);
            Ok(())
        });
    }

    #[test]
    fn waiting_twice_returns_the_same_promise() {
        let scheduler = Scheduler::new(0);
        scheduler.run_blocking(|| async {
            let ticket = push(opcode::Nop::new().build()).await?;
            let first = wait(ticket);
            let second = wait(ticket);
            submit()?;

            let a = first.await?;
            let b = second.await?;
            assert_eq!(a, b);
            Ok(())
        });
    }

    #[test]
    fn full_queue_parks_and_later_grants_submissions() {
        let scheduler = Scheduler::new(0);
        scheduler.run_blocking(|| async {
            // One more than the queue depth: the last push must take the
            // parked path and still complete.
            let mut tickets = Vec::new();
            for _ in 0..=QUEUE_DEPTH {
                tickets.push(push(opcode::Nop::new().build()));
            }

            for (i, ticket) in tickets.into_iter().enumerate() {
                let ticket = ticket.await?;
                let cqe = submit_and_wait(ticket).await?;
                assert_eq!(cqe.res, 0, "nop {i} failed");
            }
            Ok(())
        });
    }
}
