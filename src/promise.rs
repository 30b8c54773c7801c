// Copyright 2026 the vega authors
// Distributed under the Boost Software License, Version 1.0. (See accompanying
// file LICENSE.txt or copy at http://www.boost.org/LICENSE_1_0.txt)

//! Single-shot promises with JavaScript settlement semantics: the first
//! resolve or reject wins, later calls are silent no-ops, and a rejection
//! only surfaces where the promise is awaited.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::scheduler::{self, Core};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromiseStatus {
    Pending,
    Fulfilled,
    Rejected,
}

pub(crate) type Continuation = Box<dyn FnOnce() + Send>;

struct Cell<T> {
    status: PromiseStatus,
    value: Option<T>,
    exception: Option<Error>,
    continuations: Vec<Continuation>,
    scheduler: Option<Weak<Core>>,
}

/// The shared fulfillment cell a [`Promise`] hands out references to.
///
/// Status is monotonic: only Pending to Fulfilled or Pending to Rejected
/// transitions happen, and the winning transition drains the continuation
/// list exactly once.
pub(crate) struct PromiseState<T> {
    cell: Mutex<Cell<T>>,
}

impl<T: Send + 'static> PromiseState<T> {
    pub(crate) fn new(scheduler: Option<Weak<Core>>) -> Arc<Self> {
        Arc::new(Self {
            cell: Mutex::new(Cell {
                status: PromiseStatus::Pending,
                value: None,
                exception: None,
                continuations: Vec::new(),
                scheduler,
            }),
        })
    }

    pub(crate) fn status(&self) -> PromiseStatus {
        self.cell.lock().status
    }

    pub(crate) fn set_scheduler(&self, scheduler: Option<Weak<Core>>) {
        self.cell.lock().scheduler = scheduler;
    }

    pub(crate) fn exception(&self) -> Option<Error> {
        self.cell.lock().exception.clone()
    }

    /// First writer wins; resolving a settled promise is a no-op.
    pub(crate) fn resolve(&self, value: T) {
        let (continuations, scheduler) = {
            let mut cell = self.cell.lock();
            if cell.status != PromiseStatus::Pending {
                return;
            }
            cell.value = Some(value);
            cell.status = PromiseStatus::Fulfilled;
            (std::mem::take(&mut cell.continuations), cell.scheduler.clone())
        };
        resume_continuations_on(scheduler, continuations);
    }

    pub(crate) fn reject(&self, exception: Error) {
        let (continuations, scheduler) = {
            let mut cell = self.cell.lock();
            if cell.status != PromiseStatus::Pending {
                return;
            }
            cell.exception = Some(exception);
            cell.status = PromiseStatus::Rejected;
            (std::mem::take(&mut cell.continuations), cell.scheduler.clone())
        };
        resume_continuations_on(scheduler, continuations);
    }

    /// Registering on a settled promise runs the continuation immediately,
    /// in the caller's context.
    pub(crate) fn add_continuation(&self, continuation: Continuation) {
        let run_now = {
            let mut cell = self.cell.lock();
            if cell.status == PromiseStatus::Pending {
                cell.continuations.push(continuation);
                None
            } else {
                Some(continuation)
            }
        };
        if let Some(continuation) = run_now {
            continuation();
        }
    }
}

impl<T: Clone + Send + 'static> PromiseState<T> {
    pub(crate) fn value(&self) -> Option<T> {
        self.cell.lock().value.clone()
    }
}

/// Routing rule for draining continuations after a settlement.
///
/// The drain goes through the owning scheduler as one regular task whenever
/// the settling thread is not that scheduler, or the scheduler wants user
/// code re-dispatched onto its workers. Otherwise the continuations run
/// inline on the settling thread.
fn resume_continuations_on(owner: Option<Weak<Core>>, continuations: Vec<Continuation>) {
    if continuations.is_empty() {
        return;
    }

    match owner.and_then(|weak| weak.upgrade()) {
        Some(core) if !core.is_current() || core.should_queue_task() => {
            core.add_task(Box::new(move || {
                for continuation in continuations {
                    continuation();
                }
            }));
        }
        _ => {
            for continuation in continuations {
                continuation();
            }
        }
    }
}

/// Type-erased view of a promise state, for the scheduler's tracked set.
pub(crate) trait Settled: Send + Sync {
    fn is_pending(&self) -> bool;
}

impl<T: Send + 'static> Settled for PromiseState<T> {
    fn is_pending(&self) -> bool {
        self.status() == PromiseStatus::Pending
    }
}

//-----------------------------------------------------------------------------

/// A shared handle to a future single-shot value or error.
///
/// Handles are cheap to clone and may outlive the computation that produced
/// them. Awaiting a promise yields `Ok(value)` or re-raises the rejection as
/// `Err`; a rejected promise that is never awaited is silently discarded.
pub struct Promise<T> {
    state: Arc<PromiseState<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self { state: self.state.clone() }
    }
}

impl<T: Send + 'static> Promise<T> {
    /// A pending promise with no owning scheduler. It settles only through
    /// [`Resolver`]/[`Rejector`] handles or never at all.
    pub fn new() -> Self {
        Self { state: PromiseState::new(None) }
    }

    pub fn resolve(value: T) -> Self {
        let p = Self::new();
        p.state.resolve(value);
        p
    }

    pub fn reject(exception: impl Into<Error>) -> Self {
        let p = Self::new();
        p.state.reject(exception.into());
        p
    }

    /// Invokes `executor` synchronously with settle handles and returns the
    /// promise regardless of whether the executor has settled it yet. The
    /// promise is owned by the scheduler current at construction time, so a
    /// settlement from a foreign thread resumes awaiters on that scheduler.
    pub fn create<F>(executor: F) -> Self
    where
        F: FnOnce(Resolver<T>, Rejector<T>),
    {
        let p = Self { state: PromiseState::new(scheduler::current_core_weak()) };
        executor(Resolver { state: p.state.clone() }, Rejector { state: p.state.clone() });
        p
    }

    pub fn status(&self) -> PromiseStatus {
        self.state.status()
    }

    pub fn is_pending(&self) -> bool {
        self.state.is_pending()
    }

    /// A derived `Promise<()>` that settles when `self` settles, dropping
    /// the value and forwarding a rejection unchanged.
    pub fn to_unit(&self) -> Promise<()> {
        let unit = Promise::<()>::new();
        let source = self.state.clone();
        let target = unit.state.clone();
        self.state.add_continuation(Box::new(move || match source.exception() {
            Some(exception) => target.reject(exception),
            None => target.resolve(()),
        }));
        unit
    }

    pub(crate) fn from_state(state: Arc<PromiseState<T>>) -> Self {
        Self { state }
    }

    pub(crate) fn state(&self) -> &Arc<PromiseState<T>> {
        &self.state
    }
}

impl<T: Send + 'static> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> Future for Promise<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut cell = self.state.cell.lock();
        match cell.status {
            PromiseStatus::Pending => {
                let waker = cx.waker().clone();
                cell.continuations.push(Box::new(move || waker.wake()));
                Poll::Pending
            }
            PromiseStatus::Fulfilled => {
                Poll::Ready(Ok(cell.value.clone().expect("fulfilled promise holds a value")))
            }
            PromiseStatus::Rejected => Poll::Ready(Err(cell
                .exception
                .clone()
                .expect("rejected promise holds an exception"))),
        }
    }
}

//-----------------------------------------------------------------------------

/// The resolve half of an executor. Clone and send it anywhere; the first
/// settlement wins.
pub struct Resolver<T> {
    state: Arc<PromiseState<T>>,
}

impl<T> Clone for Resolver<T> {
    fn clone(&self) -> Self {
        Self { state: self.state.clone() }
    }
}

impl<T: Send + 'static> Resolver<T> {
    pub fn resolve(&self, value: T) {
        self.state.resolve(value);
    }
}

/// The reject half of an executor.
pub struct Rejector<T> {
    state: Arc<PromiseState<T>>,
}

impl<T> Clone for Rejector<T> {
    fn clone(&self) -> Self {
        Self { state: self.state.clone() }
    }
}

impl<T: Send + 'static> Rejector<T> {
    pub fn reject(&self, exception: impl Into<Error>) {
        self.state.reject(exception.into());
    }
}

//-----------------------------------------------------------------------------

/// Normalization of fan-in arguments: promises pass through, callables
/// producing a promise are invoked and their promise is used. A callable
/// producing a plain value goes through [`call`].
pub trait IntoPromise {
    type Value: Send + 'static;

    fn into_promise(self) -> Promise<Self::Value>;
}

impl<T: Send + 'static> IntoPromise for Promise<T> {
    type Value = T;

    fn into_promise(self) -> Promise<T> {
        self
    }
}

impl<F, T: Send + 'static> IntoPromise for F
where
    F: FnOnce() -> Promise<T>,
{
    type Value = T;

    fn into_promise(self) -> Promise<T> {
        self()
    }
}

/// Invokes `f` synchronously and wraps its result in an already-fulfilled
/// promise.
pub fn call<T: Send + 'static>(f: impl FnOnce() -> T) -> Promise<T> {
    Promise::resolve(f())
}

//-----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn first_resolve_wins() {
        let p = Promise::resolve(1);
        p.state().resolve(2);
        p.state().reject(Error::msg("late"));

        assert_eq!(p.status(), PromiseStatus::Fulfilled);
        assert_eq!(p.state().value(), Some(1));
        assert_eq!(p.state().exception(), None);
    }

    #[test]
    fn first_reject_wins() {
        let p = Promise::<i32>::reject("boom");
        p.state().resolve(7);

        assert_eq!(p.status(), PromiseStatus::Rejected);
        assert_eq!(p.state().exception(), Some(Error::msg("boom")));
        assert_eq!(p.state().value(), None);
    }

    #[test]
    fn continuations_run_exactly_once_after_settlement() {
        let p = Promise::<i32>::new();
        let hits = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let hits = hits.clone();
            p.state().add_continuation(Box::new(move || {
                hits.fetch_add(1, Ordering::SeqCst);
            }));
        }
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        p.state().resolve(5);
        assert_eq!(hits.load(Ordering::SeqCst), 3);

        // A settled promise runs new continuations immediately and a second
        // settlement must not re-run the drained ones.
        p.state().resolve(6);
        let hits2 = hits.clone();
        p.state().add_continuation(Box::new(move || {
            hits2.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(hits.load(Ordering::SeqCst), 4);
        assert_eq!(p.state().value(), Some(5));
    }

    #[test]
    fn create_runs_executor_synchronously() {
        let mut ran = false;
        let p = Promise::<i32>::create(|resolve, _reject| {
            ran = true;
            resolve.resolve(42);
        });
        assert!(ran);
        assert_eq!(p.state().value(), Some(42));
    }

    #[test]
    fn rejector_after_resolver_is_ignored() {
        let p = Promise::<()>::create(|resolve, reject| {
            resolve.resolve(());
            reject.reject("too late");
        });
        assert_eq!(p.status(), PromiseStatus::Fulfilled);
    }

    #[test]
    fn to_unit_forwards_rejection() {
        let unit = Promise::<i32>::reject("nope").to_unit();
        assert_eq!(unit.status(), PromiseStatus::Rejected);
        assert_eq!(unit.state().exception(), Some(Error::msg("nope")));

        let unit = Promise::resolve(3).to_unit();
        assert_eq!(unit.status(), PromiseStatus::Fulfilled);
    }

    #[test]
    fn into_promise_normalizes_callables() {
        let p = (|| Promise::resolve(9)).into_promise();
        assert_eq!(p.state().value(), Some(9));

        let p = call(|| "hi".to_string());
        assert_eq!(p.state().value(), Some("hi".to_string()));
    }
}
