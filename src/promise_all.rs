// Copyright 2026 the vega authors
// Distributed under the Boost Software License, Version 1.0. (See accompanying
// file LICENSE.txt or copy at http://www.boost.org/LICENSE_1_0.txt)

//! Fan-in combinators. All inputs run concurrently; the result preserves
//! input order and the first rejection observed wins.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::promise::{IntoPromise, Promise};
use crate::scheduler;

struct FanIn<T> {
    remaining: AtomicUsize,
    rejected: AtomicBool,
    values: Mutex<Vec<Option<T>>>,
}

/// Waits for every input and fulfills with their values in input order.
///
/// Inputs are normalized through [`IntoPromise`], so an iterator of promises
/// or of promise-producing closures both work; wrap value-producing closures
/// with [`call`](crate::call). If any input rejects, the result rejects with
/// the error of the first input observed to reject and the remaining
/// rejections are dropped. The result settles no earlier than the last
/// input needed for the outcome.
pub fn promise_all<I, T>(inputs: I) -> Promise<Vec<T>>
where
    I: IntoIterator,
    I::Item: IntoPromise<Value = T>,
    T: Clone + Send + 'static,
{
    let inputs: Vec<Promise<T>> =
        inputs.into_iter().map(IntoPromise::into_promise).collect();

    let result = Promise::<Vec<T>>::new();
    result.state().set_scheduler(scheduler::current_core_weak());

    let n = inputs.len();
    if n == 0 {
        result.state().resolve(Vec::new());
        return result;
    }

    let fan_in = Arc::new(FanIn {
        remaining: AtomicUsize::new(n),
        rejected: AtomicBool::new(false),
        values: Mutex::new((0..n).map(|_| None).collect()),
    });

    for (index, input) in inputs.into_iter().enumerate() {
        let input_state = input.state().clone();
        let fan_in = fan_in.clone();
        let result_state = result.state().clone();

        input.state().add_continuation(Box::new(move || {
            if let Some(exception) = input_state.exception() {
                // Only the first rejection settles the result.
                if fan_in
                    .rejected
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    result_state.reject(exception);
                }
                return;
            }

            if fan_in.rejected.load(Ordering::Relaxed) {
                return;
            }

            fan_in.values.lock()[index] = input_state.value();

            // fetch_sub returns the pre-decrement count, so 1 means this
            // input was the last one out.
            if fan_in.remaining.fetch_sub(1, Ordering::SeqCst) == 1
                && !fan_in.rejected.load(Ordering::SeqCst)
            {
                let values = std::mem::take(&mut *fan_in.values.lock());
                let values = values
                    .into_iter()
                    .map(|slot| slot.expect("every input has resolved"))
                    .collect();
                result_state.resolve(values);
            }
        }));
    }

    result
}

/// The value-less fan-in: fulfills with `()` once every input has fulfilled,
/// rejecting with the first rejection otherwise. This is the landing spot
/// for inputs of mixed value types, erased through
/// [`Promise::to_unit`].
pub fn promise_all_void<I>(inputs: I) -> Promise<()>
where
    I: IntoIterator<Item = Promise<()>>,
{
    let inputs: Vec<Promise<()>> = inputs.into_iter().collect();

    let result = Promise::<()>::new();
    result.state().set_scheduler(scheduler::current_core_weak());

    let n = inputs.len();
    if n == 0 {
        result.state().resolve(());
        return result;
    }

    let remaining = Arc::new(AtomicUsize::new(n));
    let rejected = Arc::new(AtomicBool::new(false));

    for input in inputs {
        let input_state = input.state().clone();
        let remaining = remaining.clone();
        let rejected = rejected.clone();
        let result_state = result.state().clone();

        input.state().add_continuation(Box::new(move || {
            if let Some(exception) = input_state.exception() {
                if rejected
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    result_state.reject(exception);
                }
                return;
            }

            if rejected.load(Ordering::Relaxed) {
                return;
            }

            if remaining.fetch_sub(1, Ordering::SeqCst) == 1 && !rejected.load(Ordering::SeqCst) {
                result_state.resolve(());
            }
        }));
    }

    result
}

/// Variadic fan-in over promises of arbitrary value types, producing a
/// `Promise<()>`. Arguments are normalized through
/// [`IntoPromise`](crate::IntoPromise) and erased with
/// [`Promise::to_unit`](crate::Promise::to_unit).
#[macro_export]
macro_rules! promise_all_void {
    () => {
        $crate::promise_all_void(::std::vec::Vec::new())
    };
    ($($input:expr),+ $(,)?) => {
        $crate::promise_all_void(::std::vec![
            $( $crate::IntoPromise::into_promise($input).to_unit() ),+
        ])
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::promise::{call, PromiseStatus};

    #[test]
    fn resolves_in_input_order() {
        // Pre-settled inputs settle the fan-in synchronously.
        let result = promise_all(vec![
            Promise::resolve(1),
            Promise::resolve(2),
            Promise::resolve(3),
        ]);
        assert_eq!(result.state().value(), Some(vec![1, 2, 3]));
    }

    #[test]
    fn out_of_order_completion_keeps_input_order() {
        let first = Promise::<i32>::new();
        let second = Promise::<i32>::new();

        let result = promise_all(vec![first.clone(), second.clone()]);
        assert!(result.is_pending());

        second.state().resolve(20);
        assert!(result.is_pending());
        first.state().resolve(10);

        assert_eq!(result.state().value(), Some(vec![10, 20]));
    }

    #[test]
    fn first_rejection_wins() {
        let ok = Promise::<i32>::new();
        let bad = Promise::<i32>::new();
        let worse = Promise::<i32>::new();

        let result = promise_all(vec![ok.clone(), bad.clone(), worse.clone()]);

        bad.state().reject(Error::msg("first"));
        worse.state().reject(Error::msg("second"));
        ok.state().resolve(1);

        assert_eq!(result.status(), PromiseStatus::Rejected);
        assert_eq!(result.state().exception(), Some(Error::msg("first")));
    }

    #[test]
    fn empty_input_resolves_immediately() {
        let result = promise_all(Vec::<Promise<i32>>::new());
        assert_eq!(result.state().value(), Some(Vec::new()));

        let void = promise_all_void!();
        assert_eq!(void.status(), PromiseStatus::Fulfilled);
    }

    #[test]
    fn callables_are_normalized() {
        let deferred = |v: i32| move || Promise::resolve(v);
        let result = promise_all(vec![deferred(10), deferred(20)]);
        assert_eq!(result.state().value(), Some(vec![10, 20]));

        let result = promise_all(vec![call(|| 5), call(|| 15)]);
        assert_eq!(result.state().value(), Some(vec![5, 15]));
    }

    #[test]
    fn mixed_types_collapse_to_void() {
        let result = promise_all_void!(Promise::resolve(42), Promise::resolve(3.14));
        assert_eq!(result.status(), PromiseStatus::Fulfilled);
    }

    #[test]
    fn void_variant_propagates_rejection() {
        let result = promise_all_void!(
            Promise::resolve(1),
            Promise::<i32>::reject("Test error"),
            Promise::resolve(3),
        );
        assert_eq!(result.state().exception(), Some(Error::msg("Test error")));
    }
}
