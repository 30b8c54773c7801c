// Copyright 2026 the vega authors
// Distributed under the Boost Software License, Version 1.0. (See accompanying
// file LICENSE.txt or copy at http://www.boost.org/LICENSE_1_0.txt)

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

/// A value behind its own mutex. The lock is scoped to the closure and is
/// never held across user callbacks.
pub(crate) struct Synchronized<T> {
    inner: Mutex<T>,
}

impl<T> Synchronized<T> {
    pub fn new(value: T) -> Self {
        Self { inner: Mutex::new(value) }
    }

    pub fn with_lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.inner.lock())
    }
}

/// Counting semaphore for worker wake-up. Workers only ever try-acquire and
/// fall back to a short sleep, so no parking is needed.
pub(crate) struct Semaphore {
    permits: AtomicUsize,
}

impl Semaphore {
    pub fn new() -> Self {
        Self { permits: AtomicUsize::new(0) }
    }

    pub fn release(&self, n: usize) {
        self.permits.fetch_add(n, Ordering::AcqRel);
    }

    pub fn try_acquire(&self) -> bool {
        self.permits
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }
}
