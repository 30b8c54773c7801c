// Copyright 2026 the vega authors
// Distributed under the Boost Software License, Version 1.0. (See accompanying
// file LICENSE.txt or copy at http://www.boost.org/LICENSE_1_0.txt)

//! vega is an asynchronous runtime built around JavaScript-style promises:
//! cooperatively scheduled coroutines settle shared single-shot cells, a
//! scheduler with an optional worker pool drains the resulting task graph,
//! and on Linux a thread-local io_uring pump feeds completions back into
//! promises keyed by monotonic tickets.
//!
//! ```no_run
//! use std::time::Duration;
//!
//! let scheduler = vega::Scheduler::new(0);
//! scheduler.run_blocking(|| {
//!     let delayed = vega::Scheduler::current().expect("entered").delay(Duration::from_millis(10));
//!     async move {
//!         delayed.await?;
//!         Ok(())
//!     }
//! });
//! ```

#![warn(clippy::pedantic)]
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions
)]

pub mod error;
pub mod io;
pub mod promise;
mod promise_all;
pub mod scheduler;
mod sync;
#[cfg(target_os = "linux")]
pub mod uring;

pub use error::{Error, Result};
pub use promise::{call, IntoPromise, Promise, PromiseStatus, Rejector, Resolver};
pub use promise_all::{promise_all, promise_all_void};
pub use scheduler::{Scheduler, SchedulerHandle};
