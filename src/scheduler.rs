// Copyright 2026 the vega authors
// Distributed under the Boost Software License, Version 1.0. (See accompanying
// file LICENSE.txt or copy at http://www.boost.org/LICENSE_1_0.txt)

//! Cooperative task dispatcher: a regular FIFO, a delayed-task heap, a set of
//! tracked top-level promises, and an optional pool of worker threads all
//! draining the same queues. A scheduler's drain loop exits once no queue,
//! tracked promise, or running worker can produce more work.

use std::cell::{Cell as TlsCell, RefCell};
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::task::{Context, Poll, Wake, Waker};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, trace};
use parking_lot::Mutex;

use crate::error::Result;
use crate::promise::{Promise, PromiseState, Settled};
use crate::sync::{Semaphore, Synchronized};

pub(crate) type Task = Box<dyn FnOnce() + Send>;

/// Main-thread backoff when a drain pass made no progress.
const IDLE_BACKOFF: Duration = Duration::from_micros(100);

/// Worker backoff when neither a permit nor io_uring work showed up.
const WORKER_BACKOFF: Duration = Duration::from_millis(5);

thread_local! {
    /// Save/restore stack of schedulers entered on this thread.
    static CURRENT: RefCell<Vec<Weak<Core>>> = const { RefCell::new(Vec::new()) };

    /// Id of the scheduler this thread serves as a worker, 0 if none.
    static WORKER_OF: TlsCell<u64> = const { TlsCell::new(0) };
}

static NEXT_SCHEDULER_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn current_core_weak() -> Option<Weak<Core>> {
    CURRENT.with(|stack| stack.borrow().last().cloned())
}

fn current_core() -> Option<Arc<Core>> {
    current_core_weak().and_then(|weak| weak.upgrade())
}

fn poll_io() -> usize {
    #[cfg(target_os = "linux")]
    {
        crate::uring::poll_ready()
    }
    #[cfg(not(target_os = "linux"))]
    {
        0
    }
}

//-----------------------------------------------------------------------------

struct DelayedTask {
    state: Arc<PromiseState<()>>,
    resolve_time: Instant,
    seq: u64,
}

impl DelayedTask {
    /// Heap order: earliest deadline first, insertion order within a tie.
    fn key(&self) -> (Instant, u64) {
        (self.resolve_time, self.seq)
    }
}

impl PartialEq for DelayedTask {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for DelayedTask {}

impl PartialOrd for DelayedTask {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedTask {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // BinaryHeap is a max-heap, so compare reversed.
        other.key().cmp(&self.key())
    }
}

//-----------------------------------------------------------------------------

pub(crate) struct Core {
    id: u64,
    regular_tasks: Synchronized<VecDeque<Task>>,
    delayed_tasks: Synchronized<BinaryHeap<DelayedTask>>,
    tracked_promises: Synchronized<Vec<Arc<dyn Settled>>>,
    delay_seq: AtomicU64,
    workers_started: AtomicBool,
    stop_workers: AtomicBool,
    active_workers: AtomicUsize,
    task_sem: Semaphore,
}

impl Core {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_SCHEDULER_ID.fetch_add(1, Ordering::Relaxed),
            regular_tasks: Synchronized::new(VecDeque::new()),
            delayed_tasks: Synchronized::new(BinaryHeap::new()),
            tracked_promises: Synchronized::new(Vec::new()),
            delay_seq: AtomicU64::new(0),
            workers_started: AtomicBool::new(false),
            stop_workers: AtomicBool::new(false),
            active_workers: AtomicUsize::new(0),
            task_sem: Semaphore::new(),
        })
    }

    pub(crate) fn is_current(self: &Arc<Self>) -> bool {
        current_core().is_some_and(|core| Arc::ptr_eq(&core, self))
    }

    /// True when completions arriving on a non-worker thread must be
    /// re-dispatched so that user code re-enters on a worker.
    pub(crate) fn should_queue_task(&self) -> bool {
        self.workers_started.load(Ordering::Acquire) && WORKER_OF.with(TlsCell::get) != self.id
    }

    pub(crate) fn add_task(&self, task: Task) {
        self.regular_tasks.with_lock(|queue| queue.push_back(task));
        if self.workers_started.load(Ordering::Acquire) {
            self.task_sem.release(1);
        }
    }

    fn track_state(&self, state: Arc<dyn Settled>) {
        self.tracked_promises.with_lock(|tracked| tracked.push(state));
    }

    fn has_pending_tasks(&self) -> bool {
        self.regular_tasks.with_lock(|queue| !queue.is_empty())
            || self.delayed_tasks.with_lock(|heap| !heap.is_empty())
            || self.tracked_promises.with_lock(|tracked| !tracked.is_empty())
            || self.active_workers.load(Ordering::Acquire) > 0
    }

    /// Pops and resolves every delayed task whose deadline has passed.
    /// Resolution happens outside the heap lock.
    fn dispatch_delayed_tasks(&self) -> usize {
        let now = Instant::now();
        let mut fired = 0;
        loop {
            let ready = self.delayed_tasks.with_lock(|heap| {
                if heap.peek().is_some_and(|task| task.resolve_time <= now) {
                    heap.pop()
                } else {
                    None
                }
            });
            match ready {
                Some(task) => {
                    task.state.resolve(());
                    fired += 1;
                }
                None => return fired,
            }
        }
    }

    fn dispatch_regular_tasks(&self) -> usize {
        let mut dispatched = 0;
        while let Some(task) = self.regular_tasks.with_lock(VecDeque::pop_front) {
            task();
            dispatched += 1;
        }
        dispatched
    }

    fn remove_completed_tracked_promises(&self) -> usize {
        self.tracked_promises.with_lock(|tracked| {
            let before = tracked.len();
            tracked.retain(|state| state.is_pending());
            before - tracked.len()
        })
    }

    fn drain(&self) {
        while self.has_pending_tasks() {
            let mut dispatched = self.dispatch_delayed_tasks();
            if !self.workers_started.load(Ordering::Acquire) {
                dispatched += self.dispatch_regular_tasks();
            }
            dispatched += poll_io();

            let removed = self.remove_completed_tracked_promises();
            if dispatched == 0 && removed == 0 {
                thread::sleep(IDLE_BACKOFF);
            }
        }
    }
}

//-----------------------------------------------------------------------------

/// Marks a worker as mid-task so the drain loop cannot observe quiescence
/// while a task that may enqueue more work is still running. The decrement
/// lives in `Drop` so the count stays accurate if the task panics.
struct ActiveWorker<'a> {
    core: &'a Core,
}

impl<'a> ActiveWorker<'a> {
    fn enter(core: &'a Core) -> Self {
        core.active_workers.fetch_add(1, Ordering::AcqRel);
        Self { core }
    }
}

impl Drop for ActiveWorker<'_> {
    fn drop(&mut self) {
        self.core.active_workers.fetch_sub(1, Ordering::AcqRel);
    }
}

fn worker_main(core: Arc<Core>, index: usize) {
    CURRENT.with(|stack| stack.borrow_mut().push(Arc::downgrade(&core)));
    WORKER_OF.with(|tag| tag.set(core.id));
    trace!("scheduler {} worker {index} up", core.id);

    while !core.stop_workers.load(Ordering::Acquire) {
        let acquired = core.task_sem.try_acquire();
        let io_work = poll_io();

        if core.stop_workers.load(Ordering::Acquire) {
            break;
        }
        if !acquired && io_work == 0 {
            thread::sleep(WORKER_BACKOFF);
            continue;
        }

        // Enter before popping: the drain loop must never see an empty queue
        // with no active worker while a task is in flight.
        let _active = ActiveWorker::enter(&core);
        let Some(task) = core.regular_tasks.with_lock(VecDeque::pop_front) else {
            continue;
        };
        task();
    }

    trace!("scheduler {} worker {index} down", core.id);
}

//-----------------------------------------------------------------------------

struct SpawnTask<T, F> {
    future: Mutex<Option<Pin<Box<F>>>>,
    state: Arc<PromiseState<T>>,
    scheduler: Weak<Core>,
}

impl<T, F> SpawnTask<T, F>
where
    T: Clone + Send + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
{
    /// Polls the wrapped future once. Completion settles the promise and
    /// releases the future immediately.
    fn step(self: &Arc<Self>) {
        let waker = Waker::from(self.clone());
        let mut cx = Context::from_waker(&waker);

        let mut slot = self.future.lock();
        let Some(future) = slot.as_mut() else {
            return;
        };
        match future.as_mut().poll(&mut cx) {
            Poll::Pending => {}
            Poll::Ready(result) => {
                *slot = None;
                drop(slot);
                match result {
                    Ok(value) => self.state.resolve(value),
                    Err(exception) => self.state.reject(exception),
                }
            }
        }
    }
}

impl<T, F> Wake for SpawnTask<T, F>
where
    T: Clone + Send + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
{
    fn wake(self: Arc<Self>) {
        if let Some(core) = self.scheduler.upgrade() {
            let task = self.clone();
            core.add_task(Box::new(move || task.step()));
        }
    }
}

fn spawn_on<T, F>(core: &Arc<Core>, future: F) -> Promise<T>
where
    T: Clone + Send + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
{
    let state = PromiseState::new(Some(Arc::downgrade(core)));
    let task = Arc::new(SpawnTask {
        future: Mutex::new(Some(Box::pin(future))),
        state: state.clone(),
        scheduler: Arc::downgrade(core),
    });

    // Eager start: the body runs in the caller's context until its first
    // suspension point.
    task.step();

    Promise::from_state(state)
}

fn delay_on(core: &Arc<Core>, duration: Duration) -> Promise<()> {
    let state = PromiseState::new(Some(Arc::downgrade(core)));
    let entry = DelayedTask {
        state: state.clone(),
        resolve_time: Instant::now() + duration,
        seq: core.delay_seq.fetch_add(1, Ordering::Relaxed),
    };
    core.delayed_tasks.with_lock(|heap| heap.push(entry));
    Promise::from_state(state)
}

fn set_timeout_on<F>(core: &Arc<Core>, f: F, duration: Duration) -> Promise<()>
where
    F: FnOnce() + Send + 'static,
{
    let delayed = delay_on(core, duration);
    spawn_on(core, async move {
        delayed.await?;
        f();
        Ok(())
    })
}

//-----------------------------------------------------------------------------

struct CurrentGuard;

impl CurrentGuard {
    fn enter(core: &Arc<Core>) -> Self {
        CURRENT.with(|stack| stack.borrow_mut().push(Arc::downgrade(core)));
        Self
    }
}

impl Drop for CurrentGuard {
    fn drop(&mut self) {
        CURRENT.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

//-----------------------------------------------------------------------------

/// A cooperative scheduler with an optional worker pool.
///
/// Workers start on construction and are joined on drop. The scheduler that
/// a thread is currently draining is available through
/// [`Scheduler::current`].
pub struct Scheduler {
    core: Arc<Core>,
    workers: Vec<JoinHandle<()>>,
}

impl Scheduler {
    /// `n_workers == 0` builds a single-threaded scheduler whose tasks all
    /// run on the thread that calls [`run_blocking`](Self::run_blocking).
    pub fn new(n_workers: usize) -> Self {
        let core = Core::new();

        let mut workers = Vec::with_capacity(n_workers);
        if n_workers > 0 {
            core.workers_started.store(true, Ordering::Release);
            for index in 0..n_workers {
                let core = core.clone();
                let handle = thread::Builder::new()
                    .name(format!("vega-worker-{index}"))
                    .spawn(move || worker_main(core, index))
                    .expect("failed to spawn worker thread");
                workers.push(handle);
            }
        }

        debug!("scheduler {} created with {n_workers} worker(s)", core.id);
        Scheduler { core, workers }
    }

    /// The process-wide default scheduler: lazily constructed,
    /// single-threaded, never dropped.
    pub fn get() -> &'static Scheduler {
        static DEFAULT: OnceLock<Scheduler> = OnceLock::new();
        DEFAULT.get_or_init(|| Scheduler::new(0))
    }

    /// The scheduler the calling thread is currently draining or serving,
    /// if any.
    pub fn current() -> Option<SchedulerHandle> {
        current_core_weak().map(|core| SchedulerHandle { core })
    }

    /// A cheap cloneable handle usable from spawned coroutines and foreign
    /// threads.
    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle { core: Arc::downgrade(&self.core) }
    }

    /// Starts `future` eagerly in the caller's context and returns a promise
    /// for its output. An `Err` return rejects the promise; a panic is not
    /// caught and takes down the polling thread.
    pub fn spawn<T, F>(&self, future: F) -> Promise<T>
    where
        T: Clone + Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        spawn_on(&self.core, future)
    }

    pub fn add_task(&self, task: impl FnOnce() + Send + 'static) {
        self.core.add_task(Box::new(task));
    }

    /// Keeps the drain loop alive until `promise` settles.
    pub fn track<T: Send + 'static>(&self, promise: &Promise<T>) {
        self.core.track_state(promise.state().clone());
    }

    /// A promise that the drain loop resolves once `duration` has elapsed,
    /// no earlier.
    pub fn delay(&self, duration: Duration) -> Promise<()> {
        delay_on(&self.core, duration)
    }

    pub fn set_timeout<F>(&self, f: F, duration: Duration) -> Promise<()>
    where
        F: FnOnce() + Send + 'static,
    {
        set_timeout_on(&self.core, f, duration)
    }

    /// Enters this scheduler as the thread's current one, spawns and tracks
    /// the produced future, and drains until quiescent. Workers, if any, run
    /// concurrently throughout. A tracked promise that rejects is dropped
    /// silently.
    pub fn run_blocking<T, F, Fut>(&self, producer: F)
    where
        T: Clone + Send + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let _current = CurrentGuard::enter(&self.core);
        let promise = spawn_on(&self.core, producer());
        self.core.track_state(promise.state().clone());
        self.core.drain();
    }

    /// The plain-callable variant: `f` is queued as a regular task, then the
    /// scheduler drains until quiescent.
    pub fn run_blocking_fn<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let _current = CurrentGuard::enter(&self.core);
        self.core.add_task(Box::new(f));
        self.core.drain();
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            self.core.stop_workers.store(true, Ordering::Release);
            self.core.task_sem.release(self.workers.len());
            for worker in self.workers.drain(..) {
                let _ = worker.join();
            }
        }
        debug!("scheduler {} stopped", self.core.id);
    }
}

//-----------------------------------------------------------------------------

/// Weak, cloneable reference to a scheduler. Operations on a handle whose
/// scheduler has been dropped return pending promises that never settle,
/// matching the drop-queued-work shutdown rule.
#[derive(Clone)]
pub struct SchedulerHandle {
    core: Weak<Core>,
}

impl SchedulerHandle {
    pub fn spawn<T, F>(&self, future: F) -> Promise<T>
    where
        T: Clone + Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        match self.core.upgrade() {
            Some(core) => spawn_on(&core, future),
            None => Promise::new(),
        }
    }

    pub fn add_task(&self, task: impl FnOnce() + Send + 'static) {
        if let Some(core) = self.core.upgrade() {
            core.add_task(Box::new(task));
        }
    }

    pub fn track<T: Send + 'static>(&self, promise: &Promise<T>) {
        if let Some(core) = self.core.upgrade() {
            core.track_state(promise.state().clone());
        }
    }

    pub fn delay(&self, duration: Duration) -> Promise<()> {
        match self.core.upgrade() {
            Some(core) => delay_on(&core, duration),
            None => Promise::new(),
        }
    }

    pub fn set_timeout<F>(&self, f: F, duration: Duration) -> Promise<()>
    where
        F: FnOnce() + Send + 'static,
    {
        match self.core.upgrade() {
            Some(core) => set_timeout_on(&core, f, duration),
            None => Promise::new(),
        }
    }
}

//-----------------------------------------------------------------------------
