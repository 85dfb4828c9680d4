use log::error;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::{
    any::Any,
    cmp::Ordering,
    collections::{BinaryHeap, VecDeque},
    io,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

#[must_use]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EnqueueResult {
    Success,
    Rejected,
}

struct DelayedTask<T> {
    deadline: Instant,
    seq: u64,
    task: T,
}

impl<T> PartialEq for DelayedTask<T> {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl<T> Eq for DelayedTask<T> {}

impl<T> PartialOrd for DelayedTask<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for DelayedTask<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reversed comparison makes the
        // earliest deadline the top, insertion order breaking ties.
        other.deadline.cmp(&self.deadline).then_with(|| other.seq.cmp(&self.seq))
    }
}

/// The two task queues of a worker, visible to admission hooks and to
/// [`TaskHooks::handle_holding_lock`] overrides.
pub struct QueueState<T> {
    ready: VecDeque<T>,
    delayed: BinaryHeap<DelayedTask<T>>,
    next_seq: u64,
    should_run: bool,
}

impl<T> QueueState<T> {
    fn new() -> Self {
        QueueState { ready: VecDeque::new(), delayed: BinaryHeap::new(), next_seq: 0, should_run: true }
    }

    pub fn ready_tasks(&self) -> impl Iterator<Item = &T> {
        self.ready.iter()
    }

    pub fn delayed_tasks(&self) -> impl Iterator<Item = &T> {
        self.delayed.iter().map(|delayed| &delayed.task)
    }

    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }

    pub fn delayed_len(&self) -> usize {
        self.delayed.len()
    }

    /// Appends a ready task directly, for handlers that already hold
    /// the queue lock. Admission is not consulted.
    pub fn push_ready(&mut self, task: T) {
        self.ready.push_back(task);
    }

    /// Retains only the delayed tasks the predicate accepts.
    pub fn retain_delayed(&mut self, mut predicate: impl FnMut(&T) -> bool) {
        let retained = std::mem::take(&mut self.delayed)
            .into_iter()
            .filter(|delayed| predicate(&delayed.task))
            .collect();
        self.delayed = retained;
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.delayed.peek().map(|delayed| delayed.deadline)
    }
}

type AdmissionHook<T> = Box<dyn Fn(&QueueState<T>, &T) -> bool + Send + Sync>;

struct Shared<T> {
    queue: Mutex<QueueState<T>>,
    wakeup: Condvar,
    admit: Option<AdmissionHook<T>>,
}

/// Worker-thread-side capabilities, fixed at construction.
///
/// `handle` runs with the queue lock released, so it may freely call
/// back into its own worker's [`WorkerHandle`]. Overriding
/// `handle_holding_lock` instead gives atomic access to the pending
/// queues while processing.
pub trait TaskHooks<T>: Send {
    fn handle(&mut self, worker: &WorkerHandle<T>, task: T);

    fn handle_holding_lock(
        &mut self,
        lock: MutexGuard<'_, QueueState<T>>,
        worker: &WorkerHandle<T>,
        task: T,
    ) {
        drop(lock);
        self.handle(worker, task);
    }

    /// Runs on the worker thread before the first task.
    fn on_enter(&mut self) {}

    /// Runs on the worker thread right before it terminates.
    fn on_exit(&mut self) {}

    /// Error sink for panicking handlers. The worker itself survives.
    fn on_panic(&mut self, panic: &(dyn Any + Send)) {
        if let Some(message) = panic.downcast_ref::<&str>() {
            error!("task handler panicked: {}", message);
        } else if let Some(message) = panic.downcast_ref::<String>() {
            error!("task handler panicked: {}", message);
        } else {
            error!("task handler panicked");
        }
    }
}

/// Cheap cloneable submission handle, usable from any thread and from
/// inside a running handler.
pub struct WorkerHandle<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for WorkerHandle<T> {
    fn clone(&self) -> Self {
        WorkerHandle { shared: Arc::clone(&self.shared) }
    }
}

impl<T> WorkerHandle<T> {
    /// Appends a task to the ready queue, waking the worker. The
    /// admission hook runs under the queue lock and may refuse.
    pub fn enqueue(&self, task: T) -> EnqueueResult {
        let mut queue = self.shared.queue.lock();

        if let Some(admit) = &self.shared.admit {
            if !admit(&queue, &task) {
                return EnqueueResult::Rejected;
            }
        }

        queue.ready.push_back(task);
        self.shared.wakeup.notify_all();

        EnqueueResult::Success
    }

    /// Schedules a task to become ready `delay` from now.
    pub fn enqueue_delayed(&self, task: T, delay: Duration) -> EnqueueResult {
        let mut queue = self.shared.queue.lock();

        if let Some(admit) = &self.shared.admit {
            if !admit(&queue, &task) {
                return EnqueueResult::Rejected;
            }
        }

        let seq = queue.next_seq;
        queue.next_seq += 1;
        queue.delayed.push(DelayedTask { deadline: Instant::now() + delay, seq, task });
        self.shared.wakeup.notify_all();

        EnqueueResult::Success
    }

    /// Atomically retains only the delayed tasks the predicate
    /// accepts. Deadlines of survivors are unchanged.
    pub fn filter_delayed(&self, predicate: impl FnMut(&T) -> bool) {
        let mut queue = self.shared.queue.lock();
        queue.retain_delayed(predicate);
        self.shared.wakeup.notify_all();
    }
}

/// A serialized task actor: one dedicated worker thread draining a
/// FIFO of immediate tasks and a min-heap of delayed tasks.
///
/// Immediate tasks run in submission order and always before due
/// delayed tasks; delayed tasks run in deadline order. Dropping the
/// worker stops it; tasks still queued at that point are dropped.
pub struct Worker<T: Send + 'static> {
    name: String,
    shared: Arc<Shared<T>>,
    hooks: Option<Box<dyn TaskHooks<T>>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl<T: Send + 'static> Worker<T> {
    pub fn new(name: impl Into<String>, hooks: impl TaskHooks<T> + 'static) -> Self {
        Self::build(name.into(), Box::new(hooks), None)
    }

    /// Like [`Worker::new`], with an admission hook consulted under
    /// the queue lock on every enqueue (backpressure, dedup, quota).
    pub fn with_admission(
        name: impl Into<String>,
        hooks: impl TaskHooks<T> + 'static,
        admit: impl Fn(&QueueState<T>, &T) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self::build(name.into(), Box::new(hooks), Some(Box::new(admit)))
    }

    fn build(name: String, hooks: Box<dyn TaskHooks<T>>, admit: Option<AdmissionHook<T>>) -> Self {
        Worker {
            name,
            shared: Arc::new(Shared {
                queue: Mutex::new(QueueState::new()),
                wakeup: Condvar::new(),
                admit,
            }),
            hooks: Some(hooks),
            thread: None,
        }
    }

    pub fn handle(&self) -> WorkerHandle<T> {
        WorkerHandle { shared: Arc::clone(&self.shared) }
    }

    pub fn enqueue(&self, task: T) -> EnqueueResult {
        self.handle().enqueue(task)
    }

    pub fn enqueue_delayed(&self, task: T, delay: Duration) -> EnqueueResult {
        self.handle().enqueue_delayed(task, delay)
    }

    pub fn filter_delayed(&self, predicate: impl FnMut(&T) -> bool) {
        self.handle().filter_delayed(predicate)
    }

    /// Spawns the worker thread. Idempotent; a worker that has been
    /// stopped does not restart.
    pub fn start(&mut self) -> io::Result<()> {
        if self.thread.is_some() {
            return Ok(());
        }

        let Some(mut hooks) = self.hooks.take() else {
            return Ok(());
        };

        let shared = Arc::clone(&self.shared);
        let thread = thread::Builder::new().name(self.name.clone()).spawn(move || {
            let worker = WorkerHandle { shared: Arc::clone(&shared) };
            run(&shared, &worker, hooks.as_mut());
        })?;

        self.thread = Some(thread);
        Ok(())
    }

    /// Wakes the worker, waits for it to terminate and drops whatever
    /// is still queued. Idempotent; does not abort a task already in
    /// progress.
    pub fn stop(&mut self) {
        {
            let mut queue = self.shared.queue.lock();
            queue.should_run = false;
        }
        self.shared.wakeup.notify_all();

        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }

        let mut queue = self.shared.queue.lock();
        queue.ready.clear();
        queue.delayed.clear();
    }
}

impl<T: Send + 'static> Drop for Worker<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn dispatch<'a, T: Send>(
    shared: &'a Shared<T>,
    worker: &WorkerHandle<T>,
    hooks: &mut dyn TaskHooks<T>,
    lock: MutexGuard<'a, QueueState<T>>,
    task: T,
) -> MutexGuard<'a, QueueState<T>> {
    let outcome = catch_unwind(AssertUnwindSafe(|| hooks.handle_holding_lock(lock, worker, task)));

    if let Err(panic) = outcome {
        hooks.on_panic(panic.as_ref());
    }

    shared.queue.lock()
}

fn run<T: Send>(shared: &Shared<T>, worker: &WorkerHandle<T>, hooks: &mut dyn TaskHooks<T>) {
    hooks.on_enter();

    let mut queue = shared.queue.lock();

    'run: loop {
        if !queue.should_run {
            break;
        }

        if queue.ready.is_empty() {
            match queue.next_deadline() {
                Some(deadline) => {
                    let _ = shared.wakeup.wait_until(&mut queue, deadline);
                },
                None => shared.wakeup.wait(&mut queue),
            }
        }

        if !queue.should_run {
            break;
        }

        // Every immediate task first, even when delayed deadlines
        // have already passed: interactive work beats timers.
        while let Some(task) = queue.ready.pop_front() {
            queue = dispatch(shared, worker, hooks, queue, task);

            if !queue.should_run {
                break 'run;
            }
        }

        let now = Instant::now();
        loop {
            match queue.delayed.peek() {
                Some(delayed) if delayed.deadline <= now => {},
                _ => break,
            }

            let task = queue.delayed.pop().expect("peeked entry exists").task;
            queue = dispatch(shared, worker, hooks, queue, task);

            if !queue.should_run {
                break 'run;
            }
        }
    }

    drop(queue);
    hooks.on_exit();
}
