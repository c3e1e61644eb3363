//! Worker pool and delay thread
//!
//! Workers pull tasks from one crossbeam channel. The delay thread keeps a
//! min-heap of wake times and forwards due tasks to the workers, waiting on
//! a condvar timeout in between.

use afb_glue_sdk::{NativeError, NativeResult};
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Unit of work run on a worker
pub(crate) type Task = Box<dyn FnOnce() + Send>;

enum Message {
    Run(Task),
    Stop,
}

// ============================================================================
// Delay queue
// ============================================================================

/// Entry in the delay heap
struct DelayEntry {
    at: Instant,
    key: u64,
}

// Reverse ordering for min-heap (earliest wake time first)
impl Ord for DelayEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other.at.cmp(&self.at).then_with(|| other.key.cmp(&self.key))
    }
}

impl PartialOrd for DelayEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for DelayEntry {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.key == other.key
    }
}

impl Eq for DelayEntry {}

#[derive(Default)]
struct DelayState {
    heap: BinaryHeap<DelayEntry>,
    /// Tasks by key; a cancelled key leaves a stale heap entry behind
    tasks: FxHashMap<u64, Task>,
    shutdown: bool,
}

struct DelayQueue {
    state: Mutex<DelayState>,
    notify: Condvar,
    next_key: AtomicU64,
}

impl DelayQueue {
    fn run_loop(&self, queue: Sender<Message>) {
        let mut state = self.state.lock();
        loop {
            if state.shutdown {
                break;
            }

            let now = Instant::now();
            while state.heap.peek().map_or(false, |entry| entry.at <= now) {
                let Some(entry) = state.heap.pop() else {
                    break;
                };
                if let Some(task) = state.tasks.remove(&entry.key) {
                    if queue.send(Message::Run(task)).is_err() {
                        return;
                    }
                }
            }

            match state.heap.peek().map(|entry| entry.at) {
                Some(at) => {
                    self.notify.wait_until(&mut state, at);
                }
                None => self.notify.wait(&mut state),
            }
        }
        tracing::trace!("delay thread shutting down");
    }
}

// ============================================================================
// Scheduler
// ============================================================================

/// Worker pool plus delay thread
pub(crate) struct Scheduler {
    queue: Sender<Message>,
    delays: Arc<DelayQueue>,
    workers: usize,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    /// Spawn `workers` worker threads and the delay thread
    pub(crate) fn start(workers: usize) -> NativeResult<Arc<Self>> {
        let (queue, receiver) = channel::unbounded();
        let scheduler = Arc::new(Self {
            queue,
            delays: Arc::new(DelayQueue {
                state: Mutex::new(DelayState::default()),
                notify: Condvar::new(),
                next_key: AtomicU64::new(1),
            }),
            workers,
            threads: Mutex::new(Vec::with_capacity(workers + 1)),
        });

        for id in 0..workers {
            let receiver = receiver.clone();
            scheduler.spawn_thread(format!("afb-worker-{}", id), move || worker_loop(id, receiver))?;
        }
        let delays = Arc::clone(&scheduler.delays);
        let queue = scheduler.queue.clone();
        scheduler.spawn_thread("afb-timer".to_string(), move || delays.run_loop(queue))?;

        tracing::debug!(workers, "scheduler started");
        Ok(scheduler)
    }

    fn spawn_thread(&self, name: String, body: impl FnOnce() + Send + 'static) -> NativeResult<()> {
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(body)
            .map_err(|e| NativeError::Failed(format!("failed to spawn {}: {}", name, e)))?;
        self.threads.lock().push(handle);
        Ok(())
    }

    /// Queue a task on the workers
    pub(crate) fn spawn(&self, task: Task) -> NativeResult<()> {
        self.queue
            .send(Message::Run(task))
            .map_err(|_| NativeError::Failed("scheduler stopped".into()))
    }

    /// Run `task` on a worker after `delay`; returns a key for [`Self::cancel`]
    pub(crate) fn schedule(&self, delay: Duration, task: Task) -> u64 {
        let key = self.delays.next_key.fetch_add(1, AtomicOrdering::Relaxed);
        let mut state = self.delays.state.lock();
        state.tasks.insert(key, task);
        state.heap.push(DelayEntry {
            at: Instant::now() + delay,
            key,
        });
        self.delays.notify.notify_one();
        key
    }

    /// Drop a scheduled task that has not fired yet
    pub(crate) fn cancel(&self, key: u64) -> bool {
        self.delays.state.lock().tasks.remove(&key).is_some()
    }

    /// Number of delayed tasks still pending
    pub(crate) fn pending(&self) -> usize {
        self.delays.state.lock().tasks.len()
    }

    /// Stop and join every thread, except the calling one when it belongs
    /// to the pool
    pub(crate) fn shutdown(&self) {
        {
            let mut state = self.delays.state.lock();
            state.shutdown = true;
            state.tasks.clear();
            self.delays.notify.notify_all();
        }
        for _ in 0..self.workers {
            let _ = self.queue.send(Message::Stop);
        }

        let me = thread::current().id();
        let threads: Vec<_> = self.threads.lock().drain(..).collect();
        for handle in threads {
            if handle.thread().id() == me {
                continue;
            }
            if handle.join().is_err() {
                tracing::error!("scheduler thread panicked");
            }
        }
        tracing::debug!("scheduler stopped");
    }
}

fn worker_loop(id: usize, receiver: Receiver<Message>) {
    while let Ok(message) = receiver.recv() {
        match message {
            Message::Run(task) => {
                if catch_unwind(AssertUnwindSafe(task)).is_err() {
                    tracing::error!(worker = id, "task panicked");
                }
            }
            Message::Stop => break,
        }
    }
    tracing::trace!(worker = id, "worker shutting down");
}
