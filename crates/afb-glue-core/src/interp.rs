//! Interpreter crossing discipline
//!
//! Script execution is serialized by one execution lock per [`Interpreter`].
//! The lock is reentrant for the owning thread, so a dispatch adapter fired
//! inline from a call-out on the same thread nests instead of deadlocking.
//!
//! Every thread entering the interpreter gets a [`ThreadContext`] created on
//! first use and dropped from the table when the thread exits.
//!
//! Blocking call-outs run inside [`GilGuard::allow_threads`], which hands the
//! lock over completely and takes it back at the same depth on every exit
//! path.

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

// ============================================================================
// Thread contexts
// ============================================================================

/// Per-thread interpreter state
#[derive(Debug)]
pub struct ThreadContext {
    id: u64,
    thread: ThreadId,
    name: Option<String>,
    entries: AtomicU64,
}

impl ThreadContext {
    /// Context identifier, unique within the interpreter
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Owning thread
    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    /// Thread name, when the thread has one
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Number of times the thread acquired the interpreter
    pub fn entries(&self) -> u64 {
        self.entries.load(Ordering::Relaxed)
    }
}

/// Removes this thread's contexts when the thread exits
#[derive(Default)]
struct ThreadExitHook {
    thread: Option<ThreadId>,
    interpreters: Vec<Weak<InterpInner>>,
}

impl Drop for ThreadExitHook {
    fn drop(&mut self) {
        let Some(thread) = self.thread else {
            return;
        };
        for interp in self.interpreters.drain(..) {
            if let Some(interp) = interp.upgrade() {
                if let Some((_, ctx)) = interp.threads.remove(&thread) {
                    tracing::trace!(context = ctx.id, "thread context released on thread exit");
                }
            }
        }
    }
}

thread_local! {
    static EXIT_HOOK: RefCell<ThreadExitHook> = RefCell::new(ThreadExitHook::default());
}

// ============================================================================
// Interpreter
// ============================================================================

#[derive(Debug, Default)]
struct LockState {
    owner: Option<ThreadId>,
    depth: usize,
}

struct InterpInner {
    state: Mutex<LockState>,
    released: Condvar,
    threads: DashMap<ThreadId, Arc<ThreadContext>>,
    next_context: AtomicU64,
}

/// Interpreter execution lock plus its per-thread context table
#[derive(Clone)]
pub struct Interpreter {
    inner: Arc<InterpInner>,
}

impl Interpreter {
    /// Create an interpreter with no thread attached
    pub fn new() -> Self {
        Self {
            inner: Arc::new(InterpInner {
                state: Mutex::new(LockState::default()),
                released: Condvar::new(),
                threads: DashMap::new(),
                next_context: AtomicU64::new(1),
            }),
        }
    }

    /// Acquire the execution lock on the current thread, blocking while
    /// another thread holds it
    pub fn acquire(&self) -> GilGuard {
        let context = self.current_context();
        context.entries.fetch_add(1, Ordering::Relaxed);

        let me = thread::current().id();
        let mut state = self.inner.state.lock();
        if state.owner == Some(me) {
            state.depth += 1;
        } else {
            while state.owner.is_some() {
                self.inner.released.wait(&mut state);
            }
            state.owner = Some(me);
            state.depth = 1;
        }
        drop(state);

        GilGuard {
            inner: Arc::clone(&self.inner),
            thread: me,
            _not_send: PhantomData,
        }
    }

    /// Whether the current thread holds the execution lock
    pub fn holds_lock(&self) -> bool {
        self.inner.state.lock().owner == Some(thread::current().id())
    }

    /// Context of the current thread, created on first use
    pub fn current_context(&self) -> Arc<ThreadContext> {
        let me = thread::current().id();
        if let Some(ctx) = self.inner.threads.get(&me) {
            return Arc::clone(ctx.value());
        }

        let ctx = Arc::new(ThreadContext {
            id: self.inner.next_context.fetch_add(1, Ordering::Relaxed),
            thread: me,
            name: thread::current().name().map(str::to_string),
            entries: AtomicU64::new(0),
        });
        self.inner.threads.insert(me, Arc::clone(&ctx));

        let weak = Arc::downgrade(&self.inner);
        let registered = EXIT_HOOK.try_with(|hook| {
            let mut hook = hook.borrow_mut();
            hook.thread = Some(me);
            hook.interpreters.push(weak);
        });
        if registered.is_err() {
            tracing::warn!(context = ctx.id, "thread exiting, context will not be reclaimed");
        }

        tracing::trace!(context = ctx.id, thread = ?me, "thread context created");
        ctx
    }

    /// Number of threads with a live context
    pub fn thread_contexts(&self) -> usize {
        self.inner.threads.len()
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Lock guard
// ============================================================================

/// RAII guard over the execution lock; released on drop.
///
/// The guard is bound to the thread that acquired it.
pub struct GilGuard {
    inner: Arc<InterpInner>,
    thread: ThreadId,
    _not_send: PhantomData<*const ()>,
}

impl GilGuard {
    /// Run `f` with the execution lock fully released, then take it back at
    /// the depth this thread held before
    pub fn allow_threads<T>(&mut self, f: impl FnOnce() -> T) -> T {
        let saved = {
            let mut state = self.inner.state.lock();
            debug_assert_eq!(state.owner, Some(self.thread));
            let saved = state.depth;
            state.owner = None;
            state.depth = 0;
            self.inner.released.notify_one();
            saved
        };

        let _restore = Restore {
            inner: &self.inner,
            thread: self.thread,
            depth: saved,
        };
        f()
    }
}

impl Drop for GilGuard {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        if state.owner != Some(self.thread) {
            return;
        }
        state.depth = state.depth.saturating_sub(1);
        if state.depth == 0 {
            state.owner = None;
            self.inner.released.notify_one();
        }
    }
}

/// Reacquires the lock after `allow_threads`, unwinding included
struct Restore<'a> {
    inner: &'a Arc<InterpInner>,
    thread: ThreadId,
    depth: usize,
}

impl Drop for Restore<'_> {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        while state.owner.is_some() {
            self.inner.released.wait(&mut state);
        }
        state.owner = Some(self.thread);
        state.depth = self.depth;
    }
}
