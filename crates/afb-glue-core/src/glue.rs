//! Glue state and script scopes
//!
//! [`Glue`] owns everything the bridge needs: the runtime, the interpreter
//! lock, the handle registry and the call-out table. No state is global;
//! every dispatch adapter reaches the glue through a weak reference.
//!
//! A [`Scope`] is what script code runs with. Holding one means holding the
//! interpreter lock on the current thread.

use crate::callout::{Args, CallOutTable};
use crate::error::{GlueError, GlueResult};
use crate::handle::{Handle, HandleRegistry};
use crate::interp::{GilGuard, Interpreter};
use crate::value::{ScriptFn, Value};
use afb_glue_sdk::{ApiId, NativeBinder};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// State shared by the glue, its scopes and its adapters
pub(crate) struct GlueShared {
    pub(crate) native: Arc<dyn NativeBinder>,
    pub(crate) interp: Interpreter,
    pub(crate) registry: HandleRegistry,
    /// Init-once binder handle
    pub(crate) binder: Mutex<Option<Handle>>,
    pub(crate) callouts: CallOutTable,
    /// Pattern handlers by (api, pattern), for deletion by pattern
    pub(crate) handlers: DashMap<(ApiId, String), Handle>,
    pub(crate) pings: AtomicU64,
}

/// Scripting glue bound to one binder runtime
pub struct Glue {
    shared: Arc<GlueShared>,
}

impl Glue {
    /// Create a glue over `native` with the standard call-outs
    pub fn new(native: Arc<dyn NativeBinder>) -> Self {
        Self::with_callouts(native, CallOutTable::standard())
    }

    /// Create a glue with a custom call-out table
    pub fn with_callouts(native: Arc<dyn NativeBinder>, callouts: CallOutTable) -> Self {
        Self {
            shared: Arc::new(GlueShared {
                native,
                interp: Interpreter::new(),
                registry: HandleRegistry::new(),
                binder: Mutex::new(None),
                callouts,
                handlers: DashMap::new(),
                pings: AtomicU64::new(0),
            }),
        }
    }

    /// Enter the interpreter on the current thread
    pub fn enter(&self) -> Scope {
        Scope::enter(Arc::clone(&self.shared))
    }

    /// Binder handle, once configured
    pub fn binder(&self) -> Option<Handle> {
        self.shared.binder.lock().clone()
    }

    /// Handle registry
    pub fn registry(&self) -> &HandleRegistry {
        &self.shared.registry
    }

    /// Interpreter lock and thread contexts
    pub fn interpreter(&self) -> &Interpreter {
        &self.shared.interp
    }

    /// Underlying runtime
    pub fn native(&self) -> &Arc<dyn NativeBinder> {
        &self.shared.native
    }

    /// Registered call-out names
    pub fn callouts(&self) -> Vec<&'static str> {
        self.shared.callouts.names()
    }
}

// ============================================================================
// Scope
// ============================================================================

/// Script execution scope; holds the interpreter lock until dropped
pub struct Scope {
    glue: Arc<GlueShared>,
    gil: GilGuard,
}

impl Scope {
    pub(crate) fn enter(glue: Arc<GlueShared>) -> Self {
        let gil = glue.interp.acquire();
        Self { glue, gil }
    }

    /// Enter from an adapter; `None` once the glue is gone
    pub(crate) fn upgrade(glue: &Weak<GlueShared>) -> Option<Self> {
        match glue.upgrade() {
            Some(glue) => Some(Self::enter(glue)),
            None => {
                tracing::debug!("glue dropped, callback ignored");
                None
            }
        }
    }

    /// Call a call-out by name
    pub fn call(&mut self, name: &str, args: Vec<Value>) -> GlueResult<Value> {
        let callout = self
            .glue
            .callouts
            .get(name)
            .ok_or_else(|| GlueError::Syntax(format!("unknown call-out '{}'", name)))?;
        callout(self, Args::new(name, args))
    }

    /// Invoke a script callable, turning a panic into [`GlueError::Panic`]
    pub fn invoke(&mut self, callable: &ScriptFn, args: Vec<Value>) -> GlueResult<Value> {
        match catch_unwind(AssertUnwindSafe(|| callable.call(self, args))) {
            Ok(result) => result,
            Err(payload) => {
                let msg = if let Some(s) = payload.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = payload.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "Unknown panic".to_string()
                };
                tracing::error!(callable = callable.name(), panic = %msg, "script callable panicked");
                Err(GlueError::Panic(msg))
            }
        }
    }

    /// Run `f` with the interpreter lock released
    pub fn allow_threads<T>(&mut self, f: impl FnOnce() -> T) -> T {
        self.gil.allow_threads(f)
    }

    /// Underlying runtime
    pub fn native(&self) -> &Arc<dyn NativeBinder> {
        &self.glue.native
    }

    /// Handle registry
    pub fn registry(&self) -> &HandleRegistry {
        &self.glue.registry
    }

    /// Interpreter lock and thread contexts
    pub fn interpreter(&self) -> &Interpreter {
        &self.glue.interp
    }

    /// Binder handle, once configured
    pub fn binder(&self) -> Option<Handle> {
        self.glue.binder.lock().clone()
    }

    pub(crate) fn shared(&self) -> &Arc<GlueShared> {
        &self.glue
    }

    pub(crate) fn next_ping(&self) -> u64 {
        self.glue.pings.fetch_add(1, Ordering::Relaxed) + 1
    }
}
