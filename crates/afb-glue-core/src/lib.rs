//! Scripting glue for the afb binder
//!
//! Lets script code declare APIs, serve verbs, call other APIs, emit and
//! handle events, and drive timers and scheduler jobs on a binder runtime
//! implementing [`afb_glue_sdk::NativeBinder`].
//!
//! Layers, bottom-up:
//!
//! - [`convert`]: value bridge between script [`Value`]s and structured
//!   [`afb_glue_sdk::Data`], callables included
//! - [`handle`]: the tagged [`Handle`] and its registry
//! - [`interp`]: execution lock and per-thread contexts
//! - [`dispatch`]: runtime callbacks that re-enter script code
//! - [`callout`]: the named operations scripts invoke
//!
//! # Example
//!
//! ```ignore
//! let glue = Glue::new(Arc::new(LocalBinder::new()));
//! let mut scope = glue.enter();
//! let binder = scope.call("binder", vec![Value::dict([("uid", "demo".into())])])?;
//! let api = scope.call("apicreate", vec![Value::dict([("uid", "demo".into())])])?;
//! ```

#![warn(missing_docs)]

pub mod callout;
pub mod convert;
mod dispatch;
pub mod error;
mod glue;
pub mod handle;
pub mod interp;
pub mod logging;
#[cfg(test)]
mod testing;
pub mod value;

pub use callout::{Args, CallOut, CallOutTable};
pub use convert::{from_data, from_native, to_data, to_native, ConversionError, MAX_DEPTH};
pub use dispatch::ERROR_STATUS;
pub use error::{GlueError, GlueResult};
pub use glue::{Glue, Scope};
pub use handle::{Handle, HandleKind, HandleRegistry, Release};
pub use interp::{GilGuard, Interpreter, ThreadContext};
pub use logging::{LogConfig, ScriptLevel};
pub use value::{ScriptFn, Value};
