//! afb-glue SDK - contract between the scripting glue and a binder runtime
//!
//! This crate holds the types both sides of the bridge agree on, without
//! depending on either the glue or a concrete runtime:
//!
//! - [`Data`]: the structured data tree used for every value exchange, with
//!   an explicit [`Data::Callable`] leaf for callback references
//! - [`NativeData`]: typed payloads as the runtime stores them
//! - [`NativeBinder`]: the call-out contract a runtime implements
//! - [`ApiHandler`], [`EventListener`], [`TimerListener`]: the dispatch
//!   contract the glue implements
//!
//! # Example
//!
//! ```ignore
//! use afb_glue_sdk::{Data, NativeBinder};
//!
//! let config = Data::object([("uid", Data::from("demo"))]);
//! let root = binder.configure(&config)?;
//! ```

#![warn(missing_docs)]

pub mod binder;
pub mod data;
pub mod errno;
pub mod error;
pub mod native;

pub use binder::{
    ApiHandler, ApiId, CallOrigin, Completion, ControlEvent, EnterFn, EventId, EventListener,
    JobFn, JobId, JobSignal, LockId, NativeBinder, Registration, RequestId, StartupFn, TimerId,
    TimerListener, TimerSpec,
};
pub use data::{CallableRef, Data, CALLABLE_MARKER};
pub use errno::{error_text, BinderErrno, TIMEOUT_STATUS};
pub use error::{NativeError, NativeResult};
pub use native::{NativeData, Reply};
