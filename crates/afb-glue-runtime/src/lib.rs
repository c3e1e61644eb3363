//! afb-glue runtime - in-process binder implementing [`NativeBinder`]
//!
//! [`LocalBinder`] hosts APIs, requests, events, timers and jobs inside the
//! current process. It backs the glue test-suite and small embedded setups
//! that do not need a separate binder daemon.
//!
//! # Example
//!
//! ```ignore
//! use afb_glue_runtime::LocalBinder;
//! use afb_glue_sdk::{Data, NativeBinder};
//!
//! let binder = LocalBinder::new();
//! binder.configure(&Data::object([("uid", Data::from("demo"))]))?;
//! ```
//!
//! [`NativeBinder`]: afb_glue_sdk::NativeBinder

#![warn(missing_docs)]

mod api;
pub mod binder;
pub mod config;
mod scheduler;
mod session;
mod timer;

pub use binder::LocalBinder;
pub use config::{ApiConfig, BinderConfig, DEFAULT_CALL_TIMEOUT_MS};
