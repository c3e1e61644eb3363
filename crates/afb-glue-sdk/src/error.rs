//! Error types for the binder contract

use crate::errno::{BinderErrno, TIMEOUT_STATUS};

/// Result type for native runtime calls
pub type NativeResult<T> = Result<T, NativeError>;

/// Native runtime error types
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NativeError {
    /// Binder-reserved status
    #[error("{0}")]
    Errno(BinderErrno),

    /// Referenced object does not exist (stale id, unknown name)
    #[error("{what} not found: {name}")]
    NotFound {
        /// Object kind
        what: &'static str,
        /// Name or identifier looked up
        name: String,
    },

    /// Object with the same identity already registered
    #[error("{what} already exists: {name}")]
    AlreadyExists {
        /// Object kind
        what: &'static str,
        /// Conflicting name
        name: String,
    },

    /// Configuration rejected
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Blocking operation timed out
    #[error("timeout after {0}ms")]
    Timeout(u64),

    /// Generic failure
    #[error("{0}")]
    Failed(String),
}

impl NativeError {
    /// Shorthand for [`NativeError::NotFound`]
    pub fn not_found(what: &'static str, name: impl ToString) -> Self {
        NativeError::NotFound {
            what,
            name: name.to_string(),
        }
    }

    /// Shorthand for [`NativeError::AlreadyExists`]
    pub fn already_exists(what: &'static str, name: impl ToString) -> Self {
        NativeError::AlreadyExists {
            what,
            name: name.to_string(),
        }
    }

    /// Native status equivalent of this error
    pub fn status(&self) -> i32 {
        match self {
            NativeError::Errno(errno) => errno.status(),
            NativeError::NotFound { .. } => BinderErrno::NoItem.status(),
            NativeError::AlreadyExists { .. } => BinderErrno::BadState.status(),
            NativeError::InvalidConfig(_) => BinderErrno::InvalidRequest.status(),
            NativeError::Timeout(_) => TIMEOUT_STATUS,
            NativeError::Failed(_) => BinderErrno::InternalError.status(),
        }
    }
}

impl From<BinderErrno> for NativeError {
    fn from(errno: BinderErrno) -> Self {
        NativeError::Errno(errno)
    }
}

impl From<String> for NativeError {
    fn from(s: String) -> Self {
        NativeError::Failed(s)
    }
}

impl From<&str> for NativeError {
    fn from(s: &str) -> Self {
        NativeError::Failed(s.to_string())
    }
}
