//! Binder status codes
//!
//! Negative statuses in the `-1000..=-1014` range are reserved by the binder
//! to report refused or failed calls; anything else is a verb-defined status.

use std::fmt;

/// Status reported when a blocking scheduler operation timed out
pub const TIMEOUT_STATUS: i32 = -110;

/// Binder-reserved error statuses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum BinderErrno {
    /// Internal error
    InternalError = -1000,
    /// Memory exhausted
    OutOfMemory = -1001,
    /// Target API does not exist
    UnknownApi = -1002,
    /// Target verb does not exist
    UnknownVerb = -1003,
    /// Target API is not reachable
    NotAvailable = -1004,
    /// Caller lacks the required assurance level
    Unauthorized = -1005,
    /// Invalid session token
    InvalidToken = -1006,
    /// Access forbidden
    Forbidden = -1007,
    /// Token scope too narrow
    InsufficientScope = -1008,
    /// API is not in a state accepting calls
    BadApiState = -1009,
    /// Verb completed without replying
    NoReply = -1010,
    /// Malformed request
    InvalidRequest = -1011,
    /// Referenced item does not exist
    NoItem = -1012,
    /// Operation not allowed in current state
    BadState = -1013,
    /// Peer disconnected
    Disconnected = -1014,
}

impl BinderErrno {
    const ALL: [BinderErrno; 15] = [
        BinderErrno::InternalError,
        BinderErrno::OutOfMemory,
        BinderErrno::UnknownApi,
        BinderErrno::UnknownVerb,
        BinderErrno::NotAvailable,
        BinderErrno::Unauthorized,
        BinderErrno::InvalidToken,
        BinderErrno::Forbidden,
        BinderErrno::InsufficientScope,
        BinderErrno::BadApiState,
        BinderErrno::NoReply,
        BinderErrno::InvalidRequest,
        BinderErrno::NoItem,
        BinderErrno::BadState,
        BinderErrno::Disconnected,
    ];

    /// Numeric status
    pub const fn status(self) -> i32 {
        self as i32
    }

    /// Decode a status, `None` when it is not binder-reserved
    pub fn from_status(status: i32) -> Option<Self> {
        Self::ALL.iter().copied().find(|e| e.status() == status)
    }

    /// Whether a status is binder-reserved
    pub fn is_binder_errno(status: i32) -> bool {
        Self::from_status(status).is_some()
    }

    /// Canonical error text
    pub const fn text(self) -> &'static str {
        match self {
            BinderErrno::InternalError => "internal-error",
            BinderErrno::OutOfMemory => "out-of-memory",
            BinderErrno::UnknownApi => "unknown-api",
            BinderErrno::UnknownVerb => "unknown-verb",
            BinderErrno::NotAvailable => "not-available",
            BinderErrno::Unauthorized => "unauthorized",
            BinderErrno::InvalidToken => "invalid-token",
            BinderErrno::Forbidden => "forbidden",
            BinderErrno::InsufficientScope => "insufficient-scope",
            BinderErrno::BadApiState => "bad-api-state",
            BinderErrno::NoReply => "no-reply",
            BinderErrno::InvalidRequest => "invalid-request",
            BinderErrno::NoItem => "no-item",
            BinderErrno::BadState => "bad-state",
            BinderErrno::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for BinderErrno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.text())
    }
}

/// Text for any status; non-reserved statuses yield `"unknown-error"`
pub fn error_text(status: i32) -> &'static str {
    BinderErrno::from_status(status)
        .map(BinderErrno::text)
        .unwrap_or("unknown-error")
}
