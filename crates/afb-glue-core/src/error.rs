//! Error types for the glue

use crate::convert::ConversionError;
use afb_glue_sdk::NativeError;

/// Result type for call-outs and script callables
pub type GlueResult<T> = Result<T, GlueError>;

/// Glue error taxonomy
#[derive(Debug, Clone, thiserror::Error)]
pub enum GlueError {
    /// Wrong argument count or type at a call-out boundary
    #[error("syntax error: {0}")]
    Syntax(String),

    /// Value could not cross the bridge
    #[error("conversion error: {0}")]
    Conversion(#[from] ConversionError),

    /// Bridge protocol violated (double reply, bad response shape, stale handle)
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Runtime refused or failed the operation
    #[error("native error: {0}")]
    Native(#[from] NativeError),

    /// Raised by script code
    #[error("{0}")]
    Script(String),

    /// Script callable panicked
    #[error("callback panicked: {0}")]
    Panic(String),
}

impl GlueError {
    /// Raise a script-level error
    pub fn raise(message: impl Into<String>) -> Self {
        GlueError::Script(message.into())
    }

    /// Shorthand for [`GlueError::Protocol`]
    pub fn protocol(message: impl Into<String>) -> Self {
        GlueError::Protocol(message.into())
    }

    /// Short kind tag used in error replies and logs
    pub fn kind(&self) -> &'static str {
        match self {
            GlueError::Syntax(_) => "syntax",
            GlueError::Conversion(_) => "conversion",
            GlueError::Protocol(_) => "protocol",
            GlueError::Native(_) => "native",
            GlueError::Script(_) => "script",
            GlueError::Panic(_) => "panic",
        }
    }
}
