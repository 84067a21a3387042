//! Errors signalled at the control thread API boundary
//!
//! The render thread never produces these: contention and missing data on that side degrade
//! to silence or deferred work instead.

/// The kind of an [`AudioGraphError`], used by host bindings to map errors to their own
/// exception types
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// An input, output or other index argument is out of range
    IndexSizeError,
    /// A required argument is missing, or belongs to another context
    SyntaxError,
    /// The operation is not allowed in the current state (e.g. the context is closed)
    InvalidStateError,
    /// A value is outside the supported range for the node type
    NotSupportedError,
    /// The connection to disconnect does not exist
    InvalidAccessError,
    /// A numeric argument (such as an automation time) is out of range
    RangeError,
}

/// Error type for all fallible audio graph operations
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AudioGraphError {
    #[error("IndexSizeError - {0}")]
    IndexSize(String),
    #[error("SyntaxError - {0}")]
    Syntax(String),
    #[error("InvalidStateError - {0}")]
    InvalidState(String),
    #[error("NotSupportedError - {0}")]
    NotSupported(String),
    #[error("InvalidAccessError - {0}")]
    InvalidAccess(String),
    #[error("RangeError - {0}")]
    Range(String),
}

impl AudioGraphError {
    /// The kind of this error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::IndexSize(_) => ErrorKind::IndexSizeError,
            Self::Syntax(_) => ErrorKind::SyntaxError,
            Self::InvalidState(_) => ErrorKind::InvalidStateError,
            Self::NotSupported(_) => ErrorKind::NotSupportedError,
            Self::InvalidAccess(_) => ErrorKind::InvalidAccessError,
            Self::Range(_) => ErrorKind::RangeError,
        }
    }

    pub(crate) fn index_size(message: impl Into<String>) -> Self {
        Self::IndexSize(message.into())
    }

    pub(crate) fn syntax(message: impl Into<String>) -> Self {
        Self::Syntax(message.into())
    }

    pub(crate) fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    pub(crate) fn not_supported(message: impl Into<String>) -> Self {
        Self::NotSupported(message.into())
    }

    pub(crate) fn invalid_access(message: impl Into<String>) -> Self {
        Self::InvalidAccess(message.into())
    }

    pub(crate) fn range(message: impl Into<String>) -> Self {
        Self::Range(message.into())
    }
}
