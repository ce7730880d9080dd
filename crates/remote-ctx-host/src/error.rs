//! Host error type.

use remote_ctx_core::Path;

/// Host error.
///
/// `Clone` so that a rejected promise can hand the same error to every
/// awaiting caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    #[error("Cannot resolve path {path} at {segment}")]
    PathResolution { path: Path, segment: String },
    #[error("Cannot read properties of {target} (reading '{key}')")]
    ReadNullish { target: &'static str, key: String },
    #[error("Cannot set property '{key}' on {target}")]
    InvalidAssignment { target: &'static str, key: String },
    #[error("Cannot assign to read only property '{0}'")]
    ReadOnly(String),
    #[error("Cannot set property '{0}' which has only a getter")]
    GetterOnly(String),
    #[error("Invalid array length")]
    InvalidArrayLength,
    #[error("Cannot assign to an empty path")]
    EmptyPath,
    #[error("{0} is not a function")]
    NotCallable(Path),
    #[error("{0} could not be cloned")]
    NotCloneable(&'static str),
    #[error("Converting circular structure at {0}")]
    Circular(Path),
    /// Error raised by a host function, getter or setter.
    #[error("{0}")]
    Thrown(String),
    #[error("No async runtime available; create the host inside a tokio runtime")]
    NoRuntime,
}

impl HostError {
    /// Error raised from host code.
    pub fn thrown(message: impl Into<String>) -> Self {
        Self::Thrown(message.into())
    }
}
