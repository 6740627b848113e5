use std::fmt;

use crate::obj::table::{InvalidNextKey, KeyError};
use crate::val::Value;

/// Coarse status of a failed operation, as reported to hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorStatus {
    Runtime,
    Syntax,
    Memory,
    /// A `__gc` finalizer raised an error.
    GcMetamethod,
    /// An error was raised while an error was being handled.
    ErrorInHandler,
}

/// Error raised by runtime operations. Every fallible entry point returns
/// one of these; protected calls turn them into an error value on the stack.
#[derive(Debug, Clone)]
pub enum RuntimeError {
    /// Raised by script code with an arbitrary error value.
    Raised(Value),
    /// Runtime error with a message.
    Message(String),
    /// Malformed input handed to a loader.
    Syntax(String),
    /// Rejected table key.
    Key(KeyError),
    /// The allocator refused a request, even after an emergency collection.
    Memory,
    StackOverflow,
    ErrorInHandler,
    /// Error raised by a finalizer, wrapped so hosts can tell it apart.
    Finalizer(Box<RuntimeError>),
    /// The runtime hit an unprotected error and can no longer be used.
    Unusable,
}

impl RuntimeError {
    pub fn message(msg: impl Into<String>) -> Self {
        RuntimeError::Message(msg.into())
    }

    pub fn status(&self) -> ErrorStatus {
        match self {
            RuntimeError::Raised(_)
            | RuntimeError::Message(_)
            | RuntimeError::Key(_)
            | RuntimeError::StackOverflow
            | RuntimeError::Unusable => ErrorStatus::Runtime,
            RuntimeError::Syntax(_) => ErrorStatus::Syntax,
            RuntimeError::Memory => ErrorStatus::Memory,
            RuntimeError::Finalizer(_) => ErrorStatus::GcMetamethod,
            RuntimeError::ErrorInHandler => ErrorStatus::ErrorInHandler,
        }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::Raised(v) => write!(f, "error object is a {} value", v.type_name()),
            RuntimeError::Message(msg) | RuntimeError::Syntax(msg) => write!(f, "{msg}"),
            RuntimeError::Key(e) => write!(f, "{e}"),
            RuntimeError::Memory => write!(f, "not enough memory"),
            RuntimeError::StackOverflow => write!(f, "stack overflow"),
            RuntimeError::ErrorInHandler => write!(f, "error in error handling"),
            RuntimeError::Finalizer(inner) => write!(f, "error in __gc metamethod ({inner})"),
            RuntimeError::Unusable => write!(f, "runtime is unusable after an unprotected error"),
        }
    }
}

impl std::error::Error for RuntimeError {}

impl From<KeyError> for RuntimeError {
    fn from(e: KeyError) -> Self {
        RuntimeError::Key(e)
    }
}

impl From<InvalidNextKey> for RuntimeError {
    fn from(e: InvalidNextKey) -> Self {
        RuntimeError::Message(e.to_string())
    }
}
