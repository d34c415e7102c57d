//! # Error architecture
//!
//! Two tiers, the way `miden-processor` splits `OperationError` from
//! `ExecutionError`: operations raise a context-free [`OpError`] — no
//! thread id, no instruction pointer, just the mismatch itself — and the
//! dispatch loop in [`crate::machine`] wraps it with that context into a
//! [`MachineError`] before handing it to the controller.
//!
//! Classification into the five kinds (`CompileTimeShouldHaveCaught`,
//! `TypeMismatch`, `ForeignError`, `UnhandledError`, `Unexpected`) happens at
//! the same boundary, via [`OpError::kind`]. Only `ForeignError` and
//! `UnhandledError` get a dedicated controller recording path
//! (`foreign_error` / `teal_error`); every other kind is recorded through
//! `unexpected_error`, matching the reference machine's generic
//! `except Exception` fallback.

use std::fmt;

use serde::{Deserialize, Serialize};
use teal_core::{ExecutableError, Identifier, ThreadId};
use thiserror::Error;

/// Which of the five categories an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// "Should be a compile-time check" in the reference implementation:
    /// stack underflow, unknown name, non-callable, unknown function
    /// location, out-of-bounds instruction pointer.
    CompileTimeShouldHaveCaught,
    TypeMismatch,
    ForeignError,
    UnhandledError,
    Unexpected,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::CompileTimeShouldHaveCaught => "compile-time-should-have-caught",
            ErrorKind::TypeMismatch => "type-mismatch",
            ErrorKind::ForeignError => "foreign-error",
            ErrorKind::UnhandledError => "unhandled-error",
            ErrorKind::Unexpected => "unexpected",
        };
        write!(f, "{s}")
    }
}

/// Context-free error raised by a single operation or state access.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum OpError {
    #[error("instruction pointer {ip} is out of bounds (code length {len})")]
    IpOutOfBounds { ip: usize, len: usize },
    #[error("stack underflow")]
    StackUnderflow,
    #[error("expected a {expected} value, got {got}")]
    TypeMismatch { expected: String, got: String },
    #[error("'{0}' is not defined")]
    NameError(Identifier),
    #[error("don't know how to call {0}")]
    NotCallable(String),
    #[error("{0}")]
    UnknownLocation(#[from] ExecutableError),
    #[error("function `{0}` is not a Teal function pointer")]
    NotAFunctionPointer(String),
    #[error("waiting on a list that contains futures")]
    WaitOnCompositeFutures,
    #[error("foreign call failed: {0}")]
    Foreign(String),
    #[error("no foreign resolver registered for module `{0}`")]
    UnknownForeignModule(Identifier),
    #[error("{0}")]
    Unhandled(String),
    #[error("{0}")]
    Other(String),
}

impl OpError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OpError::IpOutOfBounds { .. }
            | OpError::StackUnderflow
            | OpError::NameError(_)
            | OpError::NotCallable(_)
            | OpError::UnknownLocation(_)
            | OpError::NotAFunctionPointer(_) => ErrorKind::CompileTimeShouldHaveCaught,
            OpError::TypeMismatch { .. } | OpError::WaitOnCompositeFutures => {
                ErrorKind::TypeMismatch
            },
            OpError::Foreign(_) | OpError::UnknownForeignModule(_) => ErrorKind::ForeignError,
            OpError::Unhandled(_) => ErrorKind::UnhandledError,
            OpError::Other(_) => ErrorKind::Unexpected,
        }
    }
}

/// The error recorded against a thread: an [`OpError`] plus the thread id
/// and instruction pointer at which it escaped dispatch.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("thread {thread} at ip {ip}: {source}")]
pub struct MachineError {
    pub thread: ThreadId,
    pub ip: usize,
    #[source]
    pub source: OpError,
}

impl MachineError {
    pub fn new(thread: ThreadId, ip: usize, source: OpError) -> Self {
        MachineError { thread, ip, source }
    }

    pub fn kind(&self) -> ErrorKind {
        self.source.kind()
    }
}
