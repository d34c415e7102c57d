//! Errors owned by the core crate: malformed executables only. Runtime
//! dispatch errors belong to `teal-processor::errors`, which wraps these
//! with thread/instruction-pointer context, in `teal-processor`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::value::Identifier;

#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutableError {
    #[error("function `{0}` has no known code location")]
    UnknownLocation(Identifier),
}
