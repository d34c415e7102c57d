//! Small helpers shared by [`crate::host::ForeignResolver`] implementations.
//!
//! The `__builtins__` module name is reserved for privileged access to the
//! host runtime's own standard library. The core never resolves it itself;
//! this helper exists so an embedder's resolver can honor the same
//! environment-gated convention the reference runtime uses rather than
//! inventing its own.

use std::env;

pub const BUILTINS_MODULE: &str = "__builtins__";
const ENABLE_IMPORT_BUILTIN: &str = "ENABLE_IMPORT_BUILTIN";

/// True if the `ENABLE_IMPORT_BUILTIN` environment variable is set to a
/// truthy value (anything other than empty, `"0"`, or `"false"`,
/// case-insensitive).
pub fn env_allows_builtin_import() -> bool {
    match env::var(ENABLE_IMPORT_BUILTIN) {
        Ok(value) => {
            let value = value.trim().to_ascii_lowercase();
            !(value.is_empty() || value == "0" || value == "false")
        },
        Err(_) => false,
    }
}
