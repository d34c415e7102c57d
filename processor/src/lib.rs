//! `teal-processor` — the execution engine around `teal-core`'s value and
//! executable types: per-thread [`State`](state::State), the shared
//! [`Controller`](controller::Controller), the fetch/decode/execute
//! [`Machine`](machine::Machine), and the `Invoker`/`ForeignResolver`/
//! `Probe` traits the VM calls out through.
//!
//! This crate is deliberately scheduler-free: nothing here decides *when*
//! a thread runs, only *what happens* once it does. An embedder supplies
//! the `Invoker`; `teal-vm` ships two reference implementations.

pub mod builtins;
pub mod controller;
pub mod errors;
pub mod execution_options;
pub mod foreign;
pub mod host;
pub mod machine;
pub mod state;

pub use controller::{ActivationRecord, ArecPtr, Controller, StoppedThread};
pub use errors::{ErrorKind, MachineError, OpError};
pub use execution_options::ExecutionOptions;
pub use foreign::{BUILTINS_MODULE, env_allows_builtin_import};
pub use host::{
    DefaultProbe, ForeignCallable, ForeignCallOutcome, ForeignResolver, Invoker, NoForeignResolver,
    Probe,
};
pub use machine::Machine;
pub use state::{State, StateSnapshot};
