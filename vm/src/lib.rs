//! `teal-vm` — thin facade over `teal-core` and `teal-processor`, re-exporting
//! both for embedders the way a top-level umbrella crate re-exports its
//! constituent pieces. No CLI binary lives here — driving the VM as a
//! standalone program is out of scope here — just the re-exports and the two
//! reference [`Invoker`](teal_processor::Invoker) implementations an embedder
//! needs to get a `Controller` running.

pub mod invoker;

pub use invoker::{InlineInvoker, ThreadPoolInvoker};
pub use teal_core::{
    Arity, BuiltinOp, Executable, ExecutableError, ForeignPtr, FunctionPtr, Identifier,
    Instruction, List, ThreadId, Value,
};
pub use teal_processor::{
    ActivationRecord, ArecPtr, Controller, DefaultProbe, ErrorKind, ExecutionOptions,
    ForeignCallOutcome, ForeignCallable, ForeignResolver, MachineError, NoForeignResolver, OpError,
    Probe, State, StateSnapshot, StoppedThread,
};
