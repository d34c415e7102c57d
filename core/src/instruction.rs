//! Instructions: an opcode plus zero or more compile-time operands.
//!
//! Modelled as a tagged sum rather than a dynamically-dispatched object, so
//! the machine's dispatch `match` in `teal-processor` stays exhaustive —
//! adding an opcode here is a compile error everywhere it isn't handled.

use std::fmt;

use crate::value::{Identifier, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// Push a literal value.
    PushV(Value),
    /// Discard the top of the data stack.
    Pop,
    /// Peek the top value and bind it to a name, without popping.
    Bind(Identifier),
    /// Resolve a name (local -> executable -> built-in) and push the result.
    PushB(Identifier),
    /// Unconditional relative jump from the post-increment IP.
    Jump(i32),
    /// Pop; jump if the value is truthy.
    JumpIf(i32),
    /// Pop a callee and dispatch it (Teal function, foreign, or built-in).
    Call(u32),
    /// Pop a Teal function pointer and fork it onto a new thread.
    ACall(u32),
    /// Pop the current activation record and either resume the caller or
    /// terminate the thread.
    Return,
    /// Resolve (or suspend on) a future at the top of the data stack.
    Wait,
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::PushV(v) => write!(f, "PUSHV {v}"),
            Instruction::Pop => write!(f, "POP"),
            Instruction::Bind(name) => write!(f, "BIND {name}"),
            Instruction::PushB(name) => write!(f, "PUSHB {name}"),
            Instruction::Jump(offset) => write!(f, "JUMP {offset:+}"),
            Instruction::JumpIf(offset) => write!(f, "JUMPIF {offset:+}"),
            Instruction::Call(n) => write!(f, "CALL {n}"),
            Instruction::ACall(n) => write!(f, "ACALL {n}"),
            Instruction::Return => write!(f, "RETURN"),
            Instruction::Wait => write!(f, "WAIT"),
        }
    }
}
