//! Per-thread state: instruction pointer, data stack, local bindings, the
//! current activation-record pointer, and the stopped flag.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use teal_core::{Identifier, Value};

use crate::controller::ArecPtr;
use crate::errors::{MachineError, OpError};

/// Data local and specific to a particular thread.
#[derive(Debug, Clone)]
pub struct State {
    ip: usize,
    ds: Vec<Value>,
    bindings: HashMap<Identifier, Value>,
    stopped: bool,
    current_arec: Option<ArecPtr>,
    error: Option<MachineError>,
}

impl State {
    /// A fresh thread state whose data stack is preloaded with `args`, in
    /// the order the callee expects to pop them (last element on top).
    pub fn new(args: Vec<Value>) -> Self {
        State {
            ip: 0,
            ds: args,
            bindings: HashMap::new(),
            stopped: false,
            current_arec: None,
            error: None,
        }
    }

    pub fn ip(&self) -> usize {
        self.ip
    }

    pub fn set_ip(&mut self, ip: usize) {
        self.ip = ip;
    }

    pub fn advance_ip(&mut self) {
        self.ip += 1;
    }

    pub fn stopped(&self) -> bool {
        self.stopped
    }

    pub fn set_stopped(&mut self, stopped: bool) {
        self.stopped = stopped;
    }

    pub fn current_arec(&self) -> Option<ArecPtr> {
        self.current_arec
    }

    pub fn set_current_arec(&mut self, arec: Option<ArecPtr>) {
        self.current_arec = arec;
    }

    pub fn bindings(&self) -> &HashMap<Identifier, Value> {
        &self.bindings
    }

    pub fn bind(&mut self, name: Identifier, value: Value) {
        self.bindings.insert(name, value);
    }

    pub fn set_bindings(&mut self, bindings: HashMap<Identifier, Value>) {
        self.bindings = bindings;
    }

    pub fn error(&self) -> Option<&MachineError> {
        self.error.as_ref()
    }

    pub fn set_error(&mut self, error: MachineError) {
        self.error = Some(error);
    }

    pub fn depth(&self) -> usize {
        self.ds.len()
    }

    /// Every item pushed onto the data stack is already a [`Value`] by
    /// construction (I1) — Rust's type system enforces this statically, so
    /// unlike the reference implementation's runtime `isinstance` check,
    /// `push` cannot fail.
    pub fn push(&mut self, value: Value) {
        self.ds.push(value);
    }

    pub fn pop(&mut self) -> Result<Value, OpError> {
        self.ds.pop().ok_or(OpError::StackUnderflow)
    }

    /// Peeks the value `offset` slots from the top (0 = top).
    pub fn peek(&self, offset: usize) -> Result<&Value, OpError> {
        let len = self.ds.len();
        if offset >= len {
            return Err(OpError::StackUnderflow);
        }
        Ok(&self.ds[len - 1 - offset])
    }

    pub fn set(&mut self, offset: usize, value: Value) -> Result<(), OpError> {
        let len = self.ds.len();
        if offset >= len {
            return Err(OpError::StackUnderflow);
        }
        let idx = len - 1 - offset;
        self.ds[idx] = value;
        Ok(())
    }

    pub fn to_snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            ip: self.ip,
            stopped: self.stopped,
            ds: self.ds.clone(),
            bindings: self.bindings.clone(),
            error: self.error.clone(),
            current_arec_ptr: self.current_arec.map(|p| p.0),
            // Stack-trace reconstruction is reserved, not implemented.
            traceback: None,
        }
    }

    pub fn from_snapshot(snapshot: StateSnapshot) -> Self {
        State {
            ip: snapshot.ip,
            stopped: snapshot.stopped,
            ds: snapshot.ds,
            bindings: snapshot.bindings,
            current_arec: snapshot.current_arec_ptr.map(ArecPtr),
            error: snapshot.error,
        }
    }
}

/// The wire format: `{ip, stopped, ds, bindings, error,
/// current_arec_ptr, traceback}`. `error` is carried structurally as the
/// live [`MachineError`] so the round trip is exact, per spec.md's
/// "deserialisation is the inverse" requirement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub ip: usize,
    pub stopped: bool,
    pub ds: Vec<Value>,
    pub bindings: HashMap<Identifier, Value>,
    pub error: Option<MachineError>,
    pub current_arec_ptr: Option<u64>,
    pub traceback: Option<String>,
}

impl PartialEq for StateSnapshot {
    fn eq(&self, other: &Self) -> bool {
        self.ip == other.ip
            && self.stopped == other.stopped
            && self.ds == other.ds
            && self.bindings == other.bindings
            && self.error == other.error
            && self.current_arec_ptr == other.current_arec_ptr
            && self.traceback == other.traceback
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_balanced_depth() {
        let mut state = State::new(vec![]);
        let depth_before = state.depth();
        state.push(Value::Int(1));
        state.push(Value::Int(2));
        state.pop().unwrap();
        state.pop().unwrap();
        assert_eq!(state.depth(), depth_before);
    }

    #[test]
    fn pop_on_empty_stack_underflows() {
        let mut state = State::new(vec![]);
        assert!(matches!(state.pop(), Err(OpError::StackUnderflow)));
    }

    #[test]
    fn peek_zero_is_top() {
        let mut state = State::new(vec![]);
        state.push(Value::Int(1));
        state.push(Value::Int(2));
        assert_eq!(state.peek(0).unwrap(), &Value::Int(2));
        assert_eq!(state.peek(1).unwrap(), &Value::Int(1));
    }

    #[test]
    fn serialise_round_trip_is_exact() {
        let mut state = State::new(vec![Value::Int(1)]);
        state.push(Value::Symbol("x".into()));
        state.bind("y".into(), Value::Int(5));
        state.set_ip(3);
        state.set_current_arec(Some(ArecPtr(42)));

        let snapshot = state.to_snapshot();
        let json = serde_json::to_string(&snapshot).unwrap();
        let back: StateSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(snapshot, back);

        let restored = State::from_snapshot(back);
        assert_eq!(restored.to_snapshot(), state.to_snapshot());
    }

    #[test]
    fn serialise_round_trip_preserves_a_terminal_error() {
        use teal_core::ThreadId;

        let mut state = State::new(vec![]);
        state.set_error(MachineError::new(ThreadId(0), 7, OpError::StackUnderflow));
        state.set_stopped(true);

        let snapshot = state.to_snapshot();
        assert!(snapshot.error.is_some());

        let json = serde_json::to_string(&snapshot).unwrap();
        let back: StateSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(snapshot, back);

        let restored = State::from_snapshot(back);
        assert_eq!(restored.error(), state.error());
        assert_eq!(restored.to_snapshot(), state.to_snapshot());
    }
}
