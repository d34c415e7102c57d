//! The tagged value universe.
//!
//! Every Teal value is immutable: list operations always return a new list,
//! never mutate one in place. [`Value`] is a closed sum — adding a tag means
//! touching every `match` in this crate and in `teal-processor`, which is the
//! point (see the dispatch note in the crate's design docs).

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A function identifier, foreign module name, or bound symbol name.
pub type Identifier = String;

/// An ordered, immutable sequence of values.
///
/// Represented as a `Vec` under the hood; every operator that
/// "returns a list" allocates a new one rather than mutating an existing
/// binding.
pub type List = Vec<Value>;

/// A pointer to a Teal function defined in the owning [`crate::Executable`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionPtr {
    pub identifier: Identifier,
}

impl fmt::Display for FunctionPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<function {}>", self.identifier)
    }
}

/// A pointer to a function resolved through the host's [`crate::executable`]
/// binding table, backed by a foreign module.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForeignPtr {
    pub identifier: Identifier,
    pub module: Identifier,
}

impl fmt::Display for ForeignPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<foreign {}.{}>", self.module, self.identifier)
    }
}

/// An opaque handle identifying a thread (and, equivalently, the future it
/// produces). Threads are never reused within a single controller lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ThreadId(pub u64);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// The tagged value universe: every value is immutable and every stack
/// slot holds exactly one of these tags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Int(i64),
    Float(f64),
    /// `true` and `false` are distinct tags, not a single `Bool(bool)` with
    /// an untagged boolean payload — this keeps the truthiness rule `JumpIf`
    /// relies on a plain tag match rather than a value comparison.
    True,
    False,
    Null,
    Symbol(Identifier),
    String(String),
    List(List),
    /// A quoted value: one level of evaluation has been suppressed.
    Quote(Box<Value>),
    FunctionPtr(FunctionPtr),
    ForeignPtr(ForeignPtr),
    FuturePtr(ThreadId),
    /// Resolved from the built-in table by `PushB`; never produced by a
    /// literal `PushV`. Carries only the operator name — arity comes from
    /// the `Call` site.
    InstructionToken(Identifier),
}

impl Default for Value {
    /// `null` is the closest thing the tagged universe has to a zero value
    /// — used by [`crate::value`]'s own conversions and by
    /// `teal-processor`'s `ForeignCallOutcome`, whose `value` field
    /// defaults to "nothing returned" rather than requiring every
    /// construction site to spell out `Value::Null`.
    fn default() -> Self {
        Value::Null
    }
}

impl Value {
    pub fn bool(b: bool) -> Value {
        if b { Value::True } else { Value::False }
    }

    /// Teal truthiness: everything except `false` and `null` is truthy,
    /// including `0` and the empty list.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::False | Value::Null)
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Value::List(_))
    }

    /// True iff the value is `null` or an empty list.
    pub fn is_null_ish(&self) -> bool {
        match self {
            Value::Null => true,
            Value::List(items) => items.is_empty(),
            _ => false,
        }
    }

    pub fn as_list(&self) -> Option<&List> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Recursively visits every leaf value reachable through nested lists.
    /// Used to detect futures hidden inside a composite value (`Wait`).
    pub fn traverse(&self, mut visit: impl FnMut(&Value)) {
        let mut queue: VecDeque<&Value> = VecDeque::new();
        queue.push_back(self);
        while let Some(v) = queue.pop_front() {
            if let Value::List(items) = v {
                for item in items {
                    queue.push_back(item);
                }
            } else {
                visit(v);
            }
        }
    }

    pub fn contains_future(&self) -> bool {
        let mut found = false;
        self.traverse(|v| {
            if matches!(v, Value::FuturePtr(_)) {
                found = true;
            }
        });
        found
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::True => write!(f, "true"),
            Value::False => write!(f, "false"),
            Value::Null => write!(f, "null"),
            Value::Symbol(s) => write!(f, "{s}"),
            Value::String(s) => write!(f, "{s}"),
            Value::List(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, ")")
            },
            Value::Quote(inner) => write!(f, "'{inner}"),
            Value::FunctionPtr(p) => write!(f, "{p}"),
            Value::ForeignPtr(p) => write!(f, "{p}"),
            Value::FuturePtr(id) => write!(f, "<future {id}>"),
            Value::InstructionToken(name) => write!(f, "<builtin {name}>"),
        }
    }
}

// HOST VALUE CONVERSION
// ================================================================================================
//
// The real host runtime's native value type is external to this crate;
// `serde_json::Value` stands in for it here so the adapter boundary is
// concrete enough to compile and test. A real integration swaps these two
// functions for conversions into its own host type.

/// Converts a tagged value to the stand-in host representation, used when
/// marshalling arguments into a foreign call.
pub fn to_host_value(value: &Value) -> serde_json::Value {
    match value {
        Value::Int(n) => serde_json::Value::from(*n),
        Value::Float(x) => serde_json::Value::from(*x),
        Value::True => serde_json::Value::Bool(true),
        Value::False => serde_json::Value::Bool(false),
        Value::Null => serde_json::Value::Null,
        Value::Symbol(s) | Value::String(s) => serde_json::Value::String(s.clone()),
        Value::List(items) => {
            serde_json::Value::Array(items.iter().map(to_host_value).collect())
        },
        Value::Quote(inner) => to_host_value(inner),
        Value::FunctionPtr(p) => serde_json::Value::String(p.identifier.clone()),
        Value::ForeignPtr(p) => serde_json::Value::String(p.identifier.clone()),
        Value::FuturePtr(id) => serde_json::Value::String(id.to_string()),
        Value::InstructionToken(name) => serde_json::Value::String(name.clone()),
    }
}

/// Converts the stand-in host representation back to a tagged value, used
/// when a foreign call's result is pushed back onto the data stack.
pub fn from_host_value(value: serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::bool(b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Float(n.as_f64().unwrap_or(0.0))
            }
        },
        serde_json::Value::String(s) => Value::String(s),
        serde_json::Value::Array(items) => {
            Value::List(items.into_iter().map(from_host_value).collect())
        },
        serde_json::Value::Object(_) => {
            // No structured-object tag in the Teal value universe; the
            // closest analogue is a list of values, which loses key names.
            // Embedders needing object fidelity should not route through
            // this stand-in conversion.
            Value::Null
        },
    }
}
