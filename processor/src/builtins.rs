//! Execution semantics for the closed built-in operator table.
//!
//! Name resolution and arity live in `teal_core::builtins`; this module is
//! the dispatch target once [`crate::machine::Machine`] knows which
//! [`BuiltinOp`] it's running. The four operators that peek rather than pop
//! (`print`, `sleep`, `signal`, `wait`) need direct access to the thread's
//! `State`/`Controller` and are handled inline in `machine`; every other
//! operator is a pure function of its popped operands and lives here.

use teal_core::{BuiltinOp, Value};

use crate::errors::OpError;

/// Converts a numeric value to `f64`. `>`, `<`, `+`, `*`, `sleep`, and
/// `parse_float` all bottom out here.
pub fn as_number(value: &Value) -> Result<f64, OpError> {
    match value {
        Value::Int(n) => Ok(*n as f64),
        Value::Float(x) => Ok(*x),
        other => Err(OpError::TypeMismatch { expected: "number".to_string(), got: tag(other) }),
    }
}

fn tag(value: &Value) -> String {
    match value {
        Value::Int(_) => "int",
        Value::Float(_) => "float",
        Value::True | Value::False => "bool",
        Value::Null => "null",
        Value::Symbol(_) => "symbol",
        Value::String(_) => "string",
        Value::List(_) => "list",
        Value::Quote(_) => "quote",
        Value::FunctionPtr(_) => "function",
        Value::ForeignPtr(_) => "foreign",
        Value::FuturePtr(_) => "future",
        Value::InstructionToken(_) => "instruction-token",
    }
    .to_string()
}

fn require_list(value: Value) -> Result<Vec<Value>, OpError> {
    match value {
        Value::List(items) => Ok(items),
        other => Err(OpError::TypeMismatch { expected: "list".to_string(), got: tag(&other) }),
    }
}

fn one(mut args: Vec<Value>) -> Result<Value, OpError> {
    args.pop().ok_or(OpError::StackUnderflow)
}

/// Splits a two-operand pop sequence into `(b, a)` — `b` was popped first
/// (it was on top), `a` second.
fn two(args: Vec<Value>) -> Result<(Value, Value), OpError> {
    let mut it = args.into_iter();
    let b = it.next().ok_or(OpError::StackUnderflow)?;
    let a = it.next().ok_or(OpError::StackUnderflow)?;
    Ok((b, a))
}

fn numeric_op(
    a: Value,
    b: Value,
    int_op: impl Fn(i64, i64) -> i64,
    float_op: impl Fn(f64, f64) -> f64,
) -> Result<Value, OpError> {
    match (&a, &b) {
        (Value::Int(x), Value::Int(y)) => Ok(Value::Int(int_op(*x, *y))),
        _ => Ok(Value::Float(float_op(as_number(&a)?, as_number(&b)?))),
    }
}

/// Applies a pure (pop-based) built-in to its already-popped operands.
///
/// `args` is in pop order: `args[0]` is the value that was on top of the
/// stack. `Print`, `Sleep`, `Signal`, and `Wait` are peek-based and never
/// reach this function — the machine dispatches them directly.
pub fn apply(op: BuiltinOp, mut args: Vec<Value>) -> Result<Value, OpError> {
    use BuiltinOp::*;
    match op {
        Eq => {
            let (b, a) = two(args)?;
            Ok(Value::bool(a == b))
        },
        GreaterThan => {
            // `two` returns (b, a) with b on top of the stack (popped
            // first); the original machine pops its own `a` first, so this
            // code's `b` plays that role: `b > a`.
            let (b, a) = two(args)?;
            Ok(Value::bool(as_number(&b)? > as_number(&a)?))
        },
        LessThan => {
            let (b, a) = two(args)?;
            Ok(Value::bool(as_number(&b)? < as_number(&a)?))
        },
        Plus => {
            let (b, a) = two(args)?;
            numeric_op(a, b, |x, y| x + y, |x, y| x + y)
        },
        Multiply => {
            let (b, a) = two(args)?;
            numeric_op(a, b, |x, y| x * y, |x, y| x * y)
        },
        List => {
            // `args` is in pop order (top first); the documented result is
            // in push order, i.e. the reverse.
            args.reverse();
            Ok(Value::List(args))
        },
        Conc => {
            let (b, a) = two(args)?;
            let b_list = if matches!(b, Value::Null) { Vec::new() } else { require_list(b)? };
            let items = if a.is_list() {
                let mut items = require_list(a)?;
                items.extend(b_list);
                items
            } else {
                let mut items = vec![a];
                items.extend(b_list);
                items
            };
            Ok(Value::List(items))
        },
        Append => {
            let (b, a) = two(args)?;
            let mut items = if matches!(a, Value::Null) { Vec::new() } else { require_list(a)? };
            items.push(b);
            Ok(Value::List(items))
        },
        First => {
            let items = require_list(one(args)?)?;
            items.into_iter().next().ok_or_else(|| OpError::Other("first of an empty list".into()))
        },
        Rest => {
            let mut items = require_list(one(args)?)?;
            if items.is_empty() {
                Ok(Value::List(items))
            } else {
                Ok(Value::List(items.split_off(1)))
            }
        },
        Nth => {
            let (idx, list) = two(args)?;
            let items = require_list(list)?;
            let i = as_number(&idx)? as usize;
            items.into_iter().nth(i).ok_or_else(|| OpError::Other(format!("index {i} out of range")))
        },
        Atomp => Ok(Value::bool(!one(args)?.is_list())),
        Nullp => Ok(Value::bool(one(args)?.is_null_ish())),
        ParseFloat => match one(args)? {
            Value::Int(n) => Ok(Value::Float(n as f64)),
            Value::Float(x) => Ok(Value::Float(x)),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| OpError::TypeMismatch { expected: "numeric string".to_string(), got: s }),
            other => Err(OpError::TypeMismatch { expected: "number or string".to_string(), got: tag(&other) }),
        },
        Print | Sleep | Signal | Wait => {
            unreachable!("{op} is peek-based and dispatched directly by the machine")
        },
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[test]
    fn plus_is_float_if_either_operand_is() {
        let result = apply(BuiltinOp::Plus, vec![Value::Float(1.5), Value::Int(3)]).unwrap();
        assert_eq!(result, Value::Float(4.5));
    }

    #[test]
    fn plus_stays_int_when_both_are() {
        let result = apply(BuiltinOp::Plus, vec![Value::Int(4), Value::Int(3)]).unwrap();
        assert_eq!(result, Value::Int(7));
    }

    #[test]
    fn greater_than_matches_source_operand_order() {
        // `PushV 3; PushV 4; PushB ">"; Call(2)` pops 4 then 3 (pop order),
        // and the original machine's `a > b` with `a` = its own first pop
        // (this code's `b` = 4) means the result is `4 > 3` = true.
        let result = apply(BuiltinOp::GreaterThan, vec![Value::Int(4), Value::Int(3)]).unwrap();
        assert_eq!(result, Value::True);
        let result = apply(BuiltinOp::GreaterThan, vec![Value::Int(3), Value::Int(4)]).unwrap();
        assert_eq!(result, Value::False);
    }

    #[test]
    fn less_than_matches_source_operand_order() {
        let result = apply(BuiltinOp::LessThan, vec![Value::Int(3), Value::Int(4)]).unwrap();
        assert_eq!(result, Value::True);
        let result = apply(BuiltinOp::LessThan, vec![Value::Int(4), Value::Int(3)]).unwrap();
        assert_eq!(result, Value::False);
    }

    #[rstest]
    #[case(Value::Null, vec![])]
    #[case(Value::List(vec![Value::Int(2)]), vec![Value::Int(2)])]
    fn conc_coerces_null_b_to_empty_list(#[case] b: Value, #[case] expected_tail: Vec<Value>) {
        let result = apply(BuiltinOp::Conc, vec![b, Value::List(vec![Value::Int(1)])]).unwrap();
        let mut expected = vec![Value::Int(1)];
        expected.extend(expected_tail);
        assert_eq!(result, Value::List(expected));
    }

    #[test]
    fn conc_wraps_non_list_a_as_singleton() {
        let result = apply(BuiltinOp::Conc, vec![Value::List(vec![Value::Int(2)]), Value::Int(1)]).unwrap();
        assert_eq!(result, Value::List(vec![Value::Int(1), Value::Int(2)]));
    }

    #[test]
    fn append_requires_a_list_unless_null() {
        let err = apply(BuiltinOp::Append, vec![Value::Int(1), Value::Int(2)]).unwrap_err();
        assert!(matches!(err, OpError::TypeMismatch { .. }));

        let ok = apply(BuiltinOp::Append, vec![Value::Int(1), Value::Null]).unwrap();
        assert_eq!(ok, Value::List(vec![Value::Int(1)]));
    }

    #[test]
    fn first_rest_round_trip_reconstructs_the_list() {
        let list = Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        let first = apply(BuiltinOp::First, vec![list.clone()]).unwrap();
        let rest = apply(BuiltinOp::Rest, vec![list.clone()]).unwrap();
        let rebuilt = apply(BuiltinOp::Conc, vec![rest, first.clone()]).unwrap();
        assert_eq!(rebuilt, list);
    }

    #[test]
    fn list_restores_push_order() {
        // Pop order is 3, 2, 1 (3 was pushed last); push-order result is [1, 2, 3].
        let result = apply(BuiltinOp::List, vec![Value::Int(3), Value::Int(2), Value::Int(1)]).unwrap();
        assert_eq!(result, Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)]));
    }

    #[test]
    fn nullp_is_true_for_null_and_empty_list() {
        assert_eq!(apply(BuiltinOp::Nullp, vec![Value::Null]).unwrap(), Value::True);
        assert_eq!(apply(BuiltinOp::Nullp, vec![Value::List(vec![])]).unwrap(), Value::True);
        assert_eq!(apply(BuiltinOp::Nullp, vec![Value::Int(0)]).unwrap(), Value::False);
    }

    #[test]
    fn parse_float_accepts_numeric_strings() {
        let result = apply(BuiltinOp::ParseFloat, vec![Value::String("3.5".into())]).unwrap();
        assert_eq!(result, Value::Float(3.5));
    }
}
