//! The closed built-in operator table.
//!
//! Built-in names are resolved by `PushB` only after the local and
//! executable binding namespaces have been checked — this module
//! never participates in that precedence itself, it just answers "is this
//! name a built-in, and with what arity".

use std::fmt;

use crate::value::Identifier;

/// How many operands a built-in consumes.
///
/// `list` is the only variadic operator: the operand count comes from the
/// `Call`/synthesised-instruction site rather than from this table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Fixed(u32),
    Variadic,
}

/// One entry of the built-in operator table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinOp {
    Eq,
    GreaterThan,
    LessThan,
    Plus,
    Multiply,
    List,
    Conc,
    Append,
    First,
    Rest,
    Nth,
    Atomp,
    Nullp,
    ParseFloat,
    Print,
    Sleep,
    Signal,
    Wait,
}

impl BuiltinOp {
    pub fn arity(self) -> Arity {
        use BuiltinOp::*;
        match self {
            Eq | GreaterThan | LessThan | Plus | Multiply | Conc | Append | Nth => Arity::Fixed(2),
            First | Rest | Atomp | Nullp | ParseFloat | Print | Sleep | Wait => Arity::Fixed(1),
            Signal => Arity::Fixed(2),
            List => Arity::Variadic,
        }
    }

    pub fn name(self) -> &'static str {
        use BuiltinOp::*;
        match self {
            Eq => "==",
            GreaterThan => ">",
            LessThan => "<",
            Plus => "+",
            Multiply => "*",
            List => "list",
            Conc => "conc",
            Append => "append",
            First => "first",
            Rest => "rest",
            Nth => "nth",
            Atomp => "atomp",
            Nullp => "nullp",
            ParseFloat => "parse_float",
            Print => "print",
            Sleep => "sleep",
            Signal => "signal",
            Wait => "wait",
        }
    }

    /// Resolves a built-in by name, the lookup `PushB` falls back to once
    /// local bindings and executable bindings have both missed.
    pub fn by_name(name: &str) -> Option<BuiltinOp> {
        use BuiltinOp::*;
        Some(match name {
            "==" => Eq,
            ">" => GreaterThan,
            "<" => LessThan,
            "+" => Plus,
            "*" => Multiply,
            "list" => List,
            "conc" => Conc,
            "append" => Append,
            "first" => First,
            "rest" => Rest,
            "nth" => Nth,
            "atomp" => Atomp,
            "nullp" => Nullp,
            "parse_float" => ParseFloat,
            "print" => Print,
            "sleep" => Sleep,
            "signal" => Signal,
            "wait" => Wait,
            _ => return None,
        })
    }
}

impl fmt::Display for BuiltinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Looks up a built-in by the identifier resolved through `PushB`.
pub fn lookup(name: &Identifier) -> Option<BuiltinOp> {
    BuiltinOp::by_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_builtin_round_trips_through_its_name() {
        let all = [
            BuiltinOp::Eq,
            BuiltinOp::GreaterThan,
            BuiltinOp::LessThan,
            BuiltinOp::Plus,
            BuiltinOp::Multiply,
            BuiltinOp::List,
            BuiltinOp::Conc,
            BuiltinOp::Append,
            BuiltinOp::First,
            BuiltinOp::Rest,
            BuiltinOp::Nth,
            BuiltinOp::Atomp,
            BuiltinOp::Nullp,
            BuiltinOp::ParseFloat,
            BuiltinOp::Print,
            BuiltinOp::Sleep,
            BuiltinOp::Signal,
            BuiltinOp::Wait,
        ];
        for op in all {
            assert_eq!(BuiltinOp::by_name(op.name()), Some(op));
        }
    }

    #[test]
    fn unknown_name_does_not_resolve() {
        assert_eq!(BuiltinOp::by_name("not-a-builtin"), None);
    }

    #[test]
    fn list_is_the_only_variadic_builtin() {
        assert_eq!(BuiltinOp::List.arity(), Arity::Variadic);
        assert_eq!(BuiltinOp::Plus.arity(), Arity::Fixed(2));
    }
}
