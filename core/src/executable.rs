//! The immutable bundle of code, function entry points, and bindings a
//! controller loads to drive one or more machines. Read-only after
//! construction — think of it like a Lisp image: fire up a machine against
//! one, then evaluate.

use std::collections::HashMap;

use crate::errors::ExecutableError;
use crate::instruction::Instruction;
use crate::value::{Identifier, Value};

#[derive(Debug, Clone, Default)]
pub struct Executable {
    code: Vec<Instruction>,
    locations: HashMap<Identifier, usize>,
    /// Function pointers and foreign pointers produced by the compiler.
    /// Built-in operator names are never present here — they resolve only
    /// through `teal_core::builtins` instead.
    bindings: HashMap<Identifier, Value>,
}

impl Executable {
    pub fn new(
        code: Vec<Instruction>,
        locations: HashMap<Identifier, usize>,
        bindings: HashMap<Identifier, Value>,
    ) -> Self {
        Executable { code, locations, bindings }
    }

    pub fn code_at(&self, i: usize) -> Option<&Instruction> {
        self.code.get(i)
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    pub fn location_of(&self, identifier: &str) -> Result<usize, ExecutableError> {
        self.locations
            .get(identifier)
            .copied()
            .ok_or_else(|| ExecutableError::UnknownLocation(identifier.to_string()))
    }

    pub fn binding(&self, identifier: &str) -> Option<&Value> {
        self.bindings.get(identifier)
    }

    /// A human-readable listing, with a `;; name:` header at every index
    /// that is a registered function entry point.
    pub fn listing(&self) -> String {
        let mut entry_names: HashMap<usize, &Identifier> = HashMap::new();
        for (name, &idx) in &self.locations {
            entry_names.insert(idx, name);
        }

        let mut out = String::from(" /\n");
        for (i, instr) in self.code.iter().enumerate() {
            if let Some(name) = entry_names.get(&i) {
                out.push_str(&format!(" | ;; {name}:\n"));
            }
            out.push_str(&format!(" | {i:4} | {instr}\n"));
        }
        out.push_str(" \\\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::FunctionPtr;

    fn sample() -> Executable {
        let mut locations = HashMap::new();
        locations.insert("sq".to_string(), 10);
        let mut bindings = HashMap::new();
        bindings.insert(
            "sq".to_string(),
            Value::FunctionPtr(FunctionPtr { identifier: "sq".to_string() }),
        );
        Executable::new(vec![Instruction::Return], locations, bindings)
    }

    #[test]
    fn location_of_known_function() {
        assert_eq!(sample().location_of("sq"), Ok(10));
    }

    #[test]
    fn location_of_unknown_function_errors() {
        assert_eq!(
            sample().location_of("missing"),
            Err(ExecutableError::UnknownLocation("missing".to_string()))
        );
    }

    #[test]
    fn listing_has_a_header_at_entry_points() {
        let exe = sample();
        assert!(exe.listing().contains(";; sq:"));
    }
}
