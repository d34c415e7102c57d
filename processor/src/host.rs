//! The three external interfaces: the Invoker the VM calls out to for
//! scheduling, the Foreign Resolver it calls out to for foreign calls, and
//! the Probe it calls into for observability. All three are consumed
//! traits — the core never assumes a concrete implementation, the way
//! `miden-processor`'s `Host` trait abstracts over what actually backs
//! advice/event/debug handling.

use std::fmt;

use teal_core::{Instruction, ThreadId, Value};

use crate::errors::OpError;

/// Schedules a thread's machine to run. `invoke` must eventually result in
/// exactly one `Machine::run` call per invocation; it is idempotent under
/// "already scheduled" (the core never calls it twice expecting two runs
/// for the same pending invocation).
pub trait Invoker: Send + Sync {
    fn invoke(&self, thread_id: ThreadId);
}

/// The result of a foreign call: the tagged return value, plus whatever
/// text the callable wants forwarded to the controller's stdout sink.
///
/// The reference machine achieves this by swapping `sys.stdout` for the
/// duration of the call — a process-global side effect the design notes
/// flag as unsafe to do across concurrently-running threads in one
/// process. This return-channel shape gets the same externally-observable
/// behaviour (captured output forwarded to `write_stdout`, in call order)
/// without a global mutable swap.
#[derive(Debug, Clone, Default)]
pub struct ForeignCallOutcome {
    pub value: Value,
    pub captured_stdout: String,
}

/// An opaque callable resolved from a foreign binding.
pub trait ForeignCallable: Send + Sync {
    fn call(&self, args: &[Value]) -> Result<ForeignCallOutcome, String>;
}

/// Maps a foreign binding (identifier + module name) to an opaque callable.
///
/// `module == "__builtins__"` is privileged and gated by the
/// `ENABLE_IMPORT_BUILTIN` environment flag at the embedder's discretion —
/// the core itself does not special-case the module name; see
/// [`crate::foreign::env_allows_builtin_import`].
pub trait ForeignResolver: Send + Sync {
    fn resolve(
        &self,
        identifier: &str,
        module: &str,
    ) -> Result<Box<dyn ForeignCallable>, OpError>;
}

/// A resolver with nothing registered. The real host-runtime module loader
/// is an external collaborator; this exists so a `Controller` can be
/// constructed before an embedder has wired one up.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoForeignResolver;

impl ForeignResolver for NoForeignResolver {
    fn resolve(&self, identifier: &str, module: &str) -> Result<Box<dyn ForeignCallable>, OpError> {
        Err(OpError::UnknownForeignModule(format!("{module}.{identifier}")))
    }
}

/// A passive observer attached to a machine, for logging and step-budget
/// enforcement. `on_step` returning `true` forces the machine to halt after
/// the current instruction completes (a probe-halt, not an error).
pub trait Probe: Send {
    fn on_run(&mut self) {}
    fn on_enter(&mut self, _fn_name: &str) {}
    fn on_return(&mut self) {}
    fn on_step(&mut self, _ip: usize, _instr: &Instruction) -> bool {
        false
    }
    fn on_stopped(&mut self) {}
    fn log(&mut self, _text: &str) {}
    /// Drains whatever log this probe has accumulated, for persisting
    /// alongside a stopped thread's final snapshot. The default probe
    /// (nothing) returns an empty log.
    fn take_log(&mut self) -> Vec<String> {
        Vec::new()
    }
}

/// The default probe: counts steps, logs to an in-memory buffer, and force
/// stops once `max_steps` is reached — the exact behaviour of the
/// reference implementation's `Probe(max_steps=500)`.
pub struct DefaultProbe {
    name: String,
    max_steps: Option<u32>,
    steps: u32,
    logs: Vec<String>,
    early_stop: bool,
}

impl DefaultProbe {
    pub fn new(name: impl Into<String>, max_steps: Option<u32>) -> Self {
        DefaultProbe { name: name.into(), max_steps, steps: 0, logs: Vec::new(), early_stop: false }
    }

    pub fn logs(&self) -> &[String] {
        &self.logs
    }

    pub fn early_stop(&self) -> bool {
        self.early_stop
    }

    pub fn steps(&self) -> u32 {
        self.steps
    }
}

impl Probe for DefaultProbe {
    fn on_enter(&mut self, fn_name: &str) {
        self.log(&format!("===> {fn_name}"));
    }

    fn on_return(&mut self) {
        self.log("<===");
    }

    fn on_step(&mut self, ip: usize, instr: &Instruction) -> bool {
        self.steps += 1;
        self.log(&format!("[step={}, ip={ip}] {instr}", self.steps));
        match self.max_steps {
            Some(max) if self.steps >= max => {
                self.log(&format!("MAX STEPS ({max}) REACHED!!"));
                self.early_stop = true;
                true
            },
            _ => false,
        }
    }

    fn on_stopped(&mut self) {
        let kind = if self.early_stop { "Stopped" } else { "Terminated" };
        self.log(&format!("{kind} after {} steps.", self.steps));
    }

    fn log(&mut self, text: &str) {
        self.logs.push(format!("*** <{}> {text}", self.name));
    }
}

impl fmt::Debug for DefaultProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultProbe")
            .field("name", &self.name)
            .field("steps", &self.steps)
            .field("early_stop", &self.early_stop)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_probe_halts_at_max_steps() {
        let mut probe = DefaultProbe::new("P1", Some(2));
        assert!(!probe.on_step(0, &Instruction::Pop));
        assert!(probe.on_step(1, &Instruction::Pop));
        assert!(probe.early_stop());
    }

    #[test]
    fn unlimited_probe_never_halts() {
        let mut probe = DefaultProbe::new("P1", None);
        for ip in 0..1000 {
            assert!(!probe.on_step(ip, &Instruction::Pop));
        }
    }
}
