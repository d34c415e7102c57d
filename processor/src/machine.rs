//! The fetch/decode/execute loop — the component that actually runs
//! a thread. A [`Machine`] is bound to one [`ThreadId`]; it reads code and
//! bindings from the controller's [`teal_core::Executable`], mutates only
//! that thread's [`crate::state::State`], and calls out to the
//! [`Controller`] for every cross-thread effect (forking, waiting,
//! returning, publishing, stdout).
//!
//! Dispatch is a single exhaustive `match` over [`Instruction`] — adding an
//! opcode to `teal-core` is a compile error here until this match is
//! updated, by design.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use teal_core::{ForeignPtr, FunctionPtr, Instruction, ThreadId, Value};

use crate::builtins;
use crate::controller::{ActivationRecord, Controller};
use crate::errors::OpError;
use crate::host::{ForeignResolver, Invoker, NoForeignResolver, Probe};

/// Binds a runnable fetch/decode/execute loop to one thread. Cheap to
/// construct; the invoker typically builds one per `invoke` call, or keeps
/// a small pool keyed by thread id — the state it touches all lives behind
/// the shared [`Controller`], not on `self`.
pub struct Machine {
    thread_id: ThreadId,
    controller: Arc<Controller>,
    invoker: Arc<dyn Invoker>,
    resolver: Arc<dyn ForeignResolver>,
}

impl Machine {
    pub fn new(thread_id: ThreadId, controller: Arc<Controller>, invoker: Arc<dyn Invoker>) -> Self {
        Machine { thread_id, controller, invoker, resolver: Arc::new(NoForeignResolver) }
    }

    pub fn with_foreign_resolver(mut self, resolver: Arc<dyn ForeignResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    /// Runs instructions until the thread stops, either by terminal
    /// `Return`, an unresolved `Wait`, a classified error, or a
    /// probe-forced halt.
    #[tracing::instrument(skip(self), fields(thread = %self.thread_id))]
    pub fn run(&self) {
        {
            let probe = self.controller.get_probe(self.thread_id);
            probe.lock().on_run();
        }

        loop {
            let stopped = self.controller.get_state(self.thread_id).lock().stopped();
            if stopped {
                break;
            }
            if let Err(err) = self.step() {
                self.record(err);
                break;
            }
        }

        let probe = self.controller.get_probe(self.thread_id);
        probe.lock().on_stopped();
        let snapshot = self.controller.get_state(self.thread_id).lock().to_snapshot();
        let log = probe.lock().take_log();
        self.controller.stop(self.thread_id, snapshot, log);
    }

    /// Executes exactly one instruction. Used directly by `run`'s loop and
    /// exposed for single-step debugging.
    pub fn step(&self) -> Result<(), OpError> {
        let state_handle = self.controller.get_state(self.thread_id);

        let (ip, instr) = {
            let mut state = state_handle.lock();
            let ip = state.ip();
            let executable = self.controller.executable();
            let len = executable.len();
            let instr = executable
                .code_at(ip)
                .cloned()
                .ok_or(OpError::IpOutOfBounds { ip, len })?;
            // Increment before dispatch so relative jumps address
            // post-increment positions.
            state.advance_ip();
            (ip, instr)
        };

        let probe = self.controller.get_probe(self.thread_id);
        let force_stop = probe.lock().on_step(ip, &instr);

        self.dispatch(instr)?;

        if force_stop {
            state_handle.lock().set_stopped(true);
        }
        Ok(())
    }

    fn record(&self, err: OpError) {
        use crate::errors::{ErrorKind, MachineError};
        let ip = self.controller.get_state(self.thread_id).lock().ip();
        let error = MachineError::new(self.thread_id, ip, err);
        match error.kind() {
            ErrorKind::ForeignError => self.controller.foreign_error(self.thread_id, error),
            ErrorKind::UnhandledError => self.controller.teal_error(self.thread_id, error),
            _ => self.controller.unexpected_error(self.thread_id, error),
        }
    }

    fn dispatch(&self, instr: Instruction) -> Result<(), OpError> {
        match instr {
            Instruction::PushV(v) => self.op_pushv(v),
            Instruction::Pop => self.op_pop(),
            Instruction::Bind(name) => self.op_bind(name),
            Instruction::PushB(name) => self.op_pushb(name),
            Instruction::Jump(offset) => self.op_jump(offset),
            Instruction::JumpIf(offset) => self.op_jumpif(offset),
            Instruction::Call(n) => self.op_call(n),
            Instruction::ACall(n) => self.op_acall(n),
            Instruction::Return => self.op_return(),
            Instruction::Wait => self.perform_wait(),
        }
    }

    fn op_pushv(&self, v: Value) -> Result<(), OpError> {
        self.controller.get_state(self.thread_id).lock().push(v);
        Ok(())
    }

    fn op_pop(&self) -> Result<(), OpError> {
        self.controller.get_state(self.thread_id).lock().pop()?;
        Ok(())
    }

    fn op_bind(&self, name: String) -> Result<(), OpError> {
        let mut state = self.controller.get_state(self.thread_id).lock();
        let top = state.peek(0)?.clone();
        state.bind(name, top);
        Ok(())
    }

    /// Resolves `name` local -> executable -> built-in and pushes
    /// the result: a built-in resolves to an [`Value::InstructionToken`],
    /// everything else pushes the bound value itself.
    fn op_pushb(&self, name: String) -> Result<(), OpError> {
        let mut state = self.controller.get_state(self.thread_id).lock();
        if let Some(value) = state.bindings().get(&name).cloned() {
            state.push(value);
            return Ok(());
        }
        if let Some(value) = self.controller.executable().binding(&name).cloned() {
            state.push(value);
            return Ok(());
        }
        if teal_core::builtins::lookup(&name).is_some() {
            state.push(Value::InstructionToken(name));
            return Ok(());
        }
        Err(OpError::NameError(name))
    }

    fn apply_jump(&self, offset: i32) -> Result<(), OpError> {
        let mut state = self.controller.get_state(self.thread_id).lock();
        let target = state.ip() as i64 + offset as i64;
        if target < 0 {
            return Err(OpError::IpOutOfBounds { ip: target as usize, len: self.controller.executable().len() });
        }
        state.set_ip(target as usize);
        Ok(())
    }

    fn op_jump(&self, offset: i32) -> Result<(), OpError> {
        self.apply_jump(offset)
    }

    fn op_jumpif(&self, offset: i32) -> Result<(), OpError> {
        let truthy = {
            let mut state = self.controller.get_state(self.thread_id).lock();
            state.pop()?.is_truthy()
        };
        if truthy {
            self.apply_jump(offset)?;
        }
        Ok(())
    }

    fn op_call(&self, n: u32) -> Result<(), OpError> {
        let callee = self.controller.get_state(self.thread_id).lock().pop()?;
        match callee {
            Value::FunctionPtr(f) => self.call_teal_function(f),
            Value::ForeignPtr(f) => self.call_foreign(f, n),
            Value::InstructionToken(name) => self.call_builtin(&name, n),
            other => Err(OpError::NotCallable(other.to_string())),
        }
    }

    fn call_teal_function(&self, f: FunctionPtr) -> Result<(), OpError> {
        let entry = self.controller.executable().location_of(&f.identifier)?;
        let state_handle = self.controller.get_state(self.thread_id);

        let (current_arec, call_site) = {
            let state = state_handle.lock();
            (state.current_arec(), state.ip() - 1)
        };
        let record = ActivationRecord {
            function: f.clone(),
            owner_thread: self.thread_id,
            dynamic_chain: current_arec,
            call_site: Some(call_site),
            bindings: HashMap::new(),
            ref_count: 0,
        };
        let ptr = self.controller.push_arec(record);

        let mut state = state_handle.lock();
        state.set_current_arec(Some(ptr));
        state.set_bindings(HashMap::new());
        state.set_ip(entry);
        drop(state);

        self.controller.get_probe(self.thread_id).lock().on_enter(&f.identifier);
        Ok(())
    }

    fn call_foreign(&self, f: ForeignPtr, n: u32) -> Result<(), OpError> {
        let state_handle = self.controller.get_state(self.thread_id);
        let mut popped = Vec::with_capacity(n as usize);
        {
            let mut state = state_handle.lock();
            for _ in 0..n {
                popped.push(state.pop()?);
            }
        }
        // Popped in LIFO order; reverse to restore the original calling order.
        popped.reverse();

        let callable = self.resolver.resolve(&f.identifier, &f.module)?;
        let outcome = callable.call(&popped).map_err(OpError::Foreign)?;
        if !outcome.captured_stdout.is_empty() {
            self.controller.write_stdout(&outcome.captured_stdout);
        }
        state_handle.lock().push(outcome.value);
        Ok(())
    }

    fn call_builtin(&self, name: &str, n: u32) -> Result<(), OpError> {
        let op = teal_core::builtins::lookup(&name.to_string()).ok_or_else(|| OpError::NameError(name.to_string()))?;
        use teal_core::BuiltinOp;
        match op {
            BuiltinOp::Print => self.bi_print(),
            BuiltinOp::Sleep => self.bi_sleep(),
            BuiltinOp::Signal => self.bi_signal(),
            BuiltinOp::Wait => self.perform_wait(),
            _ => {
                let state_handle = self.controller.get_state(self.thread_id);
                let mut args = Vec::with_capacity(n as usize);
                {
                    let mut state = state_handle.lock();
                    for _ in 0..n {
                        args.push(state.pop()?);
                    }
                }
                let result = builtins::apply(op, args)?;
                state_handle.lock().push(result);
                Ok(())
            },
        }
    }

    fn bi_print(&self) -> Result<(), OpError> {
        let state_handle = self.controller.get_state(self.thread_id);
        let value = state_handle.lock().peek(0)?.clone();
        self.controller.write_stdout(&format!("{value}\n"));
        Ok(())
    }

    fn bi_sleep(&self) -> Result<(), OpError> {
        let state_handle = self.controller.get_state(self.thread_id);
        let value = state_handle.lock().peek(0)?.clone();
        let seconds = builtins::as_number(&value)?;
        std::thread::sleep(Duration::from_secs_f64(seconds.max(0.0)));
        Ok(())
    }

    /// `signal msg val`: peeks `msg` at offset 0 and `val` at offset 1
    /// (neither is popped), emits `"{VAL_UPPER}: {msg}"` to stdout,
    /// and raises [`OpError::Unhandled`] iff `val` is the string `"error"`.
    fn bi_signal(&self) -> Result<(), OpError> {
        let state_handle = self.controller.get_state(self.thread_id);
        let (msg, val) = {
            let state = state_handle.lock();
            (state.peek(0)?.clone(), state.peek(1)?.clone())
        };
        self.controller.write_stdout(&format!("{}: {msg}\n", val.to_string().to_uppercase()));
        if matches!(&val, Value::String(s) if s == "error") {
            return Err(OpError::Unhandled(msg.to_string()));
        }
        Ok(())
    }

    /// `Wait`: peeks the top of the stack. A future pointer resolves
    /// through the controller, overwriting the slot if already resolved or
    /// suspending the thread otherwise. A non-future is a no-op (a
    /// conservatively-emitted `Wait` for what turned out to be synchronous).
    /// A composite value containing a future anywhere in its nested lists
    /// is rejected outright — the programmer must decompose it first.
    fn perform_wait(&self) -> Result<(), OpError> {
        let state_handle = self.controller.get_state(self.thread_id);
        let top = state_handle.lock().peek(0)?.clone();
        match &top {
            Value::FuturePtr(future_id) => {
                let (resolved, value) =
                    self.controller.get_or_wait(self.thread_id, *future_id, 0, &state_handle);
                if resolved {
                    state_handle.lock().set(0, value.unwrap_or(Value::Null))?;
                }
                // Otherwise the controller already marked this thread
                // stopped; the run loop observes that and exits.
                Ok(())
            },
            Value::List(_) if top.contains_future() => Err(OpError::WaitOnCompositeFutures),
            _ => Ok(()),
        }
    }

    fn op_acall(&self, n: u32) -> Result<(), OpError> {
        let state_handle = self.controller.get_state(self.thread_id);

        let callee = state_handle.lock().pop()?;
        let f = match callee {
            Value::FunctionPtr(f) => f,
            other => return Err(OpError::NotAFunctionPointer(other.to_string())),
        };

        let (mut args, current_arec, fork_site) = {
            let mut state = state_handle.lock();
            let mut args = Vec::with_capacity(n as usize);
            for _ in 0..n {
                args.push(state.pop()?);
            }
            (args, state.current_arec(), state.ip() - 1)
        };
        // Popped in LIFO order; reverse to get the order the callee expects
        // to pop them in (i.e. the original push/calling order).
        args.reverse();

        let new_thread = self.controller.thread_machine(current_arec, fork_site, f, args)?;
        state_handle.lock().push(Value::FuturePtr(new_thread));
        self.invoker.invoke(new_thread);
        Ok(())
    }

    /// `Return`: pops the current activation record. If it belongs
    /// to a regular local `Call` (a non-empty `call_site`), resumes the
    /// caller. Otherwise — no current AR at all (the root thread), or an
    /// AR with no call site (a forked thread's root AR) — this is a
    /// thread-terminal return.
    fn op_return(&self) -> Result<(), OpError> {
        let state_handle = self.controller.get_state(self.thread_id);
        let current = state_handle.lock().current_arec();

        let Some(ptr) = current else {
            return self.terminal_return();
        };

        let (popped, parent_bindings) = self.controller.pop_arec(ptr);
        let Some(call_site) = popped.call_site else {
            return self.terminal_return();
        };

        let mut state = state_handle.lock();
        state.set_ip(call_site + 1);
        state.set_current_arec(popped.dynamic_chain);
        state.set_bindings(parent_bindings);
        drop(state);

        self.controller.get_probe(self.thread_id).lock().on_return();
        Ok(())
    }

    fn terminal_return(&self) -> Result<(), OpError> {
        let state_handle = self.controller.get_state(self.thread_id);
        let result = {
            let mut state = state_handle.lock();
            let value = state.pop()?;
            state.set_stopped(true);
            value
        };
        let (value, continuations) = self.controller.finish(self.thread_id, result);
        for (waiter, offset) in continuations {
            self.controller.set_future_value(waiter, offset, value.clone());
            self.invoker.invoke(waiter);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use pretty_assertions::assert_eq;
    use teal_core::{Executable, FunctionPtr, Instruction, Value};

    use super::*;
    use crate::errors::ErrorKind;
    use crate::execution_options::ExecutionOptions;
    use crate::host::Invoker;

    /// Runs a thread's machine to completion, recursively invoking any
    /// thread it forks on the calling thread — the same inline scheduling
    /// policy as `teal-vm`'s `InlineInvoker`, reimplemented locally so
    /// these tests don't depend on the facade crate.
    fn run_to_completion(controller: &Arc<Controller>, root: ThreadId) {
        struct Inline(Arc<Controller>);
        impl Invoker for Inline {
            fn invoke(&self, thread_id: ThreadId) {
                Machine::new(thread_id, self.0.clone(), Arc::new(Inline(self.0.clone()))).run();
            }
        }
        let invoker: Arc<dyn Invoker> = Arc::new(Inline(controller.clone()));
        Machine::new(root, controller.clone(), invoker).run();
    }

    fn arithmetic_executable() -> Executable {
        Executable::new(
            vec![
                Instruction::PushV(Value::Int(3)),
                Instruction::PushV(Value::Int(4)),
                Instruction::PushB("+".into()),
                Instruction::Call(2),
                Instruction::PushV(Value::Int(7)),
                Instruction::PushB("==".into()),
                Instruction::Call(2),
                Instruction::Return,
            ],
            HashMap::new(),
            HashMap::new(),
        )
    }

    #[test]
    fn scenario_arithmetic_and_compare() {
        let (controller, root) = Controller::new(arithmetic_executable(), vec![], ExecutionOptions::unlimited());
        run_to_completion(&controller, root);
        let result = controller.stopped_thread(root).unwrap();
        assert_eq!(result.snapshot.ds, vec![Value::True]);
    }

    #[test]
    fn scenario_conditional_true_branch() {
        let code = vec![
            Instruction::PushV(Value::False),
            Instruction::JumpIf(2),
            Instruction::PushV(Value::Int(1)),
            Instruction::Jump(1),
            Instruction::PushV(Value::Int(2)),
            Instruction::Return,
        ];
        let (controller, root) =
            Controller::new(Executable::new(code, HashMap::new(), HashMap::new()), vec![], ExecutionOptions::unlimited());
        run_to_completion(&controller, root);
        assert_eq!(controller.stopped_thread(root).unwrap().snapshot.ds, vec![Value::Int(2)]);
    }

    #[test]
    fn scenario_conditional_truthy_branch() {
        let code = vec![
            Instruction::PushV(Value::True),
            Instruction::JumpIf(2),
            Instruction::PushV(Value::Int(1)),
            Instruction::Jump(1),
            Instruction::PushV(Value::Int(2)),
            Instruction::Return,
        ];
        let (controller, root) =
            Controller::new(Executable::new(code, HashMap::new(), HashMap::new()), vec![], ExecutionOptions::unlimited());
        run_to_completion(&controller, root);
        assert_eq!(controller.stopped_thread(root).unwrap().snapshot.ds, vec![Value::Int(1)]);
    }

    #[test]
    fn scenario_list_first() {
        let code = vec![
            Instruction::PushV(Value::Int(1)),
            Instruction::PushV(Value::Int(2)),
            Instruction::PushV(Value::Int(3)),
            Instruction::PushB("list".into()),
            Instruction::Call(3),
            Instruction::PushB("first".into()),
            Instruction::Call(1),
            Instruction::Return,
        ];
        let (controller, root) =
            Controller::new(Executable::new(code, HashMap::new(), HashMap::new()), vec![], ExecutionOptions::unlimited());
        run_to_completion(&controller, root);
        assert_eq!(controller.stopped_thread(root).unwrap().snapshot.ds, vec![Value::Int(1)]);
    }

    #[test]
    fn scenario_list_rest() {
        let code = vec![
            Instruction::PushV(Value::Int(1)),
            Instruction::PushV(Value::Int(2)),
            Instruction::PushV(Value::Int(3)),
            Instruction::PushB("list".into()),
            Instruction::Call(3),
            Instruction::PushB("rest".into()),
            Instruction::Call(1),
            Instruction::Return,
        ];
        let (controller, root) =
            Controller::new(Executable::new(code, HashMap::new(), HashMap::new()), vec![], ExecutionOptions::unlimited());
        run_to_completion(&controller, root);
        assert_eq!(
            controller.stopped_thread(root).unwrap().snapshot.ds,
            vec![Value::List(vec![Value::Int(2), Value::Int(3)])]
        );
    }

    /// Builds an executable with a `sq` function at index 2 (squares its
    /// one argument via `*`) and a main entry that calls it locally.
    fn sq_executable() -> (Executable, usize) {
        let sq_entry = 8;
        let mut code = vec![
            Instruction::PushV(Value::Int(5)),
            Instruction::PushB("sq".into()),
            Instruction::Call(1),
            Instruction::Return,
        ];
        // pad up to sq_entry
        while code.len() < sq_entry {
            code.push(Instruction::Pop);
        }
        code.push(Instruction::Bind("n".into()));
        code.push(Instruction::Pop);
        code.push(Instruction::PushB("n".into()));
        code.push(Instruction::PushB("n".into()));
        code.push(Instruction::PushB("*".into()));
        code.push(Instruction::Call(2));
        code.push(Instruction::Return);

        let mut locations = HashMap::new();
        locations.insert("sq".to_string(), sq_entry);
        let mut bindings = HashMap::new();
        bindings.insert("sq".to_string(), Value::FunctionPtr(FunctionPtr { identifier: "sq".into() }));
        (Executable::new(code, locations, bindings), sq_entry)
    }

    #[test]
    fn scenario_local_call_balances_the_arena() {
        let (exe, _) = sq_executable();
        let (controller, root) = Controller::new(exe, vec![], ExecutionOptions::unlimited());
        let before = controller.arena_len();
        run_to_completion(&controller, root);
        assert_eq!(controller.stopped_thread(root).unwrap().snapshot.ds, vec![Value::Int(25)]);
        assert_eq!(controller.arena_len(), before);
    }

    #[test]
    fn scenario_signal_error_stops_the_thread_and_writes_stdout() {
        let code = vec![
            Instruction::PushV(Value::String("boom".into())),
            Instruction::PushV(Value::String("error".into())),
            Instruction::PushB("signal".into()),
            Instruction::Call(2),
        ];
        let (controller, root) =
            Controller::new(Executable::new(code, HashMap::new(), HashMap::new()), vec![], ExecutionOptions::unlimited());
        run_to_completion(&controller, root);
        assert!(controller.stdout().contains("ERROR: boom"));
        assert!(controller.error_of(root).is_some());
        assert!(controller.get_state(root).lock().stopped());
    }

    #[test]
    fn ip_out_of_bounds_is_classified_and_recorded() {
        let code = vec![Instruction::Pop];
        let (controller, root) =
            Controller::new(Executable::new(code, HashMap::new(), HashMap::new()), vec![Value::Int(1)], ExecutionOptions::unlimited());
        run_to_completion(&controller, root);
        let err = controller.error_of(root).unwrap();
        assert!(matches!(err.source, OpError::IpOutOfBounds { .. }));
    }

    #[test]
    fn wait_on_a_non_future_is_a_no_op() {
        let code = vec![Instruction::PushV(Value::Int(7)), Instruction::Wait, Instruction::Return];
        let (controller, root) =
            Controller::new(Executable::new(code, HashMap::new(), HashMap::new()), vec![], ExecutionOptions::unlimited());
        run_to_completion(&controller, root);
        assert_eq!(controller.stopped_thread(root).unwrap().snapshot.ds, vec![Value::Int(7)]);
    }

    #[test]
    fn wait_on_a_list_containing_a_future_is_rejected() {
        let code = vec![
            Instruction::PushV(Value::List(vec![Value::FuturePtr(ThreadId(99))])),
            Instruction::Wait,
        ];
        let (controller, root) =
            Controller::new(Executable::new(code, HashMap::new(), HashMap::new()), vec![], ExecutionOptions::unlimited());
        run_to_completion(&controller, root);
        let err = controller.error_of(root).unwrap();
        assert!(matches!(err.source, OpError::WaitOnCompositeFutures));
    }

    #[test]
    fn unknown_name_is_a_compile_time_should_have_caught_error() {
        let code = vec![Instruction::PushB("not-a-thing".into())];
        let (controller, root) =
            Controller::new(Executable::new(code, HashMap::new(), HashMap::new()), vec![], ExecutionOptions::unlimited());
        run_to_completion(&controller, root);
        let err = controller.error_of(root).unwrap();
        assert_eq!(err.kind(), ErrorKind::CompileTimeShouldHaveCaught);
    }
}
