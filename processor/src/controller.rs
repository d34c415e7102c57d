//! The controller: the only component with shared mutable state.
//!
//! It owns the activation-record arena, the future table, the thread
//! registry (state + probe per thread), the stdout sink, and the per-thread
//! error records. Every public method here is documented in the design
//! spec as "a single atomic unit" — we get that for free by guarding each
//! table behind its own `parking_lot` lock rather than threading a coarse
//! lock through every call, the way `miden-core`'s optional `parking_lot`
//! dependency is used for its own shared tables.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use teal_core::{Executable, FunctionPtr, Identifier, ThreadId, Value};

use crate::errors::{ErrorKind, MachineError, OpError};
use crate::execution_options::ExecutionOptions;
use crate::host::{DefaultProbe, Probe};
use crate::state::{State, StateSnapshot};

/// An opaque handle into the activation-record arena. Stable for the
/// lifetime of the record; reclaimed records never reuse a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArecPtr(pub u64);

impl fmt::Display for ArecPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AR#{}", self.0)
    }
}

/// A stack frame: callee identity, owning thread, dynamic-chain parent,
/// call site, local bindings, and a reference count.
///
/// The dynamic chain is a DAG threaded through the controller-owned arena,
/// not an owned parent/child tree — a forked thread's root activation
/// record points back into its parent's frame history, so records are
/// reclaimed by refcount, never by thread exit (a cactus stack, not a tree).
#[derive(Debug, Clone)]
pub struct ActivationRecord {
    pub function: FunctionPtr,
    pub owner_thread: ThreadId,
    pub dynamic_chain: Option<ArecPtr>,
    /// `None` marks a thread's root activation record: it was created by a
    /// fork (`thread_machine`), not by a regular `Call`, so returning
    /// through it terminates the thread rather than resuming a caller.
    pub call_site: Option<usize>,
    pub bindings: HashMap<Identifier, Value>,
    ref_count: u32,
}

impl ActivationRecord {
    pub fn ref_count(&self) -> u32 {
        self.ref_count
    }
}

struct Arena {
    records: HashMap<ArecPtr, ActivationRecord>,
    next: u64,
}

impl Arena {
    fn new() -> Self {
        Arena { records: HashMap::new(), next: 0 }
    }

    fn alloc(&mut self, mut record: ActivationRecord) -> ArecPtr {
        if let Some(parent) = record.dynamic_chain {
            if let Some(parent_rec) = self.records.get_mut(&parent) {
                parent_rec.ref_count += 1;
            }
        }
        record.ref_count = 1;
        let ptr = ArecPtr(self.next);
        self.next += 1;
        self.records.insert(ptr, record);
        ptr
    }

    /// Decrements `ptr`'s refcount (one "current AR pointer" reference
    /// ending) and, if it drops to zero, reclaims the record and cascades
    /// the release into its dynamic-chain parent, whose "live edge" count
    /// just lost a member.
    fn release(&mut self, ptr: ArecPtr) {
        let Some(record) = self.records.get_mut(&ptr) else { return };
        record.ref_count = record.ref_count.saturating_sub(1);
        if record.ref_count == 0 {
            let parent = record.dynamic_chain;
            self.records.remove(&ptr);
            if let Some(parent) = parent {
                self.release(parent);
            }
        }
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}

struct FutureRecord {
    #[allow(dead_code)]
    producing_thread: ThreadId,
    resolved: bool,
    value: Option<Value>,
    waiters: Vec<(ThreadId, usize)>,
}

impl FutureRecord {
    fn new(producing_thread: ThreadId) -> Self {
        FutureRecord { producing_thread, resolved: false, value: None, waiters: Vec::new() }
    }
}

struct ThreadRegistration {
    state: Arc<Mutex<State>>,
    probe: Arc<Mutex<Box<dyn Probe>>>,
}

/// Final state and probe log persisted once a thread stops, for later
/// inspection (`stop`).
#[derive(Debug, Clone)]
pub struct StoppedThread {
    pub snapshot: StateSnapshot,
    pub probe_log: Vec<String>,
}

pub struct Controller {
    executable: Arc<Executable>,
    options: ExecutionOptions,
    arena: Mutex<Arena>,
    futures: Mutex<HashMap<ThreadId, FutureRecord>>,
    threads: RwLock<HashMap<ThreadId, ThreadRegistration>>,
    stdout: Mutex<String>,
    errors: Mutex<HashMap<ThreadId, MachineError>>,
    stopped: Mutex<HashMap<ThreadId, StoppedThread>>,
    next_thread: AtomicU64,
    probe_factory: Box<dyn Fn(ThreadId) -> Box<dyn Probe> + Send + Sync>,
}

impl Controller {
    /// Builds a controller with the default probe (step-budget enforcement
    /// per `options`) and registers the root thread, preloaded with
    /// `entry_args` and no activation record (it has no caller).
    pub fn new(executable: Executable, entry_args: Vec<Value>, options: ExecutionOptions) -> (Arc<Controller>, ThreadId) {
        Self::with_probe_factory(executable, entry_args, options, |id| {
            Box::new(DefaultProbe::new(format!("P{}", id.0), options.max_steps()))
        })
    }

    /// Like [`Controller::new`], but with a caller-supplied probe factory —
    /// used by embedders who want custom logging or a non-default step
    /// budget per thread.
    pub fn with_probe_factory(
        executable: Executable,
        entry_args: Vec<Value>,
        options: ExecutionOptions,
        probe_factory: impl Fn(ThreadId) -> Box<dyn Probe> + Send + Sync + 'static,
    ) -> (Arc<Controller>, ThreadId) {
        let controller = Controller {
            executable: Arc::new(executable),
            options,
            arena: Mutex::new(Arena::new()),
            futures: Mutex::new(HashMap::new()),
            threads: RwLock::new(HashMap::new()),
            stdout: Mutex::new(String::new()),
            errors: Mutex::new(HashMap::new()),
            stopped: Mutex::new(HashMap::new()),
            next_thread: AtomicU64::new(0),
            probe_factory: Box::new(probe_factory),
        };
        let controller = Arc::new(controller);
        let root = controller.register_thread(State::new(entry_args));
        controller.futures.lock().insert(root, FutureRecord::new(root));
        (controller, root)
    }

    fn register_thread(&self, state: State) -> ThreadId {
        let id = ThreadId(self.next_thread.fetch_add(1, Ordering::Relaxed));
        let probe = (self.probe_factory)(id);
        self.threads.write().insert(
            id,
            ThreadRegistration { state: Arc::new(Mutex::new(state)), probe: Arc::new(Mutex::new(probe)) },
        );
        id
    }

    pub fn executable(&self) -> &Executable {
        &self.executable
    }

    pub fn options(&self) -> ExecutionOptions {
        self.options
    }

    /// # Panics
    /// Panics if `thread_id` was never registered with this controller —
    /// every `ThreadId` in circulation is either the root returned by
    /// `new`, or one produced by `thread_machine`, so this is an internal
    /// consistency invariant, not a user-facing error condition.
    pub fn get_state(&self, thread_id: ThreadId) -> Arc<Mutex<State>> {
        self.threads
            .read()
            .get(&thread_id)
            .map(|t| t.state.clone())
            .unwrap_or_else(|| panic!("unregistered thread {thread_id}"))
    }

    pub fn get_probe(&self, thread_id: ThreadId) -> Arc<Mutex<Box<dyn Probe>>> {
        self.threads
            .read()
            .get(&thread_id)
            .map(|t| t.probe.clone())
            .unwrap_or_else(|| panic!("unregistered thread {thread_id}"))
    }

    pub fn arena_len(&self) -> usize {
        self.arena.lock().len()
    }

    pub fn push_arec(&self, record: ActivationRecord) -> ArecPtr {
        self.arena.lock().alloc(record)
    }

    /// Pops the activation record at `ptr`: decrements its refcount
    /// (possibly reclaiming it and cascading into its parent), and returns
    /// the popped record together with the parent's local bindings — the
    /// two pieces of data a `Return` needs to decide how to resume.
    pub fn pop_arec(&self, ptr: ArecPtr) -> (ActivationRecord, HashMap<Identifier, Value>) {
        let mut arena = self.arena.lock();
        let record = arena
            .records
            .get(&ptr)
            .cloned()
            .unwrap_or_else(|| panic!("popped an unknown activation record {ptr}"));
        let parent_bindings = record
            .dynamic_chain
            .and_then(|p| arena.records.get(&p))
            .map(|p| p.bindings.clone())
            .unwrap_or_default();
        arena.release(ptr);
        (record, parent_bindings)
    }

    /// Forks a new thread executing `fn_ptr` from its entry point, with
    /// `args` preloaded onto its data stack in the order the callee expects
    /// to pop them. The new thread's root activation record chains back to
    /// `parent_arec` (increasing its refcount), and a future is allocated
    /// for the new thread so a waiter can later observe its result.
    ///
    /// `fork_site` is the code index of the `ACall` that requested the
    /// fork; it is not stored on the root activation record (which has no
    /// call site — see [`ActivationRecord::call_site`]) and exists purely
    /// for diagnostic logging.
    pub fn thread_machine(
        &self,
        parent_arec: Option<ArecPtr>,
        fork_site: usize,
        fn_ptr: FunctionPtr,
        args: Vec<Value>,
    ) -> Result<ThreadId, OpError> {
        let entry = self.executable.location_of(&fn_ptr.identifier)?;
        let thread_id = self.register_thread(State::new(args));
        {
            let mut state = self.get_state(thread_id).lock_arc();
            state.set_ip(entry);
        }
        let root = self.push_arec(ActivationRecord {
            function: fn_ptr,
            owner_thread: thread_id,
            dynamic_chain: parent_arec,
            call_site: None,
            bindings: HashMap::new(),
            ref_count: 0,
        });
        self.get_state(thread_id).lock().set_current_arec(Some(root));
        self.futures.lock().insert(thread_id, FutureRecord::new(thread_id));
        tracing::debug!(%thread_id, fork_site, "forked thread");
        Ok(thread_id)
    }

    /// Inspects the future identified by `future_ptr`. If resolved, returns
    /// its value immediately. Otherwise records `waiter_id` as a waiter at
    /// `offset` in its own stack, marks `waiter_state`'s thread stopped,
    /// and returns `(false, None)` — the caller's run loop then observes
    /// `stopped` and exits.
    pub fn get_or_wait(
        &self,
        waiter_id: ThreadId,
        future_ptr: ThreadId,
        offset: usize,
        waiter_state: &Mutex<State>,
    ) -> (bool, Option<Value>) {
        let mut futures = self.futures.lock();
        let future = futures
            .entry(future_ptr)
            .or_insert_with(|| FutureRecord::new(future_ptr));
        if future.resolved {
            (true, future.value.clone())
        } else {
            future.waiters.push((waiter_id, offset));
            waiter_state.lock().set_stopped(true);
            (false, None)
        }
    }

    /// Writes `value` into the specified stack slot of a thread that is
    /// known to be stopped and waiting — the one exception to "a thread's
    /// state is mutated only by its own machine".
    pub fn set_future_value(&self, thread_id: ThreadId, offset: usize, value: Value) {
        let state = self.get_state(thread_id);
        let mut state = state.lock();
        debug_assert!(state.stopped(), "set_future_value on a running thread");
        if state.set(offset, value).is_err() {
            tracing::warn!(%thread_id, offset, "set_future_value targeted an empty stack");
        }
    }

    /// Resolves `thread_id`'s future with `value` and returns it together
    /// with the list of `(waiter, offset)` pairs whose stack slots must now
    /// be patched via `set_future_value` and re-invoked.
    pub fn finish(&self, thread_id: ThreadId, value: Value) -> (Value, Vec<(ThreadId, usize)>) {
        let mut futures = self.futures.lock();
        let future = futures.entry(thread_id).or_insert_with(|| FutureRecord::new(thread_id));
        if future.resolved {
            tracing::warn!(%thread_id, "finish called on an already-resolved future");
            return (future.value.clone().unwrap_or(value), Vec::new());
        }
        future.resolved = true;
        future.value = Some(value.clone());
        let continuations = std::mem::take(&mut future.waiters);
        (value, continuations)
    }

    /// Appends to the shared stdout buffer. Writes are append-only and
    /// atomic per call; ordering across threads is by call order only,
    /// message granularity.
    pub fn write_stdout(&self, text: &str) {
        self.stdout.lock().push_str(text);
    }

    pub fn stdout(&self) -> String {
        self.stdout.lock().clone()
    }

    fn record_error(&self, thread_id: ThreadId, error: MachineError) {
        let state = self.get_state(thread_id);
        state.lock().set_stopped(true);
        self.errors.lock().insert(thread_id, error);
    }

    pub fn foreign_error(&self, thread_id: ThreadId, error: MachineError) {
        debug_assert_eq!(error.kind(), ErrorKind::ForeignError);
        self.record_error(thread_id, error);
    }

    pub fn teal_error(&self, thread_id: ThreadId, error: MachineError) {
        debug_assert_eq!(error.kind(), ErrorKind::UnhandledError);
        self.record_error(thread_id, error);
    }

    pub fn unexpected_error(&self, thread_id: ThreadId, error: MachineError) {
        self.record_error(thread_id, error);
    }

    pub fn error_of(&self, thread_id: ThreadId) -> Option<MachineError> {
        self.errors.lock().get(&thread_id).cloned()
    }

    /// Persists the terminal state and probe log for later inspection.
    pub fn stop(&self, thread_id: ThreadId, snapshot: StateSnapshot, probe_log: Vec<String>) {
        self.stopped.lock().insert(thread_id, StoppedThread { snapshot, probe_log });
    }

    pub fn stopped_thread(&self, thread_id: ThreadId) -> Option<StoppedThread> {
        self.stopped.lock().get(&thread_id).cloned()
    }
}

// Small helper so `thread_machine` can set the IP before the root AR exists
// without holding two locks on the same mutex at once.
trait LockArcExt<'a, T> {
    fn lock_arc(&'a self) -> parking_lot::MutexGuard<'a, T>;
}

impl<'a, T> LockArcExt<'a, T> for Arc<Mutex<T>> {
    fn lock_arc(&'a self) -> parking_lot::MutexGuard<'a, T> {
        self.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use teal_core::{Executable, Instruction};

    fn empty_executable() -> Executable {
        Executable::new(vec![Instruction::Return], HashMap::new(), HashMap::new())
    }

    #[test]
    fn future_resolves_at_most_once() {
        let (controller, root) = Controller::new(empty_executable(), vec![], ExecutionOptions::unlimited());
        let (first_value, waiters_first) = controller.finish(root, Value::Int(1));
        assert_eq!(first_value, Value::Int(1));
        assert!(waiters_first.is_empty());

        // A second finish on the same future does not change its value or
        // re-deliver waiters (I4: resolves at most once).
        let (second_value, waiters_second) = controller.finish(root, Value::Int(2));
        assert_eq!(second_value, Value::Int(1));
        assert!(waiters_second.is_empty());
    }

    #[test]
    fn get_or_wait_reports_unresolved_then_resolved() {
        let (controller, root) = Controller::new(empty_executable(), vec![], ExecutionOptions::unlimited());
        let waiter_state = controller.get_state(root);
        let (resolved, value) = controller.get_or_wait(root, root, 0, &waiter_state);
        assert!(!resolved);
        assert!(value.is_none());
        assert!(waiter_state.lock().stopped());

        controller.finish(root, Value::Int(42));
        let (resolved, value) = controller.get_or_wait(root, root, 0, &waiter_state);
        assert_eq!((resolved, value), (true, Some(Value::Int(42))));
    }

    #[test]
    fn arena_round_trips_to_the_same_size() {
        let (controller, root) = Controller::new(empty_executable(), vec![], ExecutionOptions::unlimited());
        let before = controller.arena_len();
        let ptr = controller.push_arec(ActivationRecord {
            function: FunctionPtr { identifier: "f".into() },
            owner_thread: root,
            dynamic_chain: None,
            call_site: Some(3),
            bindings: HashMap::new(),
            ref_count: 0,
        });
        assert_eq!(controller.arena_len(), before + 1);
        controller.pop_arec(ptr);
        assert_eq!(controller.arena_len(), before);
    }
}
