//! Reference [`Invoker`] implementations ("Invoker reference
//! implementations").
//!
//! The real invoker — scheduling a thread's machine onto some compute node
//! — is an external collaborator; these two exist so an embedder (or
//! a test) can get a `Controller` running without writing a scheduler
//! first. Both only ever call [`Machine::run`] exactly once per `invoke`,
//! per the `Invoker` contract.

use std::sync::{Arc, Weak};

use teal_core::ThreadId;
use teal_processor::{Controller, ForeignResolver, Invoker, Machine, NoForeignResolver};

/// Runs every invoked thread synchronously, on the calling thread,
/// recursively — an `ACall` forked while running thread A runs thread B to
/// completion before A's `run()` call returns (unless B suspends on a
/// `Wait`, in which case it returns control immediately like any other
/// machine). Suitable for tests and single-step debugging; the scenario
/// fixtures use this.
pub struct InlineInvoker {
    controller: Arc<Controller>,
    resolver: Arc<dyn ForeignResolver>,
    self_ref: Weak<InlineInvoker>,
}

impl InlineInvoker {
    pub fn new(controller: Arc<Controller>) -> Arc<Self> {
        Self::with_foreign_resolver(controller, Arc::new(NoForeignResolver))
    }

    pub fn with_foreign_resolver(controller: Arc<Controller>, resolver: Arc<dyn ForeignResolver>) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| InlineInvoker { controller, resolver, self_ref: self_ref.clone() })
    }
}

impl Invoker for InlineInvoker {
    fn invoke(&self, thread_id: ThreadId) {
        let invoker: Arc<dyn Invoker> =
            self.self_ref.upgrade().expect("InlineInvoker invoked after being dropped");
        Machine::new(thread_id, self.controller.clone(), invoker)
            .with_foreign_resolver(self.resolver.clone())
            .run();
    }
}

/// Spawns each invoked thread onto its own OS thread via
/// [`std::thread::spawn`], for exercising genuine cross-thread fork/wait
/// races. Grounded in the corpus's other concurrency example (M:N
/// schedulers driven by an explicit run queue) simplified down to "one OS
/// thread per invocation", since the core makes no assumption about
/// scheduling policy beyond "an invocation eventually runs".
pub struct ThreadPoolInvoker {
    controller: Arc<Controller>,
    resolver: Arc<dyn ForeignResolver>,
    self_ref: Weak<ThreadPoolInvoker>,
}

impl ThreadPoolInvoker {
    pub fn new(controller: Arc<Controller>) -> Arc<Self> {
        Self::with_foreign_resolver(controller, Arc::new(NoForeignResolver))
    }

    pub fn with_foreign_resolver(controller: Arc<Controller>, resolver: Arc<dyn ForeignResolver>) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| ThreadPoolInvoker { controller, resolver, self_ref: self_ref.clone() })
    }
}

impl Invoker for ThreadPoolInvoker {
    fn invoke(&self, thread_id: ThreadId) {
        let controller = self.controller.clone();
        let resolver = self.resolver.clone();
        let invoker: Arc<dyn Invoker> =
            self.self_ref.upgrade().expect("ThreadPoolInvoker invoked after being dropped");
        std::thread::Builder::new()
            .name(format!("teal-{thread_id}"))
            .spawn(move || {
                Machine::new(thread_id, controller, invoker).with_foreign_resolver(resolver).run();
            })
            .expect("failed to spawn a thread for an invoked machine");
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use teal_core::{Executable, Instruction, Value};
    use teal_processor::ExecutionOptions;

    use super::*;

    fn returns_42() -> Executable {
        Executable::new(vec![Instruction::PushV(Value::Int(42)), Instruction::Return], HashMap::new(), HashMap::new())
    }

    #[test]
    fn inline_invoker_runs_the_root_thread_to_completion() {
        let (controller, root) = Controller::new(returns_42(), vec![], ExecutionOptions::unlimited());
        let invoker = InlineInvoker::new(controller.clone());
        invoker.invoke(root);
        assert_eq!(controller.stopped_thread(root).unwrap().snapshot.ds, vec![Value::Int(42)]);
    }

    #[test]
    fn thread_pool_invoker_runs_the_root_thread_to_completion() {
        let (controller, root) = Controller::new(returns_42(), vec![], ExecutionOptions::unlimited());
        let invoker = ThreadPoolInvoker::new(controller.clone());
        invoker.invoke(root);
        // The invocation is asynchronous; poll briefly for completion.
        for _ in 0..200 {
            if controller.stopped_thread(root).is_some() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert_eq!(controller.stopped_thread(root).unwrap().snapshot.ds, vec![Value::Int(42)]);
    }
}
