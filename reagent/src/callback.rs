//! Step callback registry.
//!
//! Callbacks observe steps as they are appended to memory. Handlers are
//! registered either for one step variant or for every step; dispatch
//! invokes variant handlers first, then any-step handlers, both in
//! registration order. A handler cannot veto its siblings.

use std::sync::Arc;

use crate::memory::{MemoryStep, StepVariant};

/// Context passed alongside the step to every callback.
#[derive(Debug, Clone, Default)]
pub struct CallbackContext {
    /// Current step number.
    pub step_number: usize,
    /// Configured step budget.
    pub max_steps: usize,
    /// Name of the agent dispatching the callback.
    pub agent_name: String,
}

impl CallbackContext {
    /// Create a new context.
    #[must_use]
    pub const fn new(step_number: usize, max_steps: usize) -> Self {
        Self {
            step_number,
            max_steps,
            agent_name: String::new(),
        }
    }

    /// Set the agent name.
    #[must_use]
    pub fn with_agent_name(mut self, name: impl Into<String>) -> Self {
        self.agent_name = name.into();
        self
    }
}

/// Boxed callback invoked with the step and the dispatch context.
pub type StepCallback = Arc<dyn Fn(&MemoryStep, &CallbackContext) + Send + Sync>;

struct Handler {
    target: Option<StepVariant>,
    callback: StepCallback,
}

/// Registry of step callbacks.
#[derive(Default)]
pub struct CallbackRegistry {
    handlers: Vec<Handler>,
}

impl CallbackRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for one step variant.
    pub fn register<F>(&mut self, variant: StepVariant, callback: F)
    where
        F: Fn(&MemoryStep, &CallbackContext) + Send + Sync + 'static,
    {
        self.handlers.push(Handler {
            target: Some(variant),
            callback: Arc::new(callback),
        });
    }

    /// Register a callback invoked for every step variant.
    pub fn register_any<F>(&mut self, callback: F)
    where
        F: Fn(&MemoryStep, &CallbackContext) + Send + Sync + 'static,
    {
        self.handlers.push(Handler {
            target: None,
            callback: Arc::new(callback),
        });
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Dispatch a step to every matching handler.
    ///
    /// Variant-specific handlers run before any-step handlers; within each
    /// group, registration order is preserved.
    pub fn dispatch(&self, step: &MemoryStep, ctx: &CallbackContext) {
        let variant = step.variant();
        for handler in &self.handlers {
            if handler.target == Some(variant) {
                (handler.callback)(step, ctx);
            }
        }
        for handler in &self.handlers {
            if handler.target.is_none() {
                (handler.callback)(step, ctx);
            }
        }
    }
}

impl std::fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{ActionStep, FinalAnswerStep};
    use std::sync::Mutex;

    fn action_step() -> MemoryStep {
        MemoryStep::Action(ActionStep {
            step_number: 1,
            ..Default::default()
        })
    }

    #[test]
    fn test_dispatch_matches_variant() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = CallbackRegistry::new();

        let log_a = Arc::clone(&log);
        registry.register(StepVariant::Action, move |_, _| {
            log_a.lock().unwrap().push("action");
        });
        let log_b = Arc::clone(&log);
        registry.register(StepVariant::FinalAnswer, move |_, _| {
            log_b.lock().unwrap().push("final");
        });
        let log_c = Arc::clone(&log);
        registry.register_any(move |_, _| {
            log_c.lock().unwrap().push("any");
        });

        let ctx = CallbackContext::new(1, 10);
        registry.dispatch(&action_step(), &ctx);
        assert_eq!(*log.lock().unwrap(), vec!["action", "any"]);

        log.lock().unwrap().clear();
        registry.dispatch(
            &MemoryStep::FinalAnswer(FinalAnswerStep {
                output: serde_json::json!(1),
            }),
            &ctx,
        );
        assert_eq!(*log.lock().unwrap(), vec!["final", "any"]);
    }

    #[test]
    fn test_dispatch_preserves_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = CallbackRegistry::new();
        for i in 0..3 {
            let log_i = Arc::clone(&log);
            registry.register(StepVariant::Action, move |_, _| {
                log_i.lock().unwrap().push(i);
            });
        }

        registry.dispatch(&action_step(), &CallbackContext::new(1, 10));
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_context_carries_step_info() {
        let seen = Arc::new(Mutex::new((0usize, 0usize, String::new())));
        let mut registry = CallbackRegistry::new();
        let seen_c = Arc::clone(&seen);
        registry.register_any(move |_, ctx| {
            *seen_c.lock().unwrap() = (ctx.step_number, ctx.max_steps, ctx.agent_name.clone());
        });

        let ctx = CallbackContext::new(3, 20).with_agent_name("tester");
        registry.dispatch(&action_step(), &ctx);
        assert_eq!(*seen.lock().unwrap(), (3, 20, "tester".to_owned()));
    }
}
