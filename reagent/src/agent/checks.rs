//! Final-answer validation hooks.

use std::sync::Arc;

use serde_json::Value;

use crate::error::{AgentError, Result};
use crate::memory::AgentMemory;

/// A check run against a candidate final answer before the run completes.
///
/// Returning an error rejects the answer: the rejection is recorded on the
/// step and the loop continues so the model can produce a better one.
pub type FinalAnswerCheck =
    Arc<dyn Fn(&Value, &AgentMemory) -> Result<()> + Send + Sync>;

/// Ordered collection of final-answer checks.
#[derive(Clone, Default)]
pub struct FinalAnswerChecks {
    checks: Vec<FinalAnswerCheck>,
}

impl FinalAnswerChecks {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a check.
    pub fn push<F>(&mut self, check: F)
    where
        F: Fn(&Value, &AgentMemory) -> Result<()> + Send + Sync + 'static,
    {
        self.checks.push(Arc::new(check));
    }

    /// Whether no checks are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Run every check in order; the first failure wins.
    ///
    /// # Errors
    ///
    /// The failing check's error, normalized to an [`AgentError`].
    pub fn validate(&self, answer: &Value, memory: &AgentMemory) -> Result<()> {
        for check in &self.checks {
            check(answer, memory).map_err(|e| {
                AgentError::execution(format!("final answer check failed: {e}"))
            })?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for FinalAnswerChecks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FinalAnswerChecks")
            .field("count", &self.checks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checks_run_in_order() {
        let mut checks = FinalAnswerChecks::new();
        checks.push(|answer, _| {
            if answer.is_number() {
                Ok(())
            } else {
                Err(AgentError::execution("answer must be numeric"))
            }
        });

        let memory = AgentMemory::new("sys");
        assert!(checks.validate(&Value::from(3), &memory).is_ok());
        let err = checks.validate(&Value::from("x"), &memory).unwrap_err();
        assert!(err.to_string().contains("must be numeric"));
    }
}
