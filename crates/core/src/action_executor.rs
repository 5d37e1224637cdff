//! `ActionExecutor` (`spec.md` §4.5).

use std::sync::Arc;

use crate::action::Action;
use crate::state_manager::{ProcessResult, StateManager};

/// Runs one action through the state manager, awaiting async completion.
///
/// Never propagates an adapter panic/rejection to its caller — the
/// scheduler must not be wedged by a misbehaving adapter (`spec.md` §4.5,
/// §7 `StateManagerError` policy).
pub struct ActionExecutor {
    state_manager: Arc<dyn StateManager>,
}

impl ActionExecutor {
    pub fn new(state_manager: Arc<dyn StateManager>) -> Self {
        Self { state_manager }
    }

    /// Executes `action`, auto-assigning its id if the dispatcher omitted
    /// one, and returning `Err` only for logging purposes — the scheduler
    /// still considers the task complete either way.
    pub async fn execute_action(&self, action: &mut Action) -> Result<(), String> {
        let action_id = action.ensure_id();
        match self.state_manager.process_action(action) {
            ProcessResult::Sync => Ok(()),
            ProcessResult::Async(completion) => match completion.await {
                Ok(()) => Ok(()),
                Err(err) => {
                    tracing::warn!(
                        %action_id,
                        action_type = %action.action_type,
                        error = %err,
                        "state manager adapter failed to process action"
                    );
                    Err(err)
                }
            },
        }
    }
}

#[cfg(test)]
#[path = "action_executor_tests.rs"]
mod tests;
