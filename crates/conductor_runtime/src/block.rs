//! Block interpreter.
//!
//! Runs a list of actions in order, honouring jumps within the list. Stop,
//! break-loop and next-loop end the pass and are handed to the caller, who
//! decides what they mean.

use crate::action::{Action, Container, Invocation};
use async_trait::async_trait;
use conductor_core::{EngineError, EngineResult, ExecutionContext, Signal};

/// An ordered list of actions forming one jump scope
#[derive(Debug)]
pub struct ActionBlock {
    name: String,
    actions: Vec<Action>,
}

impl ActionBlock {
    /// Create a block
    #[must_use]
    pub fn new(name: impl Into<String>, actions: Vec<Action>) -> Self {
        Self {
            name: name.into(),
            actions,
        }
    }

    /// Owner name used in diagnostics
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of actions
    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Has no actions?
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Actions in order
    #[must_use]
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Run the actions from the first one
    ///
    /// Returns [`Signal::Continue`] when the end of the block is reached,
    /// otherwise the stop, break-loop or next-loop signal that ended it.
    ///
    /// # Errors
    ///
    /// Returns error if an action fails or jumps outside the block
    pub async fn execute(&self, ctx: &ExecutionContext, inv: Invocation<'_>) -> EngineResult<Signal> {
        let mut idx = 0;
        while idx < self.actions.len() {
            let action = &self.actions[idx];
            match action.execute(ctx, inv).await? {
                Signal::Continue => idx += 1,
                Signal::JumpTo(target) if target < self.actions.len() => {
                    inv.metrics().record_jump();
                    tracing::debug!(
                        block = %self.name,
                        from = action.name(),
                        to = self.actions[target].name(),
                        "jump"
                    );
                    idx = target;
                }
                Signal::JumpTo(target) => {
                    return Err(EngineError::JumpTargetNotFound {
                        action: action.name().to_string(),
                        target: format!("#{}", target),
                    });
                }
                signal => return Ok(signal),
            }
        }
        Ok(Signal::Continue)
    }
}

/// A block nested inside another block
#[derive(Debug)]
pub struct NestedBlock {
    block: ActionBlock,
}

impl NestedBlock {
    /// Wrap a block
    #[must_use]
    pub fn new(block: ActionBlock) -> Self {
        Self { block }
    }
}

#[async_trait]
impl Container for NestedBlock {
    async fn run(&self, ctx: &ExecutionContext, inv: Invocation<'_>) -> EngineResult<Signal> {
        self.block.execute(ctx, inv).await
    }
}
