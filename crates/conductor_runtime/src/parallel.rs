//! Parallel blocks.
//!
//! An optional initial action runs first, then every child runs on its own
//! worker thread, then an optional final action runs once all children are
//! done. Children share the context and the caller's db handle. Their
//! signals are not interpreted; their failures are collected.
//!
//! Workers drive their child through the current tokio runtime. On a
//! current-thread runtime that runtime is blocked while the children run,
//! so children must not wait on tokio timers or IO there.

use crate::action::{Action, Container, Invocation};
use async_trait::async_trait;
use conductor_core::{EngineError, EngineResult, ExecutionContext, Signal};
use std::any::Any;
use std::thread;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::Semaphore;

/// Runs child actions concurrently and joins them
#[derive(Debug)]
pub struct SynchronizeAction {
    name: String,
    initial: Option<Box<Action>>,
    children: Vec<Action>,
    final_action: Option<Box<Action>>,
    limit: usize,
}

impl SynchronizeAction {
    /// Create a parallel block running at most `limit` children at a time
    #[must_use]
    pub fn new(name: impl Into<String>, children: Vec<Action>, limit: usize) -> Self {
        Self {
            name: name.into(),
            initial: None,
            children,
            final_action: None,
            limit: limit.max(1),
        }
    }

    /// Run `action` before the children
    #[must_use]
    pub fn with_initial(mut self, action: Action) -> Self {
        self.initial = Some(Box::new(action));
        self
    }

    /// Run `action` after all children finished
    #[must_use]
    pub fn with_final(mut self, action: Action) -> Self {
        self.final_action = Some(Box::new(action));
        self
    }

    /// Run every child on a worker of its own, at most `limit` at a time, and join them all
    fn fan_out(&self, ctx: &ExecutionContext, inv: Invocation<'_>) -> EngineResult<()> {
        let runtime = Handle::try_current()
            .map_err(|e| EngineError::action_failed(self.name.as_str(), e))?;
        tracing::debug!(action = %self.name, children = self.children.len(), limit = self.limit, "parallel start");

        let permits = Semaphore::new(self.limit);
        let join_all = || {
            thread::scope(|scope| {
                let workers: Vec<_> = self
                    .children
                    .iter()
                    .map(|child| {
                        let (runtime, permits) = (&runtime, &permits);
                        let worker = thread::Builder::new()
                            .name(format!("{}/{}", self.name, child.name()))
                            .spawn_scoped(scope, move || {
                                runtime.block_on(async move {
                                    let _permit = permits.acquire().await;
                                    inv.metrics().record_parallel_task();
                                    child.execute(ctx, inv).await
                                })
                            });
                        (child.name(), worker)
                    })
                    .collect();
                workers
                    .into_iter()
                    .map(|(child, worker)| match worker {
                        Ok(worker) => (child, worker.join()),
                        Err(e) => (child, Ok(Err(EngineError::action_failed(child, e)))),
                    })
                    .collect::<Vec<_>>()
            })
        };
        let outcomes = if runtime.runtime_flavor() == RuntimeFlavor::MultiThread {
            tokio::task::block_in_place(join_all)
        } else {
            join_all()
        };

        let mut errors = Vec::new();
        for (child, outcome) in outcomes {
            match outcome {
                Ok(Ok(signal)) if signal.is_continue() => {}
                Ok(Ok(signal)) => {
                    tracing::debug!(action = %self.name, child, %signal, "signal of parallel child ignored");
                }
                Ok(Err(e)) => {
                    tracing::error!(action = %self.name, child, error = %e, "parallel child failed");
                    errors.push(e);
                }
                Err(payload) => {
                    let reason = panic_reason(payload.as_ref());
                    tracing::error!(action = %self.name, child, %reason, "parallel child panicked");
                    errors.push(EngineError::ActionPanicked {
                        action: child.to_string(),
                        reason,
                    });
                }
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(EngineError::Parallel(errors))
        }
    }
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[async_trait]
impl Container for SynchronizeAction {
    async fn run(&self, ctx: &ExecutionContext, inv: Invocation<'_>) -> EngineResult<Signal> {
        if let Some(initial) = &self.initial {
            match initial.execute(ctx, inv).await? {
                Signal::Continue => {}
                Signal::Stop => return Ok(Signal::Stop),
                Signal::BreakLoop => return Ok(Signal::Continue),
                signal => {
                    tracing::warn!(
                        action = %self.name,
                        %signal,
                        "initial action of a parallel block can only stop or break, parallel block skipped"
                    );
                    return Ok(Signal::Continue);
                }
            }
        }

        self.fan_out(ctx, inv)?;

        match &self.final_action {
            Some(last) => last.execute(ctx, inv).await,
            None => Ok(Signal::Continue),
        }
    }
}
