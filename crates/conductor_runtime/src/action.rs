//! The action contract and its shared post-processing.
//!
//! An [`Action`] is a prepared header plus a body. The header decides
//! whether the action runs at all (condition, sheet guards) and turns the
//! boolean outcome of simple work into a [`Signal`] (messages, jumps,
//! stop-on-error). Containers (blocks, loops, parallel blocks) produce a
//! signal themselves and bypass post-processing.

use crate::monitor::RunMetrics;
use async_trait::async_trait;
use conductor_core::{
    DbHandle, EngineResult, ExecutionContext, Message, MessageDef, MessageKind, Signal, Value,
};
use conductor_plan::Condition;
use std::fmt;
use std::time::Instant;

/// Per-call arguments handed down the action tree
#[derive(Clone, Copy)]
pub struct Invocation<'a> {
    handle: Option<&'a dyn DbHandle>,
    delegated: bool,
    metrics: &'a RunMetrics,
}

impl<'a> Invocation<'a> {
    /// Create an invocation
    #[must_use]
    pub fn new(handle: Option<&'a dyn DbHandle>, delegated: bool, metrics: &'a RunMetrics) -> Self {
        Self {
            handle,
            delegated,
            metrics,
        }
    }

    /// Db handle shared by the run, if any
    #[must_use]
    pub fn handle(&self) -> Option<&'a dyn DbHandle> {
        self.handle
    }

    /// Has the processor delegated transactions to its actions?
    #[must_use]
    pub fn is_delegated(&self) -> bool {
        self.delegated
    }

    /// Counters of the run
    #[must_use]
    pub fn metrics(&self) -> &'a RunMetrics {
        self.metrics
    }

    /// Same run, different handle and delegation
    #[must_use]
    pub fn with_handle(self, handle: Option<&'a dyn DbHandle>, delegated: bool) -> Self {
        Self {
            handle,
            delegated,
            metrics: self.metrics,
        }
    }
}

impl fmt::Debug for Invocation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("handle", &self.handle.map(|h| h.access_type()))
            .field("delegated", &self.delegated)
            .finish()
    }
}

/// Work of a simple action, reporting business success
#[async_trait]
pub trait Work: Send + Sync + fmt::Debug {
    /// Do the work
    ///
    /// # Errors
    ///
    /// Returns error on configuration, resource or logic failure
    async fn act(&self, ctx: &ExecutionContext, inv: Invocation<'_>) -> EngineResult<bool>;
}

/// Work of a container action, producing a signal
#[async_trait]
pub trait Container: Send + Sync + fmt::Debug {
    /// Run the contained actions
    ///
    /// # Errors
    ///
    /// Returns error if any contained action fails
    async fn run(&self, ctx: &ExecutionContext, inv: Invocation<'_>) -> EngineResult<Signal>;
}

/// What an action does once its header let it run
#[derive(Debug)]
pub enum Body {
    /// Work with a boolean outcome, followed by post-processing
    Simple(Box<dyn Work>),
    /// Blocks of actions, whose signal is returned unchanged
    Container(Box<dyn Container>),
}

/// A message to add, with parameters still to be resolved
#[derive(Debug, Clone, PartialEq)]
pub struct MessageTemplate {
    def: MessageDef,
    params: Vec<String>,
}

impl MessageTemplate {
    /// Create a template
    #[must_use]
    pub fn new(def: MessageDef, params: Vec<String>) -> Self {
        Self { def, params }
    }

    /// Format against the current fields; `$name` parameters are field values
    #[must_use]
    pub fn render(&self, ctx: &ExecutionContext) -> Message {
        let params: Vec<String> = self
            .params
            .iter()
            .map(|p| match p.strip_prefix('$') {
                Some(field) => ctx.get_value(field).map(|v| v.to_string()).unwrap_or_default(),
                None => p.clone(),
            })
            .collect();
        self.def.format(&params)
    }

    /// Kind of the message
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        self.def.kind
    }
}

/// Prepared, immutable attributes common to every action
#[derive(Debug, Clone, Default)]
pub struct ActionHeader {
    pub(crate) name: String,
    pub(crate) condition: Option<Condition>,
    pub(crate) rows_in_sheet: Option<String>,
    pub(crate) no_rows_in_sheet: Option<String>,
    pub(crate) success_message: Option<MessageTemplate>,
    pub(crate) failure_message: Option<MessageTemplate>,
    pub(crate) success_jump: Option<Signal>,
    pub(crate) failure_jump: Option<Signal>,
    pub(crate) stop_on_error: bool,
    pub(crate) post_processing: bool,
    pub(crate) log_timing: bool,
}

impl ActionHeader {
    /// A header with only a name
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Name of the action
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Does the action do anything after its work?
    #[must_use]
    pub fn requires_post_processing(&self) -> bool {
        self.post_processing
    }

    /// Check condition and sheet guards
    ///
    /// # Errors
    ///
    /// Returns error if the condition fails to evaluate
    pub fn should_run(&self, ctx: &ExecutionContext) -> EngineResult<bool> {
        if let Some(condition) = &self.condition {
            if !condition.is_true(ctx)? {
                return Ok(false);
            }
        }
        if let Some(sheet) = &self.rows_in_sheet {
            if ctx.nbr_rows_in_sheet(sheet) == 0 {
                return Ok(false);
            }
        }
        if let Some(sheet) = &self.no_rows_in_sheet {
            if ctx.nbr_rows_in_sheet(sheet) > 0 {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Turn the outcome of simple work into a signal
    #[must_use]
    pub fn post_process(&self, ctx: &ExecutionContext, success: bool) -> Signal {
        if !self.post_processing {
            return Signal::Continue;
        }
        let (message, jump) = if success {
            (&self.success_message, self.success_jump)
        } else {
            (&self.failure_message, self.failure_jump)
        };
        if let Some(template) = message {
            let kind = ctx.add_message(template.render(ctx));
            if kind == MessageKind::Error && self.stop_on_error {
                return Signal::Stop;
            }
        }
        jump.unwrap_or(Signal::Continue)
    }
}

/// A prepared action
#[derive(Debug)]
pub struct Action {
    header: ActionHeader,
    body: Body,
}

impl Action {
    /// Combine a header and a body
    #[must_use]
    pub fn new(header: ActionHeader, body: Body) -> Self {
        Self { header, body }
    }

    /// Name of the action
    #[must_use]
    pub fn name(&self) -> &str {
        &self.header.name
    }

    /// Prepared header
    #[must_use]
    pub fn header(&self) -> &ActionHeader {
        &self.header
    }

    /// Run the action
    ///
    /// # Errors
    ///
    /// Returns error on configuration, resource or logic failure
    pub async fn execute(&self, ctx: &ExecutionContext, inv: Invocation<'_>) -> EngineResult<Signal> {
        if !self.header.should_run(ctx)? {
            inv.metrics().record_skip();
            tracing::debug!(action = %self.header.name, "action skipped");
            return Ok(Signal::Continue);
        }
        inv.metrics().record_execution();
        let started = Instant::now();
        let signal = match &self.body {
            Body::Container(container) => container.run(ctx, inv).await?,
            Body::Simple(work) => {
                let success = work.act(ctx, inv).await?;
                tracing::debug!(action = %self.header.name, success, "action worked");
                self.header.post_process(ctx, success)
            }
        };
        if self.header.log_timing {
            tracing::debug!(
                action = %self.header.name,
                %signal,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "action finished"
            );
        }
        Ok(signal)
    }
}

/// Value of an operand: `$name` reads a field, anything else is a literal
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// Field reference
    Field(String),
    /// Literal value
    Literal(Value),
}

impl Operand {
    /// Parse an operand as written in definitions
    #[must_use]
    pub fn parse(text: &str) -> Self {
        match text.strip_prefix('$') {
            Some(field) => Self::Field(field.to_string()),
            None => Self::Literal(Value::parse_literal(text)),
        }
    }

    /// Current value; a missing field is null
    #[must_use]
    pub fn value(&self, ctx: &ExecutionContext) -> Value {
        match self {
            Self::Field(name) => ctx.get_value(name).unwrap_or_default(),
            Self::Literal(value) => value.clone(),
        }
    }
}
