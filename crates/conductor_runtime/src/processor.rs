//! Transaction processor.
//!
//! Owns the resource lifecycle of one run: borrows a messaging session,
//! begins an external transaction, acquires a db handle, runs its block and
//! then undoes all of that in reverse order, committing only when the run
//! ended without error. Called from another processor it reuses the
//! caller's handle when its declared usage allows that.

use crate::action::{Invocation, Work};
use crate::block::ActionBlock;
use crate::db::{close_handle, merge};
use crate::monitor::{Metrics, RunMetrics};
use async_trait::async_trait;
use conductor_core::{
    schema_matches, DbAccessType, DbHandle, DbUsage, EngineError, EngineResult, ExecutionContext,
    MessagingSession, MessagingSetup, MessagingUsage, Resources, Signal,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

/// Outcome of a top-level run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Unique id of the run
    pub run_id: Uuid,
    /// Processor that ran
    pub processor: String,
    /// Did an action stop the run?
    pub stopped: bool,
    /// Did the run add error messages?
    pub in_error: bool,
    /// Counters
    pub metrics: Metrics,
    /// Wall clock time
    pub elapsed_ms: u64,
}

/// A prepared processor
#[derive(Debug)]
pub struct TransactionProcessor {
    name: String,
    db_usage: DbUsage,
    schema: Option<String>,
    messaging: Option<MessagingUsage>,
    block: ActionBlock,
    resources: Resources,
}

type BorrowedSession = (Arc<dyn MessagingSetup>, Arc<dyn MessagingSession>, Option<Arc<dyn MessagingSession>>);

impl TransactionProcessor {
    /// Create a processor with no db or messaging usage
    #[must_use]
    pub fn new(name: impl Into<String>, block: ActionBlock, resources: Resources) -> Self {
        Self {
            name: name.into(),
            db_usage: DbUsage::None,
            schema: None,
            messaging: None,
            block,
            resources,
        }
    }

    /// Set db usage
    #[must_use]
    pub fn with_db_usage(mut self, usage: DbUsage) -> Self {
        self.db_usage = usage;
        self
    }

    /// Set the non-default schema
    #[must_use]
    pub fn with_schema(mut self, schema: Option<String>) -> Self {
        self.schema = schema;
        self
    }

    /// Set messaging usage
    #[must_use]
    pub fn with_messaging(mut self, usage: Option<MessagingUsage>) -> Self {
        self.messaging = usage;
        self
    }

    /// Service name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared db usage
    #[must_use]
    pub fn db_usage(&self) -> DbUsage {
        self.db_usage
    }

    /// Top-level block
    #[must_use]
    pub fn block(&self) -> &ActionBlock {
        &self.block
    }

    /// Run as a top-level service
    ///
    /// # Errors
    ///
    /// Returns error on configuration, resource or logic failure; all
    /// resources have been given back and transactions rolled back by then
    pub async fn execute(&self, ctx: &ExecutionContext) -> EngineResult<RunReport> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("run", processor = %self.name, %run_id);
        async move {
            let started = Instant::now();
            let metrics = RunMetrics::new();
            tracing::info!(db_usage = ?self.db_usage, messaging = ?self.messaging, "run started");
            match self.run_owned(ctx, &metrics).await {
                Ok(signal) => {
                    let report = RunReport {
                        run_id,
                        processor: self.name.clone(),
                        stopped: signal == Signal::Stop,
                        in_error: ctx.is_in_error(),
                        metrics: metrics.snapshot(),
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    };
                    tracing::info!(
                        stopped = report.stopped,
                        in_error = report.in_error,
                        elapsed_ms = report.elapsed_ms,
                        "run finished"
                    );
                    Ok(report)
                }
                Err(e) => {
                    tracing::error!(error = %e, context = %ctx.summary(), "run failed");
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Run as an action of another processor, returning false when the context is in error
    ///
    /// # Errors
    ///
    /// Returns error when the caller's handle does not fit the declared
    /// usage, or when the run itself fails
    pub async fn execute_as_action(&self, ctx: &ExecutionContext, inv: Invocation<'_>) -> EngineResult<bool> {
        let independent = self
            .messaging
            .is_some_and(MessagingUsage::requires_independent_management);
        if inv.is_delegated() || independent {
            tracing::debug!(processor = %self.name, "sub-processor manages its own resources");
            self.run_owned(ctx, inv.metrics()).await?;
            return Ok(!ctx.is_in_error());
        }

        let handle = inv.handle();
        let schema = self.schema.as_deref();
        let fits = |h: &dyn DbHandle, writes: bool| {
            (!writes || h.access_type().updates_db()) && schema_matches(schema, h.schema())
        };
        let sub = match self.db_usage {
            DbUsage::None => Some(inv),
            DbUsage::ReadOnly => handle.filter(|h| fits(*h, false)).map(|h| inv.with_handle(Some(h), false)),
            DbUsage::ReadWrite => handle.filter(|h| fits(*h, true)).map(|h| inv.with_handle(Some(h), false)),
            DbUsage::External => handle
                .filter(|h| h.access_type() == DbAccessType::ExternallyManaged)
                .map(|h| inv.with_handle(Some(h), false)),
            DbUsage::Delegated => Some(inv.with_handle(None, true)),
        };
        let Some(sub) = sub else {
            return Err(EngineError::UsageMismatch {
                processor: self.name.clone(),
                declared: self.db_usage,
                handle: handle.map(|h| h.access_type()),
            });
        };

        let previous = ctx.is_transaction_delegated();
        ctx.set_transaction_delegated(sub.is_delegated());
        let outcome = self.run_block(ctx, sub).await;
        ctx.set_transaction_delegated(previous);
        outcome?;
        Ok(!ctx.is_in_error())
    }

    /// Full resource lifecycle around the block
    async fn run_owned(&self, ctx: &ExecutionContext, metrics: &RunMetrics) -> EngineResult<Signal> {
        let coordinator = match self.db_usage {
            DbUsage::External => Some(self.resources.require_transactions(&self.name)?.clone()),
            _ => None,
        };
        let session = self.borrow_session(ctx).await?;

        if let Some(coordinator) = &coordinator {
            if let Err(e) = coordinator.begin().await {
                let returned = self.return_session(ctx, session, false).await;
                return merge(Err(e.into()), returned, &self.name, "returning messaging session");
            }
            tracing::debug!(processor = %self.name, "external transaction started");
        }

        let outcome = self.run_with_handle(ctx, metrics).await;

        let success = outcome.is_ok() && !ctx.is_in_error();
        let returned = self.return_session(ctx, session, success).await;
        let mut outcome = merge(outcome, returned, &self.name, "returning messaging session");

        if let Some(coordinator) = &coordinator {
            let ended = if outcome.is_ok() && !ctx.is_in_error() {
                coordinator.commit().await
            } else {
                tracing::info!(processor = %self.name, "rolling back external transaction");
                coordinator.rollback().await
            };
            outcome = merge(outcome, ended.map_err(EngineError::from), &self.name, "ending external transaction");
        }
        outcome
    }

    async fn borrow_session(&self, ctx: &ExecutionContext) -> EngineResult<Option<BorrowedSession>> {
        let Some(usage) = self.messaging else {
            return Ok(None);
        };
        let setup = self.resources.require_messaging(&self.name)?.clone();
        let session = setup.borrow_session(usage).await?;
        let previous = ctx.set_messaging_session(Some(session.clone()));
        Ok(Some((setup, session, previous)))
    }

    async fn return_session(
        &self,
        ctx: &ExecutionContext,
        borrowed: Option<BorrowedSession>,
        success: bool,
    ) -> EngineResult<()> {
        let Some((setup, session, previous)) = borrowed else {
            return Ok(());
        };
        ctx.set_messaging_session(previous);
        setup.return_session(session, success).await?;
        Ok(())
    }

    async fn run_with_handle(&self, ctx: &ExecutionContext, metrics: &RunMetrics) -> EngineResult<Signal> {
        let delegated = self.db_usage == DbUsage::Delegated;
        let previous = ctx.is_transaction_delegated();
        ctx.set_transaction_delegated(delegated);
        let outcome = self.acquire_and_run(ctx, metrics, delegated).await;
        ctx.set_transaction_delegated(previous);
        outcome
    }

    async fn acquire_and_run(&self, ctx: &ExecutionContext, metrics: &RunMetrics, delegated: bool) -> EngineResult<Signal> {
        let Some(access) = self.db_usage.access_type() else {
            return self.run_block(ctx, Invocation::new(None, delegated, metrics)).await;
        };
        let driver = self.resources.require_db_driver(&self.name)?;
        let handle = driver.acquire(access, self.schema.as_deref()).await?;
        tracing::debug!(processor = %self.name, ?access, "db handle acquired");

        let outcome = self
            .run_block(ctx, Invocation::new(Some(handle.as_ref()), false, metrics))
            .await;
        let commit = access
            .is_transactional()
            .then(|| outcome.is_ok() && !ctx.is_in_error());
        if commit == Some(false) {
            tracing::info!(processor = %self.name, "rolling back db transaction");
        }
        let closed = close_handle(handle, commit).await;
        merge(outcome, closed, &self.name, "closing db handle")
    }

    async fn run_block(&self, ctx: &ExecutionContext, inv: Invocation<'_>) -> EngineResult<Signal> {
        match self.block.execute(ctx, inv).await? {
            Signal::NextLoop => Err(EngineError::NextLoopOutsideLoop {
                action: self.name.clone(),
            }),
            Signal::BreakLoop | Signal::Stop => Ok(Signal::Stop),
            signal => Ok(signal),
        }
    }
}

/// Another processor called as an action
#[derive(Debug)]
pub struct ServiceCall {
    processor: Arc<TransactionProcessor>,
}

impl ServiceCall {
    /// Call `processor`
    #[must_use]
    pub fn new(processor: Arc<TransactionProcessor>) -> Self {
        Self { processor }
    }
}

#[async_trait]
impl Work for ServiceCall {
    async fn act(&self, ctx: &ExecutionContext, inv: Invocation<'_>) -> EngineResult<bool> {
        self.processor.execute_as_action(ctx, inv).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ComponentCatalog;
    use crate::logic::{FnDbLogic, FnLogic};
    use conductor_core::{Message, MessageDef, MessageKind, Sheet, Value};
    use conductor_plan::{ActionKind, ActionSpec, ProcessorSpec};
    use conductor_sim::{FailurePlan, FailurePoint, ResourceEvent, SimResources};

    fn catalog() -> ComponentCatalog {
        let mut catalog = ComponentCatalog::new();
        catalog.register_logic("yes", FnLogic::new(|_: &ExecutionContext| Ok(true)));
        catalog.register_logic("no", FnLogic::new(|_: &ExecutionContext| Ok(false)));
        catalog.register_logic(
            "fail",
            FnLogic::new(|_: &ExecutionContext| Err(anyhow::anyhow!("logic exploded"))),
        );
        catalog.register_logic(
            "flag_error",
            FnLogic::new(|ctx: &ExecutionContext| {
                ctx.add_message(Message::new("bad", MessageKind::Error, "bad data"));
                Ok(false)
            }),
        );
        catalog.register_db_logic(
            "touch",
            FnDbLogic::new(|_: &ExecutionContext, h: &dyn DbHandle| {
                Ok(h.access_type().updates_db())
            }),
        );
        catalog.add_message(MessageDef::new("warn", MessageKind::Warning, "careful"));
        catalog
    }

    fn trace(name: &str) -> ActionSpec {
        ActionSpec::new(ActionKind::SetValue {
            field_name: name.to_string(),
            field_value: Some("true".to_string()),
            expression: None,
        })
        .named(name)
    }

    #[tokio::test]
    async fn test_success_jump_skips_middle_action() {
        let sim = SimResources::new();
        let mut catalog = catalog();
        let spec = ProcessorSpec::new(
            "svc",
            vec![
                ActionSpec::logic("yes").named("a").on_success("c"),
                trace("b"),
                trace("c"),
            ],
        );
        let processor = catalog.prepare(&spec, &sim.resources()).unwrap();
        let ctx = ExecutionContext::new("svc");
        let report = processor.execute(&ctx).await.unwrap();
        assert!(!ctx.has_value("b"));
        assert!(ctx.has_value("c"));
        assert!(!report.stopped);
        assert_eq!(report.metrics.jumps, 1);
        assert_eq!(report.processor, "svc");
    }

    #[tokio::test]
    async fn test_read_write_commits_and_releases() {
        let sim = SimResources::new();
        let mut catalog = catalog();
        let spec = ProcessorSpec::new(
            "svc",
            vec![
                ActionSpec::execute_sql("insert into t values (?)", &["$id"]),
                ActionSpec::new(ActionKind::DbLogic {
                    logic_name: "touch".to_string(),
                    db_usage: DbUsage::ReadOnly,
                    schema_name: None,
                }),
            ],
        )
        .with_db_usage(DbUsage::ReadWrite);
        let processor = catalog.prepare(&spec, &sim.resources()).unwrap();
        let ctx = ExecutionContext::new("svc").with_value("id", 1);
        processor.execute(&ctx).await.unwrap();
        assert_eq!(sim.ledger().acquired_access(), vec![DbAccessType::ReadWrite]);
        assert_eq!(sim.ledger().commits(), 1);
        assert_eq!(sim.ledger().rollbacks(), 0);
        assert_eq!(sim.ledger().releases(), 1);
    }

    #[tokio::test]
    async fn test_read_write_rolls_back_when_in_error() {
        let sim = SimResources::new();
        let mut catalog = catalog();
        let spec = ProcessorSpec::new(
            "svc",
            vec![ActionSpec::execute_sql("delete from t", &[]), ActionSpec::logic("flag_error")],
        )
        .with_db_usage(DbUsage::ReadWrite);
        let processor = catalog.prepare(&spec, &sim.resources()).unwrap();
        let ctx = ExecutionContext::new("svc");
        let report = processor.execute(&ctx).await.unwrap();
        assert!(report.in_error);
        assert_eq!(sim.ledger().commits(), 0);
        assert_eq!(sim.ledger().rollbacks(), 1);
        assert_eq!(sim.ledger().releases(), 1);
    }

    #[tokio::test]
    async fn test_logic_error_rolls_back_and_propagates() {
        let sim = SimResources::new();
        let mut catalog = catalog();
        let spec = ProcessorSpec::new(
            "svc",
            vec![ActionSpec::execute_sql("delete from t", &[]), ActionSpec::logic("fail").named("boom")],
        )
        .with_db_usage(DbUsage::ReadWrite);
        let processor = catalog.prepare(&spec, &sim.resources()).unwrap();
        let err = processor.execute(&ExecutionContext::new("svc")).await.unwrap_err();
        assert_eq!(err, EngineError::action_failed("boom", "logic exploded"));
        assert_eq!(sim.ledger().rollbacks(), 1);
        assert_eq!(sim.ledger().releases(), 1);
    }

    #[tokio::test]
    async fn test_external_error_rolls_back_once() {
        let sim = SimResources::new();
        let mut catalog = catalog();
        let spec = ProcessorSpec::new(
            "svc",
            vec![ActionSpec::execute_sql("update t set x = 1", &[]), ActionSpec::logic("fail")],
        )
        .with_db_usage(DbUsage::External);
        let processor = catalog.prepare(&spec, &sim.resources()).unwrap();
        let err = processor.execute(&ExecutionContext::new("svc")).await.unwrap_err();
        assert!(matches!(err, EngineError::ActionFailed { .. }));
        let events = sim.ledger().events();
        assert_eq!(events.iter().filter(|e| **e == ResourceEvent::BeginExternal).count(), 1);
        assert_eq!(events.iter().filter(|e| **e == ResourceEvent::RollbackExternal).count(), 1);
        assert_eq!(events.iter().filter(|e| **e == ResourceEvent::CommitExternal).count(), 0);
        // the handle is externally managed; it is released, never committed
        assert_eq!(sim.ledger().commits(), 0);
        assert_eq!(sim.ledger().rollbacks(), 0);
        assert_eq!(sim.ledger().releases(), 1);
    }

    #[tokio::test]
    async fn test_external_success_commits() {
        let sim = SimResources::new();
        let mut catalog = catalog();
        let spec = ProcessorSpec::new("svc", vec![ActionSpec::execute_sql("update t set x = 1", &[])])
            .with_db_usage(DbUsage::External);
        let processor = catalog.prepare(&spec, &sim.resources()).unwrap();
        processor.execute(&ExecutionContext::new("svc")).await.unwrap();
        assert_eq!(sim.ledger().acquired_access(), vec![DbAccessType::ExternallyManaged]);
        assert_eq!(sim.ledger().count(|e| *e == ResourceEvent::CommitExternal), 1);
    }

    #[tokio::test]
    async fn test_begin_failure_returns_session() {
        let sim = SimResources::with_failures(FailurePlan::none().fail_on(FailurePoint::Begin));
        let mut catalog = catalog();
        let spec = ProcessorSpec::new("svc", vec![ActionSpec::logic("yes")])
            .with_db_usage(DbUsage::External)
            .with_messaging(MessagingUsage::Shared);
        let processor = catalog.prepare(&spec, &sim.resources()).unwrap();
        let ctx = ExecutionContext::new("svc");
        assert!(processor.execute(&ctx).await.is_err());
        assert_eq!(sim.ledger().count(|e| *e == ResourceEvent::Return { success: false }), 1);
        assert_eq!(sim.ledger().acquires(), 0);
        assert!(ctx.messaging_session().is_none());
    }

    #[tokio::test]
    async fn test_read_only_sub_processor_reuses_caller_handle() {
        let sim = SimResources::new();
        let mut catalog = catalog();
        let inner = ProcessorSpec::new(
            "inner",
            vec![ActionSpec::new(ActionKind::DbLogic {
                logic_name: "touch".to_string(),
                db_usage: DbUsage::ReadOnly,
                schema_name: None,
            })],
        )
        .with_db_usage(DbUsage::ReadOnly);
        catalog.prepare(&inner, &sim.resources()).unwrap();
        let outer = ProcessorSpec::new(
            "outer",
            vec![ActionSpec::execute_service("inner").named("call").on_failure("_stop"), trace("after")],
        )
        .with_db_usage(DbUsage::ReadWrite);
        let processor = catalog.prepare(&outer, &sim.resources()).unwrap();
        let ctx = ExecutionContext::new("outer");
        let report = processor.execute(&ctx).await.unwrap();
        assert!(!report.stopped);
        assert!(ctx.has_value("after"));
        assert_eq!(sim.ledger().acquires(), 1);
        assert_eq!(sim.ledger().commits(), 1);
    }

    #[tokio::test]
    async fn test_read_write_sub_processor_rejects_read_only_handle() {
        let sim = SimResources::new();
        let mut catalog = catalog();
        let inner = ProcessorSpec::new("inner", vec![ActionSpec::execute_sql("update t", &[])])
            .with_db_usage(DbUsage::ReadWrite);
        catalog.prepare(&inner, &sim.resources()).unwrap();
        let outer = ProcessorSpec::new("outer", vec![ActionSpec::execute_service("inner")])
            .with_db_usage(DbUsage::ReadOnly);
        let processor = catalog.prepare(&outer, &sim.resources()).unwrap();
        let err = processor.execute(&ExecutionContext::new("outer")).await.unwrap_err();
        assert_eq!(
            err,
            EngineError::UsageMismatch {
                processor: "inner".to_string(),
                declared: DbUsage::ReadWrite,
                handle: Some(DbAccessType::ReadOnly),
            }
        );
        assert_eq!(sim.ledger().releases(), 1);
    }

    #[tokio::test]
    async fn test_delegated_processor_lets_actions_own_transactions() {
        let sim = SimResources::new();
        let mut catalog = catalog();
        let spec = ProcessorSpec::new(
            "svc",
            vec![
                ActionSpec::execute_sql("insert into a values (1)", &[]),
                ActionSpec::new(ActionKind::DbLogic {
                    logic_name: "touch".to_string(),
                    db_usage: DbUsage::ReadOnly,
                    schema_name: Some("reports".to_string()),
                }),
            ],
        )
        .with_db_usage(DbUsage::Delegated);
        let processor = catalog.prepare(&spec, &sim.resources()).unwrap();
        let ctx = ExecutionContext::new("svc");
        processor.execute(&ctx).await.unwrap();
        assert_eq!(
            sim.ledger().acquired_access(),
            vec![DbAccessType::ReadWrite, DbAccessType::ReadOnly]
        );
        assert_eq!(sim.ledger().commits(), 1);
        assert_eq!(sim.ledger().releases(), 2);
        assert!(!ctx.is_transaction_delegated());
    }

    #[tokio::test]
    async fn test_messaging_session_is_borrowed_and_returned() {
        let sim = SimResources::new();
        let mut catalog = catalog();
        let spec = ProcessorSpec::new(
            "svc",
            vec![ActionSpec::new(ActionKind::Publish {
                destination: "orders".to_string(),
                fields: vec!["id".to_string()],
            })],
        )
        .with_messaging(MessagingUsage::ServiceManaged);
        let processor = catalog.prepare(&spec, &sim.resources()).unwrap();
        let ctx = ExecutionContext::new("svc").with_value("id", 5);
        processor.execute(&ctx).await.unwrap();
        assert_eq!(sim.ledger().sent_to("orders"), vec![serde_json::json!({"id": 5})]);
        assert_eq!(sim.ledger().count(|e| *e == ResourceEvent::Return { success: true }), 1);
        assert!(ctx.messaging_session().is_none());
    }

    #[tokio::test]
    async fn test_stop_message_ends_run() {
        let sim = SimResources::new();
        let mut catalog = catalog();
        let spec = ProcessorSpec::new(
            "svc",
            vec![
                ActionSpec::logic("no").with_failure_message("warn", &[]).on_failure("_stop"),
                trace("after"),
            ],
        );
        let processor = catalog.prepare(&spec, &sim.resources()).unwrap();
        let ctx = ExecutionContext::new("svc");
        let report = processor.execute(&ctx).await.unwrap();
        assert!(report.stopped);
        assert!(!report.in_error);
        assert!(!ctx.has_value("after"));
        assert_eq!(ctx.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_loop_with_parallel_body() {
        let sim = SimResources::new();
        let mut catalog = catalog();
        let spec = ProcessorSpec::new(
            "svc",
            vec![ActionSpec::loop_over(
                "orders",
                vec![ActionSpec::synchronize(vec![ActionSpec::logic("yes"), ActionSpec::logic("yes")])],
            )],
        );
        let processor = catalog.prepare(&spec, &sim.resources()).unwrap();
        let sheet = Sheet::new(["id"])
            .with_row(vec![Value::Integer(1)])
            .with_row(vec![Value::Integer(2)]);
        let ctx = ExecutionContext::new("svc").with_sheet("orders", sheet);
        let report = processor.execute(&ctx).await.unwrap();
        assert_eq!(report.metrics.loop_passes, 2);
        assert_eq!(report.metrics.parallel_tasks, 4);
    }
}
