//! Db-bound actions.
//!
//! A db action uses the handle of its run when that handle is good enough
//! for it. When the run has delegated transactions, it acquires a handle of
//! its own, commits or rolls it back and releases it again.

use crate::action::{Invocation, Operand, Work};
use crate::logic::DbLogic;
use async_trait::async_trait;
use conductor_core::{
    DbHandle, DbUsage, EngineError, EngineResult, ExecutionContext, Resources, Value,
};
use std::fmt;
use std::sync::Arc;

/// Work that needs a db handle
#[async_trait]
pub trait DbWork: Send + Sync + fmt::Debug {
    /// Do the work with `handle`
    ///
    /// # Errors
    ///
    /// Returns error on resource or logic failure
    async fn act_with_db(&self, ctx: &ExecutionContext, handle: &dyn DbHandle) -> EngineResult<bool>;
}

/// A simple action bound to the db
#[derive(Debug)]
pub struct DbAction {
    name: String,
    usage: DbUsage,
    schema: Option<String>,
    resources: Resources,
    work: Box<dyn DbWork>,
}

impl DbAction {
    /// Create a db action with the usage it declares
    #[must_use]
    pub fn new(name: impl Into<String>, usage: DbUsage, work: Box<dyn DbWork>) -> Self {
        Self {
            name: name.into(),
            usage,
            schema: None,
            resources: Resources::new(),
            work,
        }
    }

    /// Schema for a handle of its own
    #[must_use]
    pub fn with_schema(mut self, schema: Option<String>) -> Self {
        self.schema = schema;
        self
    }

    /// Resources to acquire a handle of its own from
    #[must_use]
    pub fn with_resources(mut self, resources: Resources) -> Self {
        self.resources = resources;
        self
    }

    async fn act_with_own_handle(&self, ctx: &ExecutionContext) -> EngineResult<bool> {
        let access = self.usage.access_type().ok_or_else(|| EngineError::MissingDbResource {
            action: self.name.clone(),
        })?;
        let driver = self.resources.require_db_driver(&self.name)?;
        let handle = driver.acquire(access, self.schema.as_deref()).await?;
        tracing::debug!(action = %self.name, ?access, "acquired own db handle");

        let outcome = self.work.act_with_db(ctx, handle.as_ref()).await;
        let commit = access
            .is_transactional()
            .then(|| outcome.is_ok() && !ctx.is_in_error());
        let closed = close_handle(handle, commit).await;
        merge(outcome, closed, &self.name, "closing db handle")
    }
}

#[async_trait]
impl Work for DbAction {
    async fn act(&self, ctx: &ExecutionContext, inv: Invocation<'_>) -> EngineResult<bool> {
        if let Some(handle) = inv.handle() {
            if !self.usage.updates_db() || handle.access_type().updates_db() {
                return self.work.act_with_db(ctx, handle).await;
            }
        }
        if inv.is_delegated() {
            return self.act_with_own_handle(ctx).await;
        }
        Err(EngineError::MissingDbResource {
            action: self.name.clone(),
        })
    }
}

/// Commit (`Some(true)`), roll back (`Some(false)`) or just release a handle.
///
/// The handle is released even when commit or rollback fails; the first
/// failure is reported.
pub(crate) async fn close_handle(
    handle: Box<dyn DbHandle>,
    commit: Option<bool>,
) -> EngineResult<()> {
    let ended = match commit {
        Some(true) => handle.commit().await,
        Some(false) => handle.rollback().await,
        None => Ok(()),
    };
    let released = handle.release().await;
    ended?;
    released?;
    Ok(())
}

/// Keep the first error; later ones are only logged
pub(crate) fn merge<T>(
    outcome: EngineResult<T>,
    later: EngineResult<()>,
    owner: &str,
    step: &str,
) -> EngineResult<T> {
    match (outcome, later) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(secondary)) => {
            tracing::warn!(component = owner, step, error = %secondary, "secondary failure after error");
            Err(e)
        }
    }
}

/// Registered [`DbLogic`]
pub struct DbLogicWork {
    action: String,
    logic: Arc<dyn DbLogic>,
}

impl DbLogicWork {
    /// Wrap registered logic on behalf of `action`
    #[must_use]
    pub fn new(action: impl Into<String>, logic: Arc<dyn DbLogic>) -> Self {
        Self {
            action: action.into(),
            logic,
        }
    }
}

impl fmt::Debug for DbLogicWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbLogicWork").field("action", &self.action).finish()
    }
}

#[async_trait]
impl DbWork for DbLogicWork {
    async fn act_with_db(&self, ctx: &ExecutionContext, handle: &dyn DbHandle) -> EngineResult<bool> {
        self.logic
            .execute(ctx, handle)
            .await
            .map_err(|e| EngineError::action_failed(&self.action, format!("{e:#}")))
    }
}

/// A statement with parameters from fields, or from the rows of a sheet
#[derive(Debug)]
pub struct ExecuteSqlWork {
    statement: String,
    parameters: Vec<String>,
    input_sheet: Option<String>,
}

impl ExecuteSqlWork {
    /// Create the work
    #[must_use]
    pub fn new(statement: impl Into<String>, parameters: Vec<String>, input_sheet: Option<String>) -> Self {
        Self {
            statement: statement.into(),
            parameters,
            input_sheet,
        }
    }

    fn rows(&self, ctx: &ExecutionContext, sheet: &str) -> Option<Vec<Vec<Value>>> {
        ctx.read_sheet(sheet, |s| {
            (0..s.len())
                .map(|row| {
                    self.parameters
                        .iter()
                        .map(|p| {
                            let column = p.strip_prefix('$').unwrap_or(p);
                            s.column_value(column, row).cloned().unwrap_or_default()
                        })
                        .collect()
                })
                .collect()
        })
    }
}

#[async_trait]
impl DbWork for ExecuteSqlWork {
    async fn act_with_db(&self, ctx: &ExecutionContext, handle: &dyn DbHandle) -> EngineResult<bool> {
        let batches = match &self.input_sheet {
            Some(sheet) => match self.rows(ctx, sheet) {
                Some(rows) => rows,
                None => {
                    tracing::debug!(sheet = %sheet, "input sheet not found, nothing to execute");
                    return Ok(false);
                }
            },
            None => vec![
                self.parameters
                    .iter()
                    .map(|p| Operand::parse(p).value(ctx))
                    .collect(),
            ],
        };
        let mut affected = 0;
        for params in &batches {
            affected += handle.execute(&self.statement, params).await?;
        }
        tracing::debug!(statement = %self.statement, batches = batches.len(), affected, "statement executed");
        Ok(affected > 0)
    }
}
