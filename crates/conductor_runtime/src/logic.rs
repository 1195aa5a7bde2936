//! User supplied business logic.
//!
//! Logic is registered by name in the [`ComponentCatalog`](crate::catalog::ComponentCatalog)
//! and referenced from definitions. It reports business success or failure
//! through its boolean result; an `Err` is an unexpected failure and aborts
//! the run.

use async_trait::async_trait;
use conductor_core::{DbHandle, ExecutionContext};

/// Logic working on the context only
#[async_trait]
pub trait Logic: Send + Sync {
    /// Do the work
    ///
    /// # Errors
    ///
    /// Returns error on unexpected failure
    async fn execute(&self, ctx: &ExecutionContext) -> anyhow::Result<bool>;
}

/// Logic that needs a db handle
#[async_trait]
pub trait DbLogic: Send + Sync {
    /// Do the work with `handle`
    ///
    /// # Errors
    ///
    /// Returns error on unexpected failure
    async fn execute(&self, ctx: &ExecutionContext, handle: &dyn DbHandle) -> anyhow::Result<bool>;
}

/// Synchronous closure as [`Logic`]
pub struct FnLogic<F>(F);

impl<F> FnLogic<F>
where
    F: Fn(&ExecutionContext) -> anyhow::Result<bool> + Send + Sync,
{
    /// Wrap a closure
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F> Logic for FnLogic<F>
where
    F: Fn(&ExecutionContext) -> anyhow::Result<bool> + Send + Sync,
{
    async fn execute(&self, ctx: &ExecutionContext) -> anyhow::Result<bool> {
        (self.0)(ctx)
    }
}

/// Synchronous closure as [`DbLogic`]
pub struct FnDbLogic<F>(F);

impl<F> FnDbLogic<F>
where
    F: Fn(&ExecutionContext, &dyn DbHandle) -> anyhow::Result<bool> + Send + Sync,
{
    /// Wrap a closure
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F> DbLogic for FnDbLogic<F>
where
    F: Fn(&ExecutionContext, &dyn DbHandle) -> anyhow::Result<bool> + Send + Sync,
{
    async fn execute(&self, ctx: &ExecutionContext, handle: &dyn DbHandle) -> anyhow::Result<bool> {
        (self.0)(ctx, handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fn_logic() {
        let logic = FnLogic::new(|ctx| Ok(ctx.has_value("a")));
        let ctx = ExecutionContext::new("svc");
        assert!(!logic.execute(&ctx).await.unwrap());
        ctx.set_value("a", 1);
        assert!(logic.execute(&ctx).await.unwrap());
    }

    #[tokio::test]
    async fn test_fn_logic_error() {
        let logic = FnLogic::new(|_| Err(anyhow::anyhow!("boom")));
        let err = logic.execute(&ExecutionContext::new("svc")).await.unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }
}
