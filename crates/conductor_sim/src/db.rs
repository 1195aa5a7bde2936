//! In-memory database driver.
//!
//! Handles hold no data. They record what was asked of them in the
//! [`ResourceLedger`] and fail when the [`FailurePlan`] says so.

use crate::failure::{FailurePlan, FailurePoint};
use crate::record::{ResourceEvent, ResourceLedger};
use async_trait::async_trait;
use conductor_core::{DbAccessType, DbDriver, DbHandle, ResourceError, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Driver handing out recording handles
#[derive(Debug, Clone)]
pub struct MemoryDbDriver {
    ledger: ResourceLedger,
    failures: FailurePlan,
    next_handle: Arc<AtomicU64>,
    schemas: Option<HashSet<String>>,
}

impl MemoryDbDriver {
    /// Create a driver recording into `ledger`
    #[must_use]
    pub fn new(ledger: ResourceLedger) -> Self {
        Self {
            ledger,
            failures: FailurePlan::none(),
            next_handle: Arc::new(AtomicU64::new(1)),
            schemas: None,
        }
    }

    /// Inject failures
    #[must_use]
    pub fn with_failures(mut self, failures: FailurePlan) -> Self {
        self.failures = failures;
        self
    }

    /// Restrict the schemas this driver knows; any schema is accepted otherwise
    #[must_use]
    pub fn with_schemas<I, S>(mut self, schemas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.schemas = Some(
            schemas
                .into_iter()
                .map(|s| s.as_ref().to_ascii_lowercase())
                .collect(),
        );
        self
    }

    /// Ledger this driver records into
    #[must_use]
    pub fn ledger(&self) -> &ResourceLedger {
        &self.ledger
    }
}

#[async_trait]
impl DbDriver for MemoryDbDriver {
    async fn acquire(
        &self,
        access: DbAccessType,
        schema: Option<&str>,
    ) -> Result<Box<dyn DbHandle>, ResourceError> {
        if let Some(schema) = schema {
            if !self.is_schema_defined(schema) {
                return Err(ResourceError::UnknownSchema(schema.to_string()));
            }
        }
        self.failures
            .check(FailurePoint::Acquire)
            .map_err(|reason| ResourceError::Acquire { access, reason })?;
        let id = self.next_handle.fetch_add(1, Ordering::SeqCst);
        self.ledger.record(ResourceEvent::Acquire {
            handle: id,
            access,
            schema: schema.map(str::to_string),
        });
        Ok(Box::new(MemoryDbHandle {
            id,
            access,
            schema: schema.map(str::to_string),
            ledger: self.ledger.clone(),
            failures: self.failures.clone(),
        }))
    }

    fn is_schema_defined(&self, schema: &str) -> bool {
        self.schemas
            .as_ref()
            .is_none_or(|known| known.contains(&schema.to_ascii_lowercase()))
    }
}

/// A recording handle
#[derive(Debug)]
pub struct MemoryDbHandle {
    id: u64,
    access: DbAccessType,
    schema: Option<String>,
    ledger: ResourceLedger,
    failures: FailurePlan,
}

impl MemoryDbHandle {
    /// Handle number as recorded in the ledger
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }
}

#[async_trait]
impl DbHandle for MemoryDbHandle {
    fn access_type(&self) -> DbAccessType {
        self.access
    }

    fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    async fn execute(&self, statement: &str, _params: &[Value]) -> Result<u64, ResourceError> {
        self.failures
            .check(FailurePoint::Execute)
            .map_err(ResourceError::Statement)?;
        self.ledger.record(ResourceEvent::Execute {
            handle: self.id,
            statement: statement.to_string(),
        });
        Ok(1)
    }

    async fn commit(&self) -> Result<(), ResourceError> {
        self.failures
            .check(FailurePoint::Commit)
            .map_err(ResourceError::Commit)?;
        self.ledger.record(ResourceEvent::Commit { handle: self.id });
        Ok(())
    }

    async fn rollback(&self) -> Result<(), ResourceError> {
        self.failures
            .check(FailurePoint::Rollback)
            .map_err(ResourceError::Rollback)?;
        self.ledger.record(ResourceEvent::Rollback { handle: self.id });
        Ok(())
    }

    async fn release(self: Box<Self>) -> Result<(), ResourceError> {
        // the handle is gone either way; a failed release is still recorded
        self.ledger.record(ResourceEvent::Release { handle: self.id });
        self.failures
            .check(FailurePoint::Release)
            .map_err(ResourceError::Release)
    }
}
