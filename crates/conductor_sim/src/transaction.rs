//! Externally managed transactions, simulated.

use crate::failure::{FailurePlan, FailurePoint};
use crate::record::{ResourceEvent, ResourceLedger};
use async_trait::async_trait;
use conductor_core::{ResourceError, TransactionCoordinator};

/// Coordinator that records begin/commit/rollback
#[derive(Debug, Clone)]
pub struct MemoryTransactionCoordinator {
    ledger: ResourceLedger,
    failures: FailurePlan,
}

impl MemoryTransactionCoordinator {
    /// Create a coordinator recording into `ledger`
    #[must_use]
    pub fn new(ledger: ResourceLedger) -> Self {
        Self {
            ledger,
            failures: FailurePlan::none(),
        }
    }

    /// Inject failures
    #[must_use]
    pub fn with_failures(mut self, failures: FailurePlan) -> Self {
        self.failures = failures;
        self
    }
}

#[async_trait]
impl TransactionCoordinator for MemoryTransactionCoordinator {
    async fn begin(&self) -> Result<(), ResourceError> {
        self.failures.check(FailurePoint::Begin).map_err(ResourceError::Begin)?;
        self.ledger.record(ResourceEvent::BeginExternal);
        Ok(())
    }

    async fn commit(&self) -> Result<(), ResourceError> {
        self.failures
            .check(FailurePoint::ExternalCommit)
            .map_err(ResourceError::Commit)?;
        self.ledger.record(ResourceEvent::CommitExternal);
        Ok(())
    }

    async fn rollback(&self) -> Result<(), ResourceError> {
        self.ledger.record(ResourceEvent::RollbackExternal);
        Ok(())
    }
}
