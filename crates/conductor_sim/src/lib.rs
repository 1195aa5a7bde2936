//! Conductor Simulated Resources
//!
//! In-memory database driver, transaction coordinator and messaging setup.
//! Every operation is recorded in a shared [`ResourceLedger`] and any of
//! them can be made to fail through a [`FailurePlan`], scripted or seeded.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod db;
pub mod failure;
pub mod messaging;
pub mod record;
pub mod transaction;

pub use db::{MemoryDbDriver, MemoryDbHandle};
pub use failure::{FailureModel, FailurePlan, FailurePoint};
pub use messaging::{MemoryMessaging, MemorySession};
pub use record::{ResourceEvent, ResourceLedger};
pub use transaction::MemoryTransactionCoordinator;

use conductor_core::Resources;
use std::sync::Arc;

/// All simulated resources sharing one ledger and one failure plan
#[derive(Debug, Clone, Default)]
pub struct SimResources {
    ledger: ResourceLedger,
    failures: FailurePlan,
}

impl SimResources {
    /// Resources that never fail
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resources failing according to `failures`
    #[must_use]
    pub fn with_failures(failures: FailurePlan) -> Self {
        Self {
            ledger: ResourceLedger::new(),
            failures,
        }
    }

    /// Shared ledger
    #[must_use]
    pub fn ledger(&self) -> &ResourceLedger {
        &self.ledger
    }

    /// Shared failure plan
    #[must_use]
    pub fn failures(&self) -> &FailurePlan {
        &self.failures
    }

    /// Resources bundle for a processor
    #[must_use]
    pub fn resources(&self) -> Resources {
        Resources::new()
            .with_db_driver(Arc::new(
                MemoryDbDriver::new(self.ledger.clone()).with_failures(self.failures.clone()),
            ))
            .with_transactions(Arc::new(
                MemoryTransactionCoordinator::new(self.ledger.clone())
                    .with_failures(self.failures.clone()),
            ))
            .with_messaging(Arc::new(
                MemoryMessaging::new(self.ledger.clone()).with_failures(self.failures.clone()),
            ))
    }
}
