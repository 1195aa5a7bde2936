//! Contracts with the database and messaging layers.
//!
//! The engine never talks to a database or broker directly. It asks a
//! [`DbDriver`] for a [`DbHandle`] of a given access level, asks a
//! [`TransactionCoordinator`] to begin/commit/rollback externally managed
//! transactions, and borrows [`MessagingSession`]s from a [`MessagingSetup`].

use crate::error::{EngineError, EngineResult, ResourceError};
use crate::usage::{DbAccessType, MessagingUsage};
use crate::value::Value;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// A handle borrowed from a driver for the duration of one run
#[async_trait]
pub trait DbHandle: Send + Sync {
    /// Access level this handle was acquired with
    fn access_type(&self) -> DbAccessType;

    /// Schema, `None` for the default schema
    fn schema(&self) -> Option<&str>;

    /// Run a statement, returning the number of affected rows
    async fn execute(&self, statement: &str, params: &[Value]) -> Result<u64, ResourceError>;

    /// Commit work done so far
    async fn commit(&self) -> Result<(), ResourceError>;

    /// Discard work done so far
    async fn rollback(&self) -> Result<(), ResourceError>;

    /// Give the handle back to its driver
    async fn release(self: Box<Self>) -> Result<(), ResourceError>;
}

/// Source of db handles
#[async_trait]
pub trait DbDriver: Send + Sync {
    /// Acquire a handle of the requested access level
    async fn acquire(
        &self,
        access: DbAccessType,
        schema: Option<&str>,
    ) -> Result<Box<dyn DbHandle>, ResourceError>;

    /// Is `schema` configured for this driver?
    fn is_schema_defined(&self, _schema: &str) -> bool {
        true
    }
}

/// Coordinator for externally managed transactions
#[async_trait]
pub trait TransactionCoordinator: Send + Sync {
    /// Start a transaction
    async fn begin(&self) -> Result<(), ResourceError>;

    /// Commit the current transaction
    async fn commit(&self) -> Result<(), ResourceError>;

    /// Roll back the current transaction
    async fn rollback(&self) -> Result<(), ResourceError>;
}

/// A borrowed messaging session
#[async_trait]
pub trait MessagingSession: Send + Sync {
    /// Send a payload to a destination
    async fn send(&self, destination: &str, payload: serde_json::Value) -> Result<(), ResourceError>;
}

/// Pool of messaging sessions
#[async_trait]
pub trait MessagingSetup: Send + Sync {
    /// Borrow a session suitable for `usage`
    async fn borrow_session(
        &self,
        usage: MessagingUsage,
    ) -> Result<Arc<dyn MessagingSession>, ResourceError>;

    /// Return a session; `success` decides commit or rollback of its work
    async fn return_session(
        &self,
        session: Arc<dyn MessagingSession>,
        success: bool,
    ) -> Result<(), ResourceError>;
}

/// The external collaborators available to a processor
#[derive(Clone, Default)]
pub struct Resources {
    db_driver: Option<Arc<dyn DbDriver>>,
    transactions: Option<Arc<dyn TransactionCoordinator>>,
    messaging: Option<Arc<dyn MessagingSetup>>,
}

impl Resources {
    /// No resources at all
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the db driver
    #[must_use]
    pub fn with_db_driver(mut self, driver: Arc<dyn DbDriver>) -> Self {
        self.db_driver = Some(driver);
        self
    }

    /// Set the external transaction coordinator
    #[must_use]
    pub fn with_transactions(mut self, coordinator: Arc<dyn TransactionCoordinator>) -> Self {
        self.transactions = Some(coordinator);
        self
    }

    /// Set the messaging setup
    #[must_use]
    pub fn with_messaging(mut self, messaging: Arc<dyn MessagingSetup>) -> Self {
        self.messaging = Some(messaging);
        self
    }

    /// Db driver, if configured
    #[must_use]
    pub fn db_driver(&self) -> Option<&Arc<dyn DbDriver>> {
        self.db_driver.as_ref()
    }

    /// Db driver, or a configuration error naming `component`
    ///
    /// # Errors
    ///
    /// Returns error if no driver is configured
    pub fn require_db_driver(&self, component: &str) -> EngineResult<&Arc<dyn DbDriver>> {
        self.db_driver.as_ref().ok_or_else(|| EngineError::InvalidDefinition {
            component: component.to_string(),
            reason: "db access is required but no db driver is configured".to_string(),
        })
    }

    /// External transaction coordinator, or a configuration error naming `component`
    ///
    /// # Errors
    ///
    /// Returns error if no coordinator is configured
    pub fn require_transactions(
        &self,
        component: &str,
    ) -> EngineResult<&Arc<dyn TransactionCoordinator>> {
        self.transactions.as_ref().ok_or_else(|| EngineError::InvalidDefinition {
            component: component.to_string(),
            reason: "external transactions are required but no coordinator is configured"
                .to_string(),
        })
    }

    /// Messaging setup, or a configuration error naming `component`
    ///
    /// # Errors
    ///
    /// Returns error if messaging is not configured
    pub fn require_messaging(&self, component: &str) -> EngineResult<&Arc<dyn MessagingSetup>> {
        self.messaging.as_ref().ok_or_else(|| EngineError::InvalidDefinition {
            component: component.to_string(),
            reason: "messaging is required but no messaging setup is configured".to_string(),
        })
    }
}

impl fmt::Debug for Resources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resources")
            .field("db_driver", &self.db_driver.is_some())
            .field("transactions", &self.transactions.is_some())
            .field("messaging", &self.messaging.is_some())
            .finish()
    }
}
