//! Messaging sessions, simulated.

use crate::failure::{FailurePlan, FailurePoint};
use crate::record::{ResourceEvent, ResourceLedger};
use async_trait::async_trait;
use conductor_core::{MessagingSession, MessagingSetup, MessagingUsage, ResourceError};
use std::sync::Arc;

/// Setup lending recording sessions
#[derive(Debug, Clone)]
pub struct MemoryMessaging {
    ledger: ResourceLedger,
    failures: FailurePlan,
}

impl MemoryMessaging {
    /// Create a setup recording into `ledger`
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
impl MessagingSetup for MemoryMessaging {
    async fn borrow_session(
        &self,
        usage: MessagingUsage,
    ) -> Result<Arc<dyn MessagingSession>, ResourceError> {
        self.failures
            .check(FailurePoint::Borrow)
            .map_err(ResourceError::Messaging)?;
        self.ledger.record(ResourceEvent::Borrow { usage });
        Ok(Arc::new(MemorySession {
            ledger: self.ledger.clone(),
            failures: self.failures.clone(),
        }))
    }

    async fn return_session(
        &self,
        _session: Arc<dyn MessagingSession>,
        success: bool,
    ) -> Result<(), ResourceError> {
        self.ledger.record(ResourceEvent::Return { success });
        self.failures
            .check(FailurePoint::Return)
            .map_err(ResourceError::Messaging)
    }
}

/// A session that records what it sends
#[derive(Debug)]
pub struct MemorySession {
    ledger: ResourceLedger,
    failures: FailurePlan,
}

#[async_trait]
impl MessagingSession for MemorySession {
    async fn send(&self, destination: &str, payload: serde_json::Value) -> Result<(), ResourceError> {
        self.failures
            .check(FailurePoint::Send)
            .map_err(ResourceError::Messaging)?;
        self.ledger.record(ResourceEvent::Send {
            destination: destination.to_string(),
            payload,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_borrow_send_return() {
        let ledger = ResourceLedger::new();
        let messaging = MemoryMessaging::new(ledger.clone());
        let session = messaging.borrow_session(MessagingUsage::Shared).await.unwrap();
        session.send("orders", json!({"id": 1})).await.unwrap();
        messaging.return_session(session, true).await.unwrap();
        assert_eq!(ledger.sent_to("orders"), vec![json!({"id": 1})]);
        assert_eq!(ledger.events().len(), 3);
    }

    #[tokio::test]
    async fn test_send_failure() {
        let ledger = ResourceLedger::new();
        let messaging = MemoryMessaging::new(ledger.clone())
            .with_failures(FailurePlan::none().fail_on(FailurePoint::Send));
        let session = messaging.borrow_session(MessagingUsage::ServiceManaged).await.unwrap();
        assert!(session.send("x", json!(null)).await.is_err());
        assert!(ledger.sent_to("x").is_empty());
    }
}
