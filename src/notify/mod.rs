//! Notification sinks for escalations
//!
//! Escalations are the only user-facing failure signal. Delivery is
//! fire-and-forget from the caller's point of view: [`deliver`] bounds the
//! wait and logs failures instead of propagating them.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, warn};

use crate::controller::{ControllerClient, ControllerError};
use crate::types::Escalation;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Controller notification failed: {0}")]
    Controller(#[from] ControllerError),
    #[error("{failed} of {total} sinks failed")]
    Partial { failed: usize, total: usize },
}

#[async_trait]
pub trait NotificationSink: Send + Sync + 'static {
    async fn escalate(&self, escalation: &Escalation) -> Result<(), NotifyError>;
}

/// Send an escalation, waiting at most `timeout`. Never fails.
pub async fn deliver(sink: &dyn NotificationSink, escalation: &Escalation, timeout: Duration) {
    match tokio::time::timeout(timeout, sink.escalate(escalation)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            warn!(entity_id = %escalation.entity_id, reason = %escalation.reason, error = %e, "Escalation delivery failed");
        }
        Err(_) => {
            warn!(entity_id = %escalation.entity_id, reason = %escalation.reason, timeout_secs = timeout.as_secs(), "Escalation delivery timed out");
        }
    }
}

/// Writes escalations to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn escalate(&self, escalation: &Escalation) -> Result<(), NotifyError> {
        error!(
            entity_id = %escalation.entity_id,
            integration = escalation.integration_id.as_deref().unwrap_or("-"),
            reason = %escalation.reason,
            context = ?escalation.context,
            "ESCALATION"
        );
        Ok(())
    }
}

/// Raises a persistent notification in the controller UI.
#[derive(Debug, Clone)]
pub struct ControllerNotifier {
    client: ControllerClient,
    title: String,
}

impl ControllerNotifier {
    pub fn new(client: ControllerClient, title: impl Into<String>) -> Self {
        Self {
            client,
            title: title.into(),
        }
    }

    fn message(escalation: &Escalation) -> String {
        let mut message = format!("Automatic healing stopped for `{}`", escalation.entity_id);
        if let Some(integration) = &escalation.integration_id {
            message.push_str(&format!(" (integration `{integration}`)"));
        }
        message.push_str(&format!(": **{}**.", escalation.reason));
        for (key, value) in &escalation.context {
            message.push_str(&format!("\n- {key}: {value}"));
        }
        message
    }
}

#[async_trait]
impl NotificationSink for ControllerNotifier {
    async fn escalate(&self, escalation: &Escalation) -> Result<(), NotifyError> {
        // One notification per entity and reason; repeats replace the previous one
        let notification_id = format!(
            "hass_sentinel_{}_{}",
            escalation.entity_id.replace('.', "_"),
            serde_json::to_value(escalation.reason)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default()
        );
        self.client
            .create_notification(&self.title, &Self::message(escalation), &notification_id)
            .await?;
        Ok(())
    }
}

/// Delivers to several sinks; reports failure if any of them failed.
#[derive(Clone, Default)]
pub struct FanoutNotifier {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl FanoutNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl NotificationSink for FanoutNotifier {
    async fn escalate(&self, escalation: &Escalation) -> Result<(), NotifyError> {
        let results = futures::future::join_all(self.sinks.iter().map(|s| s.escalate(escalation))).await;
        let failed = results
            .iter()
            .filter(|r| {
                if let Err(e) = r {
                    warn!(error = %e, "Notification sink failed");
                    true
                } else {
                    false
                }
            })
            .count();
        if failed == 0 {
            Ok(())
        } else {
            Err(NotifyError::Partial {
                failed,
                total: self.sinks.len(),
            })
        }
    }
}

/// Keeps escalations in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryNotifier {
    received: Arc<Mutex<Vec<Escalation>>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn escalations(&self) -> Vec<Escalation> {
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl NotificationSink for MemoryNotifier {
    async fn escalate(&self, escalation: &Escalation) -> Result<(), NotifyError> {
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(escalation.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EscalationReason;
    use chrono::Utc;

    struct FailingSink;

    #[async_trait]
    impl NotificationSink for FailingSink {
        async fn escalate(&self, _escalation: &Escalation) -> Result<(), NotifyError> {
            Err(NotifyError::Partial { failed: 1, total: 1 })
        }
    }

    struct HangingSink;

    #[async_trait]
    impl NotificationSink for HangingSink {
        async fn escalate(&self, _escalation: &Escalation) -> Result<(), NotifyError> {
            futures::future::pending::<()>().await;
            Ok(())
        }
    }

    fn escalation() -> Escalation {
        Escalation::new("light.porch", EscalationReason::CircuitOpen, Utc::now()).with_integration("hue")
    }

    #[tokio::test]
    async fn test_fanout_delivers_to_all_and_reports_partial_failure() {
        let memory = MemoryNotifier::new();
        let fanout = FanoutNotifier::new()
            .with(Arc::new(memory.clone()))
            .with(Arc::new(FailingSink));
        let result = fanout.escalate(&escalation()).await;
        assert!(matches!(result, Err(NotifyError::Partial { failed: 1, total: 2 })));
        assert_eq!(memory.escalations().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deliver_bounds_a_hanging_sink() {
        deliver(&HangingSink, &escalation(), Duration::from_secs(5)).await;
    }

    #[test]
    fn test_controller_message_mentions_reason_and_context() {
        let msg = ControllerNotifier::message(&escalation().with_context("failure_count", 5));
        assert!(msg.contains("light.porch"));
        assert!(msg.contains("circuit open"));
        assert!(msg.contains("failure_count: 5"));
    }
}
