//! Remediation executors

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use crate::controller::{ControllerClient, ControllerError};
use crate::types::RemediationStrategy;

#[derive(Debug, thiserror::Error)]
pub enum RemediationError {
    #[error("reload request failed: {0}")]
    Controller(#[from] ControllerError),
    #[error("remediation timed out after {0}s")]
    Timeout(u64),
    #[error("remediation rejected: {0}")]
    Rejected(String),
}

/// Performs the actual corrective action for an integration.
#[async_trait]
pub trait RemediationExecutor: Send + Sync + 'static {
    async fn reload(&self, integration_id: &str) -> Result<(), RemediationError>;

    fn strategy(&self) -> RemediationStrategy;
}

/// Reloads config entries through the controller, using the configured strategy.
#[derive(Debug, Clone)]
pub struct ControllerRemediator {
    client: ControllerClient,
    strategy: RemediationStrategy,
}

impl ControllerRemediator {
    pub fn new(client: ControllerClient, strategy: RemediationStrategy) -> Self {
        Self { client, strategy }
    }
}

#[async_trait]
impl RemediationExecutor for ControllerRemediator {
    async fn reload(&self, integration_id: &str) -> Result<(), RemediationError> {
        match self.strategy {
            RemediationStrategy::ReloadIntegration => {
                let response = self.client.reload_config_entry(integration_id).await?;
                if response.require_restart {
                    warn!(integration = integration_id, "Reload done but the controller requires a restart");
                }
            }
            RemediationStrategy::ReloadViaService => {
                self.client
                    .call_service(
                        "homeassistant",
                        "reload_config_entry",
                        &json!({ "entry_id": integration_id }),
                    )
                    .await?;
            }
        }
        info!(integration = integration_id, strategy = %self.strategy, "Integration reloaded");
        Ok(())
    }

    fn strategy(&self) -> RemediationStrategy {
        self.strategy
    }
}
