//! Produced interface: status and manual healing

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::cache::EntityStateCache;
use crate::clock::Clock;
use crate::health::SharedHealthMonitor;
use crate::healing::{HealingOrchestrator, Trigger};
use crate::storage::PatternRecorder;
use crate::types::{HealingOutcome, SentinelStatus, StreamStatus};

/// Handle over the running components, shared with the HTTP surface.
#[derive(Clone)]
pub struct Sentinel {
    cache: Arc<EntityStateCache>,
    health: SharedHealthMonitor,
    orchestrator: Arc<HealingOrchestrator>,
    stream_status: Arc<RwLock<StreamStatus>>,
    recorder: Arc<dyn PatternRecorder>,
    clock: Arc<dyn Clock>,
}

impl Sentinel {
    pub fn new(
        cache: Arc<EntityStateCache>,
        health: SharedHealthMonitor,
        orchestrator: Arc<HealingOrchestrator>,
        stream_status: Arc<RwLock<StreamStatus>>,
        recorder: Arc<dyn PatternRecorder>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            cache,
            health,
            orchestrator,
            stream_status,
            recorder,
            clock,
        }
    }

    pub async fn get_status(&self) -> SentinelStatus {
        let stream = self.stream_status.read().await.clone();
        SentinelStatus {
            monitored_entity_count: self.cache.len(),
            open_issues: self.health.lock().open_issues(),
            per_integration_circuit_state: self.orchestrator.integration_statuses(),
            stream,
            generated_at: self.clock.now(),
        }
    }

    /// Heal an entity on request, subject to the same cooldown and circuit
    /// checks as automatic healing.
    pub async fn trigger_heal(&self, entity_id: &str, dry_run: bool) -> HealingOutcome {
        tracing::info!(entity_id, dry_run, "Manual heal requested");
        self.orchestrator
            .heal(entity_id, Trigger::Manual { dry_run })
            .await
    }

    pub fn recorder(&self) -> &Arc<dyn PatternRecorder> {
        &self.recorder
    }

    pub fn cache(&self) -> &Arc<EntityStateCache> {
        &self.cache
    }
}
